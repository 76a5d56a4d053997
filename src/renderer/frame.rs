//! Frame loop
//!
//! Per frame: wait on the previous frame's fence, record ray generation and
//! the structure pass, submit, and arm a new fence. A fence that does not
//! signal within the configured timeout skips the frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::UVec2;

use super::ray_gen::{ray_set_layout, RayGenerator, RayImages, OUTPUT_FORMAT};
use crate::camera::CameraData;
use crate::error::VoxrayResult;
use crate::gpu::{log_gpu_failure, GpuContext};
use crate::manager::AsManager;
use crate::shader::WgpuShaderRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    Skipped,
}

pub struct FrameRenderer {
    gpu: GpuContext,
    ray_set_layout: Arc<wgpu::BindGroupLayout>,
    ray_gen: RayGenerator,
    images: RayImages,
    fence: Option<Arc<AtomicBool>>,
    fence_timeout: Duration,
    frame_index: u64,
}

impl FrameRenderer {
    pub fn new(
        gpu: GpuContext,
        registry: &mut WgpuShaderRegistry,
        size: UVec2,
        fence_timeout: Duration,
    ) -> VoxrayResult<Self> {
        let ray_set_layout = Arc::new(ray_set_layout(&gpu.device));
        let ray_gen = RayGenerator::new(gpu.device.clone(), ray_set_layout.clone(), registry)?;
        let images = ray_gen.create_images(size);

        Ok(Self {
            gpu,
            ray_set_layout,
            ray_gen,
            images,
            fence: None,
            fence_timeout,
            frame_index: 0,
        })
    }

    /// Layout structures must bind at group 0.
    pub fn ray_set_layout(&self) -> Arc<wgpu::BindGroupLayout> {
        self.ray_set_layout.clone()
    }

    pub fn size(&self) -> UVec2 {
        self.images.size
    }

    pub fn output(&self) -> &wgpu::Texture {
        &self.images.output
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Free and re-create the images and the ray set.
    pub fn resize(&mut self, size: UVec2) {
        if size == self.images.size {
            return;
        }
        log_gpu_failure("Frame", self.gpu.recovery.wait_idle_checked());
        self.images = self.ray_gen.create_images(size);
        log::info!("[Frame] Resized to {}x{}", size.x, size.y);
    }

    fn wait_for_previous(&mut self) -> bool {
        let Some(fence) = self.fence.as_ref() else {
            return true;
        };
        match self
            .gpu
            .recovery
            .wait_for_flag(fence, self.fence_timeout, "frame fence")
        {
            Ok(()) => {
                self.fence = None;
                true
            }
            Err(e) => {
                log::error!("[Frame] {}; skipping frame {}", e, self.frame_index);
                false
            }
        }
    }

    /// Render one frame into the output image, then copy it to `target`
    /// when given. The target must be `Rgba8Unorm` with `COPY_DST`.
    pub fn render(
        &mut self,
        manager: &mut AsManager,
        camera: &CameraData,
        dt: f32,
        target: Option<&wgpu::Texture>,
    ) -> FrameOutcome {
        if !self.wait_for_previous() {
            return FrameOutcome::Skipped;
        }

        manager.update(dt);

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        if !self.ray_gen.dispatch(&mut encoder, camera, &self.images) {
            log::debug!("[Frame] Ray generation pipeline not ready");
            return FrameOutcome::Skipped;
        }
        manager.render(&mut encoder, camera, &self.images.ray_set, self.images.size);

        if let Some(target) = target {
            copy_output(&mut encoder, &self.images, target);
        }

        let submitted = self.gpu.recovery.submit_with_recovery(vec![encoder.finish()]);
        if log_gpu_failure("Frame", submitted).is_none() {
            return FrameOutcome::Skipped;
        }

        let fence = Arc::new(AtomicBool::new(false));
        let signal = fence.clone();
        self.gpu
            .queue
            .on_submitted_work_done(move || signal.store(true, Ordering::Release));
        self.fence = Some(fence);
        self.frame_index += 1;
        FrameOutcome::Rendered
    }

    /// Render to a window surface. Acquire timeouts skip the frame; an
    /// outdated or lost surface is reconfigured with `config` and the
    /// frame skipped.
    pub fn render_to_surface(
        &mut self,
        manager: &mut AsManager,
        camera: &CameraData,
        dt: f32,
        surface: &wgpu::Surface,
        config: &wgpu::SurfaceConfiguration,
    ) -> FrameOutcome {
        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(e) => {
                match surface_action(&e) {
                    SurfaceAction::Skip => log::warn!("[Frame] Surface not ready, skipping frame"),
                    SurfaceAction::Reconfigure => {
                        log::warn!("[Frame] Surface {}, reconfiguring", e);
                        surface.configure(&self.gpu.device, config);
                    }
                    SurfaceAction::Fail => log::error!("[Frame] Failed to acquire surface: {}", e),
                }
                return FrameOutcome::Skipped;
            }
        };

        let compatible = frame.texture.format() == OUTPUT_FORMAT
            && frame.texture.usage().contains(wgpu::TextureUsages::COPY_DST);
        if !compatible {
            log::debug!("[Frame] Surface format {:?} cannot receive the output", frame.texture.format());
        }
        let outcome = self.render(manager, camera, dt, compatible.then_some(&frame.texture));
        frame.present();
        outcome
    }

    /// Wait for the in-flight frame to finish.
    pub fn finish(&mut self) {
        self.wait_for_previous();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceAction {
    Skip,
    Reconfigure,
    Fail,
}

fn surface_action(error: &wgpu::SurfaceError) -> SurfaceAction {
    match error {
        wgpu::SurfaceError::Timeout => SurfaceAction::Skip,
        wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost => SurfaceAction::Reconfigure,
        wgpu::SurfaceError::OutOfMemory => SurfaceAction::Fail,
    }
}

fn copy_output(encoder: &mut wgpu::CommandEncoder, images: &RayImages, target: &wgpu::Texture) {
    let width = images.size.x.min(target.width());
    let height = images.size.y.min(target.height());
    if width == 0 || height == 0 {
        return;
    }
    encoder.copy_texture_to_texture(
        images.output.as_image_copy(),
        target.as_image_copy(),
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}
