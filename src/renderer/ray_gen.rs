//! Primary ray generation
//!
//! One compute pass writes a world-space ray direction per pixel into an
//! `Rgba32Float` image. The structure passes read it back through the ray
//! image set (group 0) together with the output image they shade into.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use glam::UVec2;

use crate::camera::{build_ray_constants, CameraData, RayGenConstants};
use crate::error::VoxrayResult;
use crate::shader::WgpuShaderRegistry;
use crate::structures::common::{dispatch_size, ComputePipelineHook, PipelineLayouts, PipelineSlot};

const RAY_GEN_MODULE: &str = "ray_gen";
pub const RAY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
pub const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Layout of the ray image set read by every structure shader.
pub fn ray_set_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Ray Image Set Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: OUTPUT_FORMAT,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
        ],
    })
}

fn ray_write_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Ray Gen Set Layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: RAY_FORMAT,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        }],
    })
}

/// Ray direction and output images plus the bind groups over them.
pub struct RayImages {
    pub size: UVec2,
    pub output: wgpu::Texture,
    pub ray_set: wgpu::BindGroup,
    write_set: wgpu::BindGroup,
}

impl RayImages {
    fn storage_texture(
        device: &wgpu::Device,
        label: &str,
        size: UVec2,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.x.max(1),
                height: size.y.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::STORAGE_BINDING | usage,
            view_formats: &[],
        })
    }
}

pub struct RayGenerator {
    device: Arc<wgpu::Device>,
    ray_set_layout: Arc<wgpu::BindGroupLayout>,
    write_layout: wgpu::BindGroupLayout,
    pipeline: PipelineSlot,
}

impl RayGenerator {
    pub fn new(
        device: Arc<wgpu::Device>,
        ray_set_layout: Arc<wgpu::BindGroupLayout>,
        registry: &mut WgpuShaderRegistry,
    ) -> VoxrayResult<Self> {
        let write_layout = ray_write_layout(&device);
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Ray Gen pipeline layout"),
            bind_group_layouts: &[&write_layout],
            push_constant_ranges: &[wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: 0..std::mem::size_of::<RayGenConstants>() as u32,
            }],
        });

        let pipeline = PipelineSlot::default();
        let hook = ComputePipelineHook::new(
            device.clone(),
            "ray_gen pipeline",
            PipelineLayouts::single(layout),
            Arc::new(AtomicBool::new(false)),
            pipeline.clone(),
        );
        registry.add_module(RAY_GEN_MODULE, Box::new(hook))?;

        Ok(Self {
            device,
            ray_set_layout,
            write_layout,
            pipeline,
        })
    }

    /// Allocate images for `size` and the bind groups over them.
    pub fn create_images(&self, size: UVec2) -> RayImages {
        let rays = RayImages::storage_texture(
            &self.device,
            "Ray Directions",
            size,
            RAY_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let output = RayImages::storage_texture(
            &self.device,
            "Ray Output",
            size,
            OUTPUT_FORMAT,
            wgpu::TextureUsages::COPY_SRC,
        );
        let ray_view = rays.create_view(&wgpu::TextureViewDescriptor::default());
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());

        let ray_set = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ray Image Set"),
            layout: &self.ray_set_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&ray_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&output_view),
                },
            ],
        });
        let write_set = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ray Gen Set"),
            layout: &self.write_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&ray_view),
            }],
        });

        RayImages {
            size,
            output,
            ray_set,
            write_set,
        }
    }

    /// Record the ray generation pass. Returns false if the pipeline is missing.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        camera: &CameraData,
        images: &RayImages,
    ) -> bool {
        let guard = self.pipeline.lock();
        let Some(built) = guard.as_ref() else {
            return false;
        };

        let constants = build_ray_constants(camera, images.size);
        let (x, y) = dispatch_size(images.size);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Ray Gen"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&built.pipeline);
        pass.set_bind_group(0, &images.write_set, &[]);
        pass.set_push_constants(0, bytemuck::bytes_of(&constants));
        pass.dispatch_workgroups(x, y, 1);
        true
    }
}
