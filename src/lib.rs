//! Voxray - GPU ray marching over interchangeable voxel acceleration structures
//!
//! Data flows one way: a [`source::VoxelSource`] is sampled by a builder on a
//! worker thread, the finished payload is uploaded through the staging
//! commit, and the structure's compute shader marches rays against it.
//!
//! - `generation`: CPU builders for the grid, texture, octree, contree and brickmap
//! - `structures`: GPU side of each structure and the shared lifecycle
//! - `shader`: WGSL preprocessing, the module registry and live reload
//! - `manager`: owns the live structure and switches between types
//! - `renderer`: ray generation and the per-frame loop

pub mod camera;
pub mod config;
pub mod constants;
pub mod error;
pub mod generation;
pub mod gpu;
pub mod manager;
pub mod morton;
pub mod renderer;
pub mod shader;
pub mod source;
pub mod structures;

use std::sync::Arc;
use std::time::Duration;

use glam::UVec2;

pub use camera::CameraData;
pub use config::RendererConfig;
pub use error::{ErrorContext, OptionExt, VoxrayError, VoxrayResult};
pub use gpu::GpuContext;
pub use manager::{AsManager, RenderStyle};
pub use renderer::{FrameOutcome, FrameRenderer};
pub use source::{DenseSource, EquationSource, SceneLoader, SharedSource, VoxelSource};
pub use structures::{StructureType, ValidStructures};

pub use wgpu;

/// Manager and frame loop wired to one device.
pub struct Voxray {
    pub gpu: GpuContext,
    pub manager: AsManager,
    pub frame: FrameRenderer,
}

impl Voxray {
    pub fn new(gpu: GpuContext, config: &RendererConfig, size: UVec2) -> VoxrayResult<Self> {
        config.validate()?;

        let compiler = shader::WgpuShaderCompiler::new(gpu.device.clone(), config.shader_dir.clone());
        let mut registry = shader::WgpuShaderRegistry::new(compiler);
        if config.watch_shaders {
            attach_watcher(&mut registry);
        }

        let frame = FrameRenderer::new(
            gpu.clone(),
            &mut registry,
            size,
            Duration::from_millis(config.frame_timeout_ms),
        )?;

        let info = structures::StructureInitInfo {
            gpu: gpu.clone(),
            ray_set_layout: frame.ray_set_layout(),
            hit_data_address: 0,
            brickmap_request_slots: config.brickmap_request_slots,
        };
        let manager = AsManager::init(info, registry, gpu.staging(), config);
        log::info!(
            "[Voxray] Initialised with {} at {}x{}",
            manager.current_type(),
            size.x,
            size.y
        );

        Ok(Self {
            gpu,
            manager,
            frame,
        })
    }

    /// Start building the live structure from `source`.
    pub fn load(&mut self, source: Arc<dyn VoxelSource>) {
        self.manager.load_source(source);
    }

    pub fn render_frame(&mut self, camera: &CameraData, dt: f32) -> FrameOutcome {
        self.frame.render(&mut self.manager, camera, dt, None)
    }

    pub fn resize(&mut self, size: UVec2) {
        self.frame.resize(size);
    }

    pub fn shutdown(&mut self) {
        self.frame.finish();
        self.manager.shutdown();
    }
}

#[cfg(feature = "native")]
fn attach_watcher(registry: &mut shader::WgpuShaderRegistry) {
    match shader::NotifyWatcher::new(registry.update_sink()) {
        Ok(watcher) => registry.set_watcher(Box::new(watcher)),
        Err(e) => log::error!("[Voxray] Shader watching disabled: {}", e),
    }
}

#[cfg(not(feature = "native"))]
fn attach_watcher(_registry: &mut shader::WgpuShaderRegistry) {
    log::warn!("[Voxray] Shader watching needs the `native` feature");
}
