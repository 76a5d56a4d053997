//! Acceleration structure manager
//!
//! Owns the shader registry, the staging commit and the one live
//! structure. Nothing here returns errors to the caller: failures are
//! logged and show up through the status queries.

use std::path::PathBuf;
use std::sync::Arc;

use glam::UVec2;
use serde::{Deserialize, Serialize};

use crate::camera::CameraData;
use crate::config::RendererConfig;
use crate::constants::macros;
use crate::error::VoxrayError;
use crate::gpu::{log_gpu_failure, WgpuStaging};
use crate::shader::WgpuShaderRegistry;
use crate::source::{SceneLoader, SharedSource};
use crate::structures::{
    AccelerationStructure, StructureContext, StructureInitInfo, StructureType, ValidStructures,
};

/// What the ray marching shaders write to the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStyle {
    #[default]
    Normal,
    /// Step count per ray.
    Heatmap,
    /// Traversal loop iterations per ray.
    Cycles,
}

pub struct AsManager {
    info: StructureInitInfo,
    registry: WgpuShaderRegistry,
    staging: WgpuStaging,
    current_type: StructureType,
    current: Option<AccelerationStructure>,
    valid_structures: ValidStructures,
    render_style: RenderStyle,
}

impl AsManager {
    /// Seed the macro table from `config` and build the default structure.
    pub fn init(
        info: StructureInitInfo,
        mut registry: WgpuShaderRegistry,
        staging: WgpuStaging,
        config: &RendererConfig,
    ) -> Self {
        for (name, value) in config.shader_settings() {
            registry.set_macro(name, value);
        }

        let mut manager = Self {
            info,
            registry,
            staging,
            current_type: config.default_structure,
            current: None,
            valid_structures: ValidStructures::all(),
            render_style: RenderStyle::Normal,
        };
        manager.apply_render_style_macros(config.render_style);
        manager.current = manager.create(config.default_structure);
        manager
    }

    fn context(&mut self) -> StructureContext<'_> {
        StructureContext {
            registry: &mut self.registry,
            staging: &mut self.staging,
        }
    }

    fn create(&mut self, ty: StructureType) -> Option<AccelerationStructure> {
        let info = self.info.clone();
        match AccelerationStructure::init(ty, &info, &mut self.context()) {
            Ok(structure) => Some(structure),
            Err(e) => {
                log::error!("[AS Manager] Failed to initialise {}: {}", ty, e);
                None
            }
        }
    }

    fn wait_idle(&self) {
        log_gpu_failure("AS Manager", self.info.gpu.recovery.wait_idle_checked());
    }

    /// Replace the live structure with a fresh one of `ty`.
    pub fn set_type(&mut self, ty: StructureType) {
        self.wait_idle();
        if let Some(mut old) = self.current.take() {
            let mut ctx = StructureContext {
                registry: &mut self.registry,
                staging: &mut self.staging,
            };
            old.destroy(&mut ctx);
        }
        self.current_type = ty;
        self.current = self.create(ty);
        log::info!("[AS Manager] Changed to {}", ty);
    }

    pub fn current_type(&self) -> StructureType {
        self.current_type
    }

    pub fn structure(&self) -> Option<&AccelerationStructure> {
        self.current.as_ref()
    }

    pub fn registry(&self) -> &WgpuShaderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut WgpuShaderRegistry {
        &mut self.registry
    }

    /// Start building the live structure from `source`.
    pub fn load_source(&mut self, source: SharedSource) {
        let mut ctx = StructureContext {
            registry: &mut self.registry,
            staging: &mut self.staging,
        };
        match self.current.as_mut() {
            Some(structure) => structure.from_source(&mut ctx, source),
            None => log::error!("[AS Manager] No {} structure to load into", self.current_type),
        }
    }

    /// Load a scene file if the live type is among `valid`.
    pub fn load_file(&mut self, path: PathBuf, valid: ValidStructures, loader: Arc<dyn SceneLoader>) {
        if !valid.is_valid(self.current_type) {
            let error = VoxrayError::StructureTypeMismatch {
                requested: self.current_type.to_string(),
                path: path.display().to_string(),
            };
            log::error!("[AS Manager] {}", error);
            return;
        }
        self.valid_structures = valid;

        let mut ctx = StructureContext {
            registry: &mut self.registry,
            staging: &mut self.staging,
        };
        match self.current.as_mut() {
            Some(structure) => structure.from_file(&mut ctx, path, loader),
            None => log::error!("[AS Manager] No {} structure to load into", self.current_type),
        }
    }

    pub fn valid_structures(&self) -> ValidStructures {
        self.valid_structures
    }

    /// Apply shader reloads, promote a finished build and flush uploads.
    pub fn update(&mut self, dt: f32) {
        let rebuilt = self.registry.apply_updates();
        if rebuilt > 0 {
            log::debug!("[AS Manager] Reloaded {} shader modules", rebuilt);
        }

        let mut ctx = StructureContext {
            registry: &mut self.registry,
            staging: &mut self.staging,
        };
        if let Some(structure) = self.current.as_mut() {
            structure.update(&mut ctx, dt);
        }

        log_gpu_failure("Staging", self.staging.commit());
    }

    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        camera: &CameraData,
        ray_set: &wgpu::BindGroup,
        image_size: UVec2,
    ) {
        if let Some(structure) = &self.current {
            structure.render(encoder, camera, ray_set, image_size);
        }
    }

    fn apply_render_style_macros(&mut self, style: RenderStyle) {
        self.registry.remove_macro(macros::HEATMAP);
        self.registry.remove_macro(macros::CYCLES);
        match style {
            RenderStyle::Normal => {}
            RenderStyle::Heatmap => self.registry.define_macro(macros::HEATMAP),
            RenderStyle::Cycles => self.registry.define_macro(macros::CYCLES),
        }
        self.render_style = style;
    }

    pub fn render_style(&self) -> RenderStyle {
        self.render_style
    }

    pub fn set_render_style(&mut self, style: RenderStyle) {
        if style == self.render_style {
            return;
        }
        self.apply_render_style_macros(style);
        self.rebuild_shaders();
        log::info!("[AS Manager] Render style {:?}", style);
    }

    /// Change one shader setting macro and rebuild the live structure.
    pub fn set_setting(&mut self, name: &str, value: impl ToString) {
        self.registry.set_macro(name, value.to_string());
        self.rebuild_shaders();
    }

    fn rebuild_shaders(&mut self) {
        let mut ctx = StructureContext {
            registry: &mut self.registry,
            staging: &mut self.staging,
        };
        if let Some(structure) = &self.current {
            structure.update_shaders(&mut ctx);
        }
    }

    pub fn status(&self) -> &'static str {
        match &self.current {
            Some(s) if s.is_loading() => "Loading",
            Some(s) if s.is_generating() => "Generating",
            _ => "Idle",
        }
    }

    pub fn is_generating(&self) -> bool {
        self.current.as_ref().is_some_and(|s| s.is_generating())
    }

    pub fn is_loading(&self) -> bool {
        self.current.as_ref().is_some_and(|s| s.is_loading())
    }

    pub fn finished_generation(&self) -> bool {
        self.current.as_ref().is_some_and(|s| s.finished_generation())
    }

    pub fn completion(&self) -> f32 {
        self.current.as_ref().map_or(0.0, |s| s.completion())
    }

    pub fn generation_time(&self) -> f32 {
        self.current.as_ref().map_or(0.0, |s| s.generation_time())
    }

    pub fn voxel_count(&self) -> u64 {
        self.current.as_ref().map_or(0, |s| s.voxel_count())
    }

    pub fn node_count(&self) -> u64 {
        self.current.as_ref().map_or(0, |s| s.node_count())
    }

    pub fn memory_usage(&self) -> u64 {
        self.current.as_ref().map_or(0, |s| s.memory_usage())
    }

    pub fn bytes_per_voxel(&self) -> f64 {
        bytes_per_voxel(self.memory_usage(), self.voxel_count())
    }

    /// Tear down the live structure and the services it used.
    pub fn shutdown(&mut self) {
        self.wait_idle();
        if let Some(mut structure) = self.current.take() {
            let mut ctx = StructureContext {
                registry: &mut self.registry,
                staging: &mut self.staging,
            };
            structure.destroy(&mut ctx);
        }
        self.registry.shutdown();
        self.staging.shutdown();
        log::info!("[AS Manager] Shut down");
    }
}

pub fn bytes_per_voxel(memory: u64, voxels: u64) -> f64 {
    if voxels == 0 {
        0.0
    } else {
        memory as f64 / voxels as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use glam::{UVec3, Vec3};

    use crate::camera::look_at;
    use crate::error::VoxrayResult;
    use crate::gpu::GpuContext;
    use crate::source::DenseSource;
    use crate::Voxray;

    /// Renderer on a headless device, or `None` without an adapter.
    fn gpu_renderer() -> Option<Voxray> {
        let gpu = match GpuContext::headless() {
            Ok(gpu) => gpu,
            Err(e) => {
                println!("No GPU available ({}), skipping", e);
                return None;
            }
        };
        let config = RendererConfig {
            shader_dir: concat!(env!("CARGO_MANIFEST_DIR"), "/src/shaders").into(),
            watch_shaders: false,
            ..Default::default()
        };
        Some(Voxray::new(gpu, &config, UVec2::new(32, 32)).unwrap())
    }

    #[derive(Default)]
    struct CountingLoader {
        calls: AtomicUsize,
    }

    impl SceneLoader for CountingLoader {
        fn load(&self, _path: &Path) -> VoxrayResult<SharedSource> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(DenseSource::new(UVec3::splat(2))))
        }
    }

    fn scene() -> SharedSource {
        let mut source = DenseSource::new(UVec3::splat(8));
        for x in 0..8 {
            source.set(UVec3::new(x, 0, x % 3), Some(Vec3::new(0.2, 0.7, 0.4)));
        }
        Arc::new(source)
    }

    #[test]
    fn test_mismatched_file_type_changes_nothing() {
        let Some(mut voxray) = gpu_renderer() else {
            return;
        };
        assert_eq!(voxray.manager.current_type(), StructureType::Grid);

        let loader = Arc::new(CountingLoader::default());
        let valid = ValidStructures::from_extensions(&["scene.voxoctree"]);
        voxray
            .manager
            .load_file(PathBuf::from("scene.voxoctree"), valid, loader.clone());

        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(voxray.manager.current_type(), StructureType::Grid);
        assert_eq!(voxray.manager.valid_structures(), ValidStructures::all());
        assert!(!voxray.manager.is_loading());
        assert!(!voxray.manager.is_generating());
        assert_eq!(voxray.manager.status(), "Idle");
        voxray.shutdown();
    }

    #[test]
    fn test_type_switch_then_build_to_ready() {
        let Some(mut voxray) = gpu_renderer() else {
            return;
        };
        let camera = look_at(Vec3::new(-4.0, 12.0, -4.0), Vec3::splat(4.0));

        voxray.manager.set_type(StructureType::Octree);
        assert_eq!(voxray.manager.current_type(), StructureType::Octree);
        assert_eq!(
            voxray.manager.structure().map(|s| s.structure_type()),
            Some(StructureType::Octree)
        );
        assert!(voxray.manager.registry().has_module("as/octree_as"));
        assert!(!voxray.manager.registry().has_module("as/grid_as"));

        voxray.load(scene());
        assert!(voxray.manager.is_generating());
        assert!(!voxray.manager.finished_generation());

        let deadline = Instant::now() + Duration::from_secs(30);
        while !voxray.manager.finished_generation() && Instant::now() < deadline {
            voxray.render_frame(&camera, 0.016);
        }

        assert!(voxray.manager.finished_generation());
        assert!(!voxray.manager.is_generating());
        assert!(voxray.manager.registry().has_macro(macros::GENERATION_FINISHED));
        assert_eq!(voxray.manager.voxel_count(), 8);
        assert!(voxray.manager.memory_usage() > 0);
        assert_eq!(voxray.manager.status(), "Idle");

        voxray.load(scene());
        assert!(!voxray.manager.finished_generation());
        assert!(!voxray.manager.registry().has_macro(macros::GENERATION_FINISHED));
        voxray.shutdown();
    }

    #[test]
    fn test_bytes_per_voxel() {
        assert_eq!(bytes_per_voxel(1024, 0), 0.0);
        assert_eq!(bytes_per_voxel(1024, 256), 4.0);
    }

    #[test]
    fn test_render_style_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            style: RenderStyle,
        }
        let parsed: Wrapper = toml::from_str("style = \"cycles\"").unwrap();
        assert_eq!(parsed.style, RenderStyle::Cycles);
        assert_eq!(RenderStyle::default(), RenderStyle::Normal);
    }
}
