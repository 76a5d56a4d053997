//! Lifecycle shared by every acceleration structure
//!
//! A structure owns one [`StructureCore`]: the builder task, the render
//! pipeline slot and the flags the manager reports. The concrete structure
//! owns its GPU buffers and bind group and decides what to upload.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::UVec2;
use parking_lot::Mutex;

use crate::constants::{macros, WORKGROUP_SIZE};
use crate::error::VoxrayResult;
use crate::generation::{BuildError, BuildPoll, BuildTask, GenerationInfo, StopToken};
use crate::gpu::{GpuContext, StagingBackend, StagingCommit, WgpuStagingBackend, PUSH_CONSTANT_BYTES};
use crate::shader::{PipelineHook, ShaderCompiler, ShaderRegistry, WgpuShaderCompiler};
use crate::source::{SceneLoader, SharedSource, VoxelSource};

/// Captured once at manager init and handed to every structure.
#[derive(Clone)]
pub struct StructureInitInfo {
    pub gpu: GpuContext,
    /// Layout of the external ray image set bound at group 0.
    pub ray_set_layout: Arc<wgpu::BindGroupLayout>,
    /// Device address of the hit buffer, 0 when unavailable.
    pub hit_data_address: u64,
    /// Capacity of the brickmap request feedback buffer.
    pub brickmap_request_slots: u32,
}

/// Services a structure borrows from the manager for one call.
pub struct StructureContext<'a, C = WgpuShaderCompiler, B = WgpuStagingBackend>
where
    C: ShaderCompiler,
    B: StagingBackend,
{
    pub registry: &'a mut ShaderRegistry<C>,
    pub staging: &'a mut StagingCommit<B>,
}

/// A compiled pipeline and whether its layout includes the structure set.
pub struct BuiltPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub with_structure_set: bool,
}

pub type PipelineSlot = Arc<Mutex<Option<BuiltPipeline>>>;

/// Workgroups covering `image_size` with 8x8 tiles.
pub fn dispatch_size(image_size: UVec2) -> (u32, u32) {
    (
        image_size.x.div_ceil(WORKGROUP_SIZE),
        image_size.y.div_ceil(WORKGROUP_SIZE),
    )
}

pub fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn buffer_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

/// Pipeline layouts for the two states of a structure: before a payload
/// exists only the ray set is bound, afterwards the structure set too.
#[derive(Clone)]
pub struct PipelineLayouts {
    pub waiting: Arc<wgpu::PipelineLayout>,
    pub ready: Arc<wgpu::PipelineLayout>,
}

impl PipelineLayouts {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        ray_set: &wgpu::BindGroupLayout,
        structure_set: &wgpu::BindGroupLayout,
        push_constant_size: u32,
    ) -> Self {
        debug_assert!(push_constant_size <= PUSH_CONSTANT_BYTES);
        let push_constant_ranges = [wgpu::PushConstantRange {
            stages: wgpu::ShaderStages::COMPUTE,
            range: 0..push_constant_size,
        }];

        let waiting = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} waiting pipeline layout", label)),
            bind_group_layouts: &[ray_set],
            push_constant_ranges: &push_constant_ranges,
        });
        let ready = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} render pipeline layout", label)),
            bind_group_layouts: &[ray_set, structure_set],
            push_constant_ranges: &push_constant_ranges,
        });

        Self {
            waiting: Arc::new(waiting),
            ready: Arc::new(ready),
        }
    }

    /// Same layout in both states.
    pub fn single(layout: wgpu::PipelineLayout) -> Self {
        let layout = Arc::new(layout);
        Self {
            waiting: layout.clone(),
            ready: layout,
        }
    }
}

/// Storage buffers bound in order at bindings `0..n` of one bind group.
pub struct BufferSet {
    buffers: Vec<Arc<wgpu::Buffer>>,
    pub bind_group: wgpu::BindGroup,
}

impl BufferSet {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        buffers: Vec<Arc<wgpu::Buffer>>,
    ) -> Self {
        let entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| buffer_entry(binding as u32, buffer))
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        });
        Self {
            buffers,
            bind_group,
        }
    }

    pub fn buffer(&self, binding: usize) -> Option<&Arc<wgpu::Buffer>> {
        self.buffers.get(binding)
    }

    pub fn byte_size(&self) -> u64 {
        self.buffers.iter().map(|b| b.size()).sum()
    }
}

/// Record one 8x8-tiled ray dispatch. Skips the pass when the pipeline is
/// missing or expects a structure set that does not exist yet.
pub fn dispatch_rays(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    slot: &PipelineSlot,
    ray_set: &wgpu::BindGroup,
    structure_set: Option<&wgpu::BindGroup>,
    push_constants: &[u8],
    image_size: UVec2,
) -> bool {
    let guard = slot.lock();
    let Some(built) = guard.as_ref() else {
        return false;
    };
    let structure_set = match (built.with_structure_set, structure_set) {
        (true, None) => return false,
        (true, set) => set,
        (false, _) => None,
    };

    let (x, y) = dispatch_size(image_size);
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(&built.pipeline);
    pass.set_bind_group(0, ray_set, &[]);
    if let Some(set) = structure_set {
        pass.set_bind_group(1, set, &[]);
    }
    pass.set_push_constants(0, push_constants);
    pass.dispatch_workgroups(x, y, 1);
    true
}

/// Rebuilds one compute pipeline whenever its module is (re)compiled.
pub struct ComputePipelineHook {
    device: Arc<wgpu::Device>,
    label: String,
    layouts: PipelineLayouts,
    ready: Arc<AtomicBool>,
    slot: PipelineSlot,
}

impl ComputePipelineHook {
    pub fn new(
        device: Arc<wgpu::Device>,
        label: impl Into<String>,
        layouts: PipelineLayouts,
        ready: Arc<AtomicBool>,
        slot: PipelineSlot,
    ) -> Self {
        Self {
            device,
            label: label.into(),
            layouts,
            ready,
            slot,
        }
    }
}

impl PipelineHook<wgpu::ShaderModule> for ComputePipelineHook {
    fn create(&mut self, module: &wgpu::ShaderModule) {
        let with_structure_set = self.ready.load(Ordering::Acquire);
        let layout = if with_structure_set {
            &self.layouts.ready
        } else {
            &self.layouts.waiting
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&self.label),
                layout: Some(layout),
                module,
                entry_point: "main",
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("[Pipeline] {} creation failed: {}", self.label, error);
            return;
        }
        *self.slot.lock() = Some(BuiltPipeline {
            pipeline,
            with_structure_set,
        });
    }

    fn destroy(&mut self) {
        self.slot.lock().take();
    }
}

/// Builder task, readiness flags and render pipeline of one structure.
pub struct StructureCore<P> {
    pub name: &'static str,
    modules: Vec<&'static str>,
    task: BuildTask<P>,
    generating: bool,
    loading: Arc<AtomicBool>,
    finished: bool,
    ready: Arc<AtomicBool>,
    pub render_pipeline: PipelineSlot,
}

impl<P: Send + 'static> StructureCore<P> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            modules: Vec::new(),
            task: BuildTask::new(name),
            generating: false,
            loading: Arc::new(AtomicBool::new(false)),
            finished: false,
            ready: Arc::new(AtomicBool::new(false)),
            render_pipeline: PipelineSlot::default(),
        }
    }

    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    /// Register `module` with the hook that owns its pipelines.
    pub fn add_hook<C, B>(
        &mut self,
        ctx: &mut StructureContext<'_, C, B>,
        module: &'static str,
        hook: Box<dyn PipelineHook<C::Module>>,
    ) -> VoxrayResult<()>
    where
        C: ShaderCompiler,
        B: StagingBackend,
    {
        ctx.registry.add_module(module, hook)?;
        self.modules.push(module);
        Ok(())
    }

    /// Register `module`, whose pipeline lands in `slot`.
    pub fn add_module(
        &mut self,
        ctx: &mut StructureContext,
        device: &Arc<wgpu::Device>,
        module: &'static str,
        layouts: PipelineLayouts,
        slot: PipelineSlot,
    ) -> VoxrayResult<()> {
        let hook = ComputePipelineHook::new(
            device.clone(),
            format!("{} pipeline", module),
            layouts,
            self.ready.clone(),
            slot,
        );
        self.add_hook(ctx, module, Box::new(hook))
    }

    /// Register the render module with `GENERATION_FINISHED` removed.
    pub fn init_render_module(
        &mut self,
        ctx: &mut StructureContext,
        device: &Arc<wgpu::Device>,
        module: &'static str,
        layouts: PipelineLayouts,
    ) -> VoxrayResult<()> {
        ctx.registry.remove_macro(macros::GENERATION_FINISHED);
        let slot = self.render_pipeline.clone();
        self.add_module(ctx, device, module, layouts, slot)
    }

    pub fn modules(&self) -> &[&'static str] {
        &self.modules
    }

    /// Rebuild every registered module with the current macros.
    pub fn update_shaders<C, B>(&self, ctx: &mut StructureContext<'_, C, B>)
    where
        C: ShaderCompiler,
        B: StagingBackend,
    {
        for module in &self.modules {
            if let Err(e) = ctx.registry.module_updated(module) {
                log::error!("[{}] {}", self.name, e);
            }
        }
    }

    fn reset<C, B>(&mut self, ctx: &mut StructureContext<'_, C, B>)
    where
        C: ShaderCompiler,
        B: StagingBackend,
    {
        self.finished = false;
        self.ready.store(false, Ordering::Release);
        ctx.registry.remove_macro(macros::GENERATION_FINISHED);
        self.update_shaders(ctx);
    }

    /// Cancel any running build and start `build` over `source`.
    pub fn launch<C, B, F>(
        &mut self,
        ctx: &mut StructureContext<'_, C, B>,
        source: SharedSource,
        build: F,
    ) where
        C: ShaderCompiler,
        B: StagingBackend,
        F: FnOnce(&dyn VoxelSource, &GenerationInfo, &StopToken) -> Result<P, BuildError>
            + Send
            + 'static,
    {
        self.reset(ctx);
        self.loading.store(false, Ordering::Release);
        self.task
            .launch(move |info, stop| build(source.as_ref(), info, stop));
        self.generating = true;
        log::info!("[{}] Generation started", self.name);
    }

    /// Load `path` through `loader` on the builder thread, then build.
    pub fn launch_file<C, B, F>(
        &mut self,
        ctx: &mut StructureContext<'_, C, B>,
        path: PathBuf,
        loader: Arc<dyn SceneLoader>,
        build: F,
    ) where
        C: ShaderCompiler,
        B: StagingBackend,
        F: FnOnce(&dyn VoxelSource, &GenerationInfo, &StopToken) -> Result<P, BuildError>
            + Send
            + 'static,
    {
        self.reset(ctx);
        let loading = self.loading.clone();
        loading.store(true, Ordering::Release);
        let name = self.name;

        self.task.launch(move |info, stop| {
            let loaded = loader.load(&path);
            loading.store(false, Ordering::Release);
            let source = loaded.map_err(|e| BuildError::Structural {
                structure: name,
                reason: format!("loading {}: {}", path.display(), e),
            })?;
            stop.check()?;
            build(source.as_ref(), info, stop)
        });
        self.generating = true;
        log::info!("[{}] Loading started", self.name);
    }

    /// The latest build's payload, once it has finished.
    pub fn poll(&mut self) -> Option<P> {
        match self.task.poll() {
            BuildPoll::Finished(payload) => Some(payload),
            BuildPoll::Failed => {
                self.generating = false;
                self.loading.store(false, Ordering::Release);
                None
            }
            BuildPoll::Idle | BuildPoll::Running => None,
        }
    }

    /// Define `GENERATION_FINISHED` and rebuild pipelines against the
    /// structure set layout. Call after the old buffers are freed.
    pub fn enter_ready<C, B>(&mut self, ctx: &mut StructureContext<'_, C, B>)
    where
        C: ShaderCompiler,
        B: StagingBackend,
    {
        self.ready.store(true, Ordering::Release);
        ctx.registry.define_macro(macros::GENERATION_FINISHED);
        self.update_shaders(ctx);
    }

    /// Mark the uploaded payload as live.
    pub fn finish(&mut self) {
        self.finished = true;
        self.generating = false;
        log::info!(
            "[{}] Ready: {} voxels, {} nodes",
            self.name,
            self.voxel_count(),
            self.node_count()
        );
    }

    pub fn cancel(&mut self) {
        self.task.cancel();
        self.generating = false;
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn finished_generation(&self) -> bool {
        self.finished
    }

    pub fn info(&self) -> &Arc<GenerationInfo> {
        self.task.info()
    }

    pub fn completion(&self) -> f32 {
        self.info().completion()
    }

    pub fn generation_time(&self) -> f32 {
        self.info().elapsed_seconds()
    }

    pub fn voxel_count(&self) -> u64 {
        self.info().voxel_count()
    }

    pub fn node_count(&self) -> u64 {
        self.info().node_count()
    }

    /// Destroy pipelines and forget the modules.
    pub fn destroy<C, B>(&mut self, ctx: &mut StructureContext<'_, C, B>)
    where
        C: ShaderCompiler,
        B: StagingBackend,
    {
        self.cancel();
        for module in self.modules.drain(..) {
            ctx.registry.remove_module(module);
        }
        self.render_pipeline.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    use glam::{UVec3, Vec3};

    use crate::error::VoxrayError;
    use crate::gpu::staging::tests::MemoryBackend;
    use crate::shader::shader_registry::tests::{FakeCompiler, LogHook};
    use crate::source::DenseSource;

    const MODULE: &str = "as/test_as";

    struct Services {
        registry: ShaderRegistry<FakeCompiler>,
        staging: StagingCommit<MemoryBackend>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Services {
        fn new() -> Self {
            Self {
                registry: ShaderRegistry::new(FakeCompiler::default().with_module(MODULE, &["common"])),
                staging: StagingCommit::new(MemoryBackend::default()),
                log: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn ctx(&mut self) -> StructureContext<'_, FakeCompiler, MemoryBackend> {
            StructureContext {
                registry: &mut self.registry,
                staging: &mut self.staging,
            }
        }

        fn last_event(&self) -> String {
            self.log.borrow().last().cloned().unwrap_or_default()
        }
    }

    fn core_with_module(services: &mut Services) -> StructureCore<u64> {
        let mut core = StructureCore::new("Test");
        let hook = Box::new(LogHook {
            log: services.log.clone(),
        });
        core.add_hook(&mut services.ctx(), MODULE, hook).unwrap();
        core
    }

    fn source() -> SharedSource {
        let mut source = DenseSource::new(UVec3::splat(2));
        source.set(UVec3::ZERO, Some(Vec3::ONE));
        Arc::new(source)
    }

    fn count_voxels(source: &dyn VoxelSource, info: &GenerationInfo, _: &StopToken) -> Result<u64, BuildError> {
        let count = (0..8).filter(|&code| source.sample_morton(code).is_some()).count() as u64;
        info.set_voxel_count(count);
        Ok(count)
    }

    fn wait_for_payload<P: Send + 'static>(core: &mut StructureCore<P>) -> Option<P> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(payload) = core.poll() {
                return Some(payload);
            }
            if !core.is_generating() {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        None
    }

    struct FailingLoader;

    impl SceneLoader for FailingLoader {
        fn load(&self, path: &Path) -> VoxrayResult<SharedSource> {
            Err(VoxrayError::IoError {
                path: path.display().to_string(),
                error: "no such scene".to_string(),
            })
        }
    }

    #[test]
    fn test_build_to_ready_lifecycle() {
        let mut services = Services::new();
        let mut core = core_with_module(&mut services);
        assert_eq!(core.modules(), &[MODULE]);
        assert_eq!(services.last_event(), format!("create {}", MODULE));

        core.launch(&mut services.ctx(), source(), count_voxels);
        assert!(core.is_generating());
        assert!(!core.is_ready());
        assert!(!core.finished_generation());

        let payload = wait_for_payload(&mut core);
        assert_eq!(payload, Some(1));

        core.enter_ready(&mut services.ctx());
        assert!(core.is_ready());
        assert!(services.registry.has_macro(macros::GENERATION_FINISHED));
        assert_eq!(services.last_event(), format!("create {}+ready", MODULE));

        core.finish();
        assert!(!core.is_generating());
        assert!(core.finished_generation());
        assert_eq!(core.voxel_count(), 1);
    }

    #[test]
    fn test_new_source_leaves_ready_state() {
        let mut services = Services::new();
        let mut core = core_with_module(&mut services);

        core.launch(&mut services.ctx(), source(), count_voxels);
        wait_for_payload(&mut core).unwrap();
        core.enter_ready(&mut services.ctx());
        core.finish();

        core.launch(&mut services.ctx(), source(), count_voxels);
        assert!(!core.is_ready());
        assert!(!core.finished_generation());
        assert!(core.is_generating());
        assert!(!services.registry.has_macro(macros::GENERATION_FINISHED));
        assert_eq!(services.last_event(), format!("create {}", MODULE));
    }

    #[test]
    fn test_structural_failure_clears_generating() {
        let mut services = Services::new();
        let mut core = core_with_module(&mut services);

        core.launch(&mut services.ctx(), source(), |_, _, _| {
            Err(BuildError::Structural {
                structure: "Test",
                reason: "too large".to_string(),
            })
        });
        assert_eq!(wait_for_payload(&mut core), None);
        assert!(!core.is_generating());
        assert!(!core.is_ready());
        assert!(!core.finished_generation());
    }

    #[test]
    fn test_failed_scene_load_clears_loading() {
        let mut services = Services::new();
        let mut core = core_with_module(&mut services);

        core.launch_file(
            &mut services.ctx(),
            PathBuf::from("missing.voxoctree"),
            Arc::new(FailingLoader),
            count_voxels,
        );
        assert!(core.is_generating());
        assert_eq!(wait_for_payload(&mut core), None);
        assert!(!core.is_generating());
        assert!(!core.is_loading());
    }

    #[test]
    fn test_destroy_removes_modules() {
        let mut services = Services::new();
        let mut core = core_with_module(&mut services);
        core.launch(&mut services.ctx(), source(), count_voxels);

        core.destroy(&mut services.ctx());
        assert!(!services.registry.has_module(MODULE));
        assert!(core.modules().is_empty());
        assert!(!core.is_generating());
        assert_eq!(services.last_event(), "destroy");
        assert!(services.staging.backend().log.borrow().is_empty());
    }

    #[test]
    fn test_dispatch_rounds_up() {
        assert_eq!(dispatch_size(UVec2::new(1920, 1080)), (240, 135));
        assert_eq!(dispatch_size(UVec2::new(1, 9)), (1, 2));
        assert_eq!(dispatch_size(UVec2::ZERO), (0, 0));
    }
}
