//! 64-tree structure: 128-bit nodes, 4x4x4 children per inner node

use std::path::PathBuf;
use std::sync::Arc;

use glam::{UVec2, UVec3};

use super::common::{
    dispatch_rays, storage_entry, BufferSet, PipelineLayouts, StructureContext, StructureCore,
    StructureInitInfo,
};
use super::push_constants::{tree_constants, TreePushConstants};
use crate::camera::CameraData;
use crate::error::VoxrayResult;
use crate::generation::{build_contree, ContreePayload};
use crate::gpu::upload_storage_buffer;
use crate::source::{SceneLoader, SharedSource};

const RENDER_MODULE: &str = "as/contree_as";

pub struct ContreeStructure {
    core: StructureCore<ContreePayload>,
    device: Arc<wgpu::Device>,
    set_layout: wgpu::BindGroupLayout,
    buffers: Option<BufferSet>,
    dimensions: UVec3,
}

impl ContreeStructure {
    pub fn init(info: &StructureInitInfo, ctx: &mut StructureContext) -> VoxrayResult<Self> {
        let device = info.gpu.device.clone();
        let set_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Contree Set Layout"),
            entries: &[storage_entry(0, true)],
        });
        let layouts = PipelineLayouts::new(
            &device,
            "Contree",
            &info.ray_set_layout,
            &set_layout,
            std::mem::size_of::<TreePushConstants>() as u32,
        );

        let mut core = StructureCore::new("Contree");
        core.init_render_module(ctx, &device, RENDER_MODULE, layouts)?;

        Ok(Self {
            core,
            device,
            set_layout,
            buffers: None,
            dimensions: UVec3::ZERO,
        })
    }

    pub fn core(&self) -> &StructureCore<ContreePayload> {
        &self.core
    }

    pub fn from_source(&mut self, ctx: &mut StructureContext, source: SharedSource) {
        self.core.launch(ctx, source, build_contree);
    }

    pub fn from_file(
        &mut self,
        ctx: &mut StructureContext,
        path: PathBuf,
        loader: Arc<dyn SceneLoader>,
    ) {
        self.core.launch_file(ctx, path, loader, build_contree);
    }

    pub fn update(&mut self, ctx: &mut StructureContext, _dt: f32) {
        let Some(payload) = self.core.poll() else {
            return;
        };

        self.buffers = None;
        self.core.enter_ready(ctx);

        let nodes = upload_storage_buffer(
            ctx.staging,
            "Contree Nodes",
            bytemuck::cast_slice(&payload.nodes).to_vec(),
            wgpu::BufferUsages::empty(),
        );
        self.buffers = Some(BufferSet::new(
            &self.device,
            "Contree Set",
            &self.set_layout,
            vec![nodes],
        ));
        self.dimensions = payload.dimensions;
        self.core.finish();
    }

    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        camera: &CameraData,
        ray_set: &wgpu::BindGroup,
        image_size: UVec2,
    ) {
        let constants = tree_constants(camera.position, self.dimensions);
        dispatch_rays(
            encoder,
            "Contree Render",
            &self.core.render_pipeline,
            ray_set,
            self.buffers.as_ref().map(|b| &b.bind_group),
            bytemuck::bytes_of(&constants),
            image_size,
        );
    }

    pub fn memory_usage(&self) -> u64 {
        self.buffers.as_ref().map_or(0, BufferSet::byte_size)
    }

    pub fn destroy(&mut self, ctx: &mut StructureContext) {
        self.buffers = None;
        self.core.destroy(ctx);
    }
}
