//! Brickmap structure
//!
//! Main render marches the brickgrid and appends brickgrid slots it finds
//! unloaded to a request buffer `[count, slots...]`. A second pass then
//! hands each requested slot a spare brickmap from the free list
//! `[free_count, indices...]`, or marks it empty once the list runs dry.

use std::path::PathBuf;
use std::sync::Arc;

use glam::{UVec2, UVec3};

use super::common::{
    dispatch_rays, storage_entry, BufferSet, PipelineLayouts, PipelineSlot, StructureContext,
    StructureCore, StructureInitInfo,
};
use super::push_constants::{brickmap_constants, BrickmapPushConstants};
use crate::camera::CameraData;
use crate::error::VoxrayResult;
use crate::generation::{build_brickmap, Brickmap, BrickmapPayload};
use crate::gpu::{empty_storage_buffer, upload_storage_buffer};
use crate::source::{SceneLoader, SharedSource};

const RENDER_MODULE: &str = "as/brickmap_as";
const REQUEST_MODULE: &str = "as/brickmap_as_req";
const REQUEST_WORKGROUP: u32 = 32;

/// Brickmap buffer capacity for `used` bricks.
pub fn brickmap_capacity(used: usize) -> usize {
    used.max(1).next_power_of_two()
}

/// Free list over the spare slots `used..capacity`.
pub fn free_brick_list(used: usize, capacity: usize) -> Vec<u32> {
    let mut list = Vec::with_capacity(capacity - used + 1);
    list.push((capacity - used) as u32);
    list.extend((used..capacity).map(|i| i as u32));
    list
}

pub fn request_workgroups(slots: u32) -> u32 {
    slots.div_ceil(REQUEST_WORKGROUP)
}

pub struct BrickmapStructure {
    core: StructureCore<BrickmapPayload>,
    device: Arc<wgpu::Device>,
    set_layout: wgpu::BindGroupLayout,
    free_layout: wgpu::BindGroupLayout,
    request_pipeline: PipelineSlot,
    request_slots: u32,
    hit_data_address: u64,
    buffers: Option<BufferSet>,
    free_bricks: Option<BufferSet>,
    brickgrid_size: UVec3,
}

impl BrickmapStructure {
    pub fn init(info: &StructureInitInfo, ctx: &mut StructureContext) -> VoxrayResult<Self> {
        let device = info.gpu.device.clone();
        let set_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Brickmap Set Layout"),
            entries: &[
                storage_entry(0, false),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });
        let free_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Brickmap Free Set Layout"),
            entries: &[storage_entry(0, false)],
        });

        let layouts = PipelineLayouts::new(
            &device,
            "Brickmap",
            &info.ray_set_layout,
            &set_layout,
            std::mem::size_of::<BrickmapPushConstants>() as u32,
        );
        let request_layouts = PipelineLayouts::single(device.create_pipeline_layout(
            &wgpu::PipelineLayoutDescriptor {
                label: Some("Brickmap Request pipeline layout"),
                bind_group_layouts: &[&set_layout, &free_layout],
                push_constant_ranges: &[],
            },
        ));

        let mut core = StructureCore::new("Brickmap");
        core.init_render_module(ctx, &device, RENDER_MODULE, layouts)?;
        let request_pipeline = PipelineSlot::default();
        core.add_module(ctx, &device, REQUEST_MODULE, request_layouts, request_pipeline.clone())?;

        Ok(Self {
            core,
            device,
            set_layout,
            free_layout,
            request_pipeline,
            request_slots: info.brickmap_request_slots,
            hit_data_address: info.hit_data_address,
            buffers: None,
            free_bricks: None,
            brickgrid_size: UVec3::ZERO,
        })
    }

    pub fn core(&self) -> &StructureCore<BrickmapPayload> {
        &self.core
    }

    pub fn from_source(&mut self, ctx: &mut StructureContext, source: SharedSource) {
        self.core.launch(ctx, source, build_brickmap);
    }

    pub fn from_file(
        &mut self,
        ctx: &mut StructureContext,
        path: PathBuf,
        loader: Arc<dyn SceneLoader>,
    ) {
        self.core.launch_file(ctx, path, loader, build_brickmap);
    }

    pub fn update(&mut self, ctx: &mut StructureContext, _dt: f32) {
        let Some(payload) = self.core.poll() else {
            return;
        };

        self.buffers = None;
        self.free_bricks = None;
        self.core.enter_ready(ctx);

        let used = payload.brickmaps.len();
        let capacity = brickmap_capacity(used);
        let mut brickmaps = payload.brickmaps;
        brickmaps.resize(capacity, Brickmap::default());

        let brickgrid = upload_storage_buffer(
            ctx.staging,
            "Brickgrid",
            bytemuck::cast_slice(&payload.brickgrid).to_vec(),
            wgpu::BufferUsages::empty(),
        );
        let brickmap_buffer = upload_storage_buffer(
            ctx.staging,
            "Brickmaps",
            bytemuck::cast_slice(&brickmaps).to_vec(),
            wgpu::BufferUsages::empty(),
        );
        let colours = upload_storage_buffer(
            ctx.staging,
            "Brickmap Colours",
            bytemuck::cast_slice(&payload.colours).to_vec(),
            wgpu::BufferUsages::empty(),
        );
        let requests = empty_storage_buffer(
            &self.device,
            "Brick Requests",
            (self.request_slots as u64 + 1) * 4,
            wgpu::BufferUsages::empty(),
        );
        let free = upload_storage_buffer(
            ctx.staging,
            "Free Bricks",
            bytemuck::cast_slice(&free_brick_list(used, capacity)).to_vec(),
            wgpu::BufferUsages::empty(),
        );

        self.buffers = Some(BufferSet::new(
            &self.device,
            "Brickmap Set",
            &self.set_layout,
            vec![brickgrid, brickmap_buffer, colours, requests],
        ));
        self.free_bricks = Some(BufferSet::new(
            &self.device,
            "Brickmap Free Set",
            &self.free_layout,
            vec![free],
        ));
        self.brickgrid_size = payload.brickgrid_size;
        log::debug!(
            "[Brickmap] {} of {} brickmap slots in use",
            used,
            capacity
        );
        self.core.finish();
    }

    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        camera: &CameraData,
        ray_set: &wgpu::BindGroup,
        image_size: UVec2,
    ) {
        let requests = self.buffers.as_ref().and_then(|b| b.buffer(3));
        if let Some(requests) = requests {
            encoder.clear_buffer(requests, 0, Some(4));
        }

        let constants =
            brickmap_constants(camera.position, self.brickgrid_size, self.hit_data_address);
        let rendered = dispatch_rays(
            encoder,
            "Brickmap Render",
            &self.core.render_pipeline,
            ray_set,
            self.buffers.as_ref().map(|b| &b.bind_group),
            bytemuck::bytes_of(&constants),
            image_size,
        );

        if rendered && self.core.finished_generation() {
            self.dispatch_requests(encoder);
        }
    }

    fn dispatch_requests(&self, encoder: &mut wgpu::CommandEncoder) {
        let (Some(buffers), Some(free)) = (&self.buffers, &self.free_bricks) else {
            return;
        };
        let guard = self.request_pipeline.lock();
        let Some(built) = guard.as_ref() else {
            return;
        };

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Brickmap Requests"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&built.pipeline);
        pass.set_bind_group(0, &buffers.bind_group, &[]);
        pass.set_bind_group(1, &free.bind_group, &[]);
        pass.dispatch_workgroups(request_workgroups(self.request_slots), 1, 1);
    }

    pub fn memory_usage(&self) -> u64 {
        self.buffers.as_ref().map_or(0, BufferSet::byte_size)
            + self.free_bricks.as_ref().map_or(0, BufferSet::byte_size)
    }

    pub fn destroy(&mut self, ctx: &mut StructureContext) {
        self.buffers = None;
        self.free_bricks = None;
        self.request_pipeline.lock().take();
        self.core.destroy(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(brickmap_capacity(0), 1);
        assert_eq!(brickmap_capacity(1), 1);
        assert_eq!(brickmap_capacity(5), 8);
        assert_eq!(brickmap_capacity(64), 64);
    }

    #[test]
    fn test_free_list_covers_spare_slots() {
        assert_eq!(free_brick_list(5, 8), vec![3, 5, 6, 7]);
        assert_eq!(free_brick_list(4, 4), vec![0]);
    }

    #[test]
    fn test_request_workgroups() {
        assert_eq!(request_workgroups(1024), 32);
        assert_eq!(request_workgroups(33), 2);
        assert_eq!(request_workgroups(0), 0);
    }
}
