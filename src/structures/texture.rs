//! 3-D texture structure: one BGRA texel per voxel, alpha marks presence

use std::path::PathBuf;
use std::sync::Arc;

use glam::{UVec2, UVec3};

use super::common::{dispatch_rays, PipelineLayouts, StructureContext, StructureCore, StructureInitInfo};
use super::push_constants::{volume_constants, VolumePushConstants};
use crate::camera::CameraData;
use crate::error::VoxrayResult;
use crate::generation::{build_texture, TexturePayload};
use crate::gpu::StagingEncoder;
use crate::source::{SceneLoader, SharedSource};

const RENDER_MODULE: &str = "as/texture_as";

/// Copy texels into rows padded to `COPY_BYTES_PER_ROW_ALIGNMENT`.
pub fn padded_texels(payload: &TexturePayload) -> (Vec<u8>, u32) {
    let d = payload.dimensions;
    let row_bytes = d.x as usize * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
    let padded_row = row_bytes.div_ceil(align) * align;

    let rows = (d.y * d.z) as usize;
    let mut bytes = vec![0u8; padded_row * rows];
    let texels: &[u8] = bytemuck::cast_slice(&payload.texels);
    for row in 0..rows {
        let src = &texels[row * row_bytes..(row + 1) * row_bytes];
        bytes[row * padded_row..row * padded_row + row_bytes].copy_from_slice(src);
    }
    (bytes, padded_row as u32)
}

struct TextureResources {
    _texture: Arc<wgpu::Texture>,
    bind_group: wgpu::BindGroup,
    bytes: u64,
}

pub struct TextureStructure {
    core: StructureCore<TexturePayload>,
    device: Arc<wgpu::Device>,
    set_layout: wgpu::BindGroupLayout,
    resources: Option<TextureResources>,
    dimensions: UVec3,
}

impl TextureStructure {
    pub fn init(info: &StructureInitInfo, ctx: &mut StructureContext) -> VoxrayResult<Self> {
        let device = info.gpu.device.clone();
        let set_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Texture Set Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D3,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let layouts = PipelineLayouts::new(
            &device,
            "Texture",
            &info.ray_set_layout,
            &set_layout,
            std::mem::size_of::<VolumePushConstants>() as u32,
        );

        let mut core = StructureCore::new("Texture");
        core.init_render_module(ctx, &device, RENDER_MODULE, layouts)?;

        Ok(Self {
            core,
            device,
            set_layout,
            resources: None,
            dimensions: UVec3::ZERO,
        })
    }

    pub fn core(&self) -> &StructureCore<TexturePayload> {
        &self.core
    }

    pub fn from_source(&mut self, ctx: &mut StructureContext, source: SharedSource) {
        self.core.launch(ctx, source, build_texture);
    }

    pub fn from_file(
        &mut self,
        ctx: &mut StructureContext,
        path: PathBuf,
        loader: Arc<dyn SceneLoader>,
    ) {
        self.core.launch_file(ctx, path, loader, build_texture);
    }

    pub fn update(&mut self, ctx: &mut StructureContext, _dt: f32) {
        let Some(payload) = self.core.poll() else {
            return;
        };

        self.resources = None;
        self.core.enter_ready(ctx);

        let d = payload.dimensions.max(UVec3::ONE);
        let size = wgpu::Extent3d {
            width: d.x,
            height: d.y,
            depth_or_array_layers: d.z,
        };
        let texture = Arc::new(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Texture Volume"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: wgpu::TextureFormat::Bgra8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        }));

        if !payload.texels.is_empty() {
            let (bytes, bytes_per_row) = padded_texels(&payload);
            let handle = ctx
                .staging
                .enqueue_staging(bytes.len() as u64, move |dst| dst[..bytes.len()].copy_from_slice(&bytes));
            let dst = texture.clone();
            ctx.staging
                .enqueue_eval(handle, move |encoder: &mut StagingEncoder, slice| {
                    encoder.copy_to_texture(slice, &dst, bytes_per_row, size);
                });
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Texture Set"),
            layout: &self.set_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            }],
        });

        self.resources = Some(TextureResources {
            _texture: texture,
            bind_group,
            bytes: payload.byte_size(),
        });
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
        let constants = volume_constants(camera.position, self.dimensions);
        dispatch_rays(
            encoder,
            "Texture Render",
            &self.core.render_pipeline,
            ray_set,
            self.resources.as_ref().map(|r| &r.bind_group),
            bytemuck::bytes_of(&constants),
            image_size,
        );
    }

    pub fn memory_usage(&self) -> u64 {
        self.resources.as_ref().map_or(0, |r| r.bytes)
    }

    pub fn destroy(&mut self, ctx: &mut StructureContext) {
        self.resources = None;
        self.core.destroy(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_padded_and_preserved() {
        let dims = UVec3::new(3, 2, 2);
        let texels: Vec<[u8; 4]> = (0..12u8).map(|i| [i, i, i, 255]).collect();
        let payload = TexturePayload {
            dimensions: dims,
            texels,
        };

        let (bytes, bytes_per_row) = padded_texels(&payload);
        assert_eq!(bytes_per_row, 256);
        assert_eq!(bytes.len(), 256 * 4);
        // Row 3 is (y=1, z=1) and starts with texel 9.
        assert_eq!(&bytes[3 * 256..3 * 256 + 4], &[9, 9, 9, 255]);
        assert!(bytes[12..256].iter().all(|b| *b == 0));
    }
}
