//! wgpu staging backend and device-local upload helpers

use std::sync::Arc;

use super::error_recovery::{GpuErrorRecovery, GpuRecoveryError};
use super::staging::{StagingBackend, StagingCommit, StagingSlice, STAGING_ALIGNMENT};

pub type WgpuStaging = StagingCommit<WgpuStagingBackend>;

/// Command encoder plus the buffer its copies read from.
pub struct StagingEncoder {
    pub encoder: wgpu::CommandEncoder,
    pub staging: Arc<wgpu::Buffer>,
}

impl StagingEncoder {
    pub fn copy_to_buffer(&mut self, slice: StagingSlice, dst: &wgpu::Buffer, dst_offset: u64) {
        self.encoder
            .copy_buffer_to_buffer(&self.staging, slice.offset, dst, dst_offset, slice.size);
    }

    /// Copy a tightly padded 3-D image. Rows must be `bytes_per_row` apart.
    pub fn copy_to_texture(
        &mut self,
        slice: StagingSlice,
        dst: &wgpu::Texture,
        bytes_per_row: u32,
        size: wgpu::Extent3d,
    ) {
        self.encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &self.staging,
                layout: wgpu::ImageDataLayout {
                    offset: slice.offset,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(size.height),
                },
            },
            dst.as_image_copy(),
            size,
        );
    }
}

pub struct WgpuStagingBackend {
    recovery: Arc<GpuErrorRecovery>,
    buffer: Option<Arc<wgpu::Buffer>>,
}

impl WgpuStagingBackend {
    pub fn new(recovery: Arc<GpuErrorRecovery>) -> Self {
        Self {
            recovery,
            buffer: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        self.recovery.device()
    }
}

impl StagingBackend for WgpuStagingBackend {
    type Encoder = StagingEncoder;

    fn fill_staging(
        &mut self,
        size: u64,
        fill: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), GpuRecoveryError> {
        let device = self.recovery.device().clone();
        let buffer = self.recovery.execute_with_recovery(|| {
            Ok(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Staging Commit Buffer"),
                size,
                usage: wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: true,
            }))
        })?;

        {
            let mut view = buffer.slice(..).get_mapped_range_mut();
            fill(&mut view);
        }
        buffer.unmap();
        self.buffer = Some(Arc::new(buffer));
        Ok(())
    }

    fn begin(&mut self) -> Result<StagingEncoder, GpuRecoveryError> {
        let staging = self
            .buffer
            .clone()
            .ok_or_else(|| GpuRecoveryError::OperationFailed {
                message: "staging buffer was not filled".into(),
            })?;
        let encoder = self
            .recovery
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Staging Commit Encoder"),
            });
        Ok(StagingEncoder { encoder, staging })
    }

    fn submit_and_wait(&mut self, encoder: StagingEncoder) -> Result<(), GpuRecoveryError> {
        let index = self
            .recovery
            .submit_with_recovery(vec![encoder.encoder.finish()])?;
        self.recovery.wait_for_submission(index)
    }

    fn release(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.destroy();
        }
    }
}

/// Create a storage buffer and queue `bytes` for upload into it.
pub fn upload_storage_buffer(
    staging: &mut WgpuStaging,
    label: &str,
    bytes: Vec<u8>,
    extra_usage: wgpu::BufferUsages,
) -> Arc<wgpu::Buffer> {
    let size = (bytes.len() as u64)
        .max(STAGING_ALIGNMENT)
        .div_ceil(STAGING_ALIGNMENT)
        * STAGING_ALIGNMENT;
    let buffer = Arc::new(staging.backend().device().create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | extra_usage,
        mapped_at_creation: false,
    }));

    if bytes.is_empty() {
        return buffer;
    }

    let handle = staging.enqueue_staging(size, move |dst| dst[..bytes.len()].copy_from_slice(&bytes));
    let dst = buffer.clone();
    staging.enqueue_eval(handle, move |encoder: &mut StagingEncoder, slice| {
        encoder.copy_to_buffer(slice, &dst, 0);
    });
    buffer
}

/// Create a zero-filled storage buffer of at least `size` bytes.
pub fn empty_storage_buffer(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    extra_usage: wgpu::BufferUsages,
) -> Arc<wgpu::Buffer> {
    Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(STAGING_ALIGNMENT).div_ceil(STAGING_ALIGNMENT) * STAGING_ALIGNMENT,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | extra_usage,
        mapped_at_creation: false,
    }))
}
