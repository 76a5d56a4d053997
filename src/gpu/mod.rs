//! GPU services: checked API access, the staging commit and device setup

pub mod error_recovery;
pub mod staging;
pub mod wgpu_staging;

use std::sync::Arc;

pub use error_recovery::{log_gpu_failure, GpuErrorRecovery, GpuRecoveryError, GpuResultExt};
pub use staging::{StagingBackend, StagingCommit, StagingHandle, StagingSlice};
pub use wgpu_staging::{
    empty_storage_buffer, upload_storage_buffer, StagingEncoder, WgpuStaging, WgpuStagingBackend,
};

/// Largest push constant block used by the structure shaders.
pub const PUSH_CONSTANT_BYTES: u32 = 256;

/// Device, queue and the checked wrapper around them.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub recovery: Arc<GpuErrorRecovery>,
}

impl GpuContext {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let recovery = Arc::new(GpuErrorRecovery::new(device.clone(), queue.clone()));
        Self {
            device,
            queue,
            recovery,
        }
    }

    /// Features and limits every structure shader relies on.
    pub fn required_features() -> wgpu::Features {
        wgpu::Features::PUSH_CONSTANTS
    }

    pub fn required_limits(adapter: &wgpu::Adapter) -> wgpu::Limits {
        wgpu::Limits {
            max_push_constant_size: PUSH_CONSTANT_BYTES,
            ..wgpu::Limits::default().using_resolution(adapter.limits())
        }
    }

    /// Open a device without a surface.
    pub fn headless() -> Result<Self, GpuRecoveryError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| GpuRecoveryError::OperationFailed {
                    message: "no suitable GPU adapter".into(),
                })?;

            log::info!("[GPU] Using adapter {}", adapter.get_info().name);

            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("Voxray Device"),
                        required_features: Self::required_features(),
                        required_limits: Self::required_limits(&adapter),
                    },
                    None,
                )
                .await
                .gpu_context("request device")?;

            Ok(Self::new(Arc::new(device), Arc::new(queue)))
        })
    }

    pub fn staging(&self) -> WgpuStaging {
        StagingCommit::new(WgpuStagingBackend::new(self.recovery.clone()))
    }
}
