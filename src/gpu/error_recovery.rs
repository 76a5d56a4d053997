//! GPU Error Recovery System
//!
//! Checked-API wrapper around wgpu calls. Failures are turned into
//! [`GpuRecoveryError`] values and error logs instead of panics, and repeated
//! failures mark the device as lost so callers stop issuing work.

use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error bookkeeping shared by every checked call.
#[derive(Debug)]
pub struct RecoveryState {
    device_lost: Arc<AtomicBool>,
    error_count: AtomicU32,
    max_errors: u32,
}

impl RecoveryState {
    pub fn new(max_errors: u32) -> Self {
        Self {
            device_lost: Arc::new(AtomicBool::new(false)),
            error_count: AtomicU32::new(0),
            max_errors,
        }
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Relaxed)
    }

    pub fn mark_lost(&self) {
        self.device_lost.store(true, Ordering::Relaxed);
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Run `operation`, catching panics and counting consecutive failures.
    pub fn run<F, R>(&self, operation: F) -> Result<R, GpuRecoveryError>
    where
        F: FnOnce() -> Result<R, GpuRecoveryError>,
    {
        if self.is_device_lost() {
            return Err(GpuRecoveryError::DeviceLost);
        }

        let errors = self.error_count.load(Ordering::Relaxed);
        if errors >= self.max_errors {
            log::error!(
                "[GPU Error Recovery] Too many GPU errors ({}), marking device lost",
                errors
            );
            self.mark_lost();
            return Err(GpuRecoveryError::TooManyErrors { count: errors });
        }

        match panic::catch_unwind(panic::AssertUnwindSafe(operation)) {
            Ok(Ok(value)) => {
                self.error_count.store(0, Ordering::Relaxed);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                log::warn!("[GPU Error Recovery] Operation failed: {}", e);
                Err(e)
            }
            Err(payload) => {
                let message = if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else {
                    "Unknown panic".to_string()
                };
                log::error!("[GPU Error Recovery] GPU operation panicked: {}", message);
                self.mark_lost();
                Err(GpuRecoveryError::Panic { message })
            }
        }
    }
}

/// Checked access to a device and its queue.
pub struct GpuErrorRecovery {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    state: RecoveryState,
}

impl GpuErrorRecovery {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let state = RecoveryState::new(10);
        let device_lost = state.device_lost.clone();

        device.on_uncaptured_error(Box::new(move |error| match error {
            wgpu::Error::OutOfMemory { .. } => {
                log::error!("[GPU Error Recovery] GPU out of memory");
                device_lost.store(true, Ordering::Relaxed);
            }
            wgpu::Error::Validation { description, .. } => {
                log::error!("[GPU Error Recovery] Validation error: {}", description);
            }
        }));

        Self {
            device,
            queue,
            state,
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn is_device_lost(&self) -> bool {
        self.state.is_device_lost()
    }

    pub fn execute_with_recovery<F, R>(&self, operation: F) -> Result<R, GpuRecoveryError>
    where
        F: FnOnce() -> Result<R, GpuRecoveryError>,
    {
        self.state.run(operation)
    }

    pub fn submit_with_recovery(
        &self,
        command_buffers: Vec<wgpu::CommandBuffer>,
    ) -> Result<wgpu::SubmissionIndex, GpuRecoveryError> {
        self.execute_with_recovery(|| Ok(self.queue.submit(command_buffers)))
    }

    /// Block until all submitted work has completed.
    pub fn wait_idle_checked(&self) -> Result<(), GpuRecoveryError> {
        self.execute_with_recovery(|| {
            self.device.poll(wgpu::Maintain::Wait);
            Ok(())
        })
    }

    /// Block until the submission `index` has completed.
    pub fn wait_for_submission(&self, index: wgpu::SubmissionIndex) -> Result<(), GpuRecoveryError> {
        self.execute_with_recovery(|| {
            self.device
                .poll(wgpu::Maintain::WaitForSubmissionIndex(index));
            Ok(())
        })
    }

    /// Poll the device until `flag` is set or `timeout` elapses.
    pub fn wait_for_flag(
        &self,
        flag: &AtomicBool,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<(), GpuRecoveryError> {
        let start = Instant::now();
        loop {
            self.device.poll(wgpu::Maintain::Poll);
            if flag.load(Ordering::Acquire) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(GpuRecoveryError::Timeout {
                    operation,
                    millis: timeout.as_millis() as u64,
                });
            }
            std::thread::yield_now();
        }
    }
}

/// GPU recovery errors
#[derive(Debug, thiserror::Error)]
pub enum GpuRecoveryError {
    #[error("GPU device lost")]
    DeviceLost,

    #[error("Too many GPU errors: {count}")]
    TooManyErrors { count: u32 },

    #[error("GPU operation panicked: {message}")]
    Panic { message: String },

    #[error("{operation} timed out after {millis} ms")]
    Timeout { operation: &'static str, millis: u64 },

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: u64, actual: u64 },

    #[error("Shader compilation failed: {message}")]
    ShaderCompilationFailed { message: String },

    #[error("GPU operation failed: {message}")]
    OperationFailed { message: String },
}

/// Extension trait for Result types to add GPU error context
pub trait GpuResultExt<T> {
    fn gpu_context(self, context: &str) -> Result<T, GpuRecoveryError>;
}

impl<T, E: std::fmt::Display> GpuResultExt<T> for Result<T, E> {
    fn gpu_context(self, context: &str) -> Result<T, GpuRecoveryError> {
        self.map_err(|e| GpuRecoveryError::OperationFailed {
            message: format!("{}: {}", context, e),
        })
    }
}

/// Log `result`'s error under `component` and report whether it succeeded.
pub fn log_gpu_failure<T>(component: &str, result: Result<T, GpuRecoveryError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::error!("[{}] {}", component, e);
            None
        }
    }
}
