//! Error handling for voxray
//!
//! One crate-wide error type for the fallible edges (configuration, shader
//! sources, GPU setup). The acceleration structure manager itself never
//! surfaces errors to callers: it logs them and reflects failure through
//! observable state.

use std::error::Error as StdError;
use std::fmt;

/// Main error type for voxray
#[derive(Debug)]
pub enum VoxrayError {
    // Shader Errors
    ShaderCompilation {
        source: String,
        error: String,
    },
    ShaderReloadFailed {
        name: String,
        error: String,
    },
    ModuleNotFound {
        name: String,
    },

    // Hot Reload Errors
    AssetWatchError {
        path: String,
        error: String,
    },

    // GPU Errors
    GpuOperationFailed {
        operation: String,
        error: String,
    },

    // Builder Errors
    BuildCancelled,
    StructuralLimit {
        structure: String,
        reason: String,
    },

    // Manager Errors
    StructureTypeMismatch {
        requested: String,
        path: String,
    },

    // Configuration Errors
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    // System Errors
    IoError {
        path: String,
        error: String,
    },
    ParseError {
        value: String,
        expected_type: String,
    },

    // Generic fallback for unexpected errors
    Internal {
        message: String,
    },
}

impl fmt::Display for VoxrayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoxrayError::ShaderCompilation { source, error } => {
                write!(f, "Shader compilation failed for {}: {}", source, error)
            }
            VoxrayError::ShaderReloadFailed { name, error } => {
                write!(f, "Shader reload failed for {}: {}", name, error)
            }
            VoxrayError::ModuleNotFound { name } => write!(f, "Shader module not found: {}", name),

            VoxrayError::AssetWatchError { path, error } => {
                write!(f, "Asset watch error for {}: {}", path, error)
            }

            VoxrayError::GpuOperationFailed { operation, error } => {
                write!(f, "GPU operation '{}' failed: {}", operation, error)
            }

            VoxrayError::BuildCancelled => write!(f, "Build cancelled"),
            VoxrayError::StructuralLimit { structure, reason } => {
                write!(f, "{} exceeded a structural limit: {}", structure, reason)
            }

            VoxrayError::StructureTypeMismatch { requested, path } => write!(
                f,
                "Structure type {} is not available for {}",
                requested, path
            ),

            VoxrayError::InvalidConfig {
                field,
                value,
                reason,
            } => write!(f, "Invalid config: {} = {} ({})", field, value, reason),

            VoxrayError::IoError { path, error } => write!(f, "IO error for {}: {}", path, error),
            VoxrayError::ParseError {
                value,
                expected_type,
            } => write!(
                f,
                "Parse error: '{}' is not a valid {}",
                value, expected_type
            ),

            VoxrayError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl StdError for VoxrayError {}

/// Type alias for Results in voxray
pub type VoxrayResult<T> = Result<T, VoxrayError>;

impl From<std::io::Error> for VoxrayError {
    fn from(error: std::io::Error) -> Self {
        VoxrayError::IoError {
            path: String::new(),
            error: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for VoxrayError {
    fn from(error: toml::de::Error) -> Self {
        VoxrayError::ParseError {
            value: error.message().to_string(),
            expected_type: "renderer config".to_string(),
        }
    }
}

impl From<crate::gpu::GpuRecoveryError> for VoxrayError {
    fn from(error: crate::gpu::GpuRecoveryError) -> Self {
        VoxrayError::GpuOperationFailed {
            operation: "checked call".to_string(),
            error: error.to_string(),
        }
    }
}

impl From<crate::generation::BuildError> for VoxrayError {
    fn from(error: crate::generation::BuildError) -> Self {
        use crate::generation::BuildError;
        match error {
            BuildError::Cancelled => VoxrayError::BuildCancelled,
            BuildError::Structural { structure, reason } => VoxrayError::StructuralLimit {
                structure: structure.to_string(),
                reason,
            },
        }
    }
}

/// Convert Option to Result with context
pub trait OptionExt<T> {
    fn ok_or_voxray<F>(self, f: F) -> VoxrayResult<T>
    where
        F: FnOnce() -> VoxrayError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_voxray<F>(self, f: F) -> VoxrayResult<T>
    where
        F: FnOnce() -> VoxrayError,
    {
        self.ok_or_else(f)
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> VoxrayResult<T>;
    fn with_context<F>(self, f: F) -> VoxrayResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: fmt::Display,
{
    fn context(self, msg: &str) -> VoxrayResult<T> {
        self.map_err(|e| VoxrayError::Internal {
            message: format!("{}: {}", msg, e),
        })
    }

    fn with_context<F>(self, f: F) -> VoxrayResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| VoxrayError::Internal {
            message: format!("{}: {}", f(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VoxrayError::StructureTypeMismatch {
            requested: "Octree".to_string(),
            path: "scenes/bunny".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Structure type Octree is not available for scenes/bunny"
        );
    }

    #[test]
    fn test_option_ext() {
        let opt: Option<i32> = None;
        let result = opt.ok_or_voxray(|| VoxrayError::ModuleNotFound {
            name: "as/grid_as".to_string(),
        });
        assert!(matches!(result, Err(VoxrayError::ModuleNotFound { .. })));
    }

    #[test]
    fn test_error_context_keeps_cause() {
        let result: Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        let err = result.context("loading config").unwrap_err();
        assert_eq!(err.to_string(), "Internal error: loading config: file not found");
    }

    #[test]
    fn test_build_error_conversion() {
        let err: VoxrayError = crate::generation::BuildError::Cancelled.into();
        assert!(matches!(err, VoxrayError::BuildCancelled));
    }
}
