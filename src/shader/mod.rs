//! Shader sources, compilation and live reload

pub mod file_watcher;
pub mod preprocessor;
pub mod shader_registry;
pub mod wgpu_compiler;

use rustc_hash::FxHashMap;

pub use file_watcher::FileWatchService;
#[cfg(feature = "native")]
pub use file_watcher::NotifyWatcher;
pub use preprocessor::{preprocess, PreprocessError, Preprocessed};
pub use shader_registry::{CompiledShader, PipelineHook, ShaderCompiler, ShaderRegistry, UpdateSink};
pub use wgpu_compiler::WgpuShaderCompiler;

/// Macro name to value. Flag macros map to an empty string.
pub type MacroTable = FxHashMap<String, String>;

/// Registry compiling WGSL on a wgpu device.
pub type WgpuShaderRegistry = ShaderRegistry<WgpuShaderCompiler>;
