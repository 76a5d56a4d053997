//! WGSL compiler backed by a wgpu device

use std::path::PathBuf;
use std::sync::Arc;

use super::preprocessor::preprocess;
use super::shader_registry::{CompiledShader, ShaderCompiler};
use super::MacroTable;

/// Compiles `<root>/<name>.wgsl` after preprocessing.
pub struct WgpuShaderCompiler {
    device: Arc<wgpu::Device>,
    root: PathBuf,
}

impl WgpuShaderCompiler {
    pub fn new(device: Arc<wgpu::Device>, root: impl Into<PathBuf>) -> Self {
        Self {
            device,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }
}

impl ShaderCompiler for WgpuShaderCompiler {
    type Module = wgpu::ShaderModule;

    fn compile(&self, name: &str, macros: &MacroTable) -> Result<CompiledShader<Self::Module>, String> {
        let entry = self.root.join(format!("{}.wgsl", name));
        let preprocessed = preprocess(&self.root, &entry, macros).map_err(|e| e.to_string())?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(preprocessed.source.into()),
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("[Shader Registry] {} failed to compile:\n{}", name, error);
            return Err(error.to_string());
        }

        Ok(CompiledShader {
            module,
            dependencies: preprocessed.dependencies,
        })
    }

    fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}
