//! Named shader programs compiled on first use from WGSL source files and
//! cached for the life of the application.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;

pub(crate) struct ShaderCache {
    shader_dir: PathBuf,
    modules: HashMap<String, wgpu::ShaderModule>,
}

impl ShaderCache {
    pub fn new() -> Self {
        // shaders live next to the crate, not the working directory
        let shader_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("shaders");
        ShaderCache {
            shader_dir,
            modules: HashMap::new(),
        }
    }

    /// Cached or freshly compiled module for `shaders/<name>.wgsl`.
    pub fn get_program(
        &mut self,
        device: &wgpu::Device,
        name: &str,
    ) -> anyhow::Result<&wgpu::ShaderModule> {
        if !self.modules.contains_key(name) {
            let path = self.shader_dir.join(format!("{name}.wgsl"));
            let source = fs::read_to_string(&path)
                .with_context(|| format!("reading shader {}", path.display()))?;

            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
            });
            log::debug!("compiled shader program {name}");
            self.modules.insert(name.to_owned(), module);
        }

        Ok(&self.modules[name])
    }
}
