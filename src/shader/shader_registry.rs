//! Shader module registry
//!
//! Modules are compiled with the registry's macro table. The files each
//! compile reads are tracked so a change to any of them rebuilds every
//! dependent module. Rebuilds compile first; only a successful compile
//! quiesces the device and swaps pipelines through the module's hooks, so a
//! broken edit leaves the previous module and pipelines in place.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use super::file_watcher::FileWatchService;
use super::MacroTable;
use crate::error::{VoxrayError, VoxrayResult};

/// Output of one successful compile.
pub struct CompiledShader<M> {
    pub module: M,
    pub dependencies: Vec<PathBuf>,
}

/// Turns a module name and a macro table into a shader module.
pub trait ShaderCompiler {
    type Module;

    fn compile(&self, name: &str, macros: &MacroTable) -> Result<CompiledShader<Self::Module>, String>;

    /// Block until the device has finished all submitted work.
    fn wait_idle(&self);
}

/// Owner of pipelines built from a module.
pub trait PipelineHook<M> {
    fn create(&mut self, module: &M);
    fn destroy(&mut self);
}

struct ModuleEntry<M> {
    module: M,
    dependencies: Vec<PathBuf>,
    hooks: Vec<Box<dyn PipelineHook<M>>>,
}

#[derive(Default)]
struct FileEntry {
    refcount: usize,
    dependents: FxHashSet<String>,
}

fn normalise(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Thread-safe handle for reporting changed files.
#[derive(Clone, Default)]
pub struct UpdateSink {
    pending: Arc<Mutex<FxHashSet<PathBuf>>>,
}

impl UpdateSink {
    pub fn file_updated(&self, path: &Path) {
        self.pending.lock().insert(normalise(path));
    }

    pub(crate) fn take(&self) -> FxHashSet<PathBuf> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

pub struct ShaderRegistry<C: ShaderCompiler> {
    compiler: C,
    macros: MacroTable,
    modules: FxHashMap<String, ModuleEntry<C::Module>>,
    files: FxHashMap<PathBuf, FileEntry>,
    sink: UpdateSink,
    watcher: Option<Box<dyn FileWatchService>>,
}

impl<C: ShaderCompiler> ShaderRegistry<C> {
    pub fn new(compiler: C) -> Self {
        Self {
            compiler,
            macros: MacroTable::default(),
            modules: FxHashMap::default(),
            files: FxHashMap::default(),
            sink: UpdateSink::default(),
            watcher: None,
        }
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    /// Handle for the file watcher thread.
    pub fn update_sink(&self) -> UpdateSink {
        self.sink.clone()
    }

    /// Attach a watcher and subscribe it to every tracked file.
    pub fn set_watcher(&mut self, mut watcher: Box<dyn FileWatchService>) {
        for path in self.files.keys() {
            if let Err(e) = watcher.watch(path) {
                log::error!("[Shader Registry] {}", e);
            }
        }
        self.watcher = Some(watcher);
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn module(&self, name: &str) -> Option<&C::Module> {
        self.modules.get(name).map(|entry| &entry.module)
    }

    pub fn dependencies(&self, name: &str) -> Option<&[PathBuf]> {
        self.modules.get(name).map(|entry| entry.dependencies.as_slice())
    }

    pub fn tracked_files(&self) -> usize {
        self.files.len()
    }

    // Macro table. Mutations never recompile; call `module_updated` or
    // `file_updated` afterwards.

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    pub fn set_macro(&mut self, name: &str, value: impl Into<String>) {
        self.macros.insert(name.to_string(), value.into());
    }

    pub fn define_macro(&mut self, name: &str) {
        self.set_macro(name, "");
    }

    pub fn remove_macro(&mut self, name: &str) {
        self.macros.remove(name);
    }

    pub fn has_macro(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Compile `name` (or reuse it if already registered), attach `hook` and
    /// create its pipelines.
    pub fn add_module(&mut self, name: &str, mut hook: Box<dyn PipelineHook<C::Module>>) -> VoxrayResult<()> {
        if let Some(entry) = self.modules.get_mut(name) {
            hook.create(&entry.module);
            entry.hooks.push(hook);
            return Ok(());
        }

        let compiled = self
            .compiler
            .compile(name, &self.macros)
            .map_err(|error| VoxrayError::ShaderCompilation {
                source: name.to_string(),
                error,
            })?;

        let dependencies: Vec<PathBuf> = compiled.dependencies.iter().map(|p| normalise(p)).collect();
        for path in &dependencies {
            self.track(path, name);
        }

        hook.create(&compiled.module);
        log::debug!(
            "[Shader Registry] Added module {} ({} files)",
            name,
            dependencies.len()
        );
        self.modules.insert(
            name.to_string(),
            ModuleEntry {
                module: compiled.module,
                dependencies,
                hooks: vec![hook],
            },
        );
        Ok(())
    }

    /// Destroy the module's pipelines and stop tracking its files.
    pub fn remove_module(&mut self, name: &str) {
        let Some(mut entry) = self.modules.remove(name) else {
            return;
        };
        for hook in &mut entry.hooks {
            hook.destroy();
        }
        for path in &entry.dependencies {
            self.untrack(path, name);
        }
        log::debug!("[Shader Registry] Removed module {}", name);
    }

    /// Queue `path` for the next `apply_updates`.
    pub fn file_updated(&self, path: &Path) {
        self.sink.file_updated(path);
    }

    /// Rebuild `name` now with the current macros.
    pub fn module_updated(&mut self, name: &str) -> VoxrayResult<()> {
        if !self.modules.contains_key(name) {
            return Err(VoxrayError::ModuleNotFound {
                name: name.to_string(),
            });
        }
        self.rebuild(name)
    }

    /// Rebuild every module depending on a queued file. Returns the number
    /// of modules rebuilt.
    pub fn apply_updates(&mut self) -> usize {
        let pending = self.sink.take();
        if pending.is_empty() {
            return 0;
        }

        let dependents: BTreeSet<String> = pending
            .iter()
            .filter_map(|path| self.files.get(path))
            .flat_map(|file| file.dependents.iter().cloned())
            .collect();

        let mut rebuilt = 0;
        for name in dependents {
            match self.rebuild(&name) {
                Ok(()) => rebuilt += 1,
                Err(e) => log::error!("[Shader Registry] {}", e),
            }
        }
        rebuilt
    }

    fn rebuild(&mut self, name: &str) -> VoxrayResult<()> {
        let compiled = self
            .compiler
            .compile(name, &self.macros)
            .map_err(|error| VoxrayError::ShaderReloadFailed {
                name: name.to_string(),
                error,
            })?;

        self.compiler.wait_idle();

        let Some(mut entry) = self.modules.remove(name) else {
            return Err(VoxrayError::ModuleNotFound {
                name: name.to_string(),
            });
        };

        for hook in &mut entry.hooks {
            hook.destroy();
        }

        let dependencies: Vec<PathBuf> = compiled.dependencies.iter().map(|p| normalise(p)).collect();
        for path in dependencies.iter().filter(|p| !entry.dependencies.contains(p)) {
            self.track(path, name);
        }
        for path in entry.dependencies.iter().filter(|p| !dependencies.contains(p)) {
            self.untrack(path, name);
        }

        entry.module = compiled.module;
        entry.dependencies = dependencies;
        for hook in &mut entry.hooks {
            hook.create(&entry.module);
        }
        self.modules.insert(name.to_string(), entry);

        log::info!("[Shader Registry] Rebuilt module {}", name);
        Ok(())
    }

    fn track(&mut self, path: &Path, module: &str) {
        let file = self.files.entry(path.to_path_buf()).or_default();
        file.refcount += 1;
        file.dependents.insert(module.to_string());
        if file.refcount == 1 {
            if let Some(watcher) = self.watcher.as_mut() {
                if let Err(e) = watcher.watch(path) {
                    log::error!("[Shader Registry] {}", e);
                }
            }
        }
    }

    fn untrack(&mut self, path: &Path, module: &str) {
        let Some(file) = self.files.get_mut(path) else {
            return;
        };
        file.refcount = file.refcount.saturating_sub(1);
        file.dependents.remove(module);
        if file.refcount == 0 {
            self.files.remove(path);
            if let Some(watcher) = self.watcher.as_mut() {
                watcher.unwatch(path);
            }
        }
    }

    /// Destroy every module's pipelines.
    pub fn shutdown(&mut self) {
        let names: Vec<String> = self.modules.keys().cloned().collect();
        for name in names {
            self.remove_module(&name);
        }
        self.sink.take();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Compiler double: modules are `(name, generation)` pairs.
    #[derive(Default)]
    pub(crate) struct FakeCompiler {
        pub deps: RefCell<FxHashMap<String, Vec<PathBuf>>>,
        pub failing: RefCell<FxHashSet<String>>,
        pub compiles: RefCell<usize>,
        pub idle_waits: RefCell<usize>,
    }

    impl FakeCompiler {
        pub fn with_module(self, name: &str, files: &[&str]) -> Self {
            self.deps
                .borrow_mut()
                .insert(name.to_string(), files.iter().map(PathBuf::from).collect());
            self
        }
    }

    impl ShaderCompiler for FakeCompiler {
        type Module = (String, usize);

        fn compile(&self, name: &str, macros: &MacroTable) -> Result<CompiledShader<Self::Module>, String> {
            if self.failing.borrow().contains(name) {
                return Err(format!("{}: syntax error", name));
            }
            let dependencies = self
                .deps
                .borrow()
                .get(name)
                .cloned()
                .ok_or_else(|| format!("{} not found", name))?;
            *self.compiles.borrow_mut() += 1;
            let tag = if macros.contains_key("GENERATION_FINISHED") {
                format!("{}+ready", name)
            } else {
                name.to_string()
            };
            Ok(CompiledShader {
                module: (tag, *self.compiles.borrow()),
                dependencies,
            })
        }

        fn wait_idle(&self) {
            *self.idle_waits.borrow_mut() += 1;
        }
    }

    /// Hook double recording every call into a shared log.
    pub(crate) struct LogHook {
        pub log: Rc<RefCell<Vec<String>>>,
    }

    impl PipelineHook<(String, usize)> for LogHook {
        fn create(&mut self, module: &(String, usize)) {
            self.log.borrow_mut().push(format!("create {}", module.0));
        }

        fn destroy(&mut self) {
            self.log.borrow_mut().push("destroy".into());
        }
    }

    fn registry() -> (ShaderRegistry<FakeCompiler>, Rc<RefCell<Vec<String>>>) {
        let compiler = FakeCompiler::default()
            .with_module("M", &["F", "common"])
            .with_module("N", &["G", "common"]);
        let log = Rc::new(RefCell::new(Vec::new()));
        (ShaderRegistry::new(compiler), log)
    }

    #[test]
    fn test_file_update_rebuilds_dependent_once() {
        let (mut registry, log) = registry();
        registry
            .add_module("M", Box::new(LogHook { log: log.clone() }))
            .unwrap();
        assert_eq!(*log.borrow(), vec!["create M"]);

        registry.file_updated(Path::new("F"));
        registry.file_updated(Path::new("F"));
        assert_eq!(registry.apply_updates(), 1);
        assert_eq!(*log.borrow(), vec!["create M", "destroy", "create M"]);

        assert_eq!(registry.apply_updates(), 0);
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(*registry.compiler().idle_waits.borrow(), 1);
    }

    #[test]
    fn test_shared_file_rebuilds_every_dependent() {
        let (mut registry, log) = registry();
        registry.add_module("M", Box::new(LogHook { log: log.clone() })).unwrap();
        registry.add_module("N", Box::new(LogHook { log: log.clone() })).unwrap();
        assert_eq!(registry.tracked_files(), 3);
        log.borrow_mut().clear();

        registry.file_updated(Path::new("common"));
        registry.file_updated(Path::new("unrelated"));
        assert_eq!(registry.apply_updates(), 2);

        let log = log.borrow();
        assert_eq!(log.iter().filter(|l| *l == "destroy").count(), 2);
        assert_eq!(log.iter().filter(|l| l.starts_with("create")).count(), 2);
    }

    #[test]
    fn test_macros_apply_on_module_update() {
        let (mut registry, log) = registry();
        registry.add_module("M", Box::new(LogHook { log: log.clone() })).unwrap();

        registry.define_macro("GENERATION_FINISHED");
        assert_eq!(registry.module("M").unwrap().0, "M");

        registry.module_updated("M").unwrap();
        assert_eq!(registry.module("M").unwrap().0, "M+ready");
        assert_eq!(log.borrow().last().unwrap(), "create M+ready");

        registry.remove_macro("GENERATION_FINISHED");
        assert!(!registry.has_macro("GENERATION_FINISHED"));
        assert!(matches!(
            registry.module_updated("missing"),
            Err(VoxrayError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn test_compile_failure_keeps_previous_module() {
        let (mut registry, log) = registry();
        registry.add_module("M", Box::new(LogHook { log: log.clone() })).unwrap();
        let before = registry.module("M").cloned();

        registry.compiler().failing.borrow_mut().insert("M".into());
        registry.file_updated(Path::new("F"));
        assert_eq!(registry.apply_updates(), 0);

        assert_eq!(registry.module("M").cloned(), before);
        assert_eq!(*log.borrow(), vec!["create M"]);
        assert_eq!(*registry.compiler().idle_waits.borrow(), 0);
    }

    #[test]
    fn test_remove_module_releases_files() {
        let (mut registry, log) = registry();
        registry.add_module("M", Box::new(LogHook { log: log.clone() })).unwrap();
        registry.add_module("N", Box::new(LogHook { log: log.clone() })).unwrap();

        registry.remove_module("M");
        assert!(!registry.has_module("M"));
        assert_eq!(registry.tracked_files(), 2);
        assert_eq!(log.borrow().last().unwrap(), "destroy");

        registry.file_updated(Path::new("F"));
        assert_eq!(registry.apply_updates(), 0);
    }
}
