//! Main runtime implementation

use std::path::Path;

use macro_core::{bind, bind_text, CallSite, CompiledMacro, MacroConfig, MacroInstance, MacroTemplate, TemplateRepo};

use crate::error::{RuntimeError, RuntimeResult};
use crate::executor::Executor;
use crate::loader::{LoadedMacro, ProgramLoader};

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Instruction limit per call
    pub max_steps: u64,

    /// Print the compiled listing on load
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            debug: false,
        }
    }
}

impl From<&MacroConfig> for RuntimeConfig {
    fn from(settings: &MacroConfig) -> Self {
        Self {
            max_steps: settings.runtime.max_steps,
            ..Default::default()
        }
    }
}

/// Loads one macro and expands calls to it
pub struct MacroRuntime {
    config: RuntimeConfig,
    settings: MacroConfig,
    templates: TemplateRepo,
    loaded: Option<LoadedMacro>,
}

impl MacroRuntime {
    /// Runtime with default compiler settings and the built-in templates
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        Ok(Self {
            config,
            settings: MacroConfig::default(),
            templates: TemplateRepo::builtin()?,
            loaded: None,
        })
    }

    /// Runtime configured from a macro.toml found under `root`
    pub fn from_settings(settings: MacroConfig, root: &Path) -> RuntimeResult<Self> {
        let templates = settings.load_templates(root)?;
        Ok(Self {
            config: RuntimeConfig::from(&settings),
            settings,
            templates,
            loaded: None,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    /// Load a macro source file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> RuntimeResult<()> {
        if self.config.debug {
            eprintln!("Loading macro file: {}", path.as_ref().display());
        }
        let source = ProgramLoader::read_source(path)?;
        self.load_source(&source)
    }

    /// Load macro source text
    pub fn load_source(&mut self, source: &str) -> RuntimeResult<()> {
        let loaded = ProgramLoader::compile(source, &self.settings, &self.templates)?;

        if self.config.debug {
            eprintln!(
                "Compiled '{}' ({} instructions, {} labels)",
                loaded.compiled.name,
                loaded.program.len(),
                loaded.compiled.label_count()
            );
            eprintln!("\n{}\n", "=".repeat(60));
            eprint!("{}", loaded.compiled.code);
            eprintln!("{}\n", "=".repeat(60));
        }

        self.loaded = Some(loaded);
        Ok(())
    }

    fn loaded(&self) -> RuntimeResult<&LoadedMacro> {
        self.loaded.as_ref().ok_or(RuntimeError::NotLoaded)
    }

    pub fn template(&self) -> RuntimeResult<&MacroTemplate> {
        Ok(&self.loaded()?.template)
    }

    pub fn compiled(&self) -> RuntimeResult<&CompiledMacro> {
        Ok(&self.loaded()?.compiled)
    }

    /// Expand one call given as text: `name(args)` or a bare argument list
    pub fn call(&self, call: &str) -> RuntimeResult<String> {
        let mut instance = bind_text(self.template()?, call)?;
        self.run_instance(&mut instance)
    }

    /// Expand one parsed call
    pub fn call_site(&self, call: &CallSite) -> RuntimeResult<String> {
        let mut instance = bind(self.template()?, call)?;
        self.run_instance(&mut instance)
    }

    /// Run the loaded code against an already bound instance
    pub fn run_instance(&self, instance: &mut MacroInstance) -> RuntimeResult<String> {
        let loaded = self.loaded()?;
        Executor::new(self.config.max_steps).run(&loaded.program, &loaded.compiled.strings, instance)
    }

    /// Load a file and expand one call (load + call)
    pub fn run_file(&mut self, path: impl AsRef<Path>, call: &str) -> RuntimeResult<String> {
        self.load_file(path)?;
        self.call(call)
    }

    /// Load source text and expand one call
    pub fn run_source(&mut self, source: &str, call: &str) -> RuntimeResult<String> {
        self.load_source(source)?;
        self.call(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_simple_macro() {
        let source = "a .macro x:int\ny .local int\ny .set x+1\n&y\n\t.mend\n";
        let mut runtime = MacroRuntime::new(RuntimeConfig::default()).unwrap();
        assert_eq!(runtime.run_source(source, "5").unwrap(), "6\n");
    }

    #[test]
    fn test_call_before_load() {
        let runtime = MacroRuntime::new(RuntimeConfig::default()).unwrap();
        assert!(matches!(runtime.call("1"), Err(RuntimeError::NotLoaded)));
    }

    #[test]
    fn test_step_limit_from_settings() {
        let settings = MacroConfig::from_str("[runtime]\nmax_steps = 20").unwrap();
        let mut runtime = MacroRuntime::from_settings(settings, Path::new(".")).unwrap();
        assert_eq!(runtime.config().max_steps, 20);
        runtime.load_source("spin .macro\n\t.while true\nx\n\t.endwhile\n\t.mend\n").unwrap();
        assert!(matches!(runtime.call(""), Err(RuntimeError::StepLimit(20))));
    }
}
