//! Loading macro source files into executable form

use std::fs;
use std::path::Path;

use macro_core::{build, CompiledMacro, MacroConfig, MacroTemplate, TemplateRepo};
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::executor::Program;

/// A built, compiled and parsed macro, ready to be called
#[derive(Debug, Clone)]
pub struct LoadedMacro {
    pub template: MacroTemplate,
    pub compiled: CompiledMacro,
    pub program: Program,
}

/// Loader for macro source
pub struct ProgramLoader;

impl ProgramLoader {
    /// Read macro source text from a file
    pub fn read_source(path: impl AsRef<Path>) -> RuntimeResult<String> {
        fs::read_to_string(path.as_ref()).map_err(|_| RuntimeError::FileNotFound(path.as_ref().display().to_string()))
    }

    /// Build and compile macro source
    pub fn compile(source: &str, settings: &MacroConfig, templates: &TemplateRepo) -> RuntimeResult<LoadedMacro> {
        let def = build(source)?;
        let compiled = settings.compiler(templates).compile(&def)?;
        let program = Program::parse(&compiled.code)?;
        debug!(name = %compiled.name, instructions = program.len(), "macro loaded");

        Ok(LoadedMacro {
            template: MacroTemplate::new(def),
            compiled,
            program,
        })
    }

    /// Read, build and compile a macro source file
    pub fn load_file(
        path: impl AsRef<Path>,
        settings: &MacroConfig,
        templates: &TemplateRepo,
    ) -> RuntimeResult<LoadedMacro> {
        let source = Self::read_source(path)?;
        Self::compile(&source, settings, templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let templates = TemplateRepo::builtin().unwrap();
        let err = ProgramLoader::load_file("/nonexistent/macro.mac", &MacroConfig::default(), &templates).unwrap_err();
        assert!(matches!(err, RuntimeError::FileNotFound(_)));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.mac");
        fs::write(&path, "hello .macro who:str\nhello, &who\n\t.mend\n").unwrap();

        let templates = TemplateRepo::builtin().unwrap();
        let loaded = ProgramLoader::load_file(&path, &MacroConfig::default(), &templates).unwrap();
        assert_eq!(loaded.template.name(), "hello");
        assert_eq!(loaded.compiled.name, "hello");
        assert!(!loaded.program.is_empty());
    }

    #[test]
    fn test_build_error_passes_through() {
        let templates = TemplateRepo::builtin().unwrap();
        let err = ProgramLoader::compile("m .macro\n\t.endif\n\t.mend\n", &MacroConfig::default(), &templates)
            .unwrap_err();
        assert!(matches!(err.as_macro(), Some(macro_core::Error::SyntaxError { line: 2, .. })));
    }
}
