//! Macro compiler configuration (macro.toml)
//!
//! ```toml
//! [compiler]
//! class_name = "MacroClass"
//! template = "custom.tpl"
//! fold_constants = true
//!
//! [runtime]
//! max_steps = 1000000
//! ```
//!
//! Every section and key is optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compiler::Compiler;
use crate::error::{Error, Result};
use crate::template::TemplateRepo;

pub const CONFIG_FILE: &str = "macro.toml";

/// Contents of macro.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroConfig {
    #[serde(default)]
    pub compiler: CompilerSettings,

    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// `[compiler]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerSettings {
    /// Substituted for `&className` in the start part
    #[serde(default = "default_class_name")]
    pub class_name: String,

    /// Template resource replacing the built-in one, relative to the config file
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default = "default_fold")]
    pub fold_constants: bool,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            class_name: default_class_name(),
            template: None,
            fold_constants: default_fold(),
        }
    }
}

/// `[runtime]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Executor instruction limit per call
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self { max_steps: default_max_steps() }
    }
}

fn default_class_name() -> String {
    "MacroClass".to_string()
}

fn default_fold() -> bool {
    true
}

fn default_max_steps() -> u64 {
    1_000_000
}

impl MacroConfig {
    /// Parse a configuration from TOML text
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse {}: {}", CONFIG_FILE, e)))
    }

    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Find macro.toml in `start_dir` or the nearest parent directory.
    /// Returns the configuration and the directory holding it.
    pub fn find_and_load(start_dir: &Path) -> Result<(Self, PathBuf)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                debug!(path = %config_path.display(), "configuration loaded");
                return Ok((config, current));
            }

            if !current.pop() {
                return Err(Error::Config(format!(
                    "No {} found in {} or any parent directory",
                    CONFIG_FILE,
                    start_dir.display()
                )));
            }
        }
    }

    /// Serialize to TOML text
    pub fn to_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("Failed to serialize configuration: {}", e)))
    }

    /// Template repository: the configured resource resolved against `root`,
    /// or the built-in one
    pub fn load_templates(&self, root: &Path) -> Result<TemplateRepo> {
        match &self.compiler.template {
            Some(path) => {
                let path = root.join(path);
                debug!(path = %path.display(), "loading template resource");
                TemplateRepo::from_file(&path)
            }
            None => TemplateRepo::builtin(),
        }
    }

    /// Compiler configured from the `[compiler]` section
    pub fn compiler<'t>(&self, templates: &'t TemplateRepo) -> Compiler<'t> {
        Compiler::new(templates)
            .with_class_name(self.compiler.class_name.clone())
            .with_folding(self.compiler.fold_constants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = MacroConfig::from_str("").unwrap();
        assert_eq!(config, MacroConfig::default());
        assert_eq!(config.compiler.class_name, "MacroClass");
        assert!(config.compiler.fold_constants);
        assert_eq!(config.runtime.max_steps, 1_000_000);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[compiler]
class_name = "Generated"
template = "res/custom.tpl"
fold_constants = false

[runtime]
max_steps = 500
"#;
        let config = MacroConfig::from_str(toml).unwrap();
        assert_eq!(config.compiler.class_name, "Generated");
        assert_eq!(config.compiler.template.as_deref(), Some("res/custom.tpl"));
        assert!(!config.compiler.fold_constants);
        assert_eq!(config.runtime.max_steps, 500);
    }

    #[test]
    fn test_bad_config_is_config_error() {
        let err = MacroConfig::from_str("[runtime]\nmax_steps = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_round_trip_through_text() {
        let mut config = MacroConfig::default();
        config.runtime.max_steps = 42;
        let text = config.to_string().unwrap();
        assert_eq!(MacroConfig::from_str(&text).unwrap(), config);
    }

    #[test]
    fn test_find_and_load_searches_parents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[compiler]\nclass_name = \"Found\"\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, root) = MacroConfig::find_and_load(&nested).unwrap();
        assert_eq!(config.compiler.class_name, "Found");
        assert_eq!(root, dir.path());
    }

    #[test]
    fn test_custom_template_resource() {
        let dir = tempfile::tempdir().unwrap();
        let builtin = include_str!("../resources/macrocompiler.tpl");
        let custom = builtin.replace("\treturn\n", "\treturn\t; custom\n");
        std::fs::write(dir.path().join("custom.tpl"), custom).unwrap();

        let config = MacroConfig::from_str("[compiler]\ntemplate = \"custom.tpl\"\nclass_name = \"C\"").unwrap();
        let repo = config.load_templates(dir.path()).unwrap();
        let def = crate::builder::build("m .macro\nx\n.mend").unwrap();
        let out = config.compiler(&repo).compile(&def).unwrap();
        assert!(out.code.contains("\t.class\tC\n"));
        assert!(out.code.ends_with("\treturn\t; custom\n"));

        let missing = MacroConfig::from_str("[compiler]\ntemplate = \"nope.tpl\"").unwrap();
        assert!(matches!(missing.load_templates(dir.path()), Err(Error::IoError { .. })));
    }
}
