//! macro - command-line interface for the macro compiler
//! Compiles macro definitions to instruction text, checks them and expands calls

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use macro_core::{build, Error, MacroConfig, TemplateRepo};
use macro_runtime::{MacroRuntime, RuntimeError};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "macro")]
#[command(author = "Silvano Neto <dev@silvanoneto.com>")]
#[command(version = "2026.1.16")]
#[command(about = "Assembler macro compiler", long_about = None)]
struct Cli {
    /// Log compiler activity (overridden by MACRO_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: nearest macro.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a macro to instruction text
    Compile {
        /// Macro source file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output instruction file; the string pool goes to <OUTPUT>.strings
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Print instruction text to stdout
        #[arg(short, long)]
        print: bool,

        /// Class name for the start part
        #[arg(long, value_name = "NAME")]
        class: Option<String>,
    },

    /// Build and compile without writing anything
    Check {
        /// Macro source file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Expand one call of a macro
    Expand {
        /// Macro source file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Call text: `name(args)` or a bare argument list
        #[arg(value_name = "ARGS", default_value = "", allow_hyphen_values = true)]
        args: String,
    },

    /// Show information about the macro language
    Info,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Compile { input, output, print, class } => {
            compile_command(&input, output.as_deref(), print, class, cli.config.as_deref())
        }
        Commands::Check { input, json } => check_command(&input, json, cli.config.as_deref()),
        Commands::Expand { input, args } => expand_command(&input, &args, cli.config.as_deref()),
        Commands::Info => {
            print_info();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("MACRO_LOG").unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ============================================================================
// Configuration
// ============================================================================

/// Explicit configuration file, else the nearest macro.toml above the input,
/// else defaults. Returns the configuration and the directory it is relative to.
fn load_config(explicit: Option<&Path>, input: &Path) -> Result<(MacroConfig, PathBuf)> {
    let input_dir = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if let Some(path) = explicit {
        let config = MacroConfig::from_file(path)?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        return Ok((config, root));
    }

    match MacroConfig::find_and_load(&input_dir) {
        Ok(found) => Ok(found),
        Err(Error::Config(reason)) if reason.starts_with("No ") => {
            debug!(dir = %input_dir.display(), "no configuration file, using defaults");
            Ok((MacroConfig::default(), input_dir))
        }
        Err(e) => Err(e.into()),
    }
}

fn read_source(input: &Path) -> Result<String> {
    fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))
}

/// `file:line:col: message` for errors that carry a position
fn located(input: &Path, error: &Error) -> String {
    match error {
        Error::SyntaxError { message, line, col } => format!("{}:{}:{}: {}", input.display(), line, col, message),
        other => format!("{}: {}", input.display(), other),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn compile_command(
    input: &Path,
    output: Option<&Path>,
    print: bool,
    class: Option<String>,
    config_path: Option<&Path>,
) -> Result<()> {
    let source = read_source(input)?;
    let (mut config, root) = load_config(config_path, input)?;
    if let Some(class) = class {
        config.compiler.class_name = class;
    }

    println!("{} {}", "Compiling".green().bold(), input.display().to_string().cyan());

    let templates = config.load_templates(&root)?;
    let compiled = build(&source)
        .and_then(|def| config.compiler(&templates).compile(&def))
        .map_err(|e| anyhow::anyhow!(located(input, &e)))?;

    if print {
        println!("\n{}", "Generated Instructions:".bold());
        println!("{}", compiled.code);
    }

    let code_path = output.map(Path::to_path_buf).unwrap_or_else(|| input.with_extension("mcode"));
    let pool_path = PathBuf::from(format!("{}.strings", code_path.display()));
    fs::write(&code_path, &compiled.code).with_context(|| format!("Failed to write {}", code_path.display()))?;
    fs::write(&pool_path, &compiled.strings).with_context(|| format!("Failed to write {}", pool_path.display()))?;

    println!("{} {}", "   Created".green().bold(), code_path.display().to_string().cyan());
    println!("{} {}", "   Created".green().bold(), pool_path.display().to_string().cyan());
    println!(
        "{} {} instruction(s), {} label(s)",
        "    Finished".green().bold(),
        compiled.instruction_count(),
        compiled.label_count()
    );

    Ok(())
}

#[derive(Debug, Serialize)]
struct CheckReport {
    file: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Serialize)]
struct Diagnostic {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    col: Option<usize>,
}

impl Diagnostic {
    fn from_error(error: &Error) -> Self {
        let (kind, message) = match error {
            Error::SyntaxError { message, .. } => ("syntax", message.clone()),
            Error::CalculationError { message } => ("calculation", message.clone()),
            Error::InternalError { message } => ("internal", message.clone()),
            Error::TemplateError { message, .. } => ("template", message.clone()),
            Error::IoError { message } => ("io", message.clone()),
            Error::Config(message) => ("config", message.clone()),
        };
        let position = error.position();
        Self {
            kind,
            message,
            line: position.map(|p| p.0),
            col: position.map(|p| p.1),
        }
    }
}

fn check_command(input: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    let source = read_source(input)?;
    let (config, root) = load_config(config_path, input)?;
    let templates: TemplateRepo = config.load_templates(&root)?;

    let outcome = build(&source).and_then(|def| {
        config.compiler(&templates).compile(&def)?;
        Ok(def)
    });

    let report = CheckReport {
        file: input.display().to_string(),
        ok: outcome.is_ok(),
        name: outcome.as_ref().ok().map(|def| def.name.clone()),
        diagnostics: outcome.as_ref().err().map(Diagnostic::from_error).into_iter().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} {}", "Checking".green().bold(), input.display().to_string().cyan());
        if let Ok(def) = &outcome {
            println!(
                "{} No errors found in '{}' ({} slot(s), {} command(s))",
                "    Finished".green().bold(),
                def.name.cyan(),
                def.declarations.len(),
                def.command_count()
            );
        }
    }

    match outcome {
        Ok(_) => Ok(()),
        Err(e) if json => Err(anyhow::anyhow!("{} failed the check: {}", input.display(), e)),
        Err(e) => Err(anyhow::anyhow!(located(input, &e))),
    }
}

fn expand_command(input: &Path, args: &str, config_path: Option<&Path>) -> Result<()> {
    let source = read_source(input)?;
    let (config, root) = load_config(config_path, input)?;

    let mut runtime = MacroRuntime::from_settings(config, &root)?;
    runtime.load_source(&source).map_err(|e| with_location(input, e))?;
    let text = runtime.call(args).map_err(|e| with_location(input, e))?;
    print!("{}", text);

    Ok(())
}

fn with_location(input: &Path, error: RuntimeError) -> anyhow::Error {
    match error.as_macro() {
        Some(e) => anyhow::anyhow!(located(input, e)),
        None => error.into(),
    }
}

fn print_info() {
    println!("{}", "macro - assembler macro compiler".bold());
    println!();
    println!("Compiles `.macro` ... `.mend` definitions to stack-machine instruction text.");
    println!();
    println!("{}", "Directives:".bold());
    println!("  {}  .macro .local .set .setindex .mend", "declare".green());
    println!("  {}  .if .elseif .else .endif .choise .of .otherwise .endchoise", "branch ".green());
    println!("  {}  .while .for .forall .break .continue .exit", "loop   ".green());
    println!("  {}  .error", "report ".green());
    println!();
    println!("{}", "Types:".bold());
    println!("  int real str bool, and arrays of each (int[] ...)");
    println!();
    println!("{}", "Pipeline:".bold());
    println!("  Macro source");
    println!("       ↓  build (line state machine, expression typing)");
    println!("  Command tree");
    println!("       ↓  compile (template parts, labels, string pool)");
    println!("  Instruction text + string pool");
    println!("       ↓  bind call arguments, execute");
    println!("  Expanded text");
    println!();
    println!("{}", "Commands:".bold());
    println!("  macro compile word.mac -p        # Compile and print");
    println!("  macro compile word.mac -o w.j    # Write w.j and w.j.strings");
    println!("  macro check word.mac --json      # Diagnostics as JSON");
    println!("  macro expand word.mac 'word(3)'  # Expand one call");
    println!("  macro info                       # Show this info");
    println!();
    println!("Configuration is read from the nearest {} (see --config).", "macro.toml".cyan());
    println!("Set {}=debug to trace the compiler.", "MACRO_LOG".cyan());
}
