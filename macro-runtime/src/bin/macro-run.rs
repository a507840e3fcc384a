//! CLI tool for expanding macro calls
//!
//! Usage: macro-run <file.mac> [call] [--debug]

use std::process;

use macro_runtime::{MacroRuntime, RuntimeConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("MACRO_LOG").unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let debug = args.iter().any(|arg| arg == "--debug" || arg == "-d");
    let positional: Vec<&String> = args.iter().skip(1).filter(|arg| *arg != "--debug" && *arg != "-d").collect();

    let Some(file_path) = positional.first() else {
        eprintln!("Usage: macro-run <file.mac> [call] [--debug]");
        process::exit(1);
    };
    let call = positional.get(1).map(|s| s.as_str()).unwrap_or("");

    let config = RuntimeConfig {
        debug,
        ..Default::default()
    };

    let result = MacroRuntime::new(config).and_then(|mut runtime| runtime.run_file(file_path.as_str(), call));
    match result {
        Ok(text) => {
            print!("{}", text);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            process::exit(1);
        }
    }
}
