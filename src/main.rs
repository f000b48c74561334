//================================================
// [SolvraSubstrate CLI]
//================================================
// Author: SolvraOS Contributors
// License: MIT (see LICENSE)
// Goal: Run substrate builtins from the shell
// Objective: Decode JSON arguments, invoke one builtin and print its result
//================================================

//================================================
// Imports/Modules
//================================================
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use solvra_substrate::config::RuntimeConfig;
use solvra_substrate::{SubstrateRuntime, Value};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

#[derive(Parser)]
#[command(author, version, about = "SolvraSubstrate builtin runner", long_about = None)]
struct Cli {
    /// Runtime configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Log every substrate event (overrides SOLVRA_LOG)
    #[arg(long, global = true)]
    trace: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Invoke a builtin with JSON-encoded arguments
    Invoke {
        /// Builtin name, e.g. `sum` or `FFT`
        name: String,
        /// Arguments as JSON; anything that is not valid JSON is passed as a string
        args: Vec<String>,
        /// Register nativeCall, nativeFunction and memoryArea
        #[arg(long)]
        allow_native: bool,
        /// Print arena statistics after the call
        #[arg(long)]
        stats: bool,
    },
    /// List the registered builtins
    List {
        #[arg(long)]
        allow_native: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing(trace: bool) {
    let filter = if trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_env("SOLVRA_LOG").unwrap_or_else(|_| EnvFilter::new(Level::WARN.as_str()))
    };
    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn build_runtime(config: RuntimeConfig, allow_native: bool) -> Result<SubstrateRuntime> {
    #[allow(unused_mut)]
    let mut runtime = SubstrateRuntime::from_config(config);
    if allow_native {
        #[cfg(feature = "ffi")]
        // SAFETY: the operator asked for raw memory access on the command line and supplies
        // every address the builtins will touch.
        unsafe {
            runtime.enable_native_access();
        }
        #[cfg(not(feature = "ffi"))]
        bail!("this build was compiled without the `ffi` feature");
    }
    Ok(runtime)
}

fn decode_args(runtime: &SubstrateRuntime, raw: &[String]) -> Result<Vec<Value>> {
    raw.iter()
        .map(|text| {
            let json = serde_json::from_str(text)
                .unwrap_or_else(|_| serde_json::Value::String(text.clone()));
            runtime
                .arena()
                .from_json(&json)
                .with_context(|| format!("cannot allocate argument {text}"))
        })
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.trace);
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Invoke {
            name,
            args,
            allow_native,
            stats,
        } => {
            let runtime = build_runtime(config, allow_native)?;
            let values = decode_args(&runtime, &args)?;
            let outcome = runtime.invoke_or_exception(&name, &values);
            drop(values);
            match outcome {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result.to_json())?);
                }
                Err(exception) => {
                    let json = exception.to_json();
                    let kind = json["name"].as_str().unwrap_or("Error").to_string();
                    let message = json["message"].as_str().unwrap_or_default().to_string();
                    bail!("{name} raised {kind}: {message}");
                }
            }
            if stats {
                eprintln!("{}", runtime.stats());
            }
        }
        Command::List { allow_native } => {
            let runtime = build_runtime(config, allow_native)?;
            for name in runtime.builtins().names() {
                println!("{name}");
            }
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
