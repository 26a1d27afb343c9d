//! mimir: terminology gateway CLI
//!
//! Lists and invokes gateway operations from the shell.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

use mimir::config::{Config, Secrets};
use mimir::{Mimir, MimirError, TerminologyGateway, error_body};

/// Mimir medical terminology gateway
#[derive(Parser)]
#[command(name = "mimir")]
#[command(version = mimir::PKG_VERSION)]
#[command(about = "Query ICD-11, LOINC, RxNorm, MeSH and SNOMED CT through one gateway")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "MIMIR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available operations with their input schemas
    List,

    /// Invoke an operation
    Call {
        /// Operation name, e.g. `icd_search`
        operation: String,
        /// JSON arguments (or omit to read from stdin)
        arguments: Option<String>,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise tracing (default: warn; override with MIMIR_LOG).
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("MIMIR_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let body = error_body(&e);
            println!(
                "{}",
                serde_json::to_string_pretty(&body).unwrap_or_else(|_| e.to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<String, MimirError> {
    let config = args.config.as_deref();
    let value = match args.command {
        Command::Version => return Ok(mimir::version_string()),
        Command::List => serde_json::to_value(build_gateway(config)?.operations())?,
        Command::Call {
            operation,
            arguments,
        } => {
            let arguments = resolve_arguments(arguments)?;
            build_gateway(config)?.invoke(&operation, arguments).await?
        }
    };
    serde_json::to_string_pretty(&value)
        .map_err(|e| MimirError::Internal(format!("failed to render output: {e}")))
}

fn build_gateway(config_path: Option<&std::path::Path>) -> Result<TerminologyGateway, MimirError> {
    let config = Config::load(config_path)?;
    let secrets = Secrets::load()?;

    let mut builder = Mimir::builder().config(config);
    if let Some(credentials) = secrets.icd_credentials() {
        builder = builder.icd_credentials(credentials);
    }
    builder.build()
}

/// Arguments from the command line, else from piped stdin, else `{}`.
fn resolve_arguments(arg: Option<String>) -> Result<Value, MimirError> {
    let text = match arg {
        Some(text) => text,
        None if !io::stdin().is_terminal() => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| MimirError::InvalidArguments(format!("failed to read stdin: {e}")))?;
            buf
        }
        None => String::new(),
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(text)
        .map_err(|e| MimirError::InvalidArguments(format!("arguments are not valid JSON: {e}")))
}
