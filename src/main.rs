//! Guarded inference proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ access control ─▶ language classifier ─▶ input scanners
//!                                                                   │
//!                                                                   ▼
//!                                                          admission controller
//!                                                           (pool + FIFO queue)
//!                                                                   │
//!                                                                   ▼
//!     Client Response
//!     ◀────────────── output scanners (per segment) ◀─ streaming relay ◀──── Backend
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use guard_proxy::lifecycle::startup;

#[derive(Parser)]
#[command(name = "guard-proxy")]
#[command(about = "Content-guarding proxy in front of an inference backend", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match startup::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("guard-proxy: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match startup::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("guard-proxy: {}", e);
            ExitCode::FAILURE
        }
    }
}
