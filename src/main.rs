//! portal-guard: request-security gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌────────────────────────────────────────────────────┐
//!                  │                   PORTAL GUARD                      │
//!  Client Request  │  ┌─────────┐   ┌──────────────┐   ┌─────────────┐  │
//!  ────────────────┼─▶│  http   │──▶│ SecurityCore │──▶│ forwarding  │──┼──▶ Upstream
//!                  │  │ server  │   │  evaluate()  │   │  handler    │  │    CRUD API
//!                  │  └─────────┘   └──────┬───────┘   └──────┬──────┘  │
//!                  │        ▲  denial      │                  │         │
//!  Client Response │        └──────────────┘     complete() ◀─┘         │
//!  ◀───────────────┼──                                                  │
//!                  │  ┌──────────────────────────────────────────────┐  │
//!                  │  │  rate_limit · lockout · password · ssrf ·    │  │
//!                  │  │  national_id · audit trail                   │  │
//!                  │  └──────────────────────────────────────────────┘  │
//!                  │  admin API · maintenance sweeps · config watcher   │
//!                  └────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "portal-guard", version, about = "Request-security gateway")]
struct Args {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long, env = "PORTAL_GUARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = portal_guard::lifecycle::startup::run(args.config).await {
        eprintln!("portal-guard: {e}");
        std::process::exit(1);
    }
}
