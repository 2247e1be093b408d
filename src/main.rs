mod calc;
mod db;
mod ipc;
mod policy;
mod record;
mod telemetry;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "classrecordd",
    about = "Class record grading sidecar: newline-delimited JSON requests on stdin, responses on stdout",
    version
)]
struct Cli {
    /// Workspace directory to open at startup
    #[arg(long)]
    workspace: Option<PathBuf>,
    /// Log filter used when RUST_LOG is not set (logs go to stderr)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level)?;

    let mut state = ipc::AppState::default();
    if let Some(path) = cli.workspace.as_deref() {
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            warn!(error = ?e, workspace = %path.display(), "startup workspace not opened");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "classrecordd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                warn!(error = %e, "unparseable request line");
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    info!("stdin closed, shutting down");
    Ok(())
}
