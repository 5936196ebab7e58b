mod calc;
mod config;
mod context;
mod db;
mod error;
mod fees;
mod grading;
mod ipc;
mod recorder;
mod reports;
mod store;
mod telemetry;

use std::io::{self, BufRead, Write};
use tracing::{error, info};

fn main() {
    telemetry::init_tracing();

    let scales = match config::load_scale_from_env() {
        Ok(v) => v,
        Err(e) => {
            error!(target: "gradebookd", code = e.code(), error = %e, "startup aborted");
            std::process::exit(2);
        }
    };

    let mut state = ipc::AppState::new(scales);
    info!(target: "gradebookd", version = env!("CARGO_PKG_VERSION"), "ready");

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
                let _ = writeln!(stdout, "{}", ipc::bad_json(&e));
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
}
