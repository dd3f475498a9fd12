//! `maillog status`: events waiting for the next summary.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use maillog_core::{format::render, Event, Level};
use maillog_daemon::{request_status, ConfigOverrides, DaemonError};

use super::resolve_config;
use crate::GlobalArgs;

/// Arguments for `maillog status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = resolve_config(global, ConfigOverrides::default())?;
        let socket = &config.socket_path;

        let events = match request_status(socket) {
            Ok(events) => events,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                if self.json {
                    let payload = serde_json::json!({
                        "running": false,
                        "socket": socket.display().to_string(),
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .context("failed to render status JSON")?
                    );
                } else {
                    println!(
                        "{} (no socket at {})",
                        "daemon is not running".yellow(),
                        socket.display()
                    );
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            let payload = serde_json::json!({
                "running": true,
                "socket": socket.display().to_string(),
                "events": events,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to render status JSON")?
            );
            return Ok(());
        }

        print_summary(&events);
        Ok(())
    }
}

fn print_summary(events: &[Event]) {
    if events.is_empty() {
        println!("{}", "no pending events".green());
        return;
    }

    let errors = events.iter().filter(|e| e.level == Level::Error).count();
    let warnings = events.iter().filter(|e| e.level == Level::Warning).count();
    println!(
        "{} pending ({} errors, {} warnings)\n",
        events.len().to_string().bold(),
        errors.to_string().red(),
        warnings.to_string().yellow(),
    );
    print!("{}", render(events));
}
