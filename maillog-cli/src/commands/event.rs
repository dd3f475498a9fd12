//! `maillog event`: submit one event from the shell.

use anyhow::{Context, Result};
use clap::Args;

use maillog_core::Level;
use maillog_daemon::{log_event, ConfigOverrides};

use super::resolve_config;
use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct EventArgs {
    /// Event text.
    pub message: String,

    /// Severity: info, warning or error.
    #[arg(long, short, default_value_t = Level::Warning)]
    pub level: Level,
}

impl EventArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = resolve_config(global, ConfigOverrides::default())?;
        log_event(&config.socket_path, self.level, self.message)
            .context("failed to submit event to daemon")?;
        println!("buffered {} event", self.level);
        Ok(())
    }
}
