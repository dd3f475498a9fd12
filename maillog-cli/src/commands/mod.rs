pub mod daemon;
pub mod event;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};

use maillog_daemon::{ConfigOverrides, DaemonConfig};

use crate::GlobalArgs;

/// Resolve the daemon config the same way for every subcommand.
pub fn resolve_config(global: &GlobalArgs, overrides: ConfigOverrides) -> Result<DaemonConfig> {
    let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
    let mut config = DaemonConfig::load_at(&home, global.config.as_deref())
        .context("failed to load maillog config")?;
    config.apply(ConfigOverrides {
        socket_path: global.socket.clone().or(overrides.socket_path),
        ..overrides
    });
    Ok(config)
}
