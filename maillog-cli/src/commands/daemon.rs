//! `maillog daemon`: run the collector in the foreground or show its config.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use maillog_daemon::{start_blocking, ConfigOverrides, TimeOfDay};

use super::resolve_config;
use crate::GlobalArgs;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (socket server + summary scheduler).
    Start(StartArgs),
    /// Print the resolved configuration as YAML.
    Config(StartArgs),
}

#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Daily summary time, HH:MM in UTC.
    #[arg(long)]
    pub schedule: Option<TimeOfDay>,

    /// Buffer file path.
    #[arg(long)]
    pub buffer: Option<PathBuf>,

    /// Summary recipient.
    #[arg(long)]
    pub to: Option<String>,

    /// Summary sender. Defaults to maillog@<hostname>.
    #[arg(long)]
    pub from: Option<String>,

    /// Submit mail to this SMTP server (STARTTLS) instead of running sendmail.
    #[arg(long)]
    pub smtp_server: Option<String>,

    /// SMTP submission port.
    #[arg(long)]
    pub smtp_port: Option<u16>,

    /// SMTP login name; requires --password-file.
    #[arg(long)]
    pub smtp_username: Option<String>,

    /// File whose first line is the SMTP password.
    #[arg(long)]
    pub password_file: Option<PathBuf>,
}

impl StartArgs {
    fn overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            schedule: self.schedule,
            socket_path: None,
            buffer_path: self.buffer,
            to: self.to,
            from: self.from,
            smtp_server: self.smtp_server,
            smtp_port: self.smtp_port,
            smtp_username: self.smtp_username,
            password_file: self.password_file,
        }
    }
}

pub fn run(global: &GlobalArgs, command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start(args) => {
            let config = resolve_config(global, args.overrides())?;
            config.validate().context("invalid daemon configuration")?;
            start_blocking(config).context("daemon exited with error")?;
        }
        DaemonCommand::Config(args) => {
            let config = resolve_config(global, args.overrides())?;
            print!(
                "{}",
                serde_yaml::to_string(&config).context("failed to render config YAML")?
            );
        }
    }
    Ok(())
}
