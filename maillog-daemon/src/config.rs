//! Daemon configuration.
//!
//! Resolution order, later wins:
//! 1. built-in defaults rooted at `<home>/.maillog/`
//! 2. the YAML config file (`<home>/.maillog/config.yaml` unless given)
//! 3. command-line overrides
//!
//! A missing default config file is fine; a missing explicitly named one is
//! an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::ConfigError;
use crate::paths::{self, expand_home};
use crate::scheduler::TimeOfDay;

/// Resolved configuration. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonConfig {
    pub schedule: TimeOfDay,
    pub socket_path: PathBuf,
    pub buffer_path: PathBuf,
    pub max_connections: usize,
    pub io_timeout_secs: u64,
    pub mail: MailConfig,
}

/// Where summaries go and how they get there. With `smtp` set, mail is
/// submitted to that server; otherwise it is piped to `sendmail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailConfig {
    pub to: Option<String>,
    pub from: Option<String>,
    pub smtp: Option<SmtpConfig>,
    pub sendmail: PathBuf,
    pub args: Vec<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            to: None,
            from: None,
            smtp: None,
            sendmail: PathBuf::from(paths::DEFAULT_SENDMAIL),
            args: Vec::new(),
        }
    }
}

/// SMTP submission with STARTTLS. The password is never stored in the
/// config itself, only the path of a file holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

impl SmtpConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: paths::DEFAULT_SMTP_PORT,
            username: None,
            password_file: None,
        }
    }
}

fn default_smtp_port() -> u16 {
    paths::DEFAULT_SMTP_PORT
}

/// On-disk shape; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    schedule: Option<TimeOfDay>,
    socket_path: Option<PathBuf>,
    buffer_path: Option<PathBuf>,
    max_connections: Option<usize>,
    io_timeout_secs: Option<u64>,
    mail: Option<MailConfig>,
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub schedule: Option<TimeOfDay>,
    pub socket_path: Option<PathBuf>,
    pub buffer_path: Option<PathBuf>,
    pub to: Option<String>,
    pub from: Option<String>,
    pub smtp_server: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub password_file: Option<PathBuf>,
}

impl ConfigOverrides {
    fn touches_smtp(&self) -> bool {
        self.smtp_server.is_some()
            || self.smtp_port.is_some()
            || self.smtp_username.is_some()
            || self.password_file.is_some()
    }
}

impl DaemonConfig {
    /// Built-in defaults for `home`.
    pub fn defaults_at(home: &Path) -> Self {
        Self {
            schedule: TimeOfDay::default(),
            socket_path: paths::socket_path(home),
            buffer_path: paths::buffer_path(home),
            max_connections: paths::DEFAULT_MAX_CONNECTIONS,
            io_timeout_secs: paths::DEFAULT_IO_TIMEOUT.as_secs(),
            mail: MailConfig::default(),
        }
    }

    /// Defaults overlaid with the config file, if present.
    ///
    /// `explicit` names a config file that must exist; `None` uses the
    /// default location and tolerates its absence.
    pub fn load_at(home: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::defaults_at(home);

        let (path, required) = match explicit {
            Some(path) => (expand_home(path, home), true),
            None => (paths::config_path(home), false),
        };

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(config);
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let file: ConfigFile = if contents.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        };
        config.merge_file(file, home);
        Ok(config)
    }

    fn merge_file(&mut self, file: ConfigFile, home: &Path) {
        if let Some(schedule) = file.schedule {
            self.schedule = schedule;
        }
        if let Some(path) = file.socket_path {
            self.socket_path = expand_home(&path, home);
        }
        if let Some(path) = file.buffer_path {
            self.buffer_path = expand_home(&path, home);
        }
        if let Some(max) = file.max_connections {
            self.max_connections = max;
        }
        if let Some(secs) = file.io_timeout_secs {
            self.io_timeout_secs = secs;
        }
        if let Some(mail) = file.mail {
            let smtp = mail.smtp.map(|smtp| SmtpConfig {
                password_file: smtp.password_file.map(|path| expand_home(&path, home)),
                ..smtp
            });
            self.mail = MailConfig {
                sendmail: expand_home(&mail.sendmail, home),
                smtp,
                ..mail
            };
        }
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if overrides.touches_smtp() {
            // An empty server is caught by `validate`.
            let smtp = self
                .mail
                .smtp
                .get_or_insert_with(|| SmtpConfig::new(String::new()));
            if let Some(server) = overrides.smtp_server {
                smtp.server = server;
            }
            if let Some(port) = overrides.smtp_port {
                smtp.port = port;
            }
            if let Some(username) = overrides.smtp_username {
                smtp.username = Some(username);
            }
            if let Some(path) = overrides.password_file {
                smtp.password_file = Some(path);
            }
        }
        if let Some(schedule) = overrides.schedule {
            self.schedule = schedule;
        }
        if let Some(path) = overrides.socket_path {
            self.socket_path = path;
        }
        if let Some(path) = overrides.buffer_path {
            self.buffer_path = path;
        }
        if let Some(to) = overrides.to {
            self.mail.to = Some(to);
        }
        if let Some(from) = overrides.from {
            self.mail.from = Some(from);
        }
    }

    /// Checks that only matter when starting the daemon.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mail.to.as_deref().map_or(true, |to| to.trim().is_empty()) {
            return Err(ConfigError::MissingRecipient);
        }
        if let Some(smtp) = &self.mail.smtp {
            if smtp.server.trim().is_empty() {
                return Err(ConfigError::MissingSmtpServer);
            }
            if smtp.username.is_some() != smtp.password_file.is_some() {
                return Err(ConfigError::IncompleteCredentials);
            }
        }
        // Shutdown re-acquires every permit at once, which takes a u32.
        let max = Semaphore::MAX_PERMITS.min(u32::MAX as usize);
        if self.max_connections == 0 || self.max_connections > max {
            return Err(ConfigError::MaxConnections {
                got: self.max_connections,
                max,
            });
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }
}
