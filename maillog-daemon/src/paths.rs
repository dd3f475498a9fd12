use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAILLOG_DIR: &str = ".maillog";
pub const DAEMON_SOCKET: &str = "maillog.sock";
pub const BUFFER_FILE: &str = "buffer.json";
pub const CONFIG_FILE: &str = "config.yaml";

pub const DEFAULT_MAX_CONNECTIONS: usize = 64;
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

pub fn maillog_root(home: &Path) -> PathBuf {
    home.join(MAILLOG_DIR)
}

pub fn socket_path(home: &Path) -> PathBuf {
    maillog_root(home).join(DAEMON_SOCKET)
}

pub fn buffer_path(home: &Path) -> PathBuf {
    maillog_root(home).join(BUFFER_FILE)
}

pub fn config_path(home: &Path) -> PathBuf {
    maillog_root(home).join(CONFIG_FILE)
}

/// Expand a leading `~/` against `home`. Other paths are returned unchanged.
pub fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_under_dot_maillog() {
        let home = Path::new("/home/ops");
        assert_eq!(socket_path(home), PathBuf::from("/home/ops/.maillog/maillog.sock"));
        assert_eq!(buffer_path(home), PathBuf::from("/home/ops/.maillog/buffer.json"));
        assert_eq!(config_path(home), PathBuf::from("/home/ops/.maillog/config.yaml"));
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        let home = Path::new("/home/ops");
        assert_eq!(
            expand_home(Path::new("~/spool/buffer.json"), home),
            PathBuf::from("/home/ops/spool/buffer.json")
        );
        assert_eq!(
            expand_home(Path::new("/run/maillog.sock"), home),
            PathBuf::from("/run/maillog.sock")
        );
        assert_eq!(
            expand_home(Path::new("~other/x"), home),
            PathBuf::from("~other/x")
        );
    }
}
