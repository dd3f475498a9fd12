//! Summary delivery.
//!
//! The scheduler only depends on the [`Mailer`] trait. Messages are built
//! with `lettre`, which owns header encoding (RFC 2047 subjects, address
//! validation, body transfer encoding). Two transports exist: SMTP
//! submission over STARTTLS, and piping into a sendmail-compatible program.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::SmtpTransport;
use lettre::Transport;

use crate::config::{MailConfig, SmtpConfig};
use crate::error::{ConfigError, DeliveryError};
use crate::paths;

/// Something that can deliver one summary email. May block.
pub trait Mailer: Send + Sync {
    fn send(&self, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Pick the transport described by `mail`: SMTP when `mail.smtp` is set,
/// the sendmail program otherwise.
pub fn mailer_from_config(
    mail: &MailConfig,
    hostname: &str,
) -> Result<Arc<dyn Mailer>, ConfigError> {
    let (from, to) = envelope(mail, hostname)?;
    match &mail.smtp {
        Some(smtp) => Ok(Arc::new(SmtpMailer::from_config(smtp, from, to)?)),
        None => Ok(Arc::new(SendmailMailer::new(
            mail.sendmail.clone(),
            mail.args.clone(),
            from,
            to,
        ))),
    }
}

/// Parse sender and recipient. The sender defaults to `maillog@<hostname>`.
fn envelope(mail: &MailConfig, hostname: &str) -> Result<(Mailbox, Mailbox), ConfigError> {
    let to = mail
        .to
        .as_deref()
        .filter(|to| !to.trim().is_empty())
        .ok_or(ConfigError::MissingRecipient)?;
    let to = parse_mailbox(to)?;

    let from = match &mail.from {
        Some(from) => parse_mailbox(from)?,
        // Host names are not always valid mail domains.
        None => parse_mailbox(&format!("maillog@{hostname}"))
            .or_else(|_| parse_mailbox("maillog@localhost"))?,
    };
    Ok((from, to))
}

pub fn parse_mailbox(address: &str) -> Result<Mailbox, ConfigError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|source| ConfigError::InvalidAddress {
            address: address.to_string(),
            source,
        })
}

/// Build the summary message. Line breaks in the subject are folded to
/// spaces; everything else about header safety is lettre's job.
pub fn compose(
    from: &Mailbox,
    to: &Mailbox,
    subject: &str,
    body: &str,
    date: DateTime<Utc>,
) -> Result<Message, DeliveryError> {
    Message::builder()
        .from(from.clone())
        .to(to.clone())
        .subject(subject.replace(['\r', '\n'], " "))
        .date(date.into())
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(DeliveryError::Message)
}

// ---------------------------------------------------------------------------
// Sendmail
// ---------------------------------------------------------------------------

/// Delivers mail by running `<program> [args..] -i <to>` with the message on stdin.
#[derive(Debug, Clone)]
pub struct SendmailMailer {
    program: PathBuf,
    args: Vec<String>,
    from: Mailbox,
    to: Mailbox,
}

impl SendmailMailer {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, from: Mailbox, to: Mailbox) -> Self {
        Self {
            program: program.into(),
            args,
            from,
            to,
        }
    }

    pub fn from_config(mail: &MailConfig, hostname: &str) -> Result<Self, ConfigError> {
        let (from, to) = envelope(mail, hostname)?;
        Ok(Self::new(mail.sendmail.clone(), mail.args.clone(), from, to))
    }
}

impl Mailer for SendmailMailer {
    fn send(&self, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let message = compose(&self.from, &self.to, subject, body, Utc::now())?.formatted();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("-i")
            .arg(self.to.email.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DeliveryError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Reap the child even when the pipe breaks, then report the write error.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&message),
            None => Ok(()),
        };
        let output = child.wait_with_output().map_err(|source| DeliveryError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        written.map_err(|source| DeliveryError::Write {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(DeliveryError::Rejected {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::info!(to = %self.to, subject = %subject, "summary mail handed to sendmail");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SMTP
// ---------------------------------------------------------------------------

/// SMTP password loaded from a file. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    /// Read the first line of `path`. The file must be a regular, non-empty file.
    pub fn read_from(path: &Path) -> Result<Self, ConfigError> {
        let read_err = |source| ConfigError::PasswordRead {
            path: path.to_path_buf(),
            source,
        };
        let metadata = std::fs::metadata(path).map_err(read_err)?;
        if !metadata.is_file() {
            return Err(ConfigError::PasswordFile {
                path: path.to_path_buf(),
                reason: "is not a regular file",
            });
        }

        let contents = std::fs::read_to_string(path).map_err(read_err)?;
        let password = contents.lines().next().unwrap_or_default();
        if password.is_empty() {
            return Err(ConfigError::PasswordFile {
                path: path.to_path_buf(),
                reason: "is empty",
            });
        }
        Ok(Self(password.to_string()))
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(********)")
    }
}

/// Submits mail to an SMTP server, upgrading the connection with STARTTLS.
pub struct SmtpMailer {
    transport: SmtpTransport,
    server: String,
    port: u16,
    authenticated: bool,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        smtp: &SmtpConfig,
        password: Option<Password>,
        from: Mailbox,
        to: Mailbox,
    ) -> Result<Self, ConfigError> {
        let mut builder = SmtpTransport::starttls_relay(&smtp.server)
            .map_err(|source| ConfigError::SmtpRelay {
                server: smtp.server.clone(),
                source,
            })?
            .port(smtp.port)
            .timeout(Some(paths::SMTP_TIMEOUT));

        let authenticated = match (&smtp.username, password) {
            (Some(username), Some(Password(password))) => {
                builder = builder.credentials(Credentials::new(username.clone(), password));
                true
            }
            (None, None) => false,
            _ => return Err(ConfigError::IncompleteCredentials),
        };

        Ok(Self {
            transport: builder.build(),
            server: smtp.server.clone(),
            port: smtp.port,
            authenticated,
            from,
            to,
        })
    }

    /// Build from config, reading the password file if one is named.
    pub fn from_config(smtp: &SmtpConfig, from: Mailbox, to: Mailbox) -> Result<Self, ConfigError> {
        let password = smtp
            .password_file
            .as_deref()
            .map(Password::read_from)
            .transpose()?;
        Self::new(smtp, password, from, to)
    }
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("authenticated", &self.authenticated)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let message = compose(&self.from, &self.to, subject, body, Utc::now())?;
        self.transport
            .send(&message)
            .map_err(|source| DeliveryError::Smtp {
                server: self.server.clone(),
                source,
            })?;

        tracing::info!(
            server = %self.server,
            to = %self.to,
            subject = %subject,
            "summary mail submitted over SMTP",
        );
        Ok(())
    }
}

/// Best-effort local host name for subjects and the default sender.
pub fn hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|name| !name.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailbox(address: &str) -> Mailbox {
        address.parse().unwrap()
    }

    fn mailer(program: &str, args: &[&str]) -> SendmailMailer {
        SendmailMailer::new(
            program,
            args.iter().map(|s| s.to_string()).collect(),
            mailbox("maillog@box"),
            mailbox("ops@example.com"),
        )
    }

    fn formatted(subject: &str, body: &str) -> String {
        let date = "2024-03-01T23:59:00Z".parse::<DateTime<Utc>>().unwrap();
        let message = compose(
            &mailbox("maillog@box"),
            &mailbox("ops@example.com"),
            subject,
            body,
            date,
        )
        .unwrap();
        String::from_utf8(message.formatted()).unwrap()
    }

    #[test]
    fn compose_has_headers_then_body() {
        let message = formatted("daily\nsummary", "body text\n");

        assert!(message.contains("From: maillog@box\r\n"));
        assert!(message.contains("To: ops@example.com\r\n"));
        assert!(message.contains("Subject: daily summary\r\n"), "line break folded");
        assert!(message.contains("Date: Fri, 01 Mar 2024 23:59:00"));
        assert!(message.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        let (_, body) = message.split_once("\r\n\r\n").expect("header/body separator");
        assert!(body.contains("body text"));
    }

    #[test]
    fn non_ascii_subject_is_encoded_word() {
        let message = formatted("Résumé für café", "body");
        let subject = message
            .lines()
            .find(|line| line.starts_with("Subject:"))
            .expect("subject header");
        assert!(subject.is_ascii(), "raw subject: {subject}");
        assert!(subject.to_ascii_lowercase().contains("=?utf-8?"), "raw subject: {subject}");
    }

    #[test]
    fn address_with_line_break_is_rejected() {
        let err = parse_mailbox("ops@example.com\r\nBcc: attacker@example.com")
            .expect_err("line break in address");
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));

        let mail = MailConfig {
            to: Some("ops@example.com".to_string()),
            from: Some("me@box\nX-Injected: yes".to_string()),
            ..MailConfig::default()
        };
        assert!(matches!(
            mailer_from_config(&mail, "box"),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn from_config_defaults_sender_to_hostname() {
        let mail = MailConfig {
            to: Some("ops@example.com".to_string()),
            ..MailConfig::default()
        };
        let mailer = SendmailMailer::from_config(&mail, "box").expect("recipient set");
        assert_eq!(mailer.from, mailbox("maillog@box"));
        assert_eq!(mailer.to, mailbox("ops@example.com"));

        assert!(matches!(
            SendmailMailer::from_config(&MailConfig::default(), "box"),
            Err(ConfigError::MissingRecipient)
        ));
    }

    #[test]
    fn unusable_hostname_falls_back_to_localhost_sender() {
        let mail = MailConfig {
            to: Some("ops@example.com".to_string()),
            ..MailConfig::default()
        };
        let mailer = SendmailMailer::from_config(&mail, "bad host name").unwrap();
        assert_eq!(mailer.from, mailbox("maillog@localhost"));
    }

    #[cfg(unix)]
    #[test]
    fn message_is_piped_to_program() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("mail.txt");
        let out_arg = out.display().to_string();
        // `sh -c script $0 ...`: the script writes stdin to $0 and ignores "-i <to>".
        let m = mailer("/bin/sh", &["-c", "cat > \"$0\"", &out_arg]);

        m.send("subject line", "the body").expect("send");
        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.contains("Subject: subject line\r\n"));
        assert!(written.contains("the body"));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_delivery_error() {
        let m = mailer("/bin/sh", &["-c", "cat > /dev/null; echo refused >&2; exit 3"]);
        let err = m.send("s", "b").expect_err("must fail");
        match err {
            DeliveryError::Rejected { status, stderr, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "refused");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let m = mailer("/nonexistent/maillog-sendmail", &[]);
        assert!(matches!(m.send("s", "b"), Err(DeliveryError::Spawn { .. })));
    }

    #[test]
    fn password_is_read_from_first_line_and_never_printed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("password");
        std::fs::write(&path, "s3cret pass\n").unwrap();

        let password = Password::read_from(&path).unwrap();
        assert_eq!(password, Password("s3cret pass".to_string()));
        assert!(!format!("{password:?}").contains("s3cret"));
    }

    #[test]
    fn unusable_password_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            Password::read_from(&dir.path().join("missing")),
            Err(ConfigError::PasswordRead { .. })
        ));
        assert!(matches!(
            Password::read_from(dir.path()),
            Err(ConfigError::PasswordFile { reason: "is not a regular file", .. })
        ));

        let empty = dir.path().join("empty");
        std::fs::write(&empty, "\n").unwrap();
        assert!(matches!(
            Password::read_from(&empty),
            Err(ConfigError::PasswordFile { reason: "is empty", .. })
        ));
    }

    #[test]
    fn smtp_mailer_debug_hides_credentials() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("password");
        std::fs::write(&path, "hunter2").unwrap();
        let smtp = SmtpConfig {
            username: Some("alerts".to_string()),
            password_file: Some(path),
            ..SmtpConfig::new("smtp.example.com")
        };

        let mailer = SmtpMailer::from_config(
            &smtp,
            mailbox("maillog@box"),
            mailbox("ops@example.com"),
        )
        .unwrap();
        let debug = format!("{mailer:?}");
        assert!(debug.contains("smtp.example.com"));
        assert!(debug.contains("authenticated: true"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn smtp_without_password_is_incomplete() {
        let smtp = SmtpConfig {
            username: Some("alerts".to_string()),
            ..SmtpConfig::new("smtp.example.com")
        };
        assert!(matches!(
            SmtpMailer::new(&smtp, None, mailbox("a@box"), mailbox("b@box")),
            Err(ConfigError::IncompleteCredentials)
        ));
    }

    #[test]
    fn unreachable_smtp_server_is_delivery_error() {
        let smtp = SmtpConfig {
            port: 1,
            ..SmtpConfig::new("localhost")
        };
        let mailer =
            SmtpMailer::new(&smtp, None, mailbox("maillog@box"), mailbox("ops@example.com"))
                .unwrap();
        assert!(matches!(
            mailer.send("s", "b"),
            Err(DeliveryError::Smtp { .. })
        ));
    }

    #[test]
    fn config_selects_smtp_when_configured() {
        let mail = MailConfig {
            to: Some("ops@example.com".to_string()),
            smtp: Some(SmtpConfig::new("smtp.example.com")),
            ..MailConfig::default()
        };
        assert!(mailer_from_config(&mail, "box").is_ok());

        let mail = MailConfig {
            smtp: Some(SmtpConfig {
                password_file: Some(PathBuf::from("/nonexistent/maillog-password")),
                username: Some("alerts".to_string()),
                ..SmtpConfig::new("smtp.example.com")
            }),
            ..mail
        };
        assert!(matches!(
            mailer_from_config(&mail, "box"),
            Err(ConfigError::PasswordRead { .. })
        ));
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!hostname().is_empty());
    }
}
