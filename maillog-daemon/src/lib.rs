//! maillog daemon: framed Unix-socket server, daily summary scheduler, and
//! the blocking client used by `maillog event` / `maillog status`.

pub mod client;
pub mod config;
mod error;
pub mod handler;
pub mod mailer;
pub mod paths;
pub mod protocol;
pub mod scheduler;
pub mod server;
mod runtime;

pub use client::{log_event, request_status, send_request, submit_event};
pub use config::{ConfigOverrides, DaemonConfig, MailConfig, SmtpConfig};
pub use error::{ConfigError, DaemonError, DeliveryError, TransportError};
pub use mailer::{mailer_from_config, Mailer, SendmailMailer, SmtpMailer};
pub use protocol::{FrameCodec, Request, Response};
pub use runtime::{run, run_with, run_with_clock, start_blocking};
pub use scheduler::{
    compute_next_target, system_clock, Clock, ScheduleTarget, SummaryOutcome, SummaryScheduler,
    TimeOfDay,
};
pub use server::{IpcServer, ServerOptions};
