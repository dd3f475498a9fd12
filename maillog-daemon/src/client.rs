//! Blocking client for the daemon socket.

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use maillog_core::{Event, Level};

use crate::error::{io_err, DaemonError, TransportError};
use crate::paths;
use crate::protocol::{self, Request, Response};

/// Send one request and read its response. One connection per call.
pub fn send_request(
    socket: &Path,
    request: &Request,
    timeout: Duration,
) -> Result<Response, DaemonError> {
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning {
            socket: socket.to_path_buf(),
        });
    }

    let mut stream = UnixStream::connect(socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.to_path_buf(),
            }
        } else {
            io_err(socket, err)
        }
    })?;
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|e| io_err(socket, e))?;
    stream
        .set_write_timeout(Some(timeout))
        .map_err(|e| io_err(socket, e))?;

    protocol::write_frame_blocking(&mut stream, request)?;

    let payload = match protocol::read_frame_blocking(&mut stream) {
        Ok(payload) => payload,
        Err(TransportError::ShortRead) => {
            return Err(DaemonError::Protocol(
                "daemon closed connection before responding".to_string(),
            ));
        }
        Err(err) => return Err(err.into()),
    };
    Ok(protocol::decode_payload(&payload)?)
}

/// Submit a pre-built event.
pub fn submit_event(socket: &Path, event: Event) -> Result<(), DaemonError> {
    match send_request(socket, &Request::SubmitEvent { event }, paths::DEFAULT_IO_TIMEOUT)? {
        Response::SubmitEvent { success: true } => Ok(()),
        Response::SubmitEvent { success: false } => {
            Err(DaemonError::Rejected("event could not be buffered"))
        }
        other => Err(unexpected(&other)),
    }
}

/// Stamp `message` with this process's identity and submit it.
pub fn log_event(socket: &Path, level: Level, message: impl Into<String>) -> Result<(), DaemonError> {
    submit_event(socket, Event::new(message, level))
}

/// Fetch every buffered event. Retries briefly so a daemon that is still
/// binding its socket is not reported as down.
pub fn request_status(socket: &Path) -> Result<Vec<Event>, DaemonError> {
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(socket, &Request::GetStatus, paths::DEFAULT_IO_TIMEOUT) {
            Ok(Response::GetStatus {
                success: true,
                events,
            }) => return Ok(events),
            Ok(Response::GetStatus { success: false, .. }) => {
                return Err(DaemonError::Rejected("buffer could not be read"));
            }
            Ok(other) => return Err(unexpected(&other)),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

fn unexpected(response: &Response) -> DaemonError {
    DaemonError::Protocol(format!("unexpected response variant: {response:?}"))
}
