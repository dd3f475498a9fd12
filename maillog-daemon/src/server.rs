//! Unix-socket accept loop.
//!
//! Each accepted connection gets its own task running
//! [`handle_connection`]. A semaphore caps how many run at once; the accept
//! loop waits for a free permit instead of spawning without bound.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::{broadcast, Semaphore};

use maillog_core::EventBuffer;

use crate::config::DaemonConfig;
use crate::error::{io_err, DaemonError};
use crate::handler::handle_connection;
use crate::paths;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    pub max_connections: usize,
    pub io_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_connections: paths::DEFAULT_MAX_CONNECTIONS,
            io_timeout: paths::DEFAULT_IO_TIMEOUT,
        }
    }
}

impl From<&DaemonConfig> for ServerOptions {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            io_timeout: config.io_timeout(),
        }
    }
}

/// A bound, listening server. Construct with [`IpcServer::bind`], run with
/// [`IpcServer::serve`].
pub struct IpcServer {
    listener: UnixListener,
    socket: PathBuf,
    buffer: Arc<EventBuffer>,
    options: ServerOptions,
}

impl IpcServer {
    /// Clear a stale socket file, bind, and open permissions to local clients.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(
        socket: &Path,
        buffer: Arc<EventBuffer>,
        options: ServerOptions,
    ) -> Result<Self, DaemonError> {
        if let Some(parent) = socket.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        prepare_socket_for_bind(socket)?;

        let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
        set_socket_permissions(socket)?;
        tracing::info!(socket = %socket.display(), "ipc server listening");

        Ok(Self {
            listener,
            socket: socket.to_path_buf(),
            buffer,
            options: ServerOptions {
                max_connections: options.max_connections.max(1),
                ..options
            },
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Accept until shutdown, then remove the socket file and wait for
    /// in-flight handlers to finish their exchange.
    pub async fn serve(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        let IpcServer {
            listener,
            socket,
            buffer,
            options,
        } = self;
        let permits = Arc::new(Semaphore::new(options.max_connections));

        loop {
            let permit = tokio::select! {
                _ = shutdown_rx.recv() => break,
                permit = Arc::clone(&permits).acquire_owned() => {
                    permit.map_err(|_| DaemonError::ChannelClosed("connection permits"))?
                }
            };

            let stream = tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = handle_connection(stream, buffer, options.io_timeout).await {
                    tracing::warn!(error = %err, "connection closed without response");
                }
            });
        }

        drop(listener);
        match fs::remove_file(&socket) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(socket = %socket.display(), error = %err, "failed to remove socket"),
        }

        // Every handler holds a permit until it finishes.
        let _ = permits.acquire_many(options.max_connections as u32).await;
        tracing::info!("ipc server stopped");
        Ok(())
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if fs::symlink_metadata(socket).is_err() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::SocketInUse {
                socket: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o666)).map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("maillog.sock");
        fs::write(&socket, b"left over from a crash").unwrap();

        let buffer = Arc::new(EventBuffer::open(dir.path().join("buffer.json")));
        let server = IpcServer::bind(&socket, buffer, ServerOptions::default()).expect("bind");
        assert_eq!(server.socket_path(), socket.as_path());
        assert!(StdUnixStream::connect(&socket).is_ok());
    }

    #[tokio::test]
    async fn live_socket_is_not_stolen() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("maillog.sock");
        let buffer = Arc::new(EventBuffer::open(dir.path().join("buffer.json")));
        let _first = IpcServer::bind(&socket, buffer.clone(), ServerOptions::default()).expect("bind");

        let err = IpcServer::bind(&socket, buffer, ServerOptions::default())
            .err()
            .expect("second bind must fail");
        assert!(matches!(err, DaemonError::SocketInUse { .. }));
    }

    #[tokio::test]
    async fn socket_is_world_connectable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("run").join("maillog.sock");
        let buffer = Arc::new(EventBuffer::open(dir.path().join("buffer.json")));
        let _server = IpcServer::bind(&socket, buffer, ServerOptions::default()).expect("bind");

        let mode = fs::metadata(&socket).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o666);
    }

    #[tokio::test]
    async fn shutdown_removes_socket() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("maillog.sock");
        let buffer = Arc::new(EventBuffer::open(dir.path().join("buffer.json")));
        let server = IpcServer::bind(&socket, buffer, ServerOptions::default()).expect("bind");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.serve(shutdown_rx));
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server stops")
            .expect("join")
            .expect("clean exit");
        assert!(!socket.exists());
    }
}
