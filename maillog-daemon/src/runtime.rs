use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;

use maillog_core::EventBuffer;

use crate::config::DaemonConfig;
use crate::error::{io_err, DaemonError};
use crate::mailer::{hostname, mailer_from_config, Mailer};
use crate::scheduler::{system_clock, Clock, SummaryScheduler};
use crate::server::{IpcServer, ServerOptions};

/// Start the daemon and block the current thread until it exits.
pub fn start_blocking(config: DaemonConfig) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the daemon with the configured transport until SIGINT or SIGTERM.
pub async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    config.validate()?;
    let host = hostname();
    let mailer = mailer_from_config(&config.mail, &host)?;
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    launch(config, mailer, system_clock(), host, shutdown_tx).await
}

/// Run the daemon with an injected mailer. Sending on `shutdown_tx` stops it.
///
/// Binding the socket is the only fatal step once the config is valid; after
/// that the server and scheduler run until shutdown, and a failure in one is
/// logged without stopping the other.
pub async fn run_with(
    config: DaemonConfig,
    mailer: Arc<dyn Mailer>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    run_with_clock(config, mailer, system_clock(), shutdown_tx).await
}

/// [`run_with`], with the scheduler reading time from `clock`.
pub async fn run_with_clock(
    config: DaemonConfig,
    mailer: Arc<dyn Mailer>,
    clock: Clock,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    launch(config, mailer, clock, hostname(), shutdown_tx).await
}

async fn launch(
    config: DaemonConfig,
    mailer: Arc<dyn Mailer>,
    clock: Clock,
    host: String,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    config.validate()?;

    let buffer = Arc::new(EventBuffer::open(config.buffer_path.clone()));
    let pending = {
        let buffer = Arc::clone(&buffer);
        tokio::task::spawn_blocking(move || buffer.len())
            .await
            .map_err(|err| DaemonError::Protocol(format!("buffer load task failed: {err}")))?
    };
    tracing::info!(buffer = %buffer.path().display(), pending, "event buffer ready");

    // Subscribe before binding: a shutdown sent once the socket is visible
    // must reach every task.
    let server_rx = shutdown_tx.subscribe();
    let scheduler_rx = shutdown_tx.subscribe();
    let signal_rx = shutdown_tx.subscribe();

    let server = IpcServer::bind(
        &config.socket_path,
        Arc::clone(&buffer),
        ServerOptions::from(&config),
    )?;

    let server_handle = tokio::spawn(server.serve(server_rx));

    let scheduler_handle = {
        let scheduler = SummaryScheduler::new(Arc::clone(&buffer), mailer, config.schedule, host)
            .with_clock(clock);
        tokio::spawn(scheduler.run(scheduler_rx))
    };

    let signal_handle = tokio::spawn(signal_task(shutdown_tx.clone(), signal_rx));

    let (server_result, scheduler_result) = tokio::join!(
        async { log_task_exit("ipc_server", server_handle.await) },
        async { log_task_exit("summary_scheduler", scheduler_handle.await) },
    );

    // Both workers are done; release the signal task too.
    let _ = shutdown_tx.send(());
    let signal_result = signal_handle.await;

    handle_join("ipc_server", server_result)?;
    handle_join("summary_scheduler", scheduler_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

async fn signal_task(
    shutdown: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| DaemonError::Protocol(format!("SIGTERM handler failed: {e}")))?;

    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down daemon");
            let _ = shutdown.send(());
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    tracing::info!("received ctrl-c, shutting down daemon");
                    let _ = shutdown.send(());
                    Ok(())
                }
                Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
            }
        }
    }
}

type TaskResult = Result<Result<(), DaemonError>, tokio::task::JoinError>;

/// Log a worker's failure as soon as it happens, so the survivor keeps
/// running while the error is visible.
fn log_task_exit(task: &str, result: TaskResult) -> TaskResult {
    match &result {
        Ok(Ok(())) => tracing::debug!(task, "task exited"),
        Ok(Err(err)) => tracing::error!(task, error = %err, "task failed"),
        Err(err) => tracing::error!(task, error = %err, "task panicked or was cancelled"),
    }
    result
}

fn handle_join(task: &str, result: TaskResult) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the global subscriber. `RUST_LOG` filters (default `info`);
/// `MAILLOG_LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("MAILLOG_LOG_FORMAT").is_ok_and(|format| format == "json");
    let _ = if json {
        fmt().with_env_filter(filter).with_target(false).json().try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}
