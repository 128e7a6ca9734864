use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto::Builder as HyperBuilder, graceful::GracefulShutdown},
};
use tokio::net::TcpListener;

use crate::{
    cli::ServeArguments,
    error::{ServiceError, ServiceResult},
    handler,
    metadata::{PKG_NAME, PKG_VERSION},
    storage::ProgramStore,
};

/// How long in-flight requests get to finish once shutdown starts.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared by every connection task.
pub struct ServerState {
    pub store: Arc<ProgramStore>,
    pub name: &'static str,
    pub version: &'static str,
    started_at: Instant,
}

impl ServerState {
    pub fn new(store: ProgramStore) -> Self {
        Self {
            store: Arc::new(store),
            name: PKG_NAME,
            version: PKG_VERSION,
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

pub async fn start_server(args: ServeArguments) -> ServiceResult<()> {
    args.validate().map_err(ServiceError::Config)?;

    let store = args.store.store();
    store.initialize()?;
    let state = Arc::new(ServerState::new(store));

    let addr = args.bind_addr();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        data_file = %state.store.path().display(),
        "programs API listening"
    );

    serve(listener, state, shutdown_signal()).await
}

/// Accept connections on `listener` until `shutdown` resolves, then let
/// in-flight requests finish (bounded by [`SHUTDOWN_DRAIN_TIMEOUT`]).
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()>,
) -> ServiceResult<()> {
    serve_with_drain(listener, state, shutdown, SHUTDOWN_DRAIN_TIMEOUT).await
}

pub async fn serve_with_drain(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()>,
    drain_timeout: Duration,
) -> ServiceResult<()> {
    tokio::pin!(shutdown);
    let builder = HyperBuilder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!("HTTP accept error: {err}");
                    continue;
                }
            },
            _ = &mut shutdown => {
                tracing::info!("shutdown requested, no longer accepting connections");
                break;
            }
        };

        let state = Arc::clone(&state);
        let svc = service_fn(move |req: Request<Incoming>| {
            handler::handle(req, Arc::clone(&state))
        });
        let conn = builder.serve_connection(TokioIo::new(stream), svc);
        let conn = graceful.watch(conn.into_owned());
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::warn!(%peer, "HTTP connection error: {err}");
            }
        });
    }

    drop(listener);
    tokio::select! {
        _ = graceful.shutdown() => {
            tracing::info!("all connections drained");
        }
        _ = tokio::time::sleep(drain_timeout) => {
            tracing::warn!(
                timeout_secs = drain_timeout.as_secs(),
                "timed out waiting for connections to drain"
            );
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}
