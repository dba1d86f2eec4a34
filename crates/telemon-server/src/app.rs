use crate::grpc::MetricsService;
use crate::state::AppState;
use crate::{http, logging};
use axum::middleware;
use axum::Router;
use std::net::SocketAddr;
use telemon_common::lifecycle::Shutdown;
use telemon_common::proto::metrics_server::MetricsServer;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server as TonicServer;

pub fn build_http_app(state: AppState) -> Router {
    http::routes()
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}

pub fn build_grpc_service(state: AppState) -> MetricsServer<MetricsService> {
    MetricsServer::new(MetricsService::new(state))
}

/// Bound listeners, ready to serve.
pub struct Listeners {
    pub http: Option<TcpListener>,
    pub grpc: Option<TcpListener>,
}

impl Listeners {
    pub async fn bind(
        http: Option<SocketAddr>,
        grpc: Option<SocketAddr>,
    ) -> std::io::Result<Self> {
        let http = match http {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        let grpc = match grpc {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        Ok(Self { http, grpc })
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn grpc_addr(&self) -> Option<SocketAddr> {
        self.grpc.as_ref().and_then(|l| l.local_addr().ok())
    }
}

/// Serves both front-ends until `shutdown` fires, then drains in-flight
/// requests and returns.
pub async fn serve(listeners: Listeners, state: AppState, shutdown: Shutdown) -> anyhow::Result<()> {
    let mut tasks = JoinSet::new();

    if let Some(listener) = listeners.http {
        let app = build_http_app(state.clone());
        let mut stop = shutdown.clone();
        tracing::info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
        tasks.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.wait().await })
                .await
                .map_err(anyhow::Error::from)
        });
    }

    if let Some(listener) = listeners.grpc {
        let service = build_grpc_service(state.clone());
        let mut stop = shutdown.clone();
        tracing::info!(addr = ?listener.local_addr().ok(), "gRPC server listening");
        tasks.spawn(async move {
            TonicServer::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    stop.wait().await
                })
                .await
                .map_err(anyhow::Error::from)
        });
    }

    let mut result = Ok(());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Server stopped with error");
                result = Err(e);
            }
            Err(e) => {
                tracing::error!(error = %e, "Server task panicked");
                result = Err(e.into());
            }
        }
    }
    tracing::info!("Servers stopped");
    result
}
