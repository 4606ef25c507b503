//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;

/// HTTP server for a rate limited application.
pub struct HttpServer {
    /// Bound listener
    listener: TcpListener,
    /// The application router
    app: Router,
}

impl HttpServer {
    /// Bind the listener for `app` on `addr`.
    pub async fn bind(addr: SocketAddr, app: Router) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(addr = %addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;
        Ok(Self { listener, app })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            addr = %self.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            self.listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
