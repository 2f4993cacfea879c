//! Gateway TCP listener
//!
//! Accepts client connections, sheds load beyond the connection cap, and
//! drains in-flight requests on shutdown.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::gateway::handler::GatewayHandler;

/// The forward-proxy server
pub struct GatewayServer {
    config: GatewayConfig,
    handler: Arc<GatewayHandler>,
    active_connections: Arc<AtomicUsize>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        handler: Arc<GatewayHandler>,
        active_connections: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            config,
            handler,
            active_connections,
        }
    }

    /// Run the gateway until shutdown, then drain
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| {
                crate::error::HazeError::InvalidConfig("Invalid gateway address".to_string())
            })?;

        let listener = TcpListener::bind(addr).await?;
        info!(
            addr = %addr,
            max_connections = self.config.max_concurrent_connections,
            "Gateway listening"
        );

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            self.dispatch(stream, client_addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Hand a fresh connection to a task, or shed it past the cap
    fn dispatch(&self, stream: tokio::net::TcpStream, client_addr: SocketAddr) {
        let active = self.active_connections.load(Ordering::Relaxed);
        if active >= self.config.max_concurrent_connections {
            warn!(
                client = %client_addr,
                active,
                "Connection cap reached, shedding"
            );
            tokio::spawn(async move {
                let mut stream = stream;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 503 Service Unavailable\r\n\
                          Content-Type: text/plain\r\n\
                          Content-Length: 20\r\n\
                          Connection: close\r\n\r\n\
                          Too many connections",
                    )
                    .await;
                let _ = stream.shutdown().await;
            });
            return;
        }

        let guard = ConnectionGuard::new(Arc::clone(&self.active_connections));
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = Self::serve_connection(stream, handler).await {
                debug!(client = %client_addr, "Connection error: {}", e);
            }
        });
    }

    /// Serve one client connection with hyper
    async fn serve_connection(
        stream: tokio::net::TcpStream,
        handler: Arc<GatewayHandler>,
    ) -> Result<()> {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();

            async move {
                match handler.handle(req).await {
                    Ok(response) => Ok::<_, Infallible>(response),
                    Err(e) => {
                        error!("Request handling error: {}", e);
                        Ok(Response::builder()
                            .status(StatusCode::BAD_GATEWAY)
                            .body(Full::new(Bytes::from(format!("Error: {}", e))))
                            .unwrap())
                    }
                }
            }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await
            .map_err(|e| crate::error::HazeError::Http(e.to_string()))?;

        Ok(())
    }

    /// Wait for in-flight connections to finish, up to the drain window
    async fn drain(&self) {
        let deadline = Duration::from_secs(self.config.drain_timeout);
        let started = std::time::Instant::now();

        let active = self.active_connections.load(Ordering::Relaxed);
        if active == 0 {
            return;
        }
        info!(active, "Draining in-flight connections");

        while started.elapsed() < deadline {
            if self.active_connections.load(Ordering::Relaxed) == 0 {
                info!("Drain complete");
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        warn!(
            remaining = self.active_connections.load(Ordering::Relaxed),
            "Drain window elapsed, closing"
        );
    }
}

/// RAII guard tracking one in-flight connection
struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_guard_counts() {
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let _a = ConnectionGuard::new(Arc::clone(&counter));
            assert_eq!(counter.load(Ordering::Relaxed), 1);
            {
                let _b = ConnectionGuard::new(Arc::clone(&counter));
                assert_eq!(counter.load(Ordering::Relaxed), 2);
            }
            assert_eq!(counter.load(Ordering::Relaxed), 1);
        }
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
