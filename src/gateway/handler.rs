//! Gateway request handler with retry orchestration
//!
//! Parses one client request, asks the rotation engine for an upstream,
//! forwards, judges the response for blocks, and retries through different
//! upstreams until the budget runs out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, LOCATION};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{HazeError, Result};
use crate::gateway::block;
use crate::gateway::logger::RequestLogger;
use crate::gateway::tunnel::TunnelHandler;
use crate::models::{RequestRecord, Strategy};
use crate::repository::ProxyRepository;
use crate::rotation::{RotationEngine, Selection, SelectionContext};

const SESSION_HEADER: &str = "x-session-id";

/// Headers never forwarded upstream
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Configuration for the gateway handler
#[derive(Clone)]
pub struct GatewayHandlerConfig {
    /// Maximum retry attempts after the first failure
    pub max_retries: u32,
    /// Timeout for upstream dials
    pub connect_timeout: Duration,
    /// Timeout for a full forwarded request
    pub request_timeout: Duration,
}

impl Default for GatewayHandlerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Gateway request handler
pub struct GatewayHandler {
    engine: Arc<RotationEngine>,
    pool: ProxyRepository,
    logger: RequestLogger,
    config: GatewayHandlerConfig,
    active_connections: Arc<AtomicUsize>,
}

impl GatewayHandler {
    pub fn new(
        engine: Arc<RotationEngine>,
        pool: ProxyRepository,
        logger: RequestLogger,
        config: GatewayHandlerConfig,
        active_connections: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            engine,
            pool,
            logger,
            config,
            active_connections,
        }
    }

    /// Handle one client request
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn handle(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        if req.method() == Method::CONNECT {
            return self.handle_connect(req).await;
        }

        // Liveness probe hits the gateway in origin-form
        if req.uri().host().is_none() && req.uri().path() == "/health" {
            return Ok(json_response(
                StatusCode::OK,
                json!({
                    "status": "ok",
                    "service": "gateway",
                    "active_connections": self.active_connections.load(Ordering::Relaxed),
                }),
            ));
        }

        self.handle_http(req).await
    }

    /// Forward a plain-HTTP (absolute-form) request with retries
    async fn handle_http(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let method = req.method().clone();
        let uri = req.uri().clone();

        let target_domain = uri
            .host()
            .ok_or_else(|| {
                HazeError::InvalidRequest("Request target must be an absolute URL".to_string())
            })?
            .to_lowercase();

        let session_id = extract_session_id(req.headers());

        let (parts, body) = req.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| HazeError::InvalidRequest(format!("Failed to read body: {}", e)))?
            .to_bytes();

        let mut ctx = SelectionContext {
            target_domain: Some(target_domain.clone()),
            session_id: session_id.clone(),
            exclude: HashSet::new(),
        };

        let max_attempts = self.config.max_retries + 1;
        let mut last_error: Option<HazeError> = None;

        for attempt in 1..=max_attempts {
            let Selection { proxy, strategy } = match self.engine.next_proxy(&ctx).await {
                Ok(s) => s,
                Err(HazeError::NoHealthyProxies) => {
                    warn!(domain = %target_domain, "No healthy proxies available");
                    return Ok(error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "No healthy proxies available",
                    ));
                }
                Err(e) => {
                    // Store trouble: fail this request, keep the process alive
                    error!("Proxy selection failed: {}", e);
                    return Ok(error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Proxy selection unavailable",
                    ));
                }
            };

            debug!(
                proxy = %proxy.key(),
                strategy = %strategy,
                attempt,
                max_attempts,
                "Forwarding request through upstream"
            );

            let start = Instant::now();
            let mut record = RequestRecord::new(method.as_str(), uri.to_string(), &target_domain);
            record.proxy_addr = proxy.key();
            record.attempt = attempt as i32;
            record.strategy = strategy.as_str().to_string();

            match self.forward_request(&proxy.key(), &parts, body_bytes.clone()).await {
                Ok(response) => {
                    let latency = start.elapsed().as_secs_f64() * 1000.0;
                    let status = response.status().as_u16();
                    let (resp_parts, resp_body) = response.into_parts();

                    let location = resp_parts
                        .headers
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());

                    let verdict = block::detect_block(status, &resp_body, location.as_deref());

                    record.status = status as i32;
                    record.latency_ms = latency;
                    record.blocked = verdict.is_some();
                    record.response_headers = headers_to_json(&resp_parts.headers);

                    match verdict {
                        None => {
                            self.logger.publish(record);
                            return Ok(Response::from_parts(resp_parts, Full::new(resp_body)));
                        }
                        Some(reason) => {
                            info!(
                                proxy = %proxy.key(),
                                domain = %target_domain,
                                status,
                                attempt,
                                reason = %reason,
                                "Block detected"
                            );
                            record.error = Some(reason.clone());
                            self.logger.publish(record);

                            self.handle_block(&proxy.ip, proxy.port as u16, &reason, strategy, &session_id)
                                .await;
                            ctx.exclude.insert(proxy.key());
                            last_error = Some(HazeError::Blocked(reason));
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        proxy = %proxy.key(),
                        attempt,
                        max_attempts,
                        "Upstream attempt failed: {}", e
                    );
                    record.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                    record.status = 0;
                    record.error = Some(e.to_string());
                    self.logger.publish(record);

                    self.handle_transport_failure(&proxy.ip, proxy.port as u16, strategy, &session_id)
                        .await;
                    ctx.exclude.insert(proxy.key());
                    last_error = Some(e);
                }
            }
        }

        error!(domain = %target_domain, "All upstream attempts failed after {} attempts", max_attempts);

        let last_error = last_error.unwrap_or(HazeError::NoHealthyProxies);
        let status = if matches!(last_error, HazeError::Timeout) {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        Ok(error_response(
            status,
            &format!("All proxies failed: {}", last_error),
        ))
    }

    /// Handle a CONNECT request (opaque HTTPS tunnel)
    async fn handle_connect(&self, mut req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let authority = req
            .uri()
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_else(|| req.uri().to_string());

        let (target_host, target_port) = TunnelHandler::parse_authority(&authority)?;
        let target_domain = target_host.to_lowercase();
        let session_id = extract_session_id(req.headers());

        let mut ctx = SelectionContext {
            target_domain: Some(target_domain.clone()),
            session_id: session_id.clone(),
            exclude: HashSet::new(),
        };

        let max_attempts = self.config.max_retries + 1;
        let mut last_error: Option<HazeError> = None;

        for attempt in 1..=max_attempts {
            let Selection { proxy, strategy } = match self.engine.next_proxy(&ctx).await {
                Ok(s) => s,
                Err(HazeError::NoHealthyProxies) => {
                    warn!(domain = %target_domain, "No healthy proxies available for CONNECT");
                    return Ok(error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "No healthy proxies available",
                    ));
                }
                Err(e) => {
                    error!("Proxy selection failed: {}", e);
                    return Ok(error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Proxy selection unavailable",
                    ));
                }
            };

            debug!(
                proxy = %proxy.key(),
                target = %authority,
                attempt,
                max_attempts,
                "Attempting CONNECT through upstream"
            );

            let start = Instant::now();
            let dial = tokio::time::timeout(
                self.config.connect_timeout,
                TunnelHandler::connect_upstream(&proxy.key(), &target_host, target_port),
            )
            .await;

            let mut record = RequestRecord::new("CONNECT", &authority, &target_domain);
            record.proxy_addr = proxy.key();
            record.attempt = attempt as i32;
            record.strategy = strategy.as_str().to_string();
            record.latency_ms = start.elapsed().as_secs_f64() * 1000.0;

            match dial {
                Ok(Ok(upstream)) => {
                    record.status = 200;
                    self.logger.publish(record);

                    info!(
                        proxy = %proxy.key(),
                        target = %authority,
                        "CONNECT tunnel established"
                    );

                    // Splice after the 200 reaches the client and hyper hands
                    // the connection over.
                    let upgrade = hyper::upgrade::on(&mut req);
                    tokio::spawn(async move {
                        match upgrade.await {
                            Ok(upgraded) => {
                                let _ = TunnelHandler::copy_bidirectional(
                                    TokioIo::new(upgraded),
                                    upstream,
                                )
                                .await;
                            }
                            Err(e) => debug!("CONNECT upgrade failed: {}", e),
                        }
                    });

                    return Ok(Response::builder()
                        .status(StatusCode::OK)
                        .body(Full::new(Bytes::new()))
                        .unwrap());
                }
                Ok(Err(e)) => {
                    warn!(proxy = %proxy.key(), attempt, "CONNECT failed: {}", e);
                    record.error = Some(e.to_string());
                    self.logger.publish(record);

                    self.handle_transport_failure(&proxy.ip, proxy.port as u16, strategy, &session_id)
                        .await;
                    ctx.exclude.insert(proxy.key());
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(proxy = %proxy.key(), attempt, "CONNECT timed out");
                    record.error = Some("connect timed out".to_string());
                    self.logger.publish(record);

                    self.handle_transport_failure(&proxy.ip, proxy.port as u16, strategy, &session_id)
                        .await;
                    ctx.exclude.insert(proxy.key());
                    last_error = Some(HazeError::Timeout);
                }
            }
        }

        error!(target = %authority, "All CONNECT attempts failed after {} attempts", max_attempts);

        let last_error = last_error.unwrap_or(HazeError::NoHealthyProxies);
        let status = if matches!(last_error, HazeError::Timeout) {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        Ok(error_response(
            status,
            &format!("Failed to establish tunnel: {}", last_error),
        ))
    }

    /// Forward the buffered request through the upstream proxy in
    /// absolute-URI form and collect the response.
    async fn forward_request(
        &self,
        proxy_addr: &str,
        parts: &http::request::Parts,
        body: Bytes,
    ) -> Result<Response<Bytes>> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            tokio::net::TcpStream::connect(proxy_addr),
        )
        .await
        .map_err(|_| HazeError::Timeout)?
        .map_err(|e| HazeError::UpstreamConnect(format!("Connect failed: {}", e)))?;

        let mut builder = Request::builder()
            .method(parts.method.clone())
            .uri(absolute_uri(&parts.uri)?);

        for (name, value) in &parts.headers {
            if !is_hop_by_hop_header(name.as_str()) && name.as_str() != SESSION_HEADER {
                builder = builder.header(name, value);
            }
        }

        let request = builder
            .body(Full::new(body))
            .map_err(|e| HazeError::InvalidRequest(format!("Failed to build request: {}", e)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HazeError::UpstreamConnect(format!("Handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Upstream connection ended: {}", e);
            }
        });

        let response = tokio::time::timeout(self.config.request_timeout, sender.send_request(request))
            .await
            .map_err(|_| HazeError::Timeout)?
            .map_err(|e| HazeError::UpstreamConnect(format!("Request failed: {}", e)))?;

        let (resp_parts, resp_body) = response.into_parts();
        let body_bytes = tokio::time::timeout(self.config.request_timeout, resp_body.collect())
            .await
            .map_err(|_| HazeError::Timeout)?
            .map_err(|e| HazeError::UpstreamConnect(format!("Failed to read response: {}", e)))?
            .to_bytes();

        Ok(Response::from_parts(resp_parts, body_bytes))
    }

    /// Block verdict: the proxy is done for, and sticky state must let go
    async fn handle_block(
        &self,
        ip: &str,
        port: u16,
        reason: &str,
        strategy: Strategy,
        session_id: &Option<String>,
    ) {
        if let Err(e) = self.pool.mark_dead(ip, port, reason).await {
            warn!("Failed to mark proxy dead: {}", e);
        }
        if strategy == Strategy::OnBlock {
            self.engine.invalidate_pin();
        }
        if strategy == Strategy::PerSession {
            if let Some(id) = session_id {
                self.engine.drop_session(id);
            }
        }
    }

    /// Transport failure: count it, release any session affinity
    async fn handle_transport_failure(
        &self,
        ip: &str,
        port: u16,
        strategy: Strategy,
        session_id: &Option<String>,
    ) {
        if let Err(e) = self.pool.record_failure(ip, port).await {
            warn!("Failed to record proxy failure: {}", e);
        }
        if strategy == Strategy::PerSession {
            if let Some(id) = session_id {
                self.engine.drop_session(id);
            }
        }
    }
}

/// Extract and normalize the client session header
fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Re-validate that the URI is absolute-form for upstream forwarding
fn absolute_uri(uri: &Uri) -> Result<Uri> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        Ok(uri.clone())
    } else {
        Err(HazeError::InvalidRequest(
            "Request target must be an absolute URL".to_string(),
        ))
    }
}

/// First 20 response headers as a JSON object for the request record
fn headers_to_json(headers: &HeaderMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers.iter().take(20) {
        if let Ok(v) = value.to_str() {
            map.insert(name.to_string(), serde_json::Value::String(v.to_string()));
        }
    }
    serde_json::Value::Object(map)
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from(message.to_string())))
        .unwrap()
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers() {
        for name in [
            "Connection",
            "keep-alive",
            "Proxy-Connection",
            "proxy-authorization",
            "TE",
            "trailers",
            "Transfer-Encoding",
            "Upgrade",
        ] {
            assert!(is_hop_by_hop_header(name), "{} should be stripped", name);
        }
        for name in ["Host", "User-Agent", "Accept", "Cookie"] {
            assert!(!is_hop_by_hop_header(name), "{} should be forwarded", name);
        }
    }

    #[test]
    fn test_extract_session_id() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_session_id(&headers), None);

        headers.insert("x-session-id", "  s1  ".parse().unwrap());
        assert_eq!(extract_session_id(&headers), Some("s1".to_string()));

        headers.insert("x-session-id", "".parse().unwrap());
        assert_eq!(extract_session_id(&headers), None);
    }

    #[test]
    fn test_absolute_uri_validation() {
        let abs: Uri = "http://example.test/path?q=1".parse().unwrap();
        assert_eq!(absolute_uri(&abs).unwrap(), abs);

        let origin: Uri = "/path".parse().unwrap();
        assert!(absolute_uri(&origin).is_err());
    }

    #[test]
    fn test_headers_to_json_caps_at_twenty() {
        let mut headers = HeaderMap::new();
        for i in 0..30 {
            headers.insert(
                hyper::header::HeaderName::from_bytes(format!("x-h-{}", i).as_bytes()).unwrap(),
                "v".parse().unwrap(),
            );
        }
        let json = headers_to_json(&headers);
        assert_eq!(json.as_object().unwrap().len(), 20);
    }
}
