//! CONNECT tunnel plumbing
//!
//! Establishes a tunnel through an upstream HTTP proxy and splices bytes
//! between the client and the upstream until either side closes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::{HazeError, Result};

/// Handles CONNECT tunnel establishment and relaying
pub struct TunnelHandler;

impl TunnelHandler {
    /// Open a tunnel to `target_host:target_port` through the upstream proxy
    /// at `proxy_addr`. Sends `CONNECT` and verifies the upstream's 200.
    #[instrument(skip_all, fields(proxy = %proxy_addr, target = %target_host))]
    pub async fn connect_upstream(
        proxy_addr: &str,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(proxy_addr)
            .await
            .map_err(|e| HazeError::UpstreamConnect(format!("TCP connect failed: {}", e)))?;

        let connect_request = format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
            host = target_host,
            port = target_port
        );

        stream
            .write_all(connect_request.as_bytes())
            .await
            .map_err(|e| HazeError::UpstreamConnect(format!("Failed to send CONNECT: {}", e)))?;

        // Read the upstream's response head (status line + headers)
        let mut response = Vec::with_capacity(256);
        let mut buf = [0u8; 512];
        loop {
            let n = stream.read(&mut buf).await.map_err(|e| {
                HazeError::UpstreamConnect(format!("Failed to read CONNECT response: {}", e))
            })?;
            if n == 0 {
                return Err(HazeError::UpstreamConnect(
                    "Upstream closed during CONNECT".to_string(),
                ));
            }
            response.extend_from_slice(&buf[..n]);
            if response.windows(4).any(|w| w == b"\r\n\r\n") || response.len() > 4096 {
                break;
            }
        }

        let head = String::from_utf8_lossy(&response);
        let status_line = head.lines().next().unwrap_or("");
        if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
            return Err(HazeError::Tunnel(format!(
                "CONNECT refused: {}",
                if status_line.is_empty() {
                    "empty response"
                } else {
                    status_line
                }
            )));
        }

        debug!("CONNECT tunnel established");
        Ok(stream)
    }

    /// Copy data bidirectionally between two streams
    pub async fn copy_bidirectional<C, S>(client: C, upstream: S) -> Result<(u64, u64)>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

        let client_to_upstream = async {
            let result = tokio::io::copy(&mut client_read, &mut upstream_write).await;
            let _ = upstream_write.shutdown().await;
            result
        };

        let upstream_to_client = async {
            let result = tokio::io::copy(&mut upstream_read, &mut client_write).await;
            let _ = client_write.shutdown().await;
            result
        };

        let (sent, received) = tokio::join!(client_to_upstream, upstream_to_client);

        let bytes_sent = sent.unwrap_or_else(|e| {
            debug!("Client to upstream copy ended: {}", e);
            0
        });

        let bytes_received = received.unwrap_or_else(|e| {
            debug!("Upstream to client copy ended: {}", e);
            0
        });

        debug!(
            bytes_sent = bytes_sent,
            bytes_received = bytes_received,
            "Tunnel closed"
        );

        Ok((bytes_sent, bytes_received))
    }

    /// Parse `host:port` from a CONNECT request target; the port defaults to
    /// 443 when absent.
    pub fn parse_authority(authority: &str) -> Result<(String, u16)> {
        if let Some((host, port_str)) = authority.rsplit_once(':') {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| HazeError::InvalidRequest("Invalid port".to_string()))?;
            Ok((host.to_string(), port))
        } else {
            Ok((authority.to_string(), 443))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_parse_authority() {
        assert_eq!(
            TunnelHandler::parse_authority("example.com:443").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(
            TunnelHandler::parse_authority("example.com:8443").unwrap(),
            ("example.com".to_string(), 8443)
        );
        assert_eq!(
            TunnelHandler::parse_authority("example.com").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert!(TunnelHandler::parse_authority("example.com:notaport").is_err());
    }

    #[tokio::test]
    async fn test_copy_bidirectional() {
        let (client, mut client_side) = tokio::io::duplex(1024);
        let (mut upstream_side, upstream) = tokio::io::duplex(1024);

        let copy_handle =
            tokio::spawn(async move { TunnelHandler::copy_bidirectional(client, upstream).await });

        client_side.write_all(b"hello from client").await.unwrap();
        client_side.shutdown().await.unwrap();

        upstream_side.write_all(b"hello from upstream").await.unwrap();
        upstream_side.shutdown().await.unwrap();

        let mut buf = vec![0u8; 100];
        let n = upstream_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello from client");

        let mut buf = vec![0u8; 100];
        let n = client_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello from upstream");

        let result = tokio::time::timeout(Duration::from_secs(1), copy_handle)
            .await
            .expect("copy_bidirectional timed out")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connect_upstream_established() {
        // Stub upstream proxy: accept one CONNECT and acknowledge it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();

            let mut buf = vec![0u8; 1024];
            let n = client.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();

            client
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await
                .unwrap();

            // Echo one chunk through the established tunnel
            let n = client.read(&mut buf).await.unwrap();
            client.write_all(&buf[..n]).await.unwrap();

            request
        });

        let mut stream =
            TunnelHandler::connect_upstream(&proxy_addr.to_string(), "example.com", 443)
                .await
                .unwrap();

        stream.write_all(b"ping").await.unwrap();
        let mut out = [0u8; 4];
        timeout(Duration::from_secs(1), stream.read_exact(&mut out))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&out, b"ping");

        let request = proxy_task.await.unwrap();
        assert!(request.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(request.contains("Host: example.com:443\r\n"));
    }

    #[tokio::test]
    async fn test_connect_upstream_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = client.read(&mut buf).await.unwrap();
            client
                .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
                .await
                .unwrap();
        });

        let err = TunnelHandler::connect_upstream(&proxy_addr.to_string(), "example.com", 443)
            .await
            .unwrap_err();
        assert!(matches!(err, HazeError::Tunnel(_)));
    }

    #[tokio::test]
    async fn test_connect_upstream_closed_mid_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hang up without answering the CONNECT
            let (client, _) = listener.accept().await.unwrap();
            drop(client);
        });

        let err = TunnelHandler::connect_upstream(&proxy_addr.to_string(), "example.com", 443)
            .await
            .unwrap_err();
        assert!(matches!(err, HazeError::UpstreamConnect(_)));
    }
}
