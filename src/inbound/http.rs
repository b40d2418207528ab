//! Dual-mode forwarding proxy: plain HTTP relay and CONNECT tunneling

use super::InboundListener;
use crate::common::net::{configure_tcp_stream, copy_bidirectional, Authority};
use crate::dns::Resolver;
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Forwarding proxy listener.
///
/// Holds no cross-connection state besides the listening socket and the
/// shared resolver; every accepted connection is an independent task.
pub struct HttpListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    resolver: Arc<Resolver>,
    running: AtomicBool,
}

impl HttpListener {
    /// Bind the proxy socket. Port 0 lets the OS pick.
    pub async fn bind(addr: SocketAddr, resolver: Arc<Resolver>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("proxy listening on {}", local_addr);
        Ok(HttpListener {
            listener,
            local_addr,
            resolver,
            running: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn handle_connection(resolver: Arc<Resolver>, mut stream: TcpStream, peer_addr: SocketAddr) {
        configure_tcp_stream(&stream);
        if let Err(e) = Self::process_connection(&resolver, &mut stream, peer_addr).await {
            debug!("connection from {} ended with error: {}", peer_addr, e);
        }
    }

    async fn process_connection(
        resolver: &Resolver,
        stream: &mut TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        let mut reader = BufReader::new(stream);

        // Read the request line: METHOD TARGET HTTP/VERSION
        let mut first_line = String::new();
        reader.read_line(&mut first_line).await?;
        let first_line = first_line.trim();

        if first_line.is_empty() {
            return Err(Error::protocol("Empty request"));
        }

        let parts: Vec<&str> = first_line.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(Error::protocol("Invalid HTTP request line"));
        }

        let method = parts[0].to_string();
        let target = parts[1].to_string();

        // Read headers
        let mut headers: Vec<(String, String)> = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            let line = line.trim();

            if line.is_empty() {
                break;
            }

            if let Some(colon_idx) = line.find(':') {
                let key = line[..colon_idx].trim().to_lowercase();
                let value = line[colon_idx + 1..].trim().to_string();
                headers.push((key, value));
            }
        }

        // Bytes past the header block that the reader already pulled in.
        // They belong to the upstream (tunnel head or request body start).
        let head = reader.buffer().to_vec();
        let stream = reader.into_inner();

        if method == "CONNECT" {
            Self::handle_connect(resolver, stream, &target, &head, peer_addr).await
        } else {
            Self::handle_http(resolver, stream, &method, &target, &headers, &head, peer_addr).await
        }
    }

    /// CONNECT path: resolve, dial, announce the tunnel, then relay
    /// byte-for-byte. Failures before the success line close the client
    /// silently; nothing structured can be sent mid-handshake.
    async fn handle_connect(
        resolver: &Resolver,
        stream: &mut TcpStream,
        target: &str,
        head: &[u8],
        peer_addr: SocketAddr,
    ) -> Result<()> {
        let authority = Authority::parse(target, 443)?;

        debug!("CONNECT {} -> {}", peer_addr, authority);

        let ips = resolver.resolve(&authority.host).await;
        let Some(ip) = ips.first() else {
            return Err(Error::dns(format!("No IP found for {}", authority.host)));
        };

        let mut remote = TcpStream::connect((*ip, authority.port))
            .await
            .map_err(|e| Error::connection(format!("Dial {} failed: {}", authority, e)))?;
        configure_tcp_stream(&remote);

        stream
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;

        if !head.is_empty() {
            remote.write_all(head).await?;
        }

        let (sent, received) = copy_bidirectional(stream, &mut remote).await?;
        debug!(
            "CONNECT {} -> {} closed (sent: {}, received: {})",
            peer_addr, authority, sent, received
        );

        Ok(())
    }

    /// Plain-HTTP path: resolve and dial the target authority, replay the
    /// request toward the upstream, then relay until either side closes.
    async fn handle_http(
        resolver: &Resolver,
        stream: &mut TcpStream,
        method: &str,
        target: &str,
        headers: &[(String, String)],
        head: &[u8],
        peer_addr: SocketAddr,
    ) -> Result<()> {
        let (authority, path) = match derive_authority(target, headers) {
            Ok(parsed) => parsed,
            Err(e) => {
                Self::respond_internal_error(stream, &e).await?;
                return Err(e);
            }
        };

        debug!("HTTP {} {} -> {} (from {})", method, path, authority, peer_addr);

        let ips = resolver.resolve(&authority.host).await;
        let Some(ip) = ips.first() else {
            let e = Error::dns(format!("No IP found for {}", authority.host));
            Self::respond_bad_gateway(stream, &e).await?;
            return Err(e);
        };

        let mut remote = match TcpStream::connect((*ip, authority.port)).await {
            Ok(remote) => remote,
            Err(e) => {
                let e = Error::connection(format!("Dial {} failed: {}", authority, e));
                Self::respond_bad_gateway(stream, &e).await?;
                return Err(e);
            }
        };
        configure_tcp_stream(&remote);

        // Replay the request toward the upstream, hop-by-hop headers
        // stripped and the connection pinned to one exchange
        let mut request = format!("{} {} HTTP/1.1\r\n", method, path);
        request.push_str(&format!("Host: {}\r\n", authority));
        for (key, value) in headers {
            if !is_hop_by_hop_header(key) && key != "host" {
                request.push_str(&format!("{}: {}\r\n", key, value));
            }
        }
        request.push_str("Connection: close\r\n\r\n");

        remote.write_all(request.as_bytes()).await?;
        if !head.is_empty() {
            remote.write_all(head).await?;
        }

        let (sent, received) = copy_bidirectional(stream, &mut remote).await?;
        debug!(
            "HTTP {} {} completed (sent: {}, received: {})",
            method, authority, sent, received
        );

        Ok(())
    }

    async fn respond_bad_gateway(stream: &mut TcpStream, e: &Error) -> Result<()> {
        let response = format!(
            "HTTP/1.1 502 Bad Gateway\r\n\
             Content-Type: text/plain\r\n\
             Connection: close\r\n\r\n\
             Connection failed: {}\r\n",
            e
        );
        stream.write_all(response.as_bytes()).await?;
        Ok(())
    }

    async fn respond_internal_error(stream: &mut TcpStream, e: &Error) -> Result<()> {
        let response = format!(
            "HTTP/1.1 500 Internal Server Error\r\n\
             Content-Type: text/plain\r\n\
             Connection: close\r\n\r\n\
             Proxy error: {}\r\n",
            e
        );
        stream.write_all(response.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl InboundListener for HttpListener {
    fn name(&self) -> &str {
        "HTTP"
    }

    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let resolver = self.resolver.clone();
                    tokio::spawn(async move {
                        Self::handle_connection(resolver, stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        error!("proxy accept error: {}", e);
                    }
                }
            }
        }

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Derive the upstream authority and origin-form path from a proxy request
/// target.
///
/// Absolute `http://` URIs carry their own authority; origin-form targets
/// fall back to the `Host` header. A request with neither is a protocol
/// fault. `https://` in absolute form is rejected, encrypted traffic must
/// come in as CONNECT.
fn derive_authority(target: &str, headers: &[(String, String)]) -> Result<(Authority, String)> {
    if let Some(rest) = target.strip_prefix("http://") {
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        return Ok((Authority::parse(authority, 80)?, path.to_string()));
    }

    if target.starts_with("https://") {
        return Err(Error::protocol("HTTPS must use CONNECT method"));
    }

    if target.starts_with('/') {
        let host = headers
            .iter()
            .find(|(k, _)| k == "host")
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| Error::protocol("Origin-form request without Host header"))?;
        return Ok((Authority::parse(host, 80)?, target.to_string()));
    }

    // Authority-form target from a permissive client
    Ok((Authority::parse(target, 80)?, "/".to_string()))
}

/// Check if header is a hop-by-hop header
fn is_hop_by_hop_header(header: &str) -> bool {
    matches!(
        header.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "proxy-connection"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_header(value: &str) -> Vec<(String, String)> {
        vec![("host".to_string(), value.to_string())]
    }

    #[test]
    fn test_derive_authority_absolute_uri() {
        let (auth, path) = derive_authority("http://example.com:8080/a/b?c=d", &[]).unwrap();
        assert_eq!(auth, Authority::new("example.com", 8080));
        assert_eq!(path, "/a/b?c=d");

        let (auth, path) = derive_authority("http://example.com", &[]).unwrap();
        assert_eq!(auth, Authority::new("example.com", 80));
        assert_eq!(path, "/");
    }

    #[test]
    fn test_derive_authority_origin_form() {
        let (auth, path) = derive_authority("/index.html", &host_header("example.com")).unwrap();
        assert_eq!(auth, Authority::new("example.com", 80));
        assert_eq!(path, "/index.html");
    }

    #[test]
    fn test_derive_authority_missing_host() {
        assert!(derive_authority("/index.html", &[]).is_err());
    }

    #[test]
    fn test_derive_authority_rejects_https() {
        assert!(derive_authority("https://example.com/", &[]).is_err());
    }

    #[test]
    fn test_derive_authority_ipv6_host_header() {
        let (auth, _) = derive_authority("/", &host_header("[::1]:8080")).unwrap();
        assert_eq!(auth, Authority::new("::1", 8080));
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("proxy-connection"));
        assert!(!is_hop_by_hop_header("Content-Type"));
    }
}
