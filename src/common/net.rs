//! Network utilities

use crate::{Error, Result};
use socket2::SockRef;
use std::fmt;
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// A target authority: host plus port.
///
/// The host may be a domain name or an IP literal. Bracketed IPv6 literals
/// (`[::1]:443`) are accepted and stored without brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    pub host: String,
    pub port: u16,
}

impl Authority {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Authority {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`, falling back to
    /// `default_port` when no port is given.
    pub fn parse(s: &str, default_port: u16) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::parse("Empty authority"));
        }

        // Bracketed IPv6 literal
        if let Some(rest) = s.strip_prefix('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| Error::parse("Unterminated IPv6 literal"))?;
            let host = &rest[..end];
            host.parse::<IpAddr>()
                .map_err(|_| Error::parse(format!("Invalid IPv6 literal: {}", host)))?;
            let tail = &rest[end + 1..];
            let port = if let Some(p) = tail.strip_prefix(':') {
                p.parse()
                    .map_err(|_| Error::parse(format!("Invalid port: {}", p)))?
            } else if tail.is_empty() {
                default_port
            } else {
                return Err(Error::parse(format!("Trailing garbage in authority: {}", s)));
            };
            return Ok(Authority::new(host, port));
        }

        // An unbracketed string with more than one colon is a bare IPv6
        // literal without a port.
        if s.matches(':').count() > 1 {
            s.parse::<IpAddr>()
                .map_err(|_| Error::parse(format!("Invalid authority: {}", s)))?;
            return Ok(Authority::new(s, default_port));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| Error::parse(format!("Invalid port: {}", port)))?;
                Ok(Authority::new(host, port))
            }
            None => Ok(Authority::new(s, default_port)),
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Copy data between two streams bidirectionally until either side closes
/// or errors. Returns (client-to-upstream, upstream-to-client) byte counts.
pub async fn copy_bidirectional<A, B>(a: &mut A, b: &mut B) -> Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (sent, received) = tokio::io::copy_bidirectional(a, b).await?;
    Ok((sent, received))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let auth = Authority::parse("example.com:8443", 80).unwrap();
        assert_eq!(auth.host, "example.com");
        assert_eq!(auth.port, 8443);
    }

    #[test]
    fn test_parse_default_port() {
        let auth = Authority::parse("example.com", 80).unwrap();
        assert_eq!(auth.host, "example.com");
        assert_eq!(auth.port, 80);
    }

    #[test]
    fn test_parse_ipv6_bracketed() {
        let auth = Authority::parse("[::1]:9443", 443).unwrap();
        assert_eq!(auth.host, "::1");
        assert_eq!(auth.port, 9443);

        let auth = Authority::parse("[2001:db8::1]", 443).unwrap();
        assert_eq!(auth.host, "2001:db8::1");
        assert_eq!(auth.port, 443);
    }

    #[test]
    fn test_parse_ipv6_bare() {
        let auth = Authority::parse("::1", 443).unwrap();
        assert_eq!(auth.host, "::1");
        assert_eq!(auth.port, 443);
    }

    #[test]
    fn test_parse_invalid_port() {
        assert!(Authority::parse("example.com:http", 80).is_err());
        assert!(Authority::parse("", 80).is_err());
    }

    #[test]
    fn test_display_brackets_ipv6() {
        let auth = Authority::new("::1", 443);
        assert_eq!(auth.to_string(), "[::1]:443");

        let auth = Authority::new("example.com", 80);
        assert_eq!(auth.to_string(), "example.com:80");
    }
}
