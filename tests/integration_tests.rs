//! End-to-end tests for the forwarding proxy
//!
//! Every upstream here is a local socket and every hostname is an IP
//! literal or an unresolvable name, so nothing depends on outside
//! network access.

use dohgate::dns::Resolver;
use dohgate::inbound::{HttpListener, InboundListener};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A resolver whose DoH endpoint is unreachable; IP literals still pass
/// through and anything else falls back to the system resolver.
fn literal_only_resolver() -> Arc<Resolver> {
    Arc::new(Resolver::new("https://127.0.0.1:9/resolve", Duration::from_millis(500)).unwrap())
}

/// Start the proxy on an ephemeral loopback port and return its address.
async fn start_proxy(resolver: Arc<Resolver>) -> SocketAddr {
    let listener = Arc::new(
        HttpListener::bind("127.0.0.1:0".parse().unwrap(), resolver)
            .await
            .unwrap(),
    );
    let addr = listener.local_addr();
    tokio::spawn(async move { listener.start().await });
    addr
}

/// One-shot HTTP upstream: reads a full request head, then answers with a
/// fixed 200 response and closes.
async fn start_http_upstream(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            if stream.read_exact(&mut byte).await.is_err() {
                return;
            }
            buf.push(byte[0]);
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    });

    addr
}

/// One-shot byte echo upstream for tunnel tests.
async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (mut read_half, mut write_half) = stream.split();
        let _ = tokio::io::copy(&mut read_half, &mut write_half).await;
    });

    addr
}

#[tokio::test]
async fn test_plain_http_pass_through() {
    let upstream = start_http_upstream("hello from upstream").await;
    let proxy = start_proxy(literal_only_resolver()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let request = format!(
        "GET http://{}/hello HTTP/1.1\r\nHost: {}\r\nAccept: */*\r\n\r\n",
        upstream, upstream
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, client.read_to_end(&mut response))
        .await
        .expect("proxy hung")
        .unwrap();

    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK"), "got: {}", response);
    assert!(response.ends_with("hello from upstream"), "got: {}", response);
}

#[tokio::test]
async fn test_connect_tunnel_fidelity() {
    let upstream = start_echo_upstream().await;
    let proxy = start_proxy(literal_only_resolver()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", upstream, upstream);
    client.write_all(request.as_bytes()).await.unwrap();

    // The success line is a fixed literal
    let expected = b"HTTP/1.1 200 Connection Established\r\n\r\n";
    let mut established = vec![0u8; expected.len()];
    tokio::time::timeout(TEST_TIMEOUT, client.read_exact(&mut established))
        .await
        .expect("no tunnel established")
        .unwrap();
    assert_eq!(&established, expected);

    // Arbitrary bytes must cross the tunnel unmodified, both directions
    let payload: Vec<u8> = (0u8..=255).collect();
    client.write_all(&payload).await.unwrap();
    client.shutdown().await.unwrap();

    let mut echoed = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, client.read_to_end(&mut echoed))
        .await
        .expect("tunnel hung")
        .unwrap();
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn test_connect_head_bytes_reach_upstream() {
    let upstream = start_echo_upstream().await;
    let proxy = start_proxy(literal_only_resolver()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    // Head bytes arrive in the same packet as the CONNECT request; they
    // belong to the upstream once the tunnel is up
    let request = format!("CONNECT {} HTTP/1.1\r\n\r\nearly-bytes", upstream);
    client.write_all(request.as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, client.read_to_end(&mut response))
        .await
        .expect("tunnel hung")
        .unwrap();

    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200 Connection Established\r\n\r\n"));
    assert!(response.ends_with("early-bytes"), "got: {}", response);
}

#[tokio::test]
async fn test_unresolvable_host_yields_502() {
    let proxy = start_proxy(literal_only_resolver()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let request = "GET http://no-such-host.invalid/ HTTP/1.1\r\nHost: no-such-host.invalid\r\n\r\n";
    client.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, client.read_to_end(&mut response))
        .await
        .expect("proxy hung on unresolvable host")
        .unwrap();

    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 502"), "got: {}", response);
}

#[tokio::test]
async fn test_unresolvable_connect_closes_without_response() {
    let proxy = start_proxy(literal_only_resolver()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let request = "CONNECT no-such-host.invalid:443 HTTP/1.1\r\n\r\n";
    client.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, client.read_to_end(&mut response))
        .await
        .expect("proxy hung on unresolvable CONNECT")
        .unwrap();

    assert!(response.is_empty(), "expected silent close, got: {:?}", response);
}

#[tokio::test]
async fn test_upstream_dial_failure_yields_502() {
    let proxy = start_proxy(literal_only_resolver()).await;

    // Bind-then-drop gives a port nothing is listening on
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let request = format!(
        "GET http://127.0.0.1:{}/ HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n",
        dead_port, dead_port
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, client.read_to_end(&mut response))
        .await
        .expect("proxy hung on dead upstream")
        .unwrap();

    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 502"), "got: {}", response);
}

#[tokio::test]
async fn test_origin_form_without_host_yields_500() {
    let proxy = start_proxy(literal_only_resolver()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(b"GET /index.html HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, client.read_to_end(&mut response))
        .await
        .expect("proxy hung")
        .unwrap();

    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 500"), "got: {}", response);
}

#[tokio::test]
async fn test_both_resolution_paths_fail_returns_empty() {
    let resolver = literal_only_resolver();
    let ips = tokio::time::timeout(TEST_TIMEOUT, resolver.resolve("no-such-host.invalid"))
        .await
        .expect("resolve hung");
    assert!(ips.is_empty());
}

#[tokio::test]
async fn test_listener_stop_flips_running() {
    let listener = Arc::new(
        HttpListener::bind("127.0.0.1:0".parse().unwrap(), literal_only_resolver())
            .await
            .unwrap(),
    );

    assert!(!listener.is_running());
    let task = {
        let listener = listener.clone();
        tokio::spawn(async move { listener.start().await })
    };

    // Give the accept loop a moment to come up
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(listener.is_running());

    listener.stop().await.unwrap();
    assert!(!listener.is_running());
    task.abort();
}
