//! End-to-end gateway scenarios over loopback
//!
//! Each test wires the real listeners against an in-process upstream SOCKS5
//! proxy and an echo server, then speaks the downstream protocols byte by
//! byte.

use proxypool_rust::config::Config;
use proxypool_rust::hub::LogChannel;
use proxypool_rust::inbound::GatewayService;
use proxypool_rust::pool::{Anonymity, PoolEntry, Protocol, ProxyPool, Status};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn working_entry(address: &str, protocol: Protocol, score: f64) -> PoolEntry {
    PoolEntry {
        address: address.to_string(),
        protocol,
        latency: 0.1,
        speed: 0.0,
        anonymity: Anonymity::Elite,
        location: "US".to_string(),
        score,
        status: Status::Working,
        consecutive_failures: 0,
    }
}

/// Echo server: writes back whatever it reads.
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Minimal no-auth SOCKS5 server that dials the requested target directly.
async fn spawn_socks5_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut head = [0u8; 2];
                stream.read_exact(&mut head).await.unwrap();
                let mut methods = vec![0u8; head[1] as usize];
                stream.read_exact(&mut methods).await.unwrap();
                stream.write_all(&[0x05, 0x00]).await.unwrap();

                let mut request = [0u8; 4];
                stream.read_exact(&mut request).await.unwrap();
                assert_eq!(request[1], 0x01, "upstream only handles CONNECT");
                let host = match request[3] {
                    0x01 => {
                        let mut ip = [0u8; 4];
                        stream.read_exact(&mut ip).await.unwrap();
                        Ipv4Addr::from(ip).to_string()
                    }
                    0x03 => {
                        let mut len = [0u8; 1];
                        stream.read_exact(&mut len).await.unwrap();
                        let mut domain = vec![0u8; len[0] as usize];
                        stream.read_exact(&mut domain).await.unwrap();
                        String::from_utf8(domain).unwrap()
                    }
                    _ => return,
                };
                let mut port = [0u8; 2];
                stream.read_exact(&mut port).await.unwrap();
                let port = u16::from_be_bytes(port);

                let mut target = TcpStream::connect((host.as_str(), port)).await.unwrap();
                stream
                    .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                    .await
                    .unwrap();
                let _ = tokio::io::copy_bidirectional(&mut stream, &mut target).await;
            });
        }
    });
    addr
}

/// Start both listeners on ephemeral ports and wait for them to bind.
async fn start_gateway() -> (Arc<GatewayService>, Arc<ProxyPool>, SocketAddr, SocketAddr) {
    let mut config = Config::default();
    config.http.listen = "127.0.0.1:0".to_string();
    config.socks5.listen = "127.0.0.1:0".to_string();
    config.external_controller = None;

    let pool = Arc::new(ProxyPool::new());
    let service = Arc::new(GatewayService::new(&config, pool.clone(), LogChannel::new()));
    service.start_all();

    let http_addr = wait_for_bind(|| service.http().local_addr()).await;
    let socks_addr = wait_for_bind(|| service.socks5().local_addr()).await;
    (service, pool, http_addr, socks_addr)
}

async fn wait_for_bind(addr: impl Fn() -> Option<SocketAddr>) -> SocketAddr {
    for _ in 0..200 {
        if let Some(addr) = addr() {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener did not bind in time");
}

#[tokio::test]
async fn test_http_connect_happy_path() {
    let echo = spawn_echo_server().await;
    let upstream = spawn_socks5_upstream().await;
    let (_service, pool, http_addr, _) = start_gateway().await;
    pool.add(working_entry(&upstream.to_string(), Protocol::Socks5, 90.0));

    let mut client = TcpStream::connect(http_addr).await.unwrap();
    client
        .write_all(format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", echo.port()).as_bytes())
        .await
        .unwrap();

    let mut response = [0u8; 39];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(&response[..], b"HTTP/1.1 200 Connection Established\r\n\r\n");

    // Bytes written after the tunnel is up arrive verbatim at the target.
    client.write_all(b"hello through the tunnel").await.unwrap();
    let mut echoed = [0u8; 24];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed[..], b"hello through the tunnel");
}

#[tokio::test]
async fn test_http_absolute_uri_forwarded_verbatim() {
    let echo = spawn_echo_server().await;
    let upstream = spawn_socks5_upstream().await;
    let (_service, pool, http_addr, _) = start_gateway().await;
    pool.add(working_entry(&upstream.to_string(), Protocol::Socks5, 90.0));

    let request = format!(
        "GET http://127.0.0.1:{}/path HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        echo.port()
    );
    let mut client = TcpStream::connect(http_addr).await.unwrap();
    client.write_all(request.as_bytes()).await.unwrap();

    // The echo target reflects the request, proving no header mangling.
    let mut echoed = vec![0u8; request.len()];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, request.as_bytes());
}

#[tokio::test]
async fn test_socks5_domain_connect() {
    let echo = spawn_echo_server().await;
    let upstream = spawn_socks5_upstream().await;
    let (_service, pool, _, socks_addr) = start_gateway().await;
    pool.add(working_entry(&upstream.to_string(), Protocol::Socks5, 90.0));

    let mut client = TcpStream::connect(socks_addr).await.unwrap();

    // Greeting: no-auth.
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut selection = [0u8; 2];
    client.read_exact(&mut selection).await.unwrap();
    assert_eq!(selection, [0x05, 0x00]);

    // CONNECT localhost:<echo port> by domain.
    let domain = b"localhost";
    let mut request = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
    request.extend_from_slice(domain);
    request.extend_from_slice(&echo.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    client.write_all(b"socks payload").await.unwrap();
    let mut echoed = [0u8; 13];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed[..], b"socks payload");
}

#[tokio::test]
async fn test_empty_pool_http_replies_502() {
    let (_service, _pool, http_addr, _) = start_gateway().await;

    let mut client = TcpStream::connect(http_addr).await.unwrap();
    client
        .write_all(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let mut response = [0u8; 28];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(&response[..], b"HTTP/1.1 502 Bad Gateway\r\n\r\n");
}

#[tokio::test]
async fn test_empty_pool_socks5_replies_host_unreachable() {
    let (_service, _pool, _, socks_addr) = start_gateway().await;

    let mut client = TcpStream::connect(socks_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut selection = [0u8; 2];
    client.read_exact(&mut selection).await.unwrap();

    let mut request = vec![0x05, 0x01, 0x00, 0x03, 0x0B];
    request.extend_from_slice(b"example.com");
    request.extend_from_slice(&443u16.to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
}

#[tokio::test]
async fn test_socks5_rejects_ipv6_and_foreign_commands() {
    let (_service, _pool, _, socks_addr) = start_gateway().await;

    // ATYP 4 (IPv6) is answered with reply code 08.
    let mut client = TcpStream::connect(socks_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut selection = [0u8; 2];
    client.read_exact(&mut selection).await.unwrap();
    client
        .write_all(&[0x05, 0x01, 0x00, 0x04])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..2], &[0x05, 0x08]);

    // So is BIND.
    let mut client = TcpStream::connect(socks_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    client.read_exact(&mut selection).await.unwrap();
    client
        .write_all(&[0x05, 0x02, 0x00, 0x01, 0, 0, 0, 0, 0, 80])
        .await
        .unwrap();
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..2], &[0x05, 0x08]);
}

#[tokio::test]
async fn test_failed_upstream_is_demoted() {
    // Points at a closed port, so the dial fails and the entry is reported.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let (_service, pool, http_addr, _) = start_gateway().await;
    pool.add(working_entry(&dead_addr.to_string(), Protocol::Socks5, 90.0));

    let mut client = TcpStream::connect(http_addr).await.unwrap();
    client
        .write_all(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let mut response = [0u8; 28];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(&response[..], b"HTTP/1.1 502 Bad Gateway\r\n\r\n");

    assert_eq!(pool.active_count(), 0);
}

// Pool rotation scenarios, end to end against the public pool API.

#[test]
fn test_scenario_round_robin_order() {
    let pool = ProxyPool::new();
    pool.add(working_entry("a:1", Protocol::Socks5, 90.0));
    pool.add(working_entry("b:1", Protocol::Socks5, 50.0));
    pool.add(working_entry("c:1", Protocol::Socks5, 70.0));

    let order: Vec<String> = (0..6).filter_map(|_| pool.next()).map(|e| e.address).collect();
    assert_eq!(order, vec!["a:1", "c:1", "b:1", "a:1", "c:1", "b:1"]);
}

#[test]
fn test_scenario_failure_demotion() {
    let pool = ProxyPool::new();
    pool.add(working_entry("a:1", Protocol::Socks5, 90.0));
    pool.add(working_entry("b:1", Protocol::Socks5, 50.0));
    pool.add(working_entry("c:1", Protocol::Socks5, 70.0));

    pool.report_failure("a:1");
    assert_eq!(pool.next().map(|e| e.address).as_deref(), Some("c:1"));
    assert_eq!(pool.active_count(), 2);
}

#[test]
fn test_scenario_filter_fallback() {
    let pool = ProxyPool::new();
    let mut entry = working_entry("x:1", Protocol::Socks5, 40.0);
    entry.location = "JP".to_string();
    entry.latency = 0.5;
    pool.add(entry);

    pool.set_filter("US".to_string(), Some(200));
    assert_eq!(pool.next().map(|e| e.address).as_deref(), Some("x:1"));

    let filter = pool.filter();
    assert_eq!(filter.region, "US");
    assert_eq!(filter.max_latency_ms, Some(200));
}
