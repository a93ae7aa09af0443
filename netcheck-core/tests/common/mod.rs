//! Local stand-in for the public probe and speed test services

#![allow(dead_code)]

use netcheck_core::NetcheckSettings;
use netcheck_core::network_analyzer::ProbeEndpoints;
use netcheck_core::settings::Endpoints;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

pub const FAKE_IP: &str = "203.0.113.7";

/// Serves on an ephemeral port until dropped.
///
/// Routes:
/// - `GET /ip`: `{"ip": FAKE_IP}`
/// - `GET /status/<code>`: empty body with that status
/// - `GET /__down?bytes=N`: N bytes, as fast as possible
/// - `GET /slow/__down?bytes=N`: N bytes, trickled
/// - `GET /mixed/__down?bytes=N`: like `/__down` for even N, 500 for odd N
/// - `POST /__up`: reads the body, 200
/// - `GET /broken/__down`, `POST /broken/__up`: 500
pub struct FakeServer {
    addr: SocketAddr,
    server: Arc<Server>,
    counters: Arc<Counters>,
    handle: Option<thread::JoinHandle<()>>,
}

#[derive(Default)]
struct Counters {
    uploaded: AtomicU64,
    trickled: AtomicU64,
}

impl FakeServer {
    pub fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let counters = Arc::new(Counters::default());

        let handle = {
            let server = Arc::clone(&server);
            let counters = Arc::clone(&counters);
            thread::spawn(move || {
                for request in server.incoming_requests() {
                    let counters = Arc::clone(&counters);
                    thread::spawn(move || serve(request, counters));
                }
            })
        };

        Self {
            addr,
            server,
            counters,
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Bytes received on the upload route so far
    pub fn uploaded(&self) -> u64 {
        self.counters.uploaded.load(Ordering::Relaxed)
    }

    /// Bytes the slow route has produced so far, across all requests
    pub fn trickled(&self) -> u64 {
        self.counters.trickled.load(Ordering::Relaxed)
    }

    /// Settings pointing every endpoint at this server
    pub fn settings(&self) -> NetcheckSettings {
        let mut settings = NetcheckSettings::default();
        settings.endpoints = Endpoints {
            probes: ProbeEndpoints {
                ip_lookup_url: self.url("/ip"),
                httpbin_ping_url: self.url("/status/200"),
                cloudflare_ping_url: self.url("/__down?bytes=1"),
            },
            download_url: self.url("/__down"),
            upload_url: self.url("/__up"),
        };
        settings.request_timeout_secs = 5;
        settings.latency_samples = 3;
        settings.download.total_bytes = 2_000_000;
        settings.download.hard_timeout_ms = 10_000;
        settings.download.stability = None;
        settings.upload.total_bytes = 1_000_000;
        settings.upload.hard_timeout_ms = 10_000;
        settings.upload.stability = None;
        settings
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(mut request: Request, counters: Arc<Counters>) {
    let url = request.url().to_string();
    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
    let method = request.method().clone();

    match (&method, path) {
        (Method::Get, "/ip") => {
            let body = format!(r#"{{"ip":"{}"}}"#, FAKE_IP);
            let header = Header::from_bytes("Content-Type", "application/json").unwrap();
            let _ = request.respond(Response::from_string(body).with_header(header));
        }
        (Method::Get, "/mixed/__down") if requested_bytes(query) % 2 == 1 => {
            let _ = request.respond(Response::empty(500));
        }
        (Method::Get, "/__down") | (Method::Get, "/mixed/__down") => {
            let bytes = requested_bytes(query);
            let body = io::repeat(0).take(bytes);
            let _ = request.respond(Response::new(
                StatusCode(200),
                Vec::new(),
                body,
                Some(bytes as usize),
                None,
            ));
        }
        (Method::Get, "/slow/__down") => {
            let bytes = requested_bytes(query);
            let body = SlowReader {
                remaining: bytes,
                counters: Arc::clone(&counters),
            };
            let _ = request.respond(Response::new(
                StatusCode(200),
                Vec::new(),
                body,
                Some(bytes as usize),
                None,
            ));
        }
        (Method::Post, "/__up") => {
            let mut buf = [0u8; 16 * 1024];
            let reader = request.as_reader();
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        counters.uploaded.fetch_add(n as u64, Ordering::Relaxed);
                    }
                }
            }
            let _ = request.respond(Response::empty(200));
        }
        (_, path) if path.starts_with("/status/") => {
            let code = path["/status/".len()..].parse::<u16>().unwrap_or(404);
            let _ = request.respond(Response::empty(code));
        }
        _ => {
            let code: u16 = if path.starts_with("/broken/") { 500 } else { 404 };
            let _ = request.respond(Response::empty(code));
        }
    }
}

fn requested_bytes(query: &str) -> u64 {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "bytes")
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0)
}

/// Yields 1 KB every 20ms
struct SlowReader {
    remaining: u64,
    counters: Arc<Counters>,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        thread::sleep(Duration::from_millis(20));
        let n = buf.len().min(1024).min(self.remaining as usize);
        buf[..n].fill(0);
        self.remaining -= n as u64;
        self.counters.trickled.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Raw download server whose odd-sized responses break off halfway.
///
/// `GET /__down?bytes=N` with odd N announces N bytes, sends N / 2 and closes
/// the socket. Even N is trickled like the slow route. tiny_http always
/// finishes the bodies it starts, so this one speaks HTTP by hand.
pub struct TruncatingServer {
    addr: SocketAddr,
}

impl TruncatingServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        thread::spawn(move || serve_truncating(stream));
                    }
                    Err(_) => break,
                }
            }
        });

        Self { addr }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

fn serve_truncating(mut stream: TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }

    let head = String::from_utf8_lossy(&head);
    let target = head.split_whitespace().nth(1).unwrap_or("");
    let query = target.split_once('?').map_or("", |(_, q)| q);
    let bytes = requested_bytes(query);

    let status = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        bytes
    );
    if stream.write_all(status.as_bytes()).is_err() {
        return;
    }

    if bytes % 2 == 1 {
        let _ = stream.write_all(&vec![0u8; (bytes / 2) as usize]);
        let _ = stream.flush();
        let _ = stream.shutdown(Shutdown::Both);
        return;
    }

    let chunk = [0u8; 1024];
    let mut remaining = bytes;
    while remaining > 0 {
        thread::sleep(Duration::from_millis(20));
        let n = remaining.min(chunk.len() as u64) as usize;
        if stream.write_all(&chunk[..n]).is_err() {
            return;
        }
        remaining -= n as u64;
    }
}
