mod common;

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use common::{INDEX_HTML, Site, multipart_body, post, site_with};
use webserv::server::Server;
use webserv::server::shutdown::ShutdownHandle;

const TIMEOUTS: &str = "timeouts: { idle_secs: 1, shutdown_grace_secs: 1, cgi_secs: 5 }";

struct StopOnDrop(ShutdownHandle);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

/// Runs the server on a background thread for the duration of `client`.
fn with_server(site: &Site, client: impl FnOnce(SocketAddr)) {
    let server = Server::bind(&site.config).unwrap();
    let addr = server.local_addrs()[0];
    let stop = StopOnDrop(server.shutdown_handle());

    thread::scope(|s| {
        let running = s.spawn(move || server.run());
        {
            let _stop = stop;
            client(addr);
        }
        running.join().unwrap().unwrap();
    });
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

struct Reply {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

fn read_reply(stream: &mut TcpStream, head_only: bool) -> Reply {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before headers");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8(buf[..header_end].to_vec()).unwrap();
    let mut lines = head.split("\r\n");
    let status = lines.next().unwrap().split(' ').nth(1).unwrap().parse().unwrap();
    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(": "))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect();

    let length: usize = headers["content-length"].parse().unwrap();
    let mut body = buf[header_end + 4..].to_vec();
    if !head_only {
        while body.len() < length {
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed inside body");
            body.extend_from_slice(&chunk[..n]);
        }
    }
    Reply { status, headers, body }
}

fn exchange(addr: SocketAddr, raw: &[u8]) -> Reply {
    let mut stream = connect(addr);
    stream.write_all(raw).unwrap();
    read_reply(&mut stream, false)
}

fn assert_closed(stream: &mut TcpStream) {
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(0) => {}
        Ok(_) => panic!("unexpected data"),
        Err(e) => assert_eq!(e.kind(), ErrorKind::ConnectionReset),
    }
}

#[test]
fn test_scenario_a_index() {
    let site = site_with(TIMEOUTS);
    with_server(&site, |addr| {
        let reply = exchange(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");

        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, INDEX_HTML.as_bytes());
        assert_eq!(reply.headers["content-length"], INDEX_HTML.len().to_string());
        assert!(reply.headers.contains_key("server"));
    });
}

#[test]
fn test_scenario_b_upload() {
    let site = site_with(TIMEOUTS);
    let uploads = site.uploads();
    with_server(&site, |addr| {
        let body = multipart_body("----form", "my photo.png", b"\x89PNG\0\0data");
        let raw = post("/upload", "multipart/form-data; boundary=----form", &body);
        let reply = exchange(addr, &raw);

        assert_eq!(reply.status, 201);
        assert_eq!(reply.headers["location"], "/upload/my_photo.png");
    });
    assert_eq!(
        std::fs::read(uploads.join("my_photo.png")).unwrap(),
        b"\x89PNG\0\0data"
    );
}

#[test]
fn test_scenario_c_delete_missing() {
    let site = site_with(TIMEOUTS);
    with_server(&site, |addr| {
        let reply = exchange(addr, b"DELETE /uploads/x.txt HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(reply.status, 404);
    });
}

#[test]
fn test_scenario_d_cgi_status() {
    let site = site_with(TIMEOUTS);
    with_server(&site, |addr| {
        let reply = exchange(addr, b"GET /cgi-bin/status.sh HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(reply.status, 404);
        assert_eq!(reply.body, b"Not found");
    });
}

#[test]
fn test_scenario_e_options() {
    let site = site_with(TIMEOUTS);
    with_server(&site, |addr| {
        let reply = exchange(addr, b"OPTIONS /admin HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(reply.status, 200);
        assert_eq!(reply.headers["allow"], "GET");
        assert!(reply.body.is_empty());
    });
}

#[test]
fn test_scenario_f_idle_client_is_disconnected() {
    let site = site_with(TIMEOUTS);
    with_server(&site, |addr| {
        let mut stream = connect(addr);
        let start = Instant::now();

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).unwrap();

        assert_eq!(n, 0, "no response may be written to an idle client");
        assert!(start.elapsed() >= Duration::from_millis(900));
        assert!(start.elapsed() < Duration::from_secs(4));
    });
}

#[test]
fn test_keep_alive_reuses_connection() {
    let site = site_with(TIMEOUTS);
    with_server(&site, |addr| {
        let mut stream = connect(addr);

        stream
            .write_all(b"GET /files/a.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let first = read_reply(&mut stream, false);
        assert_eq!(first.status, 200);
        assert_eq!(first.headers["connection"], "keep-alive");

        stream
            .write_all(b"HEAD / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let second = read_reply(&mut stream, true);
        assert_eq!(second.status, 200);
        assert!(second.body.is_empty());
        assert_eq!(second.headers["content-length"], INDEX_HTML.len().to_string());

        stream
            .write_all(b"GET /files/a.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let third = read_reply(&mut stream, false);
        assert_eq!(third.body, b"alpha");
        assert_eq!(third.headers["connection"], "close");
        assert_closed(&mut stream);
    });
}

#[test]
fn test_chunked_upload_over_the_wire() {
    let site = site_with(TIMEOUTS);
    let uploads = site.uploads();
    with_server(&site, |addr| {
        let mut stream = connect(addr);
        stream
            .write_all(b"PUT /upload/chunked.txt HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n")
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        stream.write_all(b"6\r\n world\r\n0\r\n\r\n").unwrap();

        let reply = read_reply(&mut stream, false);
        assert_eq!(reply.status, 201);
    });
    assert_eq!(std::fs::read(uploads.join("chunked.txt")).unwrap(), b"hello world");
}

#[test]
fn test_oversized_header_block_closes_connection() {
    let site = site_with(&format!("{TIMEOUTS}\nlimits: {{ max_header_block: 512 }}"));
    with_server(&site, |addr| {
        let mut stream = connect(addr);
        let mut raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n".to_vec();
        for i in 0..20 {
            raw.extend_from_slice(format!("X-Filler-{i}: {}\r\n", "z".repeat(40)).as_bytes());
        }
        raw.extend_from_slice(b"\r\n");
        stream.write_all(&raw).unwrap();

        let reply = read_reply(&mut stream, false);
        assert_eq!(reply.status, 431);
        assert_eq!(reply.headers["connection"], "close");
        assert_closed(&mut stream);
    });
}

#[test]
fn test_body_over_route_limit() {
    let site = site_with(TIMEOUTS);
    with_server(&site, |addr| {
        let reply = exchange(addr, &post("/small", "text/plain", b"too long"));
        assert_eq!(reply.status, 413);
        assert_eq!(reply.headers["connection"], "keep-alive");
    });
}

#[test]
fn test_malformed_request_line() {
    let site = site_with(TIMEOUTS);
    with_server(&site, |addr| {
        let reply = exchange(addr, b"NONSENSE\r\n\r\n");
        assert_eq!(reply.status, 400);
        assert_eq!(reply.headers["connection"], "close");
    });
}
