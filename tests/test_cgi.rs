mod common;

use std::time::{Duration, Instant};

use common::{peer, post, request, site, site_with};
use webserv::cgi::{CgiExecutor, InterpreterTable};
use webserv::http::response::StatusCode;
use webserv::router::Router;

#[test]
fn test_status_header_overrides_code() {
    let site = site();
    let router = Router::new(&site.config).unwrap();
    let server = &site.config.servers[0];

    let req = request(b"GET /cgi-bin/status.sh HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let resp = router.route(server, &req, peer());

    assert_eq!(resp.status, StatusCode::NotFound);
    assert_eq!(resp.body, b"Not found");
}

#[test]
fn test_environment_and_stdin() {
    let site = site();
    let router = Router::new(&site.config).unwrap();
    let server = &site.config.servers[0];

    let req = request(&post("/cgi-bin/echo.sh/more/info?ignored", "text/plain", b"body bytes"));
    let resp = router.route(server, &req, peer());

    assert_eq!(resp.status, StatusCode::Ok);
    assert_eq!(resp.headers.get("Content-Type"), Some("text/plain"));
    let text = String::from_utf8(resp.body).unwrap();
    assert!(text.contains("method=POST"), "{text}");
    assert!(text.contains("info=/more/info"), "{text}");
    assert!(text.contains("len=10"), "{text}");
    assert!(text.ends_with("body bytes"), "{text}");
}

#[test]
fn test_query_string_passed_through() {
    let site = site();
    let router = Router::new(&site.config).unwrap();
    let server = &site.config.servers[0];

    let req = request(b"GET /cgi-bin/echo.sh?a=1&b=two HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let text = String::from_utf8(router.route(server, &req, peer()).body).unwrap();
    assert!(text.contains("query=a=1&b=two"), "{text}");
}

#[test]
fn test_timeout_kills_and_reaps() {
    let site = site();
    let executor = CgiExecutor::new(&site.config)
        .unwrap()
        .with_timeout(Duration::from_millis(300));
    let router = Router::with_cgi(executor);
    let server = &site.config.servers[0];

    let start = Instant::now();
    let req = request(b"GET /cgi-bin/sleep.sh HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let resp = router.route(server, &req, peer());

    assert_eq!(resp.status, StatusCode::InternalServerError);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_timed_out_child_leaves_no_zombie() {
    let site = site();
    let pid_file = site.root().join("cgi-bin/pid.txt");
    std::fs::write(
        site.root().join("cgi-bin/pid.sh"),
        "echo $$ > \"$DOCUMENT_ROOT/cgi-bin/pid.txt\"\nexec sleep 10\n",
    )
    .unwrap();
    let executor = CgiExecutor::new(&site.config)
        .unwrap()
        .with_timeout(Duration::from_millis(300));
    let router = Router::with_cgi(executor);
    let server = &site.config.servers[0];

    let req = request(b"GET /cgi-bin/pid.sh HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let resp = router.route(server, &req, peer());
    assert_eq!(resp.status, StatusCode::InternalServerError);

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let pid = pid.trim();
    assert!(!pid.is_empty());
    // A zombie keeps its /proc entry until it is waited on.
    assert!(
        !std::path::Path::new("/proc").join(pid).exists(),
        "child {pid} was not reaped"
    );
}

#[test]
fn test_missing_configured_interpreter_is_not_implemented() {
    let site = site_with("cgi:\n  interpreters:\n    sh: /definitely/not/an/interpreter\n");
    let router = Router::new(&site.config).unwrap();
    let server = &site.config.servers[0];

    let req = request(b"GET /cgi-bin/status.sh HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(router.route(server, &req, peer()).status, StatusCode::NotImplemented);
}

#[test]
fn test_empty_output_is_server_error() {
    let site = site();
    let router = Router::new(&site.config).unwrap();
    let server = &site.config.servers[0];

    let req = request(b"GET /cgi-bin/empty.sh HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(router.route(server, &req, peer()).status, StatusCode::InternalServerError);
}

#[test]
fn test_missing_interpreter_is_not_implemented() {
    let site = site();
    let router = Router::new(&site.config).unwrap();
    let server = &site.config.servers[0];

    let req = request(b"GET /cgi-bin/prog.cob HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(router.route(server, &req, peer()).status, StatusCode::NotImplemented);
}

#[test]
fn test_missing_script_is_not_found() {
    let site = site();
    let router = Router::new(&site.config).unwrap();
    let server = &site.config.servers[0];

    let req = request(b"GET /cgi-bin/absent.sh HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(router.route(server, &req, peer()).status, StatusCode::NotFound);
}

#[test]
fn test_python_script_when_available() {
    if InterpreterTable::default().resolve(".py").is_none() {
        return;
    }
    let site = site();
    std::fs::write(
        site.root().join("cgi-bin/test.py"),
        "import sys\nsys.stdout.write('Status: 404\\r\\n\\r\\nNot found')\n",
    )
    .unwrap();
    let router = Router::new(&site.config).unwrap();
    let server = &site.config.servers[0];

    let req = request(b"GET /cgi-bin/test.py HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let resp = router.route(server, &req, peer());
    assert_eq!(resp.status, StatusCode::NotFound);
    assert_eq!(resp.body, b"Not found");
}
