#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use webserv::config::Config;
use webserv::http::parser::parse_http_request;
use webserv::http::request::Request;

pub const INDEX_HTML: &str = "<h1>home</h1>\n";

/// A document root on disk plus a configuration pointing at it.
pub struct Site {
    pub dir: TempDir,
    pub config: Config,
}

impl Site {
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("www")
    }

    pub fn uploads(&self) -> PathBuf {
        self.dir.path().join("www").join("uploads")
    }
}

pub fn site() -> Site {
    site_with("")
}

/// Builds the test site; `extra_top` is spliced into the top of the YAML.
pub fn site_with(extra_top: &str) -> Site {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("www");
    fs::create_dir_all(root.join("admin")).unwrap();
    fs::create_dir_all(root.join("files/sub")).unwrap();
    fs::create_dir_all(root.join("cgi-bin")).unwrap();
    fs::create_dir_all(root.join("uploads")).unwrap();
    fs::create_dir_all(dir.path().join("errors")).unwrap();

    fs::write(root.join("index.html"), INDEX_HTML).unwrap();
    fs::write(root.join("files/a.txt"), "alpha").unwrap();
    fs::write(dir.path().join("errors/404.html"), "custom missing page").unwrap();

    script(&root, "status.sh", "printf 'Status: 404\\r\\n\\r\\nNot found'\n");
    script(
        &root,
        "echo.sh",
        "printf 'Content-Type: text/plain\\r\\n\\r\\n'\n\
         printf 'method=%s query=%s info=%s len=%s\\n' \"$REQUEST_METHOD\" \"$QUERY_STRING\" \"$PATH_INFO\" \"$CONTENT_LENGTH\"\n\
         cat\n",
    );
    script(&root, "sleep.sh", "exec sleep 10\n");
    script(&root, "empty.sh", "exit 0\n");
    fs::write(root.join("cgi-bin/prog.cob"), "DISPLAY 'HI'.").unwrap();

    let yaml = format!(
        r#"{extra_top}
servers:
  - server_name: localhost
    listen: ["127.0.0.1:0"]
    root: {root}
    client_max_body_size: 1024
    upload_dir: {root}/uploads
    error_pages:
      404: {errors}/404.html
    routes:
      - path: /admin
        methods: [GET]
      - path: /upload
        methods: [POST, PUT]
        client_max_body_size: 65536
      - path: /uploads
        methods: [GET, DELETE]
      - path: /cgi-bin
        methods: [GET, POST]
        cgi_extensions: [".sh", ".py", ".cob"]
      - path: /old
        redirect: {{ to: /new, code: 302 }}
      - path: /files
        methods: [GET]
        autoindex: true
      - path: /small
        methods: [POST]
        client_max_body_size: 4
"#,
        root = root.display(),
        errors = dir.path().join("errors").display(),
    );
    let config = Config::from_yaml(&yaml).unwrap();
    Site { dir, config }
}

fn script(root: &Path, name: &str, body: &str) {
    fs::write(root.join("cgi-bin").join(name), body).unwrap();
}

pub fn request(raw: &[u8]) -> Request {
    parse_http_request(raw).unwrap().0
}

pub fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

pub fn multipart_body(boundary: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"comment\"\r\n\r\n\
         not a file\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

pub fn post(path: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut raw = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    raw.extend_from_slice(body);
    raw
}
