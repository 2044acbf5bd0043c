//! webserv - non-blocking HTTP/1.1 server
//!
//! Core library: configuration, HTTP protocol handling, routing, CGI
//! execution and the readiness-driven event loop.

pub mod cgi;
pub mod config;
pub mod handlers;
pub mod http;
pub mod router;
pub mod server;
