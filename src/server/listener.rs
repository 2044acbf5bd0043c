use std::net::SocketAddr;

use anyhow::Context;
use mio::net::TcpListener;
use tracing::debug;

use crate::config::{Config, ServerConfig, VirtualHosts};
use crate::http::parser::ParserLimits;

/// A bound socket and the virtual hosts served on it.
pub struct Listener<'cfg> {
    pub socket: TcpListener,
    pub addr: SocketAddr,
    pub vhosts: VirtualHosts<'cfg>,
    pub limits: ParserLimits,
}

/// Binds one socket per distinct listen address.
///
/// Servers naming the same address share its socket; the first one listed
/// is the default host. Port 0 always gets a socket of its own.
pub fn bind_all(config: &Config) -> anyhow::Result<Vec<Listener<'_>>> {
    let mut groups: Vec<(SocketAddr, Vec<&ServerConfig>)> = Vec::new();
    for server in &config.servers {
        for &addr in server.addrs() {
            match groups
                .iter_mut()
                .find(|(a, _)| addr.port() != 0 && *a == addr)
            {
                Some((_, members)) => members.push(server),
                None => groups.push((addr, vec![server])),
            }
        }
    }

    groups
        .into_iter()
        .map(|(addr, mut members)| {
            let socket =
                TcpListener::bind(addr).with_context(|| format!("binding {addr}"))?;
            let local = socket
                .local_addr()
                .with_context(|| format!("local address of {addr}"))?;

            let default = members.remove(0);
            let vhosts = VirtualHosts::new(default, members);
            let limits = config.parser_limits(vhosts.max_body_size());
            debug!(addr = %local, "bound");

            Ok(Listener {
                socket,
                addr: local,
                vhosts,
                limits,
            })
        })
        .collect()
}
