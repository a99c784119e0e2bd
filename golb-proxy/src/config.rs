//! Process configuration, read from flags or `eb_go_lb_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use golb_core::GatewaySet;

use crate::handler::HandlerKind;

/// Node name used when neither the flag nor `HOSTNAME` is set.
const DEFAULT_NODE_NAME: &str = "golb";

/// golb: weighted round-robin load balancer for functions.
#[derive(Debug, Clone, Parser)]
#[command(name = "golb", version, about)]
pub struct Config {
    /// Zone whose functions this node balances.
    #[arg(long, env = "eb_go_lb_zone")]
    pub zone: String,

    /// Request handler: `dummy` or `wrr`.
    #[arg(
        long,
        env = "eb_go_lb_handler_type",
        value_enum,
        ignore_case = true,
        default_value_t = HandlerKind::Dummy
    )]
    pub handler_type: HandlerKind,

    /// Port to listen on.
    #[arg(long, env = "eb_go_lb_listen_port", default_value_t = 8079)]
    pub listen_port: u16,

    /// etcd endpoint (`host:port`).
    #[arg(long, env = "eb_go_lb_etcd_host", default_value = "localhost:2379")]
    pub etcd_host: String,

    /// Gateway address fragments, separated by commas or whitespace.
    #[arg(long, env = "eb_go_lb_gateways", value_delimiter = ',')]
    pub gateways: Vec<String>,

    /// Name of this node, stamped on forwarded requests. Defaults to `$HOSTNAME`.
    #[arg(long, env = "eb_go_lb_node_name")]
    pub node_name: Option<String>,

    /// Log mode: `dev` or `prod`.
    #[arg(long, env = "eb_go_lb_mode", default_value = "dev")]
    pub mode: String,

    /// Deadline for upstream response headers in milliseconds; 0 disables it.
    #[arg(long, env = "eb_go_lb_upstream_timeout_ms", default_value_t = 30_000)]
    pub upstream_timeout_ms: u64,
}

impl Config {
    /// Address to bind on all interfaces.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.listen_port))
    }

    /// Configured gateways.
    pub fn gateway_set(&self) -> GatewaySet {
        GatewaySet::new(self.gateways.iter().flat_map(|g| g.split_whitespace()))
    }

    /// Node name from the flag, `HOSTNAME`, or the default.
    pub fn node_name(&self) -> String {
        self.node_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string())
    }

    /// Upstream deadline, `None` when disabled.
    pub fn upstream_timeout(&self) -> Option<Duration> {
        (self.upstream_timeout_ms > 0).then(|| Duration::from_millis(self.upstream_timeout_ms))
    }
}
