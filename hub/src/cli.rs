use clap::Parser;
use getset::{CloneGetters, CopyGetters};
use std::net::SocketAddr;
use url::Url;

#[derive(Parser, Debug, Clone, CloneGetters, CopyGetters)]
#[command(name = "edgehub")]
#[command(about = "Edge-side Kubernetes API proxy", long_about = None)]
pub struct Cli {
    /// Address the proxy listens on.
    #[getset(get_copy = "pub")]
    #[arg(
        default_value = "0.0.0.0:10261",
        env = "EDGEHUB_LISTEN_ADDR",
        long = "listen-addr"
    )]
    listen_addr: SocketAddr,

    /// URL of the kube-apiserver requests are forwarded to.
    #[getset(get_clone = "pub")]
    #[arg(env = "EDGEHUB_UPSTREAM_URL", long = "upstream-url")]
    upstream_url: Url,

    /// `host:port` substituted into the master service address.
    #[getset(get_clone = "pub")]
    #[arg(env = "EDGEHUB_MASTER_SERVICE_ADDR", long = "master-service-addr")]
    master_service_addr: String,
}
