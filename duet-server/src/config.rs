use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Command line options of the relay binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "duet-server")]
#[command(version, about = "Pub/sub relay for duet call signaling")]
pub struct ServerConfig {
    /// Address to bind to
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = 3000)]
    pub port: u16,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "duet_server=info")]
    pub log: String,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            log: "duet_server=info".to_owned(),
        }
    }
}
