use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const STATION_PORT: &str = "STATION_PORT";

const DEFAULT_PORT: u16 = 3000;

pub fn get_port() -> u16 {
    let port_from_env = std::env::var(STATION_PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const STATION_ADDR: &str = "STATION_ADDR";

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub fn get_addr() -> Ipv4Addr {
    let addr_from_env = std::env::var(STATION_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

pub fn get_bind_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(get_addr()), get_port())
}

const STATION_LOG: &str = "STATION_LOG";

/// Log level requested through the environment, if any
pub fn get_log_level() -> Option<String> {
    std::env::var(STATION_LOG).ok()
}
