use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// 计算对外公布的 `host:port`
///
/// 监听在未指定地址（`0.0.0.0` / `::`）上时使用本机的主IP，获取失败时退回 `127.0.0.1`。
pub fn advertise_addr(local: SocketAddr) -> String {
    let ip = if local.ip().is_unspecified() {
        primary_ip()
    } else {
        local.ip()
    };
    SocketAddr::new(ip, local.port()).to_string()
}

fn primary_ip() -> IpAddr {
    match local_ip_address::local_ip() {
        Ok(ip) => ip,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to detect local IP, falling back to loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
