//! Discovery key and address formatting.

/// Address advertised for this instance: `<host>:<port>`.
pub fn service_addr(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// Discovery key for an instance: `<service>/<address>`.
pub fn service_key(service_name: &str, address: &str) -> String {
    format!("{}/{}", service_name, address)
}

/// Listener address for a port, bound on all interfaces.
pub fn listen_addr(port: u16) -> String {
    format!("0.0.0.0:{}", port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let addr = service_addr("127.0.0.1", 8080);
        assert_eq!(addr, "127.0.0.1:8080");
        assert_eq!(service_key("service/thumbs", &addr), "service/thumbs/127.0.0.1:8080");
    }

    #[test]
    fn test_distinct_ports_never_collide() {
        let a = service_key("service/thumbs", &service_addr("127.0.0.1", 8080));
        let b = service_key("service/thumbs", &service_addr("127.0.0.1", 8081));
        assert_ne!(a, b);
    }

    #[test]
    fn test_listen_addr_binds_all_interfaces() {
        assert_eq!(listen_addr(9000), "0.0.0.0:9000");
    }
}
