//! Client IP extraction.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::ConnectInfo,
    http::{HeaderName, request::Parts},
};

/// Where the client address is read from.
#[derive(Debug, Clone, Default)]
pub enum IpSource {
    /// The peer address of the TCP connection.
    #[default]
    ConnectInfo,
    /// The first address in a header set by a trusted reverse proxy,
    /// such as `X-Forwarded-For` or `X-Real-IP`.
    Header(HeaderName),
}

impl IpSource {
    /// Parse a header name given on the command line.
    pub fn from_header_name(name: &str) -> Result<Self, String> {
        HeaderName::from_bytes(name.trim().as_bytes())
            .map(IpSource::Header)
            .map_err(|e| format!("Invalid header name '{}': {}", name, e))
    }
}

/// Extract the client IP address.
///
/// With a header source the header must be present and hold a valid address.
/// There is no fallback to the socket address, since that would be the
/// proxy's address and would put every client in one rate-limit bucket.
pub fn extract_client_ip(parts: &Parts, source: &IpSource) -> Result<String, &'static str> {
    match source {
        IpSource::Header(name) => {
            let value = parts
                .headers
                .get(name)
                .ok_or("IP header not present")?
                .to_str()
                .map_err(|_| "IP header contains invalid characters")?;
            let first = value.split(',').next().unwrap_or_default().trim();
            first
                .parse::<IpAddr>()
                .map(|ip| ip.to_string())
                .map_err(|_| "IP header does not contain an IP address")
        }
        IpSource::ConnectInfo => parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .ok_or("No client IP available"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_connect_info() {
        let parts = parts(
            Request::builder().extension(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5555)))),
        );
        assert_eq!(
            extract_client_ip(&parts, &IpSource::ConnectInfo).unwrap(),
            "10.0.0.7"
        );
    }

    #[test]
    fn test_connect_info_missing() {
        let parts = parts(Request::builder());
        assert!(extract_client_ip(&parts, &IpSource::ConnectInfo).is_err());
    }

    #[test]
    fn test_forwarded_header_takes_first_hop() {
        let source = IpSource::from_header_name("X-Forwarded-For").unwrap();
        let parts = parts(
            Request::builder()
                .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
                .extension(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 80)))),
        );
        assert_eq!(extract_client_ip(&parts, &source).unwrap(), "203.0.113.9");
    }

    #[test]
    fn test_header_source_does_not_fall_back() {
        let source = IpSource::from_header_name("x-real-ip").unwrap();
        let parts = parts(
            Request::builder().extension(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 80)))),
        );
        assert!(extract_client_ip(&parts, &source).is_err());

        let parts = parts_with_garbage();
        assert!(extract_client_ip(&parts, &source).is_err());
    }

    fn parts_with_garbage() -> Parts {
        parts(Request::builder().header("x-real-ip", "not-an-ip"))
    }

    #[test]
    fn test_ipv6_normalized() {
        let source = IpSource::from_header_name("x-real-ip").unwrap();
        let parts = parts(Request::builder().header("x-real-ip", "2001:DB8::1"));
        assert_eq!(extract_client_ip(&parts, &source).unwrap(), "2001:db8::1");
    }

    #[test]
    fn test_invalid_header_name() {
        assert!(IpSource::from_header_name("bad header").is_err());
    }
}
