use std::net::SocketAddr;

use super::*;

#[test]
fn test_equal_no_port() {
    let a: SocketAddr = "10.0.0.1:1000".parse().unwrap();
    let b: SocketAddr = "10.0.0.1:2000".parse().unwrap();
    let c: SocketAddr = "10.0.0.2:1000".parse().unwrap();

    assert!(equal_no_port(&a, &b));
    assert!(!equal_no_port(&a, &c));
    assert!(equal_no_port(&a, &a));
}

#[test]
fn test_socket_addr_string_roundtrip() {
    for s in ["127.0.0.1:3478", "192.168.1.7:0", "[2001:db8::1]:53"] {
        let addr: SocketAddr = s.parse().unwrap();
        let again: SocketAddr = addr.to_string().parse().unwrap();
        assert_eq!(addr, again);
    }
}

#[test]
fn test_is_private() {
    for s in ["10.1.2.3", "172.16.0.1", "192.168.4.4", "169.254.9.9", "fd00::1", "fe80::1"] {
        let ip = s.parse().unwrap();
        assert!(is_private(&ip), "{s} should be private");
    }
    for s in ["8.8.8.8", "203.0.113.4", "2001:db8::1"] {
        let ip = s.parse().unwrap();
        assert!(!is_private(&ip), "{s} should not be private");
    }
}

#[test]
fn test_is_link_local() {
    assert!(is_link_local(&"169.254.0.5".parse().unwrap()));
    assert!(is_link_local(&"fe80::20".parse().unwrap()));
    assert!(!is_link_local(&"10.0.0.1".parse().unwrap()));
    assert!(!is_link_local(&"fd00::1".parse().unwrap()));
}

#[test]
fn test_ip_version() {
    assert_eq!(ip_version(&"127.0.0.1".parse().unwrap()), 4);
    assert_eq!(ip_version(&"::1".parse().unwrap()), 6);
}
