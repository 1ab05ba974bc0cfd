use std::net::IpAddr;

use super::super::agent::TransactionId;
use super::super::attributes::{ATTR_XOR_PEER_ADDRESS, ATTR_XOR_RELAYED_ADDRESS};
use super::super::message::*;
use super::*;

#[test]
fn test_xormapped_address_roundtrip_v4() -> Result<()> {
    let mut m = Message::new();
    m.transaction_id = TransactionId::new();
    m.write_header();

    let addr = XorMappedAddress {
        ip: "192.0.2.1".parse().unwrap(),
        port: 61000,
    };
    addr.add_to(&mut m)?;

    let mut got = XorMappedAddress::default();
    got.get_from(&m)?;
    assert_eq!(got.ip, addr.ip);
    assert_eq!(got.port, addr.port);

    Ok(())
}

#[test]
fn test_xormapped_address_roundtrip_v6() -> Result<()> {
    let mut m = Message::new();
    m.transaction_id = TransactionId::new();
    m.write_header();

    let ip: IpAddr = "2001:db8::5".parse().unwrap();
    let addr = XorMappedAddress { ip, port: 443 };
    addr.add_to(&mut m)?;

    let mut got = XorMappedAddress::default();
    got.get_from(&m)?;
    assert_eq!(got.ip, ip);
    assert_eq!(got.port, 443);

    Ok(())
}

#[test]
fn test_xor_address_as_peer_and_relayed() -> Result<()> {
    let mut m = Message::new();
    m.transaction_id = TransactionId::new();
    m.write_header();

    let peer = XorMappedAddress {
        ip: "198.51.100.12".parse().unwrap(),
        port: 7000,
    };
    peer.add_to_as(&mut m, ATTR_XOR_PEER_ADDRESS)?;

    let relayed = XorMappedAddress {
        ip: "198.51.100.13".parse().unwrap(),
        port: 7001,
    };
    relayed.add_to_as(&mut m, ATTR_XOR_RELAYED_ADDRESS)?;

    let mut got = XorMappedAddress::default();
    got.get_from_as(&m, ATTR_XOR_PEER_ADDRESS)?;
    assert_eq!(got.port, 7000);

    got.get_from_as(&m, ATTR_XOR_RELAYED_ADDRESS)?;
    assert_eq!(got.port, 7001);

    Ok(())
}

#[test]
fn test_xormapped_address_bad_family() {
    let mut m = Message::new();
    m.transaction_id = TransactionId::new();
    m.write_header();
    m.add(super::super::attributes::ATTR_XORMAPPED_ADDRESS, &[0, 9, 1, 2, 3, 4, 5, 6]);

    let mut got = XorMappedAddress::default();
    assert_eq!(got.get_from(&m).unwrap_err(), Error::ErrBadAddressFamily);
}
