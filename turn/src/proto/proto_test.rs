use std::time::Duration;

use stun::agent::TransactionId;
use stun::message::*;

use super::chandata::*;
use super::channum::*;
use super::lifetime::*;
use super::reqtrans::*;
use super::*;
use crate::error::Result;

#[test]
fn test_chandata_roundtrip() -> Result<()> {
    let mut cd = ChannelData {
        data: b"payload".to_vec(),
        number: ChannelNumber(MIN_CHANNEL_NUMBER + 3),
        ..Default::default()
    };
    cd.encode();

    // 7-byte payload padded to 8
    assert_eq!(cd.raw.len(), CHANNEL_DATA_HEADER_SIZE + 8);
    assert!(ChannelData::is_channel_data(&cd.raw));

    let mut decoded = ChannelData {
        raw: cd.raw.clone(),
        ..Default::default()
    };
    decoded.decode()?;
    assert_eq!(decoded.data, cd.data);
    assert_eq!(decoded.number, cd.number);

    Ok(())
}

#[test]
fn test_chandata_rejects_bad_number_and_length() {
    // channel number outside 0x4000..=0x7FFF
    let mut cd = ChannelData {
        raw: vec![0x00, 0x01, 0x00, 0x00],
        ..Default::default()
    };
    assert!(cd.decode().is_err());

    // length field larger than the buffer
    let mut cd = ChannelData {
        raw: vec![0x40, 0x00, 0x00, 0xFF, 0x01],
        ..Default::default()
    };
    assert!(cd.decode().is_err());
}

#[test]
fn test_chandata_is_not_stun() {
    let mut cd = ChannelData {
        data: vec![1, 2, 3, 4],
        number: ChannelNumber(MIN_CHANNEL_NUMBER),
        ..Default::default()
    };
    cd.encode();
    assert!(!stun::message::is_message(&cd.raw));
}

#[test]
fn test_lifetime_attribute() -> Result<()> {
    let mut m = Message::new();
    m.transaction_id = TransactionId::new();
    m.write_header();

    Lifetime(Duration::from_secs(600)).add_to(&mut m)?;

    let mut lt = Lifetime::default();
    lt.get_from(&m)?;
    assert_eq!(lt.0, Duration::from_secs(600));

    Ok(())
}

#[test]
fn test_requested_transport_attribute() -> Result<()> {
    let mut m = Message::new();
    m.transaction_id = TransactionId::new();
    m.write_header();

    RequestedTransport {
        protocol: PROTO_UDP,
    }
    .add_to(&mut m)?;

    let mut rt = RequestedTransport::default();
    rt.get_from(&m)?;
    assert_eq!(rt.protocol, PROTO_UDP);

    Ok(())
}
