use super::super::agent::TransactionId;
use super::super::attributes::*;
use super::super::dialect::Dialect;
use super::super::fingerprint::FINGERPRINT;
use super::super::integrity::MessageIntegrity;
use super::super::textattrs::Username;
use super::super::xoraddr::XorMappedAddress;
use super::*;

#[test]
fn test_message_type_roundtrip() {
    let tests = [
        BINDING_REQUEST,
        BINDING_SUCCESS,
        BINDING_ERROR,
        BINDING_INDICATION,
        MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST),
        MessageType::new(METHOD_REFRESH, CLASS_ERROR_RESPONSE),
        MessageType::new(METHOD_CHANNEL_BIND, CLASS_SUCCESS_RESPONSE),
    ];
    for t in tests {
        let mut decoded = MessageType::default();
        decoded.read_value(t.value());
        assert_eq!(decoded, t, "round-trip failed for {t}");
    }
}

#[test]
fn test_message_build_and_decode() -> Result<()> {
    let mut m = Message::new();
    m.build(&[
        Box::new(BINDING_REQUEST),
        Box::new(TransactionId::new()),
        Box::new(Username::new(ATTR_USERNAME, "remote:local".to_owned())),
        Box::new(XorMappedAddress {
            ip: "203.0.113.7".parse().unwrap(),
            port: 4321,
        }),
    ])?;

    let mut decoded = Message::new();
    decoded.write(&m.raw)?;
    assert_eq!(decoded, m);
    assert!(decoded.contains(ATTR_USERNAME));

    let mut got = XorMappedAddress::default();
    got.get_from(&decoded)?;
    assert_eq!(got.port, 4321);
    assert_eq!(got.ip.to_string(), "203.0.113.7");

    Ok(())
}

#[test]
fn test_is_message_checks_length_header() {
    // too short
    assert!(!is_message(&[0u8; 8]));

    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])
        .unwrap();
    assert!(is_message(&m.raw));

    // channel-data style first byte is rejected outright
    let mut not_stun = m.raw.clone();
    not_stun[0] = 0x40;
    assert!(!is_message(&not_stun));

    // length field promising more than the buffer holds
    let mut truncated = m.raw.clone();
    truncated[3] = 0xFF;
    assert!(!is_message(&truncated));
}

#[test]
fn test_validate_rejects_length_mismatch() -> Result<()> {
    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;

    // trailing garbage after the advertised length
    m.raw.push(0);
    let err = m.validate(None, Dialect::default()).unwrap_err();
    assert_eq!(err, Error::ErrLengthMismatch);

    Ok(())
}

#[test]
fn test_validate_magic_cookie_and_fingerprint() -> Result<()> {
    let mut m = Message::new();
    m.build(&[
        Box::new(BINDING_REQUEST),
        Box::new(TransactionId::new()),
        Box::new(FINGERPRINT),
    ])?;

    let mut decoded = Message::new();
    decoded.write(&m.raw)?;
    decoded.validate(None, Dialect::default())?;

    // flip a cookie byte: the slow validator rejects, the dialect with
    // 128-bit ids does not. The fingerprint covers the cookie too, so use
    // a message without one.
    let mut m2 = Message::new();
    m2.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;
    m2.raw[4] ^= 0xFF;
    let mut decoded2 = Message::new();
    decoded2.write(&m2.raw)?;
    assert_eq!(
        decoded2.validate(None, Dialect::default()).unwrap_err(),
        Error::ErrInvalidMagicCookie
    );
    decoded2.validate(
        None,
        Dialect {
            rfc3489: true,
            ..Default::default()
        },
    )?;

    Ok(())
}

#[test]
fn test_validate_integrity() -> Result<()> {
    let pwd = "thepassword+thepassword";

    let mut m = Message::new();
    m.build(&[
        Box::new(BINDING_REQUEST),
        Box::new(TransactionId::new()),
        Box::new(MessageIntegrity::new_short_term_integrity(pwd.to_owned())),
        Box::new(FINGERPRINT),
    ])?;

    let mut decoded = Message::new();
    decoded.write(&m.raw)?;
    decoded.validate(Some(pwd.as_bytes()), Dialect::default())?;

    assert_eq!(
        decoded
            .validate(Some(b"wrong password"), Dialect::default())
            .unwrap_err(),
        Error::ErrIntegrityMismatch
    );

    // a message without integrity fails when a key is supplied
    let mut bare = Message::new();
    bare.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;
    let mut bare_decoded = Message::new();
    bare_decoded.write(&bare.raw)?;
    assert_eq!(
        bare_decoded
            .validate(Some(pwd.as_bytes()), Dialect::default())
            .unwrap_err(),
        Error::ErrIntegrityMissing
    );

    Ok(())
}

#[test]
fn test_unaligned_attributes() -> Result<()> {
    let mut m = Message::new();
    m.unaligned = true;
    m.build(&[
        Box::new(BINDING_REQUEST),
        Box::new(TransactionId::new()),
        Box::new(Username::new(ATTR_USERNAME, "abcde".to_owned())),
        Box::new(Username::new(ATTR_REALM, "xy".to_owned())),
    ])?;

    // 20 header + (4 + 5) + (4 + 2), no padding in between
    assert_eq!(m.raw.len(), 20 + 9 + 6);

    let mut decoded = Message::new();
    decoded.unaligned = true;
    decoded.write(&m.raw)?;
    assert_eq!(decoded.get(ATTR_REALM)?, b"xy".to_vec());

    Ok(())
}
