use super::*;

#[test]
fn test_standard_priority_formula() {
    // host UDP, component 1: (2^24)*126 + (2^8)*65535 + 255
    let p = Compatibility::Rfc5245.candidate_priority(
        CandidateType::Host,
        TcpType::Unspecified,
        false,
        1,
    );
    assert_eq!(p, (1 << 24) * 126 + (1 << 8) * 65535 + 255);

    // relay sorts below srflx which sorts below host
    let srflx = Compatibility::Rfc5245.candidate_priority(
        CandidateType::ServerReflexive,
        TcpType::Unspecified,
        false,
        1,
    );
    let relay = Compatibility::Rfc5245.candidate_priority(
        CandidateType::Relay,
        TcpType::Unspecified,
        false,
        1,
    );
    assert!(p > srflx && srflx > relay);

    // second component is ever so slightly less preferred
    let rtcp = Compatibility::Rfc5245.candidate_priority(
        CandidateType::Host,
        TcpType::Unspecified,
        false,
        2,
    );
    assert_eq!(p - rtcp, 1);
}

#[test]
fn test_tcp_direction_preferences() {
    let active = Compatibility::Rfc5245.candidate_priority(
        CandidateType::Host,
        TcpType::Active,
        true,
        1,
    );
    let passive = Compatibility::Rfc5245.candidate_priority(
        CandidateType::Host,
        TcpType::Passive,
        true,
        1,
    );
    let so = Compatibility::Rfc5245.candidate_priority(
        CandidateType::Host,
        TcpType::SimultaneousOpen,
        true,
        1,
    );
    assert!(active > passive && passive > so);

    // srflx flips the ordering toward simultaneous-open
    let srflx_so = Compatibility::Rfc5245.candidate_priority(
        CandidateType::ServerReflexive,
        TcpType::SimultaneousOpen,
        true,
        1,
    );
    let srflx_active = Compatibility::Rfc5245.candidate_priority(
        CandidateType::ServerReflexive,
        TcpType::Active,
        true,
        1,
    );
    assert!(srflx_so > srflx_active);
}

#[test]
fn test_dialect_formulas_are_selectable() {
    let google = Compatibility::Google.candidate_priority(
        CandidateType::Host,
        TcpType::Unspecified,
        false,
        1,
    );
    assert_eq!(google, 1000);
    assert_eq!(
        Compatibility::Google.candidate_priority(
            CandidateType::Relay,
            TcpType::Unspecified,
            false,
            1
        ),
        500
    );

    let msn = Compatibility::Msn.candidate_priority(
        CandidateType::Host,
        TcpType::Unspecified,
        false,
        1,
    );
    assert_eq!(msn, 830);
}

#[test]
fn test_dialect_flags() {
    assert!(Compatibility::Rfc5245.dialect().add_fingerprint);
    assert!(Compatibility::Google.dialect().ignore_credentials);
    assert!(Compatibility::Google.dialect().rfc3489);
    assert!(Compatibility::Oc2007.dialect().unaligned_attributes);
    assert!(!Compatibility::Rfc5245.uses_candidate_credentials());
    assert!(Compatibility::Msn.uses_candidate_credentials());
}
