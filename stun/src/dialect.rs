/// Behavior switches for the STUN dialects spoken by the different ICE
/// compatibility modes. The codec stays free of ICE-level enums; callers
/// translate their compatibility setting into one of these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dialect {
    /// 128-bit transaction ids: the magic cookie field is part of the id
    /// and is not validated.
    pub rfc3489: bool,
    /// Reject validated messages that carry no MESSAGE-INTEGRITY.
    pub force_integrity: bool,
    /// Built requests end with FINGERPRINT; validation requires it.
    pub add_fingerprint: bool,
    /// Long-term credential mechanism (MD5 keyed) instead of short-term.
    pub long_term_credentials: bool,
    /// Skip credential validation entirely.
    pub ignore_credentials: bool,
    /// Attribute values are written without 32-bit padding.
    pub unaligned_attributes: bool,
    /// RFC 7675 consent-freshness rules apply to Binding requests on a
    /// selected pair.
    pub consent_freshness: bool,
}

impl Dialect {
    /// The RFC 5389/5245 dialect used by default.
    pub fn rfc5389() -> Self {
        Dialect {
            add_fingerprint: true,
            ..Default::default()
        }
    }
}
