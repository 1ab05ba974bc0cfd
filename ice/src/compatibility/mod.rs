#[cfg(test)]
mod compatibility_test;

use std::fmt;

use serde::Serialize;
use stun::dialect::Dialect;
use turn::client::ProtocolVariant;

use crate::candidate::CandidateType;
use crate::tcp_type::TcpType;

/// The wire dialect the agent speaks: STUN flavor, candidate priority
/// formula, credential coding, and TURN variant all hang off this.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Serialize)]
pub enum Compatibility {
    /// RFC 5245 / RFC 5389.
    #[serde(rename = "rfc5245")]
    Rfc5245,
    /// Google Talk / libjingle.
    #[serde(rename = "google")]
    Google,
    /// MSN Messenger.
    #[serde(rename = "msn")]
    Msn,
    /// Windows Live Messenger 2009.
    #[serde(rename = "wlm2009")]
    Wlm2009,
    /// Office Communicator 2007.
    #[serde(rename = "oc2007")]
    Oc2007,
    /// Office Communicator 2007 R2.
    #[serde(rename = "oc2007r2")]
    Oc2007R2,
}

impl Default for Compatibility {
    fn default() -> Self {
        Self::Rfc5245
    }
}

impl fmt::Display for Compatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Rfc5245 => "rfc5245",
            Self::Google => "google",
            Self::Msn => "msn",
            Self::Wlm2009 => "wlm2009",
            Self::Oc2007 => "oc2007",
            Self::Oc2007R2 => "oc2007r2",
        };
        write!(f, "{s}")
    }
}

impl Compatibility {
    /// The STUN codec switches for this dialect. `consent_freshness`
    /// follows the agent option, not the dialect, and is or-ed in by the
    /// caller.
    pub fn dialect(&self) -> Dialect {
        match *self {
            Self::Rfc5245 => Dialect {
                add_fingerprint: true,
                ..Default::default()
            },
            Self::Google => Dialect {
                rfc3489: true,
                ignore_credentials: true,
                ..Default::default()
            },
            Self::Msn => Dialect {
                rfc3489: true,
                force_integrity: true,
                ..Default::default()
            },
            Self::Wlm2009 => Dialect {
                force_integrity: true,
                ..Default::default()
            },
            Self::Oc2007 => Dialect {
                rfc3489: true,
                force_integrity: true,
                unaligned_attributes: true,
                ..Default::default()
            },
            Self::Oc2007R2 => Dialect {
                force_integrity: true,
                unaligned_attributes: true,
                ..Default::default()
            },
        }
    }

    /// Whether candidates carry their own base64-coded credentials.
    pub fn uses_candidate_credentials(&self) -> bool {
        matches!(*self, Self::Msn | Self::Oc2007 | Self::Oc2007R2)
    }

    pub fn turn_variant(&self) -> ProtocolVariant {
        match *self {
            Self::Google => ProtocolVariant::Google,
            Self::Msn => ProtocolVariant::Msn,
            Self::Oc2007 | Self::Oc2007R2 => ProtocolVariant::Oc2007,
            _ => ProtocolVariant::Rfc5766,
        }
    }

    /// Computes the candidate priority for this dialect.
    ///
    /// The standard formula is RFC 5245 section 4.1.2.1 with the RFC 6544
    /// direction preferences for TCP; the Google and MSN dialects use flat
    /// per-type values.
    pub fn candidate_priority(
        &self,
        typ: CandidateType,
        tcp_type: TcpType,
        is_tcp: bool,
        component_id: u16,
    ) -> u32 {
        match *self {
            Self::Google => match typ {
                CandidateType::Host => 1000,
                CandidateType::ServerReflexive | CandidateType::PeerReflexive => 900,
                CandidateType::Relay => 500,
                CandidateType::Unspecified => 0,
            },
            Self::Msn | Self::Wlm2009 => match typ {
                CandidateType::Host => 830,
                CandidateType::ServerReflexive | CandidateType::PeerReflexive => 550,
                CandidateType::Relay => 450,
                CandidateType::Unspecified => 0,
            },
            _ => {
                let local_pref = local_preference(typ, tcp_type, is_tcp);
                (1 << 24) * u32::from(typ.preference())
                    + (1 << 8) * u32::from(local_pref)
                    + (256 - u32::from(component_id))
            }
        }
    }
}

pub(crate) const DEFAULT_LOCAL_PREFERENCE: u16 = 65535;

/// RFC 6544 section 4.2: for TCP candidates the local preference encodes
/// the connection direction, `(2^13) * direction-pref + other-pref`, with
/// direction preferences 6/4/2 ordered by candidate type.
pub(crate) fn local_preference(typ: CandidateType, tcp_type: TcpType, is_tcp: bool) -> u16 {
    if !is_tcp {
        return DEFAULT_LOCAL_PREFERENCE;
    }

    let other_pref: u16 = 8191;

    let direction_pref: u16 = match typ {
        CandidateType::Host | CandidateType::Relay => match tcp_type {
            TcpType::Active => 6,
            TcpType::Passive => 4,
            TcpType::SimultaneousOpen => 2,
            TcpType::Unspecified => 0,
        },
        CandidateType::PeerReflexive | CandidateType::ServerReflexive => match tcp_type {
            TcpType::SimultaneousOpen => 6,
            TcpType::Active => 4,
            TcpType::Passive => 2,
            TcpType::Unspecified => 0,
        },
        CandidateType::Unspecified => 0,
    };

    (1 << 13) * direction_pref + other_pref
}
