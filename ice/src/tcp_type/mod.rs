use std::fmt;

use serde::Serialize;

/// The connection role of an ICE-TCP candidate (RFC 6544).
#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize)]
pub enum TcpType {
    /// Not a TCP candidate.
    #[serde(rename = "unspecified")]
    Unspecified,
    /// Connects outward only.
    #[serde(rename = "active")]
    Active,
    /// Accepts inbound connections only.
    #[serde(rename = "passive")]
    Passive,
    /// Both sides connect simultaneously.
    #[serde(rename = "so")]
    SimultaneousOpen,
}

impl From<&str> for TcpType {
    fn from(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "passive" => Self::Passive,
            "so" => Self::SimultaneousOpen,
            _ => Self::Unspecified,
        }
    }
}

impl fmt::Display for TcpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Passive => "passive",
            Self::SimultaneousOpen => "so",
            Self::Unspecified => "unspecified",
        };
        write!(f, "{s}")
    }
}

impl Default for TcpType {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl TcpType {
    /// Pairing rule of RFC 6544: active probes passive, simultaneous-open
    /// pairs with itself. Active↔active and passive↔passive never connect.
    pub fn is_compatible_with(&self, other: TcpType) -> bool {
        matches!(
            (self, other),
            (Self::Active, Self::Passive)
                | (Self::Passive, Self::Active)
                | (Self::SimultaneousOpen, Self::SimultaneousOpen)
        )
    }
}

#[cfg(test)]
mod tcp_type_test {
    use super::*;

    #[test]
    fn test_tcp_type_parse_and_display() {
        assert_eq!(TcpType::from("active"), TcpType::Active);
        assert_eq!(TcpType::from("passive"), TcpType::Passive);
        assert_eq!(TcpType::from("so"), TcpType::SimultaneousOpen);
        assert_eq!(TcpType::from("something else"), TcpType::Unspecified);
        assert_eq!(TcpType::Active.to_string(), "active");
    }

    #[test]
    fn test_tcp_type_compatibility() {
        assert!(TcpType::Active.is_compatible_with(TcpType::Passive));
        assert!(TcpType::Passive.is_compatible_with(TcpType::Active));
        assert!(TcpType::SimultaneousOpen.is_compatible_with(TcpType::SimultaneousOpen));
        assert!(!TcpType::Active.is_compatible_with(TcpType::Active));
        assert!(!TcpType::Passive.is_compatible_with(TcpType::Passive));
        assert!(!TcpType::Active.is_compatible_with(TcpType::Unspecified));
    }
}
