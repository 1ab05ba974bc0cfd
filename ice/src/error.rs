use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    // input-invalid
    #[error("stream not found")]
    ErrStreamNotFound,
    #[error("component not found")]
    ErrComponentNotFound,
    #[error("remote ufrag is empty")]
    ErrRemoteUfragEmpty,
    #[error("remote pwd is empty")]
    ErrRemotePwdEmpty,
    #[error("local ufrag is too short")]
    ErrLocalUfragInsufficientBits,
    #[error("local pwd is too short")]
    ErrLocalPwdInsufficientBits,
    #[error("at least one of ICE-UDP and ICE-TCP must be enabled")]
    ErrNoTransportEnabled,
    #[error("a stream needs at least one component")]
    ErrNoComponents,
    #[error("attribute too short for an ICE candidate")]
    ErrAttributeTooShortIceCandidate,
    #[error("could not parse related addresses")]
    ErrParseRelatedAddr,
    #[error("could not parse type")]
    ErrParseType,
    #[error("unknown candidate type")]
    ErrUnknownCandidateType,
    #[error("could not parse address")]
    ErrAddressParseFailed,

    // would-block family
    #[error("operation would block")]
    ErrWouldBlock,
    #[error("operation cancelled")]
    ErrCancelled,

    // broken-pipe
    #[error("stream or component removed during receive")]
    ErrBrokenPipe,

    // permission-denied
    #[error("consent for sending has been revoked")]
    ErrConsentRevoked,

    // transport-failed
    #[error("transport failed")]
    ErrTransportFailed,
    #[error("no candidate pair available")]
    ErrNoCandidatePairs,
    #[error("pseudo-tcp connection not established")]
    ErrNotConnected,
    #[error("pseudo-tcp connection closed")]
    ErrConnectionClosed,
    #[error("pseudo-tcp connection reset")]
    ErrConnectionReset,

    // discovery-failed
    #[error("discovery transaction exhausted retransmissions")]
    ErrDiscoveryFailed,
    #[error("server could not be resolved")]
    ErrDnsFailed,

    // lifecycle
    #[error("the agent is closed")]
    ErrClosed,
    #[error("gathering was already started for this stream")]
    ErrGatheringAlreadyStarted,
    #[error("restart is not allowed while gathering")]
    ErrRestartWhenGathering,

    #[error("{0}")]
    Other(String),
    #[error("{0}")]
    Stun(#[from] stun::Error),
    #[error("{0}")]
    Turn(#[from] turn::Error),
}

impl From<util::Error> for Error {
    fn from(e: util::Error) -> Self {
        match e {
            util::Error::ErrBufferClosed => Error::ErrBrokenPipe,
            util::Error::ErrTimeout => Error::ErrWouldBlock,
            other => Error::Other(other.to_string()),
        }
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(_: std::net::AddrParseError) -> Self {
        Error::ErrAddressParseFailed
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(_: std::num::ParseIntError) -> Self {
        Error::ErrAttributeTooShortIceCandidate
    }
}
