use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("turn: channel bind not found")]
    ErrChannelBindNotFound,
    #[error("turn: only one Allocate() caller is allowed")]
    ErrOneAllocateOnly,
    #[error("turn: already closed")]
    ErrAlreadyClosed,
    #[error("turn: try again")]
    ErrTryAgain,
    #[error("all retransmissions failed")]
    ErrAllRetransmissionsFailed,
    #[error("transaction closed")]
    ErrTransactionClosed,
    #[error("wait_for_result called on non-result transaction")]
    ErrWaitForResultOnNonResultTransaction,
    #[error("unexpected STUN request message")]
    ErrUnexpectedStunrequestMessage,
    #[error("non-STUN message from STUN server")]
    ErrNonStunmessage,
    #[error("unexpected response type")]
    ErrUnexpectedResponse,
    #[error("short buffer")]
    ErrShortBuffer,
    #[error("invalid ChannelData length")]
    ErrBadChannelDataLength,
    #[error("invalid channel number")]
    ErrInvalidChannelNumber,
    #[error("{0}")]
    Other(String),
    #[error("{0}")]
    Stun(#[from] stun::Error),
}

impl From<util::Error> for Error {
    fn from(e: util::Error) -> Self {
        Error::Other(e.to_string())
    }
}
