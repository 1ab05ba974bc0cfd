use std::string::FromUtf8Error;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("attribute not found")]
    ErrAttributeNotFound,
    #[error("transaction exists with same id")]
    ErrTransactionExists,
    #[error("transaction not exists")]
    ErrTransactionNotExists,
    #[error("agent is closed")]
    ErrAgentClosed,
    #[error("no default reason for ErrorCode")]
    ErrNoDefaultReason,
    #[error("unexpected EOF")]
    ErrUnexpectedEof,
    #[error("attribute size is invalid")]
    ErrAttributeSizeInvalid,
    #[error("attribute size overflow")]
    ErrAttributeSizeOverflow,
    #[error("unexpected EOF: not enough bytes to read header")]
    ErrUnexpectedHeaderEof,
    #[error("invalid magic cookie")]
    ErrInvalidMagicCookie,
    #[error("length field does not match buffer length")]
    ErrLengthMismatch,
    #[error("integrity check failed")]
    ErrIntegrityMismatch,
    #[error("message integrity attribute missing")]
    ErrIntegrityMissing,
    #[error("fingerprint check failed")]
    ErrFingerprintMismatch,
    #[error("FINGERPRINT before MESSAGE-INTEGRITY attribute")]
    ErrFingerprintBeforeIntegrity,
    #[error("invalid length of IP value")]
    ErrBadIpLength,
    #[error("bad address family value")]
    ErrBadAddressFamily,
    #[error("{0}")]
    Other(String),
    #[error("utf8: {0}")]
    Utf8(#[from] FromUtf8Error),
}
