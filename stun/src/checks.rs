use ring::constant_time::verify_slices_are_equal;

use crate::attributes::*;
use crate::error::*;

/// Returns `ErrAttributeSizeInvalid` if `got` differs from `expected`.
pub fn check_size(_at: AttrType, got: usize, expected: usize) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::ErrAttributeSizeInvalid)
    }
}

/// Returns `ErrAttributeSizeOverflow` if `got` is bigger than `max`.
pub fn check_overflow(_at: AttrType, got: usize, max: usize) -> Result<()> {
    if got <= max {
        Ok(())
    } else {
        Err(Error::ErrAttributeSizeOverflow)
    }
}

pub fn check_hmac(got: &[u8], expected: &[u8]) -> Result<()> {
    verify_slices_are_equal(got, expected).map_err(|_| Error::ErrIntegrityMismatch)
}

pub fn check_fingerprint(got: u32, expected: u32) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::ErrFingerprintMismatch)
    }
}
