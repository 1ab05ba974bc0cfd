#[cfg(test)]
mod rand_test;

use rand::{thread_rng, Rng};

const RUNES_ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Stream credentials: 4 characters of ufrag and 22 of pwd satisfy the
/// 24/128-bit randomness floor with this alphabet.
pub(crate) const LEN_UFRAG: usize = 4;
pub(crate) const LEN_PWD: usize = 22;

/// Per-candidate credentials for the dialects that use them, sized before
/// base64 coding.
pub(crate) const LEN_CANDIDATE_USERNAME: usize = 32;
pub(crate) const LEN_CANDIDATE_PASSWORD: usize = 16;

fn random_string(len: usize) -> String {
    let mut rng = thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..RUNES_ALPHA.len());
            RUNES_ALPHA[idx] as char
        })
        .collect()
}

/// Generates a candidate identifier.
pub(crate) fn generate_cand_id() -> String {
    format!("candidate:{}", random_string(16))
}

/// Generates an ICE user fragment.
pub fn generate_ufrag() -> String {
    random_string(LEN_UFRAG)
}

/// Generates an ICE password.
pub fn generate_pwd() -> String {
    random_string(LEN_PWD)
}

/// Generates raw credential bytes for dialects with per-candidate
/// credentials.
pub(crate) fn generate_credential_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    thread_rng().fill(&mut bytes[..]);
    bytes
}

/// Generates the 64-bit tie-breaker.
pub(crate) fn generate_tie_breaker() -> u64 {
    thread_rng().gen::<u64>()
}
