//! Time-based one-time passwords (RFC 6238).
//!
//! Codes are 6 digits over a 30-second step, HMAC-SHA1 unless the account's
//! authenticator was provisioned with a different algorithm.

use data_encoding::{Encoding, Specification};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::{errors::Error, Result};

pub const DEFAULT_DIGITS: u32 = 6;
pub const DEFAULT_STEP_SECS: u64 = 30;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TotpAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TotpParams {
    pub digits: u32,
    pub step_secs: u64,
    pub algorithm: TotpAlgorithm,
}

impl std::str::FromStr for TotpAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::Config(format!("unknown TOTP algorithm: {other}"))),
        }
    }
}

impl Default for TotpParams {
    fn default() -> Self {
        Self {
            digits: DEFAULT_DIGITS,
            step_secs: DEFAULT_STEP_SECS,
            algorithm: TotpAlgorithm::Sha1,
        }
    }
}

/// Decode a base32 shared secret as authenticator apps display it.
///
/// Whitespace, lowercase letters and `=` padding are accepted.
pub fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=' && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.is_empty() {
        return Err(Error::InvalidSecret("secret is empty".to_string()));
    }
    secret_encoding()?
        .decode(normalized.as_bytes())
        .map_err(|e| Error::InvalidSecret(format!("not valid base32: {e}")))
}

/// RFC 4648 base32 without padding that ignores the unused low bits of the
/// last symbol. Authenticator secrets are often not a multiple of 40 bits.
fn secret_encoding() -> Result<Encoding> {
    let mut spec = Specification::new();
    spec.symbols.push_str("ABCDEFGHIJKLMNOPQRSTUVWXYZ234567");
    spec.check_trailing_bits = false;
    spec.encoding()
        .map_err(|e| Error::InvalidSecret(format!("base32 alphabet: {e}")))
}

/// Code for `unix_secs` with the default parameters.
pub fn generate(secret: &str, unix_secs: u64) -> Result<String> {
    generate_with_offset(secret, unix_secs, 0)
}

/// Code for the step `offset_steps` away from the one containing `unix_secs`.
///
/// A small offset compensates for a skewed local clock.
pub fn generate_with_offset(secret: &str, unix_secs: u64, offset_steps: i64) -> Result<String> {
    generate_with(secret, unix_secs, offset_steps, TotpParams::default())
}

pub fn generate_with(
    secret: &str,
    unix_secs: u64,
    offset_steps: i64,
    params: TotpParams,
) -> Result<String> {
    let key = decode_secret(secret)?;
    let counter = shifted_counter(unix_secs / params.step_secs.max(1), offset_steps);
    Ok(hotp(&key, counter, params))
}

/// Reference verifier: accepts `code` if it matches any step within ±`window`.
pub fn verify(secret: &str, code: &str, unix_secs: u64, window: u64) -> Result<bool> {
    let key = decode_secret(secret)?;
    let params = TotpParams::default();
    let counter = unix_secs / params.step_secs;
    let code = code.trim();

    let lo = counter.saturating_sub(window);
    let hi = counter.saturating_add(window);
    Ok((lo..=hi).any(|c| constant_time_eq(hotp(&key, c, params).as_bytes(), code.as_bytes())))
}

/// HOTP (RFC 4226) for an already-decoded key.
pub fn hotp(key: &[u8], counter: u64, params: TotpParams) -> String {
    let msg = counter.to_be_bytes();
    let digest = match params.algorithm {
        TotpAlgorithm::Sha1 => mac_digest::<Hmac<Sha1>>(key, &msg),
        TotpAlgorithm::Sha256 => mac_digest::<Hmac<Sha256>>(key, &msg),
        TotpAlgorithm::Sha512 => mac_digest::<Hmac<Sha512>>(key, &msg),
    };

    // Dynamic truncation.
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let bin = ((u32::from(digest[offset]) & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    let modulus = 10u64.pow(params.digits);
    let value = u64::from(bin) % modulus;
    format!("{value:0width$}", width = params.digits as usize)
}

fn mac_digest<M: Mac + hmac::digest::KeyInit>(key: &[u8], msg: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

fn shifted_counter(counter: u64, offset_steps: i64) -> u64 {
    if offset_steps >= 0 {
        counter.saturating_add(offset_steps as u64)
    } else {
        counter.saturating_sub(offset_steps.unsigned_abs())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn now_unix_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B seed "12345678901234567890".
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn matches_rfc6238_sha1_vectors() {
        let key = decode_secret(RFC_SECRET).unwrap();
        let eight = TotpParams {
            digits: 8,
            ..TotpParams::default()
        };
        assert_eq!(hotp(&key, 59 / 30, eight), "94287082");
        assert_eq!(hotp(&key, 1_111_111_109 / 30, eight), "07081804");
        assert_eq!(hotp(&key, 1_234_567_890 / 30, eight), "89005924");
        assert_eq!(hotp(&key, 2_000_000_000 / 30, eight), "69279037");

        // Six-digit codes are the low digits of the same value.
        assert_eq!(generate(RFC_SECRET, 59).unwrap(), "287082");
    }

    #[test]
    fn matches_rfc4226_hotp_vectors() {
        let key = b"12345678901234567890";
        let params = TotpParams::default();
        let expected = ["755224", "287082", "359152", "969429", "338314"];
        for (counter, want) in expected.iter().enumerate() {
            assert_eq!(hotp(key, counter as u64, params), *want);
        }
    }

    #[test]
    fn matches_rfc6238_sha2_vectors() {
        let sha256 = TotpParams {
            digits: 8,
            algorithm: TotpAlgorithm::Sha256,
            ..TotpParams::default()
        };
        assert_eq!(
            hotp(b"12345678901234567890123456789012", 59 / 30, sha256),
            "46119246"
        );

        let sha512 = TotpParams {
            digits: 8,
            algorithm: TotpAlgorithm::Sha512,
            ..TotpParams::default()
        };
        let seed64 = b"1234567890123456789012345678901234567890123456789012345678901234";
        assert_eq!(hotp(seed64, 59 / 30, sha512), "90693936");
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!("SHA-256".parse::<TotpAlgorithm>().unwrap(), TotpAlgorithm::Sha256);
        assert_eq!("sha1".parse::<TotpAlgorithm>().unwrap(), TotpAlgorithm::Sha1);
        assert!("md5".parse::<TotpAlgorithm>().is_err());
    }

    #[test]
    fn codes_thirty_seconds_apart_differ() {
        let t = 1_700_000_000;
        let a = generate(RFC_SECRET, t).unwrap();
        let b = generate(RFC_SECRET, t + 30).unwrap();
        assert_eq!(a.len(), 6);
        assert_ne!(a, b);
    }

    #[test]
    fn same_window_yields_same_code() {
        let t = 1_700_000_010; // step boundary at ..._000 + 20
        assert_eq!(
            generate(RFC_SECRET, t).unwrap(),
            generate(RFC_SECRET, t + 5).unwrap()
        );
    }

    #[test]
    fn verifier_accepts_within_two_steps() {
        let t = 1_700_000_000;
        for offset in -2i64..=2 {
            let code = generate_with_offset(RFC_SECRET, t, offset).unwrap();
            assert!(verify(RFC_SECRET, &code, t, 2).unwrap(), "offset {offset}");
        }
        let far = generate_with_offset(RFC_SECRET, t, 5).unwrap();
        assert!(!verify(RFC_SECRET, &far, t, 2).unwrap());
    }

    #[test]
    fn tolerates_formatting_noise_in_secret() {
        let spaced = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(
            generate(spaced, 59).unwrap(),
            generate(RFC_SECRET, 59).unwrap()
        );
        assert_eq!(
            generate("JBSWY3DPEHPK3PXP====", 59).unwrap(),
            generate("JBSWY3DPEHPK3PXP", 59).unwrap()
        );
    }

    #[test]
    fn ignores_unused_bits_in_the_last_symbol() {
        // 26 symbols carry 130 bits; the last two are padding.
        assert_eq!(
            decode_secret("JBSWY3DPEHPK3PXPJBSWY3DPEH").unwrap(),
            decode_secret("JBSWY3DPEHPK3PXPJBSWY3DPEE").unwrap()
        );
        assert_eq!(
            decode_secret("ABCDEFG").unwrap(),
            decode_secret("ABCDEFA").unwrap()
        );
        assert_eq!(generate("JBSWY3DPEHPK3PXPJBSWY3DPEH", 59).unwrap().len(), 6);
    }

    #[test]
    fn rejects_non_base32_secret() {
        assert!(matches!(
            generate("not base32!!", 0),
            Err(Error::InvalidSecret(_))
        ));
        assert!(matches!(generate("   ", 0), Err(Error::InvalidSecret(_))));
    }
}
