use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Six-digit numeric rendezvous address.
///
/// Generated codes fall in `100000..=999999` so they never carry a leading
/// zero; parsing accepts any six ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("session code must be exactly {expected} digits, got {0:?}", expected = SessionCode::LEN)]
    Malformed(String),
}

impl SessionCode {
    pub const LEN: usize = 6;

    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let trimmed = raw.trim();
        if trimmed.len() == Self::LEN && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(CodeError::Malformed(raw.to_string()))
        }
    }

    pub fn random() -> Self {
        Self::random_with(&mut rand::thread_rng())
    }

    pub fn random_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let value: u32 = rng.gen_range(100_000..=999_999);
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}

impl AsRef<str> for SessionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn parses_six_digits() {
        let code = SessionCode::parse("123456").unwrap();
        assert_eq!(code.as_str(), "123456");
        assert_eq!(" 654321 ".parse::<SessionCode>().unwrap().as_str(), "654321");
    }

    #[test_timeout::timeout]
    fn rejects_malformed_codes() {
        for raw in ["", "12345", "1234567", "12a456", "12 456", "-12345"] {
            assert!(SessionCode::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test_timeout::timeout]
    fn random_codes_have_no_leading_zero() {
        for _ in 0..1_000 {
            let code = SessionCode::random();
            assert_eq!(code.as_str().len(), SessionCode::LEN);
            assert_ne!(code.as_str().as_bytes()[0], b'0');
        }
    }

    #[test_timeout::timeout]
    fn deserialization_validates() {
        let ok: SessionCode = serde_json::from_str("\"111111\"").unwrap();
        assert_eq!(ok.as_str(), "111111");
        assert!(serde_json::from_str::<SessionCode>("\"abc\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"111111\"");
    }
}
