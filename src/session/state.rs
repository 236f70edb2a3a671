//! Session identity and lifecycle state

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{Error, Result};

/// Minimum session id length
pub const SESSION_ID_MIN_LEN: usize = 4;
/// Maximum session id length
pub const SESSION_ID_MAX_LEN: usize = 16;

/// Validated session identifier (4-16 ASCII alphanumeric characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a session id
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = (SESSION_ID_MIN_LEN..=SESSION_ID_MAX_LEN).contains(&id.len())
            && id.bytes().all(|b| b.is_ascii_alphanumeric());

        if valid {
            Ok(Self(id))
        } else {
            Err(Error::InvalidSessionId(id))
        }
    }

    /// Generate a random 8-character lowercase id
    pub fn generate() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self(id)
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Subscriber identifier: 8 lowercase hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId([u8; 8]);

impl ClientId {
    /// Generate a random client id
    pub fn generate() -> Self {
        Self::from_u32(rand::random())
    }

    fn from_u32(n: u32) -> Self {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = [0u8; 8];
        for (i, slot) in out.iter_mut().enumerate() {
            let shift = 28 - 4 * i;
            *slot = HEX[((n >> shift) & 0xf) as usize];
        }
        Self(out)
    }

    /// Parse an 8-character lowercase hex id
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 8 || !bytes.iter().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        // Only ever built from ASCII hex digits
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status shared by sessions and subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created, not yet used
    Init,
    /// Accepting publishes and subscribers
    Open,
    /// Resources released
    Closed,
}

impl SessionStatus {
    /// Lowercase name of the status
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Init => "init",
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_validation() {
        assert!(SessionId::new("ab12cd").is_ok());
        assert!(SessionId::new("abcd").is_ok());
        assert!(SessionId::new("a".repeat(16)).is_ok());

        assert!(matches!(
            SessionId::new("abc"),
            Err(Error::InvalidSessionId(_))
        ));
        assert!(SessionId::new("a".repeat(17)).is_err());
        assert!(SessionId::new("ab-12").is_err());
        assert!(SessionId::new("../etc").is_err());
    }

    #[test]
    fn test_generated_session_id_is_valid() {
        for _ in 0..32 {
            let id = SessionId::generate();
            assert!(SessionId::new(id.as_str()).is_ok());
            assert_eq!(id.as_str().len(), 8);
        }
    }

    #[test]
    fn test_client_id_format() {
        let id = ClientId::from_u32(0x00c0_ffee);
        assert_eq!(id.as_str(), "00c0ffee");
        assert_eq!(ClientId::parse("00c0ffee"), Some(id));

        let random = ClientId::generate();
        assert_eq!(random.as_str().len(), 8);
        assert_eq!(ClientId::parse(random.as_str()), Some(random));
    }

    #[test]
    fn test_client_id_rejects_bad_input() {
        assert!(ClientId::parse("00C0FFEE").is_none());
        assert!(ClientId::parse("short").is_none());
        assert!(ClientId::parse("zzzzzzzz").is_none());
    }
}
