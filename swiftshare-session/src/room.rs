//! Room addressing.
//!
//! A room id is `[a-z0-9_-]{1,50}`. One id maps to one replicated document
//! and one transport endpoint path.

use std::fmt;

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Maximum room id length in characters.
pub const MAX_ROOM_ID_LEN: usize = 50;

/// Length of generated room ids (~62 bits of entropy over 36 symbols).
pub const GENERATED_ROOM_ID_LEN: usize = 12;

const ROOM_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A validated room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Validate `raw` as a room id. No normalization is applied; use
    /// [`sanitize`] first to suggest a fixed-up version of user input.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        if is_valid(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(SessionError::InvalidRoomId(raw.to_string()))
        }
    }

    /// Generate a fresh id from the operating system's CSPRNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    /// Generate a fresh id from the given random source.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let id = (0..GENERATED_ROOM_ID_LEN)
            .map(|_| ROOM_ALPHABET[rng.gen_range(0..ROOM_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(SessionError::InvalidRoomId(value))
        }
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
}

fn is_valid(raw: &str) -> bool {
    !raw.is_empty() && raw.len() <= MAX_ROOM_ID_LEN && raw.chars().all(is_allowed)
}

/// Lowercase, trim, strip disallowed characters and truncate to
/// [`MAX_ROOM_ID_LEN`]. The result may be empty.
pub fn sanitize(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|c| is_allowed(*c))
        .take(MAX_ROOM_ID_LEN)
        .collect()
}
