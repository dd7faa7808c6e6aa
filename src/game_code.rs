//! Game code generation and parsing
//!
//! Game codes are the short identifiers players type in to join a room.
//! They are six characters drawn from uppercase letters and digits, and
//! are parsed case-insensitively so that `ab12cd` and `AB12CD` name the
//! same room.

use std::{fmt::Display, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use crate::constants::game_code::{ALPHABET, LENGTH};

/// A unique identifier for a room
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct GameCode([u8; LENGTH]);

/// Errors that can occur when parsing a game code
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The code does not have exactly [`LENGTH`] characters
    #[error("game code must be {LENGTH} characters long")]
    Length,
    /// The code contains a character outside of `A-Z0-9`
    #[error("game code contains invalid character {0:?}")]
    Character(char),
}

impl GameCode {
    /// Creates a new random game code
    ///
    /// The code is not checked against live rooms; see
    /// [`RoomRegistry::generate_unique_code`](crate::registry::RoomRegistry::generate_unique_code).
    pub fn new() -> Self {
        let mut code = [0; LENGTH];
        for byte in &mut code {
            *byte = ALPHABET[fastrand::usize(..ALPHABET.len())];
        }
        Self(code)
    }

    /// Returns the code as a string slice
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl Default for GameCode {
    /// Creates a new random game code (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for GameCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameCode {
    type Err = Error;

    /// Parses a game code, uppercasing it first
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the trimmed input is not exactly six
    /// characters of `A-Z0-9` (in either case).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();

        if let Some(c) = upper
            .chars()
            .find(|c| !c.is_ascii_uppercase() && !c.is_ascii_digit())
        {
            return Err(Error::Character(c));
        }

        let code: [u8; LENGTH] = upper.as_bytes().try_into().map_err(|_| Error::Length)?;

        Ok(Self(code))
    }
}
