//! Player name management and validation
//!
//! This module handles the assignment and validation of display names within
//! a room. It ensures name uniqueness, filters inappropriate content, and
//! maintains bidirectional mappings between player ids and names so that a
//! name freed by a departing player can be claimed again.

use std::collections::{HashMap, hash_map::Entry};

use rustrict::CensorStr;
use serde::Serialize;
use thiserror::Error;

use crate::{constants::player::MAX_NAME_LENGTH, room::PlayerId};

/// Manages player names and their associations with player ids
///
/// Names are compared exactly after whitespace trimming, so `Alice` and
/// `alice` are two different names.
#[derive(Debug, Default, Clone)]
pub struct Names {
    /// Primary mapping from player id to name
    mapping: HashMap<PlayerId, String>,
    /// Reverse mapping from name to player id
    reverse_mapping: HashMap<String, PlayerId>,
}

/// Errors that can occur during name validation and assignment
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested name is already in use by another player
    #[error("name already in-use")]
    Used,
    /// The player already has an assigned name
    #[error("player has an existing name")]
    Assigned,
    /// The name is empty or contains only whitespace
    #[error("name cannot be empty")]
    Empty,
    /// The name contains inappropriate content
    #[error("name is inappropriate")]
    Sinful,
    /// The name exceeds the maximum allowed length
    #[error("name is too long")]
    TooLong,
}

impl Names {
    /// Checks a requested name without assigning it
    ///
    /// # Returns
    ///
    /// The cleaned name, trimmed of surrounding whitespace.
    ///
    /// # Errors
    ///
    /// * `Error::TooLong` - Name exceeds 30 bytes
    /// * `Error::Empty` - Name is empty after trimming whitespace
    /// * `Error::Sinful` - Name contains inappropriate content
    /// * `Error::Used` - Name is already taken by a different player
    pub fn check(&self, id: &PlayerId, name: &str) -> Result<String, Error> {
        if name.len() > MAX_NAME_LENGTH {
            return Err(Error::TooLong);
        }
        let name = rustrict::trim_whitespace(name);
        if name.is_empty() {
            return Err(Error::Empty);
        }
        if name.is_inappropriate() {
            return Err(Error::Sinful);
        }
        match self.reverse_mapping.get(name) {
            Some(owner) if owner != id => Err(Error::Used),
            _ => Ok(name.to_owned()),
        }
    }

    /// Assigns a name to a player after validation
    ///
    /// # Arguments
    ///
    /// * `id` - The player id to assign the name to
    /// * `name` - The requested name (will be trimmed of whitespace)
    ///
    /// # Returns
    ///
    /// The cleaned and assigned name on success.
    ///
    /// # Errors
    ///
    /// Everything [`Names::check`] rejects, plus `Error::Assigned` when the
    /// player already holds a name.
    pub fn set_name(&mut self, id: &PlayerId, name: &str) -> Result<String, Error> {
        let name = self.check(id, name)?;
        match self.mapping.entry(id.clone()) {
            Entry::Occupied(_) => Err(Error::Assigned),
            Entry::Vacant(v) => {
                v.insert(name.clone());
                self.reverse_mapping.insert(name.clone(), id.clone());
                Ok(name)
            }
        }
    }

    /// Releases the name held by a player
    ///
    /// # Returns
    ///
    /// The released name, if the player held one
    pub fn remove(&mut self, id: &PlayerId) -> Option<String> {
        let name = self.mapping.remove(id)?;
        self.reverse_mapping.remove(&name);
        Some(name)
    }
}
