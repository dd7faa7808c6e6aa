//! Per-room subscriber set
//!
//! Every connection attached to a room is registered here together with
//! its role and its [`Tunnel`]. A room pushes each state change through the
//! broadcaster in the same lock section that made the change, so no
//! subscriber ever observes a mutation before it has been announced.

use std::{
    collections::HashMap,
    fmt::Display,
    str::FromStr,
};

use derive_where::derive_where;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

use crate::{SyncMessage, UpdateMessage, session::Tunnel};

/// A unique identifier for one client connection
///
/// A player who reconnects gets a new connection id while keeping their
/// player id.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new random connection id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    /// Creates a new random connection id (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The role a connection plays in its room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The connection driving question progression
    Host,
    /// A connection answering questions
    Player,
}

/// A handshake named a role other than `host` or `player`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(Self::Host),
            "player" => Ok(Self::Player),
            _ => Err(UnknownRole(s.to_owned())),
        }
    }
}

/// Subscribers of a single room
#[derive_where(Default)]
pub struct Broadcaster<T> {
    mapping: HashMap<ConnectionId, (Role, T)>,
}

impl<T: Tunnel> Broadcaster<T> {
    /// Registers a connection
    ///
    /// # Returns
    ///
    /// The tunnel previously registered under the same connection id, if any
    pub fn subscribe(&mut self, connection: ConnectionId, role: Role, tunnel: T) -> Option<T> {
        let previous = self.unsubscribe(connection);
        self.mapping.insert(connection, (role, tunnel));
        previous
    }

    /// Removes a connection without closing its tunnel
    ///
    /// # Returns
    ///
    /// The tunnel that was registered, so the caller may still use or close it
    pub fn unsubscribe(&mut self, connection: ConnectionId) -> Option<T> {
        self.mapping.remove(&connection).map(|(_, tunnel)| tunnel)
    }

    /// Removes a connection, sends it a final message and closes its tunnel
    pub fn close(&mut self, connection: ConnectionId, farewell: Option<&UpdateMessage>) -> bool {
        match self.unsubscribe(connection) {
            Some(tunnel) => {
                if let Some(message) = farewell {
                    tunnel.send_message(message);
                }
                tunnel.close();
                true
            }
            None => false,
        }
    }

    /// Closes every tunnel and empties the subscriber set
    pub fn close_all(&mut self) {
        for (_, (_, tunnel)) in self.mapping.drain() {
            tunnel.close();
        }
    }

    /// Gets the role of a subscribed connection
    pub fn role(&self, connection: ConnectionId) -> Option<Role> {
        self.mapping.get(&connection).map(|(role, _)| *role)
    }

    /// Number of subscribed connections
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Whether nobody is subscribed
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Sends a message to every subscriber
    pub fn broadcast(&self, message: &UpdateMessage) {
        for (_, tunnel) in self.mapping.values() {
            tunnel.send_message(message);
        }
    }

    /// Sends a message to exactly one subscriber
    ///
    /// # Returns
    ///
    /// `false` if the connection is not subscribed
    pub fn unicast(&self, connection: ConnectionId, message: &UpdateMessage) -> bool {
        match self.mapping.get(&connection) {
            Some((_, tunnel)) => {
                tunnel.send_message(message);
                true
            }
            None => false,
        }
    }

    /// Sends a state snapshot to exactly one subscriber
    pub fn send_state(&self, connection: ConnectionId, state: &SyncMessage) -> bool {
        match self.mapping.get(&connection) {
            Some((_, tunnel)) => {
                tunnel.send_state(state);
                true
            }
            None => false,
        }
    }
}
