//! Outbound half of a client connection
//!
//! The room never talks to sockets directly. Everything it sends goes
//! through a [`Tunnel`], which lets the same room logic drive WebSocket
//! connections in production and recording mocks in tests.

use super::{SyncMessage, UpdateMessage};

/// Trait for sending messages through a communication tunnel
///
/// Implementations must not block: a room calls these methods while
/// holding its lock, so a slow client must be buffered or dropped by the
/// tunnel rather than stall the room.
pub trait Tunnel {
    /// Sends an update message to the client
    ///
    /// Update messages notify clients about changes that affect their
    /// current view or state.
    fn send_message(&self, message: &UpdateMessage);

    /// Sends a state synchronization message to the client
    ///
    /// Sync messages carry a full snapshot of what the client should be
    /// showing, and are sent whenever a connection attaches to a room.
    fn send_state(&self, state: &SyncMessage);

    /// Closes the communication tunnel
    fn close(self);
}
