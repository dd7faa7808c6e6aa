//! Game code to room mapping
//!
//! The map sits behind a read-write lock so lookups from many connections
//! proceed in parallel, while every room sits behind its own mutex. A
//! caller never holds the map lock while waiting on a room lock.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use derive_where::derive_where;
use itertools::Itertools;
use tokio::sync::{Mutex, RwLock};

use crate::{
    UpdateMessage,
    error::{Error, Result},
    game_code::GameCode,
    room::Room,
    session::Tunnel,
};

/// A room shared between connections and timers
pub type SharedRoom<T> = Arc<Mutex<Room<T>>>;

/// Registry of every live room
#[derive_where(Default)]
pub struct RoomRegistry<T> {
    rooms: RwLock<HashMap<GameCode, SharedRoom<T>>>,
}

impl<T: Tunnel> RoomRegistry<T> {
    /// Looks up a live room
    pub async fn get(&self, code: GameCode) -> Option<SharedRoom<T>> {
        self.rooms.read().await.get(&code).cloned()
    }

    /// Looks up a room, creating it with `create` if the code is unknown
    ///
    /// # Returns
    ///
    /// The room and whether it was created by this call
    pub async fn get_or_create<F>(&self, code: GameCode, create: F) -> (SharedRoom<T>, bool)
    where
        F: FnOnce() -> Room<T>,
    {
        if let Some(room) = self.get(code).await {
            return (room, false);
        }
        match self.rooms.write().await.entry(code) {
            Entry::Occupied(o) => (o.get().clone(), false),
            Entry::Vacant(v) => {
                tracing::info!(game_code = %code, "room created");
                (v.insert(Arc::new(Mutex::new(create()))).clone(), true)
            }
        }
    }

    /// Registers a room under a freshly generated code
    ///
    /// The code is picked and the room inserted under one write lock, so two
    /// concurrent calls can never end up with the same code.
    pub async fn create_unique<F>(&self, create: F) -> (GameCode, SharedRoom<T>)
    where
        F: FnOnce(GameCode) -> Room<T>,
    {
        let mut rooms = self.rooms.write().await;
        let code = Self::unused_code(&rooms);
        let room = Arc::new(Mutex::new(create(code)));
        rooms.insert(code, room.clone());
        tracing::info!(game_code = %code, "room created");
        (code, room)
    }

    /// Generates a code that no live room uses
    ///
    /// The code is not reserved; use [`RoomRegistry::create_unique`] to
    /// register a room atomically.
    pub async fn generate_unique_code(&self) -> GameCode {
        Self::unused_code(&*self.rooms.read().await)
    }

    fn unused_code(rooms: &HashMap<GameCode, SharedRoom<T>>) -> GameCode {
        loop {
            let code = GameCode::new();
            if !rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// Removes a room regardless of which instance is registered
    pub async fn remove(&self, code: GameCode) -> Option<SharedRoom<T>> {
        let removed = self.rooms.write().await.remove(&code);
        if removed.is_some() {
            tracing::info!(game_code = %code, "room removed");
        }
        removed
    }

    /// Removes a room only if `room` is the instance registered under `code`
    ///
    /// A stale timer for a room that has since been replaced by a new one
    /// with the same code must not tear down the newcomer.
    pub async fn remove_if_same(&self, code: GameCode, room: &SharedRoom<T>) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.entry(code) {
            Entry::Occupied(o) if Arc::ptr_eq(o.get(), room) => {
                o.remove();
                tracing::info!(game_code = %code, "room removed");
                true
            }
            _ => false,
        }
    }

    /// Number of live rooms
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Whether no rooms are live
    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    /// Codes of every live room, sorted
    pub async fn codes(&self) -> Vec<GameCode> {
        self.rooms.read().await.keys().copied().sorted().collect_vec()
    }

    /// Snapshot of every live room
    pub async fn rooms(&self) -> Vec<(GameCode, SharedRoom<T>)> {
        self.rooms
            .read()
            .await
            .iter()
            .map(|(code, room)| (*code, room.clone()))
            .collect_vec()
    }

    /// Sends a message to everyone in a room
    ///
    /// # Errors
    ///
    /// `Error::RoomNotFound` if no live room has this code
    pub async fn broadcast(&self, code: GameCode, message: &UpdateMessage) -> Result<()> {
        let room = self.get(code).await.ok_or(Error::RoomNotFound(code))?;
        room.lock().await.broadcast(message);
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{
        broadcaster::ConnectionId, config::GameConfig, session::mock::MockTunnel,
    };

    fn empty_room(code: GameCode) -> Room<MockTunnel> {
        Room::new(code, GameConfig::default())
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = RoomRegistry::<MockTunnel>::default();
        let code: GameCode = "ABC123".parse().unwrap();

        let (first, created) = registry.get_or_create(code, || empty_room(code)).await;
        assert!(created);
        let (second, created) = registry.get_or_create(code, || empty_room(code)).await;
        assert!(!created);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_code_is_not_created_by_get() {
        let registry = RoomRegistry::<MockTunnel>::default();
        assert!(registry.get("ZZZ999".parse().unwrap()).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_create_unique_codes_differ() {
        let registry = RoomRegistry::<MockTunnel>::default();

        let mut codes = Vec::new();
        for _ in 0..50 {
            let (code, room) = registry.create_unique(empty_room).await;
            assert_eq!(room.lock().await.game_code(), code);
            codes.push(code);
        }

        assert_eq!(codes.iter().unique().count(), 50);
        assert_eq!(registry.codes().await.len(), 50);
    }

    #[tokio::test]
    async fn test_generate_unique_code_avoids_live_rooms() {
        let registry = RoomRegistry::<MockTunnel>::default();
        for _ in 0..200 {
            registry.create_unique(empty_room).await;
        }
        let live = registry.codes().await;

        for _ in 0..50 {
            let code = registry.generate_unique_code().await;
            assert!(!live.contains(&code));
        }
        assert_eq!(registry.len().await, 200);
    }

    #[tokio::test]
    async fn test_remove_if_same() {
        let registry = RoomRegistry::<MockTunnel>::default();
        let code: GameCode = "ROOM01".parse().unwrap();
        let (old, _) = registry.get_or_create(code, || empty_room(code)).await;

        assert!(registry.remove(code).await.is_some());
        let (new, _) = registry.get_or_create(code, || empty_room(code)).await;

        assert!(!registry.remove_if_same(code, &old).await);
        assert!(registry.get(code).await.is_some());
        assert!(registry.remove_if_same(code, &new).await);
        assert!(registry.get(code).await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast() {
        let registry = RoomRegistry::<MockTunnel>::default();
        let code: GameCode = "ROOM02".parse().unwrap();
        let (room, _) = registry.get_or_create(code, || empty_room(code)).await;
        let tunnel = MockTunnel::default();
        room.lock()
            .await
            .join_player(ConnectionId::new(), tunnel.clone(), None, "Alice")
            .unwrap();

        registry
            .broadcast(code, &UpdateMessage::HostDisconnected)
            .await
            .unwrap();
        assert_eq!(tunnel.count("hostDisconnected"), 1);

        assert_eq!(
            registry
                .broadcast("NOPE00".parse().unwrap(), &UpdateMessage::HostDisconnected)
                .await,
            Err(Error::RoomNotFound("NOPE00".parse().unwrap()))
        );
    }
}
