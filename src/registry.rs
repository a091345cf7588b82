//! Two-level session index: `RoomId → Room → (ChannelId → Session)`, plus a
//! global broadcast set. See `SPEC_FULL.md` §3/§4.5.
//!
//! Grounded on `server/room.go` + `server/room_manager.go` in the original
//! source: `Add`/`AddOrReplace`/`Del`/`DelIfEqual`/`Range` (snapshot then
//! iterate outside the lock), and `Manager.GetOrCreate`'s double-checked
//! locking. Implemented with `tokio::sync::RwLock<HashMap<...>>` at both
//! levels — the daemon's own concurrent-map idiom (e.g. `config/mod.rs`'s
//! `HotConfig`, `session/mod.rs`'s `handles: RwLock<HashMap<...>>`) rather
//! than a third-party concurrent map the corpus never reaches for.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::session::Session;

/// A tenant-scoped bag of sessions keyed by channel id.
pub struct Room {
    members: RwLock<HashMap<String, Arc<Session>>>,
}

impl Room {
    fn new() -> Self {
        Room {
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Atomically installs `session` under `channel_id`, returning whatever
    /// session previously occupied that slot. The caller closes the
    /// returned session *after* releasing the room lock — it has already
    /// been evicted from the registry by the time its own `on_close` fires,
    /// so that hook's `del_if_equal` call becomes a safe no-op. This is the
    /// replacement-safety invariant in `SPEC_FULL.md` §5/§8.
    pub async fn add_or_replace(
        &self,
        channel_id: String,
        session: Arc<Session>,
    ) -> Option<Arc<Session>> {
        self.members.write().await.insert(channel_id, session)
    }

    /// Conditional delete: removes `channel_id` only if it still maps to
    /// `session` (compared by identity, not by value). Prevents a stale
    /// session's `on_close` from evicting whatever replaced it.
    pub async fn del_if_equal(&self, channel_id: &str, session: &Arc<Session>) -> bool {
        let mut members = self.members.write().await;
        match members.get(channel_id) {
            Some(current) if current.id() == session.id() => {
                members.remove(channel_id);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, channel_id: &str) -> Option<Arc<Session>> {
        self.members.read().await.get(channel_id).cloned()
    }

    pub async fn size(&self) -> usize {
        self.members.read().await.len()
    }

    /// Snapshot the current members under the read lock, then return that
    /// snapshot for the caller to iterate outside any lock — the iteration
    /// contract in `SPEC_FULL.md` §4.5: user-reachable code (push filters)
    /// must never run while holding the registry lock.
    pub async fn snapshot(&self) -> Vec<(String, Arc<Session>)> {
        self.members
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// `map(RoomId → Room)` plus a `set(Session)` used for broadcast iteration.
pub struct Registry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    broadcast: RwLock<HashMap<u64, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            rooms: RwLock::new(HashMap::new()),
            broadcast: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Double-checked creation: a read-lock probe first (the common case —
    /// the room usually already exists), falling back to a write-lock
    /// re-check-and-insert only on a miss.
    pub async fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return room.clone();
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Room::new()))
            .clone()
    }

    /// Removes an empty room. Called from a session's `on_close` hook after
    /// `del_if_equal` once `Room::size() == 0`.
    pub async fn del_room_if_empty(&self, room_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            if room.size().await == 0 {
                rooms.remove(room_id);
            }
        }
    }

    pub async fn add_to_broadcast(&self, session: Arc<Session>) {
        self.broadcast.write().await.insert(session.id(), session);
    }

    pub async fn remove_from_broadcast(&self, session_id: u64) {
        self.broadcast.write().await.remove(&session_id);
    }

    /// Snapshot of every session registered anywhere in the registry,
    /// outside any lock — the same discipline as `Room::snapshot`.
    pub async fn broadcast_snapshot(&self) -> Vec<Arc<Session>> {
        self.broadcast.read().await.values().cloned().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
