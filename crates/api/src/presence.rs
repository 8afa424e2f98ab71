//! In-memory presence rooms for live poll viewers.
//!
//! One [`LiveRoom`] per poll token, created on the first join and dropped as
//! soon as its last viewer leaves. Nothing here is persisted; clients rejoin
//! after a restart and the snapshot is rebuilt from open connections.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slotvote_core::{SlotUpdatePublisher, SlotUpdates};
use slotvote_db::entities::vote::VoteResponse;
use tokio::sync::{Mutex, MutexGuard, Notify, RwLock, mpsc};
use tracing::{debug, info};

use crate::streaming::ServerMessage;

/// Identifies one WebSocket connection for the lifetime of the process.
pub type ConnectionId = u64;

/// A voter currently shown in a room's presence list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveVoter {
    /// Session ID of the voter.
    pub id: String,
    pub name: String,
    /// Whether the voter has at least one option selected.
    pub is_voting: bool,
}

/// In-progress selections of one voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveVoteEntry {
    pub voter_name: String,
    pub votes: BTreeMap<String, VoteResponse>,
}

/// Presence state of a room as seen by one recipient.
///
/// The recipient's own live-voter entry is left out; `viewer_count` counts
/// every viewer including the recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub active_voters: Vec<ActiveVoter>,
    pub live_votes: BTreeMap<String, LiveVoteEntry>,
    pub viewer_count: usize,
}

struct Viewer {
    connection_id: ConnectionId,
    is_presenter: bool,
    tx: mpsc::Sender<ServerMessage>,
    /// Notified when the viewer is dropped for an unreachable queue, so the
    /// connection can be closed instead of lingering outside the room.
    evicted: Arc<Notify>,
}

struct LiveVoter {
    name: String,
    joined_at: DateTime<Utc>,
    in_progress: BTreeMap<String, VoteResponse>,
}

/// Viewers and composing voters of one poll token.
#[derive(Default)]
struct LiveRoom {
    viewers: HashMap<String, Viewer>,
    live_voters: HashMap<String, LiveVoter>,
    /// Set once the room has been unlinked from the registry.
    closed: bool,
}

type SharedRoom = Arc<Mutex<LiveRoom>>;

impl LiveRoom {
    fn member_mut(&mut self, session_id: &str, connection_id: ConnectionId) -> Option<&mut Viewer> {
        self.viewers
            .get_mut(session_id)
            .filter(|v| v.connection_id == connection_id)
    }

    fn is_member(&self, session_id: &str, connection_id: ConnectionId) -> bool {
        self.viewers
            .get(session_id)
            .is_some_and(|v| v.connection_id == connection_id)
    }

    fn evict(&mut self, session_id: &str) {
        if let Some(viewer) = self.viewers.remove(session_id) {
            viewer.evicted.notify_one();
        }
        self.live_voters.remove(session_id);
    }

    fn snapshot_for(&self, recipient: &str) -> PresenceSnapshot {
        let mut voters: Vec<(&String, &LiveVoter)> = self
            .live_voters
            .iter()
            .filter(|(id, _)| id.as_str() != recipient)
            .collect();
        voters.sort_by(|a, b| a.1.joined_at.cmp(&b.1.joined_at).then_with(|| a.0.cmp(b.0)));

        PresenceSnapshot {
            active_voters: voters
                .iter()
                .map(|(id, voter)| ActiveVoter {
                    id: (*id).clone(),
                    name: voter.name.clone(),
                    is_voting: !voter.in_progress.is_empty(),
                })
                .collect(),
            live_votes: voters
                .iter()
                .filter(|(_, voter)| !voter.in_progress.is_empty())
                .map(|(id, voter)| {
                    (
                        (*id).clone(),
                        LiveVoteEntry {
                            voter_name: voter.name.clone(),
                            votes: voter.in_progress.clone(),
                        },
                    )
                })
                .collect(),
            viewer_count: self.viewers.len(),
        }
    }

    /// Send a per-recipient message to every viewer except `skip`.
    ///
    /// Viewers whose queue is full or closed are evicted afterwards; returns
    /// how many were evicted.
    fn fan_out<F>(&mut self, skip: Option<&str>, mut build: F) -> usize
    where
        F: FnMut(&Self, &str) -> ServerMessage,
    {
        let mut dead = Vec::new();
        for (session_id, viewer) in &self.viewers {
            if skip == Some(session_id.as_str()) {
                continue;
            }
            let message = build(self, session_id);
            if let Err(e) = viewer.tx.try_send(message) {
                debug!(session_id = %session_id, error = %e, "Evicting unreachable viewer");
                dead.push(session_id.clone());
            }
        }

        for session_id in &dead {
            self.evict(session_id);
        }
        dead.len()
    }

    /// Broadcast a presence update to everyone, once more if the first pass
    /// evicted viewers so the survivors see the corrected count.
    fn broadcast_presence(&mut self, skip: Option<&str>) {
        let build = |room: &Self, recipient: &str| ServerMessage::PresenceUpdate {
            presence: room.snapshot_for(recipient),
        };
        if self.fan_out(skip, build) > 0 && !self.viewers.is_empty() {
            self.fan_out(None, build);
        }
    }

    /// Fan out a room-wide event, then re-sync presence if anyone was evicted.
    fn broadcast_event<F>(&mut self, build: F)
    where
        F: FnMut(&Self, &str) -> ServerMessage,
    {
        if self.fan_out(None, build) > 0 && !self.viewers.is_empty() {
            self.broadcast_presence(None);
        }
    }
}

/// Registry of all live rooms, keyed by poll token.
///
/// The map lock is only held to look up, create or unlink a room; all room
/// work happens under that room's own lock.
#[derive(Clone, Default)]
pub struct LiveRegistry {
    rooms: Arc<RwLock<HashMap<String, SharedRoom>>>,
    next_connection: Arc<AtomicU64>,
}

impl LiveRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an ID for a new connection.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a viewer and send it a `joined` snapshot.
    ///
    /// A viewer already registered under `session_id` is replaced. Every
    /// other viewer receives a `presence_update`. `evicted` is notified if the
    /// viewer is later dropped for an unreachable queue.
    #[allow(clippy::too_many_arguments)]
    pub async fn join(
        &self,
        poll_token: &str,
        session_id: &str,
        voter_name: Option<String>,
        is_presenter: bool,
        connection_id: ConnectionId,
        tx: mpsc::Sender<ServerMessage>,
        evicted: Arc<Notify>,
    ) {
        loop {
            let shared = self.room_or_create(poll_token).await;
            let mut room = shared.lock().await;
            // Lost a race with the room being unlinked; take the new one.
            if room.closed {
                continue;
            }

            match voter_name.as_ref().filter(|_| !is_presenter) {
                Some(name) => {
                    room.live_voters
                        .entry(session_id.to_string())
                        .and_modify(|voter| voter.name.clone_from(name))
                        .or_insert_with(|| LiveVoter {
                            name: name.clone(),
                            joined_at: Utc::now(),
                            in_progress: BTreeMap::new(),
                        });
                }
                None => {
                    room.live_voters.remove(session_id);
                }
            }
            let replaced = room.viewers.insert(
                session_id.to_string(),
                Viewer {
                    connection_id,
                    is_presenter,
                    tx,
                    evicted,
                },
            );
            // The older connection of this session is no longer in any room.
            if let Some(old) = replaced.filter(|old| old.connection_id != connection_id) {
                old.evicted.notify_one();
            }

            room.broadcast_presence(Some(session_id));

            let joined = ServerMessage::Joined {
                session_id: session_id.to_string(),
                presence: room.snapshot_for(session_id),
            };
            let delivered = room
                .viewers
                .get(session_id)
                .is_some_and(|viewer| viewer.tx.try_send(joined).is_ok());
            if !delivered {
                room.evict(session_id);
            }

            let viewer_count = room.viewers.len();
            drop(room);
            if viewer_count == 0 {
                self.unlink_if_empty(poll_token, &shared).await;
            }
            info!(poll_token = %poll_token, session_id = %session_id, viewer_count, "Viewer joined");
            return;
        }
    }

    /// Remove a viewer and its live-voter entry.
    ///
    /// Ignored unless the viewer is still bound to `connection_id`, so a
    /// replaced connection closing late does not evict its successor.
    pub async fn leave(&self, poll_token: &str, session_id: &str, connection_id: ConnectionId) {
        let Some(shared) = self.room(poll_token).await else {
            return;
        };
        let mut room = shared.lock().await;
        if room.closed || !room.is_member(session_id, connection_id) {
            return;
        }

        room.viewers.remove(session_id);
        room.live_voters.remove(session_id);

        if room.viewers.is_empty() {
            drop(room);
            self.unlink_if_empty(poll_token, &shared).await;
            return;
        }

        room.broadcast_presence(None);
        info!(poll_token = %poll_token, session_id = %session_id, "Viewer left");
        self.finish(poll_token, &shared, room).await;
    }

    /// Set (`Some`) or clear (`None`) an in-progress selection.
    ///
    /// Only viewers that joined as voters may compose; presenters may not.
    /// Returns whether the update was applied.
    pub async fn set_in_progress(
        &self,
        poll_token: &str,
        session_id: &str,
        connection_id: ConnectionId,
        option_id: &str,
        response: Option<VoteResponse>,
    ) -> bool {
        let Some(shared) = self.room(poll_token).await else {
            return false;
        };
        let mut room = shared.lock().await;
        if room.closed
            || room
                .member_mut(session_id, connection_id)
                .is_none_or(|viewer| viewer.is_presenter)
        {
            return false;
        }
        let Some(voter) = room.live_voters.get_mut(session_id) else {
            return false;
        };

        match response {
            Some(response) => {
                voter.in_progress.insert(option_id.to_string(), response);
            }
            None => {
                voter.in_progress.remove(option_id);
            }
        }

        room.broadcast_event(|room, recipient| ServerMessage::LiveVoteUpdate {
            session_id: session_id.to_string(),
            presence: room.snapshot_for(recipient),
        });
        self.finish(poll_token, &shared, room).await;
        true
    }

    /// Finalize a voter: its vote is durable now and no longer "in progress".
    pub async fn submitted(
        &self,
        poll_token: &str,
        session_id: &str,
        connection_id: ConnectionId,
        voter_name: &str,
    ) -> bool {
        let Some(shared) = self.room(poll_token).await else {
            return false;
        };
        let mut room = shared.lock().await;
        if room.closed || !room.is_member(session_id, connection_id) {
            return false;
        }

        room.live_voters.remove(session_id);

        room.broadcast_event(|room, recipient| ServerMessage::VoteFinalized {
            session_id: session_id.to_string(),
            voter_name: voter_name.to_string(),
            presence: room.snapshot_for(recipient),
        });
        self.finish(poll_token, &shared, room).await;
        true
    }

    /// Flip the presenter flag. Nobody else is notified.
    pub async fn set_presenting(
        &self,
        poll_token: &str,
        session_id: &str,
        connection_id: ConnectionId,
        is_presenter: bool,
    ) -> bool {
        let Some(shared) = self.room(poll_token).await else {
            return false;
        };
        let mut room = shared.lock().await;
        match room.member_mut(session_id, connection_id) {
            Some(viewer) => {
                viewer.is_presenter = is_presenter;
                true
            }
            None => false,
        }
    }

    /// Rename a viewer, creating its live-voter entry if missing.
    pub async fn rename(
        &self,
        poll_token: &str,
        session_id: &str,
        connection_id: ConnectionId,
        voter_name: &str,
    ) -> bool {
        let Some(shared) = self.room(poll_token).await else {
            return false;
        };
        let mut room = shared.lock().await;
        if room.closed || !room.is_member(session_id, connection_id) {
            return false;
        }

        room.live_voters
            .entry(session_id.to_string())
            .and_modify(|voter| voter.name = voter_name.to_string())
            .or_insert_with(|| LiveVoter {
                name: voter_name.to_string(),
                joined_at: Utc::now(),
                in_progress: BTreeMap::new(),
            });

        room.broadcast_presence(None);
        self.finish(poll_token, &shared, room).await;
        true
    }

    /// Push slot counters to every viewer of `poll_token`. No-op without a room.
    pub async fn broadcast_slot_update(&self, poll_token: &str, updates: &SlotUpdates) {
        self.broadcast_all(poll_token, || ServerMessage::SlotUpdate {
            poll_token: poll_token.to_string(),
            updates: updates.clone(),
        })
        .await;
    }

    /// Ask every viewer of `poll_token` to reload results. No-op without a room.
    pub async fn broadcast_results_refresh(&self, poll_token: &str) {
        self.broadcast_all(poll_token, || ServerMessage::ResultsRefresh {
            poll_token: poll_token.to_string(),
        })
        .await;
    }

    /// Number of viewers in a room, `None` when no room exists.
    pub async fn viewer_count(&self, poll_token: &str) -> Option<usize> {
        let shared = self.room(poll_token).await?;
        let room = shared.lock().await;
        (!room.closed).then(|| room.viewers.len())
    }

    /// Number of open rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn broadcast_all<F>(&self, poll_token: &str, build: F)
    where
        F: Fn() -> ServerMessage,
    {
        let Some(shared) = self.room(poll_token).await else {
            return;
        };
        let mut room = shared.lock().await;
        if room.closed {
            return;
        }
        room.broadcast_event(|_, _| build());
        self.finish(poll_token, &shared, room).await;
    }

    async fn room(&self, poll_token: &str) -> Option<SharedRoom> {
        self.rooms.read().await.get(poll_token).cloned()
    }

    async fn room_or_create(&self, poll_token: &str) -> SharedRoom {
        if let Some(room) = self.room(poll_token).await {
            return room;
        }
        let mut rooms = self.rooms.write().await;
        Arc::clone(rooms.entry(poll_token.to_string()).or_default())
    }

    /// Release the room lock and unlink the room if it ended up empty.
    async fn finish(&self, poll_token: &str, shared: &SharedRoom, room: MutexGuard<'_, LiveRoom>) {
        let empty = room.viewers.is_empty();
        drop(room);
        if empty {
            self.unlink_if_empty(poll_token, shared).await;
        }
    }

    /// Takes the map lock before the room lock; callers must not hold the
    /// room lock.
    async fn unlink_if_empty(&self, poll_token: &str, shared: &SharedRoom) {
        let mut rooms = self.rooms.write().await;
        let mut room = shared.lock().await;
        if room.closed || !room.viewers.is_empty() {
            return;
        }
        room.closed = true;
        if rooms.get(poll_token).is_some_and(|r| Arc::ptr_eq(r, shared)) {
            rooms.remove(poll_token);
        }
        debug!(poll_token = %poll_token, "Room closed");
    }
}

#[async_trait]
impl SlotUpdatePublisher for LiveRegistry {
    async fn publish_slot_update(&self, poll_token: &str, updates: &SlotUpdates) {
        self.broadcast_slot_update(poll_token, updates).await;
    }

    async fn publish_results_refresh(&self, poll_token: &str) {
        self.broadcast_results_refresh(poll_token).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use slotvote_core::SlotCount;
    use std::time::Duration;

    fn connect(registry: &LiveRegistry) -> (ConnectionId, mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (registry.next_connection_id(), tx, rx)
    }

    fn presence_of(message: ServerMessage) -> PresenceSnapshot {
        match message {
            ServerMessage::Joined { presence, .. }
            | ServerMessage::PresenceUpdate { presence }
            | ServerMessage::LiveVoteUpdate { presence, .. }
            | ServerMessage::VoteFinalized { presence, .. } => presence,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_reply_omits_own_entry() {
        let registry = LiveRegistry::new();
        let (conn, tx, mut rx) = connect(&registry);

        registry
            .join("T1", "anna", Some("Anna".to_string()), false, conn, tx, Arc::default())
            .await;

        let reply = rx.recv().await.unwrap();
        assert!(matches!(reply, ServerMessage::Joined { .. }));
        let presence = presence_of(reply);
        assert_eq!(presence.viewer_count, 1);
        assert!(presence.active_voters.is_empty());
        assert!(presence.live_votes.is_empty());
    }

    #[tokio::test]
    async fn test_join_notifies_existing_viewers() {
        let registry = LiveRegistry::new();
        let (b_conn, b_tx, mut b_rx) = connect(&registry);
        registry.join("T1", "ben", None, false, b_conn, b_tx, Arc::default()).await;
        b_rx.recv().await.unwrap();

        let (a_conn, a_tx, _a_rx) = connect(&registry);
        registry
            .join("T1", "anna", Some("Anna".to_string()), false, a_conn, a_tx, Arc::default())
            .await;

        let update = b_rx.recv().await.unwrap();
        assert!(matches!(update, ServerMessage::PresenceUpdate { .. }));
        let presence = presence_of(update);
        assert_eq!(presence.viewer_count, 2);
        assert_eq!(
            presence.active_voters,
            vec![ActiveVoter {
                id: "anna".to_string(),
                name: "Anna".to_string(),
                is_voting: false,
            }]
        );
        // Joined but idle voters are not in liveVotes.
        assert!(presence.live_votes.is_empty());
    }

    #[tokio::test]
    async fn test_compose_and_submit_scenario() {
        let registry = LiveRegistry::new();
        let (a_conn, a_tx, mut a_rx) = connect(&registry);
        let (b_conn, b_tx, mut b_rx) = connect(&registry);

        registry
            .join("T1", "anna", Some("Anna".to_string()), false, a_conn, a_tx, Arc::default())
            .await;
        registry.join("T1", "ben", None, false, b_conn, b_tx, Arc::default()).await;
        while a_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        assert!(
            registry
                .set_in_progress("T1", "anna", a_conn, "7", Some(VoteResponse::Yes))
                .await
        );

        let update = b_rx.recv().await.unwrap();
        assert!(matches!(update, ServerMessage::LiveVoteUpdate { .. }));
        let presence = presence_of(update);
        let entry = presence.live_votes.get("anna").unwrap();
        assert_eq!(entry.voter_name, "Anna");
        assert_eq!(entry.votes.get("7"), Some(&VoteResponse::Yes));
        assert!(presence.active_voters[0].is_voting);

        assert!(registry.submitted("T1", "anna", a_conn, "Anna").await);

        let finalized = b_rx.recv().await.unwrap();
        assert!(matches!(finalized, ServerMessage::VoteFinalized { .. }));
        let presence = presence_of(finalized);
        assert!(!presence.live_votes.contains_key("anna"));
        assert!(presence.active_voters.is_empty());
    }

    #[tokio::test]
    async fn test_clearing_last_selection_leaves_live_votes() {
        let registry = LiveRegistry::new();
        let (a_conn, a_tx, _a_rx) = connect(&registry);
        let (b_conn, b_tx, mut b_rx) = connect(&registry);
        registry
            .join("T1", "anna", Some("Anna".to_string()), false, a_conn, a_tx, Arc::default())
            .await;
        registry.join("T1", "ben", None, false, b_conn, b_tx, Arc::default()).await;

        registry
            .set_in_progress("T1", "anna", a_conn, "7", Some(VoteResponse::Maybe))
            .await;
        registry.set_in_progress("T1", "anna", a_conn, "7", None).await;
        while let Ok(message) = b_rx.try_recv() {
            if let ServerMessage::LiveVoteUpdate { presence, .. } = message {
                if presence.live_votes.is_empty() {
                    assert!(!presence.active_voters[0].is_voting);
                    return;
                }
            }
        }
        panic!("no update with cleared selection");
    }

    #[tokio::test]
    async fn test_viewer_without_name_cannot_compose() {
        let registry = LiveRegistry::new();
        let (conn, tx, _rx) = connect(&registry);
        registry.join("T1", "ben", None, false, conn, tx, Arc::default()).await;

        assert!(
            !registry
                .set_in_progress("T1", "ben", conn, "7", Some(VoteResponse::Yes))
                .await
        );
    }

    #[tokio::test]
    async fn test_presenter_is_not_a_live_voter() {
        let registry = LiveRegistry::new();
        let (p_conn, p_tx, _p_rx) = connect(&registry);
        let (b_conn, b_tx, mut b_rx) = connect(&registry);
        registry.join("T1", "ben", None, false, b_conn, b_tx, Arc::default()).await;
        b_rx.recv().await.unwrap();

        registry
            .join("T1", "stage", Some("Stage".to_string()), true, p_conn, p_tx, Arc::default())
            .await;

        let presence = presence_of(b_rx.recv().await.unwrap());
        assert_eq!(presence.viewer_count, 2);
        assert!(presence.active_voters.is_empty());
    }

    #[tokio::test]
    async fn test_last_leave_drops_room() {
        let registry = LiveRegistry::new();
        let (conn, tx, _rx) = connect(&registry);
        registry
            .join("T1", "anna", Some("Anna".to_string()), false, conn, tx, Arc::default())
            .await;
        assert_eq!(registry.viewer_count("T1").await, Some(1));

        registry.leave("T1", "anna", conn).await;
        assert_eq!(registry.viewer_count("T1").await, None);
        assert_eq!(registry.room_count().await, 0);

        let (conn, tx, mut rx) = connect(&registry);
        registry
            .join("T1", "anna", Some("Anna".to_string()), false, conn, tx, Arc::default())
            .await;
        assert_eq!(presence_of(rx.recv().await.unwrap()).viewer_count, 1);
    }

    #[tokio::test]
    async fn test_stale_connection_does_not_evict_successor() {
        let registry = LiveRegistry::new();
        let (old_conn, old_tx, _old_rx) = connect(&registry);
        let (new_conn, new_tx, _new_rx) = connect(&registry);
        let old_evicted = Arc::new(Notify::new());

        registry
            .join("T1", "anna", Some("Anna".to_string()), false, old_conn, old_tx, Arc::clone(&old_evicted))
            .await;
        registry
            .join("T1", "anna", Some("Anna".to_string()), false, new_conn, new_tx, Arc::default())
            .await;
        assert_eq!(registry.viewer_count("T1").await, Some(1));
        tokio::time::timeout(Duration::from_millis(100), old_evicted.notified())
            .await
            .unwrap();

        registry.leave("T1", "anna", old_conn).await;
        assert_eq!(registry.viewer_count("T1").await, Some(1));

        registry.leave("T1", "anna", new_conn).await;
        assert_eq!(registry.viewer_count("T1").await, None);
    }

    #[tokio::test]
    async fn test_closed_viewer_removed_on_broadcast() {
        let registry = LiveRegistry::new();
        let (a_conn, a_tx, a_rx) = connect(&registry);
        let (b_conn, b_tx, mut b_rx) = connect(&registry);
        registry.join("T1", "anna", None, false, a_conn, a_tx, Arc::default()).await;
        registry.join("T1", "ben", None, false, b_conn, b_tx, Arc::default()).await;
        drop(a_rx);

        registry.broadcast_results_refresh("T1").await;

        assert_eq!(registry.viewer_count("T1").await, Some(1));
        let mut saw_refresh = false;
        while let Ok(message) = b_rx.try_recv() {
            if matches!(message, ServerMessage::ResultsRefresh { .. }) {
                saw_refresh = true;
            }
        }
        assert!(saw_refresh);
    }

    #[tokio::test]
    async fn test_slot_update_fan_out() {
        let registry = LiveRegistry::new();
        let (conn, tx, mut rx) = connect(&registry);
        registry.join("adm", "owner", None, false, conn, tx, Arc::default()).await;
        rx.recv().await.unwrap();

        let mut updates = SlotUpdates::new();
        updates.insert(
            "o1".to_string(),
            SlotCount {
                current_count: 2,
                max_capacity: Some(2),
            },
        );
        registry.publish_slot_update("adm", &updates).await;
        // No room for this token: nothing to do.
        registry.publish_slot_update("pub", &updates).await;

        match rx.recv().await.unwrap() {
            ServerMessage::SlotUpdate {
                poll_token,
                updates: received,
            } => {
                assert_eq!(poll_token, "adm");
                assert_eq!(received, updates);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_and_signals_viewer() {
        let registry = LiveRegistry::new();
        let (a_tx, _a_rx) = mpsc::channel(1);
        let a_conn = registry.next_connection_id();
        let a_evicted = Arc::new(Notify::new());
        registry
            .join("T1", "anna", Some("Anna".to_string()), false, a_conn, a_tx, Arc::clone(&a_evicted))
            .await;

        // Anna never drains her queue, so the presence update for Ben's join
        // does not fit.
        let (b_conn, b_tx, mut b_rx) = connect(&registry);
        registry.join("T1", "ben", None, false, b_conn, b_tx, Arc::default()).await;

        tokio::time::timeout(Duration::from_millis(100), a_evicted.notified())
            .await
            .unwrap();
        assert_eq!(registry.viewer_count("T1").await, Some(1));
        assert!(
            !registry
                .set_in_progress("T1", "anna", a_conn, "7", Some(VoteResponse::Yes))
                .await
        );

        let presence = presence_of(b_rx.recv().await.unwrap());
        assert_eq!(presence.viewer_count, 1);
        assert!(presence.active_voters.is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_as_presenter_clears_live_voter() {
        let registry = LiveRegistry::new();
        let (b_conn, b_tx, mut b_rx) = connect(&registry);
        registry.join("T1", "ben", None, false, b_conn, b_tx, Arc::default()).await;

        let (a_conn, a_tx, _a_rx) = connect(&registry);
        registry
            .join("T1", "anna", Some("Anna".to_string()), false, a_conn, a_tx, Arc::default())
            .await;
        let (a2_conn, a2_tx, _a2_rx) = connect(&registry);
        registry
            .join("T1", "anna", Some("Anna".to_string()), true, a2_conn, a2_tx, Arc::default())
            .await;

        let mut last = None;
        while let Ok(message) = b_rx.try_recv() {
            last = Some(message);
        }
        let presence = presence_of(last.unwrap());
        assert_eq!(presence.viewer_count, 2);
        assert!(presence.active_voters.is_empty());
    }

    #[tokio::test]
    async fn test_presenter_cannot_compose() {
        let registry = LiveRegistry::new();
        let (conn, tx, _rx) = connect(&registry);
        registry
            .join("T1", "anna", Some("Anna".to_string()), false, conn, tx, Arc::default())
            .await;

        assert!(registry.set_presenting("T1", "anna", conn, true).await);
        assert!(
            !registry
                .set_in_progress("T1", "anna", conn, "7", Some(VoteResponse::Yes))
                .await
        );

        assert!(registry.set_presenting("T1", "anna", conn, false).await);
        assert!(
            registry
                .set_in_progress("T1", "anna", conn, "7", Some(VoteResponse::Yes))
                .await
        );
    }

    #[tokio::test]
    async fn test_rooms_are_independent() {
        let registry = LiveRegistry::new();
        let (a_conn, a_tx, _a_rx) = connect(&registry);
        let (b_conn, b_tx, mut b_rx) = connect(&registry);
        registry.join("T1", "anna", None, false, a_conn, a_tx, Arc::default()).await;
        registry.join("T2", "ben", None, false, b_conn, b_tx, Arc::default()).await;
        b_rx.recv().await.unwrap();

        registry.broadcast_results_refresh("T1").await;
        registry.leave("T1", "anna", a_conn).await;

        assert!(b_rx.try_recv().is_err());
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(registry.viewer_count("T2").await, Some(1));
    }

    #[tokio::test]
    async fn test_rename_creates_live_voter() {
        let registry = LiveRegistry::new();
        let (a_conn, a_tx, _a_rx) = connect(&registry);
        let (b_conn, b_tx, mut b_rx) = connect(&registry);
        registry.join("T1", "anna", None, false, a_conn, a_tx, Arc::default()).await;
        registry.join("T1", "ben", None, false, b_conn, b_tx, Arc::default()).await;
        while b_rx.try_recv().is_ok() {}

        assert!(registry.rename("T1", "anna", a_conn, "Anna").await);

        let presence = presence_of(b_rx.recv().await.unwrap());
        assert_eq!(presence.active_voters.len(), 1);
        assert_eq!(presence.active_voters[0].name, "Anna");
    }
}
