//! Room membership and fan-out.
//!
//! A [`RoomRegistry`] maps each project to the connections currently joined to
//! it. Every connection owns a bounded outbound queue that its writer task
//! drains. Publishing snapshots the room and `try_send`s a pre-encoded frame
//! to each member, so one stalled client never holds up the others: a member
//! whose queue is full is evicted, which drops the registry's sender and lets
//! its writer close the socket.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use coderoom_core::wire::{JoinedPayload, Member, PresencePayload, ServerEvent};
use coderoom_core::{FlatTree, Identity, ProjectId};
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identifies one joined WebSocket connection.
pub type ConnectionId = Uuid;

/// An encoded server event, shared between all recipients.
pub type Frame = Arc<str>;

struct Connection {
    identity: Identity,
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct Rooms {
    rooms: HashMap<ProjectId, IndexMap<ConnectionId, Connection>>,
    index: HashMap<ConnectionId, ProjectId>,
}

fn members_of(room: &IndexMap<ConnectionId, Connection>) -> Vec<Member> {
    room.iter()
        .map(|(id, conn)| Member {
            connection_id: id.to_string(),
            user_id: conn.identity.user_id.to_string(),
            display_name: conn.identity.display_name.clone(),
        })
        .collect()
}

fn encode(event: &ServerEvent) -> Option<Frame> {
    match event.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!(event = event.name(), error = %e, "failed to encode event");
            None
        }
    }
}

/// Process-local room membership.
#[derive(Default)]
pub struct RoomRegistry {
    state: RwLock<Rooms>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a project's room.
    ///
    /// The `joined` event (with the current member list and `file_tree`) is
    /// queued on `tx` before the connection becomes visible to publishers, so
    /// it is always the first thing the client receives. The rest of the room
    /// is then sent a `presence` update.
    pub fn join(
        &self,
        project_id: ProjectId,
        identity: Identity,
        tx: mpsc::Sender<Frame>,
        file_tree: FlatTree,
    ) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let room = state.rooms.entry(project_id).or_default();
            room.insert(
                connection_id,
                Connection {
                    identity: identity.clone(),
                    tx: tx.clone(),
                },
            );

            let joined = ServerEvent::Joined(JoinedPayload {
                project_id,
                connection_id: connection_id.to_string(),
                members: members_of(room),
                file_tree,
            });
            if let Some(frame) = encode(&joined) {
                let _ = tx.try_send(frame);
            }
            state.index.insert(connection_id, project_id);
        }

        info!(
            project_id = %project_id,
            connection_id = %connection_id,
            user_id = %identity.user_id,
            "connection joined room"
        );
        self.publish_presence(project_id);
        connection_id
    }

    /// Remove a connection. Empty rooms are pruned; remaining members get a
    /// `presence` update. Returns the number of members left, or `None` if
    /// the connection was not joined.
    pub fn leave(&self, connection_id: ConnectionId) -> Option<usize> {
        let (project_id, remaining) = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let project_id = state.index.remove(&connection_id)?;
            let remaining = match state.rooms.get_mut(&project_id) {
                Some(room) => {
                    room.shift_remove(&connection_id);
                    room.len()
                }
                None => 0,
            };
            if remaining == 0 {
                state.rooms.remove(&project_id);
                debug!(project_id = %project_id, "room pruned");
            }
            (project_id, remaining)
        };

        info!(
            project_id = %project_id,
            connection_id = %connection_id,
            remaining,
            "connection left room"
        );
        if remaining > 0 {
            self.publish_presence(project_id);
        }
        Some(remaining)
    }

    /// Deliver `event` to every member of the project's room.
    ///
    /// Returns how many members the event was queued for.
    pub fn publish(&self, project_id: ProjectId, event: &ServerEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };

        let targets: Vec<(ConnectionId, mpsc::Sender<Frame>)> = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            match state.rooms.get(&project_id) {
                Some(room) => room.iter().map(|(id, c)| (*id, c.tx.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut evicted = Vec::new();
        for (connection_id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        project_id = %project_id,
                        connection_id = %connection_id,
                        "outbound queue full, evicting connection"
                    );
                    evicted.push(connection_id);
                }
                Err(TrySendError::Closed(_)) => evicted.push(connection_id),
            }
        }

        debug!(
            project_id = %project_id,
            event = event.name(),
            delivered,
            "event published"
        );
        for connection_id in evicted {
            self.leave(connection_id);
        }
        delivered
    }

    /// Deliver `event` to a single connection. Returns false if it is not
    /// joined or its queue is full.
    pub fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        let tx = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            let Some(project_id) = state.index.get(&connection_id) else {
                return false;
            };
            match state
                .rooms
                .get(project_id)
                .and_then(|room| room.get(&connection_id))
            {
                Some(conn) => conn.tx.clone(),
                None => return false,
            }
        };
        match encode(event) {
            Some(frame) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    fn publish_presence(&self, project_id: ProjectId) {
        let members = self.members(project_id);
        if members.is_empty() {
            return;
        }
        self.publish(
            project_id,
            &ServerEvent::Presence(PresencePayload {
                project_id,
                members,
            }),
        );
    }

    /// Current members of a project's room, in join order.
    pub fn members(&self, project_id: ProjectId) -> Vec<Member> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .rooms
            .get(&project_id)
            .map(members_of)
            .unwrap_or_default()
    }

    pub fn member_count(&self, project_id: ProjectId) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.rooms.get(&project_id).map_or(0, |room| room.len())
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .rooms
            .len()
    }

    pub fn is_joined(&self, connection_id: ConnectionId) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .index
            .contains_key(&connection_id)
    }

    /// Disconnect everyone in a project's room (e.g. after it was deleted).
    pub fn close_room(&self, project_id: ProjectId) -> usize {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let Some(room) = state.rooms.remove(&project_id) else {
            return 0;
        };
        for connection_id in room.keys() {
            state.index.remove(connection_id);
        }
        info!(project_id = %project_id, connections = room.len(), "room closed");
        room.len()
    }

    /// Drop every connection. Writers see their queue close and hang up.
    pub fn shutdown(&self) -> usize {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let count = state.index.len();
        state.rooms.clear();
        state.index.clear();
        info!(connections = count, "room registry shut down");
        count
    }
}
