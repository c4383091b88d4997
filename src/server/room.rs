use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use tokio::sync::broadcast;
use tracing::debug;

use crate::{error::CallError, signal::Envelope};

const PATH_PREFIX: &str = "/ws/video/";

/// Who joined which room, taken from the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room: String,
    pub user: String,
}

/// Parse `/ws/video/<room path>/?user=<identity>`.
///
/// The room path is one or more `/`-separated segments of `[A-Za-z0-9_-]`,
/// e.g. `regular/physics-101/breakout/group-a`.
pub fn parse_membership(path: &str, query: Option<&str>) -> crate::Result<Membership> {
    let room = path
        .strip_prefix(PATH_PREFIX)
        .map(|rest| rest.trim_end_matches('/'))
        .ok_or_else(|| CallError::InvalidRoom(path.to_string()))?;
    if room.is_empty() || !room.split('/').all(is_slug) {
        return Err(CallError::InvalidRoom(path.to_string()));
    }

    let user = query
        .into_iter()
        .flat_map(|q| url::form_urlencoded::parse(q.as_bytes()))
        .find(|(k, _)| k == "user")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CallError::InvalidRoom(format!("{path}: missing user")))?;

    Ok(Membership {
        room: room.to_string(),
        user,
    })
}

fn is_slug(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Room table. Every room is one broadcast channel; each member's handler
/// filters what it receives by sender and target.
///
/// One identity may hold several sockets in a room; they are counted so the
/// identity only leaves with its last socket.
pub struct Hub {
    rooms: Mutex<HashMap<String, Room>>,
    capacity: usize,
}

struct Room {
    tx: broadcast::Sender<Envelope>,
    sockets: HashMap<String, usize>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn join(
        &self,
        member: &Membership,
    ) -> (broadcast::Sender<Envelope>, broadcast::Receiver<Envelope>) {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let room = rooms.entry(member.room.clone()).or_insert_with(|| Room {
            tx: broadcast::channel(self.capacity).0,
            sockets: HashMap::new(),
        });
        *room.sockets.entry(member.user.clone()).or_default() += 1;
        (room.tx.clone(), room.tx.subscribe())
    }

    /// Release one socket of `member`. Returns whether it was the identity's
    /// last socket in the room; the room itself is dropped once empty.
    pub fn leave(&self, member: &Membership) -> bool {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(room) = rooms.get_mut(&member.room) else {
            return false;
        };
        let last = match room.sockets.get_mut(&member.user) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                room.sockets.remove(&member.user);
                true
            }
            None => false,
        };
        if room.sockets.is_empty() {
            debug!(room = %member.room, "room is empty, dropping it");
            rooms.remove(&member.room);
        }
        last
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
