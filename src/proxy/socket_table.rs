use std::collections::HashMap;

use super::net::NetSocket;

pub const MAX_SID: i64 = 1024;

/// Integer-keyed handle map over OS sockets, with lifecycle cleanup.
/// Sids cycle modulo [`MAX_SID`] starting at 1; unlike the original
/// implementation, allocation skips any sid still occupied after
/// wraparound rather than silently overwriting a live socket.
pub struct SocketTable {
    next_sid: i64,
    sockets: HashMap<i64, Box<dyn NetSocket>>,
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketTable {
    pub fn new() -> Self {
        Self {
            next_sid: 0,
            sockets: HashMap::new(),
        }
    }

    /// Insert `socket` under a freshly allocated sid and return it.
    ///
    /// Scans at most one full cycle for a free slot; the table caps out
    /// at 1024 live sockets at once, so a resource-constrained proxy
    /// should hit that ceiling long before this loop would.
    pub fn insert(&mut self, socket: Box<dyn NetSocket>) -> Option<i64> {
        for _ in 0..MAX_SID {
            self.next_sid = (self.next_sid % MAX_SID) + 1;
            if !self.sockets.contains_key(&self.next_sid) {
                let sid = self.next_sid;
                self.sockets.insert(sid, socket);
                return Some(sid);
            }
        }
        None
    }

    pub fn get_mut(&mut self, sid: i64) -> Option<&mut Box<dyn NetSocket>> {
        self.sockets.get_mut(&sid)
    }

    pub fn contains(&self, sid: i64) -> bool {
        self.sockets.contains_key(&sid)
    }

    pub fn close(&mut self, sid: i64) {
        self.sockets.remove(&sid);
    }

    pub fn close_all(&mut self) {
        self.sockets.clear();
    }
}
