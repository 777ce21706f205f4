use std::net::SocketAddr;

/// Addresses this peer talks to: at most one opponent plus any number of
/// read-only spectators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerRegistry {
    opponent: Option<SocketAddr>,
    spectators: Vec<SocketAddr>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opponent(&self) -> Option<SocketAddr> {
        self.opponent
    }

    pub fn set_opponent(&mut self, addr: SocketAddr) {
        self.opponent = Some(addr);
    }

    pub fn is_opponent(&self, addr: SocketAddr) -> bool {
        self.opponent == Some(addr)
    }

    /// Returns false if `addr` was already registered (or is the opponent)
    pub fn add_spectator(&mut self, addr: SocketAddr) -> bool {
        if self.is_opponent(addr) || self.spectators.contains(&addr) {
            return false;
        }
        self.spectators.push(addr);
        true
    }

    pub fn is_spectator(&self, addr: SocketAddr) -> bool {
        self.spectators.contains(&addr)
    }

    pub fn spectators(&self) -> &[SocketAddr] {
        &self.spectators
    }

    pub fn spectator_count(&self) -> usize {
        self.spectators.len()
    }

    /// Known participants may chat; strangers may not
    pub fn is_known(&self, addr: SocketAddr) -> bool {
        self.is_opponent(addr) || self.is_spectator(addr)
    }

    /// Everyone who should receive a chat message, minus its sender
    pub fn chat_recipients(&self, except: Option<SocketAddr>) -> Vec<SocketAddr> {
        self.opponent
            .iter()
            .chain(self.spectators.iter())
            .copied()
            .filter(|addr| Some(*addr) != except)
            .collect()
    }

    pub fn clear(&mut self) {
        self.opponent = None;
        self.spectators.clear();
    }
}
