//! Live satellite session table.
//!
//! Sessions are keyed by a monotonically increasing id assigned on accept —
//! the in-process stand-in for the socket handle. Reverse lookups scan in
//! key order, so "first match" is always the oldest live session; hostname
//! and MAC uniqueness are NOT guaranteed by satellites.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{Result, RoostError};

/// Opaque handle for one live satellite session.
pub type SessionId = u64;

/// Identity value reported by satellites before their `hello` frame arrives.
pub const UNKNOWN: &str = "unknown";

/// One live session: its outbound frame channel plus reported identity.
#[derive(Debug)]
struct SessionEntry {
    tx: mpsc::UnboundedSender<String>,
    user_agent: String,
    hostname: String,
    platform: String,
    mac_addr: String,
    remote: SocketAddr,
    /// Id of the notification currently displayed on this satellite
    /// (0 = idle).
    notification_active: i64,
}

/// Diagnostic view of a session for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub hostname: String,
    pub platform: String,
    pub mac_addr: String,
    pub ip: String,
    pub port: u16,
    pub user_agent: String,
    pub notification_active: i64,
}

/// Tracks every live satellite session and routes messages by identity.
pub struct ConnMgr {
    sessions: Mutex<BTreeMap<SessionId, SessionEntry>>,
    next_id: AtomicU64,
}

impl Default for ConnMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnMgr {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<SessionId, SessionEntry>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a freshly accepted session and return its handle.
    pub fn accept(
        &self,
        tx: mpsc::UnboundedSender<String>,
        user_agent: &str,
        remote: SocketAddr,
    ) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = SessionEntry {
            tx,
            user_agent: user_agent.to_owned(),
            hostname: UNKNOWN.to_owned(),
            platform: UNKNOWN.to_owned(),
            mac_addr: UNKNOWN.to_owned(),
            remote,
            notification_active: 0,
        };
        self.lock().insert(id, entry);
        tracing::debug!(session = id, %remote, "session accepted");
        id
    }

    /// Remove a session. Idempotent — a second disconnect is a no-op.
    pub fn disconnect(&self, id: SessionId) {
        if self.lock().remove(&id).is_some() {
            tracing::debug!(session = id, "session disconnected");
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no satellite is connected.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queue a text frame on one session's outbound channel.
    ///
    /// Frames are delivered in call order per session.
    pub fn send_text(&self, id: SessionId, text: impl Into<String>) -> Result<()> {
        let sessions = self.lock();
        let entry = sessions
            .get(&id)
            .ok_or_else(|| RoostError::Transport(format!("session {id} is gone")))?;
        entry
            .tx
            .send(text.into())
            .map_err(|_| RoostError::Transport(format!("session {id} writer is closed")))
    }

    /// Best-effort fan-out to every live session.
    ///
    /// Per-recipient failures are logged and do not abort the loop.
    pub fn broadcast(&self, text: &str) {
        for (id, entry) in self.lock().iter() {
            if entry.tx.send(text.to_owned()).is_err() {
                tracing::warn!(session = id, "failed to broadcast message");
            }
        }
    }

    /// Update the hostname reported by a `hello` frame.
    pub fn update_hostname(&self, id: SessionId, hostname: &str) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.hostname = hostname.to_owned();
        }
    }

    /// Update the platform tag reported by a `hello` frame.
    pub fn update_platform(&self, id: SessionId, platform: &str) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.platform = platform.to_owned();
        }
    }

    /// Update the MAC address reported by a `hello` frame.
    pub fn update_mac_addr(&self, id: SessionId, mac_addr: &str) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.mac_addr = mac_addr.to_owned();
        }
    }

    /// First session (in accept order) reporting this hostname.
    pub fn by_hostname(&self, hostname: &str) -> Option<SessionId> {
        self.lock()
            .iter()
            .find(|(_, entry)| entry.hostname == hostname)
            .map(|(id, _)| *id)
    }

    /// First session (in accept order) reporting this MAC.
    pub fn by_mac(&self, mac: &str) -> Option<SessionId> {
        self.lock()
            .iter()
            .find(|(_, entry)| entry.mac_addr == mac)
            .map(|(id, _)| *id)
    }

    /// MAC reported by the first session with this hostname.
    pub fn mac_for_hostname(&self, hostname: &str) -> Option<String> {
        self.lock()
            .values()
            .find(|entry| entry.hostname == hostname)
            .map(|entry| entry.mac_addr.clone())
    }

    /// MAC reported by one session.
    pub fn mac_of(&self, id: SessionId) -> Option<String> {
        self.lock().get(&id).map(|entry| entry.mac_addr.clone())
    }

    /// Every distinct known MAC (sessions still reporting `unknown` are
    /// skipped), in accept order.
    pub fn known_macs(&self) -> Vec<String> {
        let mut macs = Vec::new();
        for entry in self.lock().values() {
            if entry.mac_addr != UNKNOWN && !macs.contains(&entry.mac_addr) {
                macs.push(entry.mac_addr.clone());
            }
        }
        macs
    }

    /// True when the session is currently displaying a notification.
    pub fn is_notification_active(&self, id: SessionId) -> bool {
        self.lock()
            .get(&id)
            .is_some_and(|entry| entry.notification_active != 0)
    }

    /// Set (or clear, with 0) the in-flight notification id for a session.
    pub fn set_notification_active(&self, id: SessionId, notification_id: i64) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.notification_active = notification_id;
        }
    }

    /// Diagnostic snapshot of every live session, in accept order.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.lock()
            .iter()
            .map(|(id, entry)| SessionSnapshot {
                id: *id,
                hostname: entry.hostname.clone(),
                platform: entry.platform.clone(),
                mac_addr: entry.mac_addr.clone(),
                ip: entry.remote.ip().to_string(),
                port: entry.remote.port(),
                user_agent: entry.user_agent.clone(),
                notification_active: entry.notification_active,
            })
            .collect()
    }
}

/// Render a 6-byte MAC as lowercase colon-separated hex.
pub fn normalize_mac(bytes: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

/// Canonicalize the `mac_addr` value of a `hello` frame.
///
/// Satellites send a 6-element byte array; already-canonical strings pass
/// through unchanged.
pub fn mac_value_to_string(value: &serde_json::Value) -> Option<String> {
    if let Some(text) = value.as_str() {
        return Some(text.to_owned());
    }
    let array = value.as_array()?;
    if array.len() != 6 {
        return None;
    }
    let mut bytes = [0u8; 6];
    for (i, item) in array.iter().enumerate() {
        bytes[i] = u8::try_from(item.as_u64()?).ok()?;
    }
    Some(normalize_mac(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn addr() -> SocketAddr {
        "192.168.1.20:52000".parse().expect("addr")
    }

    fn accept(mgr: &ConnMgr) -> (SessionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (mgr.accept(tx, "Satellite/1.0", addr()), rx)
    }

    #[test]
    fn send_text_preserves_order() {
        let mgr = ConnMgr::new();
        let (id, mut rx) = accept(&mgr);

        mgr.send_text(id, "one").expect("send one");
        mgr.send_text(id, "two").expect("send two");

        assert_eq!(rx.try_recv().expect("recv one"), "one");
        assert_eq!(rx.try_recv().expect("recv two"), "two");
    }

    #[test]
    fn duplicate_macs_resolve_to_the_oldest_session() {
        let mgr = ConnMgr::new();
        let (first, _rx1) = accept(&mgr);
        let (second, _rx2) = accept(&mgr);
        mgr.update_mac_addr(first, "aa:bb:cc:dd:ee:ff");
        mgr.update_mac_addr(second, "aa:bb:cc:dd:ee:ff");

        assert_eq!(mgr.by_mac("aa:bb:cc:dd:ee:ff"), Some(first));

        mgr.disconnect(first);
        assert_eq!(mgr.by_mac("aa:bb:cc:dd:ee:ff"), Some(second));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mgr = ConnMgr::new();
        let (id, _rx) = accept(&mgr);
        mgr.disconnect(id);
        mgr.disconnect(id);
        assert!(mgr.is_empty());
    }

    #[test]
    fn broadcast_survives_dead_receivers() {
        let mgr = ConnMgr::new();
        let (alive, mut rx) = accept(&mgr);
        let (_dead, dead_rx) = accept(&mgr);
        drop(dead_rx);

        mgr.broadcast("ping");
        assert_eq!(rx.try_recv().expect("alive receives"), "ping");
        let _ = alive;
    }

    #[test]
    fn known_macs_skips_unknown_and_dedupes() {
        let mgr = ConnMgr::new();
        let (first, _rx1) = accept(&mgr);
        let (_second, _rx2) = accept(&mgr);
        let (third, _rx3) = accept(&mgr);
        mgr.update_mac_addr(first, "aa:bb:cc:dd:ee:ff");
        mgr.update_mac_addr(third, "aa:bb:cc:dd:ee:ff");

        assert_eq!(mgr.known_macs(), vec!["aa:bb:cc:dd:ee:ff".to_owned()]);
    }

    #[test]
    fn normalize_mac_renders_lowercase_hex() {
        assert_eq!(
            normalize_mac(&[0xAA, 0xBB, 0x0C, 0x01, 0x02, 0xFF]),
            "aa:bb:0c:01:02:ff"
        );
    }

    #[test]
    fn mac_value_accepts_arrays_and_passes_strings_through() {
        assert_eq!(
            mac_value_to_string(&json!([170, 187, 12, 1, 2, 255])).as_deref(),
            Some("aa:bb:0c:01:02:ff")
        );
        // Canonicalizing an already-canonical MAC is a no-op.
        assert_eq!(
            mac_value_to_string(&json!("aa:bb:0c:01:02:ff")).as_deref(),
            Some("aa:bb:0c:01:02:ff")
        );
        assert_eq!(mac_value_to_string(&json!([1, 2, 3])), None);
        assert_eq!(mac_value_to_string(&json!([256, 0, 0, 0, 0, 0])), None);
    }
}
