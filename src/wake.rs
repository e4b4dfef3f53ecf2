//! Wake arbitration: transient elections across co-located satellites.
//!
//! When several satellites hear the same utterance, each reports a
//! `wake_start` with its measured volume. The arbiter collects reports for a
//! short window, declares the loudest satellite the winner, and silences the
//! rest. The window is short enough to feel single-device to the user and
//! long enough to absorb LAN jitter between satellites.
//!
//! The arbiter is a single actor task: all mutation of the one-slot wake
//! session happens inside it, and other components interact purely via
//! message passing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::connmgr::{ConnMgr, SessionId};

/// How long a wake session collects events before resolving.
pub const WAKE_WINDOW: Duration = Duration::from_millis(200);

/// One satellite's wake report inside a session.
#[derive(Debug, Clone, Copy)]
struct WakeEvent {
    session: SessionId,
    volume: f64,
}

/// A short-lived election. At most one exists process-wide.
struct WakeSession {
    id: Uuid,
    deadline: Instant,
    events: Vec<WakeEvent>,
    done: bool,
}

impl WakeSession {
    fn new() -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(wake_session = %id, "wake session created");
        Self {
            id,
            deadline: Instant::now() + WAKE_WINDOW,
            events: Vec::new(),
            done: false,
        }
    }
}

enum WakeCommand {
    Feed { session: SessionId, volume: f64 },
}

/// Handle to the wake arbiter actor.
pub struct WakeArbiter {
    tx: mpsc::UnboundedSender<WakeCommand>,
    handle: JoinHandle<()>,
}

impl WakeArbiter {
    /// Spawn the arbiter actor.
    pub fn spawn(connmgr: Arc<ConnMgr>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx, connmgr));
        Self { tx, handle }
    }

    /// Feed one `wake_start` report into the current (or a fresh) session.
    pub fn feed(&self, session: SessionId, volume: f64) {
        // A closed channel means the server is shutting down — nothing to do.
        let _ = self.tx.send(WakeCommand::Feed { session, volume });
    }

    /// True while the actor task is alive.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the actor task.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for WakeArbiter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<WakeCommand>, connmgr: Arc<ConnMgr>) {
    let mut current: Option<WakeSession> = None;

    loop {
        let deadline = current
            .as_ref()
            .filter(|session| !session.done)
            .map(|session| session.deadline);
        let window_expiry = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            command = rx.recv() => {
                let Some(WakeCommand::Feed { session, volume }) = command else {
                    break;
                };
                let fresh = current.as_ref().is_none_or(|s| s.done);
                if fresh {
                    current = Some(WakeSession::new());
                }
                if let Some(wake) = current.as_mut() {
                    tracing::debug!(
                        wake_session = %wake.id,
                        session,
                        volume,
                        "wake event added"
                    );
                    wake.events.push(WakeEvent { session, volume });
                }
            }
            () = window_expiry => {
                if let Some(wake) = current.as_mut() {
                    resolve(wake, &connmgr);
                }
            }
        }
    }
}

/// Resolve an expired wake session: notify the winner first, then the
/// losers in insertion order, and mark the session done.
fn resolve(wake: &mut WakeSession, connmgr: &ConnMgr) {
    wake.done = true;
    if wake.events.is_empty() {
        return;
    }

    // Strictly-greater comparison keeps the earliest event on ties, and a
    // single event wins regardless of its volume.
    let mut winner = 0;
    for (i, event) in wake.events.iter().enumerate().skip(1) {
        if event.volume > wake.events[winner].volume {
            winner = i;
        }
    }
    let winner_session = wake.events[winner].session;

    tracing::debug!(
        wake_session = %wake.id,
        winner = winner_session,
        participants = wake.events.len(),
        "wake session resolved"
    );

    let won = serde_json::json!({"wake_result": {"won": true}}).to_string();
    if let Err(e) = connmgr.send_text(winner_session, won) {
        tracing::warn!("failed to notify wake winner: {e}");
    }

    let lost = serde_json::json!({"wake_result": {"won": false}}).to_string();
    for event in &wake.events {
        if event.session == winner_session {
            continue;
        }
        if let Err(e) = connmgr.send_text(event.session, lost.clone()) {
            tracing::warn!("failed to notify wake loser: {e}");
        }
    }
}
