//! Per-satellite notification delivery.
//!
//! Notifications are queued per MAC and drained by a background loop with
//! three guarantees: FIFO order per MAC, at most one notification in flight
//! per satellite, and expiry of anything older than an hour. Queues are
//! in-memory only — they do not survive a server restart.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::connmgr::{ConnMgr, SessionId, UNKNOWN};
use crate::error::{Result, RoostError};

/// Queued notifications older than this are dropped without being sent.
pub const NOTIFY_EXPIRY_MS: i64 = 3_600_000;

/// Dequeue loop period.
const DEQUEUE_PERIOD: Duration = Duration::from_secs(1);

fn default_id() -> i64 {
    -1
}

fn default_repeat() -> u32 {
    1
}

/// One notification as carried on the wire and in the queues.
///
/// `id` doubles as the delivery schedule: ids in the future are held back,
/// ids older than [`NOTIFY_EXPIRY_MS`] are expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub backlight: bool,
    #[serde(default)]
    pub backlight_max: bool,
    #[serde(default)]
    pub cancel: bool,
    #[serde(default = "default_id")]
    pub id: i64,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strobe_period_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
}

impl Notification {
    /// Shape checks applied on enqueue. Rejected notifications are never
    /// queued.
    pub fn validate(&self) -> Result<()> {
        if let Some(volume) = self.volume {
            if !(0..=100).contains(&volume) {
                return Err(RoostError::Config(format!(
                    "notification volume {volume} out of range [0, 100]"
                )));
            }
        }
        Ok(())
    }
}

/// An enqueue request: the notification plus optional hostname targeting.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyMessage {
    pub data: Notification,
    #[serde(default)]
    pub hostname: Option<String>,
}

/// Outbound `{"cmd":"notify","data":…}` frame.
#[derive(Serialize)]
struct NotifyFrame<'a> {
    cmd: &'static str,
    data: &'a Notification,
}

/// Cancellation record: carries only the id and the cancel flag so every
/// co-located satellite can drop its copy.
#[derive(Serialize)]
struct CancelFrame {
    cmd: &'static str,
    data: CancelData,
}

#[derive(Serialize)]
struct CancelData {
    id: i64,
    cancel: bool,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Per-MAC FIFO queues plus the background dequeue loop.
pub struct NotifyQueue {
    connmgr: Arc<ConnMgr>,
    queues: Mutex<HashMap<String, VecDeque<Notification>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NotifyQueue {
    pub fn new(connmgr: Arc<ConnMgr>) -> Arc<Self> {
        Arc::new(Self {
            connmgr,
            queues: Mutex::new(HashMap::new()),
            task: Mutex::new(None),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<Notification>>> {
        match self.queues.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start the background dequeue loop.
    pub fn start(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                queue.tick();
                tokio::time::sleep(DEQUEUE_PERIOD).await;
            }
        });
        if let Ok(mut task) = self.task.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }
    }

    /// True while the background dequeue loop is alive.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the background dequeue loop.
    pub fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }

    /// Enqueue a notification.
    ///
    /// A `hostname` targets one satellite (skipped with a warning when its
    /// MAC is unknown); without one, the notification fans out to every known
    /// MAC. Missing or negative ids are replaced with the current millisecond
    /// epoch.
    pub fn add(&self, msg: NotifyMessage) -> Result<()> {
        msg.data.validate()?;

        let mut notification = msg.data;
        if notification.id < 0 {
            notification.id = now_ms();
        }

        let targets = match msg.hostname.as_deref() {
            Some(hostname) => match self.connmgr.mac_for_hostname(hostname) {
                Some(mac) if mac != UNKNOWN => vec![mac],
                _ => {
                    tracing::warn!("no MAC address known for {hostname}, skipping notification");
                    return Ok(());
                }
            },
            None => self.connmgr.known_macs(),
        };

        let mut queues = self.lock();
        for mac in targets {
            tracing::debug!(%mac, id = notification.id, "notification queued");
            queues.entry(mac).or_default().push_back(notification.clone());
        }
        Ok(())
    }

    /// Acknowledge delivery: remove the notification with this id from the
    /// session's MAC queue, clear the in-flight marker, and broadcast a
    /// cancellation record so co-located satellites stop displaying it.
    pub fn done(&self, session: SessionId, id: i64) {
        if let Some(mac) = self.connmgr.mac_of(session) {
            let mut queues = self.lock();
            if let Some(fifo) = queues.get_mut(&mac) {
                if let Some(index) = fifo.iter().position(|n| n.id == id) {
                    fifo.remove(index);
                    self.connmgr.set_notification_active(session, 0);
                }
            }
        }

        let cancel = CancelFrame {
            cmd: "notify",
            data: CancelData { id, cancel: true },
        };
        match serde_json::to_string(&cancel) {
            Ok(frame) => self.connmgr.broadcast(&frame),
            Err(e) => tracing::error!("failed to serialize cancel record: {e}"),
        }
    }

    /// One pass over every MAC queue.
    ///
    /// Visible for tests; the background loop calls this once a second.
    pub fn tick(&self) {
        let now = now_ms();
        let mut queues = self.lock();
        for (mac, fifo) in queues.iter_mut() {
            if fifo.is_empty() {
                continue;
            }
            // Disconnected satellites keep their queue for reconnect.
            let Some(session) = self.connmgr.by_mac(mac) else {
                continue;
            };
            if self.connmgr.is_notification_active(session) {
                tracing::debug!(%mac, "notification already in flight");
                continue;
            }

            let mut i = 0;
            while i < fifo.len() {
                let id = fifo[i].id;
                if id > now {
                    // Future-scheduled: leave in place, keep scanning.
                    i += 1;
                    continue;
                }
                if id < now - NOTIFY_EXPIRY_MS {
                    tracing::warn!(%mac, id, "expiring notification older than 1h");
                    fifo.remove(i);
                    continue;
                }

                // First deliverable item; single-in-flight stops the scan.
                self.connmgr.set_notification_active(session, id);
                let frame = NotifyFrame {
                    cmd: "notify",
                    data: &fifo[i],
                };
                match serde_json::to_string(&frame) {
                    Ok(text) => {
                        tracing::debug!(%mac, id, "notification dispatched");
                        if let Err(e) = self.connmgr.send_text(session, text) {
                            tracing::warn!(%mac, "failed to send notification: {e}");
                            self.connmgr.set_notification_active(session, 0);
                        }
                    }
                    Err(e) => tracing::error!("failed to serialize notification: {e}"),
                }
                break;
            }
        }
    }

    /// Diagnostic snapshot of every queue.
    pub fn snapshot(&self) -> serde_json::Value {
        let queues = self.lock();
        let mut object = serde_json::Map::new();
        for (mac, fifo) in queues.iter() {
            let items: Vec<_> = fifo
                .iter()
                .map(|n| serde_json::to_value(n).unwrap_or_default())
                .collect();
            object.insert(mac.clone(), serde_json::Value::Array(items));
        }
        serde_json::Value::Object(object)
    }
}

impl Drop for NotifyQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    const MAC: &str = "aa:bb:cc:dd:ee:ff";

    fn accept(mgr: &ConnMgr, mac: &str) -> (SessionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = "10.0.0.3:40001".parse().expect("addr");
        let id = mgr.accept(tx, "Satellite/1.0", addr);
        mgr.update_mac_addr(id, mac);
        mgr.update_hostname(id, "kitchen");
        (id, rx)
    }

    fn text_notification(text: &str) -> Notification {
        Notification {
            text: Some(text.to_owned()),
            ..serde_json::from_value(json!({})).expect("default notification")
        }
    }

    #[tokio::test]
    async fn fifo_order_with_expiry_and_cancel_broadcast() {
        let connmgr = Arc::new(ConnMgr::new());
        let (session, mut rx) = accept(&connmgr, MAC);
        let queue = NotifyQueue::new(Arc::clone(&connmgr));

        let mut stale = text_notification("old");
        stale.id = now_ms() - 7_200_000;
        queue
            .add(NotifyMessage {
                data: stale,
                hostname: Some("kitchen".to_owned()),
            })
            .expect("enqueue stale");
        queue
            .add(NotifyMessage {
                data: text_notification("hi"),
                hostname: Some("kitchen".to_owned()),
            })
            .expect("enqueue fresh");

        queue.tick();

        // The stale notification was dropped; only "hi" went out.
        let frame: serde_json::Value =
            serde_json::from_str(&rx.try_recv().expect("frame")).expect("json");
        assert_eq!(frame["cmd"], "notify");
        assert_eq!(frame["data"]["text"], "hi");
        assert!(frame["data"].get("audio_url").is_none());
        assert!(rx.try_recv().is_err());

        let delivered_id = frame["data"]["id"].as_i64().expect("id");
        assert!(connmgr.is_notification_active(session));

        queue.done(session, delivered_id);
        assert!(!connmgr.is_notification_active(session));

        let cancel: serde_json::Value =
            serde_json::from_str(&rx.try_recv().expect("cancel")).expect("json");
        assert_eq!(
            cancel,
            json!({"cmd": "notify", "data": {"id": delivered_id, "cancel": true}})
        );

        // The queue is drained; nothing further goes out.
        queue.tick();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn single_in_flight_per_mac() {
        let connmgr = Arc::new(ConnMgr::new());
        let (session, mut rx) = accept(&connmgr, MAC);
        let queue = NotifyQueue::new(Arc::clone(&connmgr));

        queue
            .add(NotifyMessage {
                data: text_notification("first"),
                hostname: None,
            })
            .expect("enqueue first");
        queue
            .add(NotifyMessage {
                data: text_notification("second"),
                hostname: None,
            })
            .expect("enqueue second");

        queue.tick();
        queue.tick();

        let frame: serde_json::Value =
            serde_json::from_str(&rx.try_recv().expect("frame")).expect("json");
        assert_eq!(frame["data"]["text"], "first");
        // Second stays queued until the first is acknowledged.
        assert!(rx.try_recv().is_err());

        queue.done(session, frame["data"]["id"].as_i64().expect("id"));
        let _cancel = rx.try_recv().expect("cancel broadcast");

        queue.tick();
        let frame: serde_json::Value =
            serde_json::from_str(&rx.try_recv().expect("second frame")).expect("json");
        assert_eq!(frame["data"]["text"], "second");
    }

    #[tokio::test]
    async fn queued_notifications_survive_reconnect_without_duplication() {
        let connmgr = Arc::new(ConnMgr::new());
        let (session, rx) = accept(&connmgr, MAC);
        let queue = NotifyQueue::new(Arc::clone(&connmgr));

        queue
            .add(NotifyMessage {
                data: text_notification("a"),
                hostname: None,
            })
            .expect("enqueue a");
        queue
            .add(NotifyMessage {
                data: text_notification("b"),
                hostname: None,
            })
            .expect("enqueue b");

        // Satellite drops before anything is delivered.
        drop(rx);
        connmgr.disconnect(session);
        queue.tick();

        // Reconnect under the same MAC: delivery resumes in order.
        let (session, mut rx) = accept(&connmgr, MAC);
        queue.tick();
        let frame: serde_json::Value =
            serde_json::from_str(&rx.try_recv().expect("frame a")).expect("json");
        assert_eq!(frame["data"]["text"], "a");
        assert!(rx.try_recv().is_err());

        queue.done(session, frame["data"]["id"].as_i64().expect("id"));
        let _cancel = rx.try_recv().expect("cancel");
        queue.tick();
        let frame: serde_json::Value =
            serde_json::from_str(&rx.try_recv().expect("frame b")).expect("json");
        assert_eq!(frame["data"]["text"], "b");
    }

    #[tokio::test]
    async fn future_scheduled_notifications_are_held_back() {
        let connmgr = Arc::new(ConnMgr::new());
        let (_session, mut rx) = accept(&connmgr, MAC);
        let queue = NotifyQueue::new(Arc::clone(&connmgr));

        let mut scheduled = text_notification("later");
        scheduled.id = now_ms() + 60_000;
        queue
            .add(NotifyMessage {
                data: scheduled,
                hostname: None,
            })
            .expect("enqueue scheduled");

        queue.tick();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_hostname_is_skipped() {
        let connmgr = Arc::new(ConnMgr::new());
        let queue = NotifyQueue::new(Arc::clone(&connmgr));
        queue
            .add(NotifyMessage {
                data: text_notification("nobody home"),
                hostname: Some("basement".to_owned()),
            })
            .expect("enqueue");
        assert_eq!(queue.snapshot(), json!({}));
    }

    #[test]
    fn volume_boundaries() {
        let mut notification = Notification {
            volume: Some(0),
            ..serde_json::from_value(json!({})).expect("default")
        };
        assert!(notification.validate().is_ok());
        notification.volume = Some(100);
        assert!(notification.validate().is_ok());
        notification.volume = Some(-1);
        assert!(notification.validate().is_err());
        notification.volume = Some(101);
        assert!(notification.validate().is_err());
    }
}
