//! Connectivity monitoring.
//!
//! Translates raw platform signals (online/offline, tab visibility)
//! into debounced engine events. Flapping connectivity within the
//! debounce window collapses to at most one emitted transition; a
//! background→foreground flip emits `Resumed` immediately so the engine
//! re-establishes subscriptions the host may have silently dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// A raw platform connectivity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySignal {
    /// The platform reports network reachability.
    Online,
    /// The platform reports loss of network reachability.
    Offline,
    /// The process regained foreground visibility.
    Foreground,
    /// The process was backgrounded.
    Background,
}

/// A debounced engine-level connectivity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Connectivity settled to online.
    Online,
    /// Connectivity settled to offline.
    Offline,
    /// The process came back to the foreground.
    Resumed,
}

/// Tracks online/offline and visibility transitions.
pub struct ConnectivityMonitor {
    /// Last state actually emitted.
    settled_online: AtomicBool,
    /// Most recent raw report, not yet debounced.
    raw_online: AtomicBool,
    visible: AtomicBool,
    generation: AtomicU64,
    debounce: Duration,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    /// Creates a monitor that starts online and visible.
    #[must_use]
    pub fn new(debounce: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            settled_online: AtomicBool::new(true),
            raw_online: AtomicBool::new(true),
            visible: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            debounce,
            events,
        })
    }

    /// Current debounced connectivity.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.settled_online.load(Ordering::SeqCst)
    }

    /// Subscribes to debounced connectivity events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Feeds a platform signal into the monitor.
    pub fn report(self: &Arc<Self>, signal: ConnectivitySignal) {
        match signal {
            ConnectivitySignal::Online => self.report_reachability(true),
            ConnectivitySignal::Offline => self.report_reachability(false),
            ConnectivitySignal::Foreground => {
                if !self.visible.swap(true, Ordering::SeqCst) {
                    debug!("foreground regained, emitting resume");
                    let _ = self.events.send(ConnectivityEvent::Resumed);
                }
            }
            ConnectivitySignal::Background => {
                self.visible.store(false, Ordering::SeqCst);
            }
        }
    }

    fn report_reachability(self: &Arc<Self>, online: bool) {
        self.raw_online.store(online, Ordering::SeqCst);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(monitor.debounce).await;
            // A newer report supersedes this one; let it settle instead.
            if monitor.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let raw = monitor.raw_online.load(Ordering::SeqCst);
            let was = monitor.settled_online.swap(raw, Ordering::SeqCst);
            if raw != was {
                debug!(online = raw, "connectivity settled");
                let event = if raw {
                    ConnectivityEvent::Online
                } else {
                    ConnectivityEvent::Offline
                };
                let _ = monitor.events.send(event);
            }
        });
    }
}
