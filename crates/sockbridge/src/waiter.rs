//! Edge-triggered readiness notifications for transport endpoints.
//!
//! An endpoint owns one [`EventQueue`]; each bridge loop owns [`EventEntry`]s
//! that it registers and unregisters around blocking points. Notifications are
//! lossy by design: every entry has a capacity-1 channel and `notify` drops
//! the edge if one is already pending, so an entry collapses bursts into a
//! single wakeup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bitflags::bitflags;
use tokio::sync::mpsc;

bitflags! {
    /// Readiness directions an entry can subscribe to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Readiness: u8 {
        const IN = 1 << 0;
        const OUT = 1 << 1;
    }
}

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// One subscriber slot. Create once per loop, register as needed.
#[derive(Debug)]
pub struct EventEntry {
    id: u64,
    tx: mpsc::Sender<()>,
    rx: mpsc::Receiver<()>,
}

impl EventEntry {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            rx,
        }
    }

    /// Wait for the next edge delivered to this entry.
    pub async fn ready(&mut self) {
        let _ = self.rx.recv().await;
    }
}

impl Default for EventEntry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Registration {
    id: u64,
    mask: Readiness,
    tx: mpsc::Sender<()>,
}

/// Registration table living on the endpoint side.
#[derive(Debug, Default)]
pub struct EventQueue {
    entries: Mutex<Vec<Registration>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register with a new mask) an entry. Idempotent per
    /// entry: a second register replaces the previous mask.
    pub fn register(&self, entry: &EventEntry, mask: Readiness) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|r| r.id != entry.id);
        entries.push(Registration {
            id: entry.id,
            mask,
            tx: entry.tx.clone(),
        });
    }

    /// Remove an entry. Unregistering an entry that is not registered is a
    /// no-op.
    pub fn unregister(&self, entry: &EventEntry) {
        self.entries.lock().unwrap().retain(|r| r.id != entry.id);
    }

    /// Deliver an edge to every entry subscribed to any direction in `mask`.
    pub fn notify(&self, mask: Readiness) {
        let entries = self.entries.lock().unwrap();
        for r in entries.iter() {
            if r.mask.intersects(mask) {
                // Capacity-1 channel; a pending edge absorbs this one.
                let _ = r.tx.try_send(());
            }
        }
    }
}
