//! The client pipe: a two-ended in-process byte pipe with per-end signal
//! words, a control-message side-channel, and a handle-transfer queue.
//!
//! Each end exposes non-blocking operations whose failure statuses
//! ([`PipeError`]) are exactly what the bridge loops dispatch on, plus an
//! async [`PipeHandle::wait`] with wait-for-any-of semantics over the 32-bit
//! signal word. Data written before an end closes stays readable on the
//! other end; half-close surfaces as `BadState` once buffered data drains.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use tokio::sync::Notify;

use crate::endpoint::ShutdownMode;

/// Bytes buffered per direction before writers see `ShouldWait`.
pub const DATA_CAPACITY: usize = 256 * 1024;

/// Control messages buffered per direction.
const CONTROL_QUEUE_LIMIT: usize = 32;

bitflags! {
    /// Signal bits observable on one end of a pipe.
    ///
    /// The low bits are device state maintained by the pipe itself; the
    /// `USER_*` range is set and cleared by the holders of the two ends.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Signals: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const PEER_CLOSED = 1 << 2;
        const READ_DISABLED = 1 << 3;
        const WRITE_DISABLED = 1 << 4;
        const CONTROL_READABLE = 1 << 5;

        const USER_0 = 1 << 24;
        const USER_1 = 1 << 25;
        const USER_2 = 1 << 26;
        const USER_3 = 1 << 27;
        const USER_4 = 1 << 28;
        const USER_5 = 1 << 29;

        /// A listening socket has at least one pending connection.
        const INCOMING = Self::USER_0.bits();
        /// An outbound connect cycle produced an edge.
        const OUTGOING = Self::USER_1.bits();
        /// The socket entered the connected state.
        const CONNECTED = Self::USER_2.bits();
        /// In-process cancellation token; asserted on the bridge-local end.
        const CLOSING = Self::USER_5.bits();
    }
}

impl Default for Signals {
    fn default() -> Self {
        Signals::empty()
    }
}

impl Signals {
    const USER_MASK: Signals = Signals::USER_0
        .union(Signals::USER_1)
        .union(Signals::USER_2)
        .union(Signals::USER_3)
        .union(Signals::USER_4)
        .union(Signals::USER_5);
}

/// Framing discipline of the data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    /// Byte stream; writes may be split at any boundary.
    Stream,
    /// Message stream; each write is one datagram, never split or merged.
    Datagram,
}

bitflags! {
    /// Capabilities a pipe pair is created with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PipeCaps: u8 {
        /// The control-message side-channel is available.
        const CONTROL = 1 << 0;
        /// The handle-transfer facility is available.
        const ACCEPT = 1 << 1;
    }
}

/// Non-blocking operation statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    /// Nothing to do right now; wait on the relevant signals and retry.
    #[error("should wait")]
    ShouldWait,
    /// The direction is disabled (half-close) or the capability is absent.
    #[error("bad state")]
    BadState,
    /// The opposite handle is closed and nothing is left to drain.
    #[error("peer closed")]
    PeerClosed,
    /// This handle was closed.
    #[error("bad handle")]
    BadHandle,
}

#[derive(Default)]
struct SideInner {
    signals: Signals,
    closed: bool,
    read_disabled: bool,
    write_disabled: bool,
    // Incoming traffic for this side.
    stream: VecDeque<u8>,
    datagrams: VecDeque<Vec<u8>>,
    datagram_bytes: usize,
    control: VecDeque<Vec<u8>>,
    accepts: VecDeque<PipeHandle>,
}

impl SideInner {
    fn data_len(&self, kind: PipeKind) -> usize {
        match kind {
            PipeKind::Stream => self.stream.len(),
            PipeKind::Datagram => self.datagram_bytes,
        }
    }

    fn has_data(&self, kind: PipeKind) -> bool {
        match kind {
            PipeKind::Stream => !self.stream.is_empty(),
            PipeKind::Datagram => !self.datagrams.is_empty(),
        }
    }
}

struct PipeInner {
    sides: [SideInner; 2],
}

struct Shared {
    kind: PipeKind,
    caps: PipeCaps,
    state: Mutex<PipeInner>,
    notify: [Notify; 2],
}

impl Shared {
    /// Recompute the derived (device) signal bits of both sides and wake all
    /// waiters. Waiters re-check their masks, so spurious wakeups are fine.
    fn sync(&self, inner: &mut PipeInner) {
        for side in 0..2 {
            let peer = side ^ 1;
            let mut derived = Signals::empty();
            if inner.sides[side].has_data(self.kind) {
                derived |= Signals::READABLE;
            }
            if !inner.sides[side].control.is_empty() {
                derived |= Signals::CONTROL_READABLE;
            }
            if inner.sides[side].read_disabled {
                derived |= Signals::READ_DISABLED;
            }
            if inner.sides[side].write_disabled {
                derived |= Signals::WRITE_DISABLED;
            }
            if inner.sides[peer].closed {
                derived |= Signals::PEER_CLOSED;
            }
            if !inner.sides[peer].closed
                && !inner.sides[side].write_disabled
                && inner.sides[peer].data_len(self.kind) < DATA_CAPACITY
            {
                derived |= Signals::WRITABLE;
            }
            let user = inner.sides[side].signals & Signals::USER_MASK;
            inner.sides[side].signals = derived | user;
        }
        self.notify[0].notify_waiters();
        self.notify[1].notify_waiters();
    }
}

/// One end of a pipe. Cheap to share behind `Arc`; closing is explicit and
/// idempotent, and invalidates every operation on this end.
pub struct PipeHandle {
    shared: Arc<Shared>,
    side: usize,
}

impl fmt::Debug for PipeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeHandle")
            .field("kind", &self.shared.kind)
            .field("side", &self.side)
            .finish()
    }
}

/// Create a connected pipe pair.
pub fn pipe(kind: PipeKind, caps: PipeCaps) -> (PipeHandle, PipeHandle) {
    let shared = Arc::new(Shared {
        kind,
        caps,
        state: Mutex::new(PipeInner {
            sides: [SideInner::default(), SideInner::default()],
        }),
        notify: [Notify::new(), Notify::new()],
    });
    {
        let mut inner = shared.state.lock().unwrap();
        shared.sync(&mut inner);
    }
    (
        PipeHandle {
            shared: shared.clone(),
            side: 0,
        },
        PipeHandle { shared, side: 1 },
    )
}

impl PipeHandle {
    fn peer(&self) -> usize {
        self.side ^ 1
    }

    /// Read data into `buf`. Datagram pipes deliver one message per call,
    /// truncating if `buf` is too small.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        let mut inner = self.shared.state.lock().unwrap();
        if inner.sides[self.side].closed {
            return Err(PipeError::BadHandle);
        }
        let kind = self.shared.kind;
        if !inner.sides[self.side].has_data(kind) {
            if inner.sides[self.side].read_disabled {
                return Err(PipeError::BadState);
            }
            if inner.sides[self.peer()].closed {
                return Err(PipeError::PeerClosed);
            }
            return Err(PipeError::ShouldWait);
        }
        let n = match kind {
            PipeKind::Stream => {
                let side = &mut inner.sides[self.side];
                let n = buf.len().min(side.stream.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = side.stream.pop_front().unwrap();
                }
                n
            }
            PipeKind::Datagram => {
                let side = &mut inner.sides[self.side];
                let msg = side.datagrams.pop_front().unwrap();
                side.datagram_bytes -= msg.len();
                let n = buf.len().min(msg.len());
                buf[..n].copy_from_slice(&msg[..n]);
                n
            }
        };
        self.shared.sync(&mut inner);
        Ok(n)
    }

    /// Write data toward the peer. Stream pipes may accept a prefix;
    /// datagram pipes accept the whole message or return `ShouldWait`.
    pub fn write(&self, data: &[u8]) -> Result<usize, PipeError> {
        let mut inner = self.shared.state.lock().unwrap();
        if inner.sides[self.side].closed {
            return Err(PipeError::BadHandle);
        }
        if inner.sides[self.side].write_disabled {
            return Err(PipeError::BadState);
        }
        let peer = self.peer();
        if inner.sides[peer].closed {
            return Err(PipeError::PeerClosed);
        }
        let kind = self.shared.kind;
        let n = match kind {
            PipeKind::Stream => {
                let room = DATA_CAPACITY - inner.sides[peer].stream.len();
                if room == 0 {
                    return Err(PipeError::ShouldWait);
                }
                let n = data.len().min(room);
                inner.sides[peer].stream.extend(&data[..n]);
                n
            }
            PipeKind::Datagram => {
                debug_assert!(data.len() <= DATA_CAPACITY, "datagram exceeds pipe capacity");
                if inner.sides[peer].datagram_bytes + data.len() > DATA_CAPACITY {
                    return Err(PipeError::ShouldWait);
                }
                inner.sides[peer].datagrams.push_back(data.to_vec());
                inner.sides[peer].datagram_bytes += data.len();
                data.len()
            }
        };
        self.shared.sync(&mut inner);
        Ok(n)
    }

    /// Read one control message.
    pub fn read_control(&self) -> Result<Vec<u8>, PipeError> {
        if !self.shared.caps.contains(PipeCaps::CONTROL) {
            return Err(PipeError::BadState);
        }
        let mut inner = self.shared.state.lock().unwrap();
        if inner.sides[self.side].closed {
            return Err(PipeError::BadHandle);
        }
        match inner.sides[self.side].control.pop_front() {
            Some(msg) => {
                self.shared.sync(&mut inner);
                Ok(msg)
            }
            None => {
                if inner.sides[self.peer()].closed {
                    return Err(PipeError::PeerClosed);
                }
                Err(PipeError::ShouldWait)
            }
        }
    }

    /// Write one control message toward the peer. Messages are never split.
    pub fn write_control(&self, msg: &[u8]) -> Result<(), PipeError> {
        if !self.shared.caps.contains(PipeCaps::CONTROL) {
            return Err(PipeError::BadState);
        }
        assert!(
            msg.len() <= sockbridge_wire::CONTROL_MAX_MESSAGE,
            "control message exceeds the enforced maximum"
        );
        let mut inner = self.shared.state.lock().unwrap();
        if inner.sides[self.side].closed {
            return Err(PipeError::BadHandle);
        }
        let peer = self.peer();
        if inner.sides[peer].closed {
            return Err(PipeError::PeerClosed);
        }
        if inner.sides[peer].control.len() >= CONTROL_QUEUE_LIMIT {
            return Err(PipeError::ShouldWait);
        }
        inner.sides[peer].control.push_back(msg.to_vec());
        self.shared.sync(&mut inner);
        Ok(())
    }

    /// Transfer a pipe handle to the peer (the accept path).
    pub fn share(&self, handle: PipeHandle) -> Result<(), PipeError> {
        if !self.shared.caps.contains(PipeCaps::ACCEPT) {
            return Err(PipeError::BadState);
        }
        let mut inner = self.shared.state.lock().unwrap();
        if inner.sides[self.side].closed {
            return Err(PipeError::BadHandle);
        }
        let peer = self.peer();
        if inner.sides[peer].closed {
            return Err(PipeError::PeerClosed);
        }
        inner.sides[peer].accepts.push_back(handle);
        self.shared.sync(&mut inner);
        Ok(())
    }

    /// Take the next transferred handle, if any.
    pub fn take_shared(&self) -> Result<PipeHandle, PipeError> {
        if !self.shared.caps.contains(PipeCaps::ACCEPT) {
            return Err(PipeError::BadState);
        }
        let mut inner = self.shared.state.lock().unwrap();
        if inner.sides[self.side].closed {
            return Err(PipeError::BadHandle);
        }
        match inner.sides[self.side].accepts.pop_front() {
            Some(handle) => Ok(handle),
            None => {
                if inner.sides[self.peer()].closed {
                    Err(PipeError::PeerClosed)
                } else {
                    Err(PipeError::ShouldWait)
                }
            }
        }
    }

    /// Disable directions of this end. Disabling read marks the peer's write
    /// side; buffered data stays readable and `BadState` surfaces after the
    /// drain.
    pub fn shutdown(&self, mode: ShutdownMode) -> Result<(), PipeError> {
        let mut inner = self.shared.state.lock().unwrap();
        if inner.sides[self.side].closed {
            return Err(PipeError::BadHandle);
        }
        let peer = self.peer();
        if mode.contains(ShutdownMode::READ) {
            inner.sides[self.side].read_disabled = true;
            inner.sides[peer].write_disabled = true;
        }
        if mode.contains(ShutdownMode::WRITE) {
            inner.sides[self.side].write_disabled = true;
            inner.sides[peer].read_disabled = true;
        }
        self.shared.sync(&mut inner);
        Ok(())
    }

    /// Set and clear user signal bits on this end.
    pub fn signal(&self, clear: Signals, set: Signals) -> Result<(), PipeError> {
        assert!(
            Signals::USER_MASK.contains(clear | set),
            "only user signals may be set explicitly"
        );
        let mut inner = self.shared.state.lock().unwrap();
        if inner.sides[self.side].closed {
            return Err(PipeError::BadHandle);
        }
        inner.sides[self.side].signals -= clear;
        inner.sides[self.side].signals |= set;
        self.shared.notify[self.side].notify_waiters();
        Ok(())
    }

    /// Set and clear user signal bits on the opposite end.
    pub fn signal_peer(&self, clear: Signals, set: Signals) -> Result<(), PipeError> {
        assert!(
            Signals::USER_MASK.contains(clear | set),
            "only user signals may be set explicitly"
        );
        let mut inner = self.shared.state.lock().unwrap();
        if inner.sides[self.side].closed {
            return Err(PipeError::BadHandle);
        }
        let peer = self.peer();
        if inner.sides[peer].closed {
            return Err(PipeError::PeerClosed);
        }
        inner.sides[peer].signals -= clear;
        inner.sides[peer].signals |= set;
        self.shared.notify[peer].notify_waiters();
        Ok(())
    }

    /// Currently observable signals on this end.
    pub fn signals(&self) -> Result<Signals, PipeError> {
        let inner = self.shared.state.lock().unwrap();
        if inner.sides[self.side].closed {
            return Err(PipeError::BadHandle);
        }
        Ok(inner.sides[self.side].signals)
    }

    /// Wait until any signal in `mask` is asserted on this end; returns the
    /// full observed set. Fails with `BadHandle` if this end closes.
    pub async fn wait(&self, mask: Signals) -> Result<Signals, PipeError> {
        loop {
            let notified = self.shared.notify[self.side].notified();
            tokio::pin!(notified);
            // Register before checking so a change between the check and the
            // await still wakes us.
            notified.as_mut().enable();
            {
                let inner = self.shared.state.lock().unwrap();
                if inner.sides[self.side].closed {
                    return Err(PipeError::BadHandle);
                }
                let observed = inner.sides[self.side].signals;
                if observed.intersects(mask) {
                    return Ok(observed);
                }
            }
            notified.await;
        }
    }

    /// Close this end. Idempotent. The peer observes `PEER_CLOSED` and may
    /// drain already-buffered data; every further operation on this end
    /// returns `BadHandle`.
    pub fn close(&self) {
        let orphans: Vec<PipeHandle> = {
            let mut inner = self.shared.state.lock().unwrap();
            if inner.sides[self.side].closed {
                return;
            }
            inner.sides[self.side].closed = true;
            let orphans = inner.sides[self.side].accepts.drain(..).collect();
            self.shared.sync(&mut inner);
            orphans
        };
        // Handles transferred but never taken die with this end.
        for handle in orphans {
            handle.close();
        }
    }
}
