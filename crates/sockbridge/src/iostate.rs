//! Per-socket I/O state and the two data loops.
//!
//! Each client socket is served by three tasks sharing one [`IoState`]:
//! `loop_write` drains client bytes into the endpoint, `loop_read` drains
//! endpoint bytes into the client pipe and drives connect/listen
//! signalling, and the control loop (see [`crate::control`]) services RPCs.
//! They coordinate through the `closing` latch and the pipe's signal word.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use sockbridge_wire as wire;
use tokio::sync::{oneshot, watch};
use tracing::Instrument;

use crate::control;
use crate::endpoint::{
    Endpoint, NetProto, ShutdownMode, TransProto, TransportError, WriteError, WriteOptions,
};
use crate::netstack::Netstack;
use crate::pipe::{pipe, PipeCaps, PipeError, PipeHandle, PipeKind, Signals};
use crate::waiter::{EventEntry, Readiness};

/// Bytes drained from the client pipe per iteration.
const READ_BUDGET: usize = 2048;

/// State shared by the three loops of one client socket.
pub struct IoState {
    pub(crate) ns: Arc<Netstack>,
    pub(crate) net_proto: NetProto,
    pub(crate) trans_proto: TransProto,
    pub(crate) ep: Arc<dyn Endpoint>,
    /// Bridge-local end of the client pipe.
    pub(crate) data: PipeHandle,
    /// Serializes read-modify-write of the INCOMING signal bit.
    pub(crate) incoming_asserted: Mutex<()>,
    closed_once: AtomicBool,
    closing_tx: watch::Sender<bool>,
    closing_rx: watch::Receiver<bool>,
    loop_write_done: Mutex<Option<oneshot::Receiver<()>>>,
}

/// Build a pipe pair and an I/O state for `ep`, spawn the three loops, and
/// hand the peer end to the client.
pub fn spawn_socket(
    ns: Arc<Netstack>,
    net_proto: NetProto,
    trans_proto: TransProto,
    ep: Arc<dyn Endpoint>,
) -> PipeHandle {
    spawn_socket_inner(ns, net_proto, trans_proto, ep, false)
}

pub(crate) fn spawn_socket_inner(
    ns: Arc<Netstack>,
    net_proto: NetProto,
    trans_proto: TransProto,
    ep: Arc<dyn Endpoint>,
    is_accept: bool,
) -> PipeHandle {
    let kind = match trans_proto {
        TransProto::Tcp => PipeKind::Stream,
        TransProto::Udp => PipeKind::Datagram,
    };
    let mut caps = PipeCaps::CONTROL;
    if !is_accept {
        caps |= PipeCaps::ACCEPT;
    }
    let (local, peer) = pipe(kind, caps);

    let (closing_tx, closing_rx) = watch::channel(false);
    let (done_tx, done_rx) = oneshot::channel();
    let ios = Arc::new(IoState {
        ns,
        net_proto,
        trans_proto,
        ep,
        data: local,
        incoming_asserted: Mutex::new(()),
        closed_once: AtomicBool::new(false),
        closing_tx,
        closing_rx,
        loop_write_done: Mutex::new(Some(done_rx)),
    });

    let span = tracing::debug_span!("socket", trans = ?trans_proto, net = ?net_proto, is_accept);
    {
        let ios = ios.clone();
        tokio::spawn(
            async move {
                if let Err(err) = control::loop_control(&ios).await {
                    tracing::warn!("loop_control: {err:#}");
                }
            }
            .instrument(span.clone()),
        );
    }
    {
        let ios = ios.clone();
        tokio::spawn(
            async move {
                if let Err(err) = ios.loop_read().await {
                    tracing::warn!("loop_read: {err:#}");
                }
            }
            .instrument(span.clone()),
        );
    }
    {
        let ios = ios.clone();
        tokio::spawn(
            async move {
                // Dropping the sender is what closes the completion latch.
                let _done = done_tx;
                if let Err(err) = ios.loop_write().await {
                    tracing::warn!("loop_write: {err:#}");
                }
            }
            .instrument(span),
        );
    }

    peer
}

/// Resolve once the closing latch flips.
async fn closed(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // The sender lives as long as the state; treat loss as "never".
            std::future::pending::<()>().await;
        }
    }
}

impl IoState {
    /// Drain client writes into the endpoint.
    pub(crate) async fn loop_write(&self) -> anyhow::Result<()> {
        let mut entry = EventEntry::new();
        let result = self.write_body(&mut entry).await;
        self.ep.event_queue().unregister(&entry);
        result
    }

    async fn write_body(&self, entry: &mut EventEntry) -> anyhow::Result<()> {
        const SIGS: Signals = Signals::READABLE
            .union(Signals::READ_DISABLED)
            .union(Signals::PEER_CLOSED)
            .union(Signals::CLOSING);
        let wq = self.ep.event_queue();
        loop {
            let mut buf = vec![0u8; READ_BUDGET];
            let n = loop {
                match self.data.read(&mut buf) {
                    Ok(n) => break n,
                    Err(PipeError::BadState) => {
                        // The client closed its write side.
                        match self.ep.shutdown(ShutdownMode::WRITE) {
                            Ok(()) | Err(TransportError::NotConnected) => {}
                            Err(err) => return Err(err).context("endpoint shutdown(write)"),
                        }
                        return Ok(());
                    }
                    Err(PipeError::PeerClosed) | Err(PipeError::BadHandle) => return Ok(()),
                    Err(PipeError::ShouldWait) => {
                        let observed = match self.data.wait(SIGS).await {
                            Ok(observed) => observed,
                            Err(_) => return Ok(()),
                        };
                        if observed.contains(Signals::READ_DISABLED) {
                            // The next read reports BadState.
                        } else if observed.contains(Signals::READABLE) {
                            // Data may still be buffered even when the client
                            // has closed; retry the read before exiting.
                        } else if observed.contains(Signals::PEER_CLOSED) {
                            return Ok(());
                        } else if observed.contains(Signals::CLOSING) {
                            return Ok(());
                        }
                    }
                }
            };
            buf.truncate(n);

            let mut opts = WriteOptions::default();
            let payload_at = if self.trans_proto == TransProto::Udp {
                opts.to = wire::decode_msg_header(&buf).context("datagram message header")?;
                wire::MSG_HEADER_LEN
            } else {
                0
            };

            wq.register(entry, Readiness::OUT);
            let mut view = &buf[payload_at..];
            loop {
                match self.ep.write(view, &opts) {
                    Err(WriteError::ResolutionPending(resolution)) => {
                        assert!(
                            self.trans_proto != TransProto::Tcp,
                            "stream link address resolutions happen on connect"
                        );
                        let _ = resolution.await;
                    }
                    Err(WriteError::Transport(TransportError::WouldBlock)) => {
                        assert!(
                            self.trans_proto == TransProto::Tcp,
                            "datagram writes are nonblocking"
                        );
                        // Deliberately not interruptible by close: bytes the
                        // client already submitted are either accepted or
                        // fail with a terminal endpoint error.
                        entry.ready().await;
                    }
                    Err(WriteError::Transport(err)) => {
                        return Err(err).context("endpoint write");
                    }
                    Ok(written) => {
                        assert!(
                            self.trans_proto == TransProto::Tcp || written == view.len(),
                            "short datagram write: {written}/{}",
                            view.len()
                        );
                        view = &view[written..];
                        if view.is_empty() {
                            break;
                        }
                    }
                }
            }
            wq.unregister(entry);
        }
    }

    /// Drain endpoint reads into the client pipe, driving the
    /// connect/listen signalling on the way.
    pub(crate) async fn loop_read(&self) -> anyhow::Result<()> {
        let mut in_entry = EventEntry::new();
        let mut out_entry = EventEntry::new();
        let result = self.read_body(&mut in_entry, &mut out_entry).await;
        let wq = self.ep.event_queue();
        wq.unregister(&in_entry);
        wq.unregister(&out_entry);
        result
    }

    async fn read_body(
        &self,
        in_entry: &mut EventEntry,
        out_entry: &mut EventEntry,
    ) -> anyhow::Result<()> {
        const SIGS: Signals = Signals::WRITABLE
            .union(Signals::WRITE_DISABLED)
            .union(Signals::PEER_CLOSED)
            .union(Signals::CLOSING);
        let wq = self.ep.event_queue();
        let mut closing = self.closing_rx.clone();

        // Datagram sockets never block on a connection.
        let mut connected = self.trans_proto != TransProto::Tcp;
        if !connected {
            wq.register(out_entry, Readiness::OUT);
        }

        loop {
            wq.register(in_entry, Readiness::IN);
            let received = loop {
                let result = self.ep.read();
                match &result {
                    Err(TransportError::ClosedForReceive) => {
                        let _ = self.data.shutdown(ShutdownMode::WRITE);
                        return Ok(());
                    }
                    Err(TransportError::InvalidEndpointState) => {
                        assert!(!connected, "connected endpoint reported an invalid state");
                        enum Edge {
                            Closing,
                            Incoming,
                            Outgoing,
                        }
                        let edge = tokio::select! {
                            _ = closed(&mut closing) => Edge::Closing,
                            _ = in_entry.ready() => Edge::Incoming,
                            _ = out_entry.ready() => Edge::Outgoing,
                        };
                        match edge {
                            Edge::Closing => return Ok(()),
                            Edge::Incoming => {
                                // A pending connection arrived: this is a
                                // listening socket.
                                wq.unregister(out_entry);
                                let asserted = {
                                    let _guard = self.incoming_asserted.lock().unwrap();
                                    self.data.signal_peer(Signals::empty(), Signals::INCOMING)
                                };
                                match asserted {
                                    Ok(()) => {}
                                    Err(PipeError::BadHandle) | Err(PipeError::PeerClosed) => {
                                        return Ok(())
                                    }
                                    Err(err) => unreachable!("signal_peer: {err}"),
                                }
                            }
                            Edge::Outgoing => {
                                // Became connected; the next read reflects it.
                            }
                        }
                        continue;
                    }
                    _ => {}
                }

                if !connected {
                    let mut signals = Signals::OUTGOING;
                    if matches!(&result, Ok(_) | Err(TransportError::WouldBlock)) {
                        connected = true;
                        wq.unregister(out_entry);
                        signals |= Signals::CONNECTED;
                    }
                    match self.data.signal_peer(Signals::empty(), signals) {
                        Ok(()) => {}
                        Err(PipeError::BadHandle) | Err(PipeError::PeerClosed) => return Ok(()),
                        Err(err) => unreachable!("signal_peer: {err}"),
                    }
                }

                match result {
                    Ok(received) => break received,
                    Err(TransportError::ConnectionRefused) => {
                        // Sockets with connection errors may be reused; a new
                        // connect produces a fresh outbound edge.
                        tokio::select! {
                            _ = out_entry.ready() => {}
                            _ = closed(&mut closing) => return Ok(()),
                        }
                    }
                    Err(TransportError::WouldBlock) => {
                        tokio::select! {
                            _ = in_entry.ready() => {}
                            _ = closed(&mut closing) => return Ok(()),
                        }
                    }
                    Err(err) => return Err(err).context("endpoint read"),
                }
            };
            wq.unregister(in_entry);

            let buf = if self.trans_proto == TransProto::Udp {
                let header = wire::encode_msg_header(
                    received
                        .sender
                        .as_ref()
                        .map(|sender| (self.net_proto.family(), sender)),
                );
                let mut out = Vec::with_capacity(wire::MSG_HEADER_LEN + received.data.len());
                out.extend_from_slice(&header);
                out.extend_from_slice(&received.data);
                out
            } else {
                received.data
            };

            let mut view = &buf[..];
            loop {
                match self.data.write(view) {
                    Ok(written) => {
                        assert!(
                            self.trans_proto == TransProto::Tcp || written == view.len(),
                            "short datagram write on the pipe: {written}/{}",
                            view.len()
                        );
                        view = &view[written..];
                        if view.is_empty() {
                            break;
                        }
                    }
                    Err(PipeError::BadState) => {
                        // The client closed its read side.
                        self.ep
                            .shutdown(ShutdownMode::READ)
                            .context("endpoint shutdown(read)")?;
                        return Ok(());
                    }
                    Err(PipeError::ShouldWait) => {
                        let observed = match self.data.wait(SIGS).await {
                            Ok(observed) => observed,
                            Err(_) => return Ok(()),
                        };
                        if observed.contains(Signals::WRITE_DISABLED) {
                            // The next write reports BadState.
                        } else if observed.contains(Signals::WRITABLE) {
                        } else if observed.contains(Signals::PEER_CLOSED) {
                            return Ok(());
                        } else if observed.contains(Signals::CLOSING) {
                            return Ok(());
                        }
                    }
                    Err(PipeError::BadHandle) | Err(PipeError::PeerClosed) => return Ok(()),
                }
            }
        }
    }

    /// Tear the socket down. The first call asserts CLOSING on the local
    /// end, flips the latch, joins `loop_write`, and closes the endpoint.
    /// `loop_read` is not joined: a full client pipe could keep it from
    /// progressing, and pipe closure releases it instead. Every later call
    /// returns success without side effects.
    pub async fn close(&self) -> i16 {
        if self.closed_once.swap(true, Ordering::SeqCst) {
            return 0;
        }
        match self.data.signal(Signals::empty(), Signals::CLOSING) {
            Ok(()) | Err(PipeError::BadHandle) => {}
            Err(err) => unreachable!("signal: {err}"),
        }
        let _ = self.closing_tx.send(true);

        let done = self.loop_write_done.lock().unwrap().take();
        if let Some(done) = done {
            let _ = done.await;
        }
        self.ep.close();
        0
    }
}
