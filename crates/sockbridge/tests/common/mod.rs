//! Shared test plumbing: a scriptable transport endpoint and a minimal
//! control-channel client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sockbridge::{
    Endpoint, EventQueue, PipeError, PipeHandle, Readiness, Received, ShutdownMode, Signals,
    SockOptValue, TransportError, WriteError, WriteOptions,
};
use sockbridge_wire::{
    decode_control_frame, ControlRequest, ControlResponse, SocketAddress,
};
use tokio::sync::oneshot;

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct State {
    connected: bool,
    refused: bool,
    listening: bool,
    listen_backlog: Option<i16>,
    closed_for_receive: bool,
    rx: VecDeque<(Vec<u8>, Option<SocketAddress>)>,
    written: Vec<(Vec<u8>, Option<SocketAddress>)>,
    backlog: VecDeque<Arc<FakeEndpoint>>,
    local: Option<SocketAddress>,
    remote: Option<SocketAddress>,
    shutdown_read: bool,
    shutdown_write: bool,
    opts: Vec<((i16, i16), i32)>,
    connect_result: Option<TransportError>,
    bind_result: Option<TransportError>,
    block_writes: bool,
    need_resolution: bool,
    resolution: Option<oneshot::Sender<()>>,
    closed: bool,
}

/// A transport endpoint whose behavior the test scripts step by step.
pub struct FakeEndpoint {
    wq: EventQueue,
    state: Mutex<State>,
}

impl FakeEndpoint {
    /// A stream endpoint before its connection is established.
    pub fn tcp() -> Arc<Self> {
        Arc::new(Self {
            wq: EventQueue::new(),
            state: Mutex::new(State {
                connect_result: Some(TransportError::ConnectStarted),
                ..State::default()
            }),
        })
    }

    /// A stream endpoint that is already connected.
    pub fn tcp_connected() -> Arc<Self> {
        let ep = Self::tcp();
        ep.state.lock().unwrap().connected = true;
        ep
    }

    /// A datagram endpoint; never blocks on a connection.
    pub fn udp() -> Arc<Self> {
        Arc::new(Self {
            wq: EventQueue::new(),
            state: Mutex::new(State {
                connected: true,
                ..State::default()
            }),
        })
    }

    pub fn set_connected(&self) {
        let mut s = self.state.lock().unwrap();
        s.connected = true;
        s.refused = false;
        drop(s);
        self.wq.notify(Readiness::OUT);
    }

    pub fn refuse(&self) {
        self.state.lock().unwrap().refused = true;
        self.wq.notify(Readiness::OUT);
    }

    pub fn push_data(&self, data: &[u8], sender: Option<SocketAddress>) {
        self.state
            .lock()
            .unwrap()
            .rx
            .push_back((data.to_vec(), sender));
        self.wq.notify(Readiness::IN);
    }

    pub fn push_incoming(&self, ep: Arc<FakeEndpoint>) {
        self.state.lock().unwrap().backlog.push_back(ep);
        self.wq.notify(Readiness::IN);
    }

    pub fn set_closed_for_receive(&self) {
        self.state.lock().unwrap().closed_for_receive = true;
        self.wq.notify(Readiness::IN);
    }

    pub fn set_local(&self, addr: SocketAddress) {
        self.state.lock().unwrap().local = Some(addr);
    }

    pub fn set_remote(&self, addr: SocketAddress) {
        self.state.lock().unwrap().remote = Some(addr);
    }

    pub fn set_bind_result(&self, err: TransportError) {
        self.state.lock().unwrap().bind_result = Some(err);
    }

    pub fn block_writes(&self) {
        self.state.lock().unwrap().block_writes = true;
    }

    pub fn unblock_writes(&self) {
        self.state.lock().unwrap().block_writes = false;
        self.wq.notify(Readiness::OUT);
    }

    pub fn require_link_resolution(&self) {
        self.state.lock().unwrap().need_resolution = true;
    }

    pub fn has_pending_resolution(&self) -> bool {
        self.state.lock().unwrap().resolution.is_some()
    }

    pub fn resolve_link(&self) {
        let tx = self.state.lock().unwrap().resolution.take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    pub fn written(&self) -> Vec<(Vec<u8>, Option<SocketAddress>)> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn was_shutdown_write(&self) -> bool {
        self.state.lock().unwrap().shutdown_write
    }

    pub fn was_shutdown_read(&self) -> bool {
        self.state.lock().unwrap().shutdown_read
    }

    pub fn listen_backlog(&self) -> Option<i16> {
        self.state.lock().unwrap().listen_backlog
    }
}

impl Endpoint for FakeEndpoint {
    fn read(&self) -> Result<Received, TransportError> {
        let mut s = self.state.lock().unwrap();
        // Buffered data drains before any terminal condition.
        if let Some((data, sender)) = s.rx.pop_front() {
            return Ok(Received { data, sender });
        }
        if s.closed_for_receive {
            return Err(TransportError::ClosedForReceive);
        }
        if s.listening {
            return Err(TransportError::InvalidEndpointState);
        }
        if s.refused {
            return Err(TransportError::ConnectionRefused);
        }
        if !s.connected {
            return Err(TransportError::InvalidEndpointState);
        }
        Err(TransportError::WouldBlock)
    }

    fn write(&self, data: &[u8], opts: &WriteOptions) -> Result<usize, WriteError> {
        let mut s = self.state.lock().unwrap();
        if s.need_resolution {
            s.need_resolution = false;
            let (tx, rx) = oneshot::channel();
            s.resolution = Some(tx);
            return Err(WriteError::ResolutionPending(rx));
        }
        if s.block_writes {
            return Err(WriteError::Transport(TransportError::WouldBlock));
        }
        s.written.push((data.to_vec(), opts.to));
        Ok(data.len())
    }

    fn connect(&self, addr: SocketAddress) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        s.remote = Some(addr);
        match s.connect_result.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn bind(&self, addr: SocketAddress) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        if let Some(err) = s.bind_result.take() {
            return Err(err);
        }
        s.local = Some(addr);
        Ok(())
    }

    fn listen(&self, backlog: i16) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        s.listening = true;
        s.listen_backlog = Some(backlog);
        Ok(())
    }

    fn accept(&self) -> Result<Arc<dyn Endpoint>, TransportError> {
        let mut s = self.state.lock().unwrap();
        match s.backlog.pop_front() {
            Some(ep) => Ok(ep),
            None => Err(TransportError::WouldBlock),
        }
    }

    fn shutdown(&self, mode: ShutdownMode) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        if mode.contains(ShutdownMode::READ) {
            s.shutdown_read = true;
        }
        if mode.contains(ShutdownMode::WRITE) {
            s.shutdown_write = true;
        }
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddress, TransportError> {
        let s = self.state.lock().unwrap();
        s.local.ok_or(TransportError::InvalidEndpointState)
    }

    fn remote_addr(&self) -> Result<SocketAddress, TransportError> {
        let s = self.state.lock().unwrap();
        s.remote.ok_or(TransportError::NotConnected)
    }

    fn readiness(&self, mask: Readiness) -> Readiness {
        let s = self.state.lock().unwrap();
        let mut ready = Readiness::empty();
        if mask.contains(Readiness::IN) && (!s.rx.is_empty() || !s.backlog.is_empty()) {
            ready |= Readiness::IN;
        }
        if mask.contains(Readiness::OUT) && s.connected {
            ready |= Readiness::OUT;
        }
        ready
    }

    fn get_sock_opt(&self, level: i16, name: i16) -> Result<SockOptValue, TransportError> {
        let s = self.state.lock().unwrap();
        s.opts
            .iter()
            .find(|(key, _)| *key == (level, name))
            .map(|(_, v)| SockOptValue::I32(*v))
            .ok_or(TransportError::UnknownProtocolOption)
    }

    fn set_sock_opt(&self, level: i16, name: i16, value: &[u8]) -> Result<(), TransportError> {
        let raw: [u8; 4] = value
            .try_into()
            .map_err(|_| TransportError::InvalidOptionValue)?;
        let mut s = self.state.lock().unwrap();
        s.opts.retain(|(key, _)| *key != (level, name));
        s.opts.push(((level, name), i32::from_le_bytes(raw)));
        Ok(())
    }

    fn event_queue(&self) -> &EventQueue {
        &self.wq
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

/// Issue one control RPC and await its response.
pub async fn control_call(peer: &PipeHandle, txid: u32, request: ControlRequest) -> ControlResponse {
    let frame = request.encode(txid).expect("encode request");
    peer.write_control(&frame).expect("write control request");
    read_response(peer, txid).await
}

/// Await the response for `txid`.
pub async fn read_response(peer: &PipeHandle, txid: u32) -> ControlResponse {
    loop {
        match peer.read_control() {
            Ok(msg) => {
                let frame = decode_control_frame(&msg).expect("decode response frame");
                assert_eq!(frame.txid, txid, "response txid");
                return ControlResponse::decode(frame.body).expect("decode response");
            }
            Err(PipeError::ShouldWait) => {
                peer.wait(Signals::CONTROL_READABLE | Signals::PEER_CLOSED)
                    .await
                    .expect("wait for control response");
            }
            Err(err) => panic!("control read failed: {err}"),
        }
    }
}

/// Poll `predicate` until it holds or the timeout elapses.
pub async fn eventually(predicate: impl Fn() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if predicate() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Read from the client end, waiting for readability.
pub async fn client_read(peer: &PipeHandle, buf: &mut [u8]) -> Result<usize, PipeError> {
    loop {
        match peer.read(buf) {
            Err(PipeError::ShouldWait) => {
                peer.wait(
                    Signals::READABLE
                        | Signals::READ_DISABLED
                        | Signals::PEER_CLOSED,
                )
                .await?;
            }
            other => return other,
        }
    }
}
