//! The transport endpoint seam.
//!
//! The bridge never implements TCP or UDP itself; it drives an [`Endpoint`]
//! supplied by the in-process transport stack. Operations are non-blocking
//! and readiness is delivered through the endpoint's [`EventQueue`].

use std::sync::Arc;

use bitflags::bitflags;
use sockbridge_wire::{AddressFamily, SocketAddress};
use tokio::sync::oneshot;

use crate::waiter::{EventQueue, Readiness};

/// Network protocol of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetProto {
    V4,
    V6,
}

impl NetProto {
    pub fn family(self) -> AddressFamily {
        match self {
            NetProto::V4 => AddressFamily::V4,
            NetProto::V6 => AddressFamily::V6,
        }
    }
}

/// Transport protocol of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransProto {
    Tcp,
    Udp,
}

bitflags! {
    /// Directions of a half-close.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShutdownMode: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// Per-write options. `to` carries the datagram destination parsed from the
/// client's message header.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub to: Option<SocketAddress>,
}

/// A successful endpoint read. `sender` is populated for datagram transports.
#[derive(Debug, Clone)]
pub struct Received {
    pub data: Vec<u8>,
    pub sender: Option<SocketAddress>,
}

/// Completion of an in-flight link-address resolution. The writer blocks on
/// this and retries.
pub type ResolutionWait = oneshot::Receiver<()>;

/// Error kinds a transport endpoint can produce. The set is closed: the
/// errno mapping in [`crate::errno`] is a total match over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("unknown protocol")]
    UnknownProtocol,
    #[error("unknown nic id")]
    UnknownNicId,
    #[error("unknown option for protocol")]
    UnknownProtocolOption,
    #[error("duplicate nic id")]
    DuplicateNicId,
    #[error("duplicate address")]
    DuplicateAddress,
    #[error("no route")]
    NoRoute,
    #[error("bad link layer endpoint")]
    BadLinkEndpoint,
    #[error("endpoint already bound")]
    AlreadyBound,
    #[error("endpoint is in an invalid state")]
    InvalidEndpointState,
    #[error("endpoint is already connecting")]
    AlreadyConnecting,
    #[error("endpoint is already connected")]
    AlreadyConnected,
    #[error("no ports are available")]
    NoPortAvailable,
    #[error("port is in use")]
    PortInUse,
    #[error("bad local address")]
    BadLocalAddress,
    #[error("endpoint is closed for send")]
    ClosedForSend,
    #[error("endpoint is closed for receive")]
    ClosedForReceive,
    #[error("operation would block")]
    WouldBlock,
    #[error("connection was refused")]
    ConnectionRefused,
    #[error("operation timed out")]
    Timeout,
    #[error("operation aborted")]
    Aborted,
    #[error("connection attempt started")]
    ConnectStarted,
    #[error("destination address is required")]
    DestinationRequired,
    #[error("operation not supported")]
    NotSupported,
    #[error("queue size querying not supported")]
    QueueSizeNotSupported,
    #[error("endpoint not connected")]
    NotConnected,
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("connection aborted")]
    ConnectionAborted,
    #[error("no such file")]
    NoSuchFile,
    #[error("invalid option value")]
    InvalidOptionValue,
    #[error("no remote link address")]
    NoLinkAddress,
    #[error("bad address")]
    BadAddress,
    #[error("network is unreachable")]
    NetworkUnreachable,
    #[error("message too long")]
    MessageTooLong,
    #[error("no buffer space available")]
    NoBufferSpace,
}

/// Error surface of [`Endpoint::write`].
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The write cannot proceed until a link address resolves; block on the
    /// receiver and retry. Only datagram transports produce this.
    #[error("link address resolution pending")]
    ResolutionPending(ResolutionWait),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A fixed-width socket option value, serialized little-endian on the control
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockOptValue {
    I32(i32),
    U32(u32),
}

impl SockOptValue {
    pub fn to_le_bytes(self) -> Vec<u8> {
        match self {
            SockOptValue::I32(v) => v.to_le_bytes().to_vec(),
            SockOptValue::U32(v) => v.to_le_bytes().to_vec(),
        }
    }
}

/// The transport stack's socket abstraction. All operations are non-blocking;
/// `WouldBlock`-style outcomes pair with registrations on [`Self::event_queue`].
/// Implementations are internally synchronized.
pub trait Endpoint: Send + Sync {
    /// Read one buffer (TCP: a run of bytes; UDP: one datagram with sender).
    fn read(&self) -> Result<Received, TransportError>;

    /// Write as much of `data` as the endpoint accepts. Datagram transports
    /// accept all of it or fail.
    fn write(&self, data: &[u8], opts: &WriteOptions) -> Result<usize, WriteError>;

    fn connect(&self, addr: SocketAddress) -> Result<(), TransportError>;
    fn bind(&self, addr: SocketAddress) -> Result<(), TransportError>;
    fn listen(&self, backlog: i16) -> Result<(), TransportError>;

    /// Pop one pending connection off the accept queue.
    fn accept(&self) -> Result<Arc<dyn Endpoint>, TransportError>;

    fn shutdown(&self, mode: ShutdownMode) -> Result<(), TransportError>;

    fn local_addr(&self) -> Result<SocketAddress, TransportError>;
    fn remote_addr(&self) -> Result<SocketAddress, TransportError>;

    /// Which of `mask` is currently ready.
    fn readiness(&self, mask: Readiness) -> Readiness;

    fn get_sock_opt(&self, level: i16, name: i16) -> Result<SockOptValue, TransportError>;
    fn set_sock_opt(&self, level: i16, name: i16, value: &[u8]) -> Result<(), TransportError>;

    fn event_queue(&self) -> &EventQueue;

    fn close(&self);
}
