#![forbid(unsafe_code)]

//! A socket bridge: POSIX-style socket clients on one side, an in-process
//! transport stack on the other.
//!
//! Each client socket is a [`pipe`] pair. The peer end goes to the client
//! and carries data bytes, control-channel RPCs
//! (connect/bind/listen/accept/sockopts/ioctl/close), and signal bits. The
//! bridge end is owned by an [`iostate::IoState`] whose three tasks
//! translate between the pipe and a transport [`endpoint::Endpoint`]:
//! POSIX blocking semantics, datagram framing, half-close, and errno
//! reporting are all reconstructed here on top of the endpoint's
//! non-blocking, readiness-driven surface.
//!
//! The [`netstack`] module holds the interface registry the netconfig
//! ioctls snapshot, plus the Ethernet interface lifecycle (device hooks,
//! DHCP/static address configuration).

mod control;
pub mod endpoint;
pub mod errno;
pub mod iostate;
pub mod netstack;
pub mod pipe;
pub mod waiter;

pub use endpoint::{
    Endpoint, NetProto, Received, ResolutionWait, ShutdownMode, SockOptValue, TransProto,
    TransportError, WriteError, WriteOptions,
};
pub use errno::transport_error_code;
pub use iostate::{spawn_socket, IoState};
pub use netstack::{
    DeviceFeatures, DeviceInfo, EthernetDevice, IfState, InterfaceConfig, IpAddressConfig,
    LinkStatus, Netstack, NicId,
};
pub use pipe::{pipe, PipeCaps, PipeError, PipeHandle, PipeKind, Signals};
pub use waiter::{EventEntry, EventQueue, Readiness};
