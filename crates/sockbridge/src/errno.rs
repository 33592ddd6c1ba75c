//! Transport error to POSIX errno fan-in.

use crate::endpoint::TransportError;

/// Map a transport error to the errno the client sees on the control channel.
///
/// The error set is closed, so the match is total; adding a transport error
/// kind without extending this table is a compile error.
pub fn transport_error_code(err: TransportError) -> i16 {
    let code = match err {
        TransportError::UnknownProtocol => libc::EINVAL,
        TransportError::UnknownNicId => libc::EINVAL,
        TransportError::UnknownProtocolOption => libc::ENOPROTOOPT,
        TransportError::DuplicateNicId => libc::EEXIST,
        TransportError::DuplicateAddress => libc::EEXIST,
        TransportError::NoRoute => libc::EHOSTUNREACH,
        TransportError::BadLinkEndpoint => libc::EINVAL,
        TransportError::AlreadyBound => libc::EINVAL,
        TransportError::InvalidEndpointState => libc::EINVAL,
        TransportError::AlreadyConnecting => libc::EALREADY,
        TransportError::AlreadyConnected => libc::EISCONN,
        TransportError::NoPortAvailable => libc::EAGAIN,
        TransportError::PortInUse => libc::EADDRINUSE,
        TransportError::BadLocalAddress => libc::EADDRNOTAVAIL,
        TransportError::ClosedForSend => libc::EPIPE,
        TransportError::ClosedForReceive => libc::EAGAIN,
        TransportError::WouldBlock => libc::EWOULDBLOCK,
        TransportError::ConnectionRefused => libc::ECONNREFUSED,
        TransportError::Timeout => libc::ETIMEDOUT,
        TransportError::Aborted => libc::EPIPE,
        TransportError::ConnectStarted => libc::EINPROGRESS,
        TransportError::DestinationRequired => libc::EDESTADDRREQ,
        TransportError::NotSupported => libc::EOPNOTSUPP,
        TransportError::QueueSizeNotSupported => libc::ENOTTY,
        TransportError::NotConnected => libc::ENOTCONN,
        TransportError::ConnectionReset => libc::ECONNRESET,
        TransportError::ConnectionAborted => libc::ECONNABORTED,
        TransportError::NoSuchFile => libc::ENOENT,
        TransportError::InvalidOptionValue => libc::EINVAL,
        TransportError::NoLinkAddress => libc::EHOSTDOWN,
        TransportError::BadAddress => libc::EFAULT,
        TransportError::NetworkUnreachable => libc::ENETUNREACH,
        TransportError::MessageTooLong => libc::EMSGSIZE,
        TransportError::NoBufferSpace => libc::ENOBUFS,
    };
    code as i16
}
