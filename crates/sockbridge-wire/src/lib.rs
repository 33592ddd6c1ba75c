#![forbid(unsafe_code)]

//! Wire codecs for the sockbridge client pipe.
//!
//! Everything a libc-side client and the bridge agree on byte-for-byte lives
//! here: the C-layout socket address forms, the fixed-size message header that
//! prefixes every datagram on the pipe, the control-channel frame format, and
//! the interface-info records returned by the netconfig ioctls.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// `AF_INET` as it appears on the wire (first two bytes, little-endian).
pub const AF_INET: u16 = 2;
/// `AF_INET6` as it appears on the wire.
pub const AF_INET6: u16 = 10;

/// Encoded size of an IPv4 socket address (C `sockaddr_in`).
pub const SOCKADDR_IN_LEN: usize = 16;
/// Encoded size of an IPv6 socket address (C `sockaddr_in6`).
pub const SOCKADDR_IN6_LEN: usize = 28;
/// Size of the address area in the datagram message header (C `sockaddr_storage`).
pub const SOCKADDR_STORAGE_LEN: usize = 128;

/// Fixed size of the header that precedes every datagram payload on the pipe:
/// a `SOCKADDR_STORAGE_LEN` address area, `addrlen: u32`, `flags: i32`.
pub const MSG_HEADER_LEN: usize = SOCKADDR_STORAGE_LEN + 8;

/// Control-channel frame header: `txid: u32-LE`, `ordinal: u32-LE`.
pub const CONTROL_HEADER_LEN: usize = 8;

/// Largest control message (header + body) the pipe will carry.
pub const CONTROL_MAX_MESSAGE: usize = 1024;

pub const ORD_CONNECT: u32 = 1;
pub const ORD_BIND: u32 = 2;
pub const ORD_LISTEN: u32 = 3;
pub const ORD_ACCEPT: u32 = 4;
pub const ORD_GET_SOCK_OPT: u32 = 5;
pub const ORD_SET_SOCK_OPT: u32 = 6;
pub const ORD_GET_SOCK_NAME: u32 = 7;
pub const ORD_GET_PEER_NAME: u32 = 8;
pub const ORD_IOCTL: u32 = 9;
pub const ORD_CLOSE: u32 = 10;

/// Netconfig ioctl request numbers (kind/family/number packing of the
/// original fdio surface).
pub const IOCTL_GET_NUM_IFS: i16 = 0x2601;
pub const IOCTL_GET_IF_INFO_AT: i16 = 0x2602;
pub const IOCTL_GET_NODENAME: i16 = 0x2608;

/// Interface name field width, including the NUL terminator.
pub const IFNAME_LEN: usize = 16;
/// Encoded size of one interface-info record.
pub const IF_INFO_LEN: usize = IFNAME_LEN + 4 + 3 * SOCKADDR_IN_LEN;
/// Interface flag: link is up.
pub const IFF_UP: u16 = 0x1;

/// Address family selector for encoding. The bridge knows its network
/// protocol up front; the encoded form is fixed-size per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A full socket address as the transport stack sees it.
///
/// `nic` is only representable on the wire for IPv6 (the `scope_id` field);
/// IPv4 addresses decode with `nic == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketAddress {
    pub addr: IpAddr,
    pub port: u16,
    pub nic: u32,
}

impl SocketAddress {
    pub fn v4(addr: Ipv4Addr, port: u16) -> Self {
        Self {
            addr: IpAddr::V4(addr),
            port,
            nic: 0,
        }
    }

    pub fn v6(addr: Ipv6Addr, port: u16, nic: u32) -> Self {
        Self {
            addr: IpAddr::V6(addr),
            port,
            nic,
        }
    }

    /// The family this address encodes under.
    pub fn family(&self) -> AddressFamily {
        match self.addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockaddrError {
    TooShort { len: usize, min: usize },
    UnsupportedFamily { family: u16 },
    BadAddrLen { addrlen: u32 },
}

impl core::fmt::Display for SockaddrError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SockaddrError::TooShort { len, min } => {
                write!(f, "sockaddr too short: {len} < {min}")
            }
            SockaddrError::UnsupportedFamily { family } => {
                write!(f, "unsupported address family: {family}")
            }
            SockaddrError::BadAddrLen { addrlen } => {
                write!(f, "bad message header addrlen: {addrlen}")
            }
        }
    }
}

impl std::error::Error for SockaddrError {}

/// Decode a tagged sockaddr octet string.
///
/// Trailing bytes beyond the family's fixed layout are ignored; clients hand
/// over whole `sockaddr_storage` buffers.
pub fn decode_sockaddr(buf: &[u8]) -> Result<SocketAddress, SockaddrError> {
    if buf.len() < 2 {
        return Err(SockaddrError::TooShort {
            len: buf.len(),
            min: 2,
        });
    }
    let family = u16::from_le_bytes([buf[0], buf[1]]);
    match family {
        AF_INET => {
            if buf.len() < SOCKADDR_IN_LEN {
                return Err(SockaddrError::TooShort {
                    len: buf.len(),
                    min: SOCKADDR_IN_LEN,
                });
            }
            let port = u16::from_be_bytes([buf[2], buf[3]]);
            let addr = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
            Ok(SocketAddress::v4(addr, port))
        }
        AF_INET6 => {
            if buf.len() < SOCKADDR_IN6_LEN {
                return Err(SockaddrError::TooShort {
                    len: buf.len(),
                    min: SOCKADDR_IN6_LEN,
                });
            }
            let port = u16::from_be_bytes([buf[2], buf[3]]);
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[8..24]);
            let nic = u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]);
            Ok(SocketAddress::v6(Ipv6Addr::from(octets), port, nic))
        }
        family => Err(SockaddrError::UnsupportedFamily { family }),
    }
}

/// Encode a socket address under the given family.
///
/// An address whose IP variant does not match `family` encodes as the
/// unspecified address of that family; the bridge uses this for not-yet-bound
/// endpoints.
pub fn encode_sockaddr(family: AddressFamily, addr: &SocketAddress) -> Vec<u8> {
    match family {
        AddressFamily::V4 => {
            let mut out = vec![0u8; SOCKADDR_IN_LEN];
            out[0..2].copy_from_slice(&AF_INET.to_le_bytes());
            out[2..4].copy_from_slice(&addr.port.to_be_bytes());
            if let IpAddr::V4(ip) = addr.addr {
                out[4..8].copy_from_slice(&ip.octets());
            }
            out
        }
        AddressFamily::V6 => {
            let mut out = vec![0u8; SOCKADDR_IN6_LEN];
            out[0..2].copy_from_slice(&AF_INET6.to_le_bytes());
            out[2..4].copy_from_slice(&addr.port.to_be_bytes());
            if let IpAddr::V6(ip) = addr.addr {
                out[8..24].copy_from_slice(&ip.octets());
            }
            out[24..28].copy_from_slice(&addr.nic.to_le_bytes());
            out
        }
    }
}

/// Encode the datagram message header. `None` encodes `addrlen == 0`
/// ("unspecified destination").
pub fn encode_msg_header(addr: Option<(AddressFamily, &SocketAddress)>) -> [u8; MSG_HEADER_LEN] {
    let mut out = [0u8; MSG_HEADER_LEN];
    let addrlen = match addr {
        Some((family, addr)) => {
            let encoded = encode_sockaddr(family, addr);
            out[..encoded.len()].copy_from_slice(&encoded);
            encoded.len() as u32
        }
        None => 0,
    };
    out[SOCKADDR_STORAGE_LEN..SOCKADDR_STORAGE_LEN + 4].copy_from_slice(&addrlen.to_le_bytes());
    // flags: i32-LE, always zero
    out
}

/// Decode the datagram message header. Returns the embedded address, or
/// `None` when `addrlen == 0`.
pub fn decode_msg_header(buf: &[u8]) -> Result<Option<SocketAddress>, SockaddrError> {
    if buf.len() < MSG_HEADER_LEN {
        return Err(SockaddrError::TooShort {
            len: buf.len(),
            min: MSG_HEADER_LEN,
        });
    }
    let addrlen = u32::from_le_bytes([
        buf[SOCKADDR_STORAGE_LEN],
        buf[SOCKADDR_STORAGE_LEN + 1],
        buf[SOCKADDR_STORAGE_LEN + 2],
        buf[SOCKADDR_STORAGE_LEN + 3],
    ]);
    if addrlen == 0 {
        return Ok(None);
    }
    if addrlen as usize > SOCKADDR_STORAGE_LEN {
        return Err(SockaddrError::BadAddrLen { addrlen });
    }
    decode_sockaddr(&buf[..addrlen as usize]).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    TooShort { len: usize, min: usize },
    UnknownOrdinal { ordinal: u32 },
    MessageTooLarge { len: usize, max: usize },
}

impl core::fmt::Display for ControlError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ControlError::TooShort { len, min } => {
                write!(f, "control message too short: {len} < {min}")
            }
            ControlError::UnknownOrdinal { ordinal } => {
                write!(f, "unknown control ordinal: {ordinal}")
            }
            ControlError::MessageTooLarge { len, max } => {
                write!(f, "control message too large: {len} > {max}")
            }
        }
    }
}

impl std::error::Error for ControlError {}

/// A decoded control-channel frame header plus its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFrame<'a> {
    pub txid: u32,
    pub ordinal: u32,
    pub body: &'a [u8],
}

pub fn encode_control_frame(txid: u32, ordinal: u32, body: &[u8]) -> Result<Vec<u8>, ControlError> {
    let len = CONTROL_HEADER_LEN + body.len();
    if len > CONTROL_MAX_MESSAGE {
        return Err(ControlError::MessageTooLarge {
            len,
            max: CONTROL_MAX_MESSAGE,
        });
    }
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&txid.to_le_bytes());
    out.extend_from_slice(&ordinal.to_le_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

pub fn decode_control_frame(buf: &[u8]) -> Result<ControlFrame<'_>, ControlError> {
    if buf.len() < CONTROL_HEADER_LEN {
        return Err(ControlError::TooShort {
            len: buf.len(),
            min: CONTROL_HEADER_LEN,
        });
    }
    Ok(ControlFrame {
        txid: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        ordinal: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        body: &buf[CONTROL_HEADER_LEN..],
    })
}

/// A control-channel request, dispatched by ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Connect { sockaddr: Vec<u8> },
    Bind { sockaddr: Vec<u8> },
    Listen { backlog: i16 },
    Accept { flags: i16 },
    GetSockOpt { level: i16, name: i16 },
    SetSockOpt { level: i16, name: i16, value: Vec<u8> },
    GetSockName,
    GetPeerName,
    Ioctl { req: i16, input: Vec<u8> },
    Close,
}

fn read_i16(buf: &[u8], at: usize) -> Result<i16, ControlError> {
    if buf.len() < at + 2 {
        return Err(ControlError::TooShort {
            len: buf.len(),
            min: at + 2,
        });
    }
    Ok(i16::from_le_bytes([buf[at], buf[at + 1]]))
}

impl ControlRequest {
    pub fn ordinal(&self) -> u32 {
        match self {
            ControlRequest::Connect { .. } => ORD_CONNECT,
            ControlRequest::Bind { .. } => ORD_BIND,
            ControlRequest::Listen { .. } => ORD_LISTEN,
            ControlRequest::Accept { .. } => ORD_ACCEPT,
            ControlRequest::GetSockOpt { .. } => ORD_GET_SOCK_OPT,
            ControlRequest::SetSockOpt { .. } => ORD_SET_SOCK_OPT,
            ControlRequest::GetSockName => ORD_GET_SOCK_NAME,
            ControlRequest::GetPeerName => ORD_GET_PEER_NAME,
            ControlRequest::Ioctl { .. } => ORD_IOCTL,
            ControlRequest::Close => ORD_CLOSE,
        }
    }

    /// Encode the request as a full control frame.
    pub fn encode(&self, txid: u32) -> Result<Vec<u8>, ControlError> {
        let body = match self {
            ControlRequest::Connect { sockaddr } | ControlRequest::Bind { sockaddr } => {
                sockaddr.clone()
            }
            ControlRequest::Listen { backlog } => backlog.to_le_bytes().to_vec(),
            ControlRequest::Accept { flags } => flags.to_le_bytes().to_vec(),
            ControlRequest::GetSockOpt { level, name } => {
                let mut b = Vec::with_capacity(4);
                b.extend_from_slice(&level.to_le_bytes());
                b.extend_from_slice(&name.to_le_bytes());
                b
            }
            ControlRequest::SetSockOpt { level, name, value } => {
                let mut b = Vec::with_capacity(4 + value.len());
                b.extend_from_slice(&level.to_le_bytes());
                b.extend_from_slice(&name.to_le_bytes());
                b.extend_from_slice(value);
                b
            }
            ControlRequest::GetSockName | ControlRequest::GetPeerName | ControlRequest::Close => {
                Vec::new()
            }
            ControlRequest::Ioctl { req, input } => {
                let mut b = Vec::with_capacity(2 + input.len());
                b.extend_from_slice(&req.to_le_bytes());
                b.extend_from_slice(input);
                b
            }
        };
        encode_control_frame(txid, self.ordinal(), &body)
    }

    /// Decode a request body for the given ordinal.
    pub fn decode(ordinal: u32, body: &[u8]) -> Result<Self, ControlError> {
        match ordinal {
            ORD_CONNECT => Ok(ControlRequest::Connect {
                sockaddr: body.to_vec(),
            }),
            ORD_BIND => Ok(ControlRequest::Bind {
                sockaddr: body.to_vec(),
            }),
            ORD_LISTEN => Ok(ControlRequest::Listen {
                backlog: read_i16(body, 0)?,
            }),
            ORD_ACCEPT => Ok(ControlRequest::Accept {
                flags: read_i16(body, 0)?,
            }),
            ORD_GET_SOCK_OPT => Ok(ControlRequest::GetSockOpt {
                level: read_i16(body, 0)?,
                name: read_i16(body, 2)?,
            }),
            ORD_SET_SOCK_OPT => Ok(ControlRequest::SetSockOpt {
                level: read_i16(body, 0)?,
                name: read_i16(body, 2)?,
                value: body[4.min(body.len())..].to_vec(),
            }),
            ORD_GET_SOCK_NAME => Ok(ControlRequest::GetSockName),
            ORD_GET_PEER_NAME => Ok(ControlRequest::GetPeerName),
            ORD_IOCTL => Ok(ControlRequest::Ioctl {
                req: read_i16(body, 0)?,
                input: body[2.min(body.len())..].to_vec(),
            }),
            ORD_CLOSE => Ok(ControlRequest::Close),
            ordinal => Err(ControlError::UnknownOrdinal { ordinal }),
        }
    }
}

/// A control-channel response: a POSIX errno (`0` for success) and an
/// op-specific body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub code: i16,
    pub body: Vec<u8>,
}

impl ControlResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self { code: 0, body }
    }

    pub fn err(code: i16) -> Self {
        Self {
            code,
            body: Vec::new(),
        }
    }

    /// Encode as a full control frame echoing the request's txid and ordinal.
    pub fn encode(&self, txid: u32, ordinal: u32) -> Result<Vec<u8>, ControlError> {
        let mut body = Vec::with_capacity(2 + self.body.len());
        body.extend_from_slice(&self.code.to_le_bytes());
        body.extend_from_slice(&self.body);
        encode_control_frame(txid, ordinal, &body)
    }

    /// Decode a response body (code + payload).
    pub fn decode(body: &[u8]) -> Result<Self, ControlError> {
        let code = read_i16(body, 0)?;
        Ok(Self {
            code,
            body: body[2..].to_vec(),
        })
    }
}

/// One interface-info record as returned by `GetIfInfoAt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfInfo {
    pub name: String,
    pub index: u16,
    pub flags: u16,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadaddr: Ipv4Addr,
}

pub fn encode_if_info(info: &IfInfo) -> [u8; IF_INFO_LEN] {
    let mut out = [0u8; IF_INFO_LEN];
    // Leave one byte for the NUL terminator.
    let name = info.name.as_bytes();
    let name = &name[..name.len().min(IFNAME_LEN - 1)];
    out[..name.len()].copy_from_slice(name);
    out[IFNAME_LEN..IFNAME_LEN + 2].copy_from_slice(&info.index.to_le_bytes());
    out[IFNAME_LEN + 2..IFNAME_LEN + 4].copy_from_slice(&info.flags.to_le_bytes());
    for (i, ip) in [info.addr, info.netmask, info.broadaddr].iter().enumerate() {
        let at = IFNAME_LEN + 4 + i * SOCKADDR_IN_LEN;
        let encoded = encode_sockaddr(
            AddressFamily::V4,
            &SocketAddress::v4(*ip, 0),
        );
        out[at..at + SOCKADDR_IN_LEN].copy_from_slice(&encoded);
    }
    out
}

pub fn decode_if_info(buf: &[u8]) -> Result<IfInfo, SockaddrError> {
    if buf.len() < IF_INFO_LEN {
        return Err(SockaddrError::TooShort {
            len: buf.len(),
            min: IF_INFO_LEN,
        });
    }
    let name_end = buf[..IFNAME_LEN]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(IFNAME_LEN);
    let name = String::from_utf8_lossy(&buf[..name_end]).into_owned();
    let index = u16::from_le_bytes([buf[IFNAME_LEN], buf[IFNAME_LEN + 1]]);
    let flags = u16::from_le_bytes([buf[IFNAME_LEN + 2], buf[IFNAME_LEN + 3]]);
    let mut ips = [Ipv4Addr::UNSPECIFIED; 3];
    for (i, ip) in ips.iter_mut().enumerate() {
        let at = IFNAME_LEN + 4 + i * SOCKADDR_IN_LEN;
        let decoded = decode_sockaddr(&buf[at..at + SOCKADDR_IN_LEN])?;
        *ip = match decoded.addr {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => return Err(SockaddrError::UnsupportedFamily { family: AF_INET6 }),
        };
    }
    Ok(IfInfo {
        name,
        index,
        flags,
        addr: ips[0],
        netmask: ips[1],
        broadaddr: ips[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockaddr_v4_layout() {
        let addr = SocketAddress::v4(Ipv4Addr::new(192, 168, 42, 16), 8080);
        let wire = encode_sockaddr(AddressFamily::V4, &addr);
        assert_eq!(wire.len(), SOCKADDR_IN_LEN);
        assert_eq!(&wire[0..2], &AF_INET.to_le_bytes());
        // Port is network order.
        assert_eq!(&wire[2..4], &[0x1f, 0x90]);
        assert_eq!(&wire[4..8], &[192, 168, 42, 16]);
        assert_eq!(decode_sockaddr(&wire).unwrap(), addr);
    }

    #[test]
    fn sockaddr_v6_carries_nic() {
        let addr = SocketAddress::v6(Ipv6Addr::LOCALHOST, 443, 7);
        let wire = encode_sockaddr(AddressFamily::V6, &addr);
        assert_eq!(wire.len(), SOCKADDR_IN6_LEN);
        assert_eq!(decode_sockaddr(&wire).unwrap(), addr);
    }

    #[test]
    fn sockaddr_storage_padding_is_ignored() {
        let addr = SocketAddress::v4(Ipv4Addr::new(10, 0, 0, 1), 53);
        let mut storage = vec![0u8; SOCKADDR_STORAGE_LEN];
        let wire = encode_sockaddr(AddressFamily::V4, &addr);
        storage[..wire.len()].copy_from_slice(&wire);
        assert_eq!(decode_sockaddr(&storage).unwrap(), addr);
    }

    #[test]
    fn sockaddr_rejects_unknown_family() {
        let mut buf = vec![0u8; SOCKADDR_IN_LEN];
        buf[0] = 1; // AF_UNIX
        assert_eq!(
            decode_sockaddr(&buf),
            Err(SockaddrError::UnsupportedFamily { family: 1 })
        );
    }

    #[test]
    fn msg_header_roundtrip() {
        let addr = SocketAddress::v4(Ipv4Addr::new(203, 0, 113, 5), 9999);
        let header = encode_msg_header(Some((AddressFamily::V4, &addr)));
        assert_eq!(decode_msg_header(&header).unwrap(), Some(addr));

        let empty = encode_msg_header(None);
        assert_eq!(decode_msg_header(&empty).unwrap(), None);
    }

    #[test]
    fn msg_header_rejects_oversized_addrlen() {
        let mut header = encode_msg_header(None);
        header[SOCKADDR_STORAGE_LEN..SOCKADDR_STORAGE_LEN + 4]
            .copy_from_slice(&200u32.to_le_bytes());
        assert_eq!(
            decode_msg_header(&header),
            Err(SockaddrError::BadAddrLen { addrlen: 200 })
        );
    }

    #[test]
    fn control_request_roundtrip() {
        let requests = [
            ControlRequest::Connect {
                sockaddr: vec![1, 2, 3],
            },
            ControlRequest::Bind {
                sockaddr: vec![9; SOCKADDR_IN_LEN],
            },
            ControlRequest::Listen { backlog: 16 },
            ControlRequest::Accept { flags: 0 },
            ControlRequest::GetSockOpt { level: 1, name: 2 },
            ControlRequest::SetSockOpt {
                level: 6,
                name: 1,
                value: vec![1, 0, 0, 0],
            },
            ControlRequest::GetSockName,
            ControlRequest::GetPeerName,
            ControlRequest::Ioctl {
                req: IOCTL_GET_NUM_IFS,
                input: vec![],
            },
            ControlRequest::Close,
        ];
        for (i, req) in requests.iter().enumerate() {
            let wire = req.encode(i as u32).unwrap();
            let frame = decode_control_frame(&wire).unwrap();
            assert_eq!(frame.txid, i as u32);
            assert_eq!(frame.ordinal, req.ordinal());
            assert_eq!(&ControlRequest::decode(frame.ordinal, frame.body).unwrap(), req);
        }
    }

    #[test]
    fn control_response_carries_code_and_body() {
        let resp = ControlResponse::ok(vec![4, 0, 0, 0]);
        let wire = resp.encode(3, ORD_GET_SOCK_OPT).unwrap();
        let frame = decode_control_frame(&wire).unwrap();
        assert_eq!(frame.txid, 3);
        assert_eq!(ControlResponse::decode(frame.body).unwrap(), resp);

        let errors = ControlResponse::err(22);
        let wire = errors.encode(4, ORD_CONNECT).unwrap();
        let frame = decode_control_frame(&wire).unwrap();
        assert_eq!(ControlResponse::decode(frame.body).unwrap().code, 22);
    }

    #[test]
    fn control_frame_enforces_max_message() {
        let body = vec![0u8; CONTROL_MAX_MESSAGE];
        assert_eq!(
            encode_control_frame(0, ORD_BIND, &body),
            Err(ControlError::MessageTooLarge {
                len: CONTROL_HEADER_LEN + CONTROL_MAX_MESSAGE,
                max: CONTROL_MAX_MESSAGE,
            })
        );
    }

    #[test]
    fn unknown_ordinal_is_rejected() {
        assert_eq!(
            ControlRequest::decode(99, &[]),
            Err(ControlError::UnknownOrdinal { ordinal: 99 })
        );
    }

    #[test]
    fn if_info_truncates_long_names() {
        let info = IfInfo {
            name: "averyveryverylongdevicename".to_string(),
            index: 1,
            flags: IFF_UP,
            addr: Ipv4Addr::new(192, 168, 1, 2),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            broadaddr: Ipv4Addr::new(192, 168, 1, 255),
        };
        let wire = encode_if_info(&info);
        let decoded = decode_if_info(&wire).unwrap();
        assert_eq!(decoded.name.len(), IFNAME_LEN - 1);
        assert_eq!(decoded.name, "averyveryverylo");
        assert_eq!(decoded.addr, info.addr);
        assert_eq!(decoded.broadaddr, info.broadaddr);
    }
}
