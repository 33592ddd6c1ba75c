//! Control-channel service loop and the socket control operations.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use sockbridge_wire as wire;

use crate::endpoint::TransportError;
use crate::errno::transport_error_code;
use crate::iostate::{spawn_socket_inner, IoState};
use crate::pipe::{PipeError, Signals};
use crate::waiter::Readiness;

/// Snapshot taken by the last `GetNumIfs`, indexed by `GetIfInfoAt`.
/// Process-wide, last snapshot wins: `GetIfInfoAt` must not observe an
/// interface list that changed after the count was returned.
static LAST_IF_INFO: Mutex<Option<Vec<wire::IfInfo>>> = Mutex::new(None);

/// Serve control messages until the channel dies, then tear the socket down
/// and release the pipe handle.
pub(crate) async fn loop_control(ios: &Arc<IoState>) -> anyhow::Result<()> {
    let result = serve(ios).await;

    let code = ios.close().await;
    if code != 0 {
        tracing::warn!(code, "close failed");
    }
    ios.data.close();
    result
}

async fn serve(ios: &Arc<IoState>) -> anyhow::Result<()> {
    const SIGS: Signals = Signals::CONTROL_READABLE
        .union(Signals::PEER_CLOSED)
        .union(Signals::CLOSING);
    loop {
        let msg = match ios.data.read_control() {
            Ok(msg) => msg,
            Err(PipeError::BadState)
            | Err(PipeError::PeerClosed)
            | Err(PipeError::BadHandle) => return Ok(()),
            Err(PipeError::ShouldWait) => {
                let observed = match ios.data.wait(SIGS).await {
                    Ok(observed) => observed,
                    Err(_) => return Ok(()),
                };
                if observed.contains(Signals::CONTROL_READABLE) {
                    continue;
                }
                // CLOSING or PEER_CLOSED.
                return Ok(());
            }
        };

        // A malformed message is a protocol error and kills the channel.
        let frame = wire::decode_control_frame(&msg).context("control frame")?;
        let request =
            wire::ControlRequest::decode(frame.ordinal, frame.body).context("control request")?;
        let response = dispatch(ios, request).await?;
        let out = response
            .encode(frame.txid, frame.ordinal)
            .context("control response")?;

        loop {
            match ios.data.write_control(&out) {
                Ok(()) => break,
                Err(PipeError::BadState)
                | Err(PipeError::PeerClosed)
                | Err(PipeError::BadHandle) => return Ok(()),
                Err(PipeError::ShouldWait) => {
                    let observed = match ios.data.wait(SIGS).await {
                        Ok(observed) => observed,
                        Err(_) => return Ok(()),
                    };
                    if observed.contains(Signals::CONTROL_READABLE) {
                        // Backpressured by unread responses; the readable bit
                        // stays level-asserted, so yield before retrying.
                        tokio::task::yield_now().await;
                        continue;
                    }
                    return Ok(());
                }
            }
        }
    }
}

async fn dispatch(
    ios: &Arc<IoState>,
    request: wire::ControlRequest,
) -> anyhow::Result<wire::ControlResponse> {
    use wire::ControlRequest as Req;
    Ok(match request {
        Req::Connect { sockaddr } => op_connect(ios, &sockaddr),
        Req::Bind { sockaddr } => op_bind(ios, &sockaddr),
        Req::Listen { backlog } => reply(ios.ep.listen(backlog)),
        Req::Accept { flags } => op_accept(ios, flags),
        Req::GetSockOpt { level, name } => match ios.ep.get_sock_opt(level, name) {
            Ok(value) => wire::ControlResponse::ok(value.to_le_bytes()),
            Err(err) => wire::ControlResponse::err(transport_error_code(err)),
        },
        Req::SetSockOpt { level, name, value } => {
            reply(ios.ep.set_sock_opt(level, name, &value))
        }
        Req::GetSockName => match ios.ep.local_addr() {
            Ok(addr) => {
                wire::ControlResponse::ok(wire::encode_sockaddr(ios.net_proto.family(), &addr))
            }
            Err(err) => wire::ControlResponse::err(transport_error_code(err)),
        },
        Req::GetPeerName => match ios.ep.remote_addr() {
            Ok(addr) => {
                wire::ControlResponse::ok(wire::encode_sockaddr(ios.net_proto.family(), &addr))
            }
            Err(err) => wire::ControlResponse::err(transport_error_code(err)),
        },
        Req::Ioctl { req, input } => op_ioctl(ios, req, &input)?,
        Req::Close => {
            let code = ios.close().await;
            wire::ControlResponse {
                code,
                body: Vec::new(),
            }
        }
    })
}

fn reply(result: Result<(), TransportError>) -> wire::ControlResponse {
    match result {
        Ok(()) => wire::ControlResponse::ok(Vec::new()),
        Err(err) => wire::ControlResponse::err(transport_error_code(err)),
    }
}

fn op_connect(ios: &IoState, sockaddr: &[u8]) -> wire::ControlResponse {
    let addr = match wire::decode_sockaddr(sockaddr) {
        Ok(addr) => addr,
        Err(_) => {
            return wire::ControlResponse::err(transport_error_code(TransportError::BadAddress))
        }
    };
    reply(ios.ep.connect(addr))
}

fn op_bind(ios: &IoState, sockaddr: &[u8]) -> wire::ControlResponse {
    let addr = match wire::decode_sockaddr(sockaddr) {
        Ok(addr) => addr,
        Err(_) => {
            return wire::ControlResponse::err(transport_error_code(TransportError::BadAddress))
        }
    };
    reply(ios.ep.bind(addr))
}

fn op_accept(ios: &Arc<IoState>, _flags: i16) -> wire::ControlResponse {
    let accepted = ios.ep.accept();

    // Clear INCOMING before inspecting the error, or a drained queue would
    // leave the signal stuck. The mutex keeps a racing connection from
    // changing readiness while we clear.
    {
        let _guard = ios.incoming_asserted.lock().unwrap();
        if ios.ep.readiness(Readiness::IN).is_empty() {
            match ios.data.signal_peer(Signals::INCOMING, Signals::empty()) {
                Ok(()) | Err(PipeError::BadHandle) | Err(PipeError::PeerClosed) => {}
                Err(err) => unreachable!("signal_peer: {err}"),
            }
        }
    }

    let ep = match accepted {
        Ok(ep) => ep,
        Err(err) => return wire::ControlResponse::err(transport_error_code(err)),
    };
    let peer = spawn_socket_inner(
        ios.ns.clone(),
        ios.net_proto,
        ios.trans_proto,
        ep,
        true,
    );
    match ios.data.share(peer) {
        Ok(()) => wire::ControlResponse::ok(Vec::new()),
        // No transfer facility on this pipe.
        Err(PipeError::BadState) => {
            wire::ControlResponse::err(transport_error_code(TransportError::NotSupported))
        }
        // The client went away mid-accept; the loops are on their way out.
        Err(PipeError::BadHandle) | Err(PipeError::PeerClosed) => {
            wire::ControlResponse::ok(Vec::new())
        }
        Err(err) => unreachable!("share: {err}"),
    }
}

fn op_ioctl(ios: &IoState, req: i16, input: &[u8]) -> anyhow::Result<wire::ControlResponse> {
    match req {
        wire::IOCTL_GET_NUM_IFS => {
            let infos = ios.ns.build_if_infos();
            let count = infos.len() as u32;
            *LAST_IF_INFO.lock().unwrap() = Some(infos);
            Ok(wire::ControlResponse::ok(count.to_le_bytes().to_vec()))
        }
        wire::IOCTL_GET_IF_INFO_AT => {
            let snapshot = LAST_IF_INFO.lock().unwrap();
            let Some(infos) = snapshot.as_ref() else {
                tracing::warn!("GetIfInfoAt called before GetNumIfs");
                return Ok(wire::ControlResponse::err(transport_error_code(
                    TransportError::InvalidEndpointState,
                )));
            };
            let raw: [u8; 4] = match input.try_into() {
                Ok(raw) => raw,
                Err(_) => {
                    tracing::warn!(len = input.len(), "GetIfInfoAt: bad input length");
                    return Ok(wire::ControlResponse::err(transport_error_code(
                        TransportError::InvalidOptionValue,
                    )));
                }
            };
            let index = u32::from_le_bytes(raw);
            let Some(info) = infos.get(index as usize) else {
                tracing::warn!(index, total = infos.len(), "GetIfInfoAt: index out of range");
                return Ok(wire::ControlResponse::err(transport_error_code(
                    TransportError::InvalidOptionValue,
                )));
            };
            Ok(wire::ControlResponse::ok(wire::encode_if_info(info).to_vec()))
        }
        wire::IOCTL_GET_NODENAME => {
            let mut body = ios.ns.node_name().as_bytes().to_vec();
            body.push(0);
            Ok(wire::ControlResponse::ok(body))
        }
        req => anyhow::bail!("unrecognized ioctl request {req:#x}"),
    }
}
