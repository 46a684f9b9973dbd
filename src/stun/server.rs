// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A minimal STUN server answering binding requests so agents can learn their server reflexive
//! address

use std::net::SocketAddr;

use async_std::net::UdpSocket;
use tracing_futures::Instrument;

use crate::agent::AgentError;
use crate::stun::attribute::*;
use crate::stun::message::*;
use crate::stun::StunError;

fn error_response(
    msg: &Message,
    code: u16,
    reason: &str,
    unknown_attributes: &[AttributeType],
) -> Result<Message, StunError> {
    let mut out = Message::new_error(msg);
    out.add_attribute(ErrorCode::new(code, reason)?.into())?;
    if !unknown_attributes.is_empty() {
        out.add_attribute(UnknownAttributes::new(unknown_attributes).into())?;
    }
    out.add_fingerprint()?;
    Ok(out)
}

/// The reply to `msg` received from `from`.  Only requests are answered.
///
/// # Examples
///
/// ```
/// # use rtps_ice::stun::message::BINDING;
/// # use rtps_ice::stun::message::{Message, MessageClass};
/// # use rtps_ice::stun::server::handle_message;
/// let from = "1.2.3.4:7400".parse().unwrap();
/// let request = Message::new_request(BINDING);
/// let response = handle_message(&request, from).unwrap().unwrap();
/// assert_eq!(response.class(), MessageClass::Success);
/// assert_eq!(response.mapped_address(), Some(from));
///
/// let indication = Message::new_indication(BINDING);
/// assert!(handle_message(&indication, from).unwrap().is_none());
/// ```
pub fn handle_message(msg: &Message, from: SocketAddr) -> Result<Option<Message>, StunError> {
    if msg.class() != MessageClass::Request {
        trace!("ignoring {:?} from {}", msg.class(), from);
        return Ok(None);
    }

    if !msg.has_method(BINDING) {
        return error_response(msg, BAD_REQUEST, "Bad Request: Unknown method", &[]).map(Some);
    }

    let unknown = msg.unknown_comprehension_required_attributes();
    if !unknown.is_empty() {
        debug!("request from {} has unknown attributes {:?}", from, unknown);
        return error_response(msg, UNKNOWN_ATTRIBUTE, "Unknown Attributes", &unknown).map(Some);
    }

    let mut response = Message::new_success(msg);
    response.add_attribute(XorMappedAddress::new(from, msg.transaction_id()).into())?;
    response.add_fingerprint()?;
    Ok(Some(response))
}

async fn serve_loop(socket: &UdpSocket) -> Result<(), AgentError> {
    let mut buf = vec![0; 1500];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        let msg = match Message::from_bytes(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                trace!("ignoring {} bytes from {}: {}", len, from, e);
                continue;
            }
        };
        match handle_message(&msg, from) {
            Ok(Some(response)) => {
                trace!("replying to {} with {:?}", from, response.class());
                socket.send_to(&response.to_bytes(), from).await?;
            }
            Ok(None) => (),
            Err(e) => warn!("failed to build response for {}: {}", from, e),
        }
    }
}

/// Answer binding requests arriving on `socket` until it fails
pub async fn serve(socket: UdpSocket) -> Result<(), AgentError> {
    let addr = socket.local_addr()?;
    info!("starting STUN server on {}", addr);
    let ret = serve_loop(&socket)
        .instrument(debug_span!("stund", %addr))
        .await;
    debug!("stopping STUN server on {}: {:?}", addr, ret);
    ret
}
