// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The interfaces between the agent and the transport it establishes paths for

use std::collections::BTreeSet;
use std::net::SocketAddr;

use crate::candidate::AgentInfo;
use crate::stun::message::Message;

/// Identifier of a local or remote RTPS entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid(pub [u8; 16]);

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// A local entity and the remote entity it wants to reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuidPair {
    pub local: Guid,
    pub remote: Guid,
}

impl GuidPair {
    pub fn new(local: Guid, remote: Guid) -> Self {
        Self { local, remote }
    }
}

pub type GuidSet = BTreeSet<GuidPair>;

/// A transport socket that ICE selects paths for.
///
/// `send`, `ice_connect` and `ice_disconnect` are called after the agent released its lock.
/// `host_addresses` and `stun_server_address` are queried with the lock held and must not call
/// into the agent.
pub trait Endpoint: Send + Sync {
    /// The local addresses the endpoint is bound to
    fn host_addresses(&self) -> Vec<SocketAddr>;

    /// The STUN server used to discover a server reflexive address, if any
    fn stun_server_address(&self) -> Option<SocketAddr>;

    /// Transmit a STUN message.  Must not block.
    fn send(&self, destination: SocketAddr, message: &Message);

    /// A path to `address` was established for `guids`
    fn ice_connect(&self, guids: &GuidSet, address: SocketAddr);

    /// The path previously announced for `guids` is no longer live
    fn ice_disconnect(&self, guids: &GuidSet);
}

/// Receives the local ICE parameters so they can be propagated through discovery
pub trait AgentInfoListener: Send + Sync {
    fn update_agent_info(&self, local_guid: &Guid, agent_info: &AgentInfo);
}
