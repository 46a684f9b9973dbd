// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Candidates, the agent description exchanged through discovery and candidate pairs

use std::cmp::Ordering;
use std::error::Error;
use std::net::SocketAddr;
use std::str::FromStr;

const LOCAL_PREFERENCE: u32 = 65535;
const COMPONENT_ID: u32 = 1;

/// The PRIORITY sent in every connectivity check: the priority a peer reflexive candidate
/// discovered by the check would have.
pub const PEER_REFLEXIVE_PRIORITY: u32 =
    (110 << 24) + (LOCAL_PREFERENCE << 8) + (256 - COMPONENT_ID);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
}

impl CandidateType {
    fn type_preference(self) -> u32 {
        match self {
            CandidateType::Host => 126,
            CandidateType::PeerReflexive => 110,
            CandidateType::ServerReflexive => 100,
        }
    }
}

#[derive(Debug)]
pub enum ParseCandidateTypeError {
    UnknownCandidateType,
}

impl Error for ParseCandidateTypeError {}

impl std::fmt::Display for ParseCandidateTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.pad(&format!("{:?}", self))
    }
}

impl FromStr for CandidateType {
    type Err = ParseCandidateTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(CandidateType::Host),
            "srflx" => Ok(CandidateType::ServerReflexive),
            "prflx" => Ok(CandidateType::PeerReflexive),
            _ => Err(ParseCandidateTypeError::UnknownCandidateType),
        }
    }
}

impl std::fmt::Display for CandidateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match &self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
        })
    }
}

/// One transport address an agent may be reachable at
#[derive(Debug, Clone)]
pub struct Candidate {
    pub address: SocketAddr,
    pub base: SocketAddr,
    pub foundation: String,
    pub priority: u32,
    pub candidate_type: CandidateType,
}

// the base is a local detail and does not take part in comparisons across agents
impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.foundation == other.foundation
            && self.priority == other.priority
            && self.candidate_type == other.candidate_type
    }
}

impl Eq for Candidate {}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} base {} priority {}",
            self.foundation, self.candidate_type, self.address, self.base, self.priority
        )
    }
}

fn calculate_priority(ctype: CandidateType) -> u32 {
    ((1 << 24) * ctype.type_preference()) + ((1 << 8) * LOCAL_PREFERENCE) + 256 - COMPONENT_ID
}

/// Produce a host candidate for a local interface address
///
/// # Examples
///
/// ```
/// # use rtps_ice::candidate::*;
/// let candidate = make_host_candidate("192.168.1.10:7400".parse().unwrap());
/// assert_eq!(candidate.foundation, "H192.168.1.10U");
/// assert_eq!(candidate.priority, (126 << 24) + (65535 << 8) + 255);
/// ```
pub fn make_host_candidate(address: SocketAddr) -> Candidate {
    Candidate {
        address,
        base: address,
        foundation: format!("H{}U", address.ip()),
        priority: calculate_priority(CandidateType::Host),
        candidate_type: CandidateType::Host,
    }
}

/// Produce a server reflexive candidate: `address` was reported by the STUN server at
/// `server_address` for packets sent from `base`
pub fn make_server_reflexive_candidate(
    address: SocketAddr,
    base: SocketAddr,
    server_address: SocketAddr,
) -> Candidate {
    Candidate {
        address,
        base,
        foundation: format!("S{}_{}U", base.ip(), server_address.ip()),
        priority: calculate_priority(CandidateType::ServerReflexive),
        candidate_type: CandidateType::ServerReflexive,
    }
}

/// Produce a local peer reflexive candidate learnt from the mapped address of a connectivity
/// check response
pub fn make_peer_reflexive_candidate(
    address: SocketAddr,
    base: SocketAddr,
    server_address: SocketAddr,
    priority: u32,
) -> Candidate {
    Candidate {
        address,
        base,
        foundation: format!("P{}_{}U", base.ip(), server_address.ip()),
        priority,
        candidate_type: CandidateType::PeerReflexive,
    }
}

/// Produce a remote peer reflexive candidate for a request arriving from an unknown address
pub fn make_remote_peer_reflexive_candidate(
    address: SocketAddr,
    priority: u32,
    counter: usize,
) -> Candidate {
    Candidate {
        address,
        base: address,
        foundation: format!("Q{}U", counter),
        priority,
        candidate_type: CandidateType::PeerReflexive,
    }
}

/// Order by address, then base, then descending priority
pub fn candidates_sorted(a: &Candidate, b: &Candidate) -> Ordering {
    a.address
        .cmp(&b.address)
        .then_with(|| a.base.cmp(&b.base))
        .then_with(|| b.priority.cmp(&a.priority))
}

/// Candidates describing the same address from the same base are redundant
pub fn candidates_equal(a: &Candidate, b: &Candidate) -> bool {
    a.address == b.address && a.base == b.base
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentType {
    Full,
    Lite,
}

impl Default for AgentType {
    fn default() -> Self {
        AgentType::Full
    }
}

/// The ICE parameters of one agent as propagated through discovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentInfo {
    pub username: String,
    pub password: String,
    pub candidates: Vec<Candidate>,
    pub agent_type: AgentType,
}

impl AgentInfo {
    /// Sort the candidates and drop redundant ones, keeping the highest priority of each
    pub fn normalize_candidates(&mut self) {
        self.candidates.sort_by(candidates_sorted);
        self.candidates.dedup_by(|b, a| candidates_equal(a, b));
    }

    pub(crate) fn candidate_by_address(&self, address: SocketAddr) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.address == address)
    }
}

pub type FoundationType = (String, String);

/// A local and remote candidate that may be able to exchange packets
#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub local: Candidate,
    pub remote: Candidate,
    pub foundation: FoundationType,
    pub local_is_controlling: bool,
    pub priority: u64,
    pub use_candidate: bool,
}

impl PartialEq for CandidatePair {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local
            && self.remote == other.remote
            && self.use_candidate == other.use_candidate
    }
}

impl Eq for CandidatePair {}

impl std::fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} priority {}{}",
            self.local.address,
            self.remote.address,
            self.priority,
            if self.use_candidate {
                " use-candidate"
            } else {
                ""
            }
        )
    }
}

impl CandidatePair {
    pub fn new(
        local: Candidate,
        remote: Candidate,
        local_is_controlling: bool,
        use_candidate: bool,
    ) -> Self {
        let foundation = (local.foundation.clone(), remote.foundation.clone());
        let priority = CandidatePair::compute_priority(&local, &remote, local_is_controlling);
        Self {
            local,
            remote,
            foundation,
            local_is_controlling,
            priority,
            use_candidate,
        }
    }

    /// RFC 8445 6.1.2.3: `2^32 * MIN(G,D) + 2 * MAX(G,D) + (G>D?1:0)` where G is the
    /// controlling agent's candidate priority and D the controlled agent's
    ///
    /// # Examples
    ///
    /// ```
    /// # use rtps_ice::candidate::*;
    /// let a = make_host_candidate("10.0.0.1:7400".parse().unwrap());
    /// let b = make_server_reflexive_candidate(
    ///     "1.2.3.4:7400".parse().unwrap(),
    ///     "10.0.0.2:7400".parse().unwrap(),
    ///     "5.6.7.8:3478".parse().unwrap(),
    /// );
    /// assert_eq!(
    ///     CandidatePair::compute_priority(&a, &b, true),
    ///     CandidatePair::compute_priority(&b, &a, false)
    /// );
    /// ```
    pub fn compute_priority(local: &Candidate, remote: &Candidate, local_is_controlling: bool) -> u64 {
        let (g, d) = if local_is_controlling {
            (local.priority as u64, remote.priority as u64)
        } else {
            (remote.priority as u64, local.priority as u64)
        };
        (g.min(d) << 32) + 2 * g.max(d) + if g > d { 1 } else { 0 }
    }

    pub(crate) fn can_pair(local: &Candidate, remote: &Candidate) -> bool {
        local.address.is_ipv4() == remote.address.is_ipv4()
    }
}

/// Higher priority pairs first
pub fn candidate_pairs_sorted(a: &CandidatePair, b: &CandidatePair) -> Ordering {
    b.priority.cmp(&a.priority)
}
