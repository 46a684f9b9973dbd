// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per endpoint ICE state: local credentials and candidates, STUN demultiplexing and server
//! reflexive discovery

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Instant;

use rand::{thread_rng, Rng};

use crate::agent::{ActiveFoundationSet, AgentState};
use crate::candidate::*;
use crate::conncheck::{CheckContext, Checklist, ChecklistId};
use crate::endpoint::{AgentInfoListener, Endpoint, Guid, GuidPair, GuidSet};
use crate::stun::attribute::*;
use crate::stun::message::*;
use crate::stun::StunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub(crate) usize);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Side effects produced while the agent lock is held and performed after it is released
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) enum EndpointEvent {
    Send(SocketAddr, Message),
    Connect(GuidSet, SocketAddr),
    Disconnect(GuidSet),
    AgentInfo(
        #[derivative(Debug = "ignore")] Vec<(Guid, Weak<dyn AgentInfoListener>)>,
        AgentInfo,
    ),
}

/// Lookup tables from inbound STUN messages and GUID pairs to the responsible checklist
#[derive(Debug, Default)]
pub(crate) struct Routes {
    username_to_checklist: BTreeMap<String, ChecklistId>,
    transaction_to_checklist: HashMap<TransactionId, ChecklistId>,
    guid_pair_to_checklist: BTreeMap<GuidPair, ChecklistId>,
}

impl Routes {
    pub(crate) fn set_username(&mut self, username: &str, checklist: ChecklistId) {
        self.username_to_checklist
            .insert(username.to_owned(), checklist);
    }

    /// Only removes the entry while it still points at `checklist`
    pub(crate) fn unset_username(&mut self, username: &str, checklist: ChecklistId) {
        if self.username_to_checklist.get(username) == Some(&checklist) {
            self.username_to_checklist.remove(username);
        }
    }

    pub(crate) fn checklist_for_username(&self, username: &str) -> Option<ChecklistId> {
        self.username_to_checklist.get(username).copied()
    }

    pub(crate) fn set_transaction(&mut self, transaction: TransactionId, checklist: ChecklistId) {
        self.transaction_to_checklist.insert(transaction, checklist);
    }

    pub(crate) fn unset_transaction(&mut self, transaction: TransactionId, checklist: ChecklistId) {
        if self.transaction_to_checklist.get(&transaction) == Some(&checklist) {
            self.transaction_to_checklist.remove(&transaction);
        }
    }

    pub(crate) fn checklist_for_transaction(&self, transaction: TransactionId) -> Option<ChecklistId> {
        self.transaction_to_checklist.get(&transaction).copied()
    }

    pub(crate) fn set_guid_pair(&mut self, guid_pair: GuidPair, checklist: ChecklistId) {
        self.guid_pair_to_checklist.insert(guid_pair, checklist);
    }

    pub(crate) fn unset_guid_pair(&mut self, guid_pair: GuidPair, checklist: ChecklistId) {
        if self.guid_pair_to_checklist.get(&guid_pair) == Some(&checklist) {
            self.guid_pair_to_checklist.remove(&guid_pair);
        }
    }

    pub(crate) fn checklist_for_guid_pair(&self, guid_pair: GuidPair) -> Option<ChecklistId> {
        self.guid_pair_to_checklist.get(&guid_pair).copied()
    }

    fn username_checklists(&self) -> Vec<ChecklistId> {
        self.username_to_checklist.values().copied().collect()
    }
}

/// A binding request that arrived before the checklist for its remote agent existed
#[derive(Debug, Clone)]
struct DeferredTriggeredCheck {
    local_address: SocketAddr,
    remote_address: SocketAddr,
    priority: u32,
    use_candidate: bool,
    expiration_date: Instant,
}

macro_rules! context {
    ($self:ident, $state:expr, $events:expr, $now:expr) => {
        CheckContext {
            now: $now,
            endpoint: $self.id,
            state: &mut *$state,
            routes: &mut $self.routes,
            events: &mut *$events,
        }
    };
}

fn random_credential() -> String {
    let bytes: [u8; 16] = thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct EndpointManager {
    id: EndpointId,
    #[derivative(Debug = "ignore")]
    endpoint: Arc<dyn Endpoint>,
    agent_info: AgentInfo,
    ice_tie_breaker: u64,
    host_addresses: Vec<SocketAddr>,
    server_reflexive_address: Option<SocketAddr>,
    stun_server_address: Option<SocketAddr>,
    next_stun_server_address: Option<SocketAddr>,
    binding_request: Option<TransactionId>,
    requesting: bool,
    send_count: usize,
    checklists: BTreeMap<ChecklistId, Checklist>,
    next_checklist_id: usize,
    routes: Routes,
    deferred_triggered_checks: BTreeMap<String, VecDeque<DeferredTriggeredCheck>>,
    #[derivative(Debug = "ignore")]
    agent_info_listeners: BTreeMap<Guid, Weak<dyn AgentInfoListener>>,
}

impl EndpointManager {
    pub(crate) fn new(
        id: EndpointId,
        endpoint: Arc<dyn Endpoint>,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) -> Self {
        let mut manager = Self {
            id,
            endpoint,
            agent_info: AgentInfo {
                agent_type: AgentType::Full,
                ..Default::default()
            },
            ice_tie_breaker: thread_rng().gen(),
            host_addresses: vec![],
            server_reflexive_address: None,
            stun_server_address: None,
            next_stun_server_address: None,
            binding_request: None,
            requesting: true,
            send_count: 0,
            checklists: BTreeMap::new(),
            next_checklist_id: 0,
            routes: Routes::default(),
            deferred_triggered_checks: BTreeMap::new(),
            agent_info_listeners: BTreeMap::new(),
        };
        manager.change_username(state, events, now);
        let host_addresses = manager.endpoint.host_addresses();
        manager.set_host_addresses(host_addresses, state, events, now);
        manager
    }

    pub(crate) fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }

    pub(crate) fn agent_info(&self) -> &AgentInfo {
        &self.agent_info
    }

    pub(crate) fn add_agent_info_listener(&mut self, guid: Guid, listener: Weak<dyn AgentInfoListener>) {
        self.agent_info_listeners.insert(guid, listener);
    }

    pub(crate) fn remove_agent_info_listener(&mut self, guid: &Guid) -> bool {
        self.agent_info_listeners.remove(guid).is_some()
    }

    fn change_username(&mut self, state: &mut AgentState, events: &mut Vec<EndpointEvent>, now: Instant) {
        self.agent_info.username = random_credential();
        debug!("endpoint {} new username {}", self.id, self.agent_info.username);
        self.change_password(false, state, events, now);
    }

    fn change_password(
        &mut self,
        password_only: bool,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        self.agent_info.password = random_credential();
        self.regenerate_agent_info(password_only, state, events, now);
    }

    /// RFC 8445 5.1.1.1: loopback addresses are never candidates
    fn set_host_addresses(
        &mut self,
        addresses: Vec<SocketAddr>,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        let host_addresses: Vec<SocketAddr> = addresses
            .into_iter()
            .filter(|addr| !addr.ip().is_loopback())
            .collect();

        if self.host_addresses != host_addresses {
            debug!("endpoint {} host addresses {:?}", self.id, host_addresses);
            self.host_addresses = host_addresses;
            self.regenerate_agent_info(false, state, events, now);
        }
    }

    fn set_server_reflexive_address(
        &mut self,
        server_reflexive_address: Option<SocketAddr>,
        stun_server_address: Option<SocketAddr>,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        if self.server_reflexive_address != server_reflexive_address
            || self.stun_server_address != stun_server_address
        {
            info!(
                "endpoint {} server reflexive address {:?} from {:?}",
                self.id, server_reflexive_address, stun_server_address
            );
            self.server_reflexive_address = server_reflexive_address;
            self.stun_server_address = stun_server_address;
            self.regenerate_agent_info(false, state, events, now);
        }
    }

    fn regenerate_agent_info(
        &mut self,
        password_only: bool,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        if !password_only {
            let mut candidates = vec![];
            for host_address in &self.host_addresses {
                candidates.push(make_host_candidate(*host_address));
                if let (Some(server_reflexive_address), Some(stun_server_address)) =
                    (self.server_reflexive_address, self.stun_server_address)
                {
                    candidates.push(make_server_reflexive_candidate(
                        server_reflexive_address,
                        *host_address,
                        stun_server_address,
                    ));
                }
            }
            self.agent_info.candidates = candidates;
            self.agent_info.normalize_candidates();

            // start over against the new local agent info
            for old in self.routes.username_checklists() {
                let (remote_agent_info, guids) = {
                    let mut ctx = context!(self, state, events, now);
                    let Some(checklist) = self.checklists.get_mut(&old) else {
                        continue;
                    };
                    let remote_agent_info = checklist.original_remote_agent_info().clone();
                    (remote_agent_info, checklist.remove_guids(&mut ctx))
                };
                let new = self.create_checklist(remote_agent_info, state, events, now);
                let mut ctx = context!(self, state, events, now);
                if let Some(checklist) = self.checklists.get_mut(&new) {
                    checklist.add_guids(&guids, &mut ctx);
                }
            }
        }

        let listeners = self
            .agent_info_listeners
            .iter()
            .map(|(guid, listener)| (*guid, listener.clone()))
            .collect();
        events.push(EndpointEvent::AgentInfo(listeners, self.agent_info.clone()));
    }

    fn create_checklist(
        &mut self,
        remote_agent_info: AgentInfo,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) -> ChecklistId {
        let id = ChecklistId(self.next_checklist_id);
        self.next_checklist_id += 1;
        let remote_username = remote_agent_info.username.clone();

        let mut ctx = context!(self, state, events, now);
        let mut checklist = Checklist::new(
            id,
            self.agent_info.clone(),
            remote_agent_info,
            self.ice_tie_breaker,
            &mut ctx,
        );
        debug!(
            "endpoint {} created checklist {} for {}",
            self.id, id, remote_username
        );

        // before unfreezing in case one of them is nominating
        if let Some(deferred) = self.deferred_triggered_checks.remove(&remote_username) {
            for check in deferred {
                checklist.generate_triggered_check(
                    check.local_address,
                    check.remote_address,
                    check.priority,
                    check.use_candidate,
                    &mut ctx,
                );
            }
        }

        checklist.unfreeze(&mut ctx);
        self.checklists.insert(id, checklist);
        id
    }

    pub(crate) fn start_ice(
        &mut self,
        guid_pair: GuidPair,
        remote_agent_info: &AgentInfo,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        if remote_agent_info.username == self.agent_info.username {
            warn!("endpoint {} username collision", self.id);
            self.change_username(state, events, now);
        }

        let guid_checklist = self.routes.checklist_for_guid_pair(guid_pair);
        let username_checklist = match self
            .routes
            .checklist_for_username(&remote_agent_info.username)
        {
            Some(id) => id,
            None => self.create_checklist(remote_agent_info.clone(), state, events, now),
        };

        if guid_checklist != Some(username_checklist) {
            let mut ctx = context!(self, state, events, now);
            if let Some(checklist) = guid_checklist.and_then(|id| self.checklists.get_mut(&id)) {
                checklist.remove_guid(guid_pair, &mut ctx);
            }
            if let Some(checklist) = self.checklists.get_mut(&username_checklist) {
                checklist.add_guid(guid_pair, &mut ctx);
            }
        }

        let Some(checklist) = self.checklists.get_mut(&username_checklist) else {
            return;
        };
        let mut old_remote_agent_info = checklist.original_remote_agent_info().clone();
        if old_remote_agent_info == *remote_agent_info {
            return;
        }

        old_remote_agent_info.password = remote_agent_info.password.clone();
        if old_remote_agent_info == *remote_agent_info {
            debug!(
                "endpoint {} remote {} changed password",
                self.id, remote_agent_info.username
            );
            checklist.set_remote_password(&remote_agent_info.password);
            return;
        }

        // the remote agent changed its info without changing its username
        let guids = {
            let mut ctx = context!(self, state, events, now);
            match self.checklists.get_mut(&username_checklist) {
                Some(checklist) => checklist.remove_guids(&mut ctx),
                None => return,
            }
        };
        let new = self.create_checklist(remote_agent_info.clone(), state, events, now);
        let mut ctx = context!(self, state, events, now);
        if let Some(checklist) = self.checklists.get_mut(&new) {
            checklist.add_guids(&guids, &mut ctx);
        }
    }

    pub(crate) fn stop_ice(
        &mut self,
        guid_pair: GuidPair,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        let Some(id) = self.routes.checklist_for_guid_pair(guid_pair) else {
            return;
        };
        let mut ctx = context!(self, state, events, now);
        if let Some(checklist) = self.checklists.get_mut(&id) {
            checklist.remove_guid(guid_pair, &mut ctx);
        }
    }

    pub(crate) fn get_address(&self, guid_pair: GuidPair) -> Option<SocketAddr> {
        self.routes
            .checklist_for_guid_pair(guid_pair)
            .and_then(|id| self.checklists.get(&id))
            .and_then(|checklist| checklist.selected_address())
    }

    pub(crate) fn receive(
        &mut self,
        local_address: SocketAddr,
        remote_address: SocketAddr,
        msg: &Message,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        match msg.class() {
            MessageClass::Request => {
                self.request(local_address, remote_address, msg, state, events, now)
            }
            MessageClass::Indication => self.indication(msg, now),
            MessageClass::Success => {
                self.success_response(local_address, remote_address, msg, state, events, now)
            }
            MessageClass::Error => {
                self.error_response(local_address, remote_address, msg, state, events, now)
            }
        }
    }

    fn make_error_response(
        &self,
        msg: &Message,
        code: u16,
        reason: &str,
        unknown_attributes: &[AttributeType],
    ) -> Result<Message, StunError> {
        let mut response = Message::new_error(msg);
        response.add_attribute(ErrorCode::new(code, reason)?.into())?;
        if !unknown_attributes.is_empty() {
            response.add_attribute(UnknownAttributes::new(unknown_attributes).into())?;
        }
        response.add_message_integrity(&self.agent_info.password)?;
        response.add_fingerprint()?;
        Ok(response)
    }

    fn send_error(
        &self,
        destination: SocketAddr,
        msg: &Message,
        code: u16,
        reason: &str,
        events: &mut Vec<EndpointEvent>,
    ) {
        self.send_error_with_unknown(destination, msg, code, reason, &[], events)
    }

    fn send_error_with_unknown(
        &self,
        destination: SocketAddr,
        msg: &Message,
        code: u16,
        reason: &str,
        unknown_attributes: &[AttributeType],
        events: &mut Vec<EndpointEvent>,
    ) {
        match self.make_error_response(msg, code, reason, unknown_attributes) {
            Ok(response) => events.push(EndpointEvent::Send(destination, response)),
            Err(e) => warn!("endpoint {} failed to build error response: {}", self.id, e),
        }
    }

    fn make_success_response(
        &self,
        msg: &Message,
        remote_address: SocketAddr,
    ) -> Result<Message, StunError> {
        let mut response = Message::new_success(msg);
        response.add_attribute(MappedAddress::new(remote_address).into())?;
        response.add_attribute(XorMappedAddress::new(remote_address, msg.transaction_id()).into())?;
        response.add_message_integrity(&self.agent_info.password)?;
        response.add_fingerprint()?;
        Ok(response)
    }

    /// Common authentication of requests and indications.  Returns the remote username.
    fn authenticate(&self, msg: &Message) -> Result<String, (u16, &'static str)> {
        let username = msg
            .username()
            .ok_or((BAD_REQUEST, "Bad Request: USERNAME must be present"))?;
        if !msg.has_message_integrity() {
            return Err((BAD_REQUEST, "Bad Request: MESSAGE_INTEGRITY must be present"));
        }
        let (local_username, remote_username) = username
            .split_once(':')
            .ok_or((BAD_REQUEST, "Bad Request: USERNAME must be colon-separated"))?;
        if local_username != self.agent_info.username {
            return Err((UNAUTHORIZED, "Unauthorized"));
        }
        if msg.validate_integrity(&self.agent_info.password).is_err() {
            return Err((UNAUTHORIZED, "Unauthorized"));
        }
        Ok(remote_username.to_owned())
    }

    // RFC 8445 7.3
    fn request(
        &mut self,
        local_address: SocketAddr,
        remote_address: SocketAddr,
        msg: &Message,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        let remote_username = match self.authenticate(msg) {
            Ok(remote_username) => remote_username,
            Err((code, reason)) => {
                // unauthorized requests are expected while credentials propagate
                if code == UNAUTHORIZED {
                    trace!("endpoint {} unauthorized request from {}", self.id, remote_address);
                } else {
                    warn!("endpoint {} request from {}: {}", self.id, remote_address, reason);
                }
                self.send_error(remote_address, msg, code, reason, events);
                return;
            }
        };

        let unknown_attributes = msg.unknown_comprehension_required_attributes();
        if !unknown_attributes.is_empty() {
            warn!(
                "endpoint {} request with unknown comprehension required attributes {:?}",
                self.id, unknown_attributes
            );
            self.send_error_with_unknown(
                remote_address,
                msg,
                UNKNOWN_ATTRIBUTE,
                "Unknown Attributes",
                &unknown_attributes,
                events,
            );
            return;
        }

        let checks: [(bool, &str); 5] = [
            (
                !msg.has_fingerprint(),
                "Bad Request: FINGERPRINT must be present",
            ),
            (
                msg.ice_controlled().is_none() && msg.ice_controlling().is_none(),
                "Bad Request: Either ICE_CONTROLLED or ICE_CONTROLLING must be present",
            ),
            (
                msg.ice_controlled().is_some() && msg.ice_controlling().is_some(),
                "Bad Request: Only one of ICE_CONTROLLED or ICE_CONTROLLING may be present",
            ),
            (
                msg.use_candidate() && msg.ice_controlled().is_some(),
                "Bad Request: USE_CANDIDATE can only be present when ICE_CONTROLLING is present",
            ),
            (
                msg.priority().is_none(),
                "Bad Request: PRIORITY must be present",
            ),
        ];
        if let Some((_, reason)) = checks.iter().find(|(failed, _)| *failed) {
            warn!("endpoint {} request from {}: {}", self.id, remote_address, reason);
            self.send_error(remote_address, msg, BAD_REQUEST, reason, events);
            return;
        }
        let priority = msg.priority().unwrap_or(PEER_REFLEXIVE_PRIORITY);
        let use_candidate = msg.use_candidate();

        if !msg.has_method(BINDING) {
            warn!("endpoint {} request with unknown method {}", self.id, msg.method());
            self.send_error(remote_address, msg, BAD_REQUEST, "Bad Request: Unknown method", events);
            return;
        }

        match self.make_success_response(msg, remote_address) {
            Ok(response) => events.push(EndpointEvent::Send(remote_address, response)),
            Err(e) => {
                warn!("endpoint {} failed to build success response: {}", self.id, e);
                return;
            }
        }

        // RFC 8445 7.3.1.3
        match self.routes.checklist_for_username(&remote_username) {
            Some(id) => {
                let mut ctx = context!(self, state, events, now);
                if let Some(checklist) = self.checklists.get_mut(&id) {
                    checklist.generate_triggered_check(
                        local_address,
                        remote_address,
                        priority,
                        use_candidate,
                        &mut ctx,
                    );
                }
            }
            None => {
                trace!(
                    "endpoint {} deferring check from {} for {}",
                    self.id,
                    remote_address,
                    remote_username
                );
                self.deferred_triggered_checks
                    .entry(remote_username)
                    .or_default()
                    .push_back(DeferredTriggeredCheck {
                        local_address,
                        remote_address,
                        priority,
                        use_candidate,
                        expiration_date: now + state.config.deferred_triggered_check_ttl(),
                    });
            }
        }
    }

    // RFC 8445 11
    fn indication(&mut self, msg: &Message, now: Instant) {
        let remote_username = match self.authenticate(msg) {
            Ok(remote_username) => remote_username,
            Err((code, reason)) => {
                if code != UNAUTHORIZED {
                    warn!("endpoint {} indication: {}", self.id, reason);
                }
                return;
            }
        };

        if !msg.unknown_comprehension_required_attributes().is_empty() {
            warn!(
                "endpoint {} indication with unknown comprehension required attributes",
                self.id
            );
            return;
        }
        if !msg.has_fingerprint() {
            warn!("endpoint {} indication without FINGERPRINT", self.id);
            return;
        }
        if !msg.has_method(BINDING) {
            warn!("endpoint {} indication with unknown method {}", self.id, msg.method());
            return;
        }

        if let Some(checklist) = self
            .routes
            .checklist_for_username(&remote_username)
            .and_then(|id| self.checklists.get_mut(&id))
        {
            checklist.indication(now);
        }
    }

    fn success_response(
        &mut self,
        local_address: SocketAddr,
        remote_address: SocketAddr,
        msg: &Message,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        if !msg.has_method(BINDING) {
            warn!("endpoint {} success response with unknown method {}", self.id, msg.method());
            return;
        }

        if self.binding_request == Some(msg.transaction_id()) {
            self.server_reflexive_response(msg, state, events, now);
            return;
        }

        // probably a cancelled check
        let Some(id) = self.routes.checklist_for_transaction(msg.transaction_id()) else {
            return;
        };
        let mut ctx = context!(self, state, events, now);
        if let Some(checklist) = self.checklists.get_mut(&id) {
            checklist.success_response(local_address, remote_address, msg, &mut ctx);
        }
    }

    fn server_reflexive_response(
        &mut self,
        msg: &Message,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        if !msg.unknown_comprehension_required_attributes().is_empty() {
            warn!(
                "endpoint {} STUN server response with unknown comprehension required attributes",
                self.id
            );
            return;
        }

        match msg.mapped_address() {
            Some(server_reflexive_address) => {
                let stun_server_address = self.next_stun_server_address;
                self.set_server_reflexive_address(
                    Some(server_reflexive_address),
                    stun_server_address,
                    state,
                    events,
                    now,
                );
                self.requesting = false;
            }
            None => {
                warn!("endpoint {} STUN server response without (XOR_)MAPPED_ADDRESS", self.id);
                self.set_server_reflexive_address(None, None, state, events, now);
                self.requesting = true;
            }
        }
        self.send_count = 0;
    }

    fn error_response(
        &mut self,
        local_address: SocketAddr,
        remote_address: SocketAddr,
        msg: &Message,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        if !msg.has_method(BINDING) {
            warn!("endpoint {} error response with unknown method {}", self.id, msg.method());
            return;
        }

        if self.binding_request == Some(msg.transaction_id()) {
            match msg.error_code() {
                Some(error_code) => {
                    warn!("endpoint {} STUN server error response {}", self.id, error_code);
                    if error_code.code() == UNKNOWN_ATTRIBUTE {
                        for atype in msg.unknown_attributes() {
                            warn!("endpoint {} STUN server unknown attribute {}", self.id, atype);
                        }
                    }
                }
                None => warn!("endpoint {} STUN server error response (no code)", self.id),
            }
            return;
        }

        let Some(id) = self.routes.checklist_for_transaction(msg.transaction_id()) else {
            return;
        };
        let mut ctx = context!(self, state, events, now);
        if let Some(checklist) = self.checklists.get_mut(&id) {
            checklist.error_response(local_address, remote_address, msg, &mut ctx);
        }
    }

    /// Request and maintain a server reflexive address.  Returns when to run again.
    pub(crate) fn server_reflexive_task(
        &mut self,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) -> Instant {
        self.next_stun_server_address = self.endpoint.stun_server_address();

        match self.next_stun_server_address {
            Some(stun_server_address) => {
                if !self.requesting && self.stun_server_address != Some(stun_server_address) {
                    debug!("endpoint {} STUN server changed", self.id);
                    self.requesting = true;
                    self.send_count = 0;
                }

                let mut msg = if self.requesting {
                    Message::new_request(BINDING)
                } else {
                    Message::new_indication(BINDING)
                };
                match msg.add_fingerprint() {
                    Ok(()) => {
                        trace!(
                            "endpoint {} sending {:?} to {}",
                            self.id,
                            msg.class(),
                            stun_server_address
                        );
                        self.binding_request = Some(msg.transaction_id());
                        events.push(EndpointEvent::Send(stun_server_address, msg));
                    }
                    Err(e) => warn!("endpoint {} failed to build binding request: {}", self.id, e),
                }

                let count = state.config.server_reflexive_indication_count();
                if !self.requesting && self.send_count == count - 1 {
                    self.requesting = true;
                }
                self.send_count = (self.send_count + 1) % count;
            }
            None => {
                self.requesting = true;
                self.send_count = 0;
            }
        }

        for list in self.deferred_triggered_checks.values_mut() {
            while list
                .front()
                .map_or(false, |check| check.expiration_date < now)
            {
                list.pop_front();
            }
        }
        self.deferred_triggered_checks
            .retain(|_, list| !list.is_empty());

        let host_addresses = self.endpoint.host_addresses();
        self.set_host_addresses(host_addresses, state, events, now);

        now + state.config.server_reflexive_address_period()
    }

    /// Rotate the password.  Returns when to run again.
    pub(crate) fn change_password_task(
        &mut self,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) -> Instant {
        self.change_password(true, state, events, now);
        now + state.config.change_password_period()
    }

    pub(crate) fn execute_checklist(
        &mut self,
        id: ChecklistId,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) -> Option<Instant> {
        if self
            .checklists
            .get(&id)
            .map_or(true, |checklist| checklist.is_scheduled_for_destruction())
        {
            if self.checklists.remove(&id).is_some() {
                debug!("endpoint {} destroyed checklist {}", self.id, id);
            }
            return None;
        }

        let mut ctx = context!(self, state, events, now);
        self.checklists.get_mut(&id)?.execute(&mut ctx)
    }

    pub(crate) fn network_change(
        &mut self,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        let host_addresses = self.endpoint.host_addresses();
        self.set_host_addresses(host_addresses, state, events, now);
    }

    /// Detach every GUID pair in preparation for removal
    pub(crate) fn schedule_for_destruction(
        &mut self,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        let mut ctx = context!(self, state, events, now);
        for checklist in self
            .checklists
            .values_mut()
            .filter(|checklist| !checklist.is_scheduled_for_destruction())
        {
            checklist.remove_guids(&mut ctx);
        }
    }

    pub(crate) fn unfreeze(&mut self, state: &mut AgentState, events: &mut Vec<EndpointEvent>, now: Instant) {
        let mut ctx = context!(self, state, events, now);
        for checklist in self
            .checklists
            .values_mut()
            .filter(|checklist| !checklist.is_scheduled_for_destruction())
        {
            checklist.unfreeze(&mut ctx);
        }
    }

    pub(crate) fn unfreeze_foundation(
        &mut self,
        foundation: &FoundationType,
        state: &mut AgentState,
        events: &mut Vec<EndpointEvent>,
        now: Instant,
    ) {
        let mut ctx = context!(self, state, events, now);
        for checklist in self
            .checklists
            .values_mut()
            .filter(|checklist| !checklist.is_scheduled_for_destruction())
        {
            checklist.unfreeze_foundation(foundation, &mut ctx);
        }
    }

    pub(crate) fn compute_active_foundations(&self, active: &mut ActiveFoundationSet) {
        for checklist in self.checklists.values() {
            checklist.compute_active_foundations(active);
        }
    }

    pub(crate) fn check_invariants(&self) {
        for checklist in self.checklists.values() {
            checklist.check_invariants();
        }
    }

    #[cfg(test)]
    pub(crate) fn checklist_for_username(&self, username: &str) -> Option<&Checklist> {
        self.routes
            .checklist_for_username(username)
            .and_then(|id| self.checklists.get(&id))
    }

    #[cfg(test)]
    pub(crate) fn checklist_count(&self) -> usize {
        self.checklists.len()
    }

    #[cfg(test)]
    pub(crate) fn deferred_check_count(&self) -> usize {
        self.deferred_triggered_checks.values().map(|l| l.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use std::sync::Mutex;
    use std::time::Duration;

    fn init() {
        crate::tests::test_init_log();
    }

    #[derive(Debug, Default)]
    struct TestEndpoint {
        host_addresses: Mutex<Vec<SocketAddr>>,
        stun_server: Mutex<Option<SocketAddr>>,
    }

    impl Endpoint for TestEndpoint {
        fn host_addresses(&self) -> Vec<SocketAddr> {
            self.host_addresses.lock().unwrap().clone()
        }
        fn stun_server_address(&self) -> Option<SocketAddr> {
            *self.stun_server.lock().unwrap()
        }
        fn send(&self, _destination: SocketAddr, _message: &Message) {}
        fn ice_connect(&self, _guids: &GuidSet, _address: SocketAddr) {}
        fn ice_disconnect(&self, _guids: &GuidSet) {}
    }

    struct Fixture {
        endpoint: Arc<TestEndpoint>,
        state: AgentState,
        manager: EndpointManager,
        events: Vec<EndpointEvent>,
        now: Instant,
    }

    const LOCAL: &str = "192.168.1.2:7400";
    const REMOTE: &str = "192.168.1.3:7400";

    fn fixture(config: Configuration) -> Fixture {
        let endpoint = Arc::new(TestEndpoint::default());
        *endpoint.host_addresses.lock().unwrap() =
            vec![LOCAL.parse().unwrap(), "127.0.0.1:7400".parse().unwrap()];
        let mut state = AgentState::new(config);
        let mut events = vec![];
        let now = Instant::now();
        let manager =
            EndpointManager::new(EndpointId(0), endpoint.clone(), &mut state, &mut events, now);
        Fixture {
            endpoint,
            state,
            manager,
            events: vec![],
            now,
        }
    }

    impl Fixture {
        fn receive(&mut self, msg: &Message) {
            self.manager.receive(
                LOCAL.parse().unwrap(),
                REMOTE.parse().unwrap(),
                msg,
                &mut self.state,
                &mut self.events,
                self.now,
            );
        }

        fn sent(&mut self) -> Vec<(SocketAddr, Message)> {
            self.events
                .drain(..)
                .filter_map(|event| match event {
                    EndpointEvent::Send(to, msg) => Some((to, msg)),
                    _ => None,
                })
                .collect()
        }
    }

    fn remote_agent_info() -> AgentInfo {
        AgentInfo {
            username: "remoteuser".to_owned(),
            password: "remotepassword".to_owned(),
            candidates: vec![make_host_candidate(REMOTE.parse().unwrap())],
            agent_type: AgentType::Full,
        }
    }

    fn request(local_username: &str, password: &str) -> Message {
        let mut msg = Message::new_request(BINDING);
        msg.add_attribute(Priority::new(PEER_REFLEXIVE_PRIORITY).into())
            .unwrap();
        msg.add_attribute(IceControlling::new(1).into()).unwrap();
        msg.add_attribute(
            Username::new(&format!("{}:remoteuser", local_username))
                .unwrap()
                .into(),
        )
        .unwrap();
        msg.add_message_integrity(password).unwrap();
        msg.add_fingerprint().unwrap();
        msg
    }

    fn error_code(msg: &Message) -> Option<(u16, String)> {
        msg.error_code()
            .map(|code| (code.code(), code.reason().to_owned()))
    }

    #[test]
    fn loopback_is_not_a_candidate() {
        init();
        let f = fixture(Configuration::default());
        let info = f.manager.agent_info();
        assert_eq!(info.candidates.len(), 1);
        assert_eq!(info.candidates[0].address, LOCAL.parse().unwrap());
        assert_eq!(info.username.len(), 32);
        assert_eq!(info.password.len(), 32);
    }

    #[test]
    fn valid_request_is_answered() {
        init();
        let mut f = fixture(Configuration::default());
        let info = f.manager.agent_info().clone();
        let req = request(&info.username, &info.password);
        f.receive(&req);
        let sent = f.sent();
        assert_eq!(sent.len(), 1);
        let (to, response) = &sent[0];
        assert_eq!(*to, REMOTE.parse().unwrap());
        assert_eq!(response.class(), MessageClass::Success);
        assert_eq!(response.transaction_id(), req.transaction_id());
        assert_eq!(response.mapped_address(), Some(REMOTE.parse().unwrap()));
        assert!(response.validate_integrity(&info.password).is_ok());
        assert!(response.has_fingerprint());
        // no checklist yet
        assert_eq!(f.manager.deferred_check_count(), 1);
    }

    #[test]
    fn request_validation() {
        init();
        let mut f = fixture(Configuration::default());
        let info = f.manager.agent_info().clone();

        let mut no_username = Message::new_request(BINDING);
        no_username.add_message_integrity(&info.password).unwrap();
        no_username.add_fingerprint().unwrap();

        let mut no_integrity = Message::new_request(BINDING);
        no_integrity
            .add_attribute(Username::new(&format!("{}:remoteuser", info.username)).unwrap().into())
            .unwrap();

        let mut no_colon = Message::new_request(BINDING);
        no_colon
            .add_attribute(Username::new(&info.username).unwrap().into())
            .unwrap();
        no_colon.add_message_integrity(&info.password).unwrap();

        let mut unknown = Message::new_request(BINDING);
        unknown
            .add_attribute(Username::new(&format!("{}:remoteuser", info.username)).unwrap().into())
            .unwrap();
        unknown
            .add_attribute(RawAttribute::new(AttributeType::new(0x0033), &[0, 0, 0, 0]))
            .unwrap();
        unknown.add_message_integrity(&info.password).unwrap();
        unknown.add_fingerprint().unwrap();

        let mut no_fingerprint = Message::new_request(BINDING);
        no_fingerprint
            .add_attribute(Username::new(&format!("{}:remoteuser", info.username)).unwrap().into())
            .unwrap();
        no_fingerprint.add_message_integrity(&info.password).unwrap();

        let mut no_role = Message::new_request(BINDING);
        no_role
            .add_attribute(Priority::new(1).into())
            .unwrap();
        no_role
            .add_attribute(Username::new(&format!("{}:remoteuser", info.username)).unwrap().into())
            .unwrap();
        no_role.add_message_integrity(&info.password).unwrap();
        no_role.add_fingerprint().unwrap();

        let mut controlled_use_candidate = Message::new_request(BINDING);
        controlled_use_candidate
            .add_attribute(Priority::new(1).into())
            .unwrap();
        controlled_use_candidate
            .add_attribute(IceControlled::new(1).into())
            .unwrap();
        controlled_use_candidate
            .add_attribute(UseCandidate::new().into())
            .unwrap();
        controlled_use_candidate
            .add_attribute(Username::new(&format!("{}:remoteuser", info.username)).unwrap().into())
            .unwrap();
        controlled_use_candidate
            .add_message_integrity(&info.password)
            .unwrap();
        controlled_use_candidate.add_fingerprint().unwrap();

        let mut no_priority = Message::new_request(BINDING);
        no_priority
            .add_attribute(IceControlled::new(1).into())
            .unwrap();
        no_priority
            .add_attribute(Username::new(&format!("{}:remoteuser", info.username)).unwrap().into())
            .unwrap();
        no_priority.add_message_integrity(&info.password).unwrap();
        no_priority.add_fingerprint().unwrap();

        let mut unknown_method = Message::new_request(0x0003);
        unknown_method
            .add_attribute(Priority::new(1).into())
            .unwrap();
        unknown_method
            .add_attribute(IceControlled::new(1).into())
            .unwrap();
        unknown_method
            .add_attribute(Username::new(&format!("{}:remoteuser", info.username)).unwrap().into())
            .unwrap();
        unknown_method.add_message_integrity(&info.password).unwrap();
        unknown_method.add_fingerprint().unwrap();

        let cases = [
            (no_username, BAD_REQUEST, "Bad Request: USERNAME must be present"),
            (no_integrity, BAD_REQUEST, "Bad Request: MESSAGE_INTEGRITY must be present"),
            (no_colon, BAD_REQUEST, "Bad Request: USERNAME must be colon-separated"),
            (request("someoneelse", &info.password), UNAUTHORIZED, "Unauthorized"),
            (request(&info.username, "wrongpassword"), UNAUTHORIZED, "Unauthorized"),
            (unknown, UNKNOWN_ATTRIBUTE, "Unknown Attributes"),
            (no_fingerprint, BAD_REQUEST, "Bad Request: FINGERPRINT must be present"),
            (
                no_role,
                BAD_REQUEST,
                "Bad Request: Either ICE_CONTROLLED or ICE_CONTROLLING must be present",
            ),
            (
                controlled_use_candidate,
                BAD_REQUEST,
                "Bad Request: USE_CANDIDATE can only be present when ICE_CONTROLLING is present",
            ),
            (no_priority, BAD_REQUEST, "Bad Request: PRIORITY must be present"),
            (unknown_method, BAD_REQUEST, "Bad Request: Unknown method"),
        ];

        for (msg, code, reason) in cases.iter() {
            f.receive(msg);
            let sent = f.sent();
            assert_eq!(sent.len(), 1, "{}", reason);
            let response = &sent[0].1;
            assert_eq!(response.class(), MessageClass::Error);
            assert_eq!(response.transaction_id(), msg.transaction_id());
            assert_eq!(error_code(response), Some((*code, reason.to_string())));
            assert!(response.validate_integrity(&info.password).is_ok());
            if *code == UNKNOWN_ATTRIBUTE {
                assert_eq!(response.unknown_attributes(), vec![AttributeType::new(0x0033)]);
            }
        }
        assert_eq!(f.manager.deferred_check_count(), 0);
    }

    #[test]
    fn deferred_check_replayed_on_start_ice() {
        init();
        let mut f = fixture(Configuration::default());
        let info = f.manager.agent_info().clone();
        f.receive(&request(&info.username, &info.password));
        f.sent();
        assert_eq!(f.manager.deferred_check_count(), 1);

        let guid_pair = GuidPair::new(Guid([1; 16]), Guid([2; 16]));
        f.manager.start_ice(
            guid_pair,
            &remote_agent_info(),
            &mut f.state,
            &mut f.events,
            f.now,
        );
        assert_eq!(f.manager.deferred_check_count(), 0);
        let checklist = f.manager.checklist_for_username("remoteuser").unwrap();
        let counts = checklist.counts();
        assert_eq!(counts.triggered, 1);
        assert_eq!(counts.waiting, 1);
        assert!(checklist.guids().contains(&guid_pair));
    }

    #[test]
    fn deferred_checks_expire() {
        init();
        let mut f = fixture(
            Configuration::builder()
                .deferred_triggered_check_ttl(Duration::from_secs(1))
                .build(),
        );
        let info = f.manager.agent_info().clone();
        f.receive(&request(&info.username, &info.password));
        assert_eq!(f.manager.deferred_check_count(), 1);
        let later = f.now + Duration::from_secs(2);
        f.manager
            .server_reflexive_task(&mut f.state, &mut f.events, later);
        assert_eq!(f.manager.deferred_check_count(), 0);
    }

    #[test]
    fn start_ice_changes() {
        init();
        let mut f = fixture(Configuration::default());
        let guid_pair = GuidPair::new(Guid([1; 16]), Guid([2; 16]));
        let other_pair = GuidPair::new(Guid([1; 16]), Guid([3; 16]));
        let remote = remote_agent_info();
        f.manager
            .start_ice(guid_pair, &remote, &mut f.state, &mut f.events, f.now);
        f.manager
            .start_ice(other_pair, &remote, &mut f.state, &mut f.events, f.now);
        assert_eq!(f.manager.checklist_count(), 1);
        let id = f.manager.routes.checklist_for_username("remoteuser").unwrap();

        // password only
        let mut changed = remote.clone();
        changed.password = "newpassword".to_owned();
        f.manager
            .start_ice(guid_pair, &changed, &mut f.state, &mut f.events, f.now);
        assert_eq!(f.manager.routes.checklist_for_username("remoteuser"), Some(id));
        assert_eq!(
            f.manager
                .checklist_for_username("remoteuser")
                .unwrap()
                .original_remote_agent_info()
                .password,
            "newpassword"
        );

        // new candidates replace the checklist and keep the guid pairs
        changed
            .candidates
            .push(make_host_candidate("192.168.1.4:7400".parse().unwrap()));
        changed.normalize_candidates();
        f.manager
            .start_ice(guid_pair, &changed, &mut f.state, &mut f.events, f.now);
        let new_id = f.manager.routes.checklist_for_username("remoteuser").unwrap();
        assert_ne!(new_id, id);
        let checklist = f.manager.checklist_for_username("remoteuser").unwrap();
        assert!(checklist.guids().contains(&guid_pair));
        assert!(checklist.guids().contains(&other_pair));
        assert_eq!(f.manager.routes.checklist_for_guid_pair(other_pair), Some(new_id));

        // the old checklist goes away on its next run
        assert_eq!(f.manager.checklist_count(), 2);
        assert_eq!(
            f.manager
                .execute_checklist(id, &mut f.state, &mut f.events, f.now),
            None
        );
        assert_eq!(f.manager.checklist_count(), 1);

        f.manager
            .stop_ice(guid_pair, &mut f.state, &mut f.events, f.now);
        f.manager
            .stop_ice(other_pair, &mut f.state, &mut f.events, f.now);
        assert_eq!(f.manager.routes.checklist_for_username("remoteuser"), None);
        assert!(f.state.foundations.is_empty());
    }

    #[test]
    fn username_collision() {
        init();
        let mut f = fixture(Configuration::default());
        let mut remote = remote_agent_info();
        let original = f.manager.agent_info().username.clone();
        remote.username = original.clone();
        f.manager.start_ice(
            GuidPair::new(Guid([1; 16]), Guid([2; 16])),
            &remote,
            &mut f.state,
            &mut f.events,
            f.now,
        );
        assert_ne!(f.manager.agent_info().username, original);
        assert!(f.manager.checklist_for_username(&original).is_some());
    }

    #[test]
    fn server_reflexive_toggle() {
        init();
        let count = 3;
        let mut f = fixture(
            Configuration::builder()
                .server_reflexive_indication_count(count)
                .build(),
        );
        let stun_server: SocketAddr = "192.168.1.100:3478".parse().unwrap();
        *f.endpoint.stun_server.lock().unwrap() = Some(stun_server);

        let run = |f: &mut Fixture| -> Message {
            f.manager
                .server_reflexive_task(&mut f.state, &mut f.events, f.now);
            let mut sent = f.sent();
            assert_eq!(sent.len(), 1);
            let (to, msg) = sent.remove(0);
            assert_eq!(to, stun_server);
            assert!(msg.has_fingerprint());
            msg
        };

        // keeps requesting until answered
        for _ in 0..2 {
            assert_eq!(run(&mut f).class(), MessageClass::Request);
        }
        let req = run(&mut f);
        assert_eq!(req.class(), MessageClass::Request);

        let server_reflexive: SocketAddr = "1.2.3.4:5678".parse().unwrap();
        let mut response = Message::new_success(&req);
        response
            .add_attribute(XorMappedAddress::new(server_reflexive, req.transaction_id()).into())
            .unwrap();
        response.add_fingerprint().unwrap();
        f.receive(&response);
        let info = f.manager.agent_info();
        assert!(info
            .candidates
            .iter()
            .any(|c| c.candidate_type == CandidateType::ServerReflexive
                && c.address == server_reflexive));
        f.events.clear();

        for _ in 0..3 {
            for _ in 0..count {
                assert_eq!(run(&mut f).class(), MessageClass::Indication);
            }
            let req = run(&mut f);
            assert_eq!(req.class(), MessageClass::Request);
            let mut response = Message::new_success(&req);
            response
                .add_attribute(XorMappedAddress::new(server_reflexive, req.transaction_id()).into())
                .unwrap();
            f.receive(&response);
            f.events.clear();
        }

        // a response without an address forgets the server reflexive candidate
        let req = {
            for _ in 0..count {
                run(&mut f);
            }
            run(&mut f)
        };
        assert_eq!(req.class(), MessageClass::Request);
        f.receive(&Message::new_success(&req));
        assert!(f
            .manager
            .agent_info()
            .candidates
            .iter()
            .all(|c| c.candidate_type == CandidateType::Host));
        f.events.clear();
        assert_eq!(run(&mut f).class(), MessageClass::Request);

        // without a STUN server nothing is sent
        *f.endpoint.stun_server.lock().unwrap() = None;
        f.manager
            .server_reflexive_task(&mut f.state, &mut f.events, f.now);
        assert!(f.sent().is_empty());
    }

    #[test]
    fn network_change_regenerates() {
        init();
        let mut f = fixture(Configuration::default());
        let guid = Guid([7; 16]);
        let listener: Arc<dyn AgentInfoListener> = Arc::new(NullListener);
        f.manager
            .add_agent_info_listener(guid, Arc::downgrade(&listener));
        f.endpoint
            .host_addresses
            .lock()
            .unwrap()
            .push("10.0.0.1:7400".parse().unwrap());
        f.manager
            .network_change(&mut f.state, &mut f.events, f.now);
        assert_eq!(f.manager.agent_info().candidates.len(), 2);
        let updates: Vec<_> = f
            .events
            .iter()
            .filter_map(|event| match event {
                EndpointEvent::AgentInfo(listeners, info) => Some((listeners.len(), info.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, 1);
        assert_eq!(&updates[0].1, f.manager.agent_info());

        // unchanged addresses do nothing
        f.events.clear();
        f.manager
            .network_change(&mut f.state, &mut f.events, f.now);
        assert!(f.events.is_empty());
        assert!(f.manager.remove_agent_info_listener(&guid));
        assert!(!f.manager.remove_agent_info_listener(&guid));
    }

    #[derive(Debug, Default)]
    struct NullListener;

    impl AgentInfoListener for NullListener {
        fn update_agent_info(&self, _local_guid: &Guid, _agent_info: &AgentInfo) {}
    }
}
