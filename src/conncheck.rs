// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Connectivity checks (RFC 8445 6.1.4, 7.2) for one local/remote agent relationship

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::agent::AgentState;
use crate::candidate::*;
use crate::endpoint::{GuidPair, GuidSet};
use crate::manager::{EndpointEvent, EndpointId, Routes};
use crate::stun::attribute::*;
use crate::stun::message::*;
use crate::stun::StunError;
use crate::tasks::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChecklistId(pub(crate) usize);

impl std::fmt::Display for ChecklistId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a checklist touches outside of itself while handling one event
pub(crate) struct CheckContext<'a> {
    pub(crate) now: Instant,
    pub(crate) endpoint: EndpointId,
    pub(crate) state: &'a mut AgentState,
    pub(crate) routes: &'a mut Routes,
    pub(crate) events: &'a mut Vec<EndpointEvent>,
}

impl<'a> CheckContext<'a> {
    fn wake(&mut self, checklist: ChecklistId, at: Instant) {
        self.state
            .wakeups
            .push((Task::Checklist(self.endpoint, checklist), at));
    }

    fn send(&mut self, destination: SocketAddr, message: Message) {
        self.events.push(EndpointEvent::Send(destination, message));
    }
}

/// An outstanding binding request testing a candidate pair
#[derive(Debug, Clone)]
pub(crate) struct ConnectivityCheck {
    candidate_pair: CandidatePair,
    // without MESSAGE-INTEGRITY and FINGERPRINT
    request: Message,
    password: String,
    cancelled: bool,
    expiration_date: Instant,
}

impl ConnectivityCheck {
    fn new(
        candidate_pair: CandidatePair,
        local_agent_info: &AgentInfo,
        remote_agent_info: &AgentInfo,
        ice_tie_breaker: u64,
        expiration_date: Instant,
    ) -> Result<Self, StunError> {
        let mut request = Message::new_request(BINDING);
        request.add_attribute(Priority::new(PEER_REFLEXIVE_PRIORITY).into())?;
        if candidate_pair.local_is_controlling {
            request.add_attribute(IceControlling::new(ice_tie_breaker).into())?;
            if candidate_pair.use_candidate {
                request.add_attribute(UseCandidate::new().into())?;
            }
        } else {
            request.add_attribute(IceControlled::new(ice_tie_breaker).into())?;
        }
        request.add_attribute(
            Username::new(&format!(
                "{}:{}",
                remote_agent_info.username, local_agent_info.username
            ))?
            .into(),
        )?;
        Ok(Self {
            candidate_pair,
            request,
            password: remote_agent_info.password.clone(),
            cancelled: false,
            expiration_date,
        })
    }

    fn transaction_id(&self) -> TransactionId {
        self.request.transaction_id()
    }

    fn message(&self) -> Result<Message, StunError> {
        let mut msg = self.request.clone();
        msg.add_message_integrity(&self.password)?;
        msg.add_fingerprint()?;
        Ok(msg)
    }
}

/// The candidate pairs between one local and one remote agent and their check state
#[derive(Debug)]
pub(crate) struct Checklist {
    id: ChecklistId,
    local_agent_info: AgentInfo,
    remote_agent_info: AgentInfo,
    original_remote_agent_info: AgentInfo,
    ice_tie_breaker: u64,
    local_is_controlling: bool,
    frozen: VecDeque<CandidatePair>,
    waiting: VecDeque<CandidatePair>,
    in_progress: Vec<CandidatePair>,
    succeeded: Vec<CandidatePair>,
    failed: Vec<CandidatePair>,
    // every entry is also in waiting
    triggered_check_queue: VecDeque<CandidatePair>,
    valid_list: Vec<CandidatePair>,
    nominating: Option<CandidatePair>,
    nominated: Option<CandidatePair>,
    nominated_is_live: bool,
    last_indication: Instant,
    check_interval: Duration,
    max_check_interval: Duration,
    connectivity_checks: VecDeque<ConnectivityCheck>,
    guids: GuidSet,
    scheduled_for_destruction: bool,
}

impl Checklist {
    pub(crate) fn new(
        id: ChecklistId,
        local_agent_info: AgentInfo,
        remote_agent_info: AgentInfo,
        ice_tie_breaker: u64,
        ctx: &mut CheckContext,
    ) -> Self {
        let mut checklist = Self {
            id,
            local_agent_info,
            original_remote_agent_info: remote_agent_info.clone(),
            remote_agent_info,
            ice_tie_breaker,
            local_is_controlling: false,
            frozen: VecDeque::new(),
            waiting: VecDeque::new(),
            in_progress: vec![],
            succeeded: vec![],
            failed: vec![],
            triggered_check_queue: VecDeque::new(),
            valid_list: vec![],
            nominating: None,
            nominated: None,
            nominated_is_live: false,
            last_indication: ctx.now,
            check_interval: ctx.state.config.t_a(),
            max_check_interval: ctx.state.config.checklist_period(),
            connectivity_checks: VecDeque::new(),
            guids: GuidSet::new(),
            scheduled_for_destruction: false,
        };
        ctx.routes
            .set_username(&checklist.remote_agent_info.username, id);
        checklist.generate_candidate_pairs(ctx);
        checklist
    }

    pub(crate) fn original_remote_agent_info(&self) -> &AgentInfo {
        &self.original_remote_agent_info
    }

    #[cfg(test)]
    pub(crate) fn local_is_controlling(&self) -> bool {
        self.local_is_controlling
    }

    pub(crate) fn is_scheduled_for_destruction(&self) -> bool {
        self.scheduled_for_destruction
    }

    #[cfg(test)]
    pub(crate) fn nominated(&self) -> Option<&CandidatePair> {
        self.nominated.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn valid_list(&self) -> &[CandidatePair] {
        &self.valid_list
    }

    #[cfg(test)]
    pub(crate) fn guids(&self) -> &GuidSet {
        &self.guids
    }

    /// The remote address to use for RTPS traffic while the nominated pair is live
    pub(crate) fn selected_address(&self) -> Option<SocketAddr> {
        if self.nominated_is_live {
            self.nominated.as_ref().map(|cp| cp.remote.address)
        } else {
            None
        }
    }

    fn generate_candidate_pairs(&mut self, ctx: &mut CheckContext) {
        self.local_is_controlling =
            self.local_agent_info.username < self.remote_agent_info.username;

        let mut pairs = vec![];
        for local in &self.local_agent_info.candidates {
            for remote in &self.remote_agent_info.candidates {
                if CandidatePair::can_pair(local, remote) {
                    pairs.push(CandidatePair::new(
                        local.clone(),
                        remote.clone(),
                        self.local_is_controlling,
                        false,
                    ));
                }
            }
        }
        pairs.sort_by(candidate_pairs_sorted);

        // RFC 8445 6.1.2.4: keep the highest priority pair per local base and remote candidate
        for cp in pairs {
            if !self
                .frozen
                .iter()
                .any(|p| p.local.base == cp.local.base && p.remote == cp.remote)
            {
                self.frozen.push_back(cp);
            }
        }

        self.check_interval = ctx.state.config.t_a();
        self.max_check_interval =
            ctx.state.config.checklist_period() / self.frozen.len().max(1) as u32;
        debug!(
            "checklist {} generated {} pairs, controlling {}",
            self.id,
            self.frozen.len(),
            self.local_is_controlling
        );
    }

    pub(crate) fn set_remote_password(&mut self, password: &str) {
        self.remote_agent_info.password = password.to_owned();
        self.original_remote_agent_info.password = password.to_owned();
    }

    fn add_to_waiting(&mut self, cp: CandidatePair) {
        let pos = self
            .waiting
            .iter()
            .position(|p| p.priority < cp.priority)
            .unwrap_or(self.waiting.len());
        self.waiting.insert(pos, cp);
    }

    /// Move every frozen pair whose foundation is not being checked anywhere into waiting
    pub(crate) fn unfreeze(&mut self, ctx: &mut CheckContext) {
        let mut flag = false;
        let mut i = 0;
        while i < self.frozen.len() {
            if ctx.state.foundations.contains(&self.frozen[i].foundation) {
                i += 1;
                continue;
            }
            if let Some(cp) = self.frozen.remove(i) {
                ctx.state.foundations.add(&cp.foundation);
                self.add_to_waiting(cp);
                flag = true;
            }
        }

        if flag {
            ctx.wake(self.id, ctx.now);
        }
    }

    /// Move the frozen pairs with `foundation` into waiting
    pub(crate) fn unfreeze_foundation(&mut self, foundation: &FoundationType, ctx: &mut CheckContext) {
        let mut flag = false;
        let mut i = 0;
        while i < self.frozen.len() {
            if &self.frozen[i].foundation != foundation {
                i += 1;
                continue;
            }
            if let Some(cp) = self.frozen.remove(i) {
                ctx.state.foundations.add(&cp.foundation);
                self.add_to_waiting(cp);
                flag = true;
            }
        }

        if flag {
            ctx.wake(self.id, ctx.now);
        }
    }

    fn add_triggered_check(&mut self, cp: CandidatePair, ctx: &mut CheckContext) {
        if self.nominated.is_some() {
            return;
        }

        if let Some(pos) = self.frozen.iter().position(|p| *p == cp) {
            self.frozen.remove(pos);
        } else if self.waiting.contains(&cp) || self.succeeded.contains(&cp) {
            return;
        } else if let Some(pos) = self.failed.iter().position(|p| *p == cp) {
            self.failed.remove(pos);
        }
        // in progress pairs are checked again alongside the outstanding check

        trace!("checklist {} triggered check for {}", self.id, cp);
        ctx.state.foundations.add(&cp.foundation);
        self.add_to_waiting(cp.clone());
        self.triggered_check_queue.push_back(cp);
    }

    /// React to a check from the remote agent on (`local_address`, `remote_address`)
    pub(crate) fn generate_triggered_check(
        &mut self,
        local_address: SocketAddr,
        remote_address: SocketAddr,
        priority: u32,
        use_candidate: bool,
        ctx: &mut CheckContext,
    ) {
        let remote = match self.remote_agent_info.candidate_by_address(remote_address) {
            Some(remote) => remote.clone(),
            None => {
                let counter = ctx.state.next_remote_peer_reflexive_counter();
                let remote = make_remote_peer_reflexive_candidate(remote_address, priority, counter);
                debug!(
                    "checklist {} learnt remote peer reflexive candidate {}",
                    self.id, remote
                );
                self.remote_agent_info.candidates.push(remote.clone());
                self.remote_agent_info.normalize_candidates();
                remote
            }
        };

        let local = match self.local_agent_info.candidate_by_address(local_address) {
            Some(local) => local.clone(),
            None => {
                warn!(
                    "checklist {} no local candidate for {}",
                    self.id, local_address
                );
                return;
            }
        };

        let cp = CandidatePair::new(local, remote, self.local_is_controlling, use_candidate);

        if self.succeeded.contains(&cp) {
            return;
        }

        if self.in_progress.contains(&cp) {
            for cc in self
                .connectivity_checks
                .iter_mut()
                .filter(|cc| cc.candidate_pair == cp)
            {
                cc.cancelled = true;
            }
        }

        self.add_triggered_check(cp, ctx);
        self.check_interval = ctx.state.config.t_a();
        ctx.wake(self.id, ctx.now);
    }

    fn remove_from_in_progress(&mut self, cp: &CandidatePair, ctx: &mut CheckContext) {
        if let Some(pos) = self.in_progress.iter().position(|p| p == cp) {
            self.in_progress.remove(pos);
            ctx.state.foundations.remove(&cp.foundation);
        }
    }

    fn add_valid_pair(&mut self, valid_pair: CandidatePair) {
        debug_assert!(valid_pair.use_candidate);
        if !self.valid_list.contains(&valid_pair) {
            self.valid_list.push(valid_pair);
            self.valid_list.sort_by(candidate_pairs_sorted);
        }
    }

    fn succeeded(&mut self, cc: &ConnectivityCheck, ctx: &mut CheckContext) {
        let cp = &cc.candidate_pair;
        debug!("checklist {} check succeeded for {}", self.id, cp);
        self.remove_from_in_progress(cp, ctx);
        self.succeeded.push(cp.clone());

        if cp.use_candidate {
            if self.local_is_controlling {
                self.nominated = self.nominating.take().or_else(|| Some(cp.clone()));
            } else {
                // the nominating check can succeed before the ordinary check for the same pair
                if !self.valid_list.contains(cp) {
                    self.valid_list.insert(0, cp.clone());
                }
                self.nominated = Some(cp.clone());
            }
            info!(
                "checklist {} nominated {}",
                self.id,
                self.nominated.as_ref().unwrap_or(cp)
            );

            // no further searching once nominated
            while let Some(p) = self.frozen.pop_front() {
                self.failed.push(p);
            }
            while let Some(p) = self.waiting.pop_front() {
                ctx.state.foundations.remove(&p.foundation);
                self.failed.push(p);
            }
            self.triggered_check_queue.clear();

            self.nominated_is_live = true;
            if let Some(address) = self.nominated.as_ref().map(|n| n.remote.address) {
                ctx.events
                    .push(EndpointEvent::Connect(self.guids.clone(), address));
            }
            self.last_indication = ctx.now;

            while let Some(outstanding) = self.connectivity_checks.pop_front() {
                ctx.routes
                    .unset_transaction(outstanding.transaction_id(), self.id);
                if outstanding.cancelled {
                    self.remove_from_in_progress(&outstanding.candidate_pair, ctx);
                } else {
                    self.failed(&outstanding, ctx);
                }
            }
        }

        ctx.state.deferred_unfreezes.push(cp.foundation.clone());
    }

    fn failed(&mut self, cc: &ConnectivityCheck, ctx: &mut CheckContext) {
        let cp = &cc.candidate_pair;
        debug!("checklist {} check failed for {}", self.id, cp);
        self.remove_from_in_progress(cp, ctx);
        self.failed.push(cp.clone());

        if cp.use_candidate && self.local_is_controlling {
            // nominate the next valid pair instead
            if let Some(nominating) = self.nominating.take() {
                self.valid_list.retain(|p| *p != nominating);
            }
        }
    }

    fn take_connectivity_check(
        &mut self,
        transaction_id: TransactionId,
        ctx: &mut CheckContext,
    ) -> Option<ConnectivityCheck> {
        let pos = self
            .connectivity_checks
            .iter()
            .position(|cc| cc.transaction_id() == transaction_id)?;
        ctx.routes.unset_transaction(transaction_id, self.id);
        self.connectivity_checks.remove(pos)
    }

    pub(crate) fn success_response(
        &mut self,
        local_address: SocketAddr,
        remote_address: SocketAddr,
        msg: &Message,
        ctx: &mut CheckContext,
    ) {
        let Some(cc) = self
            .connectivity_checks
            .iter()
            .find(|cc| cc.transaction_id() == msg.transaction_id())
        else {
            debug!(
                "checklist {} no connectivity check for transaction {}",
                self.id,
                msg.transaction_id()
            );
            return;
        };

        let mapped_address = msg.mapped_address();
        let problem = if !msg.unknown_comprehension_required_attributes().is_empty() {
            Some("unknown comprehension required attributes")
        } else if !msg.has_fingerprint() {
            Some("no FINGERPRINT")
        } else if mapped_address.is_none() {
            Some("no (XOR_)MAPPED_ADDRESS")
        } else if !msg.has_message_integrity() {
            Some("no MESSAGE_INTEGRITY")
        } else if msg.validate_integrity(&cc.password).is_err() {
            Some("MESSAGE_INTEGRITY check failed")
        } else {
            None
        };

        let Some(cc) = self.take_connectivity_check(msg.transaction_id(), ctx) else {
            return;
        };

        let mapped_address = match (problem, mapped_address) {
            (None, Some(mapped_address)) => mapped_address,
            (problem, _) => {
                warn!(
                    "checklist {} invalid success response: {}",
                    self.id,
                    problem.unwrap_or("unknown")
                );
                self.failed(&cc, ctx);
                return;
            }
        };

        // RFC 8445 7.2.5.2.1 Non-Symmetric Transport Addresses
        if remote_address != cc.candidate_pair.remote.address
            || local_address != cc.candidate_pair.local.base
        {
            warn!(
                "checklist {} non-symmetric response from {} to {}",
                self.id, remote_address, local_address
            );
            self.failed(&cc, ctx);
            return;
        }

        self.succeeded(&cc, ctx);

        if !cc.candidate_pair.use_candidate {
            let cp = &cc.candidate_pair;
            let local = match self.local_agent_info.candidate_by_address(mapped_address) {
                Some(local) => local.clone(),
                None => {
                    let local = make_peer_reflexive_candidate(
                        mapped_address,
                        cp.local.base,
                        cp.remote.address,
                        cc.request.priority().unwrap_or(PEER_REFLEXIVE_PRIORITY),
                    );
                    debug!(
                        "checklist {} learnt local peer reflexive candidate {}",
                        self.id, local
                    );
                    self.local_agent_info.candidates.push(local.clone());
                    self.local_agent_info.normalize_candidates();
                    local
                }
            };
            let valid_pair = CandidatePair::new(
                local,
                cp.remote.clone(),
                self.local_is_controlling,
                true,
            );
            self.add_valid_pair(valid_pair);
        }
    }

    pub(crate) fn error_response(
        &mut self,
        _local_address: SocketAddr,
        _remote_address: SocketAddr,
        msg: &Message,
        ctx: &mut CheckContext,
    ) {
        let Some(cc) = self
            .connectivity_checks
            .iter()
            .find(|cc| cc.transaction_id() == msg.transaction_id())
        else {
            return;
        };

        // unauthenticated error responses are ignored and the check is retried
        if !msg.has_message_integrity() || msg.validate_integrity(&cc.password).is_err() {
            debug!(
                "checklist {} ignoring unauthenticated error response",
                self.id
            );
            return;
        }

        let fail = if !msg.unknown_comprehension_required_attributes().is_empty() {
            warn!("checklist {} error response with unknown attributes", self.id);
            true
        } else if !msg.has_fingerprint() {
            warn!("checklist {} error response without FINGERPRINT", self.id);
            true
        } else {
            match msg.error_code() {
                Some(error_code) => {
                    warn!("checklist {} error response {}", self.id, error_code);
                    if error_code.code() == UNKNOWN_ATTRIBUTE {
                        for atype in msg.unknown_attributes() {
                            warn!("checklist {} unknown attribute {}", self.id, atype);
                        }
                    }
                    error_code.code() == BAD_REQUEST || error_code.code() == UNKNOWN_ATTRIBUTE
                }
                None => {
                    warn!("checklist {} error response without ERROR_CODE", self.id);
                    true
                }
            }
        };

        if fail {
            if let Some(cc) = self.take_connectivity_check(msg.transaction_id(), ctx) {
                self.failed(&cc, ctx);
            }
        }
    }

    /// A binding indication arrived from the remote agent
    pub(crate) fn indication(&mut self, now: Instant) {
        self.last_indication = now;
    }

    fn send_check(&self, cc: &ConnectivityCheck, ctx: &mut CheckContext) {
        match cc.message() {
            Ok(msg) => ctx.send(cc.candidate_pair.remote.address, msg),
            Err(e) => warn!("checklist {} failed to build check: {}", self.id, e),
        }
    }

    fn start_check(&mut self, cp: CandidatePair, ctx: &mut CheckContext) {
        let cc = match ConnectivityCheck::new(
            cp.clone(),
            &self.local_agent_info,
            &self.remote_agent_info,
            self.ice_tie_breaker,
            ctx.now + ctx.state.config.connectivity_check_ttl(),
        ) {
            Ok(cc) => cc,
            Err(e) => {
                warn!("checklist {} failed to create check: {}", self.id, e);
                ctx.state.foundations.remove(&cp.foundation);
                self.failed.push(cp);
                return;
            }
        };
        trace!("checklist {} checking {}", self.id, cp);
        self.in_progress.push(cp);
        self.send_check(&cc, ctx);
        ctx.routes.set_transaction(cc.transaction_id(), self.id);
        self.connectivity_checks.push_back(cc);
    }

    fn do_next_check(&mut self, ctx: &mut CheckContext) {
        if let Some(cp) = self.triggered_check_queue.pop_front() {
            match self.waiting.iter().position(|p| *p == cp) {
                Some(pos) => {
                    self.waiting.remove(pos);
                }
                None => ctx.state.foundations.add(&cp.foundation),
            }
            self.start_check(cp, ctx);
            self.check_interval = ctx.state.config.t_a();
            return;
        }

        if let Some(cp) = self.waiting.pop_front() {
            self.start_check(cp, ctx);
            self.check_interval = ctx.state.config.t_a();
            return;
        }

        while let Some(mut cc) = self.connectivity_checks.pop_front() {
            if cc.expiration_date < ctx.now {
                ctx.routes.unset_transaction(cc.transaction_id(), self.id);
                if cc.cancelled {
                    self.remove_from_in_progress(&cc.candidate_pair, ctx);
                } else {
                    debug!(
                        "checklist {} check expired for {}",
                        self.id, cc.candidate_pair
                    );
                    self.failed(&cc, ctx);
                }
                continue;
            }

            if !cc.cancelled {
                // retransmissions use the current password of the remote agent
                cc.password = self.remote_agent_info.password.clone();
                self.send_check(&cc, ctx);
            }
            self.connectivity_checks.push_back(cc);
            self.check_interval = (self.check_interval * 2).min(self.max_check_interval);
            return;
        }

        self.check_interval = ctx.state.config.checklist_period();
    }

    fn send_indication(&self, destination: SocketAddr, ctx: &mut CheckContext) {
        let build = || -> Result<Message, StunError> {
            let mut msg = Message::new_indication(BINDING);
            msg.add_attribute(
                Username::new(&format!(
                    "{}:{}",
                    self.remote_agent_info.username, self.local_agent_info.username
                ))?
                .into(),
            )?;
            msg.add_message_integrity(&self.remote_agent_info.password)?;
            msg.add_fingerprint()?;
            Ok(msg)
        };
        match build() {
            Ok(msg) => ctx.send(destination, msg),
            Err(e) => warn!("checklist {} failed to build indication: {}", self.id, e),
        }
    }

    /// Run one step of the checklist.  Returns when it wants to run again.
    pub(crate) fn execute(&mut self, ctx: &mut CheckContext) -> Option<Instant> {
        let now = ctx.now;

        // RFC 8445 8.1.1 Nominating Pairs
        if self.frozen.is_empty()
            && self.waiting.is_empty()
            && self.local_is_controlling
            && self.nominating.is_none()
            && self.nominated.is_none()
        {
            if let Some(front) = self.valid_list.first().cloned() {
                debug!("checklist {} nominating {}", self.id, front);
                self.add_triggered_check(front.clone(), ctx);
                self.nominating = Some(front);
            }
        }

        let mut flag = false;
        let mut interval = self.check_interval.max(ctx.state.config.indication_period());

        if !self.triggered_check_queue.is_empty()
            || !self.frozen.is_empty()
            || !self.waiting.is_empty()
            || !self.connectivity_checks.is_empty()
        {
            self.do_next_check(ctx);
            flag = true;
            interval = interval.min(self.check_interval);
        }

        if let Some(address) = self.nominated.as_ref().map(|n| n.remote.address) {
            self.send_indication(address, ctx);
            flag = true;
            interval = interval.min(ctx.state.config.indication_period());

            let before = self.nominated_is_live;
            self.nominated_is_live =
                now.saturating_duration_since(self.last_indication) < ctx.state.config.nominated_ttl();
            if before && !self.nominated_is_live {
                info!("checklist {} nominated pair is no longer live", self.id);
                ctx.events.push(EndpointEvent::Disconnect(self.guids.clone()));
            } else if !before && self.nominated_is_live {
                info!("checklist {} nominated pair is live again", self.id);
                ctx.events
                    .push(EndpointEvent::Connect(self.guids.clone(), address));
            }
        }

        if flag {
            Some(now + interval)
        } else {
            None
        }
    }

    pub(crate) fn add_guid(&mut self, guid_pair: GuidPair, ctx: &mut CheckContext) {
        self.guids.insert(guid_pair);
        ctx.routes.set_guid_pair(guid_pair, self.id);
    }

    pub(crate) fn add_guids(&mut self, guids: &GuidSet, ctx: &mut CheckContext) {
        for guid_pair in guids {
            self.add_guid(*guid_pair, ctx);
        }
    }

    pub(crate) fn remove_guid(&mut self, guid_pair: GuidPair, ctx: &mut CheckContext) {
        self.guids.remove(&guid_pair);
        ctx.routes.unset_guid_pair(guid_pair, self.id);
        if self.guids.is_empty() {
            self.schedule_for_destruction(ctx);
        }
    }

    /// Detach every GUID pair and schedule destruction.  Returns the detached pairs.
    pub(crate) fn remove_guids(&mut self, ctx: &mut CheckContext) -> GuidSet {
        let guids = std::mem::take(&mut self.guids);
        for guid_pair in &guids {
            ctx.routes.unset_guid_pair(*guid_pair, self.id);
        }
        self.schedule_for_destruction(ctx);
        guids
    }

    fn schedule_for_destruction(&mut self, ctx: &mut CheckContext) {
        debug!("checklist {} scheduled for destruction", self.id);
        ctx.routes
            .unset_username(&self.remote_agent_info.username, self.id);
        self.reset(ctx);
        self.scheduled_for_destruction = true;
        ctx.wake(self.id, ctx.now);
    }

    fn reset(&mut self, ctx: &mut CheckContext) {
        for cp in self.waiting.iter().chain(self.in_progress.iter()) {
            ctx.state.foundations.remove(&cp.foundation);
        }
        for cc in &self.connectivity_checks {
            ctx.routes.unset_transaction(cc.transaction_id(), self.id);
        }
        self.frozen.clear();
        self.waiting.clear();
        self.in_progress.clear();
        self.succeeded.clear();
        self.failed.clear();
        self.triggered_check_queue.clear();
        self.valid_list.clear();
        self.nominating = None;
        self.nominated = None;
        self.nominated_is_live = false;
        self.connectivity_checks.clear();
    }

    pub(crate) fn compute_active_foundations(&self, active: &mut crate::agent::ActiveFoundationSet) {
        for cp in self.waiting.iter().chain(self.in_progress.iter()) {
            active.add(&cp.foundation);
        }
    }

    pub(crate) fn check_invariants(&self) {
        debug_assert!(self.valid_list.iter().all(|cp| cp.use_candidate));
        debug_assert_eq!(self.in_progress.len(), self.connectivity_checks.len());
        debug_assert!(self
            .triggered_check_queue
            .iter()
            .all(|cp| self.waiting.contains(cp)));
        if self.nominated.is_some() {
            debug_assert!(self.frozen.is_empty());
            debug_assert!(self.waiting.is_empty());
            debug_assert!(self.triggered_check_queue.is_empty());
            debug_assert!(self.in_progress.is_empty());
            debug_assert!(self.connectivity_checks.is_empty());
        }
    }

    #[cfg(test)]
    pub(crate) fn counts(&self) -> BucketCounts {
        BucketCounts {
            frozen: self.frozen.len(),
            waiting: self.waiting.len(),
            in_progress: self.in_progress.len(),
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            triggered: self.triggered_check_queue.len(),
            checks: self.connectivity_checks.len(),
        }
    }
}

#[cfg(test)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketCounts {
    pub(crate) frozen: usize,
    pub(crate) waiting: usize,
    pub(crate) in_progress: usize,
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
    pub(crate) triggered: usize,
    pub(crate) checks: usize,
}
