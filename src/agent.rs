// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use crate::candidate::{AgentInfo, FoundationType};
use crate::config::Configuration;
use crate::endpoint::{AgentInfoListener, Endpoint, Guid, GuidPair};
use crate::manager::{EndpointEvent, EndpointId, EndpointManager};
use crate::stun::message::Message;
use crate::stun::StunError;
use crate::tasks::{Task, TaskQueue};

#[derive(Debug)]
pub enum AgentError {
    AlreadyExists,
    ResourceNotFound,
    Malformed,
    NotStun,
    ConnectionClosed,
    IoError(std::io::Error),
}

impl Error for AgentError {}

impl Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e)
    }
}

impl From<StunError> for AgentError {
    fn from(e: StunError) -> Self {
        match e {
            StunError::NotStun => Self::NotStun,
            _ => Self::Malformed,
        }
    }
}

/// Reference counted set of the foundations with a pair in waiting or in progress
#[derive(Debug, Default, Clone)]
pub(crate) struct ActiveFoundationSet {
    map: HashMap<FoundationType, usize>,
    released: bool,
}

impl ActiveFoundationSet {
    pub(crate) fn add(&mut self, foundation: &FoundationType) {
        *self.map.entry(foundation.clone()).or_insert(0) += 1;
    }

    /// Returns whether the foundation is no longer active
    pub(crate) fn remove(&mut self, foundation: &FoundationType) -> bool {
        match self.map.get_mut(foundation) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.map.remove(foundation);
                self.released = true;
                true
            }
            None => {
                debug_assert!(false, "removing inactive foundation {:?}", foundation);
                false
            }
        }
    }

    pub(crate) fn contains(&self, foundation: &FoundationType) -> bool {
        self.map.contains_key(foundation)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    // whether any foundation became inactive since the last call
    fn take_released(&mut self) -> bool {
        std::mem::take(&mut self.released)
    }
}

/// State shared by every checklist of an agent
#[derive(Debug)]
pub(crate) struct AgentState {
    pub(crate) config: Configuration,
    pub(crate) foundations: ActiveFoundationSet,
    remote_peer_reflexive_counter: usize,
    pub(crate) deferred_unfreezes: Vec<FoundationType>,
    pub(crate) wakeups: Vec<(Task, Instant)>,
}

impl AgentState {
    pub(crate) fn new(config: Configuration) -> Self {
        Self {
            config,
            foundations: ActiveFoundationSet::default(),
            remote_peer_reflexive_counter: 0,
            deferred_unfreezes: vec![],
            wakeups: vec![],
        }
    }

    /// The first remote peer reflexive candidate is numbered 1
    pub(crate) fn next_remote_peer_reflexive_counter(&mut self) -> usize {
        self.remote_peer_reflexive_counter += 1;
        self.remote_peer_reflexive_counter
    }
}

type Dispatch = Vec<(Arc<dyn Endpoint>, Vec<EndpointEvent>)>;

#[derive(Debug)]
pub(crate) struct AgentInner {
    state: AgentState,
    managers: BTreeMap<EndpointId, EndpointManager>,
    tasks: TaskQueue,
    next_endpoint_id: usize,
}

impl AgentInner {
    fn new(config: Configuration) -> Self {
        Self {
            state: AgentState::new(config),
            managers: BTreeMap::new(),
            tasks: TaskQueue::new(),
            next_endpoint_id: 0,
        }
    }

    fn with_manager<R>(
        &mut self,
        id: EndpointId,
        dispatch: &mut Dispatch,
        f: impl FnOnce(&mut EndpointManager, &mut AgentState, &mut Vec<EndpointEvent>) -> R,
    ) -> Result<R, AgentError> {
        let manager = self
            .managers
            .get_mut(&id)
            .ok_or(AgentError::ResourceNotFound)?;
        let mut events = vec![];
        let ret = f(manager, &mut self.state, &mut events);
        if !events.is_empty() {
            dispatch.push((manager.endpoint().clone(), events));
        }
        Ok(ret)
    }

    fn execute(&mut self, task: Task, dispatch: &mut Dispatch, now: Instant) {
        trace!("executing {:?}", task);
        let next = match task {
            Task::ServerReflexive(id) => self
                .with_manager(id, dispatch, |manager, state, events| {
                    Some(manager.server_reflexive_task(state, events, now))
                }),
            Task::ChangePassword(id) => self
                .with_manager(id, dispatch, |manager, state, events| {
                    Some(manager.change_password_task(state, events, now))
                }),
            Task::Checklist(id, checklist) => {
                self.with_manager(id, dispatch, |manager, state, events| {
                    manager.execute_checklist(checklist, state, events, now)
                })
            }
        };
        if let Ok(Some(next)) = next {
            self.tasks.enqueue(task, next);
        }
    }

    // fan out the unfreezes and wakeups collected by the last operation
    fn process_deferred(&mut self, dispatch: &mut Dispatch, now: Instant) {
        loop {
            for (task, release_time) in self.state.wakeups.drain(..) {
                // removed endpoints leave wakeups for their checklists behind
                if self.managers.contains_key(&task.endpoint()) {
                    self.tasks.enqueue(task, release_time);
                }
            }

            let unfreezes = std::mem::take(&mut self.state.deferred_unfreezes);
            let released = self.state.foundations.take_released();
            if unfreezes.is_empty() && !released {
                break;
            }

            let ids: Vec<EndpointId> = self.managers.keys().copied().collect();
            for id in ids {
                let _ = self.with_manager(id, dispatch, |manager, state, events| {
                    for foundation in &unfreezes {
                        manager.unfreeze_foundation(foundation, state, events, now);
                    }
                    if released {
                        manager.unfreeze(state, events, now);
                    }
                });
            }
        }

        if cfg!(debug_assertions) {
            self.check_invariants();
        }
    }

    fn check_invariants(&self) {
        let mut expected = ActiveFoundationSet::default();
        for manager in self.managers.values() {
            manager.compute_active_foundations(&mut expected);
            manager.check_invariants();
        }
        debug_assert_eq!(expected.map, self.state.foundations.map);
    }
}

fn perform(dispatch: Dispatch) {
    for (endpoint, events) in dispatch {
        for event in events {
            match event {
                EndpointEvent::Send(destination, msg) => endpoint.send(destination, &msg),
                EndpointEvent::Connect(guids, address) => endpoint.ice_connect(&guids, address),
                EndpointEvent::Disconnect(guids) => endpoint.ice_disconnect(&guids),
                EndpointEvent::AgentInfo(listeners, agent_info) => {
                    for (guid, listener) in listeners {
                        if let Some(listener) = listener.upgrade() {
                            listener.update_agent_info(&guid, &agent_info);
                        }
                    }
                }
            }
        }
    }
}

/// An ICE agent establishing paths for any number of [`Endpoint`]s.
///
/// The agent does not own a timer.  The caller drives it by calling
/// [`handle_timeout`](Agent::handle_timeout) at the returned deadlines.  Calls into
/// [`Endpoint`]s and [`AgentInfoListener`]s happen after the internal lock is released, from
/// the thread that called into the agent.
#[derive(Debug, Clone)]
pub struct Agent {
    inner: Arc<Mutex<AgentInner>>,
}

impl Default for Agent {
    fn default() -> Self {
        Agent::new(Configuration::default())
    }
}

impl Agent {
    pub fn new(config: Configuration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AgentInner::new(config))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AgentInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // run `f` under the lock, fan out deferred work and perform the side effects once unlocked
    fn with_inner<R>(
        &self,
        now: Instant,
        f: impl FnOnce(&mut AgentInner, &mut Dispatch) -> Result<R, AgentError>,
    ) -> Result<R, AgentError> {
        let mut pending = vec![];
        let ret = {
            let mut inner = self.lock();
            let ret = f(&mut inner, &mut pending);
            inner.process_deferred(&mut pending, now);
            ret
        };
        perform(pending);
        ret
    }

    pub fn configuration(&self) -> Configuration {
        self.lock().state.config.clone()
    }

    /// Start gathering for `endpoint`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::net::SocketAddr;
    /// # use std::sync::Arc;
    /// # use std::time::Instant;
    /// # use rtps_ice::agent::Agent;
    /// # use rtps_ice::endpoint::{Endpoint, GuidSet};
    /// # use rtps_ice::stun::message::Message;
    /// struct Socket;
    /// impl Endpoint for Socket {
    ///     fn host_addresses(&self) -> Vec<SocketAddr> {
    ///         vec!["192.168.1.2:7400".parse().unwrap()]
    ///     }
    ///     fn stun_server_address(&self) -> Option<SocketAddr> { None }
    ///     fn send(&self, _to: SocketAddr, _msg: &Message) {}
    ///     fn ice_connect(&self, _guids: &GuidSet, _addr: SocketAddr) {}
    ///     fn ice_disconnect(&self, _guids: &GuidSet) {}
    /// }
    ///
    /// let agent = Agent::default();
    /// let endpoint: Arc<dyn Endpoint> = Arc::new(Socket);
    /// let id = agent.add_endpoint(endpoint.clone(), Instant::now()).unwrap();
    /// assert!(agent.add_endpoint(endpoint, Instant::now()).is_err());
    /// let info = agent.get_local_agent_info(id).unwrap();
    /// assert_eq!(info.candidates.len(), 1);
    /// ```
    #[tracing::instrument(level = "debug", skip(self, endpoint))]
    pub fn add_endpoint(&self, endpoint: Arc<dyn Endpoint>, now: Instant) -> Result<EndpointId, AgentError> {
        self.with_inner(now, |inner, dispatch| {
            let exists = inner.managers.values().any(|manager| {
                Arc::as_ptr(manager.endpoint()) as *const () == Arc::as_ptr(&endpoint) as *const ()
            });
            if exists {
                return Err(AgentError::AlreadyExists);
            }

            let id = EndpointId(inner.next_endpoint_id);
            inner.next_endpoint_id += 1;
            let mut events = vec![];
            let manager =
                EndpointManager::new(id, endpoint.clone(), &mut inner.state, &mut events, now);
            dispatch.push((endpoint, events));
            inner.managers.insert(id, manager);
            inner.tasks.enqueue(Task::ServerReflexive(id), now);
            inner.tasks.enqueue(
                Task::ChangePassword(id),
                now + inner.state.config.change_password_period(),
            );
            info!("added endpoint {}", id);
            Ok(id)
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn remove_endpoint(&self, id: EndpointId, now: Instant) -> Result<(), AgentError> {
        self.with_inner(now, |inner, dispatch| {
            inner.with_manager(id, dispatch, |manager, state, events| {
                manager.schedule_for_destruction(state, events, now)
            })?;
            inner.managers.remove(&id);
            inner.tasks.cancel_endpoint(id);
            info!("removed endpoint {}", id);
            Ok(())
        })
    }

    pub fn get_local_agent_info(&self, id: EndpointId) -> Result<AgentInfo, AgentError> {
        self.lock()
            .managers
            .get(&id)
            .map(|manager| manager.agent_info().clone())
            .ok_or(AgentError::ResourceNotFound)
    }

    /// `listener` is told about every change of the local agent info of `id`
    pub fn add_local_agent_info_listener(
        &self,
        id: EndpointId,
        local_guid: Guid,
        listener: Weak<dyn AgentInfoListener>,
    ) -> Result<(), AgentError> {
        self.lock()
            .managers
            .get_mut(&id)
            .ok_or(AgentError::ResourceNotFound)?
            .add_agent_info_listener(local_guid, listener);
        Ok(())
    }

    pub fn remove_local_agent_info_listener(
        &self,
        id: EndpointId,
        local_guid: &Guid,
    ) -> Result<(), AgentError> {
        if self
            .lock()
            .managers
            .get_mut(&id)
            .ok_or(AgentError::ResourceNotFound)?
            .remove_agent_info_listener(local_guid)
        {
            Ok(())
        } else {
            Err(AgentError::ResourceNotFound)
        }
    }

    /// Establish a path from `local_guid` to `remote_guid` described by `remote_agent_info`
    #[tracing::instrument(level = "debug", skip(self, remote_agent_info))]
    pub fn start_ice(
        &self,
        id: EndpointId,
        local_guid: Guid,
        remote_guid: Guid,
        remote_agent_info: &AgentInfo,
        now: Instant,
    ) -> Result<(), AgentError> {
        self.with_inner(now, |inner, dispatch| {
            inner.with_manager(id, dispatch, |manager, state, events| {
                manager.start_ice(
                    GuidPair::new(local_guid, remote_guid),
                    remote_agent_info,
                    state,
                    events,
                    now,
                )
            })
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn stop_ice(
        &self,
        id: EndpointId,
        local_guid: Guid,
        remote_guid: Guid,
        now: Instant,
    ) -> Result<(), AgentError> {
        self.with_inner(now, |inner, dispatch| {
            inner.with_manager(id, dispatch, |manager, state, events| {
                manager.stop_ice(GuidPair::new(local_guid, remote_guid), state, events, now)
            })
        })
    }

    /// The remote address selected for `remote_guid` while the path is live
    pub fn get_address(&self, id: EndpointId, local_guid: Guid, remote_guid: Guid) -> Option<SocketAddr> {
        self.lock()
            .managers
            .get(&id)?
            .get_address(GuidPair::new(local_guid, remote_guid))
    }

    /// Process a STUN message received by endpoint `id` on `local_address` from `remote_address`
    #[tracing::instrument(level = "trace", skip(self, msg))]
    pub fn receive(
        &self,
        id: EndpointId,
        local_address: SocketAddr,
        remote_address: SocketAddr,
        msg: &Message,
        now: Instant,
    ) -> Result<(), AgentError> {
        self.with_inner(now, |inner, dispatch| {
            inner.with_manager(id, dispatch, |manager, state, events| {
                manager.receive(local_address, remote_address, msg, state, events, now)
            })
        })
    }

    /// Parse and process a datagram.  Fails with [`AgentError::NotStun`] for non STUN data.
    pub fn receive_data(
        &self,
        id: EndpointId,
        local_address: SocketAddr,
        remote_address: SocketAddr,
        data: &[u8],
        now: Instant,
    ) -> Result<(), AgentError> {
        let msg = Message::from_bytes(data)?;
        self.receive(id, local_address, remote_address, &msg, now)
    }

    /// The host addresses of endpoint `id` may have changed
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn network_change(&self, id: EndpointId, now: Instant) -> Result<(), AgentError> {
        self.with_inner(now, |inner, dispatch| {
            inner.with_manager(id, dispatch, |manager, state, events| {
                manager.network_change(state, events, now)
            })
        })
    }

    /// Remove every endpoint and forget all scheduled work
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn shutdown(&self, now: Instant) {
        let _ = self.with_inner(now, |inner, dispatch| {
            let ids: Vec<EndpointId> = inner.managers.keys().copied().collect();
            for id in ids {
                let _ = inner.with_manager(id, dispatch, |manager, state, events| {
                    manager.schedule_for_destruction(state, events, now)
                });
            }
            inner.managers.clear();
            inner.tasks.clear();
            inner.state.wakeups.clear();
            inner.state.deferred_unfreezes.clear();
            info!("shut down");
            Ok(())
        });
    }

    /// When [`handle_timeout`](Agent::handle_timeout) should be called next
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().tasks.next_release_time()
    }

    /// Run the earliest task if it is due.  Returns the next deadline, at least T_a from `now`.
    pub fn handle_timeout(&self, now: Instant) -> Option<Instant> {
        let ret = self.with_inner(now, |inner, dispatch| {
            if let Some(task) = inner.tasks.pop_due(now) {
                inner.execute(task, dispatch, now);
            }
            Ok(())
        });
        debug_assert!(ret.is_ok());

        let mut inner = self.lock();
        let t_a = inner.state.config.t_a();
        inner
            .tasks
            .next_release_time()
            .map(|next| next.max(now + t_a))
    }
}
