// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

use rtps_ice::agent::Agent;
use rtps_ice::candidate::AgentInfo;
use rtps_ice::config::Configuration;
use rtps_ice::endpoint::*;
use rtps_ice::stun::message::{Message, MessageClass};
use rtps_ice::stun::server;
use rtps_ice::EndpointId;

static TRACING: Lazy<()> = Lazy::new(|| {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    }
});

pub fn debug_init() {
    Lazy::force(&TRACING);
}

pub fn guid(n: u8) -> Guid {
    Guid([n; 16])
}

/// An endpoint that records everything the agent asks of it
#[derive(Debug, Default)]
pub struct MockEndpoint {
    addresses: Mutex<Vec<SocketAddr>>,
    stun_server: Mutex<Option<SocketAddr>>,
    outbox: Mutex<Vec<(SocketAddr, Message)>>,
    connects: Mutex<Vec<(GuidSet, SocketAddr)>>,
    disconnects: Mutex<Vec<GuidSet>>,
}

impl MockEndpoint {
    pub fn new(address: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            addresses: Mutex::new(vec![address]),
            ..Default::default()
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.addresses.lock().unwrap()[0]
    }

    pub fn set_address(&self, address: SocketAddr) {
        *self.addresses.lock().unwrap() = vec![address];
    }

    pub fn set_stun_server(&self, server: Option<SocketAddr>) {
        *self.stun_server.lock().unwrap() = server;
    }

    pub fn connects(&self) -> Vec<(GuidSet, SocketAddr)> {
        self.connects.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> Vec<GuidSet> {
        self.disconnects.lock().unwrap().clone()
    }

    fn take_outbox(&self) -> Vec<(SocketAddr, Message)> {
        std::mem::take(&mut *self.outbox.lock().unwrap())
    }
}

impl Endpoint for MockEndpoint {
    fn host_addresses(&self) -> Vec<SocketAddr> {
        self.addresses.lock().unwrap().clone()
    }

    fn stun_server_address(&self) -> Option<SocketAddr> {
        *self.stun_server.lock().unwrap()
    }

    fn send(&self, destination: SocketAddr, message: &Message) {
        self.outbox
            .lock()
            .unwrap()
            .push((destination, message.clone()));
    }

    fn ice_connect(&self, guids: &GuidSet, address: SocketAddr) {
        self.connects.lock().unwrap().push((guids.clone(), address));
    }

    fn ice_disconnect(&self, guids: &GuidSet) {
        self.disconnects.lock().unwrap().push(guids.clone());
    }
}

#[derive(Debug, Default)]
pub struct RecordingListener {
    infos: Mutex<Vec<AgentInfo>>,
}

impl RecordingListener {
    pub fn infos(&self) -> Vec<AgentInfo> {
        self.infos.lock().unwrap().clone()
    }
}

impl AgentInfoListener for RecordingListener {
    fn update_agent_info(&self, _local_guid: &Guid, agent_info: &AgentInfo) {
        self.infos.lock().unwrap().push(agent_info.clone());
    }
}

#[derive(Debug, Clone)]
pub struct Datagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub msg: Message,
}

pub struct Node {
    pub agent: Agent,
    pub endpoint: Arc<MockEndpoint>,
    pub id: EndpointId,
}

/// Agents exchanging STUN messages in memory, driven by a manual clock
pub struct Network {
    pub nodes: Vec<Node>,
    pub now: Instant,
    tick: Duration,
    drop_filter: Option<Box<dyn FnMut(&Datagram) -> bool>>,
    stun_server: Option<SocketAddr>,
    // the address the STUN server observes for a host address
    nat: HashMap<SocketAddr, SocketAddr>,
    pub stun_log: Vec<(SocketAddr, MessageClass)>,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            nodes: vec![],
            now: Instant::now(),
            tick: Duration::from_millis(50),
            drop_filter: None,
            stun_server: None,
            nat: HashMap::new(),
            stun_log: vec![],
        }
    }
}

impl Network {
    pub fn add_node(&mut self, config: Configuration, address: &str) -> usize {
        let agent = Agent::new(config);
        let endpoint = MockEndpoint::new(address.parse().unwrap());
        endpoint.set_stun_server(self.stun_server);
        let id = agent.add_endpoint(endpoint.clone(), self.now).unwrap();
        self.nodes.push(Node {
            agent,
            endpoint,
            id,
        });
        self.nodes.len() - 1
    }

    pub fn set_drop_filter(&mut self, filter: impl FnMut(&Datagram) -> bool + 'static) {
        self.drop_filter = Some(Box::new(filter));
    }

    /// Must be called before adding nodes
    pub fn set_stun_server(&mut self, server: &str) {
        self.stun_server = Some(server.parse().unwrap());
    }

    pub fn add_nat_mapping(&mut self, private: &str, public: &str) {
        self.nat
            .insert(private.parse().unwrap(), public.parse().unwrap());
    }

    pub fn agent_info(&self, node: usize) -> AgentInfo {
        let node = &self.nodes[node];
        node.agent.get_local_agent_info(node.id).unwrap()
    }

    /// Start ICE from `local_guid` on `local` to `remote_guid` on `remote` with the current agent
    /// info of `remote`
    pub fn start_ice(&self, local: usize, local_guid: Guid, remote: usize, remote_guid: Guid) {
        let info = self.agent_info(remote);
        self.start_ice_with(local, local_guid, remote_guid, &info);
    }

    pub fn start_ice_with(&self, local: usize, local_guid: Guid, remote_guid: Guid, info: &AgentInfo) {
        let node = &self.nodes[local];
        node.agent
            .start_ice(node.id, local_guid, remote_guid, info, self.now)
            .unwrap();
    }

    pub fn get_address(&self, local: usize, local_guid: Guid, remote_guid: Guid) -> Option<SocketAddr> {
        let node = &self.nodes[local];
        node.agent.get_address(node.id, local_guid, remote_guid)
    }

    fn node_for(&self, address: SocketAddr) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| node.endpoint.host_addresses().contains(&address))
    }

    /// Pass messages around until nobody has anything more to send
    pub fn deliver(&mut self) {
        for _ in 0..1000 {
            let mut datagrams = vec![];
            for node in &self.nodes {
                let from = node.endpoint.address();
                for (to, msg) in node.endpoint.take_outbox() {
                    datagrams.push(Datagram { from, to, msg });
                }
            }
            if datagrams.is_empty() {
                return;
            }

            for datagram in datagrams {
                if let Some(filter) = self.drop_filter.as_mut() {
                    if filter(&datagram) {
                        continue;
                    }
                }

                if Some(datagram.to) == self.stun_server {
                    self.stun_log.push((datagram.from, datagram.msg.class()));
                    let observed = self
                        .nat
                        .get(&datagram.from)
                        .copied()
                        .unwrap_or(datagram.from);
                    if let Some(response) = server::handle_message(&datagram.msg, observed).unwrap() {
                        if let Some(node) = self.node_for(datagram.from) {
                            let node = &self.nodes[node];
                            node.agent
                                .receive(node.id, datagram.from, datagram.to, &response, self.now)
                                .unwrap();
                        }
                    }
                    continue;
                }

                if let Some(node) = self.node_for(datagram.to) {
                    let node = &self.nodes[node];
                    node.agent
                        .receive(node.id, datagram.to, datagram.from, &datagram.msg, self.now)
                        .unwrap();
                }
            }
        }
        panic!("messages kept flowing");
    }

    /// Run every due task and deliver the resulting messages
    pub fn step(&mut self) {
        loop {
            let mut ran = false;
            for node in &self.nodes {
                if node
                    .agent
                    .next_deadline()
                    .map_or(false, |deadline| deadline <= self.now)
                {
                    node.agent.handle_timeout(self.now);
                    ran = true;
                }
            }
            self.deliver();
            if !ran {
                break;
            }
        }
    }

    pub fn advance(&mut self, duration: Duration) {
        let end = self.now + duration;
        while self.now < end {
            self.step();
            self.now += self.tick;
        }
        self.step();
    }

    /// Advance time until `cond` holds.  Returns false on timeout.
    pub fn run_until(&mut self, timeout: Duration, mut cond: impl FnMut(&Network) -> bool) -> bool {
        let end = self.now + timeout;
        loop {
            self.step();
            if cond(self) {
                return true;
            }
            if self.now >= end {
                return false;
            }
            self.now += self.tick;
        }
    }
}
