// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A UDP socket whose paths are selected by an [`Agent`]
//!
//! STUN traffic arriving on the socket is handed to the agent, everything else is passed on to
//! the application.  Messages the agent wants to send are queued and written by
//! [`UdpEndpoint::run`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_std::net::UdpSocket;

use futures::future::Either;
use futures_timer::Delay;
use tracing_futures::Instrument;

use crate::agent::{Agent, AgentError};
use crate::endpoint::{Endpoint, GuidPair, GuidSet};
use crate::gathering::addresses_for;
use crate::stun::message::Message;
use crate::EndpointId;

const MAX_DATAGRAM_SIZE: usize = 65536;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Path changes reported by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceEvent {
    Connected { guids: GuidSet, address: SocketAddr },
    Disconnected { guids: GuidSet },
}

/// Fan out values to any number of receivers.  Receivers that were dropped are forgotten on the
/// next broadcast.
#[derive(Debug)]
pub struct ChannelBroadcast<T: std::fmt::Debug> {
    senders: Mutex<Vec<async_channel::Sender<T>>>,
}

impl<T> Default for ChannelBroadcast<T>
where
    T: std::fmt::Debug,
{
    fn default() -> Self {
        Self {
            senders: Mutex::new(vec![]),
        }
    }
}

impl<T> ChannelBroadcast<T>
where
    T: Clone + std::fmt::Debug,
{
    pub fn channel(&self) -> async_channel::Receiver<T> {
        let (send, recv) = async_channel::unbounded();
        lock(&self.senders).push(send);
        recv
    }

    /// Never blocks
    pub fn broadcast(&self, data: T) {
        let mut senders = lock(&self.senders);
        trace!("sending to {} receivers", senders.len());
        senders.retain(|sender| sender.try_send(data.clone()).is_ok());
    }

    pub fn receiver_count(&self) -> usize {
        lock(&self.senders).len()
    }
}

/// An [`Endpoint`] on top of an async-std [`UdpSocket`]
#[derive(Derivative)]
#[derivative(Debug)]
pub struct UdpEndpoint {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    host_addresses: Mutex<Vec<SocketAddr>>,
    stun_server: Mutex<Option<SocketAddr>>,
    #[derivative(Debug = "ignore")]
    send_queue: async_channel::Sender<(SocketAddr, Vec<u8>)>,
    #[derivative(Debug = "ignore")]
    send_receiver: async_channel::Receiver<(SocketAddr, Vec<u8>)>,
    connections: Mutex<HashMap<GuidPair, SocketAddr>>,
    events: ChannelBroadcast<IceEvent>,
}

impl UdpEndpoint {
    pub async fn bind(addr: SocketAddr) -> Result<Arc<Self>, AgentError> {
        let socket = UdpSocket::bind(addr).await?;
        Self::from_socket(socket)
    }

    pub fn from_socket(socket: UdpSocket) -> Result<Arc<Self>, AgentError> {
        let local_addr = socket.local_addr()?;
        let host_addresses = addresses_for(local_addr)?;
        info!(
            "udp endpoint on {} with host addresses {:?}",
            local_addr, host_addresses
        );
        let (send_queue, send_receiver) = async_channel::unbounded();
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            local_addr,
            host_addresses: Mutex::new(host_addresses),
            stun_server: Mutex::new(None),
            send_queue,
            send_receiver,
            connections: Mutex::new(HashMap::new()),
            events: ChannelBroadcast::default(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Takes effect the next time the agent refreshes the server reflexive address
    pub fn set_stun_server_address(&self, server: Option<SocketAddr>) {
        *lock(&self.stun_server) = server;
    }

    /// Query the interfaces again.  Returns whether the host addresses changed, in which case
    /// [`Agent::network_change`] should be called.
    pub fn refresh_host_addresses(&self) -> Result<bool, AgentError> {
        let addresses = addresses_for(self.local_addr)?;
        let mut current = lock(&self.host_addresses);
        if *current == addresses {
            return Ok(false);
        }
        info!("host addresses changed to {:?}", addresses);
        *current = addresses;
        Ok(true)
    }

    /// A stream of the connect and disconnect notifications for this endpoint
    pub fn subscribe(&self) -> async_channel::Receiver<IceEvent> {
        self.events.channel()
    }

    /// The remote address currently selected for `guid_pair`
    pub fn connected_address(&self, guid_pair: &GuidPair) -> Option<SocketAddr> {
        lock(&self.connections).get(guid_pair).copied()
    }

    /// Send application data
    pub async fn send_data(&self, to: SocketAddr, data: &[u8]) -> Result<(), AgentError> {
        self.socket.send_to(data, to).await?;
        Ok(())
    }

    // A wildcard bind cannot tell which interface a datagram arrived on.  Use the first host
    // address of the sender's family.
    fn receive_address(&self, from: SocketAddr) -> SocketAddr {
        if !self.local_addr.ip().is_unspecified() {
            return self.local_addr;
        }
        lock(&self.host_addresses)
            .iter()
            .find(|addr| addr.is_ipv4() == from.is_ipv4())
            .copied()
            .unwrap_or(self.local_addr)
    }

    async fn send_loop(&self) -> Result<(), AgentError> {
        while let Ok((to, data)) = self.send_receiver.recv().await {
            trace!("sending {} bytes to {}", data.len(), to);
            if let Err(e) = self.socket.send_to(&data, to).await {
                warn!("failed to send to {}: {}", to, e);
            }
        }
        Ok(())
    }

    async fn receive_loop(
        &self,
        agent: &Agent,
        id: EndpointId,
        data_sender: &async_channel::Sender<(Vec<u8>, SocketAddr)>,
    ) -> Result<(), AgentError> {
        let mut buf = vec![0; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            let data = &buf[..len];
            trace!("got {} bytes from {}", len, from);
            match Message::from_bytes(data) {
                Ok(msg) => {
                    let local = self.receive_address(from);
                    if let Err(e) = agent.receive(id, local, from, &msg, Instant::now()) {
                        warn!("agent failed to handle message from {}: {}", from, e);
                    }
                }
                Err(_) => {
                    if data_sender.send((data.to_vec(), from)).await.is_err() {
                        debug!("data receiver closed");
                        return Err(AgentError::ConnectionClosed);
                    }
                }
            }
        }
    }

    /// Write queued STUN messages and read from the socket until the socket fails or
    /// `data_sender` is closed.  Datagrams that are not STUN are sent to `data_sender`.
    pub async fn run(
        self: Arc<Self>,
        agent: Agent,
        id: EndpointId,
        data_sender: async_channel::Sender<(Vec<u8>, SocketAddr)>,
    ) -> Result<(), AgentError> {
        let span = debug_span!("udp_endpoint", id = %id, local = %self.local_addr);
        let send = self.send_loop();
        let receive = self.receive_loop(&agent, id, &data_sender);
        futures::pin_mut!(send);
        futures::pin_mut!(receive);
        let ret = match futures::future::select(send, receive)
            .instrument(span)
            .await
        {
            Either::Left((ret, _)) => ret,
            Either::Right((ret, _)) => ret,
        };
        debug!("udp endpoint {} exited: {:?}", id, ret);
        ret
    }
}

impl Endpoint for UdpEndpoint {
    fn host_addresses(&self) -> Vec<SocketAddr> {
        lock(&self.host_addresses).clone()
    }

    fn stun_server_address(&self) -> Option<SocketAddr> {
        *lock(&self.stun_server)
    }

    fn send(&self, destination: SocketAddr, message: &Message) {
        if self
            .send_queue
            .try_send((destination, message.to_bytes()))
            .is_err()
        {
            warn!("send queue closed, dropping message to {}", destination);
        }
    }

    fn ice_connect(&self, guids: &GuidSet, address: SocketAddr) {
        {
            let mut connections = lock(&self.connections);
            for guid_pair in guids {
                connections.insert(*guid_pair, address);
            }
        }
        self.events.broadcast(IceEvent::Connected {
            guids: guids.clone(),
            address,
        });
    }

    fn ice_disconnect(&self, guids: &GuidSet) {
        {
            let mut connections = lock(&self.connections);
            for guid_pair in guids {
                connections.remove(guid_pair);
            }
        }
        self.events.broadcast(IceEvent::Disconnected {
            guids: guids.clone(),
        });
    }
}

/// Run the scheduled work of `agent` forever
pub async fn drive(agent: Agent) {
    let t_a = agent.configuration().t_a();
    async move {
        loop {
            let now = Instant::now();
            let next = agent.handle_timeout(now).unwrap_or(now + t_a);
            Delay::new(next.saturating_duration_since(Instant::now())).await;
        }
    }
    .instrument(debug_span!("agent_driver"))
    .await
}
