// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::SocketAddr;

use async_std::net::UdpSocket;
use async_std::task;

use tracing_subscriber::EnvFilter;

use rtps_ice::agent::AgentError;
use rtps_ice::stun::server;

const DEFAULT_ADDRESS: &str = "0.0.0.0:3478";

fn main() -> Result<(), AgentError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or(DEFAULT_ADDRESS)
        .parse()
        .map_err(|_| AgentError::Malformed)?;

    task::block_on(async move {
        let socket = UdpSocket::bind(addr).await?;
        server::serve(socket).await
    })
}
