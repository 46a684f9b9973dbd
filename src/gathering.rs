// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Discovery of the local addresses a socket can be reached on

use std::net::SocketAddr;

use get_if_addrs::get_if_addrs;

use crate::agent::AgentError;

/// Every non-loopback interface address combined with `port`
pub fn host_addresses(port: u16) -> Result<Vec<SocketAddr>, AgentError> {
    let mut ifaces = get_if_addrs()?;
    // loopback addresses are never candidates
    // TODO: remove deprecated IPv4-compatible and site-local IPv6 addresses
    ifaces.retain(|e| !e.is_loopback());

    Ok(ifaces
        .iter()
        .inspect(|iface| {
            debug!("found interface {} address {:?}", iface.name, iface.ip());
        })
        .map(|iface| SocketAddr::new(iface.ip(), port))
        .collect())
}

/// The host addresses of a socket bound to `local`.
///
/// A wildcard bind expands to the interface addresses of the same family.  Loopback binds have
/// no host addresses.
pub fn addresses_for(local: SocketAddr) -> Result<Vec<SocketAddr>, AgentError> {
    if local.ip().is_loopback() {
        return Ok(vec![]);
    }
    if !local.ip().is_unspecified() {
        return Ok(vec![local]);
    }
    let mut addresses = host_addresses(local.port())?;
    addresses.retain(|addr| addr.is_ipv4() == local.is_ipv4());
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        crate::tests::test_init_log();
    }

    #[test]
    fn no_loopback() {
        init();
        let addresses = host_addresses(7400).unwrap();
        assert!(addresses.iter().all(|addr| !addr.ip().is_loopback()));
        assert!(addresses.iter().all(|addr| addr.port() == 7400));
    }

    #[test]
    fn specific_bind() {
        init();
        let local: SocketAddr = "192.168.1.2:7400".parse().unwrap();
        assert_eq!(addresses_for(local).unwrap(), vec![local]);
        assert!(addresses_for("127.0.0.1:7400".parse().unwrap())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn wildcard_bind() {
        init();
        let addresses = addresses_for("0.0.0.0:7410".parse().unwrap()).unwrap();
        assert!(addresses
            .iter()
            .all(|addr| addr.is_ipv4() && addr.port() == 7410));
    }
}
