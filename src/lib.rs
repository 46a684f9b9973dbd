// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! An ICE (RFC 8445) agent establishing paths between RTPS participants.
//!
//! An [`Agent`](agent::Agent) manages any number of [`Endpoint`](endpoint::Endpoint)s.  For
//! every remote agent an endpoint talks to, connectivity checks run over all candidate pairs
//! until one pair is nominated, after which binding indications keep it alive.

#[macro_use]
extern crate tracing;

#[macro_use]
extern crate derivative;

pub mod agent;
pub mod candidate;
pub mod config;
mod conncheck;
pub mod endpoint;
pub mod gathering;
mod manager;
pub mod socket;
pub mod stun;
mod tasks;

pub use manager::EndpointId;
