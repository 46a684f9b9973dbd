// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! STUN (RFC 5389) messages and the attributes used by ICE (RFC 8445)

use std::error::Error;
use std::fmt::Display;

pub mod attribute;
pub mod message;
pub mod server;

/// Errors produced while parsing or building STUN messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunError {
    /// Fewer bytes than the header or an attribute requires
    NotEnoughData,
    /// The data does not look like a STUN message at all
    NotStun,
    /// The data is STUN but violates the wire format
    Malformed,
    /// An attribute value has a length that its type does not allow
    InvalidLength,
    /// A value does not fit in the wire representation
    TooBig,
    /// The FINGERPRINT attribute does not match the message
    FingerprintMismatch,
    /// MESSAGE-INTEGRITY could not be verified with the provided password
    IntegrityCheckFailed,
    /// The attribute cannot be added because it (or a trailing attribute) already exists
    AlreadyExists,
    /// The attribute must be added through a dedicated function
    WrongImplementation,
}

impl Error for StunError {}

impl Display for StunError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
