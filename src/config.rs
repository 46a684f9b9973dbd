// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::time::Duration;

/// Timing parameters of an [`Agent`](crate::agent::Agent)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    t_a: Duration,
    connectivity_check_ttl: Duration,
    checklist_period: Duration,
    indication_period: Duration,
    nominated_ttl: Duration,
    server_reflexive_address_period: Duration,
    server_reflexive_indication_count: usize,
    deferred_triggered_check_ttl: Duration,
    change_password_period: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            t_a: Duration::from_millis(50),
            connectivity_check_ttl: Duration::from_secs(5 * 60),
            checklist_period: Duration::from_secs(10),
            indication_period: Duration::from_secs(15),
            nominated_ttl: Duration::from_secs(5 * 60),
            server_reflexive_address_period: Duration::from_secs(30),
            server_reflexive_indication_count: 10,
            deferred_triggered_check_ttl: Duration::from_secs(5 * 60),
            change_password_period: Duration::from_secs(5 * 60),
        }
    }
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder {
            config: Configuration::default(),
        }
    }

    /// Minimum interval between two transmissions of the agent (RFC 8445 14.2)
    pub fn t_a(&self) -> Duration {
        self.t_a
    }

    /// How long a connectivity check is retransmitted before it fails
    pub fn connectivity_check_ttl(&self) -> Duration {
        self.connectivity_check_ttl
    }

    /// Upper bound for one pass over a checklist
    pub fn checklist_period(&self) -> Duration {
        self.checklist_period
    }

    /// Interval between binding indications on a nominated pair
    pub fn indication_period(&self) -> Duration {
        self.indication_period
    }

    /// A nominated pair without indications for this long is no longer live
    pub fn nominated_ttl(&self) -> Duration {
        self.nominated_ttl
    }

    /// Interval between messages to the STUN server
    pub fn server_reflexive_address_period(&self) -> Duration {
        self.server_reflexive_address_period
    }

    /// Number of messages to the STUN server per binding request once an address is known
    pub fn server_reflexive_indication_count(&self) -> usize {
        self.server_reflexive_indication_count
    }

    /// How long a check for an unknown remote agent is kept
    pub fn deferred_triggered_check_ttl(&self) -> Duration {
        self.deferred_triggered_check_ttl
    }

    /// Interval between password changes
    pub fn change_password_period(&self) -> Duration {
        self.change_password_period
    }
}

/// Builder for a [`Configuration`], starting from the defaults
///
/// # Examples
///
/// ```
/// # use rtps_ice::config::Configuration;
/// # use std::time::Duration;
/// let config = Configuration::builder()
///     .t_a(Duration::from_millis(20))
///     .server_reflexive_indication_count(3)
///     .build();
/// assert_eq!(config.t_a(), Duration::from_millis(20));
/// assert_eq!(config.server_reflexive_indication_count(), 3);
/// assert_eq!(config.checklist_period(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    config: Configuration,
}

macro_rules! builder_setter {
    ($field:ident, $ty:ty) => {
        pub fn $field(mut self, $field: $ty) -> Self {
            self.config.$field = $field;
            self
        }
    };
}

impl ConfigurationBuilder {
    builder_setter!(t_a, Duration);
    builder_setter!(connectivity_check_ttl, Duration);
    builder_setter!(checklist_period, Duration);
    builder_setter!(indication_period, Duration);
    builder_setter!(nominated_ttl, Duration);
    builder_setter!(server_reflexive_address_period, Duration);
    builder_setter!(deferred_triggered_check_ttl, Duration);
    builder_setter!(change_password_period, Duration);

    /// The count is clamped to at least 1
    pub fn server_reflexive_indication_count(mut self, count: usize) -> Self {
        self.config.server_reflexive_indication_count = count.max(1);
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}
