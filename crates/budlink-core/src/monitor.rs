//! Inbound-connection profile monitor.
//!
//! A phone that connects on its own usually opens A2DP and AVRCP shortly
//! afterwards. Some don't. The monitor watches such links on a short poll
//! and nudges the missing profile once a countdown runs out.

use tokio::time::Instant;
use tracing::debug;

use budlink_types::{BdAddr, Profile};

use crate::config::MonitorConfig;
use crate::router::LinkEvent;
use crate::traits::{DeviceRegistry, Transport};

#[derive(Debug, Clone, PartialEq)]
struct MonitorSlot {
    address: BdAddr,
    a2dp_ticks: u32,
    avrcp_ticks: u32,
    /// The A2DP nudge was already sent once.
    a2dp_requested: bool,
}

/// Watches inbound links for missing A2DP and AVRCP.
#[derive(Debug)]
pub struct ProfileMonitor {
    config: MonitorConfig,
    capacity: usize,
    slots: Vec<MonitorSlot>,
    next_poll: Option<Instant>,
}

impl ProfileMonitor {
    pub fn new(config: MonitorConfig, capacity: usize) -> Self {
        Self {
            config,
            capacity,
            slots: Vec::with_capacity(capacity),
            next_poll: None,
        }
    }

    /// Start watching `address`.
    ///
    /// An address already watched is only re-armed when `secured` is set,
    /// since encryption coming up restarts the phone's own profile setup.
    /// Returns whether the address is now watched with fresh countdowns.
    pub fn add(&mut self, address: BdAddr, secured: bool, ios: bool, now: Instant) -> bool {
        let slot = MonitorSlot {
            address,
            a2dp_ticks: if secured {
                self.config.a2dp_ticks
            } else {
                self.config.a2dp_unsecured_ticks
            },
            avrcp_ticks: if ios {
                self.config.avrcp_ios_ticks
            } else {
                self.config.avrcp_ticks
            },
            a2dp_requested: false,
        };

        if let Some(existing) = self.slots.iter_mut().find(|s| s.address == address) {
            if !secured {
                return false;
            }
            *existing = slot;
        } else if self.slots.len() < self.capacity {
            self.slots.push(slot);
        } else {
            return false;
        }

        debug!("Monitoring profiles of {address}");
        self.next_poll.get_or_insert(now + self.config.period);
        true
    }

    pub fn remove(&mut self, address: &BdAddr) {
        self.slots.retain(|s| s.address != *address);
        if self.slots.is_empty() {
            self.next_poll = None;
        }
    }

    pub fn contains(&self, address: &BdAddr) -> bool {
        self.slots.iter().any(|s| s.address == *address)
    }

    /// Watched addresses.
    pub fn addresses(&self) -> Vec<BdAddr> {
        self.slots.iter().map(|s| s.address).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// When the next poll is due.
    pub fn next_poll(&self) -> Option<Instant> {
        self.next_poll
    }

    /// React to a link event for a watched address.
    ///
    /// `any_profile_up` is the post-event state of the link.
    pub fn update(&mut self, address: &BdAddr, event: &LinkEvent, any_profile_up: bool) {
        let Some(index) = self.slots.iter().position(|s| s.address == *address) else {
            return;
        };

        match *event {
            LinkEvent::ProfileConnected {
                profile: Profile::Avrcp,
            }
            | LinkEvent::BaseDisconnected { .. } => self.remove(address),
            LinkEvent::ProfileConnected {
                profile: Profile::A2dp,
            }
            | LinkEvent::A2dpSignalingConnected => {
                self.slots[index].a2dp_ticks = self.config.a2dp_ticks;
            }
            LinkEvent::ProfileDisconnected { .. } if !any_profile_up => self.remove(address),
            _ => {}
        }
    }

    /// Run one poll over every watched link.
    pub fn poll(&mut self, now: Instant, registry: &dyn DeviceRegistry, transport: &dyn Transport) {
        let retry_every = self.config.avrcp_retry_every;
        let a2dp_ticks = self.config.a2dp_ticks;

        self.slots.retain_mut(|slot| {
            let Some(handle) = registry.find_connection(&slot.address) else {
                return false;
            };

            if registry.is_profile_connected(handle, Profile::A2dp) {
                if registry.is_profile_connected(handle, Profile::Avrcp) {
                    return false;
                }
                slot.avrcp_ticks = slot.avrcp_ticks.saturating_sub(1);
                if slot.avrcp_ticks % retry_every == 0 {
                    debug!("Nudging AVRCP on {}", slot.address);
                    transport.connect_profile(slot.address, Profile::Avrcp);
                }
                return slot.avrcp_ticks > 0;
            }

            if !registry.is_a2dp_signaling(handle) {
                slot.a2dp_ticks = slot.a2dp_ticks.saturating_sub(1);
                if slot.a2dp_ticks == 0 {
                    if slot.a2dp_requested {
                        return false;
                    }
                    debug!("Nudging A2DP on {}", slot.address);
                    transport.connect_profile(slot.address, Profile::A2dp);
                    slot.a2dp_requested = true;
                    slot.a2dp_ticks = a2dp_ticks;
                }
            }
            true
        });

        self.next_poll = if self.slots.is_empty() {
            None
        } else {
            Some(now + self.config.period)
        };
    }

    /// Drop every watch and stop polling.
    pub fn stop(&mut self) {
        self.slots.clear();
        self.next_poll = None;
    }
}
