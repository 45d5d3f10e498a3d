//! Orchestrator tuning knobs.
//!
//! [`ConnectConfig`] holds the process-wide timings and thresholds of the
//! reconnect scheduler. Per-campaign retry quotas live in
//! [`crate::RetryPolicy`] instead, since every caller of `start_campaign`
//! chooses its own.

use std::time::Duration;

use crate::error::{Error, Result};

/// Timings of the inbound-connection profile monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Poll period of the monitor timer.
    pub period: Duration,
    /// Polls to wait for the phone to open A2DP on a secured link.
    pub a2dp_ticks: u32,
    /// Polls to wait for A2DP before encryption is up.
    pub a2dp_unsecured_ticks: u32,
    /// Polls to wait for AVRCP from a device that looks like iOS.
    pub avrcp_ios_ticks: u32,
    /// Polls to wait for AVRCP from any other device.
    pub avrcp_ticks: u32,
    /// Issue an AVRCP connect every this many polls while waiting.
    pub avrcp_retry_every: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(200),
            a2dp_ticks: 40,
            a2dp_unsecured_ticks: 20,
            avrcp_ios_ticks: 30,
            avrcp_ticks: 21,
            avrcp_retry_every: 15,
        }
    }
}

impl MonitorConfig {
    /// Validate the monitor timings.
    pub fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(Error::invalid_config("monitor period must be > 0"));
        }
        if self.a2dp_ticks == 0 || self.a2dp_unsecured_ticks == 0 {
            return Err(Error::invalid_config("monitor A2DP countdown must be > 0"));
        }
        if self.avrcp_ticks == 0 || self.avrcp_ios_ticks == 0 {
            return Err(Error::invalid_config("monitor AVRCP countdown must be > 0"));
        }
        if self.avrcp_retry_every == 0 {
            return Err(Error::invalid_config("avrcp_retry_every must be > 0"));
        }
        Ok(())
    }
}

/// Configuration of the reconnect scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectConfig {
    /// Number of campaign slots, which is also the persisted table size.
    pub capacity: usize,
    /// Absolute wall-clock ceiling of one campaign.
    pub campaign_ceiling: Duration,
    /// A base-link failure arriving within this fraction of the page timeout
    /// is treated as transient.
    pub early_failure_fraction: f64,
    /// Transient classification only applies while fewer than this many
    /// campaigns are mid-flight.
    pub transient_max_concurrent: usize,
    /// Re-arm delay after a transient failure.
    pub transient_retry_delay: Duration,
    /// Consecutive uninteresting disconnects of one reason that end a campaign.
    pub disinterest_threshold: u8,
    /// Re-arm delay used to switch device quickly.
    pub quick_switch: Duration,
    /// Delay after a campaign starts or an in-flight connect races an inbound one.
    pub start_delay: Duration,
    /// Idle re-arm delay when nothing is due.
    pub wait_idle: Duration,
    /// How long a phone may take to deliver its name after the base link is up.
    pub get_name_wait: Duration,
    /// How long a TWS peer may take to confirm its role.
    pub tws_role_wait: Duration,
    /// Search attempts handed to the TWS pairing sub-protocol per dial.
    pub tws_pair_tries: u8,
    /// How long a "connect pending" indication stays valid.
    pub connect_pending_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Inbound profile monitor timings.
    pub monitor: MonitorConfig,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            campaign_ceiling: Duration::from_secs(175),
            early_failure_fraction: 0.5,
            transient_max_concurrent: 2,
            transient_retry_delay: Duration::from_millis(100),
            disinterest_threshold: 3,
            quick_switch: Duration::from_millis(1),
            start_delay: Duration::from_millis(100),
            wait_idle: Duration::from_millis(100),
            get_name_wait: Duration::from_millis(200),
            tws_role_wait: Duration::from_secs(3),
            tws_pair_tries: 5,
            connect_pending_timeout: Duration::from_secs(3),
            event_capacity: 100,
            monitor: MonitorConfig::default(),
        }
    }
}

impl ConnectConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of campaign slots.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the absolute campaign ceiling.
    pub fn campaign_ceiling(mut self, ceiling: Duration) -> Self {
        self.campaign_ceiling = ceiling;
        self
    }

    /// Set the early-failure window as a fraction of the page timeout.
    pub fn early_failure_fraction(mut self, fraction: f64) -> Self {
        self.early_failure_fraction = fraction;
        self
    }

    /// Set the concurrency limit for transient failure classification.
    pub fn transient_max_concurrent(mut self, count: usize) -> Self {
        self.transient_max_concurrent = count;
        self
    }

    /// Set the re-arm delay after a transient failure.
    pub fn transient_retry_delay(mut self, delay: Duration) -> Self {
        self.transient_retry_delay = delay;
        self
    }

    /// Set the disinterest threshold.
    pub fn disinterest_threshold(mut self, threshold: u8) -> Self {
        self.disinterest_threshold = threshold;
        self
    }

    /// Set the TWS role confirmation wait.
    pub fn tws_role_wait(mut self, wait: Duration) -> Self {
        self.tws_role_wait = wait;
        self
    }

    /// Set the get-name wait.
    pub fn get_name_wait(mut self, wait: Duration) -> Self {
        self.get_name_wait = wait;
        self
    }

    /// Set the event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Replace the monitor timings.
    pub fn monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// The window inside which a base-link failure counts as transient.
    pub fn early_failure_window(&self, page_timeout: Duration) -> Duration {
        page_timeout.mul_f64(self.early_failure_fraction)
    }

    /// Validate the configuration and return an error if invalid.
    ///
    /// Checks that:
    /// - `capacity` is at least 2 (one TWS slot plus one phone slot)
    /// - `early_failure_fraction` is within `0.0..=1.0`
    /// - `disinterest_threshold` and `event_capacity` are > 0
    /// - `campaign_ceiling` is > 0
    pub fn validate(&self) -> Result<()> {
        if self.capacity < 2 {
            return Err(Error::invalid_config("capacity must be >= 2"));
        }
        if self.capacity > u8::MAX as usize {
            return Err(Error::invalid_config("capacity must be <= 255"));
        }
        if !(0.0..=1.0).contains(&self.early_failure_fraction) {
            return Err(Error::invalid_config(
                "early_failure_fraction must be within 0.0..=1.0",
            ));
        }
        if self.disinterest_threshold == 0 {
            return Err(Error::invalid_config("disinterest_threshold must be > 0"));
        }
        if self.campaign_ceiling.is_zero() {
            return Err(Error::invalid_config("campaign_ceiling must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        if self.quick_switch.is_zero() {
            return Err(Error::invalid_config("quick_switch must be > 0"));
        }
        self.monitor.validate()
    }
}
