//! Reconnect campaign data model.
//!
//! A campaign is the lifetime of one [`AutoConnectEntry`]: the attempt to
//! bring back the base link and the wanted profiles of one device. The
//! scheduler owns every entry and is the only code that mutates them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use budlink_types::{BdAddr, DisconnectReason, Profile, ProfileSet, Role};

use crate::error::{Error, Result};

/// State of one campaign.
///
/// Variants are ordered; "further along" comparisons use this order, which
/// is why `PowerOff` and `TwsRoleConfirm` sort after `ProfileConnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    Idle,
    TwsConnecting,
    PhoneConnecting,
    BaseConnecting,
    BaseConnected,
    ProfileConnecting,
    /// Inert; the next tick stops the scheduler.
    PowerOff,
    TwsRoleConfirm,
    End,
}

impl CampaignState {
    /// Whether the entry is waiting to be dialled (or was never selected).
    pub fn is_dialing(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::TwsConnecting | Self::PhoneConnecting
        )
    }

    /// Whether the campaign is somewhere between its first dial and `End`.
    pub fn is_mid_flight(&self) -> bool {
        !matches!(self, Self::Idle | Self::End | Self::PowerOff)
    }
}

/// How a TWS campaign finds its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwsMode {
    /// Not a TWS campaign.
    #[default]
    None,
    /// Reconnect the remembered peer.
    Reconnect,
    /// Power-on auto pairing with an unknown peer of the same vendor.
    AutoPair,
    /// Fast pairing initiated by the peer.
    FastPair,
}

impl TwsMode {
    /// The campaign kind this mode implies.
    pub fn kind(&self) -> CampaignKind {
        match self {
            TwsMode::None => CampaignKind::Phone,
            _ => CampaignKind::Tws,
        }
    }
}

/// The two kinds of campaign the scheduler interleaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    Phone,
    Tws,
}

/// Why a campaign reached `End`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignOutcome {
    /// Every wanted profile (or the TWS link) came up.
    Connected,
    /// Profile retries ran out with some profiles up.
    PartiallyConnected,
    /// Base-link quota or the absolute ceiling was reached.
    Exhausted,
    /// The device kept disconnecting with orderly reasons.
    Disinterested,
    /// The device never brought up a profile, even after one forced reconnect.
    Unresponsive,
    /// The remote side is connecting profiles itself.
    HandedToRemote,
    /// Stopped by a caller.
    Stopped,
}

/// Retry quotas and timings of one campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Opaque strategy tag carried for the caller.
    pub strategy: u8,
    /// Base-link attempts before giving up. Zero means unlimited (the
    /// absolute ceiling still applies).
    pub base_try: u8,
    /// Profile connect attempts per base link.
    pub profile_try: u8,
    /// Minimum spacing of base-link attempts.
    pub base_interval: Duration,
    /// Spacing of profile connect attempts.
    pub profile_interval: Duration,
    /// Page timeout of a phone dial.
    pub phone_timeout: Duration,
    /// How long one TWS pair search may run.
    pub tws_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: 0,
            base_try: 3,
            profile_try: 5,
            base_interval: Duration::from_secs(2),
            profile_interval: Duration::from_secs(1),
            phone_timeout: Duration::from_secs(3),
            tws_timeout: Duration::from_secs(3),
        }
    }
}

/// Length of one legacy interval unit.
const UNIT: Duration = Duration::from_millis(100);

impl RetryPolicy {
    /// Build a policy from intervals expressed in 100 ms units.
    ///
    /// ```
    /// use budlink_core::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::from_units(3, 5, 20, 10, 30, 30);
    /// assert_eq!(policy.base_interval, Duration::from_secs(2));
    /// assert_eq!(policy.profile_interval, Duration::from_secs(1));
    /// ```
    pub fn from_units(
        base_try: u8,
        profile_try: u8,
        base_interval: u16,
        profile_interval: u16,
        phone_timeout: u16,
        tws_timeout: u16,
    ) -> Self {
        Self {
            strategy: 0,
            base_try,
            profile_try,
            base_interval: UNIT * u32::from(base_interval),
            profile_interval: UNIT * u32::from(profile_interval),
            phone_timeout: UNIT * u32::from(phone_timeout),
            tws_timeout: UNIT * u32::from(tws_timeout),
        }
    }

    /// Set the base-link quota.
    pub fn base_try(mut self, tries: u8) -> Self {
        self.base_try = tries;
        self
    }

    /// Set the profile quota.
    pub fn profile_try(mut self, tries: u8) -> Self {
        self.profile_try = tries;
        self
    }

    /// Set the base-link interval.
    pub fn base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    /// Set the profile interval.
    pub fn profile_interval(mut self, interval: Duration) -> Self {
        self.profile_interval = interval;
        self
    }

    /// Set the phone page timeout.
    pub fn phone_timeout(mut self, timeout: Duration) -> Self {
        self.phone_timeout = timeout;
        self
    }

    /// Set the TWS search timeout.
    pub fn tws_timeout(mut self, timeout: Duration) -> Self {
        self.tws_timeout = timeout;
        self
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if self.base_interval.is_zero() {
            return Err(Error::invalid_request("base_interval must be > 0"));
        }
        if self.profile_interval.is_zero() {
            return Err(Error::invalid_request("profile_interval must be > 0"));
        }
        if self.phone_timeout.is_zero() || self.tws_timeout.is_zero() {
            return Err(Error::invalid_request("connect timeouts must be > 0"));
        }
        Ok(())
    }
}

/// A request to start one campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignRequest {
    pub address: BdAddr,
    pub tws_mode: TwsMode,
    /// Profiles to bring up. `None` seeds them from the reconnect table.
    pub wanted: Option<ProfileSet>,
    /// Dial HFP first. `None` takes the reconnect table's preference.
    pub hfp_first: Option<bool>,
    pub policy: RetryPolicy,
}

impl CampaignRequest {
    /// A phone campaign with table-seeded profiles and the default policy.
    pub fn phone(address: BdAddr) -> Self {
        Self {
            address,
            tws_mode: TwsMode::None,
            wanted: None,
            hfp_first: None,
            policy: RetryPolicy::default(),
        }
    }

    /// A TWS campaign.
    pub fn tws(address: BdAddr, mode: TwsMode) -> Self {
        Self {
            address,
            tws_mode: mode,
            wanted: None,
            hfp_first: None,
            policy: RetryPolicy::default(),
        }
    }

    /// Set the wanted profiles explicitly.
    pub fn wanted(mut self, profiles: ProfileSet) -> Self {
        self.wanted = Some(profiles);
        self
    }

    /// Set the HFP-first preference explicitly.
    pub fn hfp_first(mut self, hfp_first: bool) -> Self {
        self.hfp_first = Some(hfp_first);
        self
    }

    /// Replace the retry policy.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn kind(&self) -> CampaignKind {
        self.tws_mode.kind()
    }

    /// Validate the request.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_zero() && self.tws_mode != TwsMode::AutoPair {
            return Err(Error::invalid_request("address must not be zero"));
        }
        if let Some(wanted) = self.wanted
            && wanted.contains(Profile::Spp)
        {
            return Err(Error::invalid_request("SPP is not reconnectable"));
        }
        self.policy.validate()
    }
}

/// Consecutive orderly-disconnect counters, one per reason.
///
/// Any disconnect with an interesting reason clears every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisinterestTracker {
    counts: Vec<(DisconnectReason, u8)>,
}

impl DisinterestTracker {
    /// Record a disconnect. Returns the new count for `reason`, or zero if
    /// the reason is interesting.
    pub fn record(&mut self, reason: DisconnectReason) -> u8 {
        if !reason.is_uninteresting() {
            self.counts.clear();
            return 0;
        }

        match self.counts.iter_mut().find(|(r, _)| *r == reason) {
            Some((_, count)) => {
                *count = count.saturating_add(1);
                *count
            }
            None => {
                self.counts.push((reason, 1));
                1
            }
        }
    }

    /// Count recorded for one reason.
    pub fn count(&self, reason: DisconnectReason) -> u8 {
        self.counts
            .iter()
            .find(|(r, _)| *r == reason)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// Whether any reason reached `threshold`.
    pub fn is_exhausted(&self, threshold: u8) -> bool {
        self.counts.iter().any(|(_, c)| *c >= threshold)
    }

    pub fn is_clear(&self) -> bool {
        self.counts.is_empty()
    }
}

/// One reconnect campaign.
#[derive(Debug, Clone)]
pub struct AutoConnectEntry {
    pub address: BdAddr,
    /// TWS role the peer is expected to take; `None` for phones.
    pub role: Role,
    pub tws_mode: TwsMode,
    pub wanted: ProfileSet,
    pub hfp_first: bool,
    pub policy: RetryPolicy,
    pub state: CampaignState,
    /// Profile dialled most recently in the current profile round.
    pub current_profile: Option<Profile>,
    /// Base-link attempts charged against `policy.base_try`.
    pub base_retries: u8,
    pub profile_retries: u8,
    pub disinterest: DisinterestTracker,
    pub last_reason: Option<DisconnectReason>,
    pub last_attempt: Option<Instant>,
    pub campaign_start: Instant,
    /// No dial of this campaign has resolved yet.
    pub first_reconnect: bool,
    /// Keep the link but leave profiles to the remote side.
    pub remote_connect_pending: bool,
    pub profile_connect_wait: bool,
    /// A dial was issued and has not resolved yet.
    pub attempt_open: bool,
    /// The zero-profile force disconnect was already used.
    pub forced_disconnect: bool,
    /// The forced disconnect was issued and the link is still up.
    pub awaiting_disconnect: bool,
    pub outcome: Option<CampaignOutcome>,
}

impl AutoConnectEntry {
    /// Create an idle entry for an accepted request.
    pub fn new(request: &CampaignRequest, role: Role, wanted: ProfileSet, hfp_first: bool, now: Instant) -> Self {
        Self {
            address: request.address,
            role,
            tws_mode: request.tws_mode,
            wanted,
            hfp_first,
            policy: request.policy.clone(),
            state: CampaignState::Idle,
            current_profile: None,
            base_retries: 0,
            profile_retries: 0,
            disinterest: DisinterestTracker::default(),
            last_reason: None,
            last_attempt: None,
            campaign_start: now,
            first_reconnect: true,
            remote_connect_pending: false,
            profile_connect_wait: false,
            attempt_open: false,
            forced_disconnect: false,
            awaiting_disconnect: false,
            outcome: None,
        }
    }

    pub fn kind(&self) -> CampaignKind {
        self.tws_mode.kind()
    }

    /// Whether the base interval since the last attempt has elapsed.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.policy.base_interval,
        }
    }

    /// Whether `address` is this campaign's device, allowing a vendor-half
    /// match for anonymous auto pairing.
    pub fn matches(&self, address: &BdAddr) -> bool {
        self.address == *address
            || (self.tws_mode == TwsMode::AutoPair && self.address.upper_half_matches(address))
    }

    /// Charge a resolved dial against the base quota.
    pub fn settle_attempt(&mut self) {
        if self.attempt_open {
            self.attempt_open = false;
            self.base_retries = self.base_retries.saturating_add(1);
        }
    }

    /// Drop an open dial without charging it.
    pub fn abandon_attempt(&mut self) {
        self.attempt_open = false;
    }

    pub fn quota_exhausted(&self) -> bool {
        self.policy.base_try != 0 && self.base_retries >= self.policy.base_try
    }

    pub fn past_ceiling(&self, now: Instant, ceiling: Duration) -> bool {
        now.saturating_duration_since(self.campaign_start) >= ceiling
    }

    /// Move to `End` and remember why.
    pub fn finish(&mut self, outcome: CampaignOutcome) {
        self.state = CampaignState::End;
        self.outcome.get_or_insert(outcome);
    }

    /// Reset the profile round.
    pub fn begin_profiles(&mut self) {
        self.state = CampaignState::ProfileConnecting;
        self.current_profile = None;
        self.profile_retries = 0;
    }

    /// The next wanted profile that is not connected, in round-robin order
    /// after `current_profile`. `None` when every wanted profile is up.
    pub fn next_profile(&self, connected: ProfileSet) -> Option<Profile> {
        let mut candidate = match self.current_profile {
            None if self.hfp_first => Profile::Hfp,
            None => Profile::A2dp,
            Some(p) => p.next_in_rotation(),
        };

        for _ in 0..Profile::RECONNECTABLE.len() {
            if self.wanted.contains(candidate) && !connected.contains(candidate) {
                return Some(candidate);
            }
            candidate = candidate.next_in_rotation();
        }
        None
    }

    /// Snapshot for status reporting.
    pub fn status(&self, now: Instant) -> CampaignStatus {
        CampaignStatus {
            address: self.address,
            kind: self.kind(),
            role: self.role,
            tws_mode: self.tws_mode,
            state: self.state,
            wanted: self.wanted,
            current_profile: self.current_profile,
            base_retries: self.base_retries,
            base_try: self.policy.base_try,
            profile_retries: self.profile_retries,
            profile_try: self.policy.profile_try,
            last_reason: self.last_reason,
            elapsed_ms: now.saturating_duration_since(self.campaign_start).as_millis() as u64,
            first_reconnect: self.first_reconnect,
        }
    }
}

/// Serializable view of one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignStatus {
    pub address: BdAddr,
    pub kind: CampaignKind,
    pub role: Role,
    pub tws_mode: TwsMode,
    pub state: CampaignState,
    pub wanted: ProfileSet,
    pub current_profile: Option<Profile>,
    pub base_retries: u8,
    pub base_try: u8,
    pub profile_retries: u8,
    pub profile_try: u8,
    pub last_reason: Option<DisconnectReason>,
    pub elapsed_ms: u64,
    pub first_reconnect: bool,
}
