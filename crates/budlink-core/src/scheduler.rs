//! The reconnect scheduler.
//!
//! [`AutoConnector`] owns the campaign table, the persisted reconnect table
//! and the inbound profile monitor. It is driven by three inputs:
//!
//! - caller operations (`start_campaign`, `stop`, table maintenance)
//! - link events, see [`crate::router`]
//! - its own one-shot timer, fired through [`AutoConnector::tick`]
//!
//! Exactly one campaign is "current" at a time and only the current
//! campaign dials. Every tick dispatches on the current campaign's state;
//! selection of the next campaign happens whenever the current one is idle
//! or finished.
//!
//! The scheduler is synchronous and takes the time as an argument, so the
//! same code runs under the service's task and in tests with a fake clock.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use budlink_types::{BdAddr, DeviceClass, PersistedEntry, Profile, Role, TableHalf};

use crate::campaign::{
    AutoConnectEntry, CampaignKind, CampaignOutcome, CampaignRequest, CampaignState,
    CampaignStatus, RetryPolicy, TwsMode,
};
use crate::command::PairMatch;
use crate::config::ConnectConfig;
use crate::error::{Error, RejectReason, Result};
use crate::events::{ConnectEvent, EventDispatcher, EventReceiver};
use crate::monitor::ProfileMonitor;
use crate::router::LinkEvent;
use crate::table::ReconnectTable;
use crate::traits::Collaborators;

/// Slack added to the phone page timeout before the scheduler gives up on
/// hearing back from the host.
const PAGE_TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Which campaigns a stop request affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Every phone campaign.
    Phone,
    /// The TWS campaign.
    Tws,
    /// Everything; the scheduler halts.
    All,
    /// One device.
    Device(BdAddr),
    /// Everything except one device, which keeps its link but stops
    /// dialling profiles.
    AllExcept(BdAddr),
}

/// The dial currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingConnect {
    pub(crate) address: BdAddr,
    pub(crate) kind: CampaignKind,
}

/// Serializable overview of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorStatus {
    /// The scheduler timer is running.
    pub running: bool,
    pub high_performance: bool,
    /// The current campaign is past its dial stage.
    pub reconnecting: bool,
    /// Discoverability should stay off while the first dial is pending.
    pub discoverable_suppressed: bool,
    pub phone_connecting: bool,
    pub phone_first_reconnect: bool,
    pub connect_pending: bool,
    pub current: Option<BdAddr>,
    pub campaigns: Vec<CampaignStatus>,
    pub monitored: Vec<BdAddr>,
}

/// The auto-reconnect scheduler.
pub struct AutoConnector {
    pub(crate) config: ConnectConfig,
    pub(crate) collab: Collaborators,
    pub(crate) events: EventDispatcher,
    pub(crate) entries: Vec<Option<AutoConnectEntry>>,
    pub(crate) connecting_index: usize,
    pub(crate) pending_connect: Option<PendingConnect>,
    pub(crate) last_served: Option<CampaignKind>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) running: bool,
    pub(crate) high_performance: bool,
    pub(crate) connect_pending_since: Option<Instant>,
    pub(crate) table: ReconnectTable,
    pub(crate) monitor: ProfileMonitor,
    pub(crate) clear_list_pending: Option<DeviceClass>,
}

impl std::fmt::Debug for AutoConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoConnector")
            .field("entries", &self.entries)
            .field("connecting_index", &self.connecting_index)
            .field("deadline", &self.deadline)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl AutoConnector {
    /// Create a scheduler and load the reconnect table from storage.
    pub fn new(config: ConnectConfig, collab: Collaborators, events: EventDispatcher) -> Result<Self> {
        config.validate()?;

        let slots = collab
            .storage
            .load(config.capacity)
            .map_err(|e| Error::storage(format!("failed to load reconnect table: {e}")))?;
        let table = ReconnectTable::from_slots(slots, config.capacity);
        debug!("Loaded reconnect table with {} records", table.len());

        Ok(Self {
            entries: vec![None; config.capacity],
            monitor: ProfileMonitor::new(config.monitor.clone(), config.capacity),
            config,
            collab,
            events,
            connecting_index: 0,
            pending_connect: None,
            last_served: None,
            deadline: None,
            running: false,
            high_performance: false,
            connect_pending_since: None,
            table,
            clear_list_pending: None,
        })
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Subscribe to scheduler events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// When the scheduler timer fires next.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The earliest of the scheduler and monitor timers.
    pub fn next_wakeup(&self) -> Option<Instant> {
        [self.deadline, self.monitor.next_poll()]
            .into_iter()
            .flatten()
            .min()
    }

    /// The campaign for `address`.
    pub fn entry(&self, address: &BdAddr) -> Option<&AutoConnectEntry> {
        self.entries.iter().flatten().find(|e| e.address == *address)
    }

    /// Every live campaign, in slot order.
    pub fn campaigns(&self) -> impl Iterator<Item = &AutoConnectEntry> {
        self.entries.iter().flatten()
    }

    /// The current campaign.
    pub fn current(&self) -> Option<&AutoConnectEntry> {
        self.entries.get(self.connecting_index)?.as_ref()
    }

    /// Kind of the campaign most recently moved into a dial.
    pub fn last_served(&self) -> Option<CampaignKind> {
        self.last_served
    }

    pub fn table(&self) -> &ReconnectTable {
        &self.table
    }

    pub fn monitor(&self) -> &ProfileMonitor {
        &self.monitor
    }

    pub(crate) fn find_index(&self, address: &BdAddr) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.matches(address)))
    }

    pub(crate) fn is_current(&self, index: usize) -> bool {
        index == self.connecting_index
    }

    // --- Campaign admission ---

    /// Queue a reconnect campaign.
    ///
    /// Rejected when the device is already connected or queued, when a TWS
    /// campaign is already active, or when no slot is free. A phone
    /// campaign without explicit profiles needs a reconnect record to seed
    /// them from.
    pub fn start_campaign(&mut self, request: CampaignRequest, now: Instant) -> Result<()> {
        request.validate()?;
        let address = request.address;
        let kind = request.kind();

        if self.collab.registry.find_connection(&address).is_some() {
            return Err(Error::CampaignRejected(RejectReason::AlreadyConnected));
        }
        if self.entries.iter().flatten().any(|e| e.address == address) {
            return Err(Error::CampaignRejected(RejectReason::AlreadyQueued));
        }
        if kind == CampaignKind::Tws
            && self
                .entries
                .iter()
                .flatten()
                .any(|e| e.kind() == CampaignKind::Tws)
        {
            return Err(Error::CampaignRejected(RejectReason::TwsCampaignActive));
        }
        let Some(slot) = self.entries.iter().position(Option::is_none) else {
            return Err(Error::CampaignRejected(RejectReason::TableFull));
        };

        let (role, wanted, hfp_first) = match kind {
            CampaignKind::Tws => {
                let role = if request.tws_mode == TwsMode::AutoPair {
                    Role::None
                } else {
                    self.table
                        .tws_peer()
                        .map(|peer| peer.role)
                        .unwrap_or(Role::Master)
                };
                self.collab.tws.set_expect_role(role);
                (role, request.wanted.unwrap_or_default(), false)
            }
            CampaignKind::Phone => {
                let record = self.table.find(&address).filter(|e| !e.is_tws()).copied();
                let wanted = match (request.wanted, record) {
                    (Some(wanted), _) => wanted,
                    (None, Some(record)) => {
                        let mut wanted = record.profiles();
                        wanted.remove(Profile::Hid);
                        wanted
                    }
                    (None, None) => {
                        return Err(Error::CampaignRejected(RejectReason::NotInReconnectTable));
                    }
                };
                let hfp_first = request
                    .hfp_first
                    .or(record.map(|r| r.hfp_first))
                    .unwrap_or(false);
                (Role::None, wanted, hfp_first)
            }
        };

        info!("Starting {kind:?} campaign for {address} wanting {wanted}");
        self.entries[slot] = Some(AutoConnectEntry::new(&request, role, wanted, hfp_first, now));
        self.events.send(ConnectEvent::CampaignStarted { address, kind });

        if self.deadline.is_none() {
            self.connecting_index = slot;
            self.restart(self.config.quick_switch, now);
        }
        Ok(())
    }

    /// Queue campaigns for the remembered TWS peer and phones.
    ///
    /// Returns the number of campaigns started.
    pub fn reconnect_paired(&mut self, policy: RetryPolicy, now: Instant) -> usize {
        let mut started = 0;

        if let Some(peer) = self.table.tws_peer().copied() {
            let request = CampaignRequest::tws(peer.address, TwsMode::Reconnect).policy(policy.clone());
            match self.start_campaign(request, now) {
                Ok(()) => started += 1,
                Err(e) => debug!("Not reconnecting TWS peer {}: {e}", peer.address),
            }
        }

        if self.collab.registry.local_role() != Role::Slave {
            let phones: Vec<BdAddr> = self.table.phones().map(|e| e.address).collect();
            for address in phones {
                let request = CampaignRequest::phone(address).policy(policy.clone());
                match self.start_campaign(request, now) {
                    Ok(()) => started += 1,
                    Err(e) => debug!("Not reconnecting {address}: {e}"),
                }
            }
        }
        started
    }

    // --- Timer ---

    pub(crate) fn restart(&mut self, delay: Duration, now: Instant) {
        self.deadline = Some(now + delay);
        if !self.running {
            self.running = true;
            self.events.send(ConnectEvent::ReconnectState { active: true });
        }
        self.update_performance();
    }

    fn halt(&mut self) {
        self.deadline = None;
        self.pending_connect = None;
        if self.running {
            self.running = false;
            self.events.send(ConnectEvent::ReconnectState { active: false });
        }
        self.update_performance();
    }

    pub(crate) fn update_performance(&mut self) {
        let needed = self.collab.registry.needs_high_performance() || self.running;
        if needed != self.high_performance {
            debug!("High performance radio mode {}", if needed { "requested" } else { "released" });
            self.high_performance = needed;
            self.events.send(ConnectEvent::HighPerformance { requested: needed });
        }
    }

    /// Fire whichever timers are due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.deadline.is_some_and(|at| at <= now) {
            self.tick(now);
        }
        if self.monitor.next_poll().is_some_and(|at| at <= now) {
            self.monitor.poll(
                now,
                self.collab.registry.as_ref(),
                self.collab.transport.as_ref(),
            );
        }
    }

    /// Run one scheduler tick.
    ///
    /// Dispatches on the state of the current campaign and always leaves
    /// the timer either re-armed or stopped.
    pub fn tick(&mut self, now: Instant) {
        self.deadline = None;

        let state = self
            .current()
            .map(|e| e.state)
            .unwrap_or(CampaignState::Idle);

        match state {
            CampaignState::Idle | CampaignState::End => self.idle_proc(now),
            CampaignState::PhoneConnecting => self.phone_connecting_proc(now),
            CampaignState::TwsConnecting => self.tws_connecting_proc(now),
            CampaignState::BaseConnecting => {
                self.apply_transition(self.connecting_index, LinkEvent::BaseConnectTimeout, now)
            }
            CampaignState::BaseConnected => self.base_connected_proc(now),
            CampaignState::ProfileConnecting => self.profile_connecting_proc(now),
            CampaignState::TwsRoleConfirm => {
                self.apply_transition(self.connecting_index, LinkEvent::TwsConnectedTimeout, now)
            }
            CampaignState::PowerOff => {
                info!("Powering off, stopping auto reconnect");
                self.stop(StopMode::All, now);
            }
        }

        if self.running && self.deadline.is_none() {
            // a transition for a campaign that is no longer current
            self.restart(self.config.quick_switch, now);
        }
    }

    // --- Selection ---

    fn collect_finished(&mut self) {
        for slot in self.entries.iter_mut() {
            if slot.as_ref().is_some_and(|e| e.state == CampaignState::End)
                && let Some(entry) = slot.take()
            {
                debug!("Campaign for {} finished: {:?}", entry.address, entry.outcome);
                self.events.send(finished_event(&entry, CampaignOutcome::Connected));
            }
        }
    }

    /// Drop finished campaigns and pick the campaign to serve next.
    ///
    /// When both a phone and the TWS peer are due, the kind that was not
    /// served last wins. Otherwise the current campaign keeps its turn if
    /// due, then any due campaign in slot order after it, then the current
    /// one, then anything live.
    pub(crate) fn select_candidate(&mut self, now: Instant) -> Option<usize> {
        self.collect_finished();

        let len = self.entries.len();
        let current = self.connecting_index % len;
        let order = || (0..len).map(move |i| (current + i) % len);
        let live = |i: usize| {
            self.entries[i]
                .as_ref()
                .filter(|e| e.state != CampaignState::PowerOff)
        };
        let due = |i: usize, kind: Option<CampaignKind>| {
            live(i).is_some_and(|e| e.is_due(now) && kind.is_none_or(|k| e.kind() == k))
        };

        let due_phone = order().find(|&i| due(i, Some(CampaignKind::Phone)));
        let due_tws = order().find(|&i| due(i, Some(CampaignKind::Tws)));
        if let (Some(phone), Some(tws)) = (due_phone, due_tws) {
            return Some(match self.last_served {
                Some(CampaignKind::Phone) => tws,
                Some(CampaignKind::Tws) => phone,
                None if due(current, None) => current,
                None => phone,
            });
        }

        if due(current, None) {
            return Some(current);
        }
        if let Some(i) = order().find(|&i| due(i, None)) {
            return Some(i);
        }
        if live(current).is_some() {
            return Some(current);
        }
        order().find(|&i| live(i).is_some())
    }

    fn idle_proc(&mut self, now: Instant) {
        let previous = self.connecting_index;
        let previous_live = self.current().is_some();

        let registry = self.collab.registry.clone();
        if registry.local_role() == Role::Slave
            || registry.count_connected(DeviceClass::All) >= registry.max_connections()
        {
            self.clear_unconnected();
        }

        let Some(index) = self.select_candidate(now) else {
            info!("Auto reconnect complete");
            self.stop(StopMode::All, now);
            self.events.send(ConnectEvent::AutoReconnectComplete);
            return;
        };
        self.connecting_index = index;

        if self.collab.tws.is_pair_searching() {
            self.collab.tws.end_pair_search();
        }

        let Some(entry) = self.entries[index].as_mut() else {
            return;
        };
        if entry.state == CampaignState::Idle && entry.is_due(now) {
            let kind = entry.kind();
            entry.state = match kind {
                CampaignKind::Tws => CampaignState::TwsConnecting,
                CampaignKind::Phone => CampaignState::PhoneConnecting,
            };
            self.last_served = Some(kind);
            debug!("Serving {} ({kind:?})", entry.address);
        }

        let state = entry.state;
        let delay = if index != previous || !previous_live || state != CampaignState::Idle {
            self.config.quick_switch
        } else {
            self.config.wait_idle
        };
        self.restart(delay, now);
    }

    /// Drop every campaign whose device has no link. Used when no further
    /// link can be established anyway.
    fn clear_unconnected(&mut self) {
        for index in 0..self.entries.len() {
            let unconnected = self.entries[index].as_ref().is_some_and(|e| {
                self.collab.registry.find_connection(&e.address).is_none()
            });
            if unconnected {
                self.cancel_entry(index);
                self.drop_entry(index, CampaignOutcome::Stopped);
            }
        }
    }

    // --- Dial stages ---

    /// Whether a dial for some other device is still in flight.
    fn connect_blocked(&mut self, address: &BdAddr) -> bool {
        let Some(pending) = self.pending_connect else {
            return false;
        };
        if pending.address == *address {
            return false;
        }

        let in_flight = self
            .entries
            .iter()
            .flatten()
            .any(|e| e.address == pending.address && e.state == CampaignState::BaseConnecting);
        if !in_flight {
            self.pending_connect = None;
        }
        in_flight
    }

    fn phone_connecting_proc(&mut self, now: Instant) {
        let index = self.connecting_index;
        let Some(address) = self.current().map(|e| e.address) else {
            return self.idle_proc(now);
        };
        let connected = self.collab.registry.find_connection(&address).is_some();
        let blocked = !connected && self.connect_blocked(&address);

        let ceiling = self.config.campaign_ceiling;
        let Some(entry) = self.entries[index].as_mut() else {
            return;
        };
        entry.last_attempt = Some(now);

        let delay = if connected {
            // raced by an inbound connection
            entry.attempt_open = true;
            entry.settle_attempt();
            if entry.state < CampaignState::BaseConnected {
                entry.state = CampaignState::BaseConnected;
            }
            self.config.start_delay
        } else if blocked {
            self.config.wait_idle
        } else if entry.past_ceiling(now, ceiling) {
            info!("Campaign for {address} ran out of time");
            entry.finish(CampaignOutcome::Exhausted);
            self.config.quick_switch
        } else {
            entry.state = CampaignState::BaseConnecting;
            entry.attempt_open = true;
            let timeout = entry.policy.phone_timeout;
            let remaining = time_left(entry, now, ceiling);
            info!(
                "Paging {address} (attempt {}/{})",
                entry.base_retries + 1,
                entry.policy.base_try
            );
            self.pending_connect = Some(PendingConnect {
                address,
                kind: CampaignKind::Phone,
            });
            self.collab.transport.connect(address, timeout);
            (timeout + PAGE_TIMEOUT_MARGIN).min(remaining)
        };
        self.restart(delay, now);
    }

    fn tws_connecting_proc(&mut self, now: Instant) {
        let index = self.connecting_index;
        let Some(address) = self.current().map(|e| e.address) else {
            return self.idle_proc(now);
        };
        let connected = self.collab.registry.find_connection(&address).is_some();
        let blocked = !connected && self.connect_blocked(&address);
        let search_mode = self.collab.tws.reconnect_search_mode();
        let ceiling = self.config.campaign_ceiling;

        let Some(entry) = self.entries[index].as_mut() else {
            return;
        };
        entry.last_attempt = Some(now);

        let delay = if connected {
            entry.attempt_open = true;
            entry.settle_attempt();
            if entry.state < CampaignState::BaseConnected {
                entry.state = CampaignState::BaseConnected;
            }
            self.config.start_delay
        } else if blocked {
            self.config.wait_idle
        } else if entry.past_ceiling(now, ceiling) {
            info!("TWS campaign for {address} ran out of time");
            entry.finish(CampaignOutcome::Exhausted);
            self.config.quick_switch
        } else {
            entry.state = CampaignState::BaseConnecting;
            entry.attempt_open = true;
            let mode = match entry.tws_mode {
                TwsMode::AutoPair => PairMatch::AutoPairKeyword,
                _ if search_mode => PairMatch::AnyPeer,
                _ => PairMatch::Address { address },
            };
            info!("Searching for TWS peer {address} ({mode:?})");
            self.pending_connect = Some(PendingConnect {
                address,
                kind: CampaignKind::Tws,
            });
            self.collab.tws.set_pair_match(mode);
            self.collab.tws.start_pair_search(self.config.tws_pair_tries);
            entry.policy.tws_timeout.min(time_left(entry, now, ceiling))
        };
        self.restart(delay, now);
    }

    fn base_connected_proc(&mut self, now: Instant) {
        let index = self.connecting_index;
        let Some(entry) = self.entries[index].as_mut() else {
            return self.idle_proc(now);
        };
        let since = entry
            .last_attempt
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();

        match entry.kind() {
            CampaignKind::Tws => {
                if since >= self.config.tws_role_wait {
                    return self.apply_transition(index, LinkEvent::TwsConnectedTimeout, now);
                }
            }
            CampaignKind::Phone => {
                if since >= entry.policy.profile_interval {
                    debug!("No name from {}, connecting profiles", entry.address);
                    entry.begin_profiles();
                }
            }
        }
        self.restart(self.config.start_delay, now);
    }

    fn profile_connecting_proc(&mut self, now: Instant) {
        let index = self.connecting_index;
        let ceiling = self.config.campaign_ceiling;
        let registry = self.collab.registry.clone();
        let Some(entry) = self.entries[index].as_mut() else {
            return self.idle_proc(now);
        };
        let address = entry.address;

        let Some(handle) = registry.find_connection(&address) else {
            warn!("{address} lost its link during profile setup");
            entry.finish(CampaignOutcome::Unresponsive);
            return self.try_other_device(index, now);
        };
        let connected = registry.connected_profiles(handle);

        if entry.awaiting_disconnect {
            if entry.past_ceiling(now, ceiling) {
                warn!("{address} never dropped its silent link");
                entry.finish(CampaignOutcome::Unresponsive);
                return self.try_other_device(index, now);
            }
            debug!("Waiting for {address} to drop its link");
            let interval = entry.policy.profile_interval;
            return self.restart(interval, now);
        }

        let next = entry.next_profile(connected);
        if next.is_none() || entry.kind() != CampaignKind::Phone {
            info!("{address} reconnected with {connected}");
            entry.finish(CampaignOutcome::Connected);
            return self.try_other_device(index, now);
        }

        entry.profile_retries = entry.profile_retries.saturating_add(1);
        if entry.profile_retries > entry.policy.profile_try {
            if connected.is_empty() && !entry.forced_disconnect {
                warn!("No profile came up on {address}, forcing a reconnect");
                entry.forced_disconnect = true;
                entry.awaiting_disconnect = true;
                let interval = entry.policy.profile_interval;
                self.collab.transport.disconnect(address);
                return self.restart(interval, now);
            }
            entry.finish(if connected.is_empty() {
                CampaignOutcome::Unresponsive
            } else {
                CampaignOutcome::PartiallyConnected
            });
            return self.try_other_device(index, now);
        }

        if entry.profile_connect_wait {
            entry.profile_connect_wait = false;
            let interval = entry.policy.profile_interval;
            return self.restart(interval, now);
        }

        if let Some(profile) = next {
            info!(
                "Connecting {profile} on {address} (try {}/{})",
                entry.profile_retries, entry.policy.profile_try
            );
            entry.current_profile = Some(profile);
            let interval = entry.policy.profile_interval;
            self.collab.transport.connect_profile(address, profile);
            self.restart(interval, now);
        }
    }

    fn try_other_device(&mut self, index: usize, now: Instant) {
        let mut delay = self.config.quick_switch;
        if let Some(entry) = self.entries[index].as_mut()
            && entry.remote_connect_pending
            && entry.profile_connect_wait
        {
            entry.profile_connect_wait = false;
            delay = entry.policy.profile_interval;
        }
        self.restart(delay, now);
    }

    // --- Stop ---

    /// Stop campaigns.
    pub fn stop(&mut self, mode: StopMode, now: Instant) {
        match mode {
            StopMode::Phone => self.stop_kind(CampaignKind::Phone),
            StopMode::Tws => self.stop_kind(CampaignKind::Tws),
            StopMode::All => {
                self.stop_kind(CampaignKind::Phone);
                self.stop_kind(CampaignKind::Tws);
                self.halt();
            }
            StopMode::Device(address) => self.stop_device(address, now),
            StopMode::AllExcept(address) => self.stop_except(address),
        }
    }

    fn stop_kind(&mut self, kind: CampaignKind) {
        for index in 0..self.entries.len() {
            if self.entries[index].as_ref().is_some_and(|e| e.kind() == kind) {
                self.cancel_entry(index);
                self.drop_entry(index, CampaignOutcome::Stopped);
            }
        }
    }

    fn stop_device(&mut self, address: BdAddr, now: Instant) {
        let Some(index) = self.entries.iter().position(|e| {
            e.as_ref().is_some_and(|e| e.address == address)
        }) else {
            return;
        };
        info!("Stopping campaign for {address}");
        self.cancel_entry(index);
        self.apply_transition(index, LinkEvent::ForceStop, now);
        self.drop_entry(index, CampaignOutcome::Stopped);
    }

    fn stop_except(&mut self, address: BdAddr) {
        for index in 0..self.entries.len() {
            if self.entries[index].as_ref().is_some_and(|e| e.address != address) {
                self.cancel_entry(index);
                self.drop_entry(index, CampaignOutcome::Stopped);
            }
        }

        match self.entries.iter_mut().flatten().find(|e| e.address == address) {
            Some(entry) => {
                debug!("Leaving profiles of {address} to the remote side");
                entry.remote_connect_pending = true;
            }
            None => self.halt(),
        }
    }

    /// Abort whatever dial `index` has in flight.
    pub(crate) fn cancel_entry(&mut self, index: usize) {
        let Some(entry) = self.entries[index].as_ref() else {
            return;
        };
        let address = entry.address;
        let owns_dial = self.pending_connect.is_some_and(|p| p.address == address);

        match entry.kind() {
            CampaignKind::Phone => {
                if entry.state == CampaignState::BaseConnecting || owns_dial {
                    self.collab.transport.cancel_pending_connect(address);
                }
            }
            CampaignKind::Tws => {
                if self.collab.tws.is_pair_searching() {
                    self.collab.tws.end_pair_search();
                }
                if self.collab.tws.is_connecting() {
                    self.collab.tws.cancel_auto_connect();
                }
            }
        }
        if owns_dial {
            self.pending_connect = None;
        }
    }

    fn drop_entry(&mut self, index: usize, outcome: CampaignOutcome) {
        if let Some(entry) = self.entries[index].take() {
            self.events.send(finished_event(&entry, outcome));
        }
    }

    /// Mark every campaign inert; the next tick stops the scheduler.
    pub fn power_off(&mut self) {
        for entry in self.entries.iter_mut().flatten() {
            entry.state = CampaignState::PowerOff;
        }
    }

    /// The local device was confirmed in its TWS role. A slave hands phone
    /// links over to the master.
    pub fn tws_role_confirmed(&mut self, now: Instant) {
        if self.collab.registry.local_role() == Role::Slave {
            info!("Confirmed as TWS slave, dropping phone links");
            self.stop(StopMode::All, now);
            self.disconnect_devices(DeviceClass::Phone);
        }
    }

    /// Release the timer, the radio request and the monitor.
    pub fn shutdown(&mut self) {
        self.deadline = None;
        if self.running {
            self.running = false;
            self.events.send(ConnectEvent::ReconnectState { active: false });
        }
        if self.high_performance {
            self.high_performance = false;
            self.events.send(ConnectEvent::HighPerformance { requested: false });
        }
        self.monitor.stop();
    }

    // --- Reconnect table ---

    /// Save one half of the reconnect table. Failures are logged; the
    /// in-memory table stays authoritative.
    pub(crate) fn persist(&mut self, half: TableHalf) {
        match self.collab.storage.save(self.table.slots(), half) {
            Ok(()) => {
                debug!("Saved reconnect table ({half:?})");
                self.events.send(ConnectEvent::ReconnectTableSaved { half });
            }
            Err(e) => warn!("Failed to save reconnect table ({half:?}): {e}"),
        }
    }

    /// The first `max` slots of the reconnect table.
    pub fn get_persisted_table(&self, max: usize) -> Vec<Option<PersistedEntry>> {
        self.table.head(max).to_vec()
    }

    /// Replace one half of the reconnect table.
    pub fn set_persisted_table(&mut self, entries: &[PersistedEntry], half: TableHalf) {
        if let Some(written) = self.table.set(entries, half) {
            self.persist(written);
        }
    }

    /// Merge the live connection snapshot into the reconnect table.
    pub fn sync_table(&mut self) {
        let snapshot = self.collab.registry.autoconn_snapshot();
        let local_role = self.collab.registry.local_role();
        if let Some(half) = self.table.merge_snapshot(&snapshot, local_role) {
            self.persist(half);
        }
    }

    /// Replace the phone half with a list synced from the TWS peer.
    pub fn sync_remote_paired_list(&mut self, entries: &[PersistedEntry]) {
        let half = self.table.sync_remote_paired_list(entries);
        self.persist(half);
    }

    /// Refresh the active-audio flags of the remembered phones.
    pub fn update_active(&mut self) {
        let registry = self.collab.registry.clone();
        let changed = self.table.update_active(|address| {
            registry
                .find_connection(address)
                .is_some_and(|handle| registry.is_active_audio(handle))
        });
        if changed {
            self.persist(TableHalf::Phone);
        }
    }

    /// Stop any campaign for a phone and forget it.
    pub fn clear_device(&mut self, address: BdAddr, now: Instant) {
        self.stop(StopMode::Device(address), now);
        if self.table.clear_device(&address) {
            self.persist(TableHalf::Phone);
        }
    }

    /// Forget every device of `class`, disconnecting them first.
    ///
    /// Completes immediately when none is connected, otherwise once the
    /// last of them reports its disconnect.
    pub fn clear_list(&mut self, class: DeviceClass, now: Instant) {
        self.stop(StopMode::All, now);
        if self.collab.registry.count_connected(class) == 0 {
            self.finish_clear_list(class);
        } else {
            self.clear_list_pending = Some(class);
            self.disconnect_devices(class);
        }
    }

    pub(crate) fn finish_clear_list(&mut self, class: DeviceClass) {
        self.clear_list_pending = None;
        if let Some(half) = self.table.clear(class) {
            self.persist(half);
            if half.includes_tws() {
                self.events.send(ConnectEvent::TwsClearListComplete);
            }
        }
        info!("Reconnect list cleared ({class:?})");
        self.events.send(ConnectEvent::ReconnectListCleared { class });
    }

    /// Disconnect every connected device of `class`. Returns how many.
    pub fn disconnect_devices(&mut self, class: DeviceClass) -> usize {
        let mut count = 0;
        for (address, role) in self.collab.registry.connected_devices() {
            if !class.matches(role) {
                continue;
            }
            if role.is_tws() {
                self.collab.tws.disconnect_peer(Some(address));
            } else {
                self.collab.transport.disconnect(address);
            }
            count += 1;
        }
        count
    }

    // --- Queries ---

    /// Whether the scheduler timer is running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the current campaign is past its dial stage.
    pub fn is_reconnecting(&self) -> bool {
        self.current().is_some_and(|e| {
            !matches!(
                e.state,
                CampaignState::Idle | CampaignState::TwsConnecting | CampaignState::PhoneConnecting
            )
        })
    }

    /// Whether discoverability should stay off: the current campaign has
    /// not resolved its first dial yet.
    pub fn is_discoverable_suppressed(&self) -> bool {
        self.current().is_some_and(|e| e.first_reconnect)
    }

    /// Whether a phone page is in flight.
    pub fn is_phone_connecting(&self) -> bool {
        self.pending_connect
            .is_some_and(|p| p.kind == CampaignKind::Phone)
    }

    pub fn is_phone_first_reconnect(&self) -> bool {
        self.current()
            .is_some_and(|e| e.kind() == CampaignKind::Phone && e.first_reconnect)
    }

    /// Whether the TWS campaign for a peer of `role` is still on its first dial.
    pub fn is_tws_pair_first(&self, role: Role) -> bool {
        self.entries
            .iter()
            .flatten()
            .any(|e| e.role == role && e.kind() == CampaignKind::Tws && e.first_reconnect)
    }

    /// Whether a link came up recently and is still settling.
    pub fn is_connect_pending(&self, now: Instant) -> bool {
        self.connect_pending_since
            .is_some_and(|at| now.saturating_duration_since(at) < self.config.connect_pending_timeout)
    }

    /// Overview for status reporting.
    pub fn status(&self, now: Instant) -> ConnectorStatus {
        ConnectorStatus {
            running: self.running,
            high_performance: self.high_performance,
            reconnecting: self.is_reconnecting(),
            discoverable_suppressed: self.is_discoverable_suppressed(),
            phone_connecting: self.is_phone_connecting(),
            phone_first_reconnect: self.is_phone_first_reconnect(),
            connect_pending: self.is_connect_pending(now),
            current: self.running.then(|| self.current().map(|e| e.address)).flatten(),
            campaigns: self.campaigns().map(|e| e.status(now)).collect(),
            monitored: self.monitor.addresses(),
        }
    }
}

/// Time until `entry` hits the campaign ceiling. A dial never outlives it.
fn time_left(entry: &AutoConnectEntry, now: Instant, ceiling: Duration) -> Duration {
    ceiling.saturating_sub(now.saturating_duration_since(entry.campaign_start))
}

fn finished_event(entry: &AutoConnectEntry, fallback: CampaignOutcome) -> ConnectEvent {
    ConnectEvent::CampaignFinished {
        address: entry.address,
        outcome: entry.outcome.unwrap_or(fallback),
        base_retries: entry.base_retries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use budlink_types::ProfileSet;

    use crate::command::HostCommand;
    use crate::mock::MockHost;

    fn addr(last: u8) -> BdAddr {
        BdAddr::new([0xD0, 0, 0, 0, 0, last])
    }

    fn a2dp() -> ProfileSet {
        [Profile::A2dp].into_iter().collect()
    }

    fn setup() -> (Arc<MockHost>, AutoConnector) {
        let host = Arc::new(MockHost::new());
        let connector = AutoConnector::new(
            ConnectConfig::default(),
            Collaborators::from_host(host.clone()),
            EventDispatcher::default(),
        )
        .unwrap();
        (host, connector)
    }

    fn fire(connector: &mut AutoConnector) -> Instant {
        let at = connector.deadline().expect("timer armed");
        connector.tick(at);
        at
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let host = Arc::new(MockHost::new());
        let result = AutoConnector::new(
            ConnectConfig::new().capacity(0),
            Collaborators::from_host(host),
            EventDispatcher::default(),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_new_loads_table() {
        let peer = PersistedEntry::new(addr(9), Role::Master);
        let host = Arc::new(MockHost::with_stored(vec![Some(peer)]));
        let connector = AutoConnector::new(
            ConnectConfig::default(),
            Collaborators::from_host(host),
            EventDispatcher::default(),
        )
        .unwrap();
        assert_eq!(connector.table().tws_peer(), Some(&peer));
    }

    #[test]
    fn test_start_campaign_rejections() {
        let (host, mut c) = setup();
        let now = Instant::now();

        host.link_event(addr(1), LinkEvent::BaseConnected);
        let err = c
            .start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap_err();
        assert!(matches!(err, Error::CampaignRejected(RejectReason::AlreadyConnected)));

        let err = c.start_campaign(CampaignRequest::phone(addr(2)), now).unwrap_err();
        assert!(matches!(err, Error::CampaignRejected(RejectReason::NotInReconnectTable)));

        c.start_campaign(CampaignRequest::phone(addr(2)).wanted(a2dp()), now)
            .unwrap();
        let err = c
            .start_campaign(CampaignRequest::phone(addr(2)).wanted(a2dp()), now)
            .unwrap_err();
        assert!(matches!(err, Error::CampaignRejected(RejectReason::AlreadyQueued)));

        c.start_campaign(CampaignRequest::tws(addr(8), TwsMode::Reconnect), now)
            .unwrap();
        let err = c
            .start_campaign(CampaignRequest::tws(addr(7), TwsMode::Reconnect), now)
            .unwrap_err();
        assert!(matches!(err, Error::CampaignRejected(RejectReason::TwsCampaignActive)));

        c.start_campaign(CampaignRequest::phone(addr(3)).wanted(a2dp()), now)
            .unwrap();
        let err = c
            .start_campaign(CampaignRequest::phone(addr(4)).wanted(a2dp()), now)
            .unwrap_err();
        assert!(matches!(err, Error::CampaignRejected(RejectReason::TableFull)));
    }

    #[test]
    fn test_start_seeds_profiles_from_table() {
        let record = PersistedEntry::new(addr(1), Role::None)
            .with_profiles([Profile::Hfp, Profile::Hid].into_iter().collect());
        let mut record = record;
        record.hfp_first = true;
        let host = Arc::new(MockHost::with_stored(vec![None, Some(record)]));
        let mut c = AutoConnector::new(
            ConnectConfig::default(),
            Collaborators::from_host(host),
            EventDispatcher::default(),
        )
        .unwrap();

        c.start_campaign(CampaignRequest::phone(addr(1)), Instant::now())
            .unwrap();
        let entry = c.entry(&addr(1)).unwrap();
        assert_eq!(entry.wanted, [Profile::Hfp].into_iter().collect());
        assert!(entry.hfp_first);
    }

    #[test]
    fn test_start_arms_timer_and_reports_running() {
        let (_host, mut c) = setup();
        let mut rx = c.subscribe();
        let now = Instant::now();

        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap();
        assert_eq!(c.deadline(), Some(now + Duration::from_millis(1)));
        assert!(c.is_running());

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&ConnectEvent::ReconnectState { active: true }));
        assert!(events.contains(&ConnectEvent::HighPerformance { requested: true }));
    }

    #[test]
    fn test_tws_expected_role() {
        let (host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::tws(addr(8), TwsMode::Reconnect), now)
            .unwrap();
        assert!(host.commands().contains(&HostCommand::SetExpectRole { role: Role::Master }));
        assert_eq!(c.entry(&addr(8)).unwrap().role, Role::Master);
    }

    #[test]
    fn test_tws_dial_uses_pair_match() {
        let (host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::tws(addr(8), TwsMode::AutoPair), now)
            .unwrap();
        fire(&mut c);
        fire(&mut c);

        let commands = host.commands();
        assert!(commands.contains(&HostCommand::SetPairMatch {
            mode: PairMatch::AutoPairKeyword
        }));
        assert!(commands.contains(&HostCommand::StartPairSearch { tries: 5 }));
        assert_eq!(c.entry(&addr(8)).unwrap().state, CampaignState::BaseConnecting);
    }

    #[test]
    fn test_empty_table_completes() {
        let (_host, mut c) = setup();
        let mut rx = c.subscribe();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap();
        c.stop(StopMode::Phone, now);
        fire(&mut c);

        assert!(!c.is_running());
        assert_eq!(c.deadline(), None);
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&ConnectEvent::AutoReconnectComplete));
    }

    #[test]
    fn test_finished_campaigns_collected_once() {
        let (_host, mut c) = setup();
        let mut rx = c.subscribe();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap();
        c.entries[0].as_mut().unwrap().finish(CampaignOutcome::Exhausted);

        c.collect_finished();
        c.collect_finished();
        let finished: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, ConnectEvent::CampaignFinished { .. }))
            .collect();
        assert_eq!(finished.len(), 1);
        assert_eq!(c.campaigns().count(), 0);
    }

    #[test]
    fn test_selection_prefers_other_kind_after_service() {
        let (_host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::tws(addr(8), TwsMode::Reconnect), now)
            .unwrap();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap();

        c.last_served = Some(CampaignKind::Tws);
        let picked = c.select_candidate(now).unwrap();
        assert_eq!(c.entries[picked].as_ref().unwrap().address, addr(1));

        c.last_served = Some(CampaignKind::Phone);
        let picked = c.select_candidate(now).unwrap();
        assert_eq!(c.entries[picked].as_ref().unwrap().address, addr(8));
    }

    #[test]
    fn test_selection_skips_power_off() {
        let (_host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap();
        c.power_off();
        assert_eq!(c.select_candidate(now), None);
    }

    #[test]
    fn test_power_off_stops_on_next_tick() {
        let (_host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap();
        c.power_off();
        fire(&mut c);
        assert!(!c.is_running());
        assert_eq!(c.campaigns().count(), 0);
    }

    #[test]
    fn test_slave_guard_clears_unconnected() {
        let (host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap();
        host.registry().set_local_role(Role::Slave);
        fire(&mut c);
        assert_eq!(c.campaigns().count(), 0);
        assert!(!c.is_running());
    }

    #[test]
    fn test_stop_device_cancels_page() {
        let (host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap();
        fire(&mut c);
        let at = fire(&mut c);
        assert!(c.is_phone_connecting());

        c.stop(StopMode::Device(addr(1)), at);
        assert!(c.entry(&addr(1)).is_none());
        assert!(!c.is_phone_connecting());
        assert!(host.commands().contains(&HostCommand::CancelConnect { address: addr(1) }));
    }

    #[test]
    fn test_stop_except_marks_remote_preference() {
        let (_host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap();
        c.start_campaign(CampaignRequest::phone(addr(2)).wanted(a2dp()), now)
            .unwrap();

        c.stop(StopMode::AllExcept(addr(2)), now);
        assert!(c.entry(&addr(1)).is_none());
        assert!(c.entry(&addr(2)).unwrap().remote_connect_pending);
        assert!(c.is_running());

        c.stop(StopMode::AllExcept(addr(5)), now);
        assert_eq!(c.campaigns().count(), 0);
        assert!(!c.is_running());
    }

    #[test]
    fn test_clear_list_waits_for_disconnects() {
        let peer = PersistedEntry::new(addr(9), Role::Master);
        let phone = PersistedEntry::new(addr(1), Role::None).with_profiles(a2dp());
        let host = Arc::new(MockHost::with_stored(vec![Some(peer), Some(phone)]));
        let mut c = AutoConnector::new(
            ConnectConfig::default(),
            Collaborators::from_host(host.clone()),
            EventDispatcher::default(),
        )
        .unwrap();
        let mut rx = c.subscribe();
        let now = Instant::now();

        host.link_event(addr(1), LinkEvent::BaseConnected);
        c.clear_list(DeviceClass::Phone, now);
        assert!(host.commands().contains(&HostCommand::Disconnect { address: addr(1) }));
        assert!(c.table().find(&addr(1)).is_some());

        let event = host.link_event(
            addr(1),
            LinkEvent::BaseDisconnected {
                reason: budlink_types::DisconnectReason::LocalHostTerminated,
            },
        );
        c.on_link_event(addr(1), event, now);
        assert!(c.table().find(&addr(1)).is_none());
        assert!(c.table().tws_peer().is_some());

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&ConnectEvent::ReconnectListCleared {
            class: DeviceClass::Phone
        }));
        assert!(!events.contains(&ConnectEvent::TwsClearListComplete));
    }

    #[test]
    fn test_clear_list_tws_completes_immediately() {
        let peer = PersistedEntry::new(addr(9), Role::Master);
        let host = Arc::new(MockHost::with_stored(vec![Some(peer)]));
        let mut c = AutoConnector::new(
            ConnectConfig::default(),
            Collaborators::from_host(host.clone()),
            EventDispatcher::default(),
        )
        .unwrap();
        let mut rx = c.subscribe();

        c.clear_list(DeviceClass::Tws, Instant::now());
        assert!(c.table().is_empty());
        assert_eq!(host.stored()[0], None);
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&ConnectEvent::TwsClearListComplete));
    }

    #[test]
    fn test_reconnect_paired_starts_peer_and_phones() {
        let peer = PersistedEntry::new(addr(9), Role::Slave);
        let phone = PersistedEntry::new(addr(1), Role::None).with_profiles(a2dp());
        let host = Arc::new(MockHost::with_stored(vec![Some(peer), Some(phone)]));
        let mut c = AutoConnector::new(
            ConnectConfig::default(),
            Collaborators::from_host(host.clone()),
            EventDispatcher::default(),
        )
        .unwrap();

        assert_eq!(c.reconnect_paired(RetryPolicy::default(), Instant::now()), 2);
        assert_eq!(c.entry(&addr(9)).unwrap().role, Role::Slave);
        assert_eq!(c.entry(&addr(1)).unwrap().wanted, a2dp());
    }

    #[test]
    fn test_set_table_persists_written_half() {
        let (host, mut c) = setup();
        let phone = PersistedEntry::new(addr(1), Role::None).with_profiles(a2dp());
        c.set_persisted_table(&[phone], TableHalf::Phone);
        assert_eq!(host.saves(), vec![TableHalf::Phone]);
        assert_eq!(c.get_persisted_table(2), vec![None, Some(phone)]);
    }

    #[test]
    fn test_save_failure_keeps_memory_table() {
        let (host, mut c) = setup();
        host.set_fail_saves(true);
        let phone = PersistedEntry::new(addr(1), Role::None);
        c.set_persisted_table(&[phone], TableHalf::Phone);
        assert!(c.table().find(&addr(1)).is_some());
        assert!(host.stored().iter().all(Option::is_none));
    }

    #[test]
    fn test_update_active_saves_on_change() {
        let (host, mut c) = setup();
        let phone = PersistedEntry::new(addr(1), Role::None).with_profiles(a2dp());
        c.set_persisted_table(&[phone], TableHalf::Phone);

        host.link_event(addr(1), LinkEvent::BaseConnected);
        host.registry().set_active_audio(Some(addr(1)));
        c.update_active();
        assert!(c.table().find(&addr(1)).unwrap().active);
        assert_eq!(host.saves().len(), 2);

        c.update_active();
        assert_eq!(host.saves().len(), 2);
    }

    #[test]
    fn test_tws_role_confirmed_as_slave() {
        let (host, mut c) = setup();
        let now = Instant::now();
        host.link_event(addr(1), LinkEvent::BaseConnected);
        c.start_campaign(CampaignRequest::phone(addr(2)).wanted(a2dp()), now)
            .unwrap();

        c.tws_role_confirmed(now);
        assert_eq!(c.campaigns().count(), 1);

        host.registry().set_local_role(Role::Slave);
        c.tws_role_confirmed(now);
        assert_eq!(c.campaigns().count(), 0);
        assert!(host.commands().contains(&HostCommand::Disconnect { address: addr(1) }));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let (_host, mut c) = setup();
        let mut rx = c.subscribe();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), Instant::now())
            .unwrap();
        c.shutdown();

        assert_eq!(c.next_wakeup(), None);
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&ConnectEvent::ReconnectState { active: false }));
        assert!(events.contains(&ConnectEvent::HighPerformance { requested: false }));
    }

    #[test]
    fn test_queries_follow_dial() {
        let (_host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(a2dp()), now)
            .unwrap();
        assert!(c.is_discoverable_suppressed());
        assert!(c.is_phone_first_reconnect());
        assert!(!c.is_reconnecting());

        fire(&mut c);
        let at = fire(&mut c);
        assert!(c.is_reconnecting());
        assert!(c.is_phone_connecting());

        let status = c.status(at);
        assert_eq!(status.current, Some(addr(1)));
        assert_eq!(status.campaigns.len(), 1);
        assert_eq!(status.campaigns[0].state, CampaignState::BaseConnecting);
    }
}
