//! Link-event routing.
//!
//! The host reports everything that happens on a link as a [`LinkEvent`].
//! [`AutoConnector::on_link_event`] folds each event into the matching
//! campaign, the inbound profile monitor and the reconnect table.
//!
//! The registry must already reflect the event when it is routed here.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use budlink_types::{BdAddr, DisconnectReason, Profile, Role, TableHalf};

use crate::campaign::{CampaignKind, CampaignOutcome, CampaignState};
use crate::events::ConnectEvent;
use crate::scheduler::{AutoConnector, PendingConnect};

/// Something that happened on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LinkEvent {
    /// The base link came up.
    BaseConnected,
    /// The base link went down.
    BaseDisconnected { reason: DisconnectReason },
    /// The remote name was read; the link is usable.
    GetNameComplete,
    /// The TWS peer finished its role handshake.
    TwsConnected,
    /// The TWS peer never confirmed its role.
    TwsConnectedTimeout,
    /// A page failed.
    BaseConnectFailed,
    /// A page or pair search ran out of time.
    BaseConnectTimeout,
    ProfileConnected { profile: Profile },
    ProfileDisconnected { profile: Profile },
    /// A2DP signaling is up, the stream is not yet.
    A2dpSignalingConnected,
    /// Encryption came up on the link.
    SecurityChanged,
    /// A HID host virtually unplugged us.
    HidUnplug,
    /// A caller stopped the campaign.
    ForceStop,
}

impl LinkEvent {
    fn updates_table(&self) -> bool {
        match self {
            LinkEvent::ProfileConnected { profile } => *profile != Profile::Spp,
            LinkEvent::A2dpSignalingConnected => true,
            LinkEvent::ProfileDisconnected { profile } => {
                matches!(profile, Profile::Hfp | Profile::A2dp | Profile::Hid)
            }
            _ => false,
        }
    }
}

impl AutoConnector {
    /// Route one link event.
    pub fn on_link_event(&mut self, address: BdAddr, event: LinkEvent, now: Instant) {
        debug!("{address}: {event:?}");
        let registry = self.collab.registry.clone();

        let settling = matches!(event, LinkEvent::BaseConnected | LinkEvent::GetNameComplete);
        if settling != self.connect_pending_since.is_some() {
            self.connect_pending_since = settling.then_some(now);
        }

        if let LinkEvent::BaseDisconnected { reason } = event {
            self.record_disconnect(address, reason);
        }
        if event == LinkEvent::TwsConnectedTimeout {
            self.collab.tws.disconnect_peer(None);
        }

        if let Some(index) = self.find_index(&address) {
            if event == LinkEvent::ForceStop {
                self.cancel_entry(index);
            }
            self.apply_transition(index, event, now);
        }

        match event {
            LinkEvent::BaseConnected
            | LinkEvent::SecurityChanged
            | LinkEvent::ProfileConnected {
                profile: Profile::A2dp,
            } => self.watch_inbound(address, now),
            _ => {}
        }
        let any_profile_up = registry
            .find_connection(&address)
            .is_some_and(|handle| !registry.connected_profiles(handle).is_empty());
        self.monitor.update(&address, &event, any_profile_up);

        if event.updates_table() {
            self.sync_table();
        }
        if event == LinkEvent::HidUnplug && self.table.hid_unplug(&address) {
            info!("Forgetting HID-only host {address}");
            self.persist(TableHalf::Phone);
        }
        if let LinkEvent::BaseDisconnected { .. } = event
            && let Some(class) = self.clear_list_pending
            && registry.count_connected(class) == 0
        {
            self.finish_clear_list(class);
        }

        self.update_performance();
    }

    /// Start monitoring an inbound phone link that has no campaign.
    fn watch_inbound(&mut self, address: BdAddr, now: Instant) {
        if self.find_index(&address).is_some() {
            return;
        }
        let registry = self.collab.registry.clone();
        let Some(handle) = registry.find_connection(&address) else {
            return;
        };
        if registry.get_role(handle).is_tws() {
            return;
        }
        self.monitor.add(
            address,
            registry.is_security_changed(handle),
            registry.is_ios_device(handle),
            now,
        );
    }

    /// Record a disconnect reason and report it unless it is an orderly
    /// disconnect still below the disinterest threshold.
    fn record_disconnect(&mut self, address: BdAddr, reason: DisconnectReason) {
        let threshold = self.config.disinterest_threshold;
        let mut role = self.table.find(&address).map(|e| e.role).unwrap_or(Role::None);

        let report = match self.find_index(&address).and_then(|i| self.entries[i].as_mut()) {
            Some(entry) => {
                role = entry.role;
                entry.last_reason = Some(reason);
                let count = entry.disinterest.record(reason);
                count == 0 || count >= threshold
            }
            None => true,
        };

        if report {
            self.events.send(ConnectEvent::Disconnected {
                address,
                reason,
                role,
            });
        } else {
            debug!("Not reporting disconnect of {address}: {reason}");
        }
    }

    /// Apply the per-state effect of `event` to campaign `index`.
    pub(crate) fn apply_transition(&mut self, index: usize, event: LinkEvent, now: Instant) {
        let current = self.is_current(index);
        let ceiling = self.config.campaign_ceiling;
        let quick = self.config.quick_switch;
        let threshold = self.config.disinterest_threshold;
        let mid_flight = self
            .entries
            .iter()
            .flatten()
            .filter(|e| e.state.is_mid_flight())
            .count();

        let Some(entry) = self.entries[index].as_mut() else {
            return;
        };
        let address = entry.address;
        let releases_dial = self.pending_connect.is_some_and(|p| p.address == address);

        let mut timed_out = false;
        let rearm = match event {
            LinkEvent::BaseConnected => {
                if entry.state < CampaignState::BaseConnected {
                    entry.state = CampaignState::BaseConnected;
                }
                entry.last_attempt = Some(now);
                entry.settle_attempt();
                if releases_dial {
                    self.pending_connect = None;
                }
                current.then(|| match entry.kind() {
                    CampaignKind::Phone => self.config.get_name_wait,
                    CampaignKind::Tws => self.config.tws_role_wait,
                })
            }

            LinkEvent::BaseDisconnected { reason } => {
                if !matches!(entry.state, CampaignState::End | CampaignState::PowerOff) {
                    entry.state = CampaignState::Idle;
                }
                entry.awaiting_disconnect = false;
                entry.settle_attempt();
                if releases_dial {
                    self.pending_connect = None;
                }
                if entry.disinterest.is_exhausted(threshold) {
                    info!("{address} keeps disconnecting ({reason}), giving up");
                    entry.finish(CampaignOutcome::Disinterested);
                }
                if current
                    && entry.state != CampaignState::End
                    && ((entry.disinterest.is_clear() && entry.quota_exhausted())
                        || entry.past_ceiling(now, ceiling))
                {
                    info!("Giving up on {address} after {} attempts", entry.base_retries);
                    entry.finish(CampaignOutcome::Exhausted);
                }
                current.then_some(quick)
            }

            LinkEvent::GetNameComplete => {
                // the name can arrive before the base link was reported
                if entry.state == CampaignState::BaseConnecting {
                    entry.last_attempt = Some(now);
                }
                entry.settle_attempt();
                if releases_dial {
                    self.pending_connect = None;
                }

                match entry.kind() {
                    CampaignKind::Tws => {
                        if !matches!(entry.state, CampaignState::End | CampaignState::PowerOff) {
                            entry.state = CampaignState::TwsRoleConfirm;
                        }
                        current.then_some(self.config.tws_role_wait)
                    }
                    CampaignKind::Phone => {
                        if entry.state < CampaignState::ProfileConnecting {
                            entry.begin_profiles();
                        }
                        if current && entry.remote_connect_pending {
                            entry.profile_connect_wait = true;
                            entry.finish(CampaignOutcome::HandedToRemote);
                        }
                        current.then_some(quick)
                    }
                }
            }

            LinkEvent::TwsConnected | LinkEvent::ForceStop => {
                entry.finish(if event == LinkEvent::ForceStop {
                    CampaignOutcome::Stopped
                } else {
                    CampaignOutcome::Connected
                });
                current.then_some(quick)
            }

            LinkEvent::TwsConnectedTimeout => {
                if !matches!(entry.state, CampaignState::End | CampaignState::PowerOff) {
                    entry.state = CampaignState::Idle;
                }
                entry.settle_attempt();
                if current && (entry.quota_exhausted() || entry.past_ceiling(now, ceiling)) {
                    info!("TWS peer {address} never confirmed its role, giving up");
                    entry.finish(CampaignOutcome::Exhausted);
                }
                current.then_some(quick)
            }

            LinkEvent::BaseConnectFailed => {
                let attributable = self.pending_connect
                    == Some(PendingConnect {
                        address,
                        kind: CampaignKind::Phone,
                    });
                if !attributable {
                    // TWS search failures are resolved by the search timeout
                    return;
                }
                entry.first_reconnect = false;

                let window = self.config.early_failure_window(entry.policy.phone_timeout);
                let early = entry
                    .last_attempt
                    .is_some_and(|at| now.saturating_duration_since(at) < window);
                let transient = current
                    && entry.state == CampaignState::BaseConnecting
                    && early
                    && mid_flight < self.config.transient_max_concurrent
                    && !entry.past_ceiling(now, ceiling);

                if transient {
                    debug!("Early page failure for {address}, retrying");
                    self.collab.transport.cancel_pending_connect(address);
                    entry.abandon_attempt();
                    entry.state = CampaignState::PhoneConnecting;
                    self.pending_connect = None;
                    Some(self.config.transient_retry_delay)
                } else {
                    timed_out = true;
                    None
                }
            }

            LinkEvent::BaseConnectTimeout => {
                timed_out = true;
                None
            }

            LinkEvent::ProfileConnected { profile } if profile != Profile::Spp => {
                if current && entry.state == CampaignState::ProfileConnecting {
                    entry.profile_retries = entry.profile_retries.saturating_sub(1);
                    if entry.remote_connect_pending {
                        entry.profile_connect_wait = true;
                    }
                    Some(quick)
                } else {
                    entry.first_reconnect = false;
                    None
                }
            }

            LinkEvent::ProfileDisconnected { profile } if profile != Profile::Spp => {
                (current && entry.state == CampaignState::ProfileConnecting).then_some(quick)
            }

            _ => None,
        };

        if timed_out {
            self.resolve_timeout(index, current, now);
        } else if let Some(delay) = rearm {
            self.restart(delay, now);
        }
    }

    /// A dial ended without a link: cancel it and charge the attempt.
    fn resolve_timeout(&mut self, index: usize, current: bool, now: Instant) {
        let ceiling = self.config.campaign_ceiling;
        let Some(entry) = self.entries[index].as_mut() else {
            return;
        };
        let address = entry.address;

        if !matches!(entry.state, CampaignState::End | CampaignState::PowerOff) {
            entry.state = CampaignState::Idle;
        }
        entry.first_reconnect = false;
        entry.settle_attempt();

        match entry.kind() {
            CampaignKind::Phone => self.collab.transport.cancel_pending_connect(address),
            CampaignKind::Tws => {
                if self.collab.tws.is_connecting() {
                    self.collab.tws.cancel_auto_connect();
                } else if self.collab.tws.is_pair_searching() {
                    self.collab.tws.end_pair_search();
                }
            }
        }
        if self.pending_connect.is_some_and(|p| p.address == address) {
            self.pending_connect = None;
        }

        if current {
            if entry.quota_exhausted() || entry.past_ceiling(now, ceiling) {
                info!("Giving up on {address} after {} attempts", entry.base_retries);
                entry.finish(CampaignOutcome::Exhausted);
            }
            self.restart(self.config.quick_switch, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use budlink_types::{PersistedEntry, ProfileSet};

    use crate::campaign::{CampaignRequest, TwsMode};
    use crate::command::HostCommand;
    use crate::config::ConnectConfig;
    use crate::events::EventDispatcher;
    use crate::mock::MockHost;
    use crate::traits::Collaborators;

    fn addr(last: u8) -> BdAddr {
        BdAddr::new([0xE0, 0, 0, 0, 0, last])
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

    fn route(host: &MockHost, c: &mut AutoConnector, address: BdAddr, event: LinkEvent, now: Instant) {
        let event = host.link_event(address, event);
        c.on_link_event(address, event, now);
    }

    fn disconnected(reason: DisconnectReason) -> LinkEvent {
        LinkEvent::BaseDisconnected { reason }
    }

    #[test]
    fn test_link_event_json_shape() {
        let event: LinkEvent =
            serde_json::from_str(r#"{"event":"profile_connected","profile":"hfp"}"#).unwrap();
        assert_eq!(
            event,
            LinkEvent::ProfileConnected {
                profile: Profile::Hfp
            }
        );
        let event: LinkEvent =
            serde_json::from_str(r#"{"event":"base_disconnected","reason":19}"#).unwrap();
        assert_eq!(event, disconnected(DisconnectReason::RemoteUserTerminated));
    }

    #[test]
    fn test_uninteresting_disconnect_reported_at_threshold() {
        let (host, mut c) = setup();
        let mut rx = c.subscribe();
        let now = Instant::now();
        let wanted: ProfileSet = [Profile::A2dp].into_iter().collect();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(wanted), now)
            .unwrap();

        for _ in 0..2 {
            route(&host, &mut c, addr(1), LinkEvent::BaseConnected, now);
            route(&host, &mut c, addr(1), disconnected(DisconnectReason::RemoteUserTerminated), now);
        }
        let reported = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, ConnectEvent::Disconnected { .. }))
            .count();
        assert_eq!(reported, 0);

        route(&host, &mut c, addr(1), LinkEvent::BaseConnected, now);
        route(&host, &mut c, addr(1), disconnected(DisconnectReason::RemoteUserTerminated), now);
        let reported = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, ConnectEvent::Disconnected { .. }))
            .count();
        assert_eq!(reported, 1);
        assert_eq!(c.entry(&addr(1)).unwrap().state, CampaignState::End);
    }

    #[test]
    fn test_unknown_device_disconnect_always_reported() {
        let (host, mut c) = setup();
        let mut rx = c.subscribe();
        let now = Instant::now();
        route(&host, &mut c, addr(3), LinkEvent::BaseConnected, now);
        route(&host, &mut c, addr(3), disconnected(DisconnectReason::RemoteUserTerminated), now);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&ConnectEvent::Disconnected {
            address: addr(3),
            reason: DisconnectReason::RemoteUserTerminated,
            role: Role::None,
        }));
    }

    #[test]
    fn test_inbound_link_is_monitored() {
        let (host, mut c) = setup();
        let now = Instant::now();
        route(&host, &mut c, addr(3), LinkEvent::BaseConnected, now);
        assert!(c.monitor().contains(&addr(3)));

        route(
            &host,
            &mut c,
            addr(3),
            LinkEvent::ProfileConnected {
                profile: Profile::Avrcp,
            },
            now,
        );
        assert!(!c.monitor().contains(&addr(3)));
    }

    #[test]
    fn test_profile_event_syncs_table() {
        let (host, mut c) = setup();
        let now = Instant::now();
        route(&host, &mut c, addr(3), LinkEvent::BaseConnected, now);
        route(
            &host,
            &mut c,
            addr(3),
            LinkEvent::ProfileConnected {
                profile: Profile::Hfp,
            },
            now,
        );

        let entry = c.table().find(&addr(3)).unwrap();
        assert!(entry.hfp);
        assert_eq!(host.saves(), vec![TableHalf::Phone]);
    }

    #[test]
    fn test_hid_unplug_forgets_hid_host() {
        let (host, mut c) = setup();
        let hid: ProfileSet = [Profile::Hid].into_iter().collect();
        c.set_persisted_table(
            &[PersistedEntry::new(addr(4), Role::None).with_profiles(hid)],
            TableHalf::Phone,
        );
        route(&host, &mut c, addr(4), LinkEvent::HidUnplug, Instant::now());
        assert!(c.table().find(&addr(4)).is_none());
    }

    #[test]
    fn test_tws_timeout_event_drops_peer() {
        let (host, mut c) = setup();
        route(&host, &mut c, addr(8), LinkEvent::TwsConnectedTimeout, Instant::now());
        assert!(host.commands().contains(&HostCommand::DisconnectTwsPeer { address: None }));
    }

    #[test]
    fn test_tws_get_name_waits_for_role() {
        let (host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::tws(addr(8), TwsMode::Reconnect), now)
            .unwrap();
        route(&host, &mut c, addr(8), LinkEvent::BaseConnected, now);
        assert_eq!(c.deadline(), Some(now + Duration::from_secs(3)));
        route(&host, &mut c, addr(8), LinkEvent::GetNameComplete, now);
        assert_eq!(c.entry(&addr(8)).unwrap().state, CampaignState::TwsRoleConfirm);

        route(&host, &mut c, addr(8), LinkEvent::TwsConnected, now);
        assert_eq!(c.entry(&addr(8)).unwrap().state, CampaignState::End);
        assert_eq!(
            c.entry(&addr(8)).unwrap().outcome,
            Some(CampaignOutcome::Connected)
        );
    }

    #[test]
    fn test_auto_pair_matches_vendor_half() {
        let (host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::tws(addr(8), TwsMode::AutoPair), now)
            .unwrap();
        let peer = BdAddr::new([0xE0, 0, 0, 0x12, 0x34, 0x56]);
        route(&host, &mut c, peer, LinkEvent::BaseConnected, now);
        assert_eq!(c.entry(&addr(8)).unwrap().state, CampaignState::BaseConnected);
    }

    #[test]
    fn test_connect_pending_expires() {
        let (host, mut c) = setup();
        let now = Instant::now();
        route(&host, &mut c, addr(3), LinkEvent::BaseConnected, now);
        assert!(c.is_connect_pending(now + Duration::from_secs(1)));
        assert!(!c.is_connect_pending(now + Duration::from_secs(3)));

        route(&host, &mut c, addr(3), LinkEvent::SecurityChanged, now);
        assert!(!c.is_connect_pending(now));
    }

    #[test]
    fn test_name_before_base_connected_settles_dial() {
        let (host, mut c) = setup();
        let now = Instant::now();
        let wanted: ProfileSet = [Profile::A2dp].into_iter().collect();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(wanted), now)
            .unwrap();
        let t = c.deadline().unwrap();
        c.tick(t);
        let t = c.deadline().unwrap();
        c.tick(t);
        assert_eq!(c.entry(&addr(1)).unwrap().state, CampaignState::BaseConnecting);
        assert!(c.pending_connect.is_some());

        route(&host, &mut c, addr(1), LinkEvent::GetNameComplete, t);
        let entry = c.entry(&addr(1)).unwrap();
        assert_eq!(entry.state, CampaignState::ProfileConnecting);
        assert_eq!(entry.base_retries, 1);
        assert!(!entry.attempt_open);
        assert_eq!(c.pending_connect, None);
    }

    #[test]
    fn test_routed_force_stop_cancels_page() {
        let (host, mut c) = setup();
        let now = Instant::now();
        let wanted: ProfileSet = [Profile::A2dp].into_iter().collect();
        c.start_campaign(CampaignRequest::phone(addr(1)).wanted(wanted), now)
            .unwrap();
        let t = c.deadline().unwrap();
        c.tick(t);
        let t = c.deadline().unwrap();
        c.tick(t);

        route(&host, &mut c, addr(1), LinkEvent::ForceStop, t);
        assert!(host.commands().contains(&HostCommand::CancelConnect { address: addr(1) }));
        assert_eq!(c.pending_connect, None);
        let entry = c.entry(&addr(1)).unwrap();
        assert_eq!(entry.state, CampaignState::End);
        assert_eq!(entry.outcome, Some(CampaignOutcome::Stopped));
    }

    #[test]
    fn test_tws_failure_left_to_timeout() {
        let (host, mut c) = setup();
        let now = Instant::now();
        c.start_campaign(CampaignRequest::tws(addr(8), TwsMode::Reconnect), now)
            .unwrap();
        let t = c.deadline().unwrap();
        c.tick(t);
        let t = c.deadline().unwrap();
        c.tick(t);
        assert_eq!(c.entry(&addr(8)).unwrap().state, CampaignState::BaseConnecting);

        route(&host, &mut c, addr(8), LinkEvent::BaseConnectFailed, t);
        assert_eq!(c.entry(&addr(8)).unwrap().state, CampaignState::BaseConnecting);

        let t = c.deadline().unwrap();
        c.tick(t);
        let entry = c.entry(&addr(8)).unwrap();
        assert_eq!(entry.state, CampaignState::Idle);
        assert_eq!(entry.base_retries, 1);
        assert!(host.commands().contains(&HostCommand::CancelTwsConnect));
    }
}
