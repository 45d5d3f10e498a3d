//! End-to-end reconnect scenarios driven through the public API.
//!
//! Every test drives an [`AutoConnector`] against a [`MockHost`] with a
//! hand-advanced clock: `fire` jumps to the armed deadline and ticks, and
//! link events are applied to the mock registry before they are routed.

use std::sync::Arc;
use std::time::Duration;

use budlink_core::{
    AutoConnector, CampaignKind, CampaignOutcome, CampaignRequest, CampaignState, Collaborators,
    ConnectConfig, ConnectEvent, EventDispatcher, HostCommand, LinkEvent, MockHost, RetryPolicy,
    TwsMode,
};
use budlink_types::{BdAddr, DisconnectReason, Profile, ProfileSet};
use tokio::time::Instant;

fn phone() -> BdAddr {
    BdAddr::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x01])
}

fn other_phone() -> BdAddr {
    BdAddr::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x02])
}

fn peer() -> BdAddr {
    BdAddr::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x0F])
}

fn profiles(list: &[Profile]) -> ProfileSet {
    list.iter().copied().collect()
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

fn route(host: &MockHost, connector: &mut AutoConnector, address: BdAddr, event: LinkEvent, now: Instant) {
    let event = host.link_event(address, event);
    connector.on_link_event(address, event, now);
}

fn state(connector: &AutoConnector, address: BdAddr) -> CampaignState {
    connector.entry(&address).expect("campaign exists").state
}

#[test]
fn test_full_reconnect_ends_campaign() {
    let (host, mut c) = setup();
    let mut rx = c.subscribe();
    let request = CampaignRequest::phone(phone())
        .wanted(profiles(&[Profile::A2dp, Profile::Avrcp, Profile::Hfp]))
        .policy(RetryPolicy::from_units(3, 5, 20, 10, 30, 30));
    c.start_campaign(request, Instant::now()).unwrap();

    fire(&mut c);
    let t = fire(&mut c);
    assert_eq!(state(&c, phone()), CampaignState::BaseConnecting);

    route(&host, &mut c, phone(), LinkEvent::BaseConnected, t);
    route(&host, &mut c, phone(), LinkEvent::GetNameComplete, t);
    let t = fire(&mut c);
    assert!(host.commands().contains(&HostCommand::ConnectProfile {
        address: phone(),
        profile: Profile::A2dp
    }));

    for profile in [Profile::A2dp, Profile::Avrcp, Profile::Hfp] {
        route(&host, &mut c, phone(), LinkEvent::ProfileConnected { profile }, t);
    }
    fire(&mut c);
    assert_eq!(state(&c, phone()), CampaignState::End);

    fire(&mut c);
    assert!(c.entry(&phone()).is_none());
    assert!(!c.is_running());
    assert_eq!(c.deadline(), None);
    assert_eq!(host.connect_count(&phone()), 1);

    let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(events.contains(&ConnectEvent::CampaignFinished {
        address: phone(),
        outcome: CampaignOutcome::Connected,
        base_retries: 1,
    }));
    assert!(events.contains(&ConnectEvent::AutoReconnectComplete));
}

#[test]
fn test_late_failures_exhaust_quota() {
    let (host, mut c) = setup();
    let request = CampaignRequest::phone(phone()).wanted(profiles(&[Profile::A2dp]));
    c.start_campaign(request, Instant::now()).unwrap();

    for attempt in 1..=3 {
        fire(&mut c);
        let dialled = fire(&mut c);
        assert_eq!(host.connect_count(&phone()), attempt);
        route(
            &host,
            &mut c,
            phone(),
            LinkEvent::BaseConnectFailed,
            dialled + Duration::from_secs(2),
        );
    }

    let entry = c.entry(&phone()).unwrap();
    assert_eq!(entry.state, CampaignState::End);
    assert_eq!(entry.base_retries, 3);
    assert_eq!(entry.outcome, Some(CampaignOutcome::Exhausted));

    fire(&mut c);
    assert!(c.entry(&phone()).is_none());
    assert_eq!(host.connect_count(&phone()), 3);
}

#[test]
fn test_early_failure_retries_without_charge() {
    let (host, mut c) = setup();
    let now = Instant::now();
    c.start_campaign(
        CampaignRequest::phone(phone()).wanted(profiles(&[Profile::A2dp])),
        now,
    )
    .unwrap();
    c.start_campaign(
        CampaignRequest::phone(other_phone()).wanted(profiles(&[Profile::A2dp])),
        now,
    )
    .unwrap();

    fire(&mut c);
    let dialled = fire(&mut c);
    assert_eq!(state(&c, other_phone()), CampaignState::Idle);

    let failed_at = dialled + Duration::from_millis(500);
    route(&host, &mut c, phone(), LinkEvent::BaseConnectFailed, failed_at);

    let entry = c.entry(&phone()).unwrap();
    assert_eq!(entry.base_retries, 0);
    assert_eq!(entry.state, CampaignState::PhoneConnecting);
    assert_eq!(c.deadline(), Some(failed_at + Duration::from_millis(100)));
    assert!(host.commands().contains(&HostCommand::CancelConnect { address: phone() }));

    fire(&mut c);
    assert_eq!(host.connect_count(&phone()), 2);
    assert_eq!(host.connect_count(&other_phone()), 0);
    assert_eq!(c.entry(&phone()).unwrap().base_retries, 0);
}

#[test]
fn test_tws_and_phone_take_turns() {
    let (host, mut c) = setup();
    let now = Instant::now();
    c.start_campaign(CampaignRequest::tws(peer(), TwsMode::Reconnect), now)
        .unwrap();
    c.start_campaign(
        CampaignRequest::phone(phone()).wanted(profiles(&[Profile::A2dp])),
        now,
    )
    .unwrap();

    fire(&mut c);
    assert_eq!(c.current().unwrap().address, peer());
    assert_eq!(c.last_served(), Some(CampaignKind::Tws));
    fire(&mut c);
    assert_eq!(host.pair_search_count(), 1);

    // the search times out; both are due and the phone has not been served
    fire(&mut c);
    assert_eq!(state(&c, peer()), CampaignState::Idle);
    fire(&mut c);
    assert_eq!(c.current().unwrap().address, phone());
    assert_eq!(state(&c, phone()), CampaignState::PhoneConnecting);
    assert_eq!(c.last_served(), Some(CampaignKind::Phone));

    fire(&mut c);
    assert_eq!(host.connect_count(&phone()), 1);
    fire(&mut c);
    assert_eq!(state(&c, phone()), CampaignState::Idle);
    fire(&mut c);
    assert_eq!(c.current().unwrap().address, peer());
    assert_eq!(state(&c, peer()), CampaignState::TwsConnecting);
    assert_eq!(c.last_served(), Some(CampaignKind::Tws));
}

#[test]
fn test_repeated_power_off_gives_up() {
    let (host, mut c) = setup();
    let mut rx = c.subscribe();
    c.start_campaign(
        CampaignRequest::phone(phone()).wanted(profiles(&[Profile::A2dp])),
        Instant::now(),
    )
    .unwrap();
    fire(&mut c);
    let t = fire(&mut c);

    let power_off = LinkEvent::BaseDisconnected {
        reason: DisconnectReason::RemotePowerOff,
    };
    for _ in 0..3 {
        route(&host, &mut c, phone(), LinkEvent::BaseConnected, t);
        route(&host, &mut c, phone(), power_off, t);
    }

    let entry = c.entry(&phone()).unwrap();
    assert_eq!(entry.state, CampaignState::End);
    assert_eq!(entry.outcome, Some(CampaignOutcome::Disinterested));
    assert!(entry.base_retries < entry.policy.base_try);

    let reported = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| matches!(e, ConnectEvent::Disconnected { .. }))
        .count();
    assert_eq!(reported, 1);
}

#[test]
fn test_silent_profiles_force_reconnect() {
    let (host, mut c) = setup();
    let request = CampaignRequest::phone(phone())
        .wanted(profiles(&[Profile::A2dp]))
        .policy(RetryPolicy::default().profile_try(2));
    c.start_campaign(request, Instant::now()).unwrap();
    fire(&mut c);
    let t = fire(&mut c);
    route(&host, &mut c, phone(), LinkEvent::BaseConnected, t);
    route(&host, &mut c, phone(), LinkEvent::GetNameComplete, t);

    fire(&mut c);
    fire(&mut c);
    assert!(!host.commands().contains(&HostCommand::Disconnect { address: phone() }));
    let t = fire(&mut c);
    assert!(host.commands().contains(&HostCommand::Disconnect { address: phone() }));
    assert_eq!(state(&c, phone()), CampaignState::ProfileConnecting);

    route(
        &host,
        &mut c,
        phone(),
        LinkEvent::BaseDisconnected {
            reason: DisconnectReason::LocalHostTerminated,
        },
        t,
    );
    assert_eq!(state(&c, phone()), CampaignState::Idle);

    for _ in 0..10 {
        if state(&c, phone()) == CampaignState::BaseConnecting {
            break;
        }
        fire(&mut c);
    }
    assert_eq!(state(&c, phone()), CampaignState::BaseConnecting);
    assert_eq!(host.connect_count(&phone()), 2);
}

#[test]
fn test_forced_reconnect_waits_for_slow_disconnect() {
    let (host, mut c) = setup();
    let request = CampaignRequest::phone(phone())
        .wanted(profiles(&[Profile::A2dp]))
        .policy(RetryPolicy::default().profile_try(2));
    c.start_campaign(request, Instant::now()).unwrap();
    fire(&mut c);
    let t = fire(&mut c);
    route(&host, &mut c, phone(), LinkEvent::BaseConnected, t);
    route(&host, &mut c, phone(), LinkEvent::GetNameComplete, t);

    fire(&mut c);
    fire(&mut c);
    fire(&mut c);
    assert!(host.commands().contains(&HostCommand::Disconnect { address: phone() }));

    // the link is still up on the next ticks
    fire(&mut c);
    let t = fire(&mut c);
    let entry = c.entry(&phone()).unwrap();
    assert_eq!(entry.state, CampaignState::ProfileConnecting);
    assert_eq!(entry.outcome, None);
    assert_eq!(host.connect_count(&phone()), 1);

    route(
        &host,
        &mut c,
        phone(),
        LinkEvent::BaseDisconnected {
            reason: DisconnectReason::LocalHostTerminated,
        },
        t,
    );
    for _ in 0..10 {
        if state(&c, phone()) == CampaignState::BaseConnecting {
            break;
        }
        fire(&mut c);
    }
    assert_eq!(host.connect_count(&phone()), 2);

    // a second silent round on the fresh link ends the campaign
    let t = c.deadline().unwrap();
    route(&host, &mut c, phone(), LinkEvent::BaseConnected, t);
    route(&host, &mut c, phone(), LinkEvent::GetNameComplete, t);
    for _ in 0..3 {
        fire(&mut c);
    }
    let entry = c.entry(&phone()).unwrap();
    assert_eq!(entry.state, CampaignState::End);
    assert_eq!(entry.outcome, Some(CampaignOutcome::Unresponsive));

    let disconnects = host
        .commands()
        .iter()
        .filter(|cmd| matches!(cmd, HostCommand::Disconnect { .. }))
        .count();
    assert_eq!(disconnects, 1);
}

#[test]
fn test_profiles_up_on_last_round_count_as_connected() {
    let (host, mut c) = setup();
    let request = CampaignRequest::phone(phone())
        .wanted(profiles(&[Profile::A2dp]))
        .policy(RetryPolicy::default().profile_try(1));
    c.start_campaign(request, Instant::now()).unwrap();
    fire(&mut c);
    let t = fire(&mut c);
    route(&host, &mut c, phone(), LinkEvent::BaseConnected, t);
    route(&host, &mut c, phone(), LinkEvent::GetNameComplete, t);
    fire(&mut c);

    // the profile is up but its event has not been routed yet
    host.link_event(
        phone(),
        LinkEvent::ProfileConnected {
            profile: Profile::A2dp,
        },
    );
    fire(&mut c);

    let entry = c.entry(&phone()).unwrap();
    assert_eq!(entry.state, CampaignState::End);
    assert_eq!(entry.outcome, Some(CampaignOutcome::Connected));
}

#[test]
fn test_routed_force_stop_cancels_before_next_page() {
    let (host, mut c) = setup();
    let now = Instant::now();
    for address in [phone(), other_phone()] {
        c.start_campaign(
            CampaignRequest::phone(address).wanted(profiles(&[Profile::A2dp])),
            now,
        )
        .unwrap();
    }
    fire(&mut c);
    let t = fire(&mut c);
    assert_eq!(state(&c, phone()), CampaignState::BaseConnecting);

    route(&host, &mut c, phone(), LinkEvent::ForceStop, t);
    for _ in 0..10 {
        if host.connect_count(&other_phone()) > 0 {
            break;
        }
        fire(&mut c);
    }
    assert_eq!(host.connect_count(&other_phone()), 1);
    assert_eq!(host.connect_count(&phone()), 1);

    let commands = host.commands();
    let cancelled = commands
        .iter()
        .position(|cmd| *cmd == HostCommand::CancelConnect { address: phone() })
        .expect("page cancelled");
    let paged = commands
        .iter()
        .position(|cmd| matches!(cmd, HostCommand::Connect { address, .. } if *address == other_phone()))
        .expect("next device paged");
    assert!(cancelled < paged);
}

#[test]
fn test_unlimited_campaign_respects_ceiling() {
    let (host, mut c) = setup();
    let mut rx = c.subscribe();
    let start = Instant::now();
    let ceiling = c.config().campaign_ceiling;
    let request = CampaignRequest::phone(phone())
        .wanted(profiles(&[Profile::A2dp]))
        .policy(RetryPolicy::default().base_try(0));
    c.start_campaign(request, start).unwrap();

    let mut ticks = 0;
    while c.entry(&phone()).is_some() {
        if c.entry(&phone()).unwrap().state == CampaignState::BaseConnecting {
            let deadline = c.deadline().unwrap();
            assert!(deadline.duration_since(start) <= ceiling);
        }
        fire(&mut c);
        ticks += 1;
        assert!(ticks < 1_000, "campaign never ended");
    }

    assert!(host.connect_count(&phone()) > 3);
    let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(events.iter().any(|e| matches!(
        e,
        ConnectEvent::CampaignFinished {
            outcome: CampaignOutcome::Exhausted,
            ..
        }
    )));
}

#[test]
fn test_tws_search_respects_ceiling() {
    let (host, mut c) = setup();
    let start = Instant::now();
    let config = c.config().clone();
    c.start_campaign(
        CampaignRequest::tws(peer(), TwsMode::Reconnect).policy(RetryPolicy::default().base_try(0)),
        start,
    )
    .unwrap();

    let mut last = start;
    let mut ticks = 0;
    while c.entry(&peer()).is_some() {
        last = fire(&mut c);
        ticks += 1;
        assert!(ticks < 1_000, "campaign never ended");
    }
    assert!(host.pair_search_count() > 3);
    assert!(last.duration_since(start) <= config.campaign_ceiling + Duration::from_millis(10));
}

#[test]
fn test_finished_collection_is_idempotent() {
    let (host, mut c) = setup();
    c.start_campaign(
        CampaignRequest::phone(phone()).wanted(profiles(&[Profile::A2dp])),
        Instant::now(),
    )
    .unwrap();
    fire(&mut c);
    let t = fire(&mut c);
    route(&host, &mut c, phone(), LinkEvent::BaseConnected, t);
    c.stop(budlink_core::StopMode::Device(phone()), t);

    let table = c.table().clone();
    let campaigns = c.campaigns().count();
    fire(&mut c);
    let after_first = (c.table().clone(), c.campaigns().count());
    if c.deadline().is_some() {
        fire(&mut c);
    }
    assert_eq!(after_first, (c.table().clone(), c.campaigns().count()));
    assert_eq!(campaigns, 0);
    assert_eq!(table, after_first.0);
}
