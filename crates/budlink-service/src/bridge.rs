//! Radio bridge collaborator.
//!
//! The daemon does not drive a controller itself. [`HostBridge`] turns every
//! scheduler side effect into a [`HostCommand`] and broadcasts it; the radio
//! bridge process picks commands up over the WebSocket and reports results
//! back as link events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, trace};

use budlink_core::{HostCommand, LinkEvent, PairMatch, Transport, TwsPairing};
use budlink_types::{BdAddr, Profile, Role};

/// Sender half of the host command channel.
pub type CommandSender = broadcast::Sender<HostCommand>;

/// Receiver half of the host command channel.
pub type CommandReceiver = broadcast::Receiver<HostCommand>;

/// Forwards scheduler commands to the radio bridge.
#[derive(Debug)]
pub struct HostBridge {
    commands: CommandSender,
    pair_searching: AtomicBool,
    tws_connecting: AtomicBool,
    search_mode: AtomicBool,
}

impl HostBridge {
    /// Create a bridge whose command channel buffers `capacity` commands.
    pub fn new(capacity: usize) -> Self {
        let (commands, _) = broadcast::channel(capacity);
        Self {
            commands,
            pair_searching: AtomicBool::new(false),
            tws_connecting: AtomicBool::new(false),
            search_mode: AtomicBool::new(false),
        }
    }

    /// Subscribe to outgoing host commands.
    pub fn subscribe(&self) -> CommandReceiver {
        self.commands.subscribe()
    }

    /// Make TWS reconnects search for any peer instead of the remembered one.
    pub fn set_search_mode(&self, enabled: bool) {
        self.search_mode.store(enabled, Ordering::SeqCst);
    }

    /// Track the TWS handshake from reported link events.
    ///
    /// The bridge only learns that a TWS auto connect ended when the peer
    /// confirms its role or the attempt fails.
    pub fn observe(&self, event: &LinkEvent) {
        match event {
            LinkEvent::TwsConnected
            | LinkEvent::TwsConnectedTimeout
            | LinkEvent::BaseConnectFailed
            | LinkEvent::BaseConnectTimeout => {
                self.tws_connecting.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    fn send(&self, command: HostCommand) {
        trace!("host command: {command:?}");
        // Nobody listening means no bridge is attached yet
        if self.commands.send(command).is_err() {
            debug!("No radio bridge attached, command dropped");
        }
    }
}

impl Transport for HostBridge {
    fn connect(&self, address: BdAddr, page_timeout: Duration) {
        self.send(HostCommand::Connect {
            address,
            page_timeout_ms: u64::try_from(page_timeout.as_millis()).unwrap_or(u64::MAX),
        });
    }

    fn disconnect(&self, address: BdAddr) {
        self.send(HostCommand::Disconnect { address });
    }

    fn connect_profile(&self, address: BdAddr, profile: Profile) {
        self.send(HostCommand::ConnectProfile { address, profile });
    }

    fn cancel_pending_connect(&self, address: BdAddr) {
        self.send(HostCommand::CancelConnect { address });
    }
}

impl TwsPairing for HostBridge {
    fn start_pair_search(&self, tries: u8) {
        self.pair_searching.store(true, Ordering::SeqCst);
        self.tws_connecting.store(true, Ordering::SeqCst);
        self.send(HostCommand::StartPairSearch { tries });
    }

    fn end_pair_search(&self) {
        self.pair_searching.store(false, Ordering::SeqCst);
        self.send(HostCommand::EndPairSearch);
    }

    fn is_pair_searching(&self) -> bool {
        self.pair_searching.load(Ordering::SeqCst)
    }

    fn cancel_auto_connect(&self) {
        self.tws_connecting.store(false, Ordering::SeqCst);
        self.send(HostCommand::CancelTwsConnect);
    }

    fn is_connecting(&self) -> bool {
        self.tws_connecting.load(Ordering::SeqCst)
    }

    fn set_pair_match(&self, mode: PairMatch) {
        self.send(HostCommand::SetPairMatch { mode });
    }

    fn set_expect_role(&self, role: Role) {
        self.send(HostCommand::SetExpectRole { role });
    }

    fn disconnect_peer(&self, address: Option<BdAddr>) {
        self.send(HostCommand::DisconnectTwsPeer { address });
    }

    fn reconnect_search_mode(&self) -> bool {
        self.search_mode.load(Ordering::SeqCst)
    }
}
