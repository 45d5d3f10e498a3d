//! Bluetooth auto-reconnect orchestrator for TWS earbuds and speakers.
//!
//! This crate decides when and how a TWS headset reconnects to its peer
//! earbud and to the phones it remembers, and keeps the remembered list
//! itself up to date.
//!
//! # Features
//!
//! - **Reconnect campaigns**: per-device retry quotas, intervals and a hard
//!   wall-clock ceiling
//! - **Fair interleaving**: the TWS peer and phones take turns when both are due
//! - **Transient failure handling**: early page failures are retried quickly
//!   without charging the quota
//! - **Profile rounds**: HFP, A2DP, AVRCP and HID dialled round robin once the
//!   base link is up
//! - **Inbound monitor**: nudges A2DP and AVRCP on phones that connected
//!   on their own but never opened them
//! - **Reconnect table**: slot 0 for the TWS peer, the rest for phones, saved
//!   half by half
//!
//! # Architecture
//!
//! | Piece | Role |
//! |-------|------|
//! | [`AutoConnector`] | synchronous scheduler, takes the time as an argument |
//! | [`LinkEvent`] | everything the host reports about a link |
//! | [`ConnectService`] | runs a scheduler on a tokio task |
//! | [`Transport`], [`DeviceRegistry`], [`TwsPairing`], [`ReconnectStorage`] | the host seams |
//! | [`MockHost`] | in-memory host for tests |
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use budlink_core::{AutoConnector, CampaignRequest, Collaborators, ConnectConfig, EventDispatcher, MockHost};
//! use budlink_types::{BdAddr, Profile};
//! use tokio::time::Instant;
//!
//! let host = Arc::new(MockHost::new());
//! let mut connector = AutoConnector::new(
//!     ConnectConfig::default(),
//!     Collaborators::from_host(host.clone()),
//!     EventDispatcher::default(),
//! )
//! .unwrap();
//!
//! let phone = BdAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
//! let request = CampaignRequest::phone(phone).wanted([Profile::A2dp].into_iter().collect());
//! connector.start_campaign(request, Instant::now()).unwrap();
//!
//! // drive the timer by hand until the page goes out
//! while host.connect_count(&phone) == 0 {
//!     let at = connector.deadline().unwrap();
//!     connector.tick(at);
//! }
//! ```

pub mod campaign;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod mock;
pub mod monitor;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod table;
pub mod traits;

// Re-export the shared link types
pub use budlink_types as types;

pub use campaign::{
    AutoConnectEntry, CampaignKind, CampaignOutcome, CampaignRequest, CampaignState,
    CampaignStatus, DisinterestTracker, RetryPolicy, TwsMode,
};
pub use command::{HostCommand, PairMatch};
pub use config::{ConnectConfig, MonitorConfig};
pub use error::{Error, RejectReason, Result};
pub use events::{ConnectEvent, EventDispatcher, EventReceiver, EventSender};
pub use mock::MockHost;
pub use monitor::ProfileMonitor;
pub use registry::{LinkInfo, LinkRegistry};
pub use router::LinkEvent;
pub use scheduler::{AutoConnector, ConnectorStatus, StopMode};
pub use service::{ConnectHandle, ConnectService};
pub use table::ReconnectTable;
pub use traits::{Collaborators, DeviceRegistry, ReconnectStorage, Transport, TwsPairing};
