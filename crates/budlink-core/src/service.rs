//! Async front end of the scheduler.
//!
//! [`ConnectService::spawn`] moves an [`AutoConnector`] onto its own tokio
//! task. The task is the only owner of the scheduler: callers talk to it
//! through a cloneable [`ConnectHandle`], link events and timer expiries are
//! serialised through the same loop, and nothing ever observes the table
//! half-way through a tick.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use budlink_core::{CampaignRequest, Collaborators, ConnectConfig, ConnectService, MockHost};
//! use budlink_types::{BdAddr, Profile};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> budlink_core::Result<()> {
//! let host = Arc::new(MockHost::new());
//! let handle = ConnectService::spawn(ConnectConfig::default(), Collaborators::from_host(host))?;
//!
//! let phone = BdAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
//! let request = CampaignRequest::phone(phone).wanted([Profile::A2dp].into_iter().collect());
//! handle.start_campaign(request).await?;
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use budlink_types::{BdAddr, DeviceClass, PersistedEntry, Role, TableHalf};

use crate::campaign::{CampaignRequest, RetryPolicy};
use crate::config::ConnectConfig;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver};
use crate::router::LinkEvent;
use crate::scheduler::{AutoConnector, ConnectorStatus, StopMode};
use crate::traits::Collaborators;

type Job = Box<dyn FnOnce(&mut AutoConnector, Instant) + Send>;

/// Queue depth of the command channel.
const COMMAND_CAPACITY: usize = 64;

/// Spawns the scheduler task.
#[derive(Debug)]
pub struct ConnectService;

impl ConnectService {
    /// Build a scheduler from `config` and run it on a new task.
    ///
    /// Fails if the configuration is invalid or the reconnect table cannot
    /// be loaded.
    pub fn spawn(config: ConnectConfig, collab: Collaborators) -> Result<ConnectHandle> {
        let events = EventDispatcher::new(config.event_capacity);
        let connector = AutoConnector::new(config, collab, events)?;
        Ok(Self::spawn_connector(connector))
    }

    /// Run an existing scheduler on a new task.
    pub fn spawn_connector(mut connector: AutoConnector) -> ConnectHandle {
        let (jobs, mut rx) = mpsc::channel::<Job>(COMMAND_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events = connector.events().clone();

        let task = tokio::spawn(async move {
            info!("Connect service started");
            loop {
                let wake = connector.next_wakeup();
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Connect service cancelled");
                        break;
                    }
                    job = rx.recv() => match job {
                        Some(job) => job(&mut connector, Instant::now()),
                        None => break,
                    },
                    _ = sleep_until_opt(wake) => connector.poll_timers(Instant::now()),
                }
            }
            connector.shutdown();
            info!("Connect service stopped");
        });

        ConnectHandle {
            jobs,
            events,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

fn sleep_until_opt(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

/// Cloneable handle to a running scheduler.
#[derive(Clone)]
pub struct ConnectHandle {
    jobs: mpsc::Sender<Job>,
    events: EventDispatcher,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for ConnectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectHandle")
            .field("closed", &self.jobs.is_closed())
            .finish_non_exhaustive()
    }
}

impl ConnectHandle {
    /// Run `f` on the scheduler task and return its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut AutoConnector, Instant) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |connector, now| {
            let _ = tx.send(f(connector, now));
        });
        self.jobs
            .send(job)
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)
    }

    /// Subscribe to scheduler events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }

    pub async fn start_campaign(&self, request: CampaignRequest) -> Result<()> {
        self.call(move |c, now| c.start_campaign(request, now))
            .await?
    }

    pub async fn stop(&self, mode: StopMode) -> Result<()> {
        self.call(move |c, now| c.stop(mode, now)).await
    }

    /// Route a link event. The registry must already reflect it.
    pub async fn link_event(&self, address: BdAddr, event: LinkEvent) -> Result<()> {
        self.call(move |c, now| c.on_link_event(address, event, now))
            .await
    }

    pub async fn reconnect_paired(&self, policy: RetryPolicy) -> Result<usize> {
        self.call(move |c, now| c.reconnect_paired(policy, now))
            .await
    }

    pub async fn get_persisted_table(&self, max: usize) -> Result<Vec<Option<PersistedEntry>>> {
        self.call(move |c, _| c.get_persisted_table(max)).await
    }

    pub async fn set_persisted_table(&self, entries: Vec<PersistedEntry>, half: TableHalf) -> Result<()> {
        self.call(move |c, _| c.set_persisted_table(&entries, half))
            .await
    }

    pub async fn sync_remote_paired_list(&self, entries: Vec<PersistedEntry>) -> Result<()> {
        self.call(move |c, _| c.sync_remote_paired_list(&entries))
            .await
    }

    pub async fn update_active(&self) -> Result<()> {
        self.call(|c, _| c.update_active()).await
    }

    pub async fn clear_device(&self, address: BdAddr) -> Result<()> {
        self.call(move |c, now| c.clear_device(address, now)).await
    }

    pub async fn clear_list(&self, class: DeviceClass) -> Result<()> {
        self.call(move |c, now| c.clear_list(class, now)).await
    }

    pub async fn tws_role_confirmed(&self) -> Result<()> {
        self.call(|c, now| c.tws_role_confirmed(now)).await
    }

    pub async fn power_off(&self) -> Result<()> {
        self.call(|c, _| c.power_off()).await
    }

    pub async fn status(&self) -> Result<ConnectorStatus> {
        self.call(|c, now| c.status(now)).await
    }

    pub async fn is_tws_pair_first(&self, role: Role) -> Result<bool> {
        self.call(move |c, _| c.is_tws_pair_first(role)).await
    }

    /// Stop the scheduler task and wait for it to release its timer.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use budlink_types::Profile;

    use crate::command::HostCommand;
    use crate::events::ConnectEvent;
    use crate::mock::MockHost;

    fn addr(last: u8) -> BdAddr {
        BdAddr::new([0xF0, 0, 0, 0, 0, last])
    }

    fn spawn() -> (Arc<MockHost>, ConnectHandle) {
        let host = Arc::new(MockHost::new());
        let handle =
            ConnectService::spawn(ConnectConfig::default(), Collaborators::from_host(host.clone()))
                .unwrap();
        (host, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_campaign_dials_on_its_own() {
        let (host, handle) = spawn();
        let wanted = [Profile::A2dp].into_iter().collect();
        handle
            .start_campaign(CampaignRequest::phone(addr(1)).wanted(wanted))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(host.connect_count(&addr(1)), 1);

        let status = handle.status().await.unwrap();
        assert!(status.running);
        assert!(status.phone_connecting);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_timeout_retries() {
        let (host, handle) = spawn();
        let wanted = [Profile::A2dp].into_iter().collect();
        handle
            .start_campaign(CampaignRequest::phone(addr(1)).wanted(wanted))
            .await
            .unwrap();

        // 3 attempts of 4 s each, spaced by the 2 s base interval
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(host.connect_count(&addr(1)), 3);

        let status = handle.status().await.unwrap();
        assert!(!status.running);
        assert!(status.campaigns.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_surfaces() {
        let (_host, handle) = spawn();
        let err = handle
            .start_campaign(CampaignRequest::phone(addr(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CampaignRejected(_)));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_events_complete_campaign() {
        let (host, handle) = spawn();
        let mut rx = handle.subscribe();
        let wanted = [Profile::A2dp].into_iter().collect();
        handle
            .start_campaign(CampaignRequest::phone(addr(1)).wanted(wanted))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        for event in [
            LinkEvent::BaseConnected,
            LinkEvent::GetNameComplete,
        ] {
            let event = host.link_event(addr(1), event);
            handle.link_event(addr(1), event).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(host.commands().contains(&HostCommand::ConnectProfile {
            address: addr(1),
            profile: Profile::A2dp
        }));

        let event = host.link_event(
            addr(1),
            LinkEvent::ProfileConnected {
                profile: Profile::A2dp,
            },
        );
        handle.link_event(addr(1), event).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut complete = false;
        while let Ok(event) = rx.try_recv() {
            complete |= event == ConnectEvent::AutoReconnectComplete;
        }
        assert!(complete);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_fail_after_shutdown() {
        let (_host, handle) = spawn();
        handle.shutdown().await;
        assert!(matches!(handle.status().await, Err(Error::ServiceStopped)));
        assert!(handle.is_closed());
    }
}
