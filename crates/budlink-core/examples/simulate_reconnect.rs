//! Example: Simulated Phone Reconnect
//!
//! This example runs the connect service against the in-memory mock host,
//! remembers one phone, and answers every page and profile connect the
//! scheduler issues until the campaign completes.
//!
//! Run with: `RUST_LOG=debug cargo run --example simulate_reconnect -- [PHONE_ADDRESS]`

use std::env;
use std::sync::Arc;
use std::time::Duration;

use budlink_core::{
    Collaborators, ConnectConfig, ConnectEvent, ConnectService, HostCommand, LinkEvent, MockHost,
    RetryPolicy,
};
use budlink_types::{BdAddr, PersistedEntry, Profile, Role};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let phone: BdAddr = env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("00:11:22:33:44:55")
        .parse()?;

    let record = PersistedEntry::new(phone, Role::None)
        .with_profiles([Profile::Hfp, Profile::A2dp].into_iter().collect());
    let host = Arc::new(MockHost::with_stored(vec![None, Some(record)]));

    let handle = ConnectService::spawn(
        ConnectConfig::default(),
        Collaborators::from_host(host.clone()),
    )?;
    let mut events = handle.subscribe();

    let started = handle.reconnect_paired(RetryPolicy::default()).await?;
    println!("Started {} campaign(s)", started);

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = event?;
                println!("event:   {:?}", event);
                if event == ConnectEvent::AutoReconnectComplete {
                    break;
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                for command in host.take_commands() {
                    println!("command: {:?}", command);

                    // Pretend the phone answers everything at once
                    let replies = match command {
                        HostCommand::Connect { address, .. } => vec![
                            (address, LinkEvent::BaseConnected),
                            (address, LinkEvent::GetNameComplete),
                        ],
                        HostCommand::ConnectProfile { address, profile } => {
                            vec![(address, LinkEvent::ProfileConnected { profile })]
                        }
                        _ => Vec::new(),
                    };

                    for (address, event) in replies {
                        let event = host.link_event(address, event);
                        handle.link_event(address, event).await?;
                    }
                }
            }
        }
    }

    println!();
    println!("Reconnect table:");
    for (slot, entry) in handle.get_persisted_table(3).await?.iter().enumerate() {
        match entry {
            Some(entry) => println!("  [{}] {} {:?}", slot, entry.address, entry.profiles()),
            None => println!("  [{}] empty", slot),
        }
    }

    handle.shutdown().await;
    Ok(())
}
