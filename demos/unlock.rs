use std::sync::Arc;

use log::LevelFilter;
use rustylock::api::central::AlwaysGranted;
use rustylock::api::central_event::CentralEvent;
use rustylock::api::session_event::SessionEvent;
use rustylock::config::{SessionConfig, UNLOCK_PAYLOAD};
use rustylock::platform::BtleplugCentral;
use rustylock::session::SessionManager;
use rustylock::tag;
use tokio::sync::mpsc;

/// `unlock [config.json] [tag-record]`
#[tokio::main]
async fn main() -> rustylock::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let token = args.next().and_then(|record| tag::parse_unlock_token(&record));

    let (sender_tx, receiver_rx) = mpsc::channel::<CentralEvent>(256);
    let central = Arc::new(BtleplugCentral::new(sender_tx).await?);

    let (notify_tx, mut notify_rx) = mpsc::channel::<SessionEvent>(config.notification_capacity);
    tokio::spawn(async move {
        while let Some(event) = notify_rx.recv().await {
            handle_updates(event);
        }
    });

    let name = config.device_name.clone();
    let session = SessionManager::spawn(central, receiver_rx, AlwaysGranted, config, notify_tx);
    session.set_tag_token(token).await?;

    let result = session.connect_and_send(name, UNLOCK_PAYLOAD).await;
    session.disconnect().await?;
    result
}

fn handle_updates(update: SessionEvent) {
    match update {
        SessionEvent::StateChanged(state) => log::info!("State: {:?}", state),
        SessionEvent::CommandCompleted { token, result } => match result {
            Ok(()) => log::info!("Unlock sent (tag {:?})", token),
            Err(e) => log::error!("Unlock failed: {}", e),
        },
    }
}
