use std::sync::Arc;

use chatfire::{
    auth::{LogLauncher, LoopbackPopup},
    db::Credentials,
    profiles::LocalStore,
    Auth, AppResult, Config, MessageChannel, RoomDirectory, SocialLogin, UserService,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatfire=info")))
        .init();

    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let config = Config::from_env()?;
    let auth = Auth::obtain(&config)?;
    let store = LocalStore::connect(&config.local_store).await?;
    let users = UserService::new(auth.clone(), store.clone());

    if dotenv::var("CHAT_SOCIAL").is_ok_and(|v| v == "1") {
        let popup = LoopbackPopup::from_config(&config, Arc::new(LogLauncher))?;
        SocialLogin::facebook(auth.clone(), store, Arc::new(popup)).login().await?;
    } else if let (Ok(email), Ok(password)) = (dotenv::var("CHAT_EMAIL"), dotenv::var("CHAT_PASSWORD")) {
        users.login(&Credentials { email, password }).await?;
    }

    let _presence = match users.track_presence().await {
        Ok(tracker) => Some(tracker),
        Err(e) => {
            info!("presence not tracked: {e}");
            None
        }
    };

    let rooms = RoomDirectory::new(users.clone()).all().await?;
    rooms.loaded().await?;
    for room in rooms.snapshot() {
        info!(
            room_id = %room.id,
            name = room.name().unwrap_or("(unnamed)"),
            last = room.last_message_content.as_deref().unwrap_or(""),
            "room"
        );
    }

    let Ok(room_id) = dotenv::var("CHAT_ROOM") else {
        return Ok(());
    };
    let channel = MessageChannel::new(users).open(&room_id).await?;
    let mut updates = channel.messages().subscribe();
    let mut seen = 0;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let messages = updates.borrow_and_update().clone();
                for message in messages.iter().skip(seen) {
                    info!(from = %message.sender_username, "{}", message.content);
                }
                seen = messages.len();
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if let Err(e) = channel.send(&line).await {
                            error!("not sent: {e}");
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    auth.backend().go_offline().await
}
