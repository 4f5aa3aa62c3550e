mod live;
mod msg;

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{ChildEvent, Query, SharedBackend, Subscription},
    db::{room_messages_path, room_path, Record, Room, ServerTimestamp, CREATED_AT, ROOMS},
    profiles::UserService,
    AbortOnDrop, AppResult,
};

use live::{content_of, ChildList};

pub use live::LiveList;
pub use msg::{Channel, MessageChannel};

/// The live room list; each room carries its latest message's content.
pub type RoomList = LiveList<Room>;

impl LiveList<Room> {
    pub fn get(&self, room_id: &str) -> Option<Room> {
        self.snapshot().into_iter().find(|room| room.id == room_id)
    }
}

#[derive(Clone)]
pub struct RoomDirectory {
    users: UserService,
}

impl RoomDirectory {
    pub fn new(users: UserService) -> Self {
        RoomDirectory { users }
    }

    fn backend(&self) -> &SharedBackend {
        self.users.auth().backend()
    }

    /// Every room, kept current. Once the first set has loaded each room gets
    /// a listener on its newest message; rooms added later get one when they
    /// appear, and a removed room's listener is released.
    #[instrument(skip(self))]
    pub async fn all(&self) -> AppResult<RoomList> {
        let sub = self.backend().listen(Query::children(ROOMS)).await?;
        let (items_tx, items) = watch::channel(Vec::new());
        let (loaded_tx, loaded) = watch::channel(false);
        let task = tokio::spawn(drive_rooms(self.backend().clone(), sub, items_tx, loaded_tx));
        Ok(RoomList::from_parts(items, loaded, AbortOnDrop(task)))
    }

    /// A single room read once from the backend.
    pub async fn get(&self, room_id: &str) -> AppResult<Option<Room>> {
        let Some(value) = self.backend().get(&room_path(room_id)?).await? else {
            return Ok(None);
        };
        let room: Room = serde_json::from_value(value)?;
        Ok(Some(room.with_key(room_id)))
    }

    /// Stamps the owner and server creation time, then appends the room.
    #[instrument(skip_all)]
    pub async fn save(&self, room: &Room) -> AppResult<String> {
        let profile = self.users.require_profile().await?;
        let mut value = serde_json::to_value(room)?;
        if let Value::Object(map) = &mut value {
            map.insert(CREATED_AT.to_owned(), ServerTimestamp::placeholder());
            map.insert("ownerId".to_owned(), Value::String(profile.id));
        }
        let room_id = self.backend().push(ROOMS, value).await?;
        info!(%room_id, "room created");
        Ok(room_id)
    }
}

async fn drive_rooms(
    backend: SharedBackend,
    mut rooms: Subscription,
    items_tx: watch::Sender<Vec<Room>>,
    loaded_tx: watch::Sender<bool>,
) {
    let mut list = ChildList::new(None);
    let mut latest: HashMap<String, String> = HashMap::new();
    let mut listeners: HashMap<String, AbortOnDrop> = HashMap::new();
    let (latest_tx, mut latest_rx) = mpsc::unbounded_channel::<(String, Option<String>)>();
    let mut loaded = false;

    loop {
        tokio::select! {
            event = rooms.next() => {
                let Some(event) = event else {
                    break;
                };
                let mut ready = list.apply(event);
                while let Some(event) = rooms.try_next() {
                    ready |= list.apply(event);
                }
                loaded |= ready;

                if loaded {
                    for room_id in list.keys() {
                        if !listeners.contains_key(room_id) {
                            let listener = watch_latest_message(backend.clone(), room_id.to_owned(), latest_tx.clone());
                            listeners.insert(room_id.to_owned(), listener);
                        }
                    }
                    listeners.retain(|room_id, _| list.contains(room_id));
                    latest.retain(|room_id, _| list.contains(room_id));
                }

                publish(&list, &latest, &items_tx);
                if ready {
                    loaded_tx.send_replace(true);
                }
            }
            Some((room_id, content)) = latest_rx.recv() => {
                if record_latest(&mut latest, &listeners, room_id, content) {
                    publish(&list, &latest, &items_tx);
                }
            }
        }
    }
    debug!("room listener ended");
}

/// Applies a latest-message update, dropping ones queued before their room went away.
fn record_latest(
    latest: &mut HashMap<String, String>,
    listeners: &HashMap<String, AbortOnDrop>,
    room_id: String,
    content: Option<String>,
) -> bool {
    if !listeners.contains_key(&room_id) {
        return false;
    }
    match content {
        Some(content) => latest.insert(room_id, content),
        None => latest.remove(&room_id),
    };
    true
}

fn publish(list: &ChildList, latest: &HashMap<String, String>, items_tx: &watch::Sender<Vec<Room>>) {
    let rooms: Vec<Room> = list
        .records::<Room>()
        .into_iter()
        .map(|mut room| {
            room.last_message_content = latest.get(&room.id).cloned();
            room
        })
        .collect();
    items_tx.send_replace(rooms);
}

fn watch_latest_message(
    backend: SharedBackend,
    room_id: String,
    latest_tx: mpsc::UnboundedSender<(String, Option<String>)>,
) -> AbortOnDrop {
    AbortOnDrop(tokio::spawn(async move {
        let query = match room_messages_path(&room_id) {
            Ok(path) => Query::children(path).order_by_child(CREATED_AT).limit_to_last(1),
            Err(e) => {
                warn!(%room_id, "not watching room: {e}");
                return;
            }
        };
        let mut sub = match backend.listen(query).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(%room_id, "latest message listener failed: {e}");
                return;
            }
        };
        while let Some(event) = sub.next().await {
            let update = match event {
                ChildEvent::Added(snapshot) | ChildEvent::Changed(snapshot) => content_of(&snapshot.value),
                ChildEvent::Removed(_) => None,
                ChildEvent::Ready => continue,
            };
            if latest_tx.send((room_id.clone(), update)).is_err() {
                return;
            }
        }
    }))
}
