mod common;

use chatfire::{
    backend::{Backend, Op},
    db::{presence_path, Credentials},
    profiles::{LocalStore, PROFILE_KEY},
    ChatError, MessageChannel, UserService,
};
use common::{harness, new_user, wait_for_value, within};
use serde_json::json;

#[tokio::test]
async fn create_user_remembers_profile_and_signs_in() {
    let h = harness().await;
    let auth = h.users.create_user(&new_user("ann")).await.unwrap();

    let profile = h.users.get_profile().await.unwrap();
    assert_eq!(profile.username, "ann");
    assert_eq!(profile.email, "ann@example.com");
    assert_eq!(profile.id, auth.uid);

    let record = h.backend.get(&format!("users/{}", auth.uid)).await.unwrap().unwrap();
    assert_eq!(record, json!({ "id": auth.uid, "email": "ann@example.com", "username": "ann" }));
    assert_eq!(h.auth.auth_data(), Some(auth));
}

#[tokio::test]
async fn failed_sign_up_leaves_nothing_behind() {
    let h = harness().await;
    h.users.create_user(&new_user("ann")).await.unwrap();
    h.users.logout().await.unwrap();
    let writes_before = h.backend.ops().len();

    let err = h.users.create_user(&new_user("ann")).await.unwrap_err();
    assert_eq!(err.kind(), Some(&ChatError::Auth("EMAIL_EXISTS".to_owned())));
    assert_eq!(h.users.get_profile().await, None);
    assert_eq!(h.backend.ops().len(), writes_before);
    assert!(h.auth.auth_data().is_none());
}

#[tokio::test]
async fn login_reports_bad_credentials() {
    let h = harness().await;
    h.users.create_user(&new_user("ann")).await.unwrap();
    h.auth.unauth().await.unwrap();

    let err = h.users
        .login(&Credentials { email: "ann@example.com".to_owned(), password: "wrong".to_owned() })
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), Some(ChatError::Auth(_))));
    assert!(h.auth.auth_data().is_none());

    let mut on_auth = h.auth.on_auth();
    h.users
        .login(&Credentials { email: "ann@example.com".to_owned(), password: "correct horse".to_owned() })
        .await
        .unwrap();
    assert!(on_auth.borrow_and_update().is_some());
}

#[tokio::test]
async fn corrupt_or_missing_profiles_read_as_none() {
    let h = harness().await;
    assert_eq!(h.users.get_profile().await, None);

    h.store.set_item(PROFILE_KEY, "{not json").await.unwrap();
    assert_eq!(h.users.get_profile().await, None);

    h.store.set_item(PROFILE_KEY, r#"{"id":"u1"}"#).await.unwrap();
    assert_eq!(h.users.get_profile().await, None);
}

#[tokio::test]
async fn logout_forgets_profile_only() {
    let h = harness().await;
    h.signed_up("ann").await;
    h.store.set_item("theme", "dark").await.unwrap();

    h.users.logout().await.unwrap();
    assert_eq!(h.users.get_profile().await, None);
    assert_eq!(h.store.get_item("theme").await.unwrap().as_deref(), Some("dark"));
    assert!(h.auth.auth_data().is_none());
}

#[tokio::test]
async fn presence_registers_cleanup_before_publishing() {
    let h = harness().await;
    let profile = h.signed_up("ann").await;
    let path = presence_path(&profile.id).unwrap();

    let _tracker = h.users.track_presence().await.unwrap();
    wait_for_value(&h.backend, &path, Some(json!(true))).await;

    let ops = h.backend.ops();
    let registered = ops.iter().position(|op| *op == Op::OnDisconnectRemove(path.clone())).unwrap();
    let published = ops.iter().position(|op| *op == Op::Set(path.clone())).unwrap();
    assert!(registered < published, "{ops:?}");
}

#[tokio::test]
async fn presence_clears_on_disconnect_and_returns_on_reconnect() {
    let h = harness().await;
    let profile = h.signed_up("ann").await;
    let path = presence_path(&profile.id).unwrap();
    let _tracker = h.users.track_presence().await.unwrap();
    wait_for_value(&h.backend, &path, Some(json!(true))).await;

    h.backend.go_offline().await.unwrap();
    assert_eq!(h.backend.get(&path).await.unwrap(), None);
    // Let the tracker see the disconnect before reconnecting.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    h.backend.go_online().await.unwrap();
    wait_for_value(&h.backend, &path, Some(json!(true))).await;

    let ops = h.backend.ops();
    let registrations: Vec<usize> = ops.iter().enumerate()
        .filter(|(_, op)| **op == Op::OnDisconnectRemove(path.clone()))
        .map(|(i, _)| i)
        .collect();
    let sets: Vec<usize> = ops.iter().enumerate()
        .filter(|(_, op)| **op == Op::Set(path.clone()))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(registrations.len(), 2);
    assert_eq!(sets.len(), 2);
    assert!(registrations[1] < sets[1]);
}

#[tokio::test]
async fn stopped_tracker_no_longer_publishes() {
    let h = harness().await;
    let profile = h.signed_up("ann").await;
    let path = presence_path(&profile.id).unwrap();
    let tracker = h.users.track_presence().await.unwrap();
    wait_for_value(&h.backend, &path, Some(json!(true))).await;

    tracker.stop();
    h.backend.go_offline().await.unwrap();
    h.backend.go_online().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.backend.get(&path).await.unwrap(), None);
}

#[tokio::test]
async fn presence_needs_a_profile() {
    let h = harness().await;
    let err = h.users.track_presence().await.unwrap_err();
    assert_eq!(err.kind(), Some(&ChatError::NotSignedIn));
}

#[tokio::test]
async fn signing_in_as_someone_else_replaces_the_remembered_profile() {
    let h = harness().await;
    h.users.create_user(&new_user("ann")).await.unwrap();
    h.users.create_user(&new_user("bob")).await.unwrap();
    assert_eq!(h.users.get_profile().await.unwrap().username, "bob");

    let auth = h.users
        .login(&Credentials { email: "ann@example.com".to_owned(), password: "correct horse".to_owned() })
        .await
        .unwrap();
    let profile = h.users.get_profile().await.unwrap();
    assert_eq!(profile.id, auth.uid);
    assert_eq!(profile.username, "ann");

    let channel = MessageChannel::new(h.users.clone()).open("lobby").await.unwrap();
    channel.send("hi, it's ann").await.unwrap();
    let messages = within(channel.messages().wait_for(|m| m.len() == 1)).await.unwrap();
    assert_eq!(messages[0].sender_username, "ann");
    assert_eq!(messages[0].sender_email, "ann@example.com");
}

#[tokio::test]
async fn signing_in_on_a_fresh_device_restores_the_profile() {
    let h = harness().await;
    h.users.create_user(&new_user("ann")).await.unwrap();

    let elsewhere = UserService::new(h.auth.clone(), LocalStore::in_memory().await.unwrap());
    assert_eq!(elsewhere.get_profile().await, None);
    elsewhere
        .login(&Credentials { email: "ann@example.com".to_owned(), password: "correct horse".to_owned() })
        .await
        .unwrap();
    assert_eq!(elsewhere.get_profile().await.unwrap().username, "ann");
    elsewhere.track_presence().await.unwrap();
}
