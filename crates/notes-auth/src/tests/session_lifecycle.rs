//! Session controller lifecycle tests.
//!
//! Covered:
//! - Restoring a stored session on init, exactly once
//! - Login success, failure and post-login hooks
//! - Logout: best-effort remote, mandatory local, reentrant-safe
//! - Explicit refresh and user profile updates

use super::harness::{login_body, refresh_body, user, MockReply, TestHarness};
use crate::{
    AuthError, CredentialPair, SessionState, SessionStateChanged, LOGIN_PATH, LOGOUT_PATH,
    REFRESH_PATH,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Init
// =============================================================================

#[tokio::test]
async fn init_restores_stored_session() {
    let harness = TestHarness::new();
    harness.store_session("A1", "R1");
    assert!(harness.session().snapshot().is_initial_loading);

    harness.runtime.init().unwrap();

    let snapshot = harness.session().snapshot();
    assert!(!snapshot.is_initial_loading);
    assert!(snapshot.is_authenticated);
    assert_eq!(snapshot.access_token.as_deref(), Some("A1"));
    assert_eq!(snapshot.user.map(|u| u.id), Some("u1".to_string()));
    assert_eq!(harness.session().state(), SessionState::Authenticated);
}

#[tokio::test]
async fn init_without_session_finishes_loading() {
    let harness = TestHarness::signed_out();

    let snapshot = harness.session().snapshot();
    assert!(!snapshot.is_initial_loading);
    assert!(!snapshot.is_authenticated);
    assert_eq!(harness.session().state(), SessionState::Anonymous);
}

#[tokio::test]
async fn init_is_idempotent() {
    let harness = TestHarness::signed_in("A1", "R1");
    harness.runtime.init().unwrap();
    harness.runtime.init().unwrap();

    assert_eq!(harness.runtime.events().subscriber_count(), 1);
    assert_eq!(harness.session().state(), SessionState::Authenticated);
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn login_persists_session_and_notifies() {
    let harness = TestHarness::signed_out();
    harness
        .backend
        .always(LOGIN_PATH, MockReply::ok(login_body("A1", "R1", "u7")));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let seen = seen.clone();
        harness
            .session()
            .subscribe(move |snapshot| seen.lock().unwrap().push(snapshot.is_authenticated))
    };

    let snapshot = harness
        .session()
        .login("u7@example.com", "hunter2")
        .await
        .unwrap();

    assert!(snapshot.is_authenticated);
    assert!(snapshot.error.is_none());
    assert_eq!(harness.stored_pair(), Some(CredentialPair::new("A1", "R1")));
    assert_eq!(harness.credentials().user().unwrap().map(|u| u.id), Some("u7".into()));
    assert_eq!(harness.session().state(), SessionState::Authenticated);
    assert_eq!(harness.hooks.logged_in_users(), vec!["u7".to_string()]);
    assert_eq!(*seen.lock().unwrap(), vec![true]);

    let calls = harness.backend.calls_to(LOGIN_PATH);
    assert_eq!(
        calls[0].body,
        Some(json!({"email": "u7@example.com", "password": "hunter2"}))
    );
    assert_eq!(calls[0].bearer, None);
}

#[tokio::test]
async fn login_state_changes_are_reported() {
    let harness = TestHarness::signed_out();
    harness
        .backend
        .always(LOGIN_PATH, MockReply::ok(login_body("A1", "R1", "u1")));

    let changes: Arc<Mutex<Vec<SessionStateChanged>>> = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let changes = changes.clone();
        harness
            .session()
            .on_state_change(move |change| changes.lock().unwrap().push(change.clone()))
    };

    harness.session().login("u1@example.com", "pw").await.unwrap();

    let changes = changes.lock().unwrap();
    let states: Vec<_> = changes.iter().map(|c| (c.previous, c.state)).collect();
    assert_eq!(
        states,
        vec![
            (SessionState::Anonymous, SessionState::Authenticating),
            (SessionState::Authenticating, SessionState::Authenticated),
        ]
    );
    assert_eq!(changes[1].user_id.as_deref(), Some("u1"));
}

#[tokio::test]
async fn rejected_login_sets_error_and_stays_signed_out() {
    let harness = TestHarness::signed_out();
    harness.backend.always(
        LOGIN_PATH,
        MockReply::status(401, json!({"statusCode": 401, "message": "Invalid email or password"})),
    );

    let err = harness
        .session()
        .login("ada@example.com", "wrong")
        .await
        .unwrap_err();

    match err {
        AuthError::InvalidCredentials(message) => assert_eq!(message, "Invalid email or password"),
        other => panic!("unexpected error: {:?}", other),
    }
    let snapshot = harness.session().snapshot();
    assert!(!snapshot.is_authenticated);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Invalid credentials: Invalid email or password")
    );
    assert!(harness.credentials().is_empty().unwrap());
    assert_eq!(harness.session().state(), SessionState::Anonymous);
    assert!(harness.hooks.logged_in_users().is_empty());
}

/// A server error whose body claims 401 is not treated as bad credentials.
#[tokio::test]
async fn login_server_error_is_not_invalid_credentials() {
    let harness = TestHarness::signed_out();
    harness.backend.always(
        LOGIN_PATH,
        MockReply::status(500, json!({"statusCode": 401, "message": "Upstream auth failed"})),
    );

    let err = harness
        .session()
        .login("ada@example.com", "pw")
        .await
        .unwrap_err();

    match err {
        AuthError::Transport(e) => assert_eq!(e.status_code(), Some(500)),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!harness.session().snapshot().is_authenticated);
}

/// The error from a failed attempt is cleared when the next attempt starts.
#[tokio::test]
async fn retrying_login_clears_previous_error() {
    let harness = TestHarness::signed_out();
    harness.backend.sequence(
        LOGIN_PATH,
        vec![
            MockReply::network_error(),
            MockReply::ok(login_body("A1", "R1", "u1")),
        ],
    );

    let err = harness.session().login("ada@example.com", "pw").await.unwrap_err();
    assert!(err.is_transient());
    assert!(harness.session().snapshot().error.is_some());

    let snapshot = harness.session().login("ada@example.com", "pw").await.unwrap();
    assert!(snapshot.error.is_none());
    assert!(snapshot.is_authenticated);
}

#[tokio::test]
async fn failing_post_login_hook_does_not_fail_login() {
    let harness = TestHarness::signed_out();
    harness.hooks.fail_after_login();
    harness
        .backend
        .always(LOGIN_PATH, MockReply::ok(login_body("A1", "R1", "u1")));

    let snapshot = harness.session().login("ada@example.com", "pw").await.unwrap();

    assert!(snapshot.is_authenticated);
    assert_eq!(harness.hooks.logged_in_users(), vec!["u1".to_string()]);
}

#[tokio::test]
async fn login_while_signed_in_is_rejected() {
    let harness = TestHarness::signed_in("A1", "R1");

    let err = harness.session().login("ada@example.com", "pw").await.unwrap_err();

    assert!(matches!(err, AuthError::AlreadyLoggedIn));
    assert_eq!(harness.backend.call_count(LOGIN_PATH), 0);
    assert_eq!(harness.stored_pair(), Some(CredentialPair::new("A1", "R1")));
}

// =============================================================================
// Logout
// =============================================================================

#[tokio::test]
async fn logout_invalidates_remotely_and_clears_locally() {
    let harness = TestHarness::signed_in("A1", "R1");
    harness.backend.always(LOGOUT_PATH, MockReply::ok(Value::Null));

    harness.session().logout().await.unwrap();

    let calls = harness.backend.calls_to(LOGOUT_PATH);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body, Some(json!({"refreshToken": "R1"})));
    assert!(harness.credentials().is_empty().unwrap());
    assert!(!harness.session().snapshot().is_authenticated);
    assert!(harness.session().snapshot().error.is_none());
    assert_eq!(harness.session().state(), SessionState::Anonymous);
    assert_eq!(harness.hooks.navigations(), 1);
}

/// Local state is cleared even when the server cannot be reached.
#[tokio::test]
async fn logout_clears_locally_when_remote_fails() {
    let harness = TestHarness::signed_in("A1", "R1");
    harness.backend.always(LOGOUT_PATH, MockReply::network_error());

    harness.session().logout().await.unwrap();

    assert!(harness.credentials().is_empty().unwrap());
    assert_eq!(harness.session().state(), SessionState::Anonymous);
    assert_eq!(harness.hooks.navigations(), 1);
}

/// Two concurrent logouts: one remote call, one navigation, empty store.
#[tokio::test]
async fn concurrent_logouts_run_once() {
    let harness = TestHarness::signed_in("A1", "R1");
    harness.backend.always(
        LOGOUT_PATH,
        MockReply::ok(Value::Null).with_delay(Duration::from_millis(30)),
    );

    let (first, second) = tokio::join!(harness.session().logout(), harness.session().logout());

    assert!(first.is_ok() && second.is_ok());
    assert_eq!(harness.backend.call_count(LOGOUT_PATH), 1);
    assert_eq!(harness.hooks.navigations(), 1);
    assert!(harness.credentials().is_empty().unwrap());
}

/// Logging out twice in a row navigates only for the session that existed.
#[tokio::test]
async fn sequential_logouts_navigate_once() {
    let harness = TestHarness::signed_in("A1", "R1");
    harness.backend.always(LOGOUT_PATH, MockReply::ok(Value::Null));

    harness.session().logout().await.unwrap();
    harness.session().logout().await.unwrap();

    assert_eq!(harness.backend.call_count(LOGOUT_PATH), 1);
    assert_eq!(harness.hooks.navigations(), 1);
}

// =============================================================================
// Explicit refresh and profile
// =============================================================================

#[tokio::test]
async fn refresh_session_updates_tokens() {
    let harness = TestHarness::signed_in("A1", "R1");
    harness
        .backend
        .always(REFRESH_PATH, MockReply::ok(refresh_body("A2", Some("R2"))));

    assert!(harness.session().refresh_session().await.unwrap());

    assert_eq!(harness.stored_pair(), Some(CredentialPair::new("A2", "R2")));
    assert_eq!(harness.session().state(), SessionState::Authenticated);
}

#[tokio::test]
async fn failed_refresh_session_logs_out() {
    let harness = TestHarness::signed_in("A1", "R1");
    harness
        .backend
        .always(REFRESH_PATH, MockReply::unauthorized());

    assert!(!harness.session().refresh_session().await.unwrap());

    assert_eq!(harness.session().state(), SessionState::Anonymous);
    assert!(harness.credentials().is_empty().unwrap());
    assert_eq!(harness.hooks.navigations(), 1);
}

#[tokio::test]
async fn refresh_session_requires_login() {
    let harness = TestHarness::signed_out();

    let err = harness.session().refresh_session().await.unwrap_err();

    assert!(matches!(err, AuthError::NotLoggedIn));
    assert_eq!(harness.backend.call_count(REFRESH_PATH), 0);
}

#[tokio::test]
async fn update_user_persists_profile() {
    let harness = TestHarness::signed_in("A1", "R1");
    let mut updated = user("u1");
    updated.nickname = Some("countess".into());

    harness.session().update_user(updated.clone()).unwrap();

    assert_eq!(harness.credentials().user().unwrap(), Some(updated.clone()));
    assert_eq!(harness.session().snapshot().user, Some(updated));
    assert_eq!(harness.stored_pair(), Some(CredentialPair::new("A1", "R1")));
}

#[tokio::test]
async fn update_user_requires_login() {
    let harness = TestHarness::signed_out();
    let err = harness.session().update_user(user("u1")).unwrap_err();
    assert!(matches!(err, AuthError::NotLoggedIn));
}

#[tokio::test]
async fn clear_error_resets_message() {
    let harness = TestHarness::signed_out();
    harness.backend.always(LOGIN_PATH, MockReply::unauthorized());
    let _ = harness.session().login("ada@example.com", "pw").await;
    assert!(harness.session().snapshot().error.is_some());

    harness.session().clear_error();

    assert!(harness.session().snapshot().error.is_none());
}
