//! Superseding and stale-result tests.
//!
//! Covered:
//! - A newer login supersedes a pending one; only the newer one commits
//! - Logout aborts a pending login
//! - A refresh that lands after logout writes nothing
//! - A newer explicit refresh supersedes a pending one

use super::harness::{login_body, refresh_body, MockReply, TestHarness};
use crate::{AuthError, CredentialPair, SessionState, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use serde_json::Value;
use std::time::Duration;

#[tokio::test]
async fn newer_login_supersedes_pending_one() {
    let harness = TestHarness::signed_out();
    harness.backend.on(LOGIN_PATH, |request| {
        let email = request
            .body
            .as_ref()
            .and_then(|body| body["email"].as_str())
            .unwrap_or_default();
        if email == "slow@example.com" {
            MockReply::ok(login_body("A1", "R1", "slow")).with_delay(Duration::from_millis(100))
        } else {
            MockReply::ok(login_body("B1", "S1", "fast"))
        }
    });

    let session = harness.session();
    let (slow, fast) = tokio::join!(session.login("slow@example.com", "pw"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.login("fast@example.com", "pw").await
    });

    assert!(matches!(slow, Err(AuthError::Superseded)));
    assert!(fast.is_ok());
    assert_eq!(harness.stored_pair(), Some(CredentialPair::new("B1", "S1")));
    assert_eq!(
        harness.session().snapshot().user.map(|u| u.id),
        Some("fast".to_string())
    );
    assert_eq!(harness.hooks.logged_in_users(), vec!["fast".to_string()]);
    assert_eq!(harness.session().state(), SessionState::Authenticated);
}

/// The superseded login's response never reaches the store, even after it arrives.
#[tokio::test]
async fn superseded_login_result_is_dropped_when_it_lands() {
    let harness = TestHarness::signed_out();
    harness.backend.sequence(
        LOGIN_PATH,
        vec![
            MockReply::ok(login_body("A1", "R1", "first")).with_delay(Duration::from_millis(20)),
            MockReply::ok(login_body("B1", "S1", "second")).with_delay(Duration::from_millis(60)),
        ],
    );

    let session = harness.session();
    let (first, second) = tokio::join!(session.login("first@example.com", "pw"), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        session.login("second@example.com", "pw").await
    });

    assert!(matches!(first, Err(AuthError::Superseded)));
    assert!(second.is_ok());
    assert_eq!(harness.stored_pair(), Some(CredentialPair::new("B1", "S1")));
}

#[tokio::test]
async fn logout_aborts_pending_login() {
    let harness = TestHarness::signed_out();
    harness.backend.always(
        LOGIN_PATH,
        MockReply::ok(login_body("A1", "R1", "u1")).with_delay(Duration::from_millis(100)),
    );

    let session = harness.session();
    let (login, logout) = tokio::join!(session.login("ada@example.com", "pw"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.logout().await
    });

    assert!(matches!(login, Err(AuthError::Superseded)));
    assert!(logout.is_ok());
    assert!(harness.credentials().is_empty().unwrap());
    assert!(!harness.session().snapshot().is_authenticated);
    assert_eq!(harness.session().state(), SessionState::Anonymous);
    assert_eq!(harness.backend.call_count(LOGOUT_PATH), 0);
}

/// A refresh that succeeds after the user logged out must not resurrect the session.
#[tokio::test]
async fn refresh_landing_after_logout_is_discarded() {
    let harness = TestHarness::signed_in("A1", "R1");
    let expired = harness.track_expired();
    harness.backend.always(
        REFRESH_PATH,
        MockReply::ok(refresh_body("A2", Some("R2"))).with_delay(Duration::from_millis(50)),
    );
    harness.backend.always(LOGOUT_PATH, MockReply::ok(Value::Null));

    let coordinator = harness.coordinator().clone();
    let refresh = tokio::spawn(async move { coordinator.refresh_access_token().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    harness.session().logout().await.unwrap();
    let refreshed = refresh.await.unwrap();

    assert!(!refreshed);
    assert!(harness.credentials().is_empty().unwrap());
    assert!(!harness.session().snapshot().is_authenticated);
    assert_eq!(expired.count(), 0);
    assert_eq!(harness.backend.call_count(LOGOUT_PATH), 1);
}

/// A refresh that lands after a new login must not overwrite the new session.
#[tokio::test]
async fn refresh_landing_after_relogin_is_discarded() {
    let harness = TestHarness::signed_in("A1", "R1");
    harness.backend.always(
        REFRESH_PATH,
        MockReply::ok(refresh_body("A2", Some("R2"))).with_delay(Duration::from_millis(50)),
    );
    harness.backend.always(LOGOUT_PATH, MockReply::ok(Value::Null));
    harness
        .backend
        .always(LOGIN_PATH, MockReply::ok(login_body("B1", "S1", "u2")));

    let coordinator = harness.coordinator().clone();
    let refresh = tokio::spawn(async move { coordinator.refresh_access_token().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    harness.session().logout().await.unwrap();
    harness.session().login("u2@example.com", "pw").await.unwrap();
    assert!(!refresh.await.unwrap());

    assert_eq!(harness.stored_pair(), Some(CredentialPair::new("B1", "S1")));
    assert_eq!(
        harness.session().snapshot().access_token.as_deref(),
        Some("B1")
    );
}

#[tokio::test]
async fn newer_explicit_refresh_supersedes_pending_one() {
    let harness = TestHarness::signed_in("A1", "R1");
    harness.backend.always(
        REFRESH_PATH,
        MockReply::ok(refresh_body("A2", Some("R2"))).with_delay(Duration::from_millis(50)),
    );

    let session = harness.session();
    let (first, second) = tokio::join!(session.refresh_session(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.refresh_session().await
    });

    assert!(matches!(first, Err(AuthError::Superseded)));
    assert!(second.unwrap());
    assert_eq!(harness.backend.call_count(REFRESH_PATH), 1);
    assert_eq!(harness.session().state(), SessionState::Authenticated);
}
