//! Integration tests for the sync lifecycle: upload, reconcile, download.
//!
//! Each test creates its own in-memory SQLite database for isolation and
//! drives the service the way the transport layer would.

use std::collections::BTreeSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use secrecy::SecretString;

use podsync::auth::{hash_password, DbAuthenticator};
use podsync::config::Config;
use podsync::error::status_for;
use podsync::storage::{Database, User};
use podsync::{SyncError, SyncService};

const PASSWORD: &str = "correct horse";

fn secret(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

async fn setup() -> (SyncService, User) {
    let db = Database::open(":memory:").await.unwrap();
    let user = db
        .create_user("alice", "alice@example.com", &hash_password(&secret(PASSWORD)).unwrap())
        .await
        .unwrap();
    let auth = Arc::new(DbAuthenticator::new(db.clone()));
    (SyncService::new(db, auth, Config::default()), user)
}

fn urls(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|u| u.to_string()).collect()
}

fn opml(feeds: &[&str]) -> Vec<u8> {
    let outlines: String = feeds
        .iter()
        .map(|url| format!(r#"<outline type="rss" text="{url}" xmlUrl="{url}"/>"#))
        .collect();
    format!(r#"<?xml version="1.0"?><opml version="2.0"><head><title>t</title></head><body>{outlines}</body></opml>"#)
        .into_bytes()
}

async fn download_txt(service: &SyncService, device: &str) -> String {
    service
        .download("alice", &secret(PASSWORD), "alice", device, "txt")
        .await
        .unwrap()
        .body
}

// ============================================================================
// Device-scoped Upload / Download
// ============================================================================

#[tokio::test]
async fn test_upload_reconciles_against_current_state() {
    let (service, _) = setup().await;
    let pw = secret(PASSWORD);

    service
        .upload("alice", &pw, "alice", "phone", "txt", b"http://b.com/rss\nhttp://c.com/rss\n")
        .await
        .unwrap();

    let outcome = service
        .upload("alice", &pw, "alice", "phone", "opml", &opml(&["http://a.com/rss", "http://b.com/rss"]))
        .await
        .unwrap();
    assert_eq!(outcome.subscribed, urls(&["http://a.com/rss"]));
    assert_eq!(outcome.unsubscribed, urls(&["http://c.com/rss"]));

    assert_eq!(download_txt(&service, "phone").await, "http://a.com/rss\nhttp://b.com/rss");
}

#[tokio::test]
async fn test_reupload_is_noop() {
    let (service, _) = setup().await;
    let pw = secret(PASSWORD);
    let body = br#"["http://a.com/rss", {"url": "http://b.com/rss", "title": "B"}]"#;

    let first = service.upload("alice", &pw, "alice", "phone", "json", body).await.unwrap();
    assert_eq!(first.subscribed.len(), 2);

    let second = service.upload("alice", &pw, "alice", "phone", "json", body).await.unwrap();
    assert!(second.subscribed.is_empty());
    assert!(second.unsubscribed.is_empty());
}

#[tokio::test]
async fn test_metadata_carried_into_podcasts() {
    let (service, _) = setup().await;
    let body = br#"[{"url": "http://b.com/rss", "title": "Bee Show", "description": "About bees"}]"#;
    service
        .upload("alice", &secret(PASSWORD), "alice", "phone", "json", body)
        .await
        .unwrap();

    let podcast = service
        .database()
        .get_podcast_by_url("http://b.com/rss")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(podcast.title.as_deref(), Some("Bee Show"));
    assert_eq!(podcast.description.as_deref(), Some("About bees"));

    let opml = service
        .download("alice", &secret(PASSWORD), "alice", "phone", "opml")
        .await
        .unwrap();
    assert_eq!(opml.content_type, "text/xml");
    assert!(opml.body.contains("alice&apos;s subscription list") || opml.body.contains("alice's subscription list"));
    assert!(opml.body.contains("Bee Show"));

    let detailed = service
        .download("alice", &secret(PASSWORD), "alice", "phone", "json-detailed")
        .await
        .unwrap();
    assert_eq!(detailed.content_type, "application/json");
    let json: serde_json::Value = serde_json::from_str(&detailed.body).unwrap();
    assert_eq!(json[0]["url"], "http://b.com/rss");
    assert_eq!(json[0]["title"], "Bee Show");
    assert_eq!(json[0]["description"], "About bees");
}

#[tokio::test]
async fn test_equivalent_urls_do_not_resubscribe() {
    let (service, _) = setup().await;
    let pw = secret(PASSWORD);
    service
        .upload("alice", &pw, "alice", "phone", "txt", b"http://Example.com/feed/\n")
        .await
        .unwrap();
    let outcome = service
        .upload("alice", &pw, "alice", "phone", "txt", b"HTTP://example.com/feed\n# comment\n\nnot a url at all\n")
        .await
        .unwrap();
    assert!(outcome.subscribed.is_empty());
    assert!(outcome.unsubscribed.is_empty());
}

#[tokio::test]
async fn test_malformed_upload_creates_nothing() {
    let (service, user) = setup().await;
    let pw = secret(PASSWORD);

    let err = service
        .upload("alice", &pw, "alice", "phone", "opml", b"<opml><body><outline xmlUrl=")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Parse(_)));

    let err = service
        .upload("alice", &pw, "alice", "phone", "json", br#"[{"title": "no url"}]"#)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Parse(_)));

    assert!(service.database().get_device(user.id, "phone").await.unwrap().is_none());
    assert!(service.database().devices_for_user(user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_format() {
    let (service, _) = setup().await;
    let err = service
        .upload("alice", &secret(PASSWORD), "alice", "phone", "yaml", b"")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnsupportedFormat(_)));
    assert_eq!(err.to_body().error, "unsupported_format");
}

#[tokio::test]
async fn test_other_users_list_rejected() {
    let (service, _) = setup().await;
    service
        .database()
        .create_user("bob", "bob@example.com", &hash_password(&secret("bobpw")).unwrap())
        .await
        .unwrap();

    let err = service
        .download("bob", &secret("bobpw"), "alice", "phone", "txt")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AuthFailure));

    let err = service
        .download("alice", &secret("wrong"), "alice", "phone", "txt")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AuthFailure));
}

#[tokio::test]
async fn test_download_unknown_device() {
    let (service, _) = setup().await;
    let err = service
        .download("alice", &secret(PASSWORD), "alice", "tablet", "json")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

// ============================================================================
// Legacy Endpoints
// ============================================================================

#[tokio::test]
async fn test_legacy_upload_and_getlist() {
    let (service, user) = setup().await;
    let pw = secret(PASSWORD);

    let result = service
        .upload_legacy(Some("alice@example.com"), Some(&pw), Some(&opml(&["http://a.com/rss"])))
        .await;
    assert_eq!(status_for(&result), "@SUCCESS");

    let device = service
        .database()
        .get_device(user.id, "legacy")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.name, "Legacy Device");
    assert_eq!(device.device_type, "unknown");

    let list = service
        .get_list_legacy(Some("alice@example.com"), Some(&pw))
        .await
        .unwrap();
    assert!(list.contains(r#"xmlUrl="http://a.com/rss""#));
}

#[tokio::test]
async fn test_legacy_status_tokens() {
    let (service, _) = setup().await;
    let doc = opml(&["http://a.com/rss"]);

    let wrong = service
        .upload_legacy(Some("alice@example.com"), Some(&secret("nope")), Some(&doc))
        .await;
    assert_eq!(status_for(&wrong), "@AUTHFAIL");

    let unknown = service
        .upload_legacy(Some("nobody@example.com"), Some(&secret(PASSWORD)), Some(&doc))
        .await;
    assert_eq!(status_for(&unknown), "@AUTHFAIL");

    let missing_file = service
        .upload_legacy(Some("alice@example.com"), Some(&secret(PASSWORD)), None)
        .await;
    assert_eq!(status_for(&missing_file), "@PROTOERROR");

    let garbage = service
        .upload_legacy(Some("alice@example.com"), Some(&secret(PASSWORD)), Some(b"not xml"))
        .await;
    assert_eq!(status_for(&garbage), "@PROTOERROR");

    let no_credentials = service.get_list_legacy(None, None).await;
    assert!(matches!(no_credentials, Err(SyncError::AuthFailure)));
}

// ============================================================================
// Single Subscriptions and Sync Groups
// ============================================================================

#[tokio::test]
async fn test_subscribe_and_unsubscribe_single() {
    let (service, user) = setup().await;
    service
        .upload("alice", &secret(PASSWORD), "alice", "phone", "txt", b"")
        .await
        .unwrap();

    let podcast = service.subscribe_url(" Example.com/rss ").await.unwrap();
    assert_eq!(podcast.url, "http://example.com/rss");

    assert!(service.subscribe(&user, podcast.id, "phone").await.unwrap());
    assert!(!service.subscribe(&user, podcast.id, "phone").await.unwrap());
    assert_eq!(download_txt(&service, "phone").await, "http://example.com/rss");

    assert!(service.unsubscribe(&user, podcast.id, "phone").await.unwrap());
    assert!(!service.unsubscribe(&user, podcast.id, "phone").await.unwrap());
    assert_eq!(download_txt(&service, "phone").await, "");

    assert!(matches!(
        service.subscribe(&user, 9999, "phone").await,
        Err(SyncError::NotFound(_))
    ));
    assert!(matches!(
        service.subscribe_url("   ").await,
        Err(SyncError::MalformedRequest(_))
    ));
}

#[tokio::test]
async fn test_sync_group_shares_state() {
    let (service, user) = setup().await;
    let pw = secret(PASSWORD);
    service
        .upload("alice", &pw, "alice", "laptop", "txt", b"http://x.com/rss\n")
        .await
        .unwrap();
    service.upload("alice", &pw, "alice", "phone", "txt", b"").await.unwrap();

    service.sync_devices(&user, &["laptop", "phone"]).await.unwrap();
    assert_eq!(download_txt(&service, "phone").await, "http://x.com/rss");

    let podcast = service
        .database()
        .get_podcast_by_url("http://x.com/rss")
        .await
        .unwrap()
        .unwrap();
    assert!(service.subscribe_targets(&user, podcast.id).await.unwrap().is_empty());

    // Removing it on one member removes it for the group
    let outcome = service.upload("alice", &pw, "alice", "phone", "txt", b"").await.unwrap();
    assert_eq!(outcome.unsubscribed, urls(&["http://x.com/rss"]));
    assert_eq!(download_txt(&service, "laptop").await, "");

    // Out of the group, each device is back to its own log
    service.unsync_device(&user, "phone").await.unwrap();
    let targets = service.subscribe_targets(&user, podcast.id).await.unwrap();
    let target_uids: Vec<&str> = targets.iter().map(|d| d.uid.as_str()).collect();
    assert_eq!(target_uids, vec!["phone"]);
    assert_eq!(download_txt(&service, "laptop").await, "http://x.com/rss");

    assert!(matches!(
        service.sync_devices(&user, &["laptop"]).await,
        Err(SyncError::MalformedRequest(_))
    ));
}

#[tokio::test]
async fn test_concurrent_uploads_converge() {
    let (service, _) = setup().await;
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let body = format!("http://shared.com/rss\nhttp://own{i}.com/rss\n");
                service
                    .upload("alice", &secret(PASSWORD), "alice", "phone", "txt", body.as_bytes())
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let final_list = download_txt(&service, "phone").await;
    let lines: Vec<&str> = final_list.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.contains(&"http://shared.com/rss"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_on_file_database() {
    let path = std::env::temp_dir().join(format!("podsync-concurrent-{}.db", std::process::id()));
    let path_str = path.to_str().unwrap().to_owned();
    let cleanup = |p: &str| {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{p}{suffix}"));
        }
    };
    cleanup(&path_str);

    let db = Database::open(&path_str).await.unwrap();
    db.create_user("alice", "alice@example.com", &hash_password(&secret(PASSWORD)).unwrap())
        .await
        .unwrap();
    let auth = Arc::new(DbAuthenticator::new(db.clone()));
    let service = SyncService::new(db, auth, Config::default());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let body = format!("http://shared.com/rss\nhttp://own{i}.com/rss\n");
                service
                    .upload("alice", &secret(PASSWORD), "alice", "phone", "txt", body.as_bytes())
                    .await
            })
        })
        .collect();
    let mut failures = Vec::new();
    for handle in handles {
        if let Err(e) = handle.await.unwrap() {
            failures.push(e.to_string());
        }
    }

    let final_list = download_txt(&service, "phone").await;
    cleanup(&path_str);

    assert!(failures.is_empty(), "uploads failed: {failures:?}");
    assert_eq!(final_list.lines().count(), 2);
}
