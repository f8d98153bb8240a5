use jiff::{SignedDuration, Timestamp};
use snip_core::{ReadStorage, Storage, Token, TokenValue};
use snip_generator::{RandomGenerator, SeqGenerator};
use snip_shortener::{Shortener, ShortenerConfig, ShortenerError, ShortenerService, Stats};
use snip_storage::{
    open_storage, FileStorage, InMemoryStorage, SqlStorage, StorageArgs, StorageBackendArg,
};
use snip_test_infra::TempStore;
use std::sync::Arc;

fn config() -> ShortenerConfig {
    ShortenerConfig::builder()
        .base_url("https://s.example")
        .build()
}

fn memory_service() -> ShortenerService<InMemoryStorage, SeqGenerator> {
    ShortenerService::new(InMemoryStorage::new(), SeqGenerator::with_prefix("").unwrap(), config())
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn stale(value: &str, removed: bool) -> Token {
    Token {
        value: TokenValue::new_unchecked(value),
        expire: Timestamp::now() - SignedDuration::from_hours(1),
        removed,
    }
}

#[tokio::test]
async fn repeated_add_returns_same_token() {
    let service = memory_service();

    let first = service.add("u1", "https://a.example").await.unwrap();
    let second = service.add("u1", "https://a.example").await.unwrap();

    assert!(!first.already_exists());
    assert!(second.already_exists());
    assert_eq!(first.token.value, second.token.value);
}

#[tokio::test]
async fn batch_with_known_url_signals_conflict() {
    let service = memory_service();
    let t1 = service.add("u1", "https://a.example").await.unwrap().token;

    let batch = service
        .add_batch("u1", &urls(&["https://a.example", "https://b.example"]))
        .await
        .unwrap();

    assert!(batch.has_conflict());
    assert!(batch.is_existing("https://a.example"));
    assert!(!batch.is_existing("https://b.example"));
    assert_eq!(batch.tokens["https://a.example"].value, t1.value);

    let t2 = &batch.tokens["https://b.example"];
    assert_ne!(t2.value, t1.value);
    assert_eq!(
        service.get(t2.value.as_str()).await.unwrap(),
        "https://b.example"
    );
}

#[tokio::test]
async fn expired_token_does_not_resolve() {
    let service = memory_service();
    service
        .storage()
        .set("u1", "https://a.example", stale("expired", false))
        .await
        .unwrap();

    let err = service.get("expired").await.unwrap_err();
    assert!(matches!(err, ShortenerError::Expired(_)));
}

#[tokio::test]
async fn removed_token_does_not_resolve() {
    let service = memory_service();
    let token = service.add("u1", "https://a.example").await.unwrap().token;

    service
        .remove_tokens(&[token.value.clone()], "u1")
        .await
        .unwrap();

    let err = service.get(token.value.as_str()).await.unwrap_err();
    assert!(matches!(err, ShortenerError::Removed(_)));
}

#[tokio::test]
async fn removing_unknown_tokens_is_not_an_error() {
    let service = memory_service();
    let t1 = service.add("u1", "https://a.example").await.unwrap().token;
    let t2 = service.add("u1", "https://b.example").await.unwrap().token;

    service
        .remove_tokens(
            &[t1.value.clone(), TokenValue::new_unchecked("unknown")],
            "u1",
        )
        .await
        .unwrap();

    assert!(matches!(
        service.get(t1.value.as_str()).await.unwrap_err(),
        ShortenerError::Removed(_)
    ));
    assert_eq!(
        service.get(t2.value.as_str()).await.unwrap(),
        "https://b.example"
    );
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let service = memory_service();

    let err = service.get("nothere").await.unwrap_err();
    assert!(matches!(err, ShortenerError::NotFound(_)));
}

#[tokio::test]
async fn expired_token_is_refreshed_on_add() {
    let service = memory_service();
    service
        .storage()
        .set("u1", "https://a.example", stale("expired", false))
        .await
        .unwrap();

    let shortened = service.add("u1", "https://a.example").await.unwrap();

    assert!(shortened.already_exists());
    assert_eq!(shortened.token.value.as_str(), "expired");
    assert!(shortened.token.expire > Timestamp::now());

    let stored = service
        .storage()
        .get_token_by_url("https://a.example")
        .await
        .unwrap();
    assert_eq!(stored.expire.as_second(), shortened.token.expire.as_second());
    assert_eq!(
        service.get("expired").await.unwrap(),
        "https://a.example"
    );
}

#[tokio::test]
async fn removal_is_not_undone_by_refresh() {
    let service = memory_service();
    service
        .storage()
        .set("u1", "https://a.example", stale("gone", false))
        .await
        .unwrap();
    service
        .remove_tokens(&[TokenValue::new_unchecked("gone")], "u1")
        .await
        .unwrap();

    let shortened = service.add("u1", "https://a.example").await.unwrap();

    assert!(shortened.already_exists());
    assert!(shortened.token.removed);
    assert!(matches!(
        service.get("gone").await.unwrap_err(),
        ShortenerError::Removed(_)
    ));
}

#[tokio::test]
async fn other_owner_cannot_remove_token() {
    let service = memory_service();
    let token = service.add("alice", "https://a.example").await.unwrap().token;

    service
        .remove_tokens(&[token.value.clone()], "bob")
        .await
        .unwrap();

    assert_eq!(
        service.get(token.value.as_str()).await.unwrap(),
        "https://a.example"
    );
}

#[tokio::test]
async fn owner_listing_and_stats() {
    let service = memory_service();
    service
        .add_batch("alice", &urls(&["https://a.example", "https://b.example"]))
        .await
        .unwrap();
    service.add("bob", "https://c.example").await.unwrap();

    let listing = service.owner_urls("alice").await.unwrap();
    assert_eq!(listing.len(), 2);
    for pair in &listing {
        assert!(pair.short_url.starts_with("https://s.example/"));
        let value = pair.short_url.trim_start_matches("https://s.example/");
        assert_eq!(service.get(value).await.unwrap(), pair.original_url);
    }

    assert_eq!(service.stats().await.unwrap(), Stats { urls: 3, owners: 2 });
}

#[tokio::test]
async fn collisions_with_stored_tokens_are_retried() {
    let storage = Arc::new(InMemoryStorage::new());
    let generator = SeqGenerator::with_prefix("").unwrap();
    let first = ShortenerService::from_shared(Arc::clone(&storage), generator.clone(), config());
    let second = ShortenerService::from_shared(storage, generator, config());

    let a = first.add("u1", "https://a.example").await.unwrap();
    let b = second.add("u1", "https://b.example").await.unwrap();

    assert_eq!(a.token.value.as_str(), "aaaaaa");
    assert_eq!(b.token.value.as_str(), "aaaaab");
}

#[tokio::test]
async fn random_tokens_are_six_letters() {
    let service = ShortenerService::new(InMemoryStorage::new(), RandomGenerator::new(), config());

    let shortened = service.add("u1", "https://a.example").await.unwrap();

    let value = shortened.token.value.as_str();
    assert_eq!(value.len(), 6);
    assert!(value.bytes().all(|b| b.is_ascii_alphabetic()));
}

#[tokio::test]
async fn detached_removal_is_eventually_applied() {
    let service = memory_service();
    let token = service.add("u1", "https://a.example").await.unwrap().token;

    service
        .remove_tokens_detached(vec![token.value.clone()], "u1".to_string())
        .await
        .unwrap();

    assert!(matches!(
        service.get(token.value.as_str()).await.unwrap_err(),
        ShortenerError::Removed(_)
    ));
}

#[tokio::test]
async fn detached_removal_failure_does_not_panic() {
    let store = TempStore::new().unwrap();
    let storage = SqlStorage::connect(&store.sqlite_dsn()).await.unwrap();
    let service = ShortenerService::new(storage, SeqGenerator::with_prefix("").unwrap(), config());
    let token = service.add("u1", "https://a.example").await.unwrap().token;

    service.storage().pool().close().await;

    service
        .remove_tokens_detached(vec![token.value], "u1".to_string())
        .await
        .unwrap();
}

#[tokio::test]
async fn tombstone_survives_file_reopen() {
    let store = TempStore::new().unwrap();

    let value = {
        let storage = FileStorage::open(store.snapshot_path()).await.unwrap();
        let service = ShortenerService::new(storage, SeqGenerator::with_prefix("").unwrap(), config());
        let token = service.add("u1", "https://a.example").await.unwrap().token;
        service
            .remove_tokens(&[token.value.clone()], "u1")
            .await
            .unwrap();
        token.value
    };

    let storage = FileStorage::open(store.snapshot_path()).await.unwrap();
    let service = ShortenerService::new(storage, SeqGenerator::with_prefix("").unwrap(), config());
    assert!(matches!(
        service.get(value.as_str()).await.unwrap_err(),
        ShortenerError::Removed(_)
    ));
}

#[tokio::test]
async fn tombstone_survives_sql_reopen() {
    let store = TempStore::new().unwrap();

    let value = {
        let storage = SqlStorage::connect(&store.sqlite_dsn()).await.unwrap();
        let service = ShortenerService::new(storage, SeqGenerator::with_prefix("").unwrap(), config());
        let token = service.add("u1", "https://a.example").await.unwrap().token;
        service
            .remove_tokens(&[token.value.clone()], "u1")
            .await
            .unwrap();
        service.storage().pool().close().await;
        token.value
    };

    let storage = SqlStorage::connect(&store.sqlite_dsn()).await.unwrap();
    let service = ShortenerService::new(storage, SeqGenerator::with_prefix("").unwrap(), config());
    assert!(matches!(
        service.get(value.as_str()).await.unwrap_err(),
        ShortenerError::Removed(_)
    ));
}

#[tokio::test]
async fn works_over_any_configured_backend() {
    let store = TempStore::new().unwrap();
    let backends = [
        (StorageBackendArg::InMemory, None, None),
        (StorageBackendArg::File, Some(store.snapshot_path()), None),
        (StorageBackendArg::Sql, None, Some(store.sqlite_dsn())),
    ];

    for (storage, file_storage_path, database_dsn) in backends {
        let args = StorageArgs {
            storage,
            file_storage_path,
            database_dsn,
        };
        let storage: Arc<dyn Storage> = open_storage(&args).await.unwrap();
        let service = ShortenerService::from_shared(storage, RandomGenerator::new(), config());

        service.ping().await.unwrap();
        let shortened = service.add("u1", "https://a.example").await.unwrap();
        assert_eq!(
            service.get(shortened.token.value.as_str()).await.unwrap(),
            "https://a.example",
            "backend {}",
            args.storage
        );
        assert!(service.add("u1", "https://a.example").await.unwrap().already_exists());
    }
}
