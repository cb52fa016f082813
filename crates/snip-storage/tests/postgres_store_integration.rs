use std::collections::HashSet;
use std::time::Duration;

use snip_generator::SeqGenerator;
use snip_storage::{
    DeleteTarget, EntryStore, NewEntry, PostgresStore, ShortCode, Stat, StoreError,
};
use snip_test_infra::postgres::{PostgresConfig, PostgresServer};
use sqlx::postgres::PgPoolOptions;

struct Fixture {
    _postgres: PostgresServer,
    store: PostgresStore<SeqGenerator>,
}

impl Fixture {
    async fn start() -> Self {
        Self::start_with(SeqGenerator::with_prefix("wh")).await
    }

    async fn start_with(generator: SeqGenerator) -> Self {
        let postgres = PostgresServer::new(PostgresConfig::builder().build())
            .await
            .expect("start postgres");
        let url = postgres.database_url().await.expect("postgres url");
        let pool = connect_with_retry(&url).await;

        let store = PostgresStore::with_generator(pool, generator);
        store.migrate().await.expect("create schema");

        Self {
            _postgres: postgres,
            store,
        }
    }
}

async fn connect_with_retry(url: &str) -> sqlx::PgPool {
    let mut last_error = None;

    for _ in 0..20 {
        match PgPoolOptions::new().max_connections(5).connect(url).await {
            Ok(pool) => return pool,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect postgres: {last_error:?}");
}

fn code(value: &str) -> ShortCode {
    ShortCode::new_unchecked(value)
}

#[tokio::test]
async fn post_and_get() {
    let fixture = Fixture::start().await;

    let outcome = fixture
        .store
        .post(NewEntry::new("https://a.example", "u1").with_correlation_id("c1"))
        .await
        .unwrap();
    assert!(!outcome.duplicate);
    assert_eq!(outcome.short_code().as_str(), "wh000000");

    let got = fixture.store.get(outcome.short_code()).await.unwrap().unwrap();
    assert_eq!(got.original_url, "https://a.example");
    assert_eq!(got.correlation_id, "c1");
    assert_eq!(got.user_id, "u1");
    assert!(!got.deleted);

    assert!(fixture.store.get(&code("missing")).await.unwrap().is_none());
}

#[tokio::test]
async fn repost_returns_existing_code_as_duplicate() {
    let fixture = Fixture::start().await;

    let first = fixture
        .store
        .post(NewEntry::new("https://a.example", "u1"))
        .await
        .unwrap();
    let second = fixture
        .store
        .post(NewEntry::new("https://a.example", "u1"))
        .await
        .unwrap();
    let third = fixture
        .store
        .post(NewEntry::new("https://a.example", "u1"))
        .await
        .unwrap();

    assert!(second.duplicate);
    assert!(third.duplicate);
    assert_eq!(first.short_code(), second.short_code());
    assert_eq!(first.entry.id, second.entry.id);

    let found = fixture
        .store
        .find_by_original_url("https://a.example", "u1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&found.short_code, first.short_code());
    assert!(fixture
        .store
        .find_by_original_url("https://a.example", "u2")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn generated_collision_is_redrawn() {
    let fixture = Fixture::start().await;

    fixture
        .store
        .post(NewEntry::new("https://taken.example", "u0").with_short_code(code("wh000000")))
        .await
        .unwrap();

    let outcome = fixture
        .store
        .post(NewEntry::new("https://b.example", "u1"))
        .await
        .unwrap();

    assert_eq!(outcome.short_code().as_str(), "wh000001");
}

#[tokio::test]
async fn requested_code_taken_by_other_user_is_rejected() {
    let fixture = Fixture::start().await;

    fixture
        .store
        .post(NewEntry::new("https://a.example", "u1").with_short_code(code("custom")))
        .await
        .unwrap();

    let err = fixture
        .store
        .post(NewEntry::new("https://b.example", "u2").with_short_code(code("custom")))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::ShortCodeTaken(c) if c == "custom"));
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let fixture = Fixture::start().await;

    fixture
        .store
        .post(NewEntry::new("https://taken.example", "u0").with_short_code(code("taken")))
        .await
        .unwrap();

    let err = fixture
        .store
        .post_batch(vec![
            NewEntry::new("https://1.example", "u1"),
            NewEntry::new("https://2.example", "u1"),
            NewEntry::new("https://3.example", "u1").with_short_code(code("taken")),
            NewEntry::new("https://4.example", "u1"),
            NewEntry::new("https://5.example", "u1"),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Batch { index: 2, .. }));
    assert!(fixture.store.get_user_urls("u1").await.unwrap().is_empty());
    assert_eq!(fixture.store.get_stat().await.unwrap().urls, 1);
}

#[tokio::test]
async fn batch_tolerates_duplicates_and_collisions() {
    let fixture = Fixture::start().await;

    fixture
        .store
        .post(NewEntry::new("https://taken.example", "u0").with_short_code(code("wh000001")))
        .await
        .unwrap();

    let outcomes = fixture
        .store
        .post_batch(vec![
            NewEntry::new("https://a.example", "u1").with_correlation_id("1"),
            NewEntry::new("https://b.example", "u1").with_correlation_id("2"),
            NewEntry::new("https://a.example", "u1").with_correlation_id("3"),
        ])
        .await
        .unwrap();

    let flags: Vec<bool> = outcomes.iter().map(|o| o.duplicate).collect();
    assert_eq!(flags, vec![false, false, true]);
    assert_eq!(outcomes[0].short_code().as_str(), "wh000000");
    assert_eq!(outcomes[1].short_code().as_str(), "wh000002");
    assert_eq!(outcomes[2].short_code(), outcomes[0].short_code());
    assert_eq!(fixture.store.get_user_urls("u1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn scenario_post_dedup_delete_stat() {
    let fixture = Fixture::start().await;

    let created = fixture
        .store
        .post(NewEntry::new("https://a.example", "u1"))
        .await
        .unwrap();
    let code = created.short_code().clone();

    fixture
        .store
        .delete_user_urls(&[DeleteTarget::new("u1", code.clone())])
        .await
        .unwrap();

    assert!(fixture.store.get(&code).await.unwrap().unwrap().deleted);
    assert!(fixture.store.get_user_urls("u1").await.unwrap().is_empty());
    assert_eq!(
        fixture.store.get_stat().await.unwrap(),
        Stat { urls: 1, users: 1 }
    );
}

#[tokio::test]
async fn delete_matches_owner_and_code() {
    let fixture = Fixture::start().await;

    let mut codes = Vec::new();
    for i in 0..5 {
        let outcome = fixture
            .store
            .post(NewEntry::new(format!("https://{i}.example"), "u1"))
            .await
            .unwrap();
        codes.push(outcome.short_code().clone());
    }

    fixture
        .store
        .delete_user_urls(&[
            DeleteTarget::new("u1", codes[0].clone()),
            DeleteTarget::new("u1", codes[1].clone()),
            DeleteTarget::new("u2", codes[2].clone()),
            DeleteTarget::new("u1", code("unknown")),
        ])
        .await
        .unwrap();

    let remaining: HashSet<ShortCode> = fixture
        .store
        .get_user_urls("u1")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.short_code)
        .collect();
    let expected: HashSet<ShortCode> = codes[2..].iter().cloned().collect();
    assert_eq!(remaining, expected);
}

#[tokio::test]
async fn deleted_entries_still_dedup() {
    let fixture = Fixture::start().await;

    let created = fixture
        .store
        .post(NewEntry::new("https://a.example", "u1"))
        .await
        .unwrap();
    fixture
        .store
        .delete_user_urls(&[DeleteTarget::new("u1", created.short_code().clone())])
        .await
        .unwrap();

    let again = fixture
        .store
        .post(NewEntry::new("https://a.example", "u1"))
        .await
        .unwrap();

    assert!(again.duplicate);
    assert!(again.entry.deleted);
    assert_eq!(again.short_code(), created.short_code());
}

#[tokio::test]
async fn ping_then_close() {
    let fixture = Fixture::start().await;

    fixture.store.ping().await.unwrap();
    fixture.store.close().await.unwrap();

    assert!(matches!(
        fixture.store.ping().await.unwrap_err(),
        StoreError::Closed
    ));
}
