use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use herald_core::error::AppError;
use herald_core::item::{ItemStatus, NewItem, StatusUpdate};
use herald_core::traits::ItemStore;
use herald_db::ItemRepository;
use uuid::Uuid;

use crate::integration::common::{age_item, set_status, setup_test_db};

fn new_item(n: usize) -> NewItem {
    NewItem::new(
        "test-feed",
        format!("https://example.com/news/{n}"),
        format!("Headline {n}"),
    )
}

#[tokio::test]
async fn create_item_starts_pending() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool);

    let item = repo.create_item(new_item(1)).await.unwrap();

    assert_eq!(item.source, "test-feed");
    assert_eq!(item.url, "https://example.com/news/1");
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.retry_count, 0);
    assert!(item.scraped_content.is_none());
    assert!(item.error_message.is_none());

    let fetched = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, item.id);
    assert!(repo.get_item(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn reserve_takes_batch_newest_first() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    let mut ids = Vec::new();
    for n in 0..5 {
        let item = repo.create_item(new_item(n)).await.unwrap();
        // Item 0 is the newest.
        age_item(&pool, item.id, n as i32 * 10).await;
        ids.push(item.id);
    }

    let reserved = repo.reserve_eligible(3).await.unwrap();

    let reserved_ids: Vec<Uuid> = reserved.iter().map(|i| i.id).collect();
    assert_eq!(reserved_ids, ids[..3].to_vec());
    assert!(reserved.iter().all(|i| i.status == ItemStatus::InQueue));
    assert_eq!(repo.count_by_status(ItemStatus::InQueue).await.unwrap(), 3);
    assert_eq!(repo.count_by_status(ItemStatus::Pending).await.unwrap(), 2);
}

#[tokio::test]
async fn reserve_includes_retry_and_skips_other_states() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    let retry = repo.create_item(new_item(1)).await.unwrap();
    set_status(&pool, retry.id, "retry").await;
    for (n, status) in [(2, "in_queue"), (3, "scraped"), (4, "failed")] {
        let item = repo.create_item(new_item(n)).await.unwrap();
        set_status(&pool, item.id, status).await;
    }

    let reserved = repo.reserve_eligible(10).await.unwrap();
    assert_eq!(reserved.len(), 1);
    assert_eq!(reserved[0].id, retry.id);

    assert!(repo.reserve_eligible(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_reserves_never_share_items() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool);

    for n in 0..10 {
        repo.create_item(new_item(n)).await.unwrap();
    }

    let (first, second) = (repo.clone(), repo.clone());
    let (a, b) = tokio::join!(first.reserve_eligible(4), second.reserve_eligible(4));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.len() + b.len(), 8);
    let unique: HashSet<Uuid> = a.iter().chain(b.iter()).map(|i| i.id).collect();
    assert_eq!(unique.len(), 8);
    assert_eq!(repo.count_by_status(ItemStatus::Pending).await.unwrap(), 2);
}

#[tokio::test]
async fn retry_update_increments_retry_count() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool);

    let item = repo.create_item(new_item(1)).await.unwrap();
    repo.reserve_eligible(1).await.unwrap();

    repo.update_status(item.id, StatusUpdate::retry("HTTP 503"))
        .await
        .unwrap();

    let updated = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(updated.status, ItemStatus::Retry);
    assert_eq!(updated.retry_count, 1);
    assert_eq!(updated.error_message.as_deref(), Some("HTTP 503"));
    assert!(updated.updated_at >= item.updated_at);

    repo.reserve_eligible(1).await.unwrap();
    repo.update_status(item.id, StatusUpdate::failed("gave up"))
        .await
        .unwrap();
    let failed = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(failed.status, ItemStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.error_message.as_deref(), Some("gave up"));
}

#[tokio::test]
async fn scraped_update_stores_content_and_clears_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool);

    let item = repo.create_item(new_item(1)).await.unwrap();
    repo.reserve_eligible(1).await.unwrap();
    repo.update_status(item.id, StatusUpdate::retry("timeout"))
        .await
        .unwrap();
    repo.reserve_eligible(1).await.unwrap();
    repo.update_status(item.id, StatusUpdate::scraped("# Body"))
        .await
        .unwrap();

    let scraped = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(scraped.status, ItemStatus::Scraped);
    assert_eq!(scraped.scraped_content.as_deref(), Some("# Body"));
    assert!(scraped.error_message.is_none());
    assert_eq!(scraped.retry_count, 1);
}

#[tokio::test]
async fn update_without_content_keeps_existing_content() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    let item = repo.create_item(new_item(1)).await.unwrap();
    repo.reserve_eligible(1).await.unwrap();
    repo.update_status(item.id, StatusUpdate::scraped("kept"))
        .await
        .unwrap();
    set_status(&pool, item.id, "in_queue").await;
    repo.update_status(item.id, StatusUpdate::failed("late failure"))
        .await
        .unwrap();

    let updated = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(updated.scraped_content.as_deref(), Some("kept"));
    assert_eq!(updated.error_message.as_deref(), Some("late failure"));
}

#[tokio::test]
async fn update_outside_the_state_machine_is_rejected() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool);

    let item = repo.create_item(new_item(1)).await.unwrap();
    let err = repo
        .update_status(item.id, StatusUpdate::scraped("too early"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidTransition {
            from: ItemStatus::Pending,
            to: ItemStatus::Scraped,
            ..
        }
    ));

    repo.reserve_eligible(1).await.unwrap();
    repo.update_status(item.id, StatusUpdate::scraped("body"))
        .await
        .unwrap();
    let err = repo
        .update_status(item.id, StatusUpdate::retry("stale job"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidTransition {
            from: ItemStatus::Scraped,
            to: ItemStatus::Retry,
            ..
        }
    ));

    let stored = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::Scraped);
    assert_eq!(stored.retry_count, 0);
    assert!(stored.error_message.is_none());
}

#[tokio::test]
async fn update_unknown_item_is_not_found() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool);

    let err = repo
        .update_status(Uuid::new_v4(), StatusUpdate::scraped("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn list_by_status_is_newest_first_and_limited() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    let mut ids = Vec::new();
    for n in 0..4 {
        let item = repo.create_item(new_item(n)).await.unwrap();
        age_item(&pool, item.id, n as i32).await;
        set_status(&pool, item.id, "in_queue").await;
        ids.push(item.id);
    }
    repo.create_item(new_item(99)).await.unwrap();

    let limited = repo.list_by_status(ItemStatus::InQueue, 2).await.unwrap();
    assert_eq!(
        limited.iter().map(|i| i.id).collect::<Vec<_>>(),
        ids[..2].to_vec()
    );

    let all = repo
        .list_by_status(ItemStatus::InQueue, usize::MAX)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn create_item_rejects_duplicate_url() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool);

    repo.create_item(new_item(1)).await.unwrap();
    let err = repo.create_item(new_item(1)).await.unwrap_err();

    assert!(matches!(err, AppError::AlreadyExists(ref msg) if msg.contains("https://example.com/news/1")));
    assert_eq!(repo.count_by_status(ItemStatus::Pending).await.unwrap(), 1);
}

#[tokio::test]
async fn add_items_skips_stored_and_repeated_urls() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool);

    repo.create_item(new_item(1)).await.unwrap();

    let added = repo
        .add_items(vec![new_item(1), new_item(2), new_item(3), new_item(2)])
        .await
        .unwrap();

    assert_eq!(added, 2);
    assert_eq!(repo.count_by_status(ItemStatus::Pending).await.unwrap(), 3);
    assert_eq!(repo.add_items(vec![new_item(3)]).await.unwrap(), 0);
    assert_eq!(repo.add_items(Vec::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn latest_published_at_is_per_source() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool);
    let at = |hour| Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap();

    assert!(repo.latest_published_at("gazette").await.unwrap().is_none());

    repo.add_items(vec![
        NewItem::new("gazette", "https://gazette.example/1", "One").with_published_at(at(8)),
        NewItem::new("gazette", "https://gazette.example/2", "Two").with_published_at(at(10)),
        NewItem::new("gazette", "https://gazette.example/3", "Undated"),
        NewItem::new("wire", "https://wire.example/1", "Wire").with_published_at(at(12)),
    ])
    .await
    .unwrap();

    assert_eq!(
        repo.latest_published_at("gazette").await.unwrap(),
        Some(at(10))
    );
    assert_eq!(repo.latest_published_at("wire").await.unwrap(), Some(at(12)));

    let stored = repo
        .list_by_status(ItemStatus::Pending, 10)
        .await
        .unwrap()
        .into_iter()
        .find(|i| i.url == "https://gazette.example/2")
        .unwrap();
    assert_eq!(stored.published_at, Some(at(10)));
}
