use herald_core::source::NewSource;
use herald_core::traits::SourceStore;
use herald_db::SourceRepository;

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn sources_are_listed_by_name() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    let added = repo
        .add_sources(vec![
            NewSource::new("wire", "https://wire.example/feed"),
            NewSource::new("gazette", "https://gazette.example/rss"),
        ])
        .await
        .unwrap();

    assert_eq!(added, 2);
    let names: Vec<String> = repo
        .list_sources()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["gazette".to_string(), "wire".to_string()]);
}

#[tokio::test]
async fn duplicate_name_or_url_is_skipped() {
    let (pool, _container) = setup_test_db().await;
    let repo = SourceRepository::new(pool);

    repo.add_sources(vec![NewSource::new("gazette", "https://gazette.example/rss")])
        .await
        .unwrap();

    let added = repo
        .add_sources(vec![
            NewSource::new("gazette", "https://other.example/rss"),
            NewSource::new("gazette-mirror", "https://gazette.example/rss"),
            NewSource::new("wire", "https://wire.example/feed"),
            NewSource::new("wire", "https://wire.example/other"),
        ])
        .await
        .unwrap();

    assert_eq!(added, 1);
    let sources = repo.list_sources().await.unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].url, "https://gazette.example/rss");
    assert_eq!(sources[1].url, "https://wire.example/feed");
}
