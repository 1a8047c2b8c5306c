//! End-to-end range-fetch coverage against a mock HTTP origin, exercising
//! `spec` §8 scenario 3 (appended bytes → one or more range requests) and
//! the `spec` §9 whole-file fallback when ranges are unsupported.

use rangefetch::{FetchConfig, RangeFetcher};
use store::{PendingRanges, TargetStore};
use tempfile::NamedTempFile;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> FetchConfig {
    FetchConfig {
        parallelism: 4,
        max_retries: 1,
        initial_backoff: std::time::Duration::from_millis(1),
    }
}

#[tokio::test]
async fn fetches_a_single_missing_range() {
    let target = vec![7u8; 16];
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/App.AppImage"))
        .and(header("Range", "bytes=0-0"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(vec![target[0]])
                .insert_header("Content-Range", "bytes 0-0/16"),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/App.AppImage"))
        .and(header("Range", "bytes=0-15"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(target.clone()))
        .mount(&server)
        .await;

    let url = url::Url::parse(&format!("{}/App.AppImage", server.uri())).unwrap();
    let fetcher = RangeFetcher::new(config()).unwrap();
    let preflight = fetcher.preflight(&url).await.unwrap();
    assert!(preflight.supports_ranges);

    let tmp = NamedTempFile::new().unwrap();
    let mut target_store = TargetStore::create(tmp.path(), 16, 16).unwrap();
    let pending = target_store.missing_ranges();
    assert_eq!(pending.total_bytes(), 16);

    let report = fetcher
        .fetch_missing(&preflight, &pending, &mut target_store, |_| {}, || false)
        .await
        .unwrap();

    assert_eq!(report.bytes_fetched, 16);
    assert!(target_store.all_present());
    assert_eq!(target_store.read_block(0).unwrap(), target);
}

#[tokio::test]
async fn falls_back_to_whole_file_when_ranges_unsupported() {
    let target = vec![9u8; 32];
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/App.AppImage"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(target.clone()))
        .mount(&server)
        .await;

    let url = url::Url::parse(&format!("{}/App.AppImage", server.uri())).unwrap();
    let fetcher = RangeFetcher::new(config()).unwrap();
    let preflight = fetcher.preflight(&url).await.unwrap();
    assert!(!preflight.supports_ranges);

    let tmp = NamedTempFile::new().unwrap();
    let mut target_store = TargetStore::create(tmp.path(), 8, 32).unwrap();
    let pending = PendingRanges::default();

    let report = fetcher
        .fetch_missing(&preflight, &pending, &mut target_store, |_| {}, || false)
        .await
        .unwrap();

    assert_eq!(report.bytes_fetched, 32);
    assert_eq!(target_store.read_block(0).unwrap(), target[0..8]);
}
