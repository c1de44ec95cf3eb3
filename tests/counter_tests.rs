mod common;

use anyhow::Result;
use tokio_test::{assert_err, assert_ok};

use common::{signed_in, signed_out, snapshot, wire, IncrementMode, MockBackend};
use warranty_keeper::entitlements::{Tier, UsageCounter};
use warranty_keeper::error::{CounterFailure, GateError};

#[tokio::test]
async fn test_increment_invalidates_cached_snapshot() -> Result<()> {
    let backend = MockBackend::new(snapshot(Tier::Basic));
    let (usage, tracker, notifier) = wire(backend.clone(), signed_in());

    let before = usage.current().await?.unwrap();
    assert_eq!(before.ocr_scans_used, 0);
    assert_eq!(backend.fetches(), 1);

    // Served from cache inside the staleness window
    usage.current().await?.unwrap();
    assert_eq!(backend.fetches(), 1);

    tracker.increment_ocr_usage().await?;
    assert_eq!(backend.increments(UsageCounter::Ocr), 1);
    assert!(usage.cached().await.is_some());

    let after = usage.current().await?.unwrap();
    assert_eq!(after.ocr_scans_used, 1);
    assert_eq!(backend.fetches(), 2);
    assert!(notifier.warnings().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_each_counter_hits_its_own_function() -> Result<()> {
    let backend = MockBackend::new(snapshot(Tier::Pro));
    let (_, tracker, _) = wire(backend.clone(), signed_in());

    assert_ok!(tracker.increment_ai_lookup_usage().await);
    assert_ok!(tracker.increment_ai_support_usage().await);
    assert_ok!(tracker.increment_ai_support_usage().await);

    assert_eq!(backend.increments(UsageCounter::Ocr), 0);
    assert_eq!(backend.increments(UsageCounter::AiLookup), 1);
    assert_eq!(backend.increments(UsageCounter::AiSupport), 2);
    Ok(())
}

#[tokio::test]
async fn test_increment_requires_session() {
    let backend = MockBackend::new(snapshot(Tier::Free));
    let (_, tracker, notifier) = wire(backend.clone(), signed_out());

    let err = assert_err!(tracker.increment_ocr_usage().await);
    assert!(matches!(err, GateError::NotAuthenticated));
    assert_eq!(backend.increments(UsageCounter::Ocr), 0);
    assert!(notifier.warnings().is_empty());
}

#[tokio::test]
async fn test_missing_function_is_classified() {
    let backend = MockBackend::new(snapshot(Tier::Basic));
    backend.set_increment_mode(IncrementMode::MissingFunction);
    let (_, tracker, notifier) = wire(backend, signed_in());

    match tracker.increment_ai_lookup_usage().await {
        Err(GateError::CounterIncrement { counter, failure }) => {
            assert_eq!(counter, UsageCounter::AiLookup);
            assert_eq!(
                failure,
                CounterFailure::FunctionMissing {
                    function: "increment_ai_lookup_usage".to_string()
                }
            );
        }
        other => panic!("expected missing function, got {:?}", other),
    }
    assert_eq!(notifier.warnings().len(), 1);
}

#[tokio::test]
async fn test_transient_failure_is_classified() {
    let backend = MockBackend::new(snapshot(Tier::Basic));
    backend.set_increment_mode(IncrementMode::ServerError);
    let (usage, tracker, notifier) = wire(backend.clone(), signed_in());

    usage.current().await.unwrap().unwrap();
    let result = tracker.increment_ocr_usage().await;
    assert!(matches!(
        result,
        Err(GateError::CounterIncrement { failure: CounterFailure::Transient(_), .. })
    ));
    assert_eq!(
        notifier.warnings(),
        vec!["Your request went through, but we couldn't update your usage count.".to_string()]
    );

    // Nothing was recorded, so the cached snapshot is still good
    usage.current().await.unwrap().unwrap();
    assert_eq!(backend.fetches(), 1);
}
