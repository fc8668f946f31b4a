//! Executor + MemoryStore integration tests.
//!
//! Run with: `cargo test -p unitwork-store`

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use unitwork_exec::{Backoff, ExecError, Executor, OpError, RetryPolicy};
use unitwork_store::{DocumentSession, MemorySession, MemoryStore, StoreError};

fn balance(store: &MemoryStore, id: &str) -> Decimal {
    let doc = store.get("accounts", id).expect("account exists");
    doc.body["balance"].as_str().unwrap().parse().unwrap()
}

async fn transfer(
    session: &mut MemorySession,
    from: &str,
    to: &str,
    amount: Decimal,
) -> Result<(), OpError> {
    let source = session
        .find_one("accounts", from)
        .await?
        .ok_or_else(|| StoreError::not_found("accounts", from))?;
    let target = session
        .find_one("accounts", to)
        .await?
        .ok_or_else(|| StoreError::not_found("accounts", to))?;

    let source_balance: Decimal = source.body["balance"].as_str().unwrap_or("0").parse().unwrap_or_default();
    let target_balance: Decimal = target.body["balance"].as_str().unwrap_or("0").parse().unwrap_or_default();

    // Let other transfers interleave between read and write
    tokio::task::yield_now().await;

    session
        .update_one("accounts", from, json!({"balance": (source_balance - amount).to_string()}))
        .await?;
    session
        .update_one("accounts", to, json!({"balance": (target_balance + amount).to_string()}))
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_conflict_is_retried_until_commit() {
    let store = MemoryStore::new();
    store.seed("accounts", "a", json!({"balance": "100"})).unwrap();
    store.seed("accounts", "b", json!({"balance": "0"})).unwrap();

    let executor = Executor::new(Arc::new(store.clone()))
        .with_policy(RetryPolicy::new(3).unwrap().with_backoff(Backoff::None));
    let attempts = AtomicU32::new(0);

    executor
        .run(|session| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let store = store.clone();
            Box::pin(async move {
                transfer(session, "a", "b", dec!(10)).await?;
                if attempt == 1 {
                    // Concurrent writer commits first
                    store.seed("accounts", "a", json!({"balance": "50"})).map_err(OpError::from)?;
                }
                Ok(())
            })
        })
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(store.conflicts(), 1);
    assert_eq!(balance(&store, "a"), dec!(40));
    assert_eq!(balance(&store, "b"), dec!(10));
    assert_eq!(store.live_sessions(), 0);
    assert_eq!(store.sessions_started(), 2);
}

#[tokio::test]
async fn test_fatal_error_leaves_store_unchanged() {
    let store = MemoryStore::new();
    store.seed("accounts", "a", json!({"balance": "5"})).unwrap();
    store.seed("accounts", "b", json!({"balance": "0"})).unwrap();

    let executor = Executor::new(Arc::new(store.clone()));

    let result: Result<(), ExecError> = executor
        .run(|session| {
            Box::pin(async move {
                transfer(session, "a", "b", dec!(10)).await?;
                Err(OpError::fatal("insufficient funds"))
            })
        })
        .await;

    assert!(matches!(result, Err(ExecError::Operation(OpError::Fatal(_)))));
    assert_eq!(balance(&store, "a"), dec!(5));
    assert_eq!(store.sessions_started(), 1);
    assert_eq!(store.aborts(), 1);
    assert_eq!(store.live_sessions(), 0);
}

#[tokio::test]
async fn test_missing_document_is_not_retried() {
    let store = MemoryStore::new();
    let executor = Executor::new(Arc::new(store.clone()));

    let result = executor
        .run(|session| Box::pin(async move { transfer(session, "x", "y", dec!(1)).await }))
        .await;

    match result {
        Err(ExecError::Operation(OpError::Store(StoreError::NotFound { id, .. }))) => assert_eq!(id, "x"),
        other => panic!("Expected NotFound, got {:?}", other),
    }
    assert_eq!(store.sessions_started(), 1);
}

#[tokio::test]
async fn test_repeat_reads_stay_consistent_until_retry() {
    let store = MemoryStore::new();
    store.seed("accounts", "a", json!({"balance": "100"})).unwrap();

    let executor = Executor::new(Arc::new(store.clone()))
        .with_policy(RetryPolicy::new(3).unwrap().with_backoff(Backoff::None));
    let attempts = AtomicU32::new(0);

    let seen = executor
        .run(|session| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let store = store.clone();
            Box::pin(async move {
                let before = session
                    .find_one("accounts", "a")
                    .await?
                    .ok_or_else(|| StoreError::not_found("accounts", "a"))?;
                if attempt == 1 {
                    store.seed("accounts", "a", json!({"balance": "0"})).map_err(OpError::from)?;
                }
                let after = session
                    .find_one("accounts", "a")
                    .await?
                    .ok_or_else(|| StoreError::not_found("accounts", "a"))?;

                if before.body != after.body || before.version != after.version {
                    return Err(OpError::fatal("balance changed inside one transaction"));
                }
                session
                    .update_one("accounts", "a", json!({"checked": true}))
                    .await?;
                Ok(after.body["balance"].as_str().unwrap_or_default().to_string())
            })
        })
        .await
        .unwrap();

    assert_eq!(seen, "0");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(store.conflicts(), 1);
    assert_eq!(store.sessions_started(), 2);
    assert_eq!(store.get("accounts", "a").unwrap().body, json!({"balance": "0", "checked": true}));
}

#[tokio::test]
async fn test_session_start_failure_is_reported() {
    let store = MemoryStore::new();
    store.fail_next_session(StoreError::Connection("connection refused".to_string()));

    let executor = Executor::new(Arc::new(store.clone()));
    let calls = AtomicU32::new(0);

    let result = executor
        .run(|_session| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok::<(), OpError>(()) })
        })
        .await;

    assert!(matches!(result, Err(ExecError::SessionAcquireFailed(StoreError::Connection(_)))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.sessions_started(), 0);
    assert_eq!(store.live_sessions(), 0);

    // The failure is consumed; the next run gets a session
    executor.run(|_session| Box::pin(async move { Ok::<(), OpError>(()) })).await.unwrap();
    assert_eq!(store.sessions_started(), 1);
}

#[tokio::test]
async fn test_persistent_conflict_exhausts_retries() {
    let store = MemoryStore::new();
    store.seed("accounts", "a", json!({"balance": "100"})).unwrap();
    store.seed("accounts", "b", json!({"balance": "0"})).unwrap();

    let executor = Executor::new(Arc::new(store.clone()))
        .with_policy(RetryPolicy::new(4).unwrap().with_backoff(Backoff::Fixed(Duration::from_millis(1))));

    let result = executor
        .run(|session| {
            let store = store.clone();
            Box::pin(async move {
                transfer(session, "a", "b", dec!(1)).await?;
                store.seed("accounts", "b", json!({"balance": "0"})).map_err(OpError::from)?;
                Ok(())
            })
        })
        .await;

    match result {
        Err(ExecError::RetriesExhausted { attempts, last }) => {
            assert_eq!(attempts, 4);
            assert!(matches!(last, OpError::Store(StoreError::WriteConflict(_))));
        },
        other => panic!("Expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(store.conflicts(), 4);
    assert_eq!(balance(&store, "a"), dec!(100));
    assert_eq!(store.live_sessions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_conserve_total() {
    let store = MemoryStore::new();
    store.seed("accounts", "a", json!({"balance": "1000"})).unwrap();
    store.seed("accounts", "b", json!({"balance": "1000"})).unwrap();

    let executor = Arc::new(
        Executor::new(Arc::new(store.clone())).with_policy(
            RetryPolicy::new(100).unwrap().with_backoff(Backoff::Exponential {
                base: Duration::from_millis(1),
                max: Duration::from_millis(20),
                jitter: true,
            }),
        ),
    );

    let mut handles = Vec::new();
    for i in 0..20 {
        let executor = Arc::clone(&executor);
        let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
        handles.push(tokio::spawn(async move {
            executor
                .run(move |session| Box::pin(async move { transfer(session, from, to, dec!(7)).await }))
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(balance(&store, "a") + balance(&store, "b"), dec!(2000));
    assert_eq!(balance(&store, "a"), dec!(1000));
    assert_eq!(store.commits(), 20);
    assert_eq!(store.live_sessions(), 0);
}
