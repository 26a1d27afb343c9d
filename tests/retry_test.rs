//! Retry executor: attempt counting, classification and backoff timing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use mimir::{MimirError, RetryPolicy, TransportErrorKind};
use tokio::time::Instant;

fn unavailable(n: u32) -> MimirError {
    MimirError::Api {
        status: 503,
        message: format!("attempt {n}"),
    }
}

fn fixed_policy(max_retries: u32, initial_ms: u64) -> RetryPolicy {
    RetryPolicy::new()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(initial_ms))
        .max_delay(Duration::from_secs(60))
        .jitter(false)
}

#[tokio::test(start_paused = true)]
async fn exhausts_after_max_retries_plus_one_and_surfaces_last_error() {
    let calls = AtomicU32::new(0);
    let policy = fixed_policy(3, 10);

    let outcome = policy
        .run_with_history("test", "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err::<(), _>(unavailable(n)) }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(outcome.attempts(), 4);
    match outcome.result {
        Err(MimirError::Api { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "attempt 4");
        }
        other => panic!("expected last 503, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_attempts() {
    let policy = fixed_policy(3, 10);
    let start = Instant::now();

    let outcome = policy
        .run_with_history("test", "op", || async { Err::<(), _>(unavailable(0)) })
        .await;

    assert_eq!(
        outcome.history.delays(),
        vec![
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(40)
        ]
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(70), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped_at_max_delay() {
    let policy = RetryPolicy::new()
        .max_retries(5)
        .initial_delay(Duration::from_millis(100))
        .max_delay(Duration::from_millis(250))
        .jitter(false);

    let outcome = policy
        .run_with_history("test", "op", || async { Err::<(), _>(unavailable(0)) })
        .await;

    let ms: Vec<u128> = outcome
        .history
        .delays()
        .iter()
        .map(Duration::as_millis)
        .collect();
    assert_eq!(ms, vec![100, 200, 250, 250, 250]);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_errors_are_attempted_once() {
    let policy = fixed_policy(3, 10);
    let terminal = [
        MimirError::Api {
            status: 400,
            message: "bad request".into(),
        },
        MimirError::NotFound("missing".into()),
        MimirError::Decode("garbage".into()),
        MimirError::AuthExpired,
        MimirError::InvalidArguments("limit".into()),
    ];

    for err in terminal {
        let calls = AtomicU32::new(0);
        let expected = err.code();
        let outcome = policy
            .run_with_history("test", "op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = err.clone();
                async move { Err::<(), _>(err) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "{expected:?} was retried");
        assert_eq!(outcome.history.retries(), 0);
        assert_eq!(outcome.result.unwrap_err().code(), expected);
    }
}

#[tokio::test(start_paused = true)]
async fn transport_failure_then_success() {
    let calls = AtomicU32::new(0);
    let policy = fixed_policy(3, 10);

    let outcome = policy
        .run_with_history("test", "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(MimirError::transport(
                        TransportErrorKind::Connect,
                        "connection refused",
                    ))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

    assert_eq!(outcome.result.as_ref().ok(), Some(&"done"));
    assert_eq!(outcome.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_after_hint_replaces_backoff() {
    let calls = AtomicU32::new(0);
    let policy = fixed_policy(2, 10);

    let outcome = policy
        .run_with_history("test", "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(MimirError::RateLimited {
                        retry_after: Some(Duration::from_secs(2)),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

    assert_eq!(outcome.history.delays(), vec![Duration::from_secs(2)]);
    assert!(outcome.result.is_ok());
}

#[tokio::test(start_paused = true)]
async fn disabled_policy_makes_one_attempt() {
    let calls = AtomicU32::new(0);
    let result = RetryPolicy::disabled()
        .run("test", "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(unavailable(1)) }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn custom_status_list_is_honoured() {
    let calls = AtomicU32::new(0);
    let policy = fixed_policy(2, 10).retryable_statuses(vec![418]);

    let _ = policy
        .run("test", "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(MimirError::Api {
                    status: 418,
                    message: "teapot".into(),
                })
            }
        })
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    calls.store(0, Ordering::SeqCst);
    let _ = policy
        .run("test", "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(unavailable(1)) }
        })
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
