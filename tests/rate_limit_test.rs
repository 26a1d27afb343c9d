//! Token-bucket limiter behaviour under a paused clock.

use std::sync::Arc;
use std::time::Duration;

use mimir::{RateLimit, RateLimiter};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Yield until `n` callers are queued on `limiter`.
async fn wait_for_queue(limiter: &RateLimiter, n: usize) {
    while limiter.queued() < n {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn burst_up_to_capacity_then_waits_one_refill_interval() {
    let limiter = RateLimiter::new("test", RateLimit::new(3, 10.0)).unwrap();
    let start = Instant::now();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter.acquire().await;
                start.elapsed()
            })
        })
        .collect();

    let mut waits = Vec::new();
    for handle in handles {
        waits.push(handle.await.unwrap());
    }
    waits.sort();

    assert_eq!(&waits[..3], &[Duration::ZERO; 3], "burst must not wait");
    let waited = waits[3];
    assert!(
        waited >= Duration::from_millis(99) && waited <= Duration::from_millis(150),
        "C+1-th acquire should wait ~1/R, waited {waited:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn waiters_are_released_in_arrival_order() {
    let limiter = RateLimiter::new("fifo", RateLimit::new(1, 20.0)).unwrap();
    limiter.acquire().await;

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..5 {
        let waiter = limiter.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            waiter.acquire().await;
            order.lock().push(i);
        }));
        wait_for_queue(&limiter, i + 1).await;
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn try_acquire_does_not_jump_the_queue() {
    let limiter = RateLimiter::new("queue", RateLimit::new(1, 10.0)).unwrap();
    assert!(limiter.try_acquire());

    let waiter = {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.acquire().await })
    };
    wait_for_queue(&limiter, 1).await;
    assert!(!limiter.try_acquire());

    waiter.await.unwrap();
    assert_eq!(limiter.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn reset_releases_all_waiters_immediately() {
    let limiter = RateLimiter::new("reset", RateLimit::new(1, 1.0)).unwrap();
    limiter.acquire().await;

    let start = Instant::now();
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await })
        })
        .collect();
    wait_for_queue(&limiter, 3).await;

    limiter.reset();
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(limiter.queued(), 0);
    // released waiters were not charged
    assert_eq!(limiter.available(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_waiter_does_not_consume_a_token() {
    let limiter = RateLimiter::new("cancel", RateLimit::new(1, 10.0)).unwrap();
    limiter.acquire().await;

    let gave_up = tokio::time::timeout(Duration::from_millis(20), limiter.acquire()).await;
    assert!(gave_up.is_err());
    assert_eq!(limiter.queued(), 0);

    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() <= Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn limiters_share_no_state() {
    let a = RateLimiter::new("a", RateLimit::new(1, 1.0)).unwrap();
    let b = RateLimiter::new("b", RateLimit::new(1, 1.0)).unwrap();

    assert!(a.try_acquire());
    assert!(!a.try_acquire());
    assert!(b.try_acquire());
}

#[tokio::test(start_paused = true)]
async fn sustained_rate_matches_refill() {
    let limiter = RateLimiter::new("rate", RateLimit::new(2, 10.0)).unwrap();
    let start = Instant::now();
    for _ in 0..12 {
        limiter.acquire().await;
    }
    // 2 from the burst, 10 more at 10/s
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(990) && elapsed <= Duration::from_millis(1200),
        "elapsed {elapsed:?}"
    );
}
