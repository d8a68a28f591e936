//! Distributed limiters against a live Redis. Skipped unless `REDIS_URL` is set.

use std::env;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use turnstile::distributed::{DistributedFixedWindow, DistributedSlidingWindow};
use turnstile::{Context, DistributedLimiter, LimitError};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> String {
    format!("turnstile_test_{}", uuid::Uuid::new_v4().simple())
}

async fn connection(url: &str) -> ConnectionManager {
    let client = redis::Client::open(url).unwrap();
    client.get_connection_manager().await.unwrap()
}

#[tokio::test]
async fn fixed_window_shared_between_processes() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix();

    // Separate connections stand in for independent processes.
    let a = DistributedFixedWindow::new(connection(&url).await, 2, Duration::from_secs(1))
        .with_prefix(prefix.clone());
    let b = DistributedFixedWindow::new(connection(&url).await, 2, Duration::from_secs(1))
        .with_prefix(prefix.clone());
    let ctx = Context::with_timeout(Duration::from_secs(3));

    assert!(a.allow(&ctx, "svcA").await.is_ok());
    assert!(b.allow(&ctx, "svcA").await.is_ok());
    let err = a.allow(&ctx, "svcA").await.unwrap_err();
    assert!(matches!(err, LimitError::ExceededLimit));

    // Expiry was armed on the first increment.
    let mut conn = connection(&url).await;
    let ttl: i64 = conn.pttl(format!("{}:svcA", prefix)).await.unwrap();
    assert!(ttl > 0 && ttl <= 1000, "ttl {ttl}");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(b.allow(&ctx, "svcA").await.is_ok());
}

#[tokio::test]
async fn sliding_window_evicts_old_entries() {
    let Some(url) = redis_url() else { return };
    let prefix = unique_prefix();

    let limiter = DistributedSlidingWindow::new(connection(&url).await, 2, Duration::from_secs(1))
        .with_prefix(prefix.clone());
    let ctx = Context::with_timeout(Duration::from_secs(3));

    limiter.allow_at(&ctx, "svcA", 10_000).await.unwrap();
    limiter.allow_at(&ctx, "svcA", 10_000).await.unwrap();
    assert!(limiter.allow_at(&ctx, "svcA", 10_500).await.is_err());

    assert!(limiter.allow_at(&ctx, "svcA", 11_600).await.is_ok());

    let mut conn = connection(&url).await;
    let logged: u64 = conn.zcard(format!("{}:svcA", prefix)).await.unwrap();
    assert_eq!(logged, 1);
}

#[tokio::test]
async fn sliding_window_wall_clock_denies_burst() {
    let Some(url) = redis_url() else { return };

    let limiter = DistributedSlidingWindow::new(connection(&url).await, 3, Duration::from_secs(5))
        .with_prefix(unique_prefix());
    let ctx = Context::with_timeout(Duration::from_secs(3));

    for _ in 0..3 {
        limiter.allow(&ctx, "svcA").await.unwrap();
    }
    assert!(limiter.allow(&ctx, "svcA").await.is_err());
}

#[tokio::test]
async fn unreachable_store_is_backend_error() {
    if redis_url().is_none() {
        return;
    }
    let client = redis::Client::open("redis://127.0.0.1:1").unwrap();
    let Err(err) = client.get_connection_manager().await else {
        panic!("connected to a closed port");
    };
    assert!(LimitError::from(err).is_backend());
}
