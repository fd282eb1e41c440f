//! Unit-Tests fuer den Token-Bucket

use std::time::{Duration, Instant};

use raumfunk_core::types::UserId;

use crate::rate_limit::{RateLimiter, TokenBucket};

#[test]
fn test_bucket_erlaubt_bis_limit() {
    let start = Instant::now();
    let mut bucket = TokenBucket::neu(5, start);
    for _ in 0..5 {
        assert!(bucket.verbrauchen(start), "Anfrage sollte erlaubt sein");
    }
    assert!(!bucket.verbrauchen(start), "6. Anfrage sollte abgelehnt werden");
    assert_eq!(bucket.retry_after_secs(), 12);
}

#[test]
fn test_bucket_fuellt_sich_wieder() {
    let start = Instant::now();
    let mut bucket = TokenBucket::neu(30, start);
    for _ in 0..30 {
        assert!(bucket.verbrauchen(start));
    }
    assert!(!bucket.verbrauchen(start));
    // 30/min = ein Token alle 2 s
    assert!(bucket.verbrauchen(start + Duration::from_secs(2)));
    assert!(!bucket.verbrauchen(start + Duration::from_secs(2)));
}

#[test]
fn test_limiter_benutzer_unabhaengig() {
    let limiter = RateLimiter::neu(1);
    let jetzt = Instant::now();
    let a = UserId::new("alice");
    let b = UserId::new("bob");

    assert!(limiter.pruefen_zu(&a, jetzt).is_ok());
    assert!(limiter.pruefen_zu(&a, jetzt).is_err());
    assert!(limiter.pruefen_zu(&b, jetzt).is_ok());
    assert_eq!(limiter.anzahl(), 2);
}
