use super::{PeriodicStore, RateLimiter, RateRule};
use std::time::{Duration, SystemTime};

#[test]
fn test_first_request_reports_full_burst() {
    let mut limiter = RateLimiter::new(PeriodicStore::new());
    let rule = RateRule::parse("5-M").unwrap();

    let decision = limiter.check("test", &rule, SystemTime::now()).unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.limit, 5);
    assert_eq!(decision.remaining, 4);
    assert_eq!(decision.retry_after, Duration::ZERO);
}

#[test]
fn test_burst_then_refusal() {
    let mut limiter = RateLimiter::new(PeriodicStore::new());
    let rule = RateRule::parse("5-M").unwrap();
    let now = SystemTime::now();

    for i in 0..5 {
        let decision = limiter.check("burst", &rule, now).unwrap();
        assert!(decision.allowed, "request {} should be allowed", i + 1);
        assert_eq!(decision.remaining, 4 - i);
    }

    let decision = limiter.check("burst", &rule, now).unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
    assert!(decision.retry_after > Duration::ZERO);
}

#[test]
fn test_two_per_minute_recovers_after_a_minute() {
    let mut limiter = RateLimiter::new(PeriodicStore::new());
    let rule = RateRule::parse("2-M").unwrap();
    let now = SystemTime::now();

    assert!(limiter.check("ip", &rule, now).unwrap().allowed);
    assert!(limiter.check("ip", &rule, now + Duration::from_secs(1)).unwrap().allowed);

    let third = limiter.check("ip", &rule, now + Duration::from_secs(2)).unwrap();
    assert!(!third.allowed);
    assert_eq!(third.remaining, 0);

    let later = limiter.check("ip", &rule, now + Duration::from_secs(62)).unwrap();
    assert!(later.allowed);
}

#[test]
fn test_reset_after_covers_the_period() {
    let mut limiter = RateLimiter::new(PeriodicStore::new());
    let rule = RateRule::parse("2-M").unwrap();
    let now = SystemTime::now();

    limiter.check("k", &rule, now).unwrap();
    let second = limiter.check("k", &rule, now).unwrap();
    assert_eq!(second.reset_after, Duration::from_secs(60));
}

#[test]
fn test_keys_are_independent() {
    let mut limiter = RateLimiter::new(PeriodicStore::new());
    let rule = RateRule::per_hour(1);
    let now = SystemTime::now();

    assert!(limiter.check("a", &rule, now).unwrap().allowed);
    assert!(!limiter.check("a", &rule, now).unwrap().allowed);
    assert!(limiter.check("b", &rule, now).unwrap().allowed);
}

#[test]
fn test_refusals_do_not_consume_capacity() {
    let mut limiter = RateLimiter::new(PeriodicStore::new());
    let rule = RateRule::per_second(1);
    let now = SystemTime::now();

    assert!(limiter.check("k", &rule, now).unwrap().allowed);
    for _ in 0..10 {
        assert!(!limiter.check("k", &rule, now).unwrap().allowed);
    }
    assert!(
        limiter
            .check("k", &rule, now + Duration::from_secs(1))
            .unwrap()
            .allowed
    );
}
