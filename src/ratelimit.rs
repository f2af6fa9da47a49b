use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use dashmap::DashMap;

/// Result of one rate-limit check, with everything needed to build the
/// response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

/// In-process sliding-window limiter keyed by client. State lives in the
/// process, so limits reset on restart; acceptable for abuse damping.
pub struct SlidingWindow {
    limit: u32,
    window: Duration,
    hits: DashMap<String, Vec<Instant>>,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: DashMap::new(),
        }
    }

    /// Record an attempt for `key` and decide whether it is within limits.
    /// Denied attempts do not consume a slot.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut entry = self.hits.entry(key.to_string()).or_default();
        entry.retain(|hit| now.duration_since(*hit) < self.window);

        if entry.len() >= self.limit as usize {
            let oldest = entry.first().copied().unwrap_or(now);
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                .max(1);
            return RateLimitDecision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entry.push(now);
        RateLimitDecision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - entry.len() as u32,
            retry_after_secs: 0,
        }
    }

    /// Drop keys whose entire window has elapsed so the map does not grow
    /// without bound.
    pub fn prune(&self) {
        let now = Instant::now();
        self.hits
            .retain(|_, hits| hits.iter().any(|hit| now.duration_since(*hit) < self.window));
    }
}

/// One limiter per abuse surface.
pub struct RateLimiters {
    pub payment: SlidingWindow,
    pub contact: SlidingWindow,
    pub webhook: SlidingWindow,
}

impl RateLimiters {
    pub fn new() -> Self {
        Self {
            payment: SlidingWindow::new(5, Duration::from_secs(60)),
            contact: SlidingWindow::new(10, Duration::from_secs(60)),
            webhook: SlidingWindow::new(100, Duration::from_secs(60)),
        }
    }

    /// Drop stale keys from every limiter. Run periodically so one-shot
    /// clients do not leave entries behind forever.
    pub fn prune_all(&self) {
        self.payment.prune();
        self.contact.prune();
        self.webhook.prune();
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort client identity behind a reverse proxy: first hop of
/// X-Forwarded-For, then X-Real-IP, then a shared bucket.
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return value.trim().to_string();
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit() {
        let limiter = SlidingWindow::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check_at("1.2.3.4", start);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
        let denied = limiter.check_at("1.2.3.4", start);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_secs >= 1);
    }

    #[test]
    fn window_slides() {
        let limiter = SlidingWindow::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("k", start).allowed);
        assert!(limiter.check_at("k", start).allowed);
        assert!(!limiter.check_at("k", start + Duration::from_secs(30)).allowed);
        // The first two hits have aged out.
        assert!(limiter.check_at("k", start + Duration::from_secs(61)).allowed);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindow::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("a", start).allowed);
        assert!(limiter.check_at("b", start).allowed);
        assert!(!limiter.check_at("a", start).allowed);
    }

    #[test]
    fn denied_attempts_do_not_extend_the_window() {
        let limiter = SlidingWindow::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("k", start).allowed);
        for seconds in [10, 20, 30] {
            assert!(!limiter.check_at("k", start + Duration::from_secs(seconds)).allowed);
        }
        assert!(limiter.check_at("k", start + Duration::from_secs(61)).allowed);
    }

    #[test]
    fn prune_drops_stale_keys() {
        let limiter = SlidingWindow::new(1, Duration::from_millis(1));
        limiter.check("stale");
        std::thread::sleep(Duration::from_millis(5));
        limiter.prune();
        assert!(limiter.hits.is_empty());
    }

    #[test]
    fn prune_all_covers_every_limiter() {
        let limiters = RateLimiters {
            payment: SlidingWindow::new(1, Duration::from_millis(1)),
            contact: SlidingWindow::new(1, Duration::from_millis(1)),
            webhook: SlidingWindow::new(1, Duration::from_millis(1)),
        };
        limiters.payment.check("a");
        limiters.contact.check("b");
        limiters.webhook.check("c");
        std::thread::sleep(Duration::from_millis(5));
        limiters.prune_all();
        assert!(limiters.payment.hits.is_empty());
        assert!(limiters.contact.hits.is_empty());
        assert!(limiters.webhook.hits.is_empty());
    }

    #[test]
    fn extracts_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_real_ip_then_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_ip(&headers), "198.51.100.4");
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }
}
