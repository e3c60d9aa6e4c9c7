//! RateLimiter - 識別子ごとのスライディングウィンドウ

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use super::GateFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// `retry_after` is the time until the oldest counted request leaves the window.
    Limited { retry_after: std::time::Duration },
}

pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    /// `max_requests == 0` disables limiting.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            max_requests,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Counts the request if it fits in the window.
    pub fn check(&self, identifier: &str, now: DateTime<Utc>) -> Result<RateDecision, GateFault> {
        if self.max_requests == 0 {
            return Ok(RateDecision::Allowed);
        }

        let mut windows = self
            .windows
            .lock()
            .map_err(|_| GateFault::Poisoned("rate limiter"))?;
        let queue = windows.entry(identifier.to_string()).or_default();
        prune(queue, now, self.window);

        if queue.len() < self.max_requests as usize {
            queue.push_back(now);
            return Ok(RateDecision::Allowed);
        }

        let oldest = queue.front().copied().unwrap_or(now);
        let retry_after = (oldest + self.window - now)
            .to_std()
            .unwrap_or_default();
        Ok(RateDecision::Limited { retry_after })
    }

    /// Drops identifiers whose window has emptied out.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, GateFault> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| GateFault::Poisoned("rate limiter"))?;
        let before = windows.len();
        windows.retain(|_, queue| {
            prune(queue, now, self.window);
            !queue.is_empty()
        });
        Ok(before - windows.len())
    }

    pub fn tracked(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.windows.lock();
            panic!("poison rate limiter");
        }));
    }
}

/// A timestamp exactly `window` old has left the window.
fn prune(queue: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    let cutoff = now - window;
    while queue.front().is_some_and(|ts| *ts <= cutoff) {
        queue.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn third_request_in_window_is_limited_until_oldest_expires() {
        let limiter = RateLimiter::new(2, Duration::seconds(60));
        assert_eq!(limiter.check("ip", t(0)).unwrap(), RateDecision::Allowed);
        assert_eq!(limiter.check("ip", t(10)).unwrap(), RateDecision::Allowed);
        assert_eq!(
            limiter.check("ip", t(20)).unwrap(),
            RateDecision::Limited {
                retry_after: StdDuration::from_secs(40)
            }
        );
    }

    #[test]
    fn rejected_requests_are_not_counted() {
        let limiter = RateLimiter::new(1, Duration::seconds(60));
        limiter.check("ip", t(0)).unwrap();
        for s in 1..30 {
            assert!(matches!(limiter.check("ip", t(s)).unwrap(), RateDecision::Limited { .. }));
        }
        assert_eq!(limiter.check("ip", t(60)).unwrap(), RateDecision::Allowed);
    }

    #[test]
    fn allowed_again_once_oldest_leaves() {
        let limiter = RateLimiter::new(2, Duration::seconds(60));
        limiter.check("ip", t(0)).unwrap();
        limiter.check("ip", t(10)).unwrap();
        assert!(matches!(limiter.check("ip", t(59)).unwrap(), RateDecision::Limited { .. }));
        assert_eq!(limiter.check("ip", t(60)).unwrap(), RateDecision::Allowed);
        assert!(matches!(limiter.check("ip", t(61)).unwrap(), RateDecision::Limited { .. }));
    }

    #[test]
    fn identifiers_are_independent() {
        let limiter = RateLimiter::new(1, Duration::seconds(60));
        assert_eq!(limiter.check("a", t(0)).unwrap(), RateDecision::Allowed);
        assert_eq!(limiter.check("b", t(0)).unwrap(), RateDecision::Allowed);
        assert!(matches!(limiter.check("a", t(1)).unwrap(), RateDecision::Limited { .. }));
    }

    #[test]
    fn zero_limit_disables() {
        let limiter = RateLimiter::new(0, Duration::seconds(60));
        for s in 0..10 {
            assert_eq!(limiter.check("ip", t(s)).unwrap(), RateDecision::Allowed);
        }
    }

    #[test]
    fn sweep_drops_idle_identifiers() {
        let limiter = RateLimiter::new(2, Duration::seconds(60));
        limiter.check("old", t(0)).unwrap();
        limiter.check("new", t(100)).unwrap();
        assert_eq!(limiter.sweep(t(120)).unwrap(), 1);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn poisoned_lock_surfaces_a_fault() {
        let limiter = RateLimiter::new(2, Duration::seconds(60));
        limiter.poison();
        assert!(matches!(limiter.check("ip", t(0)), Err(GateFault::Poisoned(_))));
    }
}
