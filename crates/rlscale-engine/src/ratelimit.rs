//! Per-app, per-direction cooldowns and step caps.

use std::collections::HashMap;
use std::fmt;

use rlscale_core::config::RateLimitConfig;
use rlscale_core::{AppName, ScalingRequest};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Gate between the clamped decision and the platform.
///
/// Owned by the control loop. A timer for (app, direction) is created the
/// first time a request in that direction is admitted and is only ever
/// pushed forward.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    not_before: HashMap<(AppName, Direction), Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// When the next request in `direction` will be admitted for `app`.
    pub fn not_before(&self, app: &str, direction: Direction) -> Option<Instant> {
        self.not_before.get(&(app.to_string(), direction)).copied()
    }

    /// Admit, cap or drop `request` given the app's current count.
    pub fn admit(
        &mut self,
        request: ScalingRequest,
        current: u32,
        upscale: RateLimitConfig,
        downscale: RateLimitConfig,
        now: Instant,
    ) -> Option<ScalingRequest> {
        let current = current as i64;
        let (direction, limits) = match request.instances.cmp(&current) {
            std::cmp::Ordering::Equal => {
                debug!(app = %request.app, instances = current, "request matches current count, dropping");
                return None;
            }
            std::cmp::Ordering::Greater => (Direction::Up, upscale),
            std::cmp::Ordering::Less => (Direction::Down, downscale),
        };

        let key = (request.app.clone(), direction);
        if let Some(&not_before) = self.not_before.get(&key)
            && now < not_before
        {
            info!(
                app = %request.app,
                %direction,
                remaining_ms = (not_before - now).as_millis() as u64,
                "rate limit active, dropping request"
            );
            return None;
        }

        let next = now + limits.timeout();
        let slot = self.not_before.entry(key).or_insert(next);
        if next > *slot {
            *slot = next;
        }

        let step = limits.limit as i64;
        let capped = match direction {
            Direction::Up => request.instances.min(current + step),
            Direction::Down => request.instances.max(current - step),
        };
        if capped != request.instances {
            info!(
                app = %request.app,
                %direction,
                requested = request.instances,
                capped,
                limit = limits.limit,
                "step exceeds limit, capping"
            );
        }
        Some(ScalingRequest::new(request.app, capped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const UP: RateLimitConfig = RateLimitConfig { timeout_secs: 60, limit: 2 };
    const DOWN: RateLimitConfig = RateLimitConfig { timeout_secs: 120, limit: 1 };

    #[test]
    fn caps_step_and_blocks_within_timeout() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();

        let first = limiter.admit(ScalingRequest::new("web", 10), 3, UP, DOWN, now);
        assert_eq!(first, Some(ScalingRequest::new("web", 5)));

        let again = limiter.admit(
            ScalingRequest::new("web", 10),
            5,
            UP,
            DOWN,
            now + Duration::from_secs(30),
        );
        assert_eq!(again, None);

        let later = limiter.admit(
            ScalingRequest::new("web", 10),
            5,
            UP,
            DOWN,
            now + Duration::from_secs(60),
        );
        assert_eq!(later, Some(ScalingRequest::new("web", 7)));
    }

    #[test]
    fn directions_are_independent() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();
        assert!(limiter.admit(ScalingRequest::new("web", 4), 3, UP, DOWN, now).is_some());
        assert_eq!(
            limiter.admit(ScalingRequest::new("web", 1), 4, UP, DOWN, now),
            Some(ScalingRequest::new("web", 3))
        );
        assert!(limiter.not_before("web", Direction::Up).is_some());
        assert!(limiter.not_before("web", Direction::Down).is_some());
        assert!(limiter.not_before("db", Direction::Up).is_none());
    }

    #[test]
    fn equal_request_is_dropped_without_timer() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();
        assert_eq!(limiter.admit(ScalingRequest::new("web", 3), 3, UP, DOWN, now), None);
        assert!(limiter.not_before("web", Direction::Up).is_none());
        assert!(limiter.not_before("web", Direction::Down).is_none());
    }

    #[test]
    fn timer_never_moves_backwards() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();
        limiter.admit(ScalingRequest::new("web", 4), 3, UP, DOWN, now);
        let first = limiter.not_before("web", Direction::Up).unwrap();

        // The operator shortens the timeout; an admitted request right at
        // expiry must not pull the timer before its previous value.
        let short = RateLimitConfig { timeout_secs: 0, limit: 2 };
        limiter.admit(ScalingRequest::new("web", 6), 4, short, DOWN, first);
        assert!(limiter.not_before("web", Direction::Up).unwrap() >= first);
    }
}
