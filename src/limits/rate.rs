use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::GuildLimits;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Which sliding window rejected an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    PerMinute,
    PerDay,
}

#[derive(Default)]
struct GuildWindow {
    minute: VecDeque<Instant>,
    day: VecDeque<Instant>,
}

impl GuildWindow {
    fn expire(&mut self, now: Instant) {
        while self
            .minute
            .front()
            .is_some_and(|t| now.duration_since(*t) >= MINUTE)
        {
            self.minute.pop_front();
        }
        while self
            .day
            .front()
            .is_some_and(|t| now.duration_since(*t) >= DAY)
        {
            self.day.pop_front();
        }
    }
}

/// Per-guild sliding-window admission control. A message is admitted at most
/// once, before fan-out; per-language translation calls are not separately
/// gated.
#[derive(Default)]
pub struct RateLimiter {
    guilds: Mutex<HashMap<i64, GuildWindow>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits one message for the guild, or reports which window is full.
    /// Rejected attempts are not recorded against either window.
    pub fn admit(&self, guild_id: i64, limits: &GuildLimits) -> Result<(), RateWindow> {
        self.admit_at(guild_id, limits, Instant::now())
    }

    fn admit_at(
        &self,
        guild_id: i64,
        limits: &GuildLimits,
        now: Instant,
    ) -> Result<(), RateWindow> {
        let mut guilds = self.guilds.lock();
        let window = guilds.entry(guild_id).or_default();
        window.expire(now);

        if window.minute.len() >= limits.requests_per_minute as usize {
            return Err(RateWindow::PerMinute);
        }
        if window.day.len() >= limits.max_daily_requests as usize {
            return Err(RateWindow::PerDay);
        }

        window.minute.push_back(now);
        window.day.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(per_minute: u32, per_day: u32) -> GuildLimits {
        GuildLimits {
            requests_per_minute: per_minute,
            max_daily_requests: per_day,
            max_monthly_cost_usd: 10.0,
            cost_alert_threshold_usd: 8.0,
        }
    }

    #[test]
    fn admits_up_to_minute_limit() {
        let limiter = RateLimiter::new();
        let limits = limits(3, 100);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.admit_at(1, &limits, now).is_ok());
        }
        assert_eq!(limiter.admit_at(1, &limits, now), Err(RateWindow::PerMinute));
    }

    #[test]
    fn minute_window_slides() {
        let limiter = RateLimiter::new();
        let limits = limits(2, 100);
        let start = Instant::now();

        assert!(limiter.admit_at(1, &limits, start).is_ok());
        assert!(limiter.admit_at(1, &limits, start).is_ok());
        assert_eq!(
            limiter.admit_at(1, &limits, start),
            Err(RateWindow::PerMinute)
        );

        let later = start + Duration::from_secs(61);
        assert!(limiter.admit_at(1, &limits, later).is_ok());
    }

    #[test]
    fn daily_limit_outlives_minute_window() {
        let limiter = RateLimiter::new();
        let limits = limits(100, 2);
        let start = Instant::now();

        assert!(limiter.admit_at(1, &limits, start).is_ok());
        assert!(limiter.admit_at(1, &limits, start).is_ok());

        // Minute window has rolled over but the day window has not.
        let later = start + Duration::from_secs(120);
        assert_eq!(limiter.admit_at(1, &limits, later), Err(RateWindow::PerDay));

        let next_day = start + Duration::from_secs(24 * 60 * 60 + 1);
        assert!(limiter.admit_at(1, &limits, next_day).is_ok());
    }

    #[test]
    fn guilds_are_isolated() {
        let limiter = RateLimiter::new();
        let limits = limits(1, 10);
        let now = Instant::now();

        assert!(limiter.admit_at(1, &limits, now).is_ok());
        assert_eq!(limiter.admit_at(1, &limits, now), Err(RateWindow::PerMinute));
        assert!(limiter.admit_at(2, &limits, now).is_ok());
    }

    #[test]
    fn rejection_does_not_consume_quota() {
        let limiter = RateLimiter::new();
        let limits = limits(1, 1);
        let start = Instant::now();

        assert!(limiter.admit_at(1, &limits, start).is_ok());
        for _ in 0..5 {
            assert!(limiter.admit_at(1, &limits, start).is_err());
        }
        // One admission recorded, so the day window frees up after it expires.
        let next_day = start + Duration::from_secs(24 * 60 * 60 + 1);
        assert!(limiter.admit_at(1, &limits, next_day).is_ok());
    }
}
