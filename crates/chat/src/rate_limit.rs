//! Per-actor sliding-window admission control.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    parley_common::ActorId,
    parley_config::RateLimitConfig,
    tracing::debug,
};

#[cfg(feature = "metrics")]
use parley_metrics::{admission as admission_metrics, counter, labels};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const CLEANUP_EVERY_CHECKS: u64 = 512;

/// Which window rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionWindow {
    Minute,
    Hour,
}

impl AdmissionWindow {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed,
    Denied {
        retry_after_seconds: u64,
        window: AdmissionWindow,
    },
}

impl AdmissionDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// `(allowed, retry_after_seconds)`.
    #[must_use]
    pub fn as_pair(&self) -> (bool, Option<u64>) {
        match self {
            Self::Allowed => (true, None),
            Self::Denied {
                retry_after_seconds,
                ..
            } => (false, Some(*retry_after_seconds)),
        }
    }
}

/// Seconds until `elapsed` reaches `window`, rounded up, at least 1.
fn retry_after(window: Duration, elapsed: Duration) -> u64 {
    let remaining = window.saturating_sub(elapsed);
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}

/// Admission timestamps per actor over the trailing hour.
///
/// Check-and-record happens under the map's entry guard for that actor, so
/// two workers admitting the same actor concurrently cannot both slip past
/// the cap.
#[derive(Clone)]
pub struct RateLimiter {
    limits: RateLimitConfig,
    history: Arc<DashMap<ActorId, VecDeque<Instant>>>,
    checks_seen: Arc<AtomicU64>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(limits: RateLimitConfig) -> Self {
        Self {
            limits,
            history: Arc::new(DashMap::new()),
            checks_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn limits(&self) -> RateLimitConfig {
        self.limits
    }

    pub fn check(&self, actor_id: &ActorId) -> AdmissionDecision {
        self.check_at(actor_id, Instant::now())
    }

    pub fn check_at(&self, actor_id: &ActorId, now: Instant) -> AdmissionDecision {
        let decision = match self.history.entry(actor_id.clone()) {
            Entry::Occupied(mut occupied) => self.decide(occupied.get_mut(), now),
            Entry::Vacant(vacant) => {
                let mut stamps = VecDeque::new();
                let decision = self.decide(&mut stamps, now);
                vacant.insert(stamps);
                decision
            },
        };

        match decision {
            AdmissionDecision::Allowed => {
                #[cfg(feature = "metrics")]
                counter!(admission_metrics::ALLOWED_TOTAL).increment(1);
            },
            AdmissionDecision::Denied {
                retry_after_seconds,
                window,
            } => {
                debug!(actor_id = %actor_id, retry_after_seconds, window = window.as_str(), "admission denied");
                #[cfg(feature = "metrics")]
                counter!(admission_metrics::DENIED_TOTAL, labels::WINDOW => window.as_str())
                    .increment(1);
            },
        }

        self.cleanup_if_needed(now);
        decision
    }

    fn decide(&self, stamps: &mut VecDeque<Instant>, now: Instant) -> AdmissionDecision {
        while stamps
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= HOUR)
        {
            stamps.pop_front();
        }

        let per_minute = self.limits.per_minute as usize;
        let per_hour = self.limits.per_hour as usize;

        let oldest_in_minute = stamps
            .iter()
            .find(|t| now.saturating_duration_since(**t) < MINUTE)
            .copied();
        let in_minute = oldest_in_minute.map_or(0, |first| {
            stamps.iter().filter(|t| **t >= first).count()
        });

        if in_minute >= per_minute {
            let elapsed =
                oldest_in_minute.map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
            return AdmissionDecision::Denied {
                retry_after_seconds: retry_after(MINUTE, elapsed),
                window: AdmissionWindow::Minute,
            };
        }

        if stamps.len() >= per_hour {
            let elapsed = stamps
                .front()
                .map_or(Duration::ZERO, |t| now.saturating_duration_since(*t));
            return AdmissionDecision::Denied {
                retry_after_seconds: retry_after(HOUR, elapsed),
                window: AdmissionWindow::Hour,
            };
        }

        stamps.push_back(now);
        AdmissionDecision::Allowed
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.checks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen.is_multiple_of(CLEANUP_EVERY_CHECKS) {
            self.cleanup_at(now);
        }
    }

    /// Drop actors with no admissions in the trailing hour. Returns how many
    /// were dropped.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    fn cleanup_at(&self, now: Instant) -> usize {
        let before = self.history.len();
        self.history.retain(|_, stamps| {
            stamps
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) < HOUR)
        });
        before.saturating_sub(self.history.len())
    }

    /// Number of actors currently tracked.
    pub fn tracked_actors(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: u32, per_hour: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            per_minute,
            per_hour,
        })
    }

    #[test]
    fn eleventh_request_in_a_minute_is_denied_then_admitted_later() {
        let limiter = limiter(10, 100);
        let actor = ActorId::from("alice");
        let t0 = Instant::now();

        for i in 0..10 {
            let at = t0 + Duration::from_millis(i * 50);
            assert_eq!(limiter.check_at(&actor, at), AdmissionDecision::Allowed);
        }

        let denied = limiter.check_at(&actor, t0 + Duration::from_millis(900));
        let AdmissionDecision::Denied {
            retry_after_seconds,
            window,
        } = denied
        else {
            panic!("expected denial, got {denied:?}");
        };
        assert_eq!(window, AdmissionWindow::Minute);
        assert!(retry_after_seconds > 0 && retry_after_seconds <= 60);

        let later = t0 + Duration::from_millis(900) + Duration::from_secs(retry_after_seconds);
        assert!(limiter.check_at(&actor, later).is_allowed());
    }

    #[test]
    fn hour_window_applies_after_minute_window() {
        let limiter = limiter(10, 12);
        let actor = ActorId::from("bob");
        let t0 = Instant::now();

        for i in 0..10 {
            assert!(limiter.check_at(&actor, t0 + Duration::from_secs(i)).is_allowed());
        }
        let t1 = t0 + Duration::from_secs(120);
        assert!(limiter.check_at(&actor, t1).is_allowed());
        assert!(limiter.check_at(&actor, t1).is_allowed());

        let denied = limiter.check_at(&actor, t1 + Duration::from_secs(1));
        assert_eq!(denied, AdmissionDecision::Denied {
            retry_after_seconds: 3600 - 121,
            window: AdmissionWindow::Hour,
        });

        // Oldest entry expires exactly one hour after it was recorded.
        assert!(limiter.check_at(&actor, t0 + HOUR).is_allowed());
    }

    #[test]
    fn actors_are_independent() {
        let limiter = limiter(1, 10);
        let t0 = Instant::now();
        assert!(limiter.check_at(&ActorId::from("a"), t0).is_allowed());
        assert!(limiter.check_at(&ActorId::from("b"), t0).is_allowed());
        assert!(!limiter.check_at(&ActorId::from("a"), t0).is_allowed());
        assert_eq!(limiter.tracked_actors(), 2);
    }

    #[test]
    fn denied_requests_are_not_recorded() {
        let limiter = limiter(1, 10);
        let actor = ActorId::from("a");
        let t0 = Instant::now();
        assert!(limiter.check_at(&actor, t0).is_allowed());
        for s in 1..59 {
            assert!(!limiter.check_at(&actor, t0 + Duration::from_secs(s)).is_allowed());
        }
        assert!(limiter.check_at(&actor, t0 + MINUTE).is_allowed());
    }

    #[test]
    fn cleanup_drops_idle_actors() {
        let limiter = limiter(5, 50);
        let t0 = Instant::now();
        limiter.check_at(&ActorId::from("old"), t0);
        limiter.check_at(&ActorId::from("new"), t0 + Duration::from_secs(3000));
        assert_eq!(limiter.cleanup_at(t0 + Duration::from_secs(3700)), 1);
        assert_eq!(limiter.tracked_actors(), 1);
    }

    #[test]
    fn concurrent_checks_never_over_admit() {
        let limiter = limiter(25, 1000);
        let actor = ActorId::from("shared");
        let now = Instant::now();
        let admitted = AtomicU64::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        if limiter.check_at(&actor, now).is_allowed() {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::Relaxed), 25);
    }

    #[test]
    fn pair_form_matches_contract() {
        assert_eq!(AdmissionDecision::Allowed.as_pair(), (true, None));
        assert_eq!(
            AdmissionDecision::Denied {
                retry_after_seconds: 3,
                window: AdmissionWindow::Minute
            }
            .as_pair(),
            (false, Some(3))
        );
    }
}
