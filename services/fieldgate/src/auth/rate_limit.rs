//! Attempt tracking per (subject, channel) with lockout escalation.
//!
//! Flow Overview:
//! 1) `register_attempt` checks lockout, then the rolling window, then
//!    counts the attempt — all under one lock, so two concurrent attempts
//!    cannot both observe a pre-threshold count.
//! 2) Registration is pessimistic: every attempt counts as a failure until
//!    `record_success` clears the subject.
//! 3) Failures past the stricter lockout threshold escalate from
//!    `RATE_LIMITED` to the longer-lived `ACCOUNT_LOCKED`.
//!
//! Rejection happens before any KDF work, so blocked callers never burn an
//! Argon2 derivation.

use chrono::{DateTime, Duration as TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::RateLimitRule;
use crate::error::Error;

/// Channels are limited independently: a burst against one must not block
/// the others.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Login,
    UserPin,
    SupervisorPin,
}

#[derive(Debug, Default)]
struct SubjectWindow {
    attempts: Vec<DateTime<Utc>>,
    consecutive_failures: u32,
    locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RateLimiter {
    login: RateLimitRule,
    user_pin: RateLimitRule,
    supervisor_pin: RateLimitRule,
    state: Mutex<HashMap<(String, Channel), SubjectWindow>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(login: RateLimitRule, user_pin: RateLimitRule, supervisor_pin: RateLimitRule) -> Self {
        Self {
            login,
            user_pin,
            supervisor_pin,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn rule(&self, channel: Channel) -> RateLimitRule {
        match channel {
            Channel::Login => self.login,
            Channel::UserPin => self.user_pin,
            Channel::SupervisorPin => self.supervisor_pin,
        }
    }

    /// Check limits and count a new attempt for `subject` on `channel`.
    ///
    /// # Errors
    ///
    /// Returns `Error::AccountLocked` while a lockout cooldown is running and
    /// `Error::RateLimited` when the rolling window is full; both carry a
    /// `retry_after`.
    pub fn register_attempt(&self, subject: &str, channel: Channel) -> Result<(), Error> {
        self.register_attempt_at(subject, channel, Utc::now())
    }

    pub fn register_attempt_at(
        &self,
        subject: &str,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let rule = self.rule(channel);
        let window = TimeDelta::from_std(rule.window).unwrap_or_else(|_| TimeDelta::days(3650));

        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        purge_idle(&mut state, now);

        let entry = state.entry((subject.to_string(), channel)).or_default();

        if let Some(locked_until) = entry.locked_until {
            if locked_until > now {
                return Err(Error::AccountLocked {
                    retry_after: until(locked_until, now),
                });
            }
            // Cooldown served; start the failure count from a clean slate.
            entry.locked_until = None;
            entry.consecutive_failures = 0;
        }

        entry.attempts.retain(|at| *at > now - window);
        if entry.attempts.len() >= rule.max_attempts as usize {
            let oldest = entry.attempts.first().copied().unwrap_or(now);
            return Err(Error::RateLimited {
                retry_after: until(oldest + window, now),
            });
        }

        entry.attempts.push(now);
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= rule.lockout_threshold {
            entry.locked_until =
                Some(now + TimeDelta::from_std(rule.lockout).unwrap_or_else(|_| TimeDelta::days(3650)));
        }
        Ok(())
    }

    /// Clear the failure record after a successful verification.
    pub fn record_success(&self, subject: &str, channel: Channel) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.remove(&(subject.to_string(), channel));
    }
}

fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or_default()
}

fn purge_idle(state: &mut HashMap<(String, Channel), SubjectWindow>, now: DateTime<Utc>) {
    // Hour-old idle entries carry no limit or lockout state worth keeping.
    let horizon = now - TimeDelta::hours(1);
    state.retain(|_, window| {
        window.locked_until.is_some_and(|lock| lock > now)
            || window.attempts.iter().any(|at| *at > horizon)
    });
}
