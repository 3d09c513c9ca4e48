//! Retry policy and backoff calculation.
//!
//! The policy is pure: given a failure class and the number of attempts made
//! so far it returns whether to try again, after how long, and whether the
//! stored credentials must be purged first. Scheduling lives in the daemon.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::failure::FailureClass;

// ============================================================================
// Delay Growth
// ============================================================================

/// How the generic delay grows with the attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DelayGrowth {
    /// `base × attempt`.
    Linear,

    /// `base × factor^(attempt - 1)`.
    Multiplicative {
        #[serde(default = "default_factor")]
        factor: f64,
    },
}

const fn default_factor() -> f64 {
    2.0
}

impl Default for DelayGrowth {
    fn default() -> Self {
        Self::Linear
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Retry configuration for initialization attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts allowed before parking in `Failed`.
    pub max_attempts: u32,

    /// Base delay for generic failures.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Growth of the generic delay.
    pub delay_growth: DelayGrowth,

    /// Fixed per-class delays that replace the generic calculation.
    #[serde(with = "humantime_serde::map")]
    pub failure_class_delays: BTreeMap<FailureClass, Duration>,

    /// Upper bound for any computed delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Delay between a forced clean and the fresh attempt.
    #[serde(with = "humantime_serde")]
    pub force_reconnect_delay: Duration,
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT_DELAY: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_FORCE_RECONNECT_DELAY: Duration = Duration::from_secs(3);

impl Default for RetryPolicy {
    fn default() -> Self {
        let mut failure_class_delays = BTreeMap::new();
        failure_class_delays.insert(FailureClass::Timeout, DEFAULT_TIMEOUT_DELAY);
        failure_class_delays.insert(FailureClass::AuthFailure, Duration::ZERO);

        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            delay_growth: DelayGrowth::Linear,
            failure_class_delays,
            max_delay: DEFAULT_MAX_DELAY,
            force_reconnect_delay: DEFAULT_FORCE_RECONNECT_DELAY,
        }
    }
}

/// Outcome of consulting the policy after a failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Schedule another attempt.
    Retry {
        delay: Duration,
        /// Purge stored credentials before the attempt.
        purge_auth: bool,
    },
    /// Budget exhausted; wait for an operator reset.
    GiveUp,
}

impl RetryPolicy {
    /// Checks values that would make the policy meaningless.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidFieldValue`] for a zero attempt budget
    /// or a shrinking multiplicative factor.
    pub fn validate(&self) -> DomainResult<()> {
        if self.max_attempts == 0 {
            return Err(DomainError::invalid("max_attempts", 0, "at least 1"));
        }
        if let DelayGrowth::Multiplicative { factor } = self.delay_growth {
            if !(factor >= 1.0 && factor.is_finite()) {
                return Err(DomainError::invalid("delay_growth.factor", factor, ">= 1.0"));
            }
        }
        Ok(())
    }

    /// Returns true once `attempts` has used up the budget.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before the next attempt after a failure of `class`.
    ///
    /// `attempts` is the number of attempts already made (treated as at
    /// least 1, so a failure right after `Ready` still waits `base_delay`).
    /// For a fixed class the delay is constant; otherwise it grows with
    /// `attempts` and is capped at `max_delay`, so consecutive failures of
    /// one class never see a shrinking delay.
    #[must_use]
    pub fn delay_for(&self, class: FailureClass, attempts: u32) -> Duration {
        if let Some(fixed) = self.failure_class_delays.get(&class) {
            return (*fixed).min(self.max_delay);
        }

        let n = attempts.max(1);
        let delay = match self.delay_growth {
            DelayGrowth::Linear => self.base_delay.saturating_mul(n),
            DelayGrowth::Multiplicative { factor } => {
                let exp = i32::try_from(n - 1).unwrap_or(i32::MAX);
                let secs = self.base_delay.as_secs_f64() * factor.max(1.0).powi(exp);
                Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
            }
        };
        delay.min(self.max_delay)
    }

    /// Decides what to do after a failure of `class` with `attempts` made.
    #[must_use]
    pub fn decide(&self, class: FailureClass, attempts: u32) -> RetryDecision {
        if self.is_exhausted(attempts) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.delay_for(class, attempts),
            purge_auth: class == FailureClass::AuthFailure,
        }
    }
}

/// Serde helpers for humantime-formatted durations ("5s", "2m 30s").
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Same, for maps whose values are durations.
    pub mod map {
        use std::collections::BTreeMap;
        use std::time::Duration;

        use serde::ser::SerializeMap;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<K, S>(
            map: &BTreeMap<K, Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            K: Serialize,
            S: Serializer,
        {
            let mut out = serializer.serialize_map(Some(map.len()))?;
            for (key, duration) in map {
                out.serialize_entry(key, &humantime::format_duration(*duration).to_string())?;
            }
            out.end()
        }

        pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, Duration>, D::Error>
        where
            K: Deserialize<'de> + Ord,
            D: Deserializer<'de>,
        {
            let raw = BTreeMap::<K, String>::deserialize(deserializer)?;
            raw.into_iter()
                .map(|(k, v)| {
                    humantime::parse_duration(&v)
                        .map(|d| (k, d))
                        .map_err(serde::de::Error::custom)
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, base_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(base_secs),
            ..Default::default()
        }
    }

    #[test]
    fn test_linear_delay_grows_with_attempts() {
        let p = policy(5, 5);
        assert_eq!(p.delay_for(FailureClass::SessionClosed, 1), Duration::from_secs(5));
        assert_eq!(p.delay_for(FailureClass::SessionClosed, 2), Duration::from_secs(10));
        assert_eq!(p.delay_for(FailureClass::Other, 3), Duration::from_secs(15));
    }

    #[test]
    fn test_zero_attempts_treated_as_one() {
        let p = policy(5, 5);
        assert_eq!(p.delay_for(FailureClass::Other, 0), Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_uses_fixed_larger_delay() {
        let p = policy(5, 5);
        assert_eq!(p.delay_for(FailureClass::Timeout, 1), DEFAULT_TIMEOUT_DELAY);
        assert_eq!(p.delay_for(FailureClass::Timeout, 4), DEFAULT_TIMEOUT_DELAY);
    }

    #[test]
    fn test_auth_failure_is_immediate_purge() {
        let p = policy(5, 5);
        assert_eq!(
            p.decide(FailureClass::AuthFailure, 1),
            RetryDecision::Retry {
                delay: Duration::ZERO,
                purge_auth: true
            }
        );
    }

    #[test]
    fn test_gives_up_when_budget_spent() {
        let p = policy(3, 5);
        assert!(matches!(
            p.decide(FailureClass::SessionClosed, 2),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(p.decide(FailureClass::SessionClosed, 3), RetryDecision::GiveUp);
        assert_eq!(p.decide(FailureClass::AuthFailure, 7), RetryDecision::GiveUp);
    }

    #[test]
    fn test_multiplicative_growth_is_capped() {
        let p = RetryPolicy {
            delay_growth: DelayGrowth::Multiplicative { factor: 2.0 },
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(p.delay_for(FailureClass::Other, 1), Duration::from_secs(1));
        assert_eq!(p.delay_for(FailureClass::Other, 4), Duration::from_secs(8));
        assert_eq!(p.delay_for(FailureClass::Other, 30), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_is_monotonic_per_class() {
        let growths = [
            DelayGrowth::Linear,
            DelayGrowth::Multiplicative { factor: 1.5 },
        ];
        for growth in growths {
            let p = RetryPolicy {
                delay_growth: growth,
                ..Default::default()
            };
            for class in [
                FailureClass::SessionClosed,
                FailureClass::Timeout,
                FailureClass::AuthFailure,
                FailureClass::Other,
            ] {
                let mut last = Duration::ZERO;
                for attempt in 0..40 {
                    let d = p.delay_for(class, attempt);
                    assert!(d >= last, "{class} attempt {attempt}: {d:?} < {last:?}");
                    last = d;
                }
            }
        }
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(policy(0, 5).validate().is_err());

        let shrinking = RetryPolicy {
            delay_growth: DelayGrowth::Multiplicative { factor: 0.5 },
            ..Default::default()
        };
        let err = shrinking.validate().unwrap_err();
        assert!(err.to_string().contains("delay_growth.factor"));
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: RetryPolicy = toml::from_str(
            r#"
            max_attempts = 3
            base_delay = "2s"
            delay_growth = { type = "multiplicative", factor = 3.0 }

            [failure_class_delays]
            timeout = "1m"
            "#,
        )
        .unwrap();

        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(
            policy.delay_for(FailureClass::Timeout, 1),
            Duration::from_secs(60)
        );
        assert_eq!(
            policy.delay_for(FailureClass::Other, 2),
            Duration::from_secs(6)
        );
        // Unset fields keep their defaults.
        assert_eq!(policy.max_delay, DEFAULT_MAX_DELAY);
    }
}
