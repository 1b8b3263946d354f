use std::{fmt::Display, str::FromStr};

use serde::Deserialize;

use crate::error::SchedulerError;

pub const CONCURRENCY_ENV: &str = "SCHEDULER_CONCURRENCY";

/// How many tasks may be dispatched at once.
///
/// `Auto` asks the host for a parallelism hint once, when the scheduler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RawConcurrency")]
pub enum Concurrency {
    #[default]
    Auto,
    Fixed(usize),
}

impl Concurrency {
    pub fn resolve(self, hint: impl FnOnce() -> usize) -> Result<usize, SchedulerError> {
        match self {
            Concurrency::Auto => Ok(hint().max(1)),
            Concurrency::Fixed(0) => Err(SchedulerError::Config(
                "concurrency must be a positive integer, got 0".to_string(),
            )),
            Concurrency::Fixed(limit) => Ok(limit),
        }
    }

    fn from_signed(value: i64) -> Result<Self, SchedulerError> {
        if value <= 0 {
            return Err(SchedulerError::Config(format!(
                "concurrency must be a positive integer, got {}",
                value
            )));
        }
        usize::try_from(value)
            .map(Concurrency::Fixed)
            .map_err(|e| SchedulerError::Config(e.to_string()))
    }
}

impl From<usize> for Concurrency {
    fn from(limit: usize) -> Self {
        Concurrency::Fixed(limit)
    }
}

impl FromStr for Concurrency {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("auto") {
            return Ok(Concurrency::Auto);
        }

        let value = s
            .parse::<i64>()
            .map_err(|_| SchedulerError::Config(format!("expected \"auto\" or an integer, got {:?}", s)))?;
        Concurrency::from_signed(value)
    }
}

impl Display for Concurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Concurrency::Auto => write!(f, "auto"),
            Concurrency::Fixed(limit) => write!(f, "{}", limit),
        }
    }
}

// config files may carry either `4` or `"auto"`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawConcurrency {
    Count(i64),
    Text(String),
}

impl TryFrom<RawConcurrency> for Concurrency {
    type Error = SchedulerError;

    fn try_from(raw: RawConcurrency) -> Result<Self, Self::Error> {
        match raw {
            RawConcurrency::Count(value) => Concurrency::from_signed(value),
            RawConcurrency::Text(text) => text.parse(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub concurrency: Concurrency,
}

impl SchedulerConfig {
    /// Reads `SCHEDULER_CONCURRENCY`; an unset variable means `Auto`.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let concurrency = match std::env::var(CONCURRENCY_ENV) {
            Ok(value) => value.parse()?,
            Err(_) => Concurrency::Auto,
        };
        Ok(Self { concurrency })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_auto_and_fixed() {
        assert_eq!("auto".parse::<Concurrency>().unwrap(), Concurrency::Auto);
        assert_eq!(" AUTO ".parse::<Concurrency>().unwrap(), Concurrency::Auto);
        assert_eq!("".parse::<Concurrency>().unwrap(), Concurrency::Auto);
        assert_eq!("4".parse::<Concurrency>().unwrap(), Concurrency::Fixed(4));
    }

    #[test]
    fn non_positive_limits_are_config_errors() {
        for input in ["0", "-2", "many"] {
            let err = input.parse::<Concurrency>().expect_err("should reject the limit");
            assert!(matches!(err, SchedulerError::Config(_)), "unexpected error for {}: {:?}", input, err);
        }
        assert!(matches!(Concurrency::Fixed(0).resolve(|| 8), Err(SchedulerError::Config(_))));
    }

    #[test]
    fn auto_consults_the_hint_once() {
        let mut calls = 0;
        let limit = Concurrency::Auto
            .resolve(|| {
                calls += 1;
                6
            })
            .unwrap();
        assert_eq!(limit, 6);
        assert_eq!(calls, 1);

        // a zero hint still leaves one worker slot
        assert_eq!(Concurrency::Auto.resolve(|| 0).unwrap(), 1);
    }

    #[test]
    fn fixed_ignores_the_hint() {
        let limit = Concurrency::Fixed(3)
            .resolve(|| panic!("hint should not be consulted"))
            .unwrap();
        assert_eq!(limit, 3);
    }

    #[test]
    fn deserialize_from_number_or_string() {
        let config: SchedulerConfig = serde_json::from_value(serde_json::json!({"concurrency": 4})).unwrap();
        assert_eq!(config.concurrency, Concurrency::Fixed(4));

        let config: SchedulerConfig = serde_json::from_value(serde_json::json!({"concurrency": "auto"})).unwrap();
        assert_eq!(config.concurrency, Concurrency::Auto);

        let config: SchedulerConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(config.concurrency, Concurrency::Auto);

        assert!(serde_json::from_value::<SchedulerConfig>(serde_json::json!({"concurrency": -1})).is_err());
    }
}
