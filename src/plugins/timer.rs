//! Recurring triggers bound to plugin methods

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::registration::RegistrationType;
use crate::application::errors::ConfigError;

/// How often a timer may fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Once per ISO week, roughly Monday 00:00
    Weekly,
    /// Once per calendar day, roughly at midnight
    Daily,
    /// Once per hour, roughly at :00
    Hourly,
    /// When more than the interval has passed since the last execution
    Every(Duration),
}

impl FromStr for Frequency {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Frequency::Weekly),
            "daily" => Ok(Frequency::Daily),
            "hourly" => Ok(Frequency::Hourly),
            other => other
                .parse::<u64>()
                .map(|secs| Frequency::Every(Duration::from_secs(secs)))
                .map_err(|_| ConfigError::InvalidValue(format!("timer frequency {}", other))),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Daily => write!(f, "daily"),
            Frequency::Hourly => write!(f, "hourly"),
            Frequency::Every(d) => write!(f, "every {}s", d.as_secs()),
        }
    }
}

/// A method called by the scheduler according to its frequency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    /// `<plugin>.<method>`
    pub name: String,
    pub method: String,
    /// `None`: fire on every tick
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub last_execution: Option<NaiveDateTime>,
    #[serde(default)]
    pub timer_type: RegistrationType,
}

impl Timer {
    pub fn new(plugin: &str, method: impl Into<String>, frequency: Option<Frequency>) -> Self {
        let method = method.into();
        Self {
            name: format!("{}.{}", plugin, method),
            method,
            frequency,
            last_execution: None,
            timer_type: RegistrationType::Static,
        }
    }

    pub fn with_type(mut self, timer_type: RegistrationType) -> Self {
        self.timer_type = timer_type;
        self
    }

    /// Name of the owning plugin, the part of `name` before the first `.`
    pub fn plugin_name(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// Whether the timer is due at `now`
    pub fn should_trigger(&self, now: NaiveDateTime) -> bool {
        let (frequency, last) = match (&self.frequency, &self.last_execution) {
            (None, _) | (_, None) => return true,
            (Some(f), Some(last)) => (f, last),
        };

        match frequency {
            Frequency::Weekly => last.iso_week().week() != now.iso_week().week(),
            Frequency::Daily => last.date() != now.date(),
            Frequency::Hourly => last.date() != now.date() || last.hour() != now.hour(),
            Frequency::Every(interval) => match chrono::Duration::from_std(*interval) {
                Ok(interval) => now.signed_duration_since(*last) > interval,
                Err(_) => false,
            },
        }
    }

    pub fn mark_executed(&mut self, now: NaiveDateTime) {
        self.last_execution = Some(now);
    }
}
