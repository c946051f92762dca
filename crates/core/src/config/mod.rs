use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{model::Priority, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TesterConfig {
    pub fade: FadeConfig,
    pub log: LogConfig,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
}

impl TesterConfig {
    /// Loads a configuration file. Missing sections and fields keep their
    /// defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Configuration of the fade generator and its scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FadeConfig {
    pub tick_interval_ms: u64,
    /// Step applied on the first tick of a position fade, in microns.
    pub position_initial_step: i32,
    /// Amount the position step grows by every tick.
    pub position_step_increment: i32,
    /// Constant rotation step, in millionths of a degree.
    pub rotation_step: i32,
}

impl FadeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for FadeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            position_initial_step: 1_000,
            position_step_increment: 1_000,
            rotation_step: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Number of messages kept before the oldest are dropped.
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub name: String,
    pub default_priority: Priority,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            name: "OTP Tester Producer".to_string(),
            default_priority: crate::model::DEFAULT_PRIORITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub name: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: "OTP Tester Consumer".to_string(),
        }
    }
}
