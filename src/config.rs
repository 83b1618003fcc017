use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{BusError, BusResult};

/// Upper bound for `workers`. The pool drains by acquiring every worker slot
/// at once, which takes a `u32` count.
pub const MAX_WORKERS: usize = u32::MAX as usize;

/// How `publish` runs handlers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DispatchMode {
    /// Handlers run on the publisher's thread; `publish` returns after all of them.
    #[default]
    Sync,
    /// Handlers run on a worker pool; `publish` returns once they are scheduled.
    Async,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub dispatch_mode: DispatchMode,

    /// Maximum number of handler invocations running at once in async mode.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-invocation deadline in async mode. Expiry is reported as a handler failure.
    #[serde(default, with = "option_duration_ms")]
    pub handler_timeout: Option<Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dispatch_mode: DispatchMode::default(),
            workers: default_workers(),
            handler_timeout: None,
        }
    }
}

impl BusConfig {
    pub fn asynchronous(workers: usize) -> Self {
        Self {
            dispatch_mode: DispatchMode::Async,
            workers,
            ..Default::default()
        }
    }

    // JSONファイルから設定を読み込む
    pub fn from_file<P: AsRef<Path>>(path: P) -> BusResult<Self> {
        let file = File::open(path.as_ref()).map_err(|e| BusError::ConfigLoad {
            message: format!("Failed to open {}: {}", path.as_ref().display(), e),
        })?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader).map_err(|e| BusError::ConfigLoad {
            message: format!("Failed to parse {}: {}", path.as_ref().display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(s: &str) -> BusResult<Self> {
        let config: Self = serde_json::from_str(s).map_err(|e| BusError::ConfigLoad {
            message: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BusResult<()> {
        if self.workers == 0 {
            return Err(BusError::invalid_config("workers must be at least 1"));
        }
        if self.workers > MAX_WORKERS {
            return Err(BusError::invalid_config(format!(
                "workers must be at most {}, got {}",
                MAX_WORKERS, self.workers
            )));
        }
        match (self.dispatch_mode, self.handler_timeout) {
            (_, Some(timeout)) if timeout.is_zero() => {
                Err(BusError::invalid_config("handler_timeout must be non-zero"))
            }
            (DispatchMode::Sync, Some(_)) => Err(BusError::invalid_config(
                "handler_timeout requires async dispatch",
            )),
            _ => Ok(()),
        }
    }
}

fn default_workers() -> usize {
    1
}

// Option<Duration> をミリ秒で扱う
mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
