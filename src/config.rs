//! # Bus Configuration

use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};
use thiserror::Error;

use crate::error::BusResult;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration shared by the bus server and client.
///
/// `request_timeout` is expressed in milliseconds on the wire; `None` means
/// requests wait unboundedly for their reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    #[serde(default, with = "opt_duration_ms")]
    pub request_timeout: Option<Duration>,
}

impl BusConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> BusResult<Self> {
        let file = File::open(path).map_err(ConfigError::Io)?;
        let reader = BufReader::new(file);
        let config = serde_json::from_reader(reader).map_err(ConfigError::Parse)?;
        Ok(config)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            request_timeout: None,
        }
    }
}

fn default_event_buffer_size() -> usize {
    64
}

mod opt_duration_ms {
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
