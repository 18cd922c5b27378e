//! Listener options
//!
//! Every listener carries an options dict built as: `packet = 0`, then the
//! configured `[listen]` defaults, then whatever the caller passed. Keys the
//! runtime does not know about are kept for the owning behavior to read.

use serde::{Deserialize, Serialize};
use types::{Dict, Result, Value};

/// Framing key; `0` means raw stream
pub const PACKET_KEY: &str = "packet";

/// Options dict attached to a listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenOptions {
    options: Dict,
}

impl ListenOptions {
    /// Build the options for one listener
    pub fn build(buckets: usize, defaults: &Dict, overrides: Option<&Dict>) -> Result<Self> {
        let mut options = Dict::new(buckets);
        options.set_number(PACKET_KEY, 0.0)?;
        options.merge_from(defaults)?;
        if let Some(overrides) = overrides {
            options.merge_from(overrides)?;
        }
        // reject a non-numeric framing value up front
        options.require_number(PACKET_KEY)?;
        Ok(Self { options })
    }

    /// Framing size; 0 when unset or not a whole number
    pub fn packet(&self) -> i64 {
        self.options
            .get(PACKET_KEY)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn as_dict(&self) -> &Dict {
        &self.options
    }

    pub fn into_dict(self) -> Dict {
        self.options
    }
}
