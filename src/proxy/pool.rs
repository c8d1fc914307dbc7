//! Round-robin rotation over the upstream pool.

use crate::proxy::Upstream;
use crate::util::{Result, SocksRotError};
use std::sync::{Arc, Mutex};

/// Thread-safe circular cursor over the configured upstreams.
///
/// `next` hands entries out strictly in input order and wraps around after
/// the last one. There is no weighting and no removal; entries live for the
/// lifetime of the pool.
pub struct RotationPool {
    entries: Vec<Arc<Upstream>>,
    cursor: Mutex<usize>,
}

impl RotationPool {
    /// Build a pool from parsed descriptors, in input order.
    pub fn new(upstreams: Vec<Upstream>) -> Result<Self> {
        if upstreams.is_empty() {
            return Err(SocksRotError::Config("proxy pool is empty".to_string()));
        }
        Ok(Self {
            entries: upstreams.into_iter().map(Arc::new).collect(),
            cursor: Mutex::new(0),
        })
    }

    /// Return the current upstream and advance the cursor to the next one.
    pub fn next(&self) -> Arc<Upstream> {
        let mut cursor = self.cursor.lock().expect("pool cursor lock poisoned");
        let entry = Arc::clone(&self.entries[*cursor]);
        *cursor = (*cursor + 1) % self.entries.len();
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
