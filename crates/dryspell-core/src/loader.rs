//! Access to already-derived drought-duration datasets.
//!
//! Discovering and decoding dataset files is the job of the caller; the pipeline only
//! asks a [`DatasetLoader`] for the field matching a [`DatasetKey`].

use crate::ensemble::EnsembleMember;
use crate::errors::{DroughtError, DroughtResult};
use crate::grid::GridField;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Identifies one dataset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetKey {
    pub category: String,
    pub bias_correction: String,
    pub model: String,
    pub variable: String,
    pub scenario: String,
}

impl DatasetKey {
    pub fn new(category: &str, member: &EnsembleMember, variable: &str, scenario: &str) -> Self {
        Self {
            category: category.to_string(),
            bias_correction: member.bias_correction.clone(),
            model: member.model.clone(),
            variable: variable.to_string(),
            scenario: scenario.to_string(),
        }
    }

    pub fn member(&self) -> EnsembleMember {
        EnsembleMember::new(&self.model, &self.bias_correction)
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.category, self.bias_correction, self.model, self.variable, self.scenario
        )
    }
}

/// Supplies gridded fields, spatially co-registered with the region mask.
///
/// Implementations report a missing dataset with [`DroughtError::DatasetNotFound`] and an
/// unreadable one with [`DroughtError::DatasetCorrupt`].
pub trait DatasetLoader: Send + Sync {
    fn load(&self, key: &DatasetKey) -> DroughtResult<Arc<GridField>>;
}

/// Loader over fields that are already in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLoader {
    fields: HashMap<DatasetKey, Arc<GridField>>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: DatasetKey, field: GridField) -> &mut Self {
        self.fields.insert(key, Arc::new(field));
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl DatasetLoader for InMemoryLoader {
    fn load(&self, key: &DatasetKey) -> DroughtResult<Arc<GridField>> {
        self.fields
            .get(key)
            .cloned()
            .ok_or_else(|| DroughtError::DatasetNotFound {
                key: key.to_string(),
            })
    }
}

/// Timeout and retry settings for dataset loads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPolicy {
    /// Per-attempt timeout in seconds; no timeout when unset
    pub timeout_secs: Option<f64>,
    /// Additional attempts after a timed out load
    pub retries: u32,
}

impl LoadPolicy {
    pub fn validate(&self) -> DroughtResult<()> {
        match self.timeout_secs {
            Some(secs) if !(secs.is_finite() && secs > 0.0) => Err(DroughtError::invalid_config(
                format!("load timeout must be a positive number of seconds, got {secs}"),
            )),
            _ => Ok(()),
        }
    }
}

/// Load `key`, applying the timeout and retry policy.
///
/// A panic inside the loader is reported as [`DroughtError::DatasetCorrupt`] whether or
/// not a timeout is configured. With a timeout, the load runs on one helper thread per
/// call. When an attempt times out while that load is still running, the next attempt
/// waits on the same load instead of starting a duplicate, so a call never has more than
/// one helper thread. A load still running after the last attempt is abandoned: its
/// thread finishes in the background and its result is discarded.
pub fn fetch(
    loader: &Arc<dyn DatasetLoader>,
    key: &DatasetKey,
    policy: &LoadPolicy,
) -> DroughtResult<Arc<GridField>> {
    let Some(secs) = policy.timeout_secs else {
        return load_catching_panics(&**loader, key);
    };
    let timeout = Duration::from_secs_f64(secs);
    let attempts = policy.retries + 1;

    let (tx, rx) = mpsc::channel();
    let worker_loader = Arc::clone(loader);
    let worker_key = key.clone();
    std::thread::spawn(move || {
        // The receiver is gone once every attempt timed out
        let _ = tx.send(load_catching_panics(&*worker_loader, &worker_key));
    });

    for attempt in 1..=attempts {
        match rx.recv_timeout(timeout) {
            Ok(result) => return result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(dataset = %key, attempt, attempts, "Dataset load timed out");
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(loader_panicked(key)),
        }
    }

    Err(DroughtError::LoadTimeout {
        key: key.to_string(),
        seconds: secs,
        attempts,
    })
}

fn load_catching_panics(
    loader: &dyn DatasetLoader,
    key: &DatasetKey,
) -> DroughtResult<Arc<GridField>> {
    panic::catch_unwind(AssertUnwindSafe(|| loader.load(key)))
        .unwrap_or_else(|_| Err(loader_panicked(key)))
}

fn loader_panicked(key: &DatasetKey) -> DroughtError {
    DroughtError::DatasetCorrupt {
        key: key.to_string(),
        reason: "loader panicked".to_string(),
    }
}
