//! Bounded in-memory cache of the latest prediction per animal.
//!
//! The cache is advisory: it is never read when deciding counters or
//! status, and entries can be stale with respect to the store. It is owned
//! by whoever constructs it and handed to the aggregator explicitly.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::HealthStatus;

/// Default number of animals tracked by the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// The most recent classification recorded for an animal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedPrediction {
    pub animal_id: i64,
    pub status: HealthStatus,
    pub probability: Option<f64>,
    /// `true` when the classifier was unavailable and the fallback was used.
    pub fallback: bool,
    pub predicted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<i64, CachedPrediction>,
    /// Animal ids in insertion order, oldest first.
    order: VecDeque<i64>,
}

/// Latest-prediction cache keyed by animal id.
///
/// When full, the animal whose entry was inserted longest ago is evicted.
/// Replacing an existing entry counts as a fresh insertion.
#[derive(Debug, Clone)]
pub struct PredictionCache {
    capacity: usize,
    inner: Arc<Mutex<Inner>>,
}

impl Default for PredictionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl PredictionCache {
    /// Create a cache holding at most `capacity` animals.
    ///
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn insert(&self, prediction: CachedPrediction) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.lock();
        let id = prediction.animal_id;

        if inner.entries.insert(id, prediction).is_some() {
            inner.order.retain(|&existing| existing != id);
        }
        inner.order.push_back(id);

        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, animal_id: i64) -> Option<CachedPrediction> {
        self.lock().entries.get(&animal_id).cloned()
    }

    pub fn remove(&self, animal_id: i64) {
        let mut inner = self.lock();
        if inner.entries.remove(&animal_id).is_some() {
            inner.order.retain(|&existing| existing != animal_id);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Entries are plain values, so a poisoned lock still holds usable data
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
