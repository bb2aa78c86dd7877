//! Health aggregation and farm counter reconciliation.
//!
//! The [`HealthAggregator`] turns classified readings into per-animal
//! counters and status. Every operation that can change an animal's status
//! finishes by calling [`reconcile`], which recomputes the farm's derived
//! healthy/at-risk counts from the store.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CachedPrediction, PredictionCache};
use crate::classifier::{Classifier, FallbackPolicy, classify_or_fallback};
use crate::error::{AppError, StoreError};
use crate::model::{
    Animal, AnimalSummary, FarmAggregate, HealthStatus, HealthTally, NewAnimal, NewReading,
    RecordedReading, Vitals,
};
use crate::storage::Storage;

/// How many times a reading is re-applied after losing a concurrent update.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Recompute a farm's healthy/at-risk counts from its animals' statuses.
///
/// The two counts are taken independently, so an animal created or deleted
/// between them can make one result briefly inconsistent. A later call
/// always overwrites with fresher values.
///
/// # Errors
///
/// `NotFound` if the farm is not registered.
#[instrument(skip(storage))]
pub async fn reconcile(storage: &Storage, farm_id: &str) -> Result<FarmAggregate, AppError> {
    let healthy = storage
        .count_animals_by_status(farm_id, HealthStatus::Healthy)
        .await?;
    let at_risk = storage
        .count_animals_by_status(farm_id, HealthStatus::AtRisk)
        .await?;

    let aggregate = FarmAggregate {
        healthy_cattle_count: healthy,
        risky_cattle_count: at_risk,
    };

    if !storage.update_farm_aggregate(farm_id, aggregate).await? {
        return Err(AppError::NotFound(format!("No farm found with id '{farm_id}'")));
    }

    debug!(healthy, at_risk, "Farm counts reconciled");
    Ok(aggregate)
}

/// Maintains animal counters and status as readings arrive.
#[derive(Clone)]
pub struct HealthAggregator {
    storage: Storage,
    classifier: Arc<dyn Classifier>,
    fallback: FallbackPolicy,
    cache: PredictionCache,
}

impl HealthAggregator {
    pub fn new(
        storage: Storage,
        classifier: Arc<dyn Classifier>,
        fallback: FallbackPolicy,
        cache: PredictionCache,
    ) -> Self {
        Self {
            storage,
            classifier,
            fallback,
            cache,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn cache(&self) -> &PredictionCache {
        &self.cache
    }

    /// Classify one reading for an existing animal and record it.
    ///
    /// The reading and the new counters are committed together. If another
    /// writer updated the animal in between, the counters are recomputed from
    /// the fresh record and the commit is retried; the classification is not
    /// repeated.
    #[instrument(skip(self, vitals))]
    pub async fn classify_and_record(
        &self,
        farm_id: &str,
        animal_id: i64,
        vitals: Vitals,
    ) -> Result<RecordedReading, AppError> {
        let mut animal = self.find_animal(farm_id, animal_id).await?;
        let (reading, fallback) = self.classify(&vitals).await;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let mut tally = animal.tally();
            tally.record(reading.is_healthy);

            if let Some(stored) = self.storage.commit_reading(&animal, tally, &reading).await? {
                self.remember(animal.id, &reading, fallback);

                let summary = AnimalSummary {
                    health_status: tally.status(),
                    healthy_readings_count: tally.healthy_count,
                    risk_readings_count: tally.at_risk_count,
                    ..animal.summary()
                };

                info!(
                    status = %summary.health_status,
                    healthy = summary.healthy_readings_count,
                    at_risk = summary.risk_readings_count,
                    "Reading recorded"
                );

                reconcile(&self.storage, farm_id).await?;
                return Ok(RecordedReading {
                    reading: stored,
                    cattle: summary,
                });
            }

            warn!(attempt, "Concurrent update on cattle record, retrying");
            animal = self.find_animal(farm_id, animal_id).await?;
        }

        Err(StoreError::VersionConflict { animal_id }.into())
    }

    /// Classify the readings supplied when an animal is registered.
    ///
    /// Readings are classified one after another; the returned tally decides
    /// the initial status. Each reading is paired with whether the fallback
    /// label was used for it.
    pub async fn bulk_seed(
        &self,
        readings: &[Vitals],
    ) -> (HealthTally, Vec<(NewReading, bool)>) {
        let mut tally = HealthTally::default();
        let mut classified = Vec::with_capacity(readings.len());

        for vitals in readings {
            let (reading, fallback) = self.classify(vitals).await;
            tally.record(reading.is_healthy);
            classified.push((reading, fallback));
        }

        (tally, classified)
    }

    /// Register a new animal, seeding its counters from any initial readings.
    #[instrument(skip(self, animal, readings), fields(tag_id = %animal.tag_id, seeded = readings.len()))]
    pub async fn register_animal(
        &self,
        farm_id: &str,
        animal: NewAnimal,
        readings: &[Vitals],
    ) -> Result<Animal, AppError> {
        if self.storage.get_farm(farm_id).await?.is_none() {
            return Err(AppError::NotFound(format!("No farm found with id '{farm_id}'")));
        }

        // Checked up front so a duplicate never costs classifier calls
        if self
            .storage
            .find_animal_by_tag(farm_id, &animal.tag_id)
            .await?
            .is_some()
        {
            return Err(StoreError::DuplicateTag {
                farm_id: farm_id.to_string(),
                tag_id: animal.tag_id,
            }
            .into());
        }

        let (tally, seeded) = self.bulk_seed(readings).await;
        let (new_readings, fallbacks): (Vec<_>, Vec<_>) = seeded.into_iter().unzip();
        let created = self
            .storage
            .create_animal(farm_id, &animal, tally, &new_readings, Utc::now())
            .await?;

        if let (Some(last), Some(&fallback)) = (new_readings.last(), fallbacks.last()) {
            self.remember(created.id, last, fallback);
        }

        info!(
            animal_id = created.id,
            status = %created.health_status,
            "Cattle registered"
        );

        reconcile(&self.storage, farm_id).await?;
        Ok(created)
    }

    /// Zero an animal's counters and mark it healthy.
    ///
    /// The reading history is kept.
    #[instrument(skip(self))]
    pub async fn reset(&self, farm_id: &str, animal_id: i64) -> Result<AnimalSummary, AppError> {
        let animal = self.find_animal(farm_id, animal_id).await?;

        let tally = HealthTally::default();
        if !self
            .storage
            .update_animal_counters(animal.id, tally, HealthStatus::Healthy, Utc::now())
            .await?
        {
            return Err(not_found(animal_id));
        }
        self.cache.remove(animal.id);

        info!("Cattle health reset");

        reconcile(&self.storage, farm_id).await?;
        Ok(AnimalSummary {
            health_status: HealthStatus::Healthy,
            healthy_readings_count: 0,
            risk_readings_count: 0,
            ..animal.summary()
        })
    }

    /// Delete an animal and its readings.
    #[instrument(skip(self))]
    pub async fn remove_animal(&self, farm_id: &str, animal_id: i64) -> Result<(), AppError> {
        if !self.storage.delete_animal(farm_id, animal_id).await? {
            return Err(not_found(animal_id));
        }
        self.cache.remove(animal_id);

        info!("Cattle deleted");

        reconcile(&self.storage, farm_id).await?;
        Ok(())
    }

    async fn find_animal(&self, farm_id: &str, animal_id: i64) -> Result<Animal, AppError> {
        self.storage
            .find_animal(farm_id, animal_id)
            .await?
            .ok_or_else(|| not_found(animal_id))
    }

    async fn classify(&self, vitals: &Vitals) -> (NewReading, bool) {
        let (classification, fallback) =
            classify_or_fallback(self.classifier.as_ref(), vitals, self.fallback).await;

        let reading = NewReading {
            vitals: *vitals,
            recorded_at: Utc::now(),
            is_healthy: classification.healthy,
            probability: classification.probability,
        };
        (reading, fallback)
    }

    fn remember(&self, animal_id: i64, reading: &NewReading, fallback: bool) {
        self.cache.insert(CachedPrediction {
            animal_id,
            status: HealthStatus::from_healthy(reading.is_healthy),
            probability: reading.probability,
            fallback,
            predicted_at: reading.recorded_at,
        });
    }
}

fn not_found(animal_id: i64) -> AppError {
    AppError::NotFound(format!("No cattle found with id {animal_id} in this farm"))
}
