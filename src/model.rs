//! Data models for Herdwatch.
//!
//! Records are farm-scoped: every animal belongs to exactly one farm and its
//! tag only has to be unique within that farm. Readings are append-only and
//! never edited after they are stored.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current health status of an animal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    AtRisk,
}

impl HealthStatus {
    /// The value stored in the database and sent over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::AtRisk => "at_risk",
        }
    }

    pub fn from_healthy(healthy: bool) -> Self {
        if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::AtRisk
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(HealthStatus::Healthy),
            "at_risk" => Ok(HealthStatus::AtRisk),
            other => Err(format!("unknown health status '{other}'")),
        }
    }
}

/// Rolling per-animal reading counters.
///
/// The status is derived from the tallies alone, so the order in which
/// readings were classified only matters for the final counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthTally {
    pub healthy_count: i64,
    pub at_risk_count: i64,
}

impl HealthTally {
    pub fn new(healthy_count: i64, at_risk_count: i64) -> Self {
        Self {
            healthy_count,
            at_risk_count,
        }
    }

    /// Count one classified reading.
    pub fn record(&mut self, healthy: bool) {
        if healthy {
            self.healthy_count += 1;
        } else {
            self.at_risk_count += 1;
        }
    }

    /// Derive the status from the tallies.
    ///
    /// Ties are reported as `AtRisk`, including a tally with no readings.
    /// A reset sets `Healthy` explicitly instead of deriving it.
    pub fn status(&self) -> HealthStatus {
        if self.at_risk_count >= self.healthy_count {
            HealthStatus::AtRisk
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn total(&self) -> i64 {
        self.healthy_count + self.at_risk_count
    }
}

/// The four vitals a reading is made of.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub body_temperature: f64,
    pub heart_rate: f64,
    pub sleeping_duration: f64,
    pub lying_down_duration: f64,
}

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Vitals as submitted by a client, before validation.
///
/// Every field is optional here so that a missing value can be reported per
/// field instead of as an opaque deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadingRequest {
    pub body_temperature: Option<f64>,
    pub heart_rate: Option<f64>,
    pub sleeping_duration: Option<f64>,
    pub lying_down_duration: Option<f64>,
}

impl ReadingRequest {
    /// Validate the request into complete vitals.
    ///
    /// `prefix` is prepended to field names, e.g. `health_readings[2].`.
    pub fn validate(&self, prefix: &str) -> Result<Vitals, Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut check = |name: &str, value: Option<f64>| match value {
            Some(v) if v.is_finite() => v,
            Some(_) => {
                errors.push(FieldError::new(
                    format!("{prefix}{name}"),
                    "must be a finite number",
                ));
                0.0
            }
            None => {
                errors.push(FieldError::new(format!("{prefix}{name}"), "is required"));
                0.0
            }
        };

        let vitals = Vitals {
            body_temperature: check("body_temperature", self.body_temperature),
            heart_rate: check("heart_rate", self.heart_rate),
            sleeping_duration: check("sleeping_duration", self.sleeping_duration),
            lying_down_duration: check("lying_down_duration", self.lying_down_duration),
        };

        if errors.is_empty() {
            Ok(vitals)
        } else {
            Err(errors)
        }
    }
}

/// A stored health reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub id: i64,
    pub animal_id: i64,
    /// Tag of the owning animal, denormalised for display.
    pub tag_id: String,
    #[serde(flatten)]
    pub vitals: Vitals,
    pub recorded_at: DateTime<Utc>,
    pub is_healthy: bool,
    /// Classifier confidence, absent when the fallback was applied.
    pub probability: Option<f64>,
}

/// A reading that has been classified but not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub vitals: Vitals,
    pub recorded_at: DateTime<Utc>,
    pub is_healthy: bool,
    pub probability: Option<f64>,
}

/// A cattle record without its reading history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Animal {
    pub id: i64,
    pub tag_id: String,
    pub farm_id: String,
    pub location: String,
    pub name: Option<String>,
    pub health_status: HealthStatus,
    pub healthy_readings_count: i64,
    pub risk_readings_count: i64,
    pub last_health_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every counter update.
    #[serde(skip)]
    pub version: i64,
}

impl Animal {
    pub fn tally(&self) -> HealthTally {
        HealthTally::new(self.healthy_readings_count, self.risk_readings_count)
    }

    pub fn summary(&self) -> AnimalSummary {
        AnimalSummary {
            id: self.id,
            tag_id: self.tag_id.clone(),
            name: self.name.clone(),
            health_status: self.health_status,
            healthy_readings_count: self.healthy_readings_count,
            risk_readings_count: self.risk_readings_count,
        }
    }
}

/// A cattle record together with its full reading history.
#[derive(Debug, Clone, Serialize)]
pub struct AnimalDetail {
    #[serde(flatten)]
    pub animal: Animal,
    pub health_readings: Vec<Reading>,
}

/// The counters and status of an animal, returned after a mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimalSummary {
    pub id: i64,
    pub tag_id: String,
    pub name: Option<String>,
    pub health_status: HealthStatus,
    pub healthy_readings_count: i64,
    pub risk_readings_count: i64,
}

/// Fields of a new cattle record once validated.
#[derive(Debug, Clone)]
pub struct NewAnimal {
    pub tag_id: String,
    pub location: String,
    pub name: Option<String>,
}

/// Request body for creating a cattle record.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAnimalRequest {
    pub tag_id: Option<String>,
    pub location: Option<String>,
    pub name: Option<String>,
    /// Optional; when present it must match the farm in the path.
    pub farm_id: Option<String>,
    #[serde(default)]
    pub health_readings: Vec<ReadingRequest>,
}

impl CreateAnimalRequest {
    /// Validate the descriptive fields and every initial reading.
    pub fn validate(&self) -> Result<(NewAnimal, Vec<Vitals>), Vec<FieldError>> {
        let mut errors = Vec::new();

        let tag_id = required_text("tag_id", self.tag_id.as_deref(), &mut errors);
        let location = required_text("location", self.location.as_deref(), &mut errors);

        let mut readings = Vec::with_capacity(self.health_readings.len());
        for (i, reading) in self.health_readings.iter().enumerate() {
            match reading.validate(&format!("health_readings[{i}].")) {
                Ok(vitals) => readings.push(vitals),
                Err(mut errs) => errors.append(&mut errs),
            }
        }

        if errors.is_empty() {
            Ok((
                NewAnimal {
                    tag_id,
                    location,
                    name: optional_text(self.name.as_deref()),
                },
                readings,
            ))
        } else {
            Err(errors)
        }
    }
}

/// Request body for editing the descriptive fields of a cattle record.
///
/// Tag, farm, counters and status are deliberately absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAnimalRequest {
    pub location: Option<String>,
    pub name: Option<String>,
}

impl UpdateAnimalRequest {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        match &self.location {
            Some(location) if location.trim().is_empty() => {
                Err(vec![FieldError::new("location", "must not be empty")])
            }
            _ => Ok(()),
        }
    }
}

/// A registered farm with its derived health counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Farm {
    pub farm_id: String,
    pub name: String,
    pub healthy_cattle_count: i64,
    pub risky_cattle_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Derived per-farm counts, recomputed from animal statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FarmAggregate {
    pub healthy_cattle_count: i64,
    pub risky_cattle_count: i64,
}

/// Request body for registering a farm.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFarmRequest {
    pub farm_id: Option<String>,
    pub name: Option<String>,
}

impl CreateFarmRequest {
    pub fn validate(&self) -> Result<(String, String), Vec<FieldError>> {
        let mut errors = Vec::new();
        let farm_id = required_text("farm_id", self.farm_id.as_deref(), &mut errors);
        let name = required_text("name", self.name.as_deref(), &mut errors);
        if errors.is_empty() {
            Ok((farm_id, name))
        } else {
            Err(errors)
        }
    }
}

/// Sort direction for reading history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Query parameters for GET .../readings.
#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQuery {
    pub limit: Option<i64>,
    #[serde(default)]
    pub order: SortOrder,
}

/// Response for GET .../readings.
#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub results: usize,
    pub readings: Vec<Reading>,
}

/// Response for POST .../readings.
#[derive(Debug, Serialize)]
pub struct RecordedReading {
    pub reading: Reading,
    pub cattle: AnimalSummary,
}

/// Response for GET /farms/{farm}/cattle.
#[derive(Debug, Serialize)]
pub struct CattleListResponse {
    pub results: usize,
    pub cattle: Vec<Animal>,
}

/// Per-animal reading statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimalStats {
    pub id: i64,
    pub tag_id: String,
    pub location: String,
    pub avg_temp: Option<f64>,
    pub avg_heart: Option<f64>,
    pub readings_count: i64,
}

/// Response for GET /farms/{farm}/cattle/stats.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: Vec<AnimalStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn required_text(field: &str, value: Option<&str>, errors: &mut Vec<FieldError>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        Some(_) => {
            errors.push(FieldError::new(field, "must not be empty"));
            String::new()
        }
        None => {
            errors.push(FieldError::new(field, "is required"));
            String::new()
        }
    }
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_tie_is_at_risk() {
        let tally = HealthTally::new(2, 2);
        assert_eq!(tally.status(), HealthStatus::AtRisk);

        let tally = HealthTally::new(1, 1);
        assert_eq!(tally.status(), HealthStatus::AtRisk);
    }

    #[test]
    fn test_tally_majority() {
        assert_eq!(HealthTally::new(2, 1).status(), HealthStatus::Healthy);
        assert_eq!(HealthTally::new(1, 3).status(), HealthStatus::AtRisk);
        assert_eq!(HealthTally::new(0, 1).status(), HealthStatus::AtRisk);
    }

    #[test]
    fn test_empty_tally_is_at_risk() {
        assert_eq!(HealthTally::default().status(), HealthStatus::AtRisk);
    }

    #[test]
    fn test_tally_record_sequence() {
        let mut tally = HealthTally::default();
        for healthy in [true, true, false] {
            tally.record(healthy);
        }
        assert_eq!(tally, HealthTally::new(2, 1));
        assert_eq!(tally.status(), HealthStatus::Healthy);

        tally.record(false);
        assert_eq!(tally, HealthTally::new(2, 2));
        assert_eq!(tally.status(), HealthStatus::AtRisk);
        assert_eq!(tally.total(), 4);
    }

    #[test]
    fn test_health_status_round_trips_through_str() {
        for status in [HealthStatus::Healthy, HealthStatus::AtRisk] {
            assert_eq!(status.as_str().parse::<HealthStatus>(), Ok(status));
        }
        assert!("unknown".parse::<HealthStatus>().is_err());
        assert_eq!(
            serde_json::to_value(HealthStatus::AtRisk).unwrap(),
            serde_json::json!("at_risk")
        );
    }

    #[test]
    fn test_reading_request_reports_each_missing_field() {
        let request = ReadingRequest {
            body_temperature: Some(38.5),
            heart_rate: None,
            sleeping_duration: Some(f64::NAN),
            lying_down_duration: Some(5.0),
        };

        let errors = request.validate("").unwrap_err();
        assert_eq!(
            errors,
            vec![
                FieldError::new("heart_rate", "is required"),
                FieldError::new("sleeping_duration", "must be a finite number"),
            ]
        );
    }

    #[test]
    fn test_reading_request_accepts_zero_values() {
        let request = ReadingRequest {
            body_temperature: Some(0.0),
            heart_rate: Some(0.0),
            sleeping_duration: Some(0.0),
            lying_down_duration: Some(0.0),
        };
        assert!(request.validate("").is_ok());
    }

    #[test]
    fn test_create_animal_request_validation() {
        let request: CreateAnimalRequest = serde_json::from_value(serde_json::json!({
            "tag_id": "  ",
            "health_readings": [
                { "body_temperature": 38.5, "heart_rate": 70, "sleeping_duration": 7 }
            ]
        }))
        .unwrap();

        let errors = request.validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "tag_id",
                "location",
                "health_readings[0].lying_down_duration"
            ]
        );
    }

    #[test]
    fn test_create_animal_request_trims_fields() {
        let request: CreateAnimalRequest = serde_json::from_value(serde_json::json!({
            "tag_id": " T1 ",
            "location": "North pasture",
            "name": "   "
        }))
        .unwrap();

        let (animal, readings) = request.validate().unwrap();
        assert_eq!(animal.tag_id, "T1");
        assert_eq!(animal.location, "North pasture");
        assert_eq!(animal.name, None);
        assert!(readings.is_empty());
    }

    #[test]
    fn test_sort_order_defaults_to_desc() {
        let query: ReadingsQuery = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(query.order, SortOrder::Desc);
        assert_eq!(query.limit, None);
    }
}
