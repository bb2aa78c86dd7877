//! SQLite record store for Herdwatch.
//!
//! Three tables: `farms`, `animals`, and `readings`. Timestamps are stored
//! as Unix milliseconds. The `(farm_id, tag_id)` pair is unique, so the same
//! tag can be used by different farms.
//!
//! Appending a reading and updating the owning animal's counters happen in a
//! single transaction; the counter update is a compare-and-swap on the
//! animal's `version` column.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::error::StoreError;
use crate::model::{
    Animal, AnimalStats, Farm, FarmAggregate, HealthStatus, HealthTally, NewAnimal, NewReading,
    Reading, SortOrder, UpdateAnimalRequest, Vitals,
};

const ANIMAL_COLUMNS: &str = "id, farm_id, tag_id, location, name, status, healthy_count, \
     at_risk_count, last_check, created_at, version";

const READING_COLUMNS: &str = "id, animal_id, tag_id, body_temperature, heart_rate, \
     sleeping_duration, lying_down_duration, recorded_at, is_healthy, probability";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:herdwatch.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS farms (
                farm_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                healthy_count INTEGER NOT NULL DEFAULT 0,
                at_risk_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS animals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                farm_id TEXT NOT NULL REFERENCES farms(farm_id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL,
                location TEXT NOT NULL,
                name TEXT,
                status TEXT NOT NULL,
                healthy_count INTEGER NOT NULL DEFAULT 0 CHECK (healthy_count >= 0),
                at_risk_count INTEGER NOT NULL DEFAULT 0 CHECK (at_risk_count >= 0),
                last_check INTEGER,
                created_at INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                UNIQUE (farm_id, tag_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                animal_id INTEGER NOT NULL REFERENCES animals(id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL,
                body_temperature REAL NOT NULL,
                heart_rate REAL NOT NULL,
                sleeping_duration REAL NOT NULL,
                lying_down_duration REAL NOT NULL,
                recorded_at INTEGER NOT NULL,
                is_healthy INTEGER NOT NULL,
                probability REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Status counts are always scoped to one farm
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_animals_farm_status
            ON animals(farm_id, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_readings_animal_recorded
            ON readings(animal_id, recorded_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Farms
    // ------------------------------------------------------------------

    /// Register a farm with zeroed aggregate counts.
    pub async fn create_farm(
        &self,
        farm_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Farm, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO farms (farm_id, name, healthy_count, at_risk_count, created_at)
            VALUES (?, ?, 0, 0, ?)
            "#,
        )
        .bind(farm_id)
        .bind(name)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if StoreError::is_unique_violation(&e) => {
                return Err(StoreError::DuplicateFarm(farm_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        self.get_farm(farm_id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("farm '{farm_id}' vanished after insert")))
    }

    pub async fn get_farm(&self, farm_id: &str) -> Result<Option<Farm>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT farm_id, name, healthy_count, at_risk_count, created_at
            FROM farms
            WHERE farm_id = ?
            "#,
        )
        .bind(farm_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Farm {
                farm_id: row.try_get("farm_id")?,
                name: row.try_get("name")?,
                healthy_cattle_count: row.try_get("healthy_count")?,
                risky_cattle_count: row.try_get("at_risk_count")?,
                created_at: from_millis(row.try_get("created_at")?)?,
            })
        })
        .transpose()
    }

    /// Overwrite the derived counts of a farm.
    ///
    /// # Returns
    ///
    /// `false` if no farm with that id exists.
    pub async fn update_farm_aggregate(
        &self,
        farm_id: &str,
        aggregate: FarmAggregate,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE farms SET healthy_count = ?, at_risk_count = ?
            WHERE farm_id = ?
            "#,
        )
        .bind(aggregate.healthy_cattle_count)
        .bind(aggregate.risky_cattle_count)
        .bind(farm_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count the animals of a farm that currently have the given status.
    pub async fn count_animals_by_status(
        &self,
        farm_id: &str,
        status: HealthStatus,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as total
            FROM animals
            WHERE farm_id = ? AND status = ?
            "#,
        )
        .bind(farm_id)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("total")?)
    }

    // ------------------------------------------------------------------
    // Animals
    // ------------------------------------------------------------------

    /// Insert a cattle record together with its seeded readings.
    ///
    /// The record and its readings are written in one transaction.
    pub async fn create_animal(
        &self,
        farm_id: &str,
        animal: &NewAnimal,
        tally: HealthTally,
        readings: &[NewReading],
        now: DateTime<Utc>,
    ) -> Result<Animal, StoreError> {
        let last_check = readings.last().map(|r| r.recorded_at.timestamp_millis());

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO animals
                (farm_id, tag_id, location, name, status, healthy_count, at_risk_count,
                 last_check, created_at, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(farm_id)
        .bind(&animal.tag_id)
        .bind(&animal.location)
        .bind(&animal.name)
        .bind(tally.status().as_str())
        .bind(tally.healthy_count)
        .bind(tally.at_risk_count)
        .bind(last_check)
        .bind(now.timestamp_millis())
        .execute(&mut *tx)
        .await;

        let animal_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) if StoreError::is_unique_violation(&e) => {
                return Err(StoreError::DuplicateTag {
                    farm_id: farm_id.to_string(),
                    tag_id: animal.tag_id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        for reading in readings {
            insert_reading(&mut tx, animal_id, &animal.tag_id, reading).await?;
        }

        tx.commit().await?;

        self.find_animal(farm_id, animal_id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("animal {animal_id} vanished after insert")))
    }

    /// Look up a cattle record by id, scoped to its farm.
    pub async fn find_animal(
        &self,
        farm_id: &str,
        animal_id: i64,
    ) -> Result<Option<Animal>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ANIMAL_COLUMNS} FROM animals WHERE id = ? AND farm_id = ?"
        ))
        .bind(animal_id)
        .bind(farm_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(animal_from_row).transpose()
    }

    /// Look up a cattle record by tag, scoped to its farm.
    pub async fn find_animal_by_tag(
        &self,
        farm_id: &str,
        tag_id: &str,
    ) -> Result<Option<Animal>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ANIMAL_COLUMNS} FROM animals WHERE tag_id = ? AND farm_id = ?"
        ))
        .bind(tag_id)
        .bind(farm_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(animal_from_row).transpose()
    }

    pub async fn list_animals(&self, farm_id: &str) -> Result<Vec<Animal>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ANIMAL_COLUMNS} FROM animals WHERE farm_id = ? ORDER BY id"
        ))
        .bind(farm_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(animal_from_row).collect()
    }

    /// Edit the descriptive fields of a cattle record.
    ///
    /// Fields left as `None` keep their current value.
    pub async fn update_animal_details(
        &self,
        farm_id: &str,
        animal_id: i64,
        update: &UpdateAnimalRequest,
    ) -> Result<Option<Animal>, StoreError> {
        let location = update.location.as_deref().map(str::trim);
        let name = update.name.as_deref().map(str::trim);

        let result = sqlx::query(
            r#"
            UPDATE animals
            SET location = COALESCE(?, location), name = COALESCE(?, name)
            WHERE id = ? AND farm_id = ?
            "#,
        )
        .bind(location)
        .bind(name)
        .bind(animal_id)
        .bind(farm_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_animal(farm_id, animal_id).await
    }

    /// Overwrite an animal's counters and status.
    ///
    /// # Returns
    ///
    /// `false` if the animal does not exist.
    pub async fn update_animal_counters(
        &self,
        animal_id: i64,
        tally: HealthTally,
        status: HealthStatus,
        last_check: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE animals
            SET status = ?, healthy_count = ?, at_risk_count = ?, last_check = ?,
                version = version + 1
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(tally.healthy_count)
        .bind(tally.at_risk_count)
        .bind(last_check.timestamp_millis())
        .bind(animal_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Append a reading and store the new counters as one unit.
    ///
    /// The counter update only applies if the animal's version still equals
    /// `animal.version`. Otherwise the transaction is rolled back, taking the
    /// reading with it, and `None` is returned.
    pub async fn commit_reading(
        &self,
        animal: &Animal,
        tally: HealthTally,
        reading: &NewReading,
    ) -> Result<Option<Reading>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let reading_id = insert_reading(&mut tx, animal.id, &animal.tag_id, reading).await?;

        let result = sqlx::query(
            r#"
            UPDATE animals
            SET status = ?, healthy_count = ?, at_risk_count = ?, last_check = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(tally.status().as_str())
        .bind(tally.healthy_count)
        .bind(tally.at_risk_count)
        .bind(reading.recorded_at.timestamp_millis())
        .bind(animal.id)
        .bind(animal.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;

        Ok(Some(Reading {
            id: reading_id,
            animal_id: animal.id,
            tag_id: animal.tag_id.clone(),
            vitals: reading.vitals,
            recorded_at: truncate_to_millis(reading.recorded_at)?,
            is_healthy: reading.is_healthy,
            probability: reading.probability,
        }))
    }

    /// Delete a cattle record and its readings.
    ///
    /// # Returns
    ///
    /// `false` if no such animal exists in the farm.
    pub async fn delete_animal(&self, farm_id: &str, animal_id: i64) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM readings
            WHERE animal_id IN (SELECT id FROM animals WHERE id = ? AND farm_id = ?)
            "#,
        )
        .bind(animal_id)
        .bind(farm_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM animals WHERE id = ? AND farm_id = ?")
            .bind(animal_id)
            .bind(farm_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Readings
    // ------------------------------------------------------------------

    /// List the readings of an animal by recorded time.
    ///
    /// Readings recorded at the same instant keep their insertion order.
    pub async fn list_readings(
        &self,
        animal_id: i64,
        order: SortOrder,
        limit: Option<i64>,
    ) -> Result<Vec<Reading>, StoreError> {
        let dir = order.as_sql();
        let rows = sqlx::query(&format!(
            "SELECT {READING_COLUMNS} FROM readings WHERE animal_id = ? \
             ORDER BY recorded_at {dir}, id {dir} LIMIT ?"
        ))
        .bind(animal_id)
        // SQLite treats a negative LIMIT as unbounded
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(reading_from_row).collect()
    }

    /// Average vitals and reading counts for every animal in a farm.
    pub async fn animal_stats(&self, farm_id: &str) -> Result<Vec<AnimalStats>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT a.id as id, a.tag_id as tag_id, a.location as location,
                   AVG(r.body_temperature) as avg_temp,
                   AVG(r.heart_rate) as avg_heart,
                   COUNT(r.id) as readings_count
            FROM animals a
            LEFT JOIN readings r ON r.animal_id = a.id
            WHERE a.farm_id = ?
            GROUP BY a.id
            ORDER BY a.id
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AnimalStats {
                    id: row.try_get("id")?,
                    tag_id: row.try_get("tag_id")?,
                    location: row.try_get("location")?,
                    avg_temp: row.try_get("avg_temp")?,
                    avg_heart: row.try_get("avg_heart")?,
                    readings_count: row.try_get("readings_count")?,
                })
            })
            .collect()
    }
}

async fn insert_reading(
    conn: &mut SqliteConnection,
    animal_id: i64,
    tag_id: &str,
    reading: &NewReading,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO readings
            (animal_id, tag_id, body_temperature, heart_rate, sleeping_duration,
             lying_down_duration, recorded_at, is_healthy, probability)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(animal_id)
    .bind(tag_id)
    .bind(reading.vitals.body_temperature)
    .bind(reading.vitals.heart_rate)
    .bind(reading.vitals.sleeping_duration)
    .bind(reading.vitals.lying_down_duration)
    .bind(reading.recorded_at.timestamp_millis())
    .bind(reading.is_healthy)
    .bind(reading.probability)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

fn animal_from_row(row: &SqliteRow) -> Result<Animal, StoreError> {
    let status: String = row.try_get("status")?;
    let last_check: Option<i64> = row.try_get("last_check")?;

    Ok(Animal {
        id: row.try_get("id")?,
        tag_id: row.try_get("tag_id")?,
        farm_id: row.try_get("farm_id")?,
        location: row.try_get("location")?,
        name: row.try_get("name")?,
        health_status: status.parse().map_err(StoreError::Corrupt)?,
        healthy_readings_count: row.try_get("healthy_count")?,
        risk_readings_count: row.try_get("at_risk_count")?,
        last_health_check: last_check.map(from_millis).transpose()?,
        created_at: from_millis(row.try_get("created_at")?)?,
        version: row.try_get("version")?,
    })
}

fn reading_from_row(row: &SqliteRow) -> Result<Reading, StoreError> {
    Ok(Reading {
        id: row.try_get("id")?,
        animal_id: row.try_get("animal_id")?,
        tag_id: row.try_get("tag_id")?,
        vitals: Vitals {
            body_temperature: row.try_get("body_temperature")?,
            heart_rate: row.try_get("heart_rate")?,
            sleeping_duration: row.try_get("sleeping_duration")?,
            lying_down_duration: row.try_get("lying_down_duration")?,
        },
        recorded_at: from_millis(row.try_get("recorded_at")?)?,
        is_healthy: row.try_get("is_healthy")?,
        probability: row.try_get("probability")?,
    })
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms} out of range")))
}

/// Drop sub-millisecond precision so returned values match what is stored.
fn truncate_to_millis(ts: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
    from_millis(ts.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_farm(storage: &Storage, farm_id: &str) {
        storage
            .create_farm(farm_id, "Test Farm", Utc::now())
            .await
            .unwrap();
    }

    fn new_animal(tag: &str) -> NewAnimal {
        NewAnimal {
            tag_id: tag.to_string(),
            location: "Barn 1".to_string(),
            name: None,
        }
    }

    fn new_reading(healthy: bool) -> NewReading {
        NewReading {
            vitals: Vitals {
                body_temperature: 38.6,
                heart_rate: 72.0,
                sleeping_duration: 8.0,
                lying_down_duration: 6.0,
            },
            recorded_at: Utc::now(),
            is_healthy: healthy,
            probability: Some(0.9),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_animal() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        setup_farm(&storage, "F1").await;

        let created = storage
            .create_animal(
                "F1",
                &new_animal("T1"),
                HealthTally::default(),
                &[],
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(created.tag_id, "T1");
        assert_eq!(created.health_status, HealthStatus::AtRisk);
        assert_eq!(created.version, 0);
        assert!(created.last_health_check.is_none());

        let found = storage.find_animal("F1", created.id).await.unwrap();
        assert_eq!(found, Some(created.clone()));

        let by_tag = storage.find_animal_by_tag("F1", "T1").await.unwrap();
        assert_eq!(by_tag.map(|a| a.id), Some(created.id));

        // Scoped by farm
        setup_farm(&storage, "F2").await;
        assert!(storage.find_animal("F2", created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tag_unique_per_farm_only() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        setup_farm(&storage, "F1").await;
        setup_farm(&storage, "F2").await;

        let now = Utc::now();
        storage
            .create_animal("F1", &new_animal("T1"), HealthTally::default(), &[], now)
            .await
            .unwrap();

        let duplicate = storage
            .create_animal("F1", &new_animal("T1"), HealthTally::default(), &[], now)
            .await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateTag { .. })));

        let other_farm = storage
            .create_animal("F2", &new_animal("T1"), HealthTally::default(), &[], now)
            .await;
        assert!(other_farm.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_farm() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        setup_farm(&storage, "F1").await;

        let again = storage.create_farm("F1", "Again", Utc::now()).await;
        assert!(matches!(again, Err(StoreError::DuplicateFarm(_))));
    }

    #[tokio::test]
    async fn test_commit_reading_rejects_stale_version() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        setup_farm(&storage, "F1").await;

        let animal = storage
            .create_animal(
                "F1",
                &new_animal("T1"),
                HealthTally::default(),
                &[],
                Utc::now(),
            )
            .await
            .unwrap();

        let mut tally = animal.tally();
        tally.record(true);
        let committed = storage
            .commit_reading(&animal, tally, &new_reading(true))
            .await
            .unwrap();
        assert!(committed.is_some());

        // `animal` still carries the old version
        let stale = storage
            .commit_reading(&animal, tally, &new_reading(false))
            .await
            .unwrap();
        assert!(stale.is_none());

        // The rejected reading was rolled back with the counters
        let readings = storage
            .list_readings(animal.id, SortOrder::Asc, None)
            .await
            .unwrap();
        assert_eq!(readings.len(), 1);
        assert!(readings[0].is_healthy);

        let current = storage.find_animal("F1", animal.id).await.unwrap().unwrap();
        assert_eq!(current.tally(), HealthTally::new(1, 0));
        assert_eq!(current.version, 1);
    }

    #[tokio::test]
    async fn test_list_readings_order_and_limit() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        setup_farm(&storage, "F1").await;

        let start = Utc::now();
        let readings: Vec<NewReading> = (0..4)
            .map(|i| NewReading {
                recorded_at: start + chrono::Duration::minutes(i),
                ..new_reading(i % 2 == 0)
            })
            .collect();

        let animal = storage
            .create_animal(
                "F1",
                &new_animal("T1"),
                HealthTally::new(2, 2),
                &readings,
                start,
            )
            .await
            .unwrap();

        let desc = storage
            .list_readings(animal.id, SortOrder::Desc, Some(2))
            .await
            .unwrap();
        assert_eq!(desc.len(), 2);
        assert!(desc[0].recorded_at > desc[1].recorded_at);

        let asc = storage
            .list_readings(animal.id, SortOrder::Asc, None)
            .await
            .unwrap();
        assert_eq!(asc.len(), 4);
        assert!(asc[0].recorded_at < asc[3].recorded_at);
        assert!(asc.iter().all(|r| r.tag_id == "T1"));
    }

    #[tokio::test]
    async fn test_delete_animal_cascades_to_readings() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        setup_farm(&storage, "F1").await;

        let animal = storage
            .create_animal(
                "F1",
                &new_animal("T1"),
                HealthTally::new(1, 0),
                &[new_reading(true)],
                Utc::now(),
            )
            .await
            .unwrap();

        assert!(!storage.delete_animal("F2", animal.id).await.unwrap());
        assert!(storage.delete_animal("F1", animal.id).await.unwrap());

        let readings = storage
            .list_readings(animal.id, SortOrder::Asc, None)
            .await
            .unwrap();
        assert!(readings.is_empty());
    }

    #[tokio::test]
    async fn test_count_by_status_and_aggregate() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        setup_farm(&storage, "F1").await;

        let now = Utc::now();
        for (tag, tally) in [
            ("A", HealthTally::new(3, 0)),
            ("B", HealthTally::new(0, 2)),
            ("C", HealthTally::new(1, 1)),
        ] {
            storage
                .create_animal("F1", &new_animal(tag), tally, &[], now)
                .await
                .unwrap();
        }

        let healthy = storage
            .count_animals_by_status("F1", HealthStatus::Healthy)
            .await
            .unwrap();
        let at_risk = storage
            .count_animals_by_status("F1", HealthStatus::AtRisk)
            .await
            .unwrap();
        assert_eq!((healthy, at_risk), (1, 2));

        let aggregate = FarmAggregate {
            healthy_cattle_count: healthy,
            risky_cattle_count: at_risk,
        };
        assert!(storage.update_farm_aggregate("F1", aggregate).await.unwrap());
        assert!(!storage.update_farm_aggregate("nope", aggregate).await.unwrap());

        let farm = storage.get_farm("F1").await.unwrap().unwrap();
        assert_eq!(farm.healthy_cattle_count, 1);
        assert_eq!(farm.risky_cattle_count, 2);
    }

    #[tokio::test]
    async fn test_update_animal_details_keeps_unset_fields() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        setup_farm(&storage, "F1").await;

        let animal = storage
            .create_animal(
                "F1",
                &new_animal("T1"),
                HealthTally::default(),
                &[],
                Utc::now(),
            )
            .await
            .unwrap();

        let updated = storage
            .update_animal_details(
                "F1",
                animal.id,
                &UpdateAnimalRequest {
                    location: None,
                    name: Some("Daisy".to_string()),
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.location, "Barn 1");
        assert_eq!(updated.name.as_deref(), Some("Daisy"));
    }

    #[tokio::test]
    async fn test_animal_stats() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        setup_farm(&storage, "F1").await;

        let now = Utc::now();
        let mut hot = new_reading(false);
        hot.vitals.body_temperature = 40.6;

        storage
            .create_animal(
                "F1",
                &new_animal("A"),
                HealthTally::new(1, 1),
                &[new_reading(true), hot],
                now,
            )
            .await
            .unwrap();
        storage
            .create_animal("F1", &new_animal("B"), HealthTally::default(), &[], now)
            .await
            .unwrap();

        let stats = storage.animal_stats("F1").await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].readings_count, 2);
        assert!((stats[0].avg_temp.unwrap() - 39.6).abs() < 1e-9);
        assert_eq!(stats[0].avg_heart, Some(72.0));
        assert_eq!(stats[1].readings_count, 0);
        assert_eq!(stats[1].avg_temp, None);
    }
}
