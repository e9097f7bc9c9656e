use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use crate::error::Result;

use super::Database;

/// Normalization statistics as persisted for one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredStats {
    pub metric: String,
    pub means: Vec<f64>,
    pub stddevs: Vec<f64>,
    pub sample_size: u64,
    pub computed_at: DateTime<Utc>,
}

// Normalization stats CRUD
impl Database {
    /// Insert stats for a metric unless some are already stored.
    ///
    /// Returns `true` if this call wrote the row; concurrent writers lose
    /// silently and keep the first result.
    pub fn insert_stats(&self, stats: &StoredStats) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO similarity_stats (metric, means, stddevs, sample_size, computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (metric) DO NOTHING",
            rusqlite::params![
                stats.metric,
                serde_json::to_string(&stats.means)?,
                serde_json::to_string(&stats.stddevs)?,
                i64::try_from(stats.sample_size).unwrap_or(i64::MAX),
                stats.computed_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Get the stats stored for `metric`, if any.
    pub fn get_stats(&self, metric: &str) -> Result<Option<StoredStats>> {
        let row = self
            .conn
            .query_row(
                "SELECT metric, means, stddevs, sample_size, computed_at
                 FROM similarity_stats WHERE metric = ?1",
                [metric],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        row.map(Self::row_to_stats).transpose()
    }

    /// All stored stats, ordered by metric name.
    pub fn list_stats(&self) -> Result<Vec<StoredStats>> {
        let mut stmt = self.conn.prepare(
            "SELECT metric, means, stddevs, sample_size, computed_at
             FROM similarity_stats ORDER BY metric",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::row_to_stats).collect()
    }

    /// Delete stats for one metric, or for every metric when `None`.
    pub fn delete_stats(&self, metric: Option<&str>) -> Result<usize> {
        let removed = match metric {
            Some(metric) => self
                .conn
                .execute("DELETE FROM similarity_stats WHERE metric = ?1", [metric])?,
            None => self.conn.execute("DELETE FROM similarity_stats", [])?,
        };
        Ok(removed)
    }

    fn row_to_stats(
        (metric, means, stddevs, sample_size, computed_at): (String, String, String, i64, String),
    ) -> Result<StoredStats> {
        let computed_at = DateTime::parse_from_rfc3339(&computed_at)
            .map_err(|e| crate::Error::InvalidData(format!("bad timestamp for {metric}: {e}")))?
            .into();
        Ok(StoredStats {
            means: serde_json::from_str(&means)?,
            stddevs: serde_json::from_str(&stddevs)?,
            sample_size: sample_size as u64,
            computed_at,
            metric,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(metric: &str, mean: f64) -> StoredStats {
        StoredStats {
            metric: metric.to_string(),
            means: vec![mean, 2.0],
            stddevs: vec![0.5, 1.5],
            sample_size: 100,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_stats_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_stats(&stats("mfccs", 1.0)).unwrap());

        let loaded = db.get_stats("mfccs").unwrap().unwrap();
        assert_eq!(loaded.means, vec![1.0, 2.0]);
        assert_eq!(loaded.stddevs, vec![0.5, 1.5]);
        assert_eq!(loaded.sample_size, 100);
        assert!(db.get_stats("gfccs").unwrap().is_none());
    }

    #[test]
    fn test_first_write_wins() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_stats(&stats("mfccs", 1.0)).unwrap());
        assert!(!db.insert_stats(&stats("mfccs", 9.0)).unwrap());

        let loaded = db.get_stats("mfccs").unwrap().unwrap();
        assert_eq!(loaded.means[0], 1.0);
    }

    #[test]
    fn test_delete_stats() {
        let db = Database::open_in_memory().unwrap();
        db.insert_stats(&stats("mfccs", 1.0)).unwrap();
        db.insert_stats(&stats("gfccs", 1.0)).unwrap();

        assert_eq!(db.delete_stats(Some("mfccs")).unwrap(), 1);
        assert_eq!(db.list_stats().unwrap().len(), 1);
        assert_eq!(db.delete_stats(None).unwrap(), 1);
        assert!(db.list_stats().unwrap().is_empty());
    }
}
