use crate::error::Result;

use super::Database;

/// Listing state of one metric, and the registration of hybrids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricMeta {
    pub metric: String,
    pub is_hybrid: bool,
    pub category: String,
    pub description: String,
    pub visible: bool,
}

// Metric metadata CRUD
impl Database {
    /// Insert or replace the metadata row of a metric.
    pub fn upsert_metric_meta(&self, meta: &MetricMeta) -> Result<()> {
        self.conn.execute(
            "INSERT INTO similarity_metrics (metric, is_hybrid, category, description, visible)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (metric) DO UPDATE SET
                 is_hybrid = excluded.is_hybrid,
                 category = excluded.category,
                 description = excluded.description,
                 visible = excluded.visible",
            rusqlite::params![
                meta.metric,
                meta.is_hybrid,
                meta.category,
                meta.description,
                meta.visible,
            ],
        )?;
        Ok(())
    }

    /// Flip the visibility of a stored metric. Returns `false` when the
    /// metric has no row.
    pub fn set_metric_visibility(&self, metric: &str, visible: bool) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE similarity_metrics SET visible = ?2 WHERE metric = ?1",
            rusqlite::params![metric, visible],
        )?;
        Ok(changed > 0)
    }

    /// Every metadata row, in registration order.
    pub fn list_metric_meta(&self) -> Result<Vec<MetricMeta>> {
        let mut stmt = self.conn.prepare(
            "SELECT metric, is_hybrid, category, description, visible
             FROM similarity_metrics ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MetricMeta {
                    metric: row.get(0)?,
                    is_hybrid: row.get(1)?,
                    category: row.get(2)?,
                    description: row.get(3)?,
                    visible: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_metric_meta(&self, metric: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM similarity_metrics WHERE metric = ?1", [metric])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(metric: &str, is_hybrid: bool) -> MetricMeta {
        MetricMeta {
            metric: metric.to_string(),
            is_hybrid,
            category: "rhythm".to_string(),
            description: String::new(),
            visible: true,
        }
    }

    #[test]
    fn test_metric_meta_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_metric_meta(&meta("bpm_onsetrate", true)).unwrap();
        db.upsert_metric_meta(&meta("bpm", false)).unwrap();

        let rows = db.list_metric_meta().unwrap();
        assert_eq!(rows, vec![meta("bpm_onsetrate", true), meta("bpm", false)]);
    }

    #[test]
    fn test_visibility_toggle() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.set_metric_visibility("bpm", false).unwrap());

        db.upsert_metric_meta(&meta("bpm", false)).unwrap();
        assert!(db.set_metric_visibility("bpm", false).unwrap());
        assert!(!db.list_metric_meta().unwrap()[0].visible);

        // Registering again replaces the row.
        db.upsert_metric_meta(&meta("bpm", false)).unwrap();
        assert!(db.list_metric_meta().unwrap()[0].visible);
        assert_eq!(db.list_metric_meta().unwrap().len(), 1);

        assert!(db.delete_metric_meta("bpm").unwrap());
        assert!(db.list_metric_meta().unwrap().is_empty());
    }
}
