use rusqlite::types::Type;
use rusqlite::OptionalExtension;

use crate::error::Result;
use crate::model::InternalId;

use super::Database;

fn encode_vector(vector: &[f64]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(idx: usize, bytes: &[u8]) -> rusqlite::Result<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            format!("vector blob of {} bytes is not a multiple of 8", bytes.len()).into(),
        ));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}

// Similarity vector CRUD
impl Database {
    /// Insert or replace the vector for `(id, metric)`.
    pub fn upsert_vector(&self, id: InternalId, metric: &str, vector: &[f64]) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO similarity_vectors (id, metric, vector) VALUES (?1, ?2, ?3)
                 ON CONFLICT (id, metric) DO UPDATE SET vector = excluded.vector",
            )?
            .execute(rusqlite::params![id.get(), metric, encode_vector(vector)])?;
        Ok(())
    }

    /// Get the stored vector for `(id, metric)`, if any.
    pub fn get_vector(&self, id: InternalId, metric: &str) -> Result<Option<Vec<f64>>> {
        let vector = self
            .conn
            .prepare_cached("SELECT vector FROM similarity_vectors WHERE id = ?1 AND metric = ?2")?
            .query_row(rusqlite::params![id.get(), metric], |row| {
                decode_vector(0, &row.get::<_, Vec<u8>>(0)?)
            })
            .optional()?;
        Ok(vector)
    }

    /// Ids of documented submissions that have neither a vector nor a
    /// recorded failure for `metric`, lowest id first.
    pub fn ids_missing_vector(&self, metric: &str, limit: usize) -> Result<Vec<InternalId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT d.id FROM feature_documents d
             WHERE NOT EXISTS (
                 SELECT 1 FROM similarity_vectors v WHERE v.id = d.id AND v.metric = ?1
             )
             AND NOT EXISTS (
                 SELECT 1 FROM similarity_failures f WHERE f.id = d.id AND f.metric = ?1
             )
             ORDER BY d.id
             LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(
                rusqlite::params![metric, i64::try_from(limit).unwrap_or(i64::MAX)],
                |row| row.get::<_, i64>(0),
            )?
            .map(|r| r.map(InternalId::new))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Count documented submissions still lacking a vector or failure
    /// record for `metric`.
    pub fn count_missing_vectors(&self, metric: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM feature_documents d
             WHERE NOT EXISTS (
                 SELECT 1 FROM similarity_vectors v WHERE v.id = d.id AND v.metric = ?1
             )
             AND NOT EXISTS (
                 SELECT 1 FROM similarity_failures f WHERE f.id = d.id AND f.metric = ?1
             )",
            [metric],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Remember that `(id, metric)` could not be computed.
    pub fn record_vector_failure(&self, id: InternalId, metric: &str, reason: &str) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO similarity_failures (id, metric, reason, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (id, metric) DO UPDATE
                 SET reason = excluded.reason, recorded_at = excluded.recorded_at",
            )?
            .execute(rusqlite::params![
                id.get(),
                metric,
                reason,
                chrono::Utc::now().to_rfc3339()
            ])?;
        Ok(())
    }

    /// Recorded failures for `metric` as `(id, reason)` pairs.
    pub fn list_vector_failures(&self, metric: &str) -> Result<Vec<(InternalId, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, reason FROM similarity_failures WHERE metric = ?1 ORDER BY id",
        )?;
        let failures = stmt
            .query_map([metric], |row| {
                Ok((InternalId::new(row.get(0)?), row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(failures)
    }

    /// Number of stored vectors for `metric`.
    pub fn count_vectors(&self, metric: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM similarity_vectors WHERE metric = ?1",
            [metric],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Vectors for `metric` with id strictly greater than `after`, ordered by
    /// id, at most `limit` of them. Pass `None` to start from the beginning.
    pub fn vectors_after(
        &self,
        metric: &str,
        after: Option<InternalId>,
        limit: usize,
    ) -> Result<Vec<(InternalId, Vec<f64>)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, vector FROM similarity_vectors
             WHERE metric = ?1 AND id > ?2
             ORDER BY id
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![
                    metric,
                    after.map_or(-1, InternalId::get),
                    i64::try_from(limit).unwrap_or(i64::MAX)
                ],
                |row| {
                    let id = InternalId::new(row.get(0)?);
                    let vector = decode_vector(1, &row.get::<_, Vec<u8>>(1)?)?;
                    Ok((id, vector))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Delete every vector and failure record of `metric`. Returns the
    /// number of vectors removed.
    pub fn delete_metric_vectors(&self, metric: &str) -> Result<usize> {
        self.in_transaction(|db| {
            let removed = db
                .conn
                .execute("DELETE FROM similarity_vectors WHERE metric = ?1", [metric])?;
            db.conn
                .execute("DELETE FROM similarity_failures WHERE metric = ?1", [metric])?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Mbid;
    use serde_json::json;

    fn submit(db: &Database) -> InternalId {
        let mbid: Mbid = "0dad432b-16cc-4bf0-8961-fd31d124b01b".parse().unwrap();
        db.submit(mbid, &json!({})).unwrap().0
    }

    #[test]
    fn test_vector_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = submit(&db);
        let vector = vec![0.1, -2.5, 1e-300, f64::MAX];

        db.upsert_vector(id, "mfccs", &vector).unwrap();
        assert_eq!(db.get_vector(id, "mfccs").unwrap(), Some(vector));
        assert_eq!(db.get_vector(id, "gfccs").unwrap(), None);
    }

    #[test]
    fn test_upsert_replaces_without_duplicating() {
        let db = Database::open_in_memory().unwrap();
        let id = submit(&db);

        db.upsert_vector(id, "bpm", &[1.0, 0.0]).unwrap();
        db.upsert_vector(id, "bpm", &[0.0, 1.0]).unwrap();

        assert_eq!(db.count_vectors("bpm").unwrap(), 1);
        assert_eq!(db.get_vector(id, "bpm").unwrap(), Some(vec![0.0, 1.0]));
    }

    #[test]
    fn test_missing_vectors_skip_stored_and_failed() {
        let db = Database::open_in_memory().unwrap();
        let first = submit(&db);
        let second = submit(&db);
        let third = submit(&db);

        db.upsert_vector(first, "key", &[1.0, 0.0]).unwrap();
        db.record_vector_failure(second, "key", "missing tonal").unwrap();

        assert_eq!(db.ids_missing_vector("key", 10).unwrap(), vec![third]);
        assert_eq!(db.count_missing_vectors("key").unwrap(), 1);
        assert_eq!(db.ids_missing_vector("bpm", 2).unwrap(), vec![first, second]);
    }

    #[test]
    fn test_vectors_after_pages_in_id_order() {
        let db = Database::open_in_memory().unwrap();
        let ids: Vec<_> = (0..4).map(|_| submit(&db)).collect();
        for (i, id) in ids.iter().enumerate() {
            db.upsert_vector(*id, "bpm", &[i as f64, 0.0]).unwrap();
        }

        let page = db.vectors_after("bpm", None, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].0, ids[0]);

        let rest = db.vectors_after("bpm", Some(page[1].0), 10).unwrap();
        assert_eq!(rest.iter().map(|(id, _)| *id).collect::<Vec<_>>(), ids[2..]);
    }

    #[test]
    fn test_delete_metric_vectors() {
        let db = Database::open_in_memory().unwrap();
        let id = submit(&db);
        db.upsert_vector(id, "bpm", &[1.0, 0.0]).unwrap();
        db.upsert_vector(id, "key", &[1.0, 0.0]).unwrap();
        db.record_vector_failure(id, "bpm", "boom").unwrap();

        assert_eq!(db.delete_metric_vectors("bpm").unwrap(), 1);
        assert_eq!(db.count_vectors("bpm").unwrap(), 0);
        assert!(db.list_vector_failures("bpm").unwrap().is_empty());
        assert_eq!(db.count_vectors("key").unwrap(), 1);
    }
}
