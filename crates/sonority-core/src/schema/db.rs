use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::access::{FeatureAccessor, IdentifierTranslator};
use crate::error::{Error, Result};
use crate::model::{ClassifierOutput, FeatureDocument, InternalId, Mbid, Recording};

use super::migrations::MIGRATIONS;

/// A database connection with CRUD methods for submissions, feature
/// documents and similarity data.
#[derive(Debug)]
pub struct Database {
    pub(super) conn: Connection,
}

impl Database {
    /// Open (or create) a database at the given path and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.apply_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.apply_migrations()?;
        Ok(db)
    }

    /// Get a reference to the underlying connection (for advanced queries).
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a transaction that commits only if `f` succeeds.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    fn apply_migrations(&self) -> Result<()> {
        // Create migrations table if it doesn't exist
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        // Get applied migrations
        let mut stmt = self
            .conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let applied: Vec<u32> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Apply pending migrations
        for migration in MIGRATIONS {
            if !applied.contains(&migration.version) {
                log::info!(
                    "Applying migration {} ({})",
                    migration.version,
                    migration.name
                );
                self.conn.execute_batch(migration.sql)?;
                self.conn.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    rusqlite::params![migration.version, migration.name],
                )?;
            }
        }

        Ok(())
    }
}

fn parse_mbid(idx: usize, text: &str) -> rusqlite::Result<Mbid> {
    Uuid::parse_str(text)
        .map(Mbid::from_uuid)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// Recording CRUD
impl Database {
    /// Register a new submission for `mbid`.
    ///
    /// The submission offset is one past the highest existing offset for
    /// the same MBID; the internal id is assigned by SQLite and never reused.
    pub fn insert_recording(&self, mbid: Mbid) -> Result<(InternalId, Recording)> {
        self.conn.execute(
            "INSERT INTO recordings (mbid, submission_offset, submitted_at)
             SELECT ?1, COALESCE(MAX(submission_offset) + 1, 0), ?2
             FROM recordings WHERE mbid = ?1",
            rusqlite::params![mbid.to_string(), chrono::Utc::now().to_rfc3339()],
        )?;
        let id = InternalId::new(self.conn.last_insert_rowid());
        let recording = self.to_public(id)?;
        Ok((id, recording))
    }

    /// Store the low-level document of a submission.
    pub fn insert_feature_document(&self, id: InternalId, lowlevel: &serde_json::Value) -> Result<()> {
        self.conn.execute(
            "INSERT INTO feature_documents (id, data) VALUES (?1, ?2)",
            rusqlite::params![id.get(), serde_json::to_string(lowlevel)?],
        )?;
        Ok(())
    }

    /// Store (or replace) one classifier output block of a submission.
    pub fn insert_classifier_output(
        &self,
        id: InternalId,
        model: &str,
        output: &ClassifierOutput,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO classifier_outputs (id, model, data) VALUES (?1, ?2, ?3)
             ON CONFLICT (id, model) DO UPDATE SET data = excluded.data",
            rusqlite::params![id.get(), model, serde_json::to_string(output)?],
        )?;
        Ok(())
    }

    /// Register a submission together with its low-level document.
    pub fn submit(&self, mbid: Mbid, lowlevel: &serde_json::Value) -> Result<(InternalId, Recording)> {
        self.in_transaction(|db| {
            let (id, recording) = db.insert_recording(mbid)?;
            db.insert_feature_document(id, lowlevel)?;
            Ok((id, recording))
        })
    }

    /// Number of registered submissions.
    pub fn count_recordings(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM recordings", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl IdentifierTranslator for Database {
    fn to_internal(&self, recording: &Recording) -> Result<InternalId> {
        self.conn
            .prepare_cached(
                "SELECT id FROM recordings WHERE mbid = ?1 AND submission_offset = ?2",
            )?
            .query_row(
                rusqlite::params![recording.mbid.to_string(), recording.offset],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(InternalId::new)
            .ok_or(Error::UnknownRecording(*recording))
    }

    fn to_public(&self, id: InternalId) -> Result<Recording> {
        self.conn
            .prepare_cached("SELECT mbid, submission_offset FROM recordings WHERE id = ?1")?
            .query_row([id.get()], |row| {
                let mbid: String = row.get(0)?;
                Ok(Recording::new(parse_mbid(0, &mbid)?, row.get(1)?))
            })
            .optional()?
            .ok_or(Error::MissingRow {
                entity: "recording",
                id,
            })
    }
}

impl FeatureAccessor for Database {
    fn get_feature_document(&self, id: InternalId) -> Result<FeatureDocument> {
        let data: String = self
            .conn
            .prepare_cached("SELECT data FROM feature_documents WHERE id = ?1")?
            .query_row([id.get()], |row| row.get(0))
            .optional()?
            .ok_or(Error::MissingRow {
                entity: "feature document",
                id,
            })?;
        let mut doc = FeatureDocument::new(id, serde_json::from_str(&data)?);

        let mut stmt = self
            .conn
            .prepare_cached("SELECT model, data FROM classifier_outputs WHERE id = ?1")?;
        let rows = stmt
            .query_map([id.get()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (model, data) in rows {
            doc.classifiers.insert(model, serde_json::from_str(&data)?);
        }

        Ok(doc)
    }

    fn get_feature_documents(&self, ids: &[InternalId]) -> Result<Vec<FeatureDocument>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let wanted = serde_json::to_string(&ids.iter().map(|id| id.get()).collect::<Vec<_>>())?;

        let mut stmt = self.conn.prepare_cached(
            "SELECT id, data FROM feature_documents
             WHERE id IN (SELECT value FROM json_each(?1))",
        )?;
        let rows = stmt
            .query_map([wanted.as_str()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut docs = HashMap::with_capacity(rows.len());
        for (id, data) in rows {
            docs.insert(id, FeatureDocument::new(InternalId::new(id), serde_json::from_str(&data)?));
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT id, model, data FROM classifier_outputs
             WHERE id IN (SELECT value FROM json_each(?1))",
        )?;
        let rows = stmt
            .query_map([wanted.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (id, model, data) in rows {
            if let Some(doc) = docs.get_mut(&id) {
                doc.classifiers.insert(model, serde_json::from_str(&data)?);
            }
        }

        Ok(ids.iter().filter_map(|id| docs.remove(&id.get())).collect())
    }

    fn count_feature_documents(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM feature_documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn sample_document_ids(&self, size: u64) -> Result<Vec<InternalId>> {
        let limit = i64::try_from(size).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM feature_documents ORDER BY RANDOM() LIMIT ?1")?;
        let ids = stmt
            .query_map([limit], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(InternalId::new))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn mbid(text: &str) -> Mbid {
        text.parse().unwrap()
    }

    #[test]
    fn test_database_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn test_reopen_does_not_reapply_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sonority.db");
        drop(Database::open(&path).unwrap());
        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn test_submission_offsets_are_per_mbid() {
        let db = Database::open_in_memory().unwrap();
        let a = mbid("0dad432b-16cc-4bf0-8961-fd31d124b01b");
        let b = mbid("13ed6782-8ae1-4fcf-b0c9-9da757412d5d");

        let (id_a0, rec_a0) = db.insert_recording(a).unwrap();
        let (_, rec_b0) = db.insert_recording(b).unwrap();
        let (id_a1, rec_a1) = db.insert_recording(a).unwrap();

        assert_eq!(rec_a0.offset, 0);
        assert_eq!(rec_b0.offset, 0);
        assert_eq!(rec_a1.offset, 1);
        assert!(id_a1 > id_a0);
    }

    #[test]
    fn test_identifier_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let (id, recording) = db
            .insert_recording(mbid("0dad432b-16cc-4bf0-8961-fd31d124b01b"))
            .unwrap();

        assert_eq!(db.to_internal(&recording).unwrap(), id);
        assert_eq!(db.to_public(id).unwrap(), recording);
    }

    #[test]
    fn test_to_internal_unknown_recording() {
        let db = Database::open_in_memory().unwrap();
        let recording = Recording::new(mbid("0dad432b-16cc-4bf0-8961-fd31d124b01b"), 3);
        let err = db.to_internal(&recording).unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, Error::UnknownRecording(r) if r == recording));
        assert!(matches!(
            db.to_public(InternalId::new(5)),
            Err(Error::MissingRow { entity: "recording", id }) if id == InternalId::new(5)
        ));
    }

    #[test]
    fn test_to_public_bulk_preserves_order_and_gaps() {
        let db = Database::open_in_memory().unwrap();
        let (first, rec_first) = db
            .insert_recording(mbid("0dad432b-16cc-4bf0-8961-fd31d124b01b"))
            .unwrap();
        let (second, rec_second) = db
            .insert_recording(mbid("13ed6782-8ae1-4fcf-b0c9-9da757412d5d"))
            .unwrap();

        let resolved = db
            .to_public_bulk(&[second, InternalId::new(999), first])
            .unwrap();
        assert_eq!(resolved, vec![Some(rec_second), None, Some(rec_first)]);
    }

    #[test]
    fn test_feature_document_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let lowlevel = json!({"rhythm": {"bpm": 128.0}});
        let (id, _) = db
            .submit(mbid("0dad432b-16cc-4bf0-8961-fd31d124b01b"), &lowlevel)
            .unwrap();
        db.insert_classifier_output(
            id,
            "mood_happy",
            &ClassifierOutput::new(BTreeMap::from([
                ("happy".to_string(), 0.7),
                ("not_happy".to_string(), 0.3),
            ])),
        )
        .unwrap();

        let doc = db.get_feature_document(id).unwrap();
        assert_eq!(doc.lowlevel, lowlevel);
        assert_eq!(
            doc.classifier("mood_happy").unwrap().probability_of("happy"),
            Some(0.7)
        );
    }

    #[test]
    fn test_bulk_feature_documents() {
        let db = Database::open_in_memory().unwrap();
        let (first, _) = db
            .submit(mbid("0dad432b-16cc-4bf0-8961-fd31d124b01b"), &json!({"n": 1}))
            .unwrap();
        let (second, _) = db
            .submit(mbid("13ed6782-8ae1-4fcf-b0c9-9da757412d5d"), &json!({"n": 2}))
            .unwrap();
        db.insert_classifier_output(
            second,
            "danceability",
            &ClassifierOutput::new(BTreeMap::from([("danceable".to_string(), 0.9)])),
        )
        .unwrap();

        let docs = db
            .get_feature_documents(&[second, InternalId::new(999), first])
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|doc| doc.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert_eq!(docs[0].lowlevel, json!({"n": 2}));
        assert!(docs[0].classifier("danceability").is_some());
        assert!(docs[1].classifiers.is_empty());
        assert!(db.get_feature_documents(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_feature_document() {
        let db = Database::open_in_memory().unwrap();
        let (id, _) = db
            .insert_recording(mbid("0dad432b-16cc-4bf0-8961-fd31d124b01b"))
            .unwrap();
        assert!(db.get_feature_document(id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_sample_document_ids_bounded() {
        let db = Database::open_in_memory().unwrap();
        for _ in 0..5 {
            db.submit(
                mbid("0dad432b-16cc-4bf0-8961-fd31d124b01b"),
                &json!({}),
            )
            .unwrap();
        }
        assert_eq!(db.count_feature_documents().unwrap(), 5);
        assert_eq!(db.sample_document_ids(3).unwrap().len(), 3);
        assert_eq!(db.sample_document_ids(50).unwrap().len(), 5);
    }
}
