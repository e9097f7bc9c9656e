//! On-disk index artifacts.
//!
//! An artifact is an 8-byte magic header followed by the bincode encoding
//! of the index config and its forest. It is written to a temporary file
//! and renamed into place, so readers see either the old artifact, the new
//! one, or none.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{SimilarityError, SimilarityResult};
use crate::index::config::IndexConfig;
use crate::index::forest::Forest;

const MAGIC: &[u8; 8] = b"SNRYANN1";

#[derive(Serialize)]
struct ArtifactRef<'a> {
    config: &'a IndexConfig,
    forest: &'a Forest,
}

#[derive(Deserialize)]
struct Artifact {
    config: IndexConfig,
    forest: Forest,
}

pub fn artifact_path(dir: &Path, config: &IndexConfig) -> PathBuf {
    dir.join(config.file_name())
}

/// Write the artifact for `config` into `dir`, replacing any previous one.
pub fn write(dir: &Path, config: &IndexConfig, forest: &Forest) -> SimilarityResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = artifact_path(dir, config);
    let tmp = dir.join(format!("{}.tmp", config.file_name()));

    let mut writer = BufWriter::new(File::create(&tmp)?);
    writer.write_all(MAGIC)?;
    bincode::serialize_into(&mut writer, &ArtifactRef { config, forest })?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, &path)?;
    log::info!("Saved index {} to {}", config, path.display());
    Ok(path)
}

/// Read the artifact for `config` from `dir`.
///
/// A missing file is [`SimilarityError::NotFound`]; a file that cannot be
/// decoded completely, or that belongs to a different config, is
/// [`SimilarityError::CorruptIndex`].
pub fn read(dir: &Path, config: &IndexConfig) -> SimilarityResult<(Forest, PathBuf)> {
    let path = artifact_path(dir, config);
    let corrupt = |reason: String| SimilarityError::CorruptIndex {
        path: path.display().to_string(),
        reason,
    };

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SimilarityError::NotFound {
                entity: "index artifact",
                id: config.key(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader
        .read_exact(&mut magic)
        .map_err(|e| corrupt(format!("missing header: {e}")))?;
    if &magic != MAGIC {
        return Err(corrupt("unrecognized header".to_string()));
    }

    let artifact: Artifact =
        bincode::deserialize_from(&mut reader).map_err(|e| corrupt(e.to_string()))?;
    let mut trailing = [0u8; 1];
    if reader.read(&mut trailing)? != 0 {
        return Err(corrupt("unexpected trailing data".to_string()));
    }

    if artifact.config != *config {
        return Err(corrupt(format!("artifact was built for {}", artifact.config)));
    }
    let forest = artifact.forest;
    if forest.distance() != config.distance() || forest.tree_count() != config.trees() as usize {
        return Err(corrupt("forest does not match its config".to_string()));
    }
    Ok((forest, path))
}

/// Keys of all artifacts present in `dir`, sorted.
pub fn list(dir: &Path) -> SimilarityResult<Vec<IndexConfig>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut configs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("ann") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match IndexConfig::from_key(stem) {
            Ok(config) => configs.push(config),
            Err(_) => log::debug!("Ignoring unrecognized file {}", path.display()),
        }
    }
    configs.sort_by_key(IndexConfig::key);
    Ok(configs)
}

/// Delete the artifact for `config`. Returns whether a file was removed.
pub fn remove(dir: &Path, config: &IndexConfig) -> SimilarityResult<bool> {
    match fs::remove_file(artifact_path(dir, config)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::distance::DistanceType;
    use rand::prelude::*;

    fn forest(trees: u32) -> Forest {
        let items = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let mut rng = StdRng::seed_from_u64(1);
        Forest::build(DistanceType::Angular, 2, items, vec![true; 3], trees, 2, &mut rng)
    }

    fn config() -> IndexConfig {
        IndexConfig::new("bpm", DistanceType::Angular, 2).unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), &config(), &forest(2)).unwrap();
        assert!(path.ends_with("bpm_angular_2.ann"));
        assert!(!dir.path().join("bpm_angular_2.ann.tmp").exists());

        let (loaded, _) = read(dir.path(), &config()).unwrap();
        assert_eq!(loaded.slots(), 3);
        assert_eq!(loaded.tree_count(), 2);
    }

    #[test]
    fn test_missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(dir.path(), &config()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_truncated_artifact_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), &config(), &forest(2)).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            read(dir.path(), &config()),
            Err(SimilarityError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_foreign_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bpm_angular_2.ann"), b"not an index").unwrap();
        assert!(matches!(
            read(dir.path(), &config()),
            Err(SimilarityError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_list_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &config(), &forest(2)).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let listed = list(dir.path()).unwrap();
        assert_eq!(listed, vec![config()]);
        assert!(remove(dir.path(), &config()).unwrap());
        assert!(!remove(dir.path(), &config()).unwrap());
        assert!(list(dir.path()).unwrap().is_empty());
    }
}
