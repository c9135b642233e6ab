//! On-disk artifacts: a CBOR vector file and a JSON metadata array.
//!
//! Both are replaced with write-to-temp then rename, vectors first.

use crate::flat::FlatIpIndex;
use crate::IndexError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const VECTOR_FILE_VERSION_V1: &str = "querygate_vectors_v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    pub fn new(vectors: impl Into<PathBuf>, metadata: impl Into<PathBuf>) -> Self {
        Self {
            vectors: vectors.into(),
            metadata: metadata.into(),
        }
    }

    /// `vectors.cbor` and `meta.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join("vectors.cbor"), dir.join("meta.json"))
    }
}

impl Default for IndexPaths {
    fn default() -> Self {
        Self::in_dir("index")
    }
}

/// One metadata entry, aligned by position with the vector file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub source: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorFileV1 {
    version: String,
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

pub(crate) enum StoredPair {
    Neither,
    /// Exactly one artifact exists.
    Partial(PathBuf),
    Both(FlatIpIndex, Vec<RecordMeta>),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> IndexError + '_ {
    move |source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }
    Ok(())
}

fn write_vectors(path: &Path, index: &FlatIpIndex) -> Result<(), IndexError> {
    ensure_parent(path)?;
    let file = VectorFileV1 {
        version: VECTOR_FILE_VERSION_V1.to_string(),
        dim: index.dim(),
        vectors: index.vectors().to_vec(),
    };
    let tmp = tmp_path(path);
    let mut f = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    ciborium::ser::into_writer(&file, &mut f).map_err(|e| IndexError::Encode(e.to_string()))?;
    fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(())
}

fn read_vectors(path: &Path) -> Result<FlatIpIndex, IndexError> {
    let f = fs::File::open(path).map_err(io_err(path))?;
    let file: VectorFileV1 = ciborium::de::from_reader(f).map_err(|e| IndexError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    if file.version != VECTOR_FILE_VERSION_V1 {
        return Err(IndexError::UnsupportedVersion(file.version));
    }
    Ok(FlatIpIndex::from_parts(file.dim, file.vectors))
}

fn write_metadata(path: &Path, records: &[RecordMeta]) -> Result<(), IndexError> {
    ensure_parent(path)?;
    let tmp = tmp_path(path);
    let bytes = serde_json::to_vec_pretty(records).map_err(|e| IndexError::Encode(e.to_string()))?;
    fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(())
}

fn read_metadata(path: &Path) -> Result<Vec<RecordMeta>, IndexError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&bytes).map_err(|e| IndexError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub(crate) fn load_pair(paths: &IndexPaths) -> Result<StoredPair, IndexError> {
    match (paths.vectors.exists(), paths.metadata.exists()) {
        (false, false) => Ok(StoredPair::Neither),
        (true, false) => Ok(StoredPair::Partial(paths.vectors.clone())),
        (false, true) => Ok(StoredPair::Partial(paths.metadata.clone())),
        (true, true) => {
            let index = read_vectors(&paths.vectors)?;
            let records = read_metadata(&paths.metadata)?;
            if index.len() != records.len() {
                return Err(IndexError::Inconsistent {
                    vectors: index.len(),
                    records: records.len(),
                });
            }
            Ok(StoredPair::Both(index, records))
        }
    }
}

pub(crate) fn save_pair(
    paths: &IndexPaths,
    index: &FlatIpIndex,
    records: &[RecordMeta],
) -> Result<(), IndexError> {
    if index.len() != records.len() {
        return Err(IndexError::Inconsistent {
            vectors: index.len(),
            records: records.len(),
        });
    }
    write_vectors(&paths.vectors, index)?;
    write_metadata(&paths.metadata, records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::in_dir(dir.path().join("nested"));
        let mut index = FlatIpIndex::new(2);
        index.push(vec![1.0, 0.0]);
        let records = vec![RecordMeta {
            source: "schema://public.orders".into(),
            content: "orders card".into(),
        }];
        save_pair(&paths, &index, &records).unwrap();

        match load_pair(&paths).unwrap() {
            StoredPair::Both(loaded, loaded_records) => {
                assert_eq!(loaded, index);
                assert_eq!(loaded_records, records);
            }
            _ => panic!("expected both artifacts"),
        }
        assert!(!tmp_path(&paths.vectors).exists());
    }

    #[test]
    fn test_mismatched_lengths_are_inconsistent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        let mut index = FlatIpIndex::new(1);
        index.push(vec![1.0]);
        write_vectors(&paths.vectors, &index).unwrap();
        write_metadata(&paths.metadata, &[]).unwrap();
        assert!(matches!(
            load_pair(&paths),
            Err(IndexError::Inconsistent {
                vectors: 1,
                records: 0
            })
        ));
    }

    #[test]
    fn test_metadata_is_plain_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        write_metadata(
            &path,
            &[RecordMeta {
                source: "metric://revenue".into(),
                content: "METRIC CARD".into(),
            }],
        )
        .unwrap();
        let v: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v[0]["source"], "metric://revenue");
        assert_eq!(v[0]["content"], "METRIC CARD");
    }
}
