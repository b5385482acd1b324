//! Artifact store: naming and persistence of uploads and detection results
//!
//! Layout under the storage root:
//!
//! ```text
//! uploads/                      original uploads
//! results/image/result_*.jpg    rendered detections
//! results/json/result_*.json    metadata documents
//! ```
//!
//! Every file is written to a temporary file in its target directory and then
//! linked into place without clobbering, so readers never observe a partial
//! artifact and an existing artifact is never replaced.

use crate::config::StorageConfig;
use crate::error::{ArgusError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Process-wide tie-break for artifacts allocated within the same microsecond.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

const MAX_BASE_NAME_LEN: usize = 100;
const MAX_EXTENSION_LEN: usize = 16;

/// Paths and public URLs reserved for one detection request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub name: String,
    pub upload_path: PathBuf,
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
    pub upload_url: String,
    pub image_url: String,
    pub metadata_url: String,
}

/// Public locations of a successfully persisted artifact set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedArtifacts {
    pub upload_url: String,
    pub result_image: String,
    pub result_json: String,
}

pub struct ArtifactStore {
    config: StorageConfig,
}

impl ArtifactStore {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    /// Create the store and its directory layout.
    pub fn open(config: StorageConfig) -> Result<Self> {
        let store = Self::new(config);
        store.ensure_layout()?;
        Ok(store)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.config.uploads_dir(),
            self.config.result_images_dir(),
            self.config.result_json_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                ArgusError::Persistence(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// Reserve names for an upload of `original_name`, stamped now.
    pub fn allocate(&self, original_name: &str) -> ArtifactSet {
        self.allocate_at(original_name, Utc::now())
    }

    /// Reserve names for an upload of `original_name` stamped at `at`.
    ///
    /// Two calls never return the same name, even for identical inputs.
    pub fn allocate_at(&self, original_name: &str, at: DateTime<Utc>) -> ArtifactSet {
        let safe = secure_filename(original_name);
        let (base, ext) = split_extension(&safe);
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}_{:06}_{}", at.format("%Y%m%d_%H%M%S_%6f"), seq, base);

        let upload_file = match ext {
            Some(ext) => format!("{}.{}", name, ext),
            None => name.clone(),
        };
        let image_file = format!("result_{}.jpg", name);
        let metadata_file = format!("result_{}.json", name);
        let prefix = &self.config.public_prefix;

        ArtifactSet {
            upload_path: self.config.uploads_dir().join(&upload_file),
            image_path: self.config.result_images_dir().join(&image_file),
            metadata_path: self.config.result_json_dir().join(&metadata_file),
            upload_url: format!("{}/uploads/{}", prefix, upload_file),
            image_url: format!("{}/results/image/{}", prefix, image_file),
            metadata_url: format!("{}/results/json/{}", prefix, metadata_file),
            name,
        }
    }

    /// Write the original upload, the rendered image and the metadata document.
    ///
    /// Either all three artifacts exist afterwards or none written by this call do.
    pub fn persist<M: Serialize>(
        &self,
        set: &ArtifactSet,
        original: &[u8],
        rendered: &[u8],
        metadata: &M,
    ) -> Result<PersistedArtifacts> {
        let document = serde_json::to_vec_pretty(metadata)
            .map_err(|e| ArgusError::Persistence(format!("cannot encode metadata: {}", e)))?;

        let mut placed: Vec<&Path> = Vec::with_capacity(3);
        let writes: [(&Path, &[u8]); 3] = [
            (set.upload_path.as_path(), original),
            (set.image_path.as_path(), rendered),
            (set.metadata_path.as_path(), document.as_slice()),
        ];

        for (path, bytes) in writes {
            if let Err(e) = write_new(path, bytes) {
                for done in &placed {
                    if let Err(cleanup) = fs::remove_file(done) {
                        warn!("Failed to remove partial artifact {}: {}", done.display(), cleanup);
                    }
                }
                return Err(ArgusError::Persistence(format!(
                    "cannot write {}: {}",
                    path.display(),
                    e
                )));
            }
            placed.push(path);
        }

        info!(
            artifact = %set.name,
            image = %set.image_path.display(),
            metadata = %set.metadata_path.display(),
            "Artifacts saved"
        );
        Ok(PersistedArtifacts {
            upload_url: set.upload_url.clone(),
            result_image: set.image_url.clone(),
            result_json: set.metadata_url.clone(),
        })
    }

    /// Read back a persisted metadata document.
    pub fn load_metadata<M: DeserializeOwned>(&self, set: &ArtifactSet) -> Result<M> {
        let bytes = fs::read(&set.metadata_path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ArgusError::Persistence(format!("corrupt metadata document: {}", e)))
    }

    /// Resolve a bare result-image file name to its path, if it exists.
    pub fn result_image(&self, filename: &str) -> Option<PathBuf> {
        if filename.is_empty()
            || filename.contains("..")
            || filename.contains('/')
            || filename.contains('\\')
        {
            return None;
        }
        let path = self.config.result_images_dir().join(filename);
        path.is_file().then_some(path)
    }

    /// Check that the root accepts new files.
    pub fn check_writable(&self) -> bool {
        let scratch = tempfile::Builder::new()
            .prefix(".writable-")
            .tempfile_in(&self.config.root)
            .and_then(|mut file| file.write_all(b"ok").map(|_| file));
        match scratch {
            Ok(_) => true,
            Err(e) => {
                debug!("Storage root {} not writable: {}", self.config.root.display(), e);
                false
            }
        }
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

fn split_extension(name: &str) -> (&str, Option<String>) {
    match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() && !ext.is_empty() => {
            (base, Some(ext.to_ascii_lowercase()))
        }
        _ => (name, None),
    }
}

/// Reduce a client-supplied file name to a safe single path component.
///
/// Keeps ASCII letters, digits, `.`, `-` and `_`; whitespace becomes `_`;
/// directory parts and leading dots are dropped.
pub fn secure_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = last
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.').trim_matches('_');
    // truncate the stem only; the extension must survive
    let truncated: String = match trimmed.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            let stem: String = stem.chars().take(MAX_BASE_NAME_LEN).collect();
            let ext: String = ext.chars().take(MAX_EXTENSION_LEN).collect();
            format!("{}.{}", stem, ext)
        }
        _ => trimmed.chars().take(MAX_BASE_NAME_LEN).collect(),
    };
    if truncated.is_empty() {
        "upload".to_string()
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Meta {
        count: usize,
    }

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::open(StorageConfig {
            root: dir.path().to_path_buf(),
            public_prefix: "/static".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("test.jpg"), "test.jpg");
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\cat pic.png"), "cat_pic.png");
        assert_eq!(secure_filename(".hidden.png"), "hidden.png");
        assert_eq!(secure_filename("ünïcødé.gif"), "ncd.gif");
        assert_eq!(secure_filename("///"), "upload");
    }

    #[test]
    fn test_secure_filename_long_name_keeps_extension() {
        let long = format!("{}.png", "a".repeat(120));
        let safe = secure_filename(&long);
        assert_eq!(safe, format!("{}.png", "a".repeat(MAX_BASE_NAME_LEN)));

        let no_ext = "b".repeat(150);
        assert_eq!(secure_filename(&no_ext).len(), MAX_BASE_NAME_LEN);

        let set = ArtifactStore::new(StorageConfig::default()).allocate(&long);
        assert!(set.upload_url.ends_with(".png"));
    }

    #[test]
    fn test_allocate_same_instant_is_unique() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let at = Utc::now();
        let a = store.allocate_at("test.jpg", at);
        let b = store.allocate_at("test.jpg", at);
        assert_ne!(a.name, b.name);
        assert_ne!(a.image_path, b.image_path);
        assert_ne!(a.metadata_path, b.metadata_path);
    }

    #[test]
    fn test_allocate_layout_and_urls() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let set = store.allocate("Photo.JPG");
        assert!(set.upload_path.starts_with(dir.path().join("uploads")));
        assert!(set.upload_url.ends_with("_Photo.jpg"));
        assert!(set.image_url.starts_with("/static/results/image/result_"));
        assert!(set.image_url.ends_with(".jpg"));
        assert!(set.metadata_url.starts_with("/static/results/json/result_"));
        assert!(set.metadata_url.ends_with(".json"));
    }

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let set = store.allocate("a.png");
        let persisted = store.persist(&set, b"orig", b"jpeg", &Meta { count: 2 }).unwrap();
        assert_eq!(persisted.result_image, set.image_url);
        assert_eq!(persisted.result_json, set.metadata_url);

        assert_eq!(fs::read(&set.upload_path).unwrap(), b"orig");
        assert_eq!(fs::read(&set.image_path).unwrap(), b"jpeg");
        let meta: Meta = store.load_metadata(&set).unwrap();
        assert_eq!(meta, Meta { count: 2 });
    }

    #[test]
    fn test_persist_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let set = store.allocate("a.png");
        store.persist(&set, b"first", b"first", &Meta { count: 1 }).unwrap();

        let err = store.persist(&set, b"second", b"second", &Meta { count: 2 }).unwrap_err();
        assert!(matches!(err, ArgusError::Persistence(_)));
        assert_eq!(fs::read(&set.upload_path).unwrap(), b"first");
        let meta: Meta = store.load_metadata(&set).unwrap();
        assert_eq!(meta.count, 1);
    }

    #[test]
    fn test_failed_persist_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let set = store.allocate("a.png");
        // Metadata directory gone: the last write fails
        fs::remove_dir_all(dir.path().join("results").join("json")).unwrap();

        let err = store.persist(&set, b"orig", b"jpeg", &Meta { count: 1 }).unwrap_err();
        assert!(matches!(err, ArgusError::Persistence(_)));
        assert!(!set.upload_path.exists());
        assert!(!set.image_path.exists());
    }

    #[test]
    fn test_result_image_lookup() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let set = store.allocate("a.png");
        store.persist(&set, b"orig", b"jpeg", &Meta { count: 0 }).unwrap();

        let file = set.image_path.file_name().unwrap().to_str().unwrap();
        assert_eq!(store.result_image(file), Some(set.image_path.clone()));
        assert_eq!(store.result_image("../json/x.json"), None);
        assert_eq!(store.result_image("missing.jpg"), None);
    }

    #[test]
    fn test_check_writable() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.check_writable());

        let missing = ArtifactStore::new(StorageConfig {
            root: dir.path().join("does-not-exist"),
            public_prefix: "/static".to_string(),
        });
        assert!(!missing.check_writable());
    }
}
