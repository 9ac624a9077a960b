//! Runtime settings and the configuration fingerprint.
//!
//! Settings are stored as string key/value pairs in the config database.
//! Anything not stored falls back to the defaults below; stored values that
//! no longer parse are ignored with a warning instead of failing the
//! caller. Writes go through [`Settings::set`], which validates the whole
//! resulting configuration before anything is persisted.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{
    config_db::ConfigDb,
    error::{Error, Result},
};

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_CHAT_MODEL: &str = "gemma2:2b";
pub const DEFAULT_RETRIEVAL_K: usize = 3;
pub const DEFAULT_HYBRID_ALPHA: f64 = 0.5;

/// Overrides the stored embedding model for the current process.
pub const EMBED_MODEL_ENV_VAR: &str = "DOCFUSE_EMBED_MODEL";

/// Names of the recognised settings keys.
pub mod keys {
    pub const EMBED_MODEL: &str = "embed_model";
    pub const OLLAMA_HOST: &str = "ollama_host";
    pub const CHAT_MODEL: &str = "chat_model";
    pub const INDEX_PATH: &str = "index_path";
    pub const CHUNK_SIZE: &str = "chunk_size";
    pub const CHUNK_OVERLAP: &str = "chunk_overlap";
    pub const RETRIEVAL_K: &str = "retrieval_k";
    pub const HYBRID_ALPHA: &str = "hybrid_alpha";
    pub const USE_HYBRID_SEARCH: &str = "use_hybrid_search";

    pub const ALL: &[&str] = &[
        EMBED_MODEL,
        OLLAMA_HOST,
        CHAT_MODEL,
        INDEX_PATH,
        CHUNK_SIZE,
        CHUNK_OVERLAP,
        RETRIEVAL_K,
        HYBRID_ALPHA,
        USE_HYBRID_SEARCH,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub embed_model: String,
    pub ollama_host: String,
    pub chat_model: String,
    pub index_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_k: usize,
    pub hybrid_alpha: f64,
    pub use_hybrid_search: bool,
}

/// The configuration values whose change invalidates cached index state.
///
/// Alpha is kept as raw bits so the fingerprint can derive `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub index_path: PathBuf,
    pub embed_model: String,
    pub host: String,
    alpha_bits: u64,
    use_hybrid: bool,
}

impl Settings {
    /// Defaults, with the index directory placed at `default_index_dir`.
    pub fn defaults(default_index_dir: &Path) -> Self {
        Self {
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            index_path: default_index_dir.to_path_buf(),
            chunk_size: crate::chunking::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::chunking::DEFAULT_CHUNK_OVERLAP,
            retrieval_k: DEFAULT_RETRIEVAL_K,
            hybrid_alpha: DEFAULT_HYBRID_ALPHA,
            use_hybrid_search: true,
        }
    }

    /// Load the live settings from the config database.
    pub fn load(db: &ConfigDb, default_index_dir: &Path) -> Result<Self> {
        let mut settings = Self::defaults(default_index_dir);
        for (key, value) in db.list_settings()? {
            if let Err(e) = settings.apply(&key, &value) {
                tracing::warn!(key, value, "ignoring stored setting: {e}");
            }
        }
        if let Ok(model) = std::env::var(EMBED_MODEL_ENV_VAR)
            && !model.trim().is_empty()
        {
            settings.embed_model = model;
        }
        Ok(settings)
    }

    /// Validate and persist a single setting.
    ///
    /// The whole configuration is re-validated with the new value applied,
    /// so cross-field rules (overlap below chunk size) are enforced.
    pub fn set(
        db: &ConfigDb,
        default_index_dir: &Path,
        key: &str,
        value: &str,
    ) -> Result<Self> {
        let mut settings = Self::load(db, default_index_dir)?;
        settings.apply(key, value)?;
        settings.validate()?;
        db.set_setting(key, value.trim())?;
        Ok(settings)
    }

    /// Drop every stored setting.
    pub fn reset(db: &ConfigDb, default_index_dir: &Path) -> Result<Self> {
        db.clear_settings()?;
        Ok(Self::defaults(default_index_dir))
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            keys::EMBED_MODEL => self.embed_model = non_empty(key, value)?,
            keys::OLLAMA_HOST => self.ollama_host = non_empty(key, value)?,
            keys::CHAT_MODEL => self.chat_model = non_empty(key, value)?,
            keys::INDEX_PATH => {
                self.index_path = PathBuf::from(non_empty(key, value)?)
            }
            keys::CHUNK_SIZE => self.chunk_size = parse(key, value)?,
            keys::CHUNK_OVERLAP => self.chunk_overlap = parse(key, value)?,
            keys::RETRIEVAL_K => self.retrieval_k = parse(key, value)?,
            keys::HYBRID_ALPHA => self.hybrid_alpha = parse(key, value)?,
            keys::USE_HYBRID_SEARCH => {
                self.use_hybrid_search = parse(key, value)?
            }
            _ => {
                return Err(Error::Config(format!(
                    "unknown setting '{key}' (known: {})",
                    keys::ALL.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Check every boundary rule and report all violations at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.chunk_size < 100 {
            errors.push("chunk_size must be >= 100".to_string());
        }
        if self.chunk_overlap >= self.chunk_size {
            errors.push("chunk_overlap must be less than chunk_size".into());
        }
        if self.retrieval_k < 1 {
            errors.push("retrieval_k must be a positive integer".into());
        }
        if !(0.0..=1.0).contains(&self.hybrid_alpha) {
            errors.push("hybrid_alpha must be between 0 and 1".into());
        }
        if !self.ollama_host.starts_with("http://")
            && !self.ollama_host.starts_with("https://")
        {
            errors.push(
                "ollama_host must start with http:// or https://".into(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errors.join("; ")))
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            index_path: self.index_path.clone(),
            embed_model: self.embed_model.clone(),
            host: self.ollama_host.clone(),
            alpha_bits: self.hybrid_alpha.to_bits(),
            use_hybrid: self.use_hybrid_search,
        }
    }

    pub fn keyword_index_file(&self) -> PathBuf {
        self.index_path.join(crate::keyword_index::INDEX_FILE_NAME)
    }
}

fn non_empty(key: &str, value: &str) -> Result<String> {
    if value.is_empty() {
        return Err(Error::Config(format!("{key} must not be empty")));
    }
    Ok(value.to_string())
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("invalid value for {key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, ConfigDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = ConfigDb::open(&tmp.path().join("config.redb")).unwrap();
        (tmp, db)
    }

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::defaults(Path::new("/idx"));
        assert_eq!(s.chunk_size, 1000);
        assert_eq!(s.chunk_overlap, 200);
        assert_eq!(s.retrieval_k, 3);
        assert_eq!(s.hybrid_alpha, 0.5);
        assert!(s.use_hybrid_search);
        assert_eq!(s.embed_model, "nomic-embed-text");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn set_persists_and_reloads() {
        let (tmp, db) = test_db();
        let idx = tmp.path().join("index");

        Settings::set(&db, &idx, keys::HYBRID_ALPHA, "0.8").unwrap();
        let s = Settings::load(&db, &idx).unwrap();
        assert_eq!(s.hybrid_alpha, 0.8);
    }

    #[test]
    fn set_rejects_out_of_range_alpha() {
        let (tmp, db) = test_db();
        let idx = tmp.path().join("index");

        let err = Settings::set(&db, &idx, keys::HYBRID_ALPHA, "1.5");
        assert!(matches!(err, Err(Error::Config(_))));
        assert!(db.list_settings().unwrap().is_empty());
    }

    #[test]
    fn set_rejects_overlap_not_below_chunk_size() {
        let (tmp, db) = test_db();
        let idx = tmp.path().join("index");

        assert!(Settings::set(&db, &idx, keys::CHUNK_OVERLAP, "1000").is_err());
        assert!(Settings::set(&db, &idx, keys::CHUNK_SIZE, "50").is_err());
    }

    #[test]
    fn set_rejects_unknown_key() {
        let (tmp, db) = test_db();
        let err = Settings::set(&db, tmp.path(), "theme", "dark").unwrap_err();
        assert!(err.to_string().contains("unknown setting"));
    }

    #[test]
    fn unparsable_stored_value_falls_back_to_default() {
        let (tmp, db) = test_db();
        db.set_setting(keys::RETRIEVAL_K, "many").unwrap();

        let s = Settings::load(&db, tmp.path()).unwrap();
        assert_eq!(s.retrieval_k, DEFAULT_RETRIEVAL_K);
    }

    #[test]
    fn fingerprint_tracks_model_path_host_and_alpha() {
        let base = Settings::defaults(Path::new("/idx"));

        let mut other = base.clone();
        other.embed_model = "mxbai-embed-large".into();
        assert_ne!(base.fingerprint(), other.fingerprint());

        let mut other = base.clone();
        other.index_path = PathBuf::from("/elsewhere");
        assert_ne!(base.fingerprint(), other.fingerprint());

        let mut other = base.clone();
        other.ollama_host = "http://gpu-box:11434".into();
        assert_ne!(base.fingerprint(), other.fingerprint());

        let mut other = base.clone();
        other.hybrid_alpha = 0.25;
        assert_ne!(base.fingerprint(), other.fingerprint());

        let mut other = base.clone();
        other.retrieval_k = 10;
        assert_eq!(base.fingerprint(), other.fingerprint());
    }

    #[test]
    fn reset_drops_stored_values() {
        let (tmp, db) = test_db();
        Settings::set(&db, tmp.path(), keys::RETRIEVAL_K, "7").unwrap();

        let s = Settings::reset(&db, tmp.path()).unwrap();
        assert_eq!(s.retrieval_k, DEFAULT_RETRIEVAL_K);
        assert!(db.list_settings().unwrap().is_empty());
    }
}
