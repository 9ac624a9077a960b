use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::Result;

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
/// Ingest history: source id -> full path of the file it was loaded from.
const SOURCES: TableDefinition<&str, &str> = TableDefinition::new("sources");

pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.open_table(SOURCES)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    /// Remove every stored setting so that defaults apply again.
    pub fn clear_settings(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.retain(|_, _| false)?;
        }
        txn.commit()?;
        Ok(())
    }

    // -- Ingest history --

    /// Record multiple ingested sources in a single transaction.
    pub fn batch_record_sources(&self, entries: &[(String, String)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SOURCES)?;
            for (source_id, full_path) in entries {
                table.insert(source_id.as_str(), full_path.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn remove_source(&self, source_id: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SOURCES)?;
            table.remove(source_id)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Return all (source_id, full_path) pairs in a single read transaction.
    pub fn list_sources(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SOURCES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    pub fn clear_sources(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SOURCES)?;
            table.retain(|_, _| false)?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
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
    fn set_setting_overwrites() {
        let (_tmp, db) = test_db();
        assert!(db.list_settings().unwrap().is_empty());

        db.set_setting("embed_model", "custom-model").unwrap();
        db.set_setting("embed_model", "other-model").unwrap();
        assert_eq!(
            db.list_settings().unwrap(),
            vec![("embed_model".to_string(), "other-model".to_string())]
        );
    }

    #[test]
    fn clear_settings_empties_table() {
        let (_tmp, db) = test_db();
        db.set_setting("a", "1").unwrap();
        db.set_setting("b", "2").unwrap();

        db.clear_settings().unwrap();
        assert!(db.list_settings().unwrap().is_empty());
    }

    #[test]
    fn sources_history() {
        let (_tmp, db) = test_db();

        db.batch_record_sources(&[
            ("a.txt".to_string(), "/docs/a.txt".to_string()),
            ("b.pdf".to_string(), "/docs/b.pdf".to_string()),
        ])
        .unwrap();

        let mut sources = db.list_sources().unwrap();
        sources.sort();
        assert_eq!(sources[0], ("a.txt".to_string(), "/docs/a.txt".to_string()));
        assert_eq!(sources.len(), 2);

        assert!(db.remove_source("a.txt").unwrap());
        assert_eq!(db.list_sources().unwrap().len(), 1);

        db.clear_sources().unwrap();
        assert!(db.list_sources().unwrap().is_empty());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.redb");

        {
            let db = ConfigDb::open(&path).unwrap();
            db.set_setting("hybrid_alpha", "0.7").unwrap();
        }

        {
            let db = ConfigDb::open(&path).unwrap();
            assert_eq!(
                db.list_settings().unwrap(),
                vec![("hybrid_alpha".to_string(), "0.7".to_string())]
            );
        }
    }
}
