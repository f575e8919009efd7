//! Keyed JSON blob storage standing in for browser localStorage.
//!
//! Values are plain JSON with no versioning. The file backend keeps one
//! `<key>.json` per entry under a root directory.

use log::warn;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::error::Result;

pub trait BlobStore {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Key layout shared with the browser client.
pub mod keys {
    use crate::prefill::FormTab;
    use crate::record::FormType;

    pub const USER: &str = "user";

    pub fn user_draft(username: &str) -> String {
        format!("valuation_draft_{}", username)
    }

    pub fn last_submitted(form_type: FormType) -> String {
        format!("last_{}_form_data", form_type.slug())
    }

    pub fn tab_draft(form_type: FormType, tab: FormTab, form_id: &str) -> String {
        format!("{}_{}_{}", form_type.slug(), tab.as_str(), form_id)
    }
}

pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileBlobStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// One file per key; the key is percent-encoded so distinct keys never
    /// share a file and none can leave `root`.
    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", urlencoding::encode(key)))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        match serde_json::from_str(&data) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                // corrupt blobs read as missing
                warn!("ignoring unreadable blob {}: {}", path.display(), err);
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        create_dir_all(&self.root)?;
        fs::write(self.path_for(key), serde_json::to_string(value)?)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefill::FormTab;
    use crate::record::FormType;
    use serde_json::json;

    #[test]
    fn key_layout() {
        assert_eq!(keys::user_draft("asha"), "valuation_draft_asha");
        assert_eq!(keys::last_submitted(FormType::BomFlat), "last_bomflat_form_data");
        assert_eq!(
            keys::tab_draft(FormType::BomFlat, FormTab::Market, "42"),
            "bomflat_market_42"
        );
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("drafts"));

        assert_eq!(store.get("user").unwrap(), None);
        store.set("user", &json!({ "username": "asha" })).unwrap();
        assert_eq!(store.get("user").unwrap(), Some(json!({ "username": "asha" })));

        store.remove("user").unwrap();
        assert_eq!(store.get("user").unwrap(), None);
        store.remove("user").unwrap();
    }

    #[test]
    fn file_store_encodes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        store.set("../escape", &json!(1)).unwrap();
        assert!(dir.path().join("..%2Fescape.json").exists());
        assert_eq!(store.get("../escape").unwrap(), Some(json!(1)));
    }

    #[test]
    fn similar_keys_keep_separate_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        store.set("bomflat_general_A.1", &json!("dot")).unwrap();
        store.set("bomflat_general_A_1", &json!("underscore")).unwrap();
        store.set("bomflat_general_A/1", &json!("slash")).unwrap();

        assert_eq!(store.get("bomflat_general_A.1").unwrap(), Some(json!("dot")));
        assert_eq!(store.get("bomflat_general_A_1").unwrap(), Some(json!("underscore")));
        assert_eq!(store.get("bomflat_general_A/1").unwrap(), Some(json!("slash")));
    }

    #[test]
    fn corrupt_blob_reads_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        assert_eq!(store.get("broken").unwrap(), None);
    }
}
