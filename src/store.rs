//! File-backed record collections, one per form type, cached in memory.

use chrono::{DateTime, Utc};
use log::info;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::reconcile::RecordSource;
use crate::record::{CustomField, FieldBag, FormType, Payment, RecordKey, Status, ValuationRecord};
use crate::saving;
use crate::workflow::{self, Role};

/// Client-facing details sent with a form submission.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordDetails {
    pub bank_name: String,
    pub city: String,
    pub engineer_name: String,
    pub client_name: String,
    pub mobile_number: String,
    pub address: String,
    pub payment: Payment,
    pub custom_fields: Vec<CustomField>,
}

pub struct RecordStore {
    dir: PathBuf,
    collections: RwLock<HashMap<FormType, Vec<ValuationRecord>>>,
}

impl RecordStore {
    /// Load every form-type collection found under `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut collections = HashMap::new();
        for form_type in FormType::ALL {
            let records = saving::load_records(collection_path(&dir, form_type))?;
            info!("loaded {} {} records", records.len(), form_type);
            collections.insert(form_type, records);
        }
        Ok(RecordStore {
            dir,
            collections: RwLock::new(collections),
        })
    }

    pub async fn list_form(&self, form_type: FormType) -> Vec<ValuationRecord> {
        let collections = self.collections.read().await;
        collections.get(&form_type).cloned().unwrap_or_default()
    }

    pub async fn get(&self, form_type: FormType, unique_id: &str) -> Option<ValuationRecord> {
        let collections = self.collections.read().await;
        collections
            .get(&form_type)?
            .iter()
            .find(|r| r.key() == Some(unique_id))
            .cloned()
    }

    /// Insert or replace by `uniqueId`, then persist the collection.
    pub async fn upsert(&self, mut record: ValuationRecord) -> Result<ValuationRecord> {
        let form_type = record.form_type;
        let key = record
            .key()
            .map(str::to_string)
            .ok_or_else(|| Error::Validation("record has no uniqueId".to_string()))?;
        check_form_type(form_type, &key)?;
        record.unique_id = Some(key.clone());

        let mut collections = self.collections.write().await;
        let mut records = collections.get(&form_type).cloned().unwrap_or_default();
        match records.iter_mut().find(|r| r.key() == Some(key.as_str())) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.commit(&mut collections, form_type, records).await?;
        Ok(record)
    }

    /// Change one record in place and persist it, all under the write lock.
    ///
    /// Nothing is written when `change` fails.
    pub async fn update<F>(
        &self,
        form_type: FormType,
        unique_id: &str,
        change: F,
    ) -> Result<ValuationRecord>
    where
        F: FnOnce(&mut ValuationRecord) -> Result<()>,
    {
        let mut collections = self.collections.write().await;
        let mut records = collections.get(&form_type).cloned().unwrap_or_default();
        let record = records
            .iter_mut()
            .find(|r| r.key() == Some(unique_id))
            .ok_or_else(|| Error::NotFound(format!("{} record {}", form_type, unique_id)))?;

        change(record)?;
        let updated = record.clone();
        self.commit(&mut collections, form_type, records).await?;
        Ok(updated)
    }

    pub async fn delete(&self, form_type: FormType, unique_id: &str) -> Result<bool> {
        let removed = self
            .bulk_delete(&[RecordKey {
                form_type,
                unique_id: unique_id.to_string(),
            }])
            .await?;
        Ok(removed == 1)
    }

    /// Remove several records at once; unknown keys are skipped.
    pub async fn bulk_delete(&self, keys: &[RecordKey]) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let mut removed = 0;

        for form_type in FormType::ALL {
            let ids: Vec<&str> = keys
                .iter()
                .filter(|k| k.form_type == form_type)
                .map(|k| k.unique_id.as_str())
                .collect();
            if ids.is_empty() {
                continue;
            }

            let mut records = collections.get(&form_type).cloned().unwrap_or_default();
            let before = records.len();
            records.retain(|r| r.key().is_none_or(|id| !ids.contains(&id)));
            if records.len() != before {
                let count = before - records.len();
                self.commit(&mut collections, form_type, records).await?;
                removed += count;
            }
        }

        info!("deleted {} records", removed);
        Ok(removed)
    }

    /// Move a record through the approval pipeline.
    pub async fn transition(
        &self,
        form_type: FormType,
        unique_id: &str,
        role: Role,
        to: Status,
        feedback: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ValuationRecord> {
        let updated = self
            .update(form_type, unique_id, |record| {
                workflow::transition(record, role, to, feedback, now)
            })
            .await?;
        info!("{} {} moved to {}", form_type, unique_id, to);
        Ok(updated)
    }

    /// Save a submitted form: creates a pending record on first submit,
    /// otherwise updates fields and resubmits records sent back for rework.
    pub async fn submit(
        &self,
        form_type: FormType,
        unique_id: &str,
        details: RecordDetails,
        fields: FieldBag,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<ValuationRecord> {
        if details.client_name.trim().is_empty() {
            return Err(Error::Validation("client name is required".to_string()));
        }
        let unique_id = unique_id.trim();
        if unique_id.is_empty() {
            return Err(Error::Validation("record has no uniqueId".to_string()));
        }
        check_form_type(form_type, unique_id)?;

        let mut collections = self.collections.write().await;
        let mut records = collections.get(&form_type).cloned().unwrap_or_default();
        let index = match records.iter().position(|r| r.key() == Some(unique_id)) {
            Some(index) => {
                let existing = &mut records[index];
                if existing.status == Status::Rework {
                    workflow::transition(existing, role, Status::Pending, None, now)?;
                }
                existing.touch(now);
                index
            }
            None => {
                let mut fresh = ValuationRecord::new(unique_id, form_type);
                fresh.created_at = Some(now);
                records.push(fresh);
                records.len() - 1
            }
        };

        let record = &mut records[index];
        record.bank_name = details.bank_name;
        record.city = details.city;
        record.engineer_name = details.engineer_name;
        record.client_name = details.client_name;
        record.mobile_number = details.mobile_number;
        record.address = details.address;
        record.payment = details.payment;
        record.custom_fields = details.custom_fields;
        record.pdf_details = fields;

        let saved = record.clone();
        self.commit(&mut collections, form_type, records).await?;
        Ok(saved)
    }

    /// Write `records` to disk, then make them the cached collection.
    ///
    /// On failure the cache keeps the previous collection.
    async fn commit(
        &self,
        collections: &mut HashMap<FormType, Vec<ValuationRecord>>,
        form_type: FormType,
        records: Vec<ValuationRecord>,
    ) -> Result<()> {
        let path = collection_path(&self.dir, form_type);
        let records = tokio::task::spawn_blocking(move || {
            saving::save_records(path, &records).map(|()| records)
        })
        .await
        .map_err(std::io::Error::other)??;
        collections.insert(form_type, records);
        Ok(())
    }
}

fn check_form_type(form_type: FormType, unique_id: &str) -> Result<()> {
    if form_type == FormType::Unknown {
        return Err(Error::Validation(format!("record {} has no form type", unique_id)));
    }
    Ok(())
}

fn collection_path(dir: &Path, form_type: FormType) -> PathBuf {
    dir.join(format!("{}.json.gz", form_type.slug()))
}

impl RecordSource for RecordStore {
    fn list(
        &self,
        form_type: FormType,
    ) -> impl Future<Output = Result<Vec<ValuationRecord>>> + Send {
        async move { Ok(self.list_form(form_type).await) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap()
    }

    fn details(client: &str) -> RecordDetails {
        RecordDetails {
            client_name: client.to_string(),
            bank_name: "BOM".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn submit_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();

        let mut fields = FieldBag::new();
        fields.insert("roundFigure".into(), json!("124000"));
        let created = store
            .submit(FormType::BomFlat, "VAL-1", details("Shah"), fields, Role::User, now())
            .await
            .unwrap();
        assert_eq!(created.status, Status::Pending);
        assert_eq!(created.created_at, Some(now()));
        assert_eq!(created.last_updated_at, None);

        let later = now() + chrono::Duration::hours(1);
        let updated = store
            .submit(FormType::BomFlat, "VAL-1", details("Shah & Sons"), FieldBag::new(), Role::User, later)
            .await
            .unwrap();
        assert_eq!(updated.client_name, "Shah & Sons");
        assert_eq!(updated.created_at, Some(now()));
        assert_eq!(updated.last_updated_at, Some(later));
        assert_eq!(store.list_form(FormType::BomFlat).await.len(), 1);

        let reopened = RecordStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(FormType::BomFlat, "VAL-1").await, Some(updated));
    }

    #[tokio::test]
    async fn submit_requires_client_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let err = store
            .submit(FormType::UbiShop, "X", details(" "), FieldBag::new(), Role::User, now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn resubmitting_rework_returns_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        store
            .submit(FormType::SbiLand, "L-1", details("Rao"), FieldBag::new(), Role::User, now())
            .await
            .unwrap();
        store
            .transition(FormType::SbiLand, "L-1", Role::Manager, Status::Rejected, None, now())
            .await
            .unwrap();
        store
            .transition(FormType::SbiLand, "L-1", Role::Manager, Status::Rework, Some("redo".into()), now())
            .await
            .unwrap();

        let resubmitted = store
            .submit(FormType::SbiLand, "L-1", details("Rao"), FieldBag::new(), Role::User, now())
            .await
            .unwrap();
        assert_eq!(resubmitted.status, Status::Pending);
        assert_eq!(resubmitted.manager_feedback.as_deref(), Some("redo"));
    }

    #[tokio::test]
    async fn bulk_delete_across_form_types() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        for (ft, id) in [(FormType::BomFlat, "A"), (FormType::BomFlat, "B"), (FormType::UbiApf, "C")] {
            store.upsert(ValuationRecord::new(id, ft)).await.unwrap();
        }

        let removed = store
            .bulk_delete(&[
                RecordKey { form_type: FormType::BomFlat, unique_id: "A".into() },
                RecordKey { form_type: FormType::UbiApf, unique_id: "C".into() },
                RecordKey { form_type: FormType::UbiApf, unique_id: "missing".into() },
            ])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.delete(FormType::BomFlat, "B").await.unwrap());
        assert!(!store.delete(FormType::BomFlat, "B").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_rejects_keyless_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let record = ValuationRecord { form_type: FormType::BomFlat, ..Default::default() };
        assert!(matches!(store.upsert(record).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn failed_writes_leave_the_cache_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        store.upsert(ValuationRecord::new("A", FormType::BomFlat)).await.unwrap();

        // occupy the staging path so the next snapshot cannot be written
        std::fs::create_dir(dir.path().join("bomflat.json.gz.tmp")).unwrap();

        assert!(store.upsert(ValuationRecord::new("B", FormType::BomFlat)).await.is_err());
        let err = store
            .transition(FormType::BomFlat, "A", Role::Admin, Status::Approved, None, now())
            .await;
        assert!(err.is_err());
        let keys = [RecordKey { form_type: FormType::BomFlat, unique_id: "A".into() }];
        assert!(store.bulk_delete(&keys).await.is_err());

        let cached = store.list_form(FormType::BomFlat).await;
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].status, Status::Pending);

        let reopened = RecordStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list_form(FormType::BomFlat).await, cached);
    }

    #[tokio::test]
    async fn update_changes_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        store.upsert(ValuationRecord::new("A", FormType::UbiApf)).await.unwrap();

        let updated = store
            .update(FormType::UbiApf, "A", |record| {
                record.pdf_details.insert("areaImages".into(), json!(["/uploads/a.jpg"]));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(updated.pdf_details["areaImages"][0], "/uploads/a.jpg");

        let failed = store
            .update(FormType::UbiApf, "A", |record| {
                record.client_name = "half done".into();
                Err(Error::Validation("rejected".into()))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(store.get(FormType::UbiApf, "A").await, Some(updated));
    }

    #[tokio::test]
    async fn unknown_record_transition_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let err = store
            .transition(FormType::BomFlat, "nope", Role::Admin, Status::Approved, None, now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
