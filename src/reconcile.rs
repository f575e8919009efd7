//! Merging of the per-form-type record lists into one dashboard corpus.

use log::{debug, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::record::{FormType, ValuationRecord};

/// A list endpoint for one form type.
pub trait RecordSource: Send + Sync + 'static {
    fn list(
        &self,
        form_type: FormType,
    ) -> impl Future<Output = Result<Vec<ValuationRecord>>> + Send;
}

/// Merge record batches into a list with no two entries sharing a `uniqueId`.
///
/// Batches are walked in arrival order. When a key repeats, the record with
/// the later effective timestamp replaces the earlier one in its original
/// slot. Equal timestamps keep the first-seen record, and a record carrying a
/// timestamp beats one without. Records without a key are always kept.
pub fn reconcile(batches: Vec<(FormType, Vec<ValuationRecord>)>) -> Vec<ValuationRecord> {
    let capacity = batches.iter().map(|(_, records)| records.len()).sum();
    let mut merged: Vec<ValuationRecord> = Vec::with_capacity(capacity);
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(capacity);

    for (form_type, records) in batches {
        for mut record in records {
            record.form_type = form_type;

            let Some(key) = record.key().map(str::to_string) else {
                merged.push(record);
                continue;
            };

            match slots.get(&key) {
                None => {
                    slots.insert(key, merged.len());
                    merged.push(record);
                }
                Some(&slot) => {
                    if supersedes(&record, &merged[slot]) {
                        debug!("record {} replaced by newer copy from {}", key, form_type);
                        merged[slot] = record;
                    }
                }
            }
        }
    }

    merged
}

fn supersedes(candidate: &ValuationRecord, existing: &ValuationRecord) -> bool {
    match (candidate.effective_timestamp(), existing.effective_timestamp()) {
        (Some(new), Some(old)) => new > old,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Fetch every form type concurrently and merge the results.
///
/// A failing source contributes an empty list; the merge itself never fails.
pub async fn fetch_all<S: RecordSource>(source: Arc<S>) -> Vec<ValuationRecord> {
    let handles: Vec<_> = FormType::ALL
        .into_iter()
        .map(|form_type| {
            let source = Arc::clone(&source);
            let handle = tokio::spawn(async move { source.list(form_type).await });
            (form_type, handle)
        })
        .collect();

    let mut batches = Vec::with_capacity(handles.len());
    for (form_type, handle) in handles {
        let records = match handle.await {
            Ok(Ok(records)) => records,
            Ok(Err(err)) => {
                warn!("listing {} failed: {}", form_type, err);
                Vec::new()
            }
            Err(err) => {
                warn!("listing {} task aborted: {}", form_type, err);
                Vec::new()
            }
        };
        batches.push((form_type, records));
    }

    reconcile(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::{TimeZone, Utc};

    fn record(id: Option<&str>, client: &str, day: Option<u32>) -> ValuationRecord {
        ValuationRecord {
            unique_id: id.map(str::to_string),
            client_name: client.to_string(),
            last_updated_at: day.map(|d| Utc.with_ymd_and_hms(2024, 5, d, 9, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn later_timestamp_wins_and_keeps_slot() {
        let merged = reconcile(vec![
            (
                FormType::BomFlat,
                vec![record(Some("A"), "old", Some(1)), record(Some("B"), "b", Some(1))],
            ),
            (FormType::UbiShop, vec![record(Some("A"), "new", Some(2))]),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].client_name, "new");
        assert_eq!(merged[0].form_type, FormType::UbiShop);
        assert_eq!(merged[1].client_name, "b");
    }

    #[test]
    fn earlier_copy_arriving_late_is_dropped() {
        let merged = reconcile(vec![
            (FormType::BomFlat, vec![record(Some("A"), "new", Some(9))]),
            (FormType::SbiFlat, vec![record(Some("A"), "old", Some(3))]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].client_name, "new");
        assert_eq!(merged[0].form_type, FormType::BomFlat);
    }

    #[test]
    fn equal_timestamps_keep_first_seen() {
        let merged = reconcile(vec![
            (FormType::BomFlat, vec![record(Some("A"), "first", Some(4))]),
            (FormType::UbiApf, vec![record(Some("A"), "second", Some(4))]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].client_name, "first");
    }

    #[test]
    fn keyless_records_are_never_merged() {
        let merged = reconcile(vec![
            (
                FormType::BomFlat,
                vec![record(None, "x", Some(1)), record(Some(""), "y", Some(1))],
            ),
            (
                FormType::UbiShop,
                vec![record(None, "z", Some(1)), record(Some("K"), "k", None)],
            ),
        ]);
        // distinct keys (1) + keyless (3)
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn timestamped_copy_beats_untimestamped() {
        let merged = reconcile(vec![
            (FormType::BomFlat, vec![record(Some("A"), "undated", None)]),
            (FormType::UbiShop, vec![record(Some("A"), "dated", Some(1))]),
        ]);
        assert_eq!(merged[0].client_name, "dated");
    }

    struct FlakySource;

    impl RecordSource for FlakySource {
        fn list(
            &self,
            form_type: FormType,
        ) -> impl Future<Output = Result<Vec<ValuationRecord>>> + Send {
            async move {
                match form_type {
                    FormType::UbiShop => Err(Error::NotFound("ubishop endpoint".to_string())),
                    FormType::SbiLand => panic!("connection reset"),
                    other => Ok(vec![ValuationRecord::new(other.slug(), FormType::Unknown)]),
                }
            }
        }
    }

    #[tokio::test]
    async fn failing_sources_degrade_to_empty() {
        let merged = fetch_all(Arc::new(FlakySource)).await;
        assert_eq!(merged.len(), 4);
        assert!(merged.iter().all(|r| r.form_type != FormType::UbiShop));
        assert!(merged.iter().all(|r| r.form_type != FormType::SbiLand));
        assert_eq!(merged[0].form_type, FormType::BomFlat);
    }
}
