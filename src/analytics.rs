//! Dashboard analytics derived from the merged record list.
//!
//! Everything here is recomputed from scratch on each call; the corpus is
//! dashboard-sized, so there is no incremental bookkeeping.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::record::{Payment, Status, ValuationRecord};

const TOP_ENGINEERS: usize = 10;
const UNKNOWN: &str = "Unknown";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub on_progress: usize,
    pub approved: usize,
    pub rejected: usize,
    pub rework: usize,
}

impl StatusCounts {
    pub fn tally(records: &[ValuationRecord]) -> Self {
        let mut counts = StatusCounts {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            match record.status {
                Status::Pending => counts.pending += 1,
                Status::OnProgress => counts.on_progress += 1,
                Status::Approved => counts.approved += 1,
                Status::Rejected => counts.rejected += 1,
                Status::Rework => counts.rework += 1,
            }
        }
        counts
    }

    pub fn get(&self, status: Status) -> usize {
        match status {
            Status::Pending => self.pending,
            Status::OnProgress => self.on_progress,
            Status::Approved => self.approved,
            Status::Rejected => self.rejected,
            Status::Rework => self.rework,
        }
    }

    /// Share of decided records, as a whole percentage.
    pub fn completion_rate(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        let decided = (self.approved + self.rejected) as f64;
        (decided / self.total as f64 * 100.0).round() as u32
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineerStats {
    pub name: String,
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
    pub pending: usize,
    /// Percentage with one decimal place.
    pub approval_rate: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NamedCount {
    pub name: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthBucket {
    /// e.g. `Jan 2024`
    pub month: String,
    pub submissions: usize,
    pub approved: usize,
    pub rejected: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PaymentSplit {
    pub yes: usize,
    pub no: usize,
    pub unspecified: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardAnalytics {
    pub status_counts: StatusCounts,
    pub completion_rate: u32,
    pub engineers: Vec<EngineerStats>,
    pub banks: Vec<NamedCount>,
    pub cities: Vec<NamedCount>,
    pub monthly_trend: Vec<MonthBucket>,
    pub payment_split: PaymentSplit,
}

impl DashboardAnalytics {
    pub fn from_records(records: &[ValuationRecord]) -> Self {
        let status_counts = StatusCounts::tally(records);
        DashboardAnalytics {
            completion_rate: status_counts.completion_rate(),
            status_counts,
            engineers: engineer_stats(records),
            banks: count_by(records, |r| &r.bank_name),
            cities: count_by(records, |r| &r.city),
            monthly_trend: monthly_trend(records),
            payment_split: payment_split(records),
        }
    }
}

fn label(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        UNKNOWN.to_string()
    } else {
        name.to_string()
    }
}

/// Top engineers by record count; ties keep first-seen order.
pub fn engineer_stats(records: &[ValuationRecord]) -> Vec<EngineerStats> {
    let mut order: Vec<EngineerStats> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let name = label(&record.engineer_name);
        let slot = *index.entry(name.clone()).or_insert_with(|| {
            order.push(EngineerStats {
                name,
                total: 0,
                approved: 0,
                rejected: 0,
                pending: 0,
                approval_rate: 0.0,
            });
            order.len() - 1
        });

        let stats = &mut order[slot];
        stats.total += 1;
        match record.status {
            Status::Approved => stats.approved += 1,
            Status::Rejected => stats.rejected += 1,
            Status::Pending => stats.pending += 1,
            _ => {}
        }
    }

    for stats in &mut order {
        let decided = stats.approved + stats.rejected + stats.pending;
        stats.approval_rate = if decided == 0 {
            0.0
        } else {
            (stats.approved as f64 / decided as f64 * 1000.0).round() / 10.0
        };
    }

    order.sort_by(|a, b| b.total.cmp(&a.total));
    order.truncate(TOP_ENGINEERS);
    order
}

fn count_by<F>(records: &[ValuationRecord], field: F) -> Vec<NamedCount>
where
    F: Fn(&ValuationRecord) -> &String,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(label(field(record))).or_default() += 1;
    }

    let mut named: Vec<NamedCount> = counts
        .into_iter()
        .map(|(name, count)| NamedCount { name, count })
        .collect();
    named.sort_by(|a, b| b.count.cmp(&a.count));
    named
}

/// Submissions per calendar month of `createdAt`, oldest first.
pub fn monthly_trend(records: &[ValuationRecord]) -> Vec<MonthBucket> {
    let mut buckets: BTreeMap<(i32, u32), MonthBucket> = BTreeMap::new();

    for record in records {
        let Some(created) = record.created_at else {
            continue;
        };
        let key = (created.year(), created.month());
        let bucket = buckets.entry(key).or_insert_with(|| MonthBucket {
            month: month_label(key.0, key.1),
            submissions: 0,
            approved: 0,
            rejected: 0,
        });
        bucket.submissions += 1;
        match record.status {
            Status::Approved => bucket.approved += 1,
            Status::Rejected => bucket.rejected += 1,
            _ => {}
        }
    }

    buckets.into_values().collect()
}

fn month_label(year: i32, month: u32) -> String {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|date| date.format("%b %Y").to_string())
        .unwrap_or_else(|| format!("{:02} {}", month, year))
}

pub fn payment_split(records: &[ValuationRecord]) -> PaymentSplit {
    let mut split = PaymentSplit::default();
    for record in records {
        match record.payment {
            Payment::Yes => split.yes += 1,
            Payment::No => split.no += 1,
            Payment::Unspecified => split.unspecified += 1,
        }
    }
    split
}
