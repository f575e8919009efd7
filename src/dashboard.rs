//! Filtering, sorting and pagination of the dashboard table.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::record::{FormType, Payment, Status, ValuationRecord};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    LastUpdated,
    ClientName,
    BankName,
    City,
    EngineerName,
    Status,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordQuery {
    pub status: Option<Status>,
    pub form_type: Option<FormType>,
    pub engineer: Option<String>,
    pub bank: Option<String>,
    pub city: Option<String>,
    pub payment: Option<Payment>,
    /// Case-insensitive match against client, id, bank, city, engineer,
    /// address and mobile number.
    pub search: Option<String>,
    pub sort_by: SortField,
    pub sort_dir: SortDirection,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub items: Vec<ValuationRecord>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub page_count: usize,
}

fn same_text(filter: &Option<String>, value: &str) -> bool {
    match filter.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(wanted) => value.trim().eq_ignore_ascii_case(wanted),
    }
}

impl RecordQuery {
    pub fn matches(&self, record: &ValuationRecord) -> bool {
        if self.status.is_some_and(|s| s != record.status) {
            return false;
        }
        if self.form_type.is_some_and(|ft| ft != record.form_type) {
            return false;
        }
        if self.payment.is_some_and(|p| p != record.payment) {
            return false;
        }
        if !same_text(&self.engineer, &record.engineer_name)
            || !same_text(&self.bank, &record.bank_name)
            || !same_text(&self.city, &record.city)
        {
            return false;
        }

        let needle = match self.search.as_deref().map(str::trim) {
            None | Some("") => return true,
            Some(needle) => needle.to_lowercase(),
        };
        [
            record.client_name.as_str(),
            record.unique_id.as_deref().unwrap_or_default(),
            record.bank_name.as_str(),
            record.city.as_str(),
            record.engineer_name.as_str(),
            record.address.as_str(),
            record.mobile_number.as_str(),
        ]
        .iter()
        .any(|haystack| haystack.to_lowercase().contains(&needle))
    }

    fn compare(&self, a: &ValuationRecord, b: &ValuationRecord) -> Ordering {
        let text = |x: &str, y: &str| x.to_lowercase().cmp(&y.to_lowercase());
        let ordering = match self.sort_by {
            SortField::CreatedAt => compare_missing_last(a.created_at, b.created_at),
            SortField::LastUpdated => {
                compare_missing_last(a.effective_timestamp(), b.effective_timestamp())
            }
            SortField::ClientName => text(&a.client_name, &b.client_name),
            SortField::BankName => text(&a.bank_name, &b.bank_name),
            SortField::City => text(&a.city, &b.city),
            SortField::EngineerName => text(&a.engineer_name, &b.engineer_name),
            SortField::Status => a.status.cmp(&b.status),
        };
        match self.sort_dir {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// Orders present values ascending; missing values sort as the smallest, so
/// they land last in the default descending view.
fn compare_missing_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Every record matching the filters, sorted (stable) but not paginated.
pub fn select<'a>(records: &'a [ValuationRecord], query: &RecordQuery) -> Vec<&'a ValuationRecord> {
    let mut rows: Vec<&ValuationRecord> = records.iter().filter(|r| query.matches(r)).collect();
    rows.sort_by(|a, b| query.compare(a, b));
    rows
}

/// Filter, sort and cut one page out of `records`.
pub fn apply_query(
    records: &[ValuationRecord],
    query: &RecordQuery,
    default_page_size: usize,
) -> RecordPage {
    let rows = select(records, query);

    let page_size = match query.page_size {
        0 => default_page_size.max(1),
        n => n,
    };
    let total = rows.len();
    let page_count = total.div_ceil(page_size).max(1);
    let page = query.page.clamp(1, page_count);

    let items = rows
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .cloned()
        .collect();

    RecordPage {
        items,
        total,
        page,
        page_size,
        page_count,
    }
}
