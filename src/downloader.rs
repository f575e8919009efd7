#![cfg(not(tarpaulin_include))]

use crate::error::{Error, Result};
use crate::record::ValuationRecord;
use crate::valuation::{ROUND_FIGURE, format_amount, parse_amount};

/// Column titles shared by every export format
pub const EXPORT_HEADERS: [&str; 14] = [
    "Unique ID",
    "Form",
    "Status",
    "Client",
    "Bank",
    "City",
    "Engineer",
    "Mobile",
    "Address",
    "Payment",
    "Created At",
    "Last Updated",
    "Round Figure",
    "Manager Feedback",
];

/// Flatten one record into export cells, in [`EXPORT_HEADERS`] order.
fn export_row(record: &ValuationRecord) -> Vec<String> {
    let timestamp = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default()
    };
    let round_figure = record
        .pdf_details
        .get(ROUND_FIGURE)
        .and_then(parse_amount)
        .map(format_amount)
        .unwrap_or_default();

    vec![
        record.unique_id.clone().unwrap_or_default(),
        record.form_type.slug().to_string(),
        record.status.as_str().to_string(),
        record.client_name.clone(),
        record.bank_name.clone(),
        record.city.clone(),
        record.engineer_name.clone(),
        record.mobile_number.clone(),
        record.address.clone(),
        record.payment.as_str().to_string(),
        timestamp(record.created_at),
        timestamp(record.effective_timestamp()),
        round_figure,
        record.manager_feedback.clone().unwrap_or_default(),
    ]
}

/// Convert records to CSV format
///
/// Exports the dashboard list as CSV (Comma-Separated Values):
/// - The first row holds the column titles from [`EXPORT_HEADERS`]
/// - Each following row is one record
/// - Quoting of commas, quotes and newlines is handled by the `csv` writer
///
/// # Arguments
/// * `records` - The records to export, in display order
///
/// # Returns
/// * `Result<String>` - CSV content as a string or an error
///
/// # Examples
/// ```
/// use valuation_desk::downloader::to_csv;
/// use valuation_desk::record::{FormType, ValuationRecord};
///
/// let records = vec![ValuationRecord::new("VAL-1", FormType::BomFlat)];
/// let csv = to_csv(&records).unwrap();
/// assert!(csv.starts_with("Unique ID,Form,Status"));
/// ```
pub fn to_csv(records: &[ValuationRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_HEADERS)?;
    for record in records {
        writer.write_record(export_row(record))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::Export(e.to_string()))
}

/// Convert records to XLSX format
///
/// Exports the dashboard list to an Excel workbook using the rust_xlsxwriter library.
/// The round figure column is written as a number so it can be summed in Excel;
/// every other column is text.
///
/// # Arguments
/// * `records` - The records to export, in display order
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content as bytes or an error
#[cfg(feature = "web")]
pub fn to_xlsx(records: &[ValuationRecord]) -> Result<Vec<u8>> {
    use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};

    const ROUND_FIGURE_COLUMN: usize = 12;
    let xlsx = |e: XlsxError| Error::Export(e.to_string());

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name("Valuations").map_err(xlsx)?;

    for (col, title) in EXPORT_HEADERS.iter().enumerate() {
        worksheet.write_string(0, col as u16, *title).map_err(xlsx)?;
    }

    for (index, record) in records.iter().enumerate() {
        let row = (index + 1) as u32;
        for (col, value) in export_row(record).iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            match value.parse::<f64>() {
                Ok(number) if col == ROUND_FIGURE_COLUMN => {
                    worksheet.write_number(row, col as u16, number).map_err(xlsx)?;
                }
                _ => {
                    worksheet.write_string(row, col as u16, value.as_str()).map_err(xlsx)?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().map_err(xlsx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FormType, Status};
    use serde_json::json;

    fn sample() -> ValuationRecord {
        let mut record = ValuationRecord::new("VAL-1", FormType::UbiShop);
        record.client_name = "Shah, Rao & Co".to_string();
        record.status = Status::Approved;
        record.pdf_details.insert(ROUND_FIGURE.into(), json!("1,24,000"));
        record
    }

    #[test]
    fn csv_quotes_commas() {
        let csv = to_csv(&[sample()]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap().split(',').count(), EXPORT_HEADERS.len());
        let row = lines.next().unwrap();
        assert!(row.starts_with("VAL-1,ubishop,approved,\"Shah, Rao & Co\","));
        assert!(row.contains(",124000,"));
    }

    #[test]
    fn csv_of_nothing_is_just_headers() {
        assert_eq!(to_csv(&[]).unwrap().lines().count(), 1);
    }

    #[cfg(feature = "web")]
    #[test]
    fn xlsx_is_a_zip() {
        let bytes = to_xlsx(&[sample()]).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
