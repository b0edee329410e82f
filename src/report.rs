//! Timestamped CSV report of a finished batch.

use chrono::{DateTime, Local};
use csv::Writer;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::TransactionRecord;

pub const PTN_NOT_GENERATED: &str = "Not Generated";

/// One spreadsheet line per terminal record.
#[derive(Debug, Serialize)]
struct ReportRow {
    #[serde(rename = "Service ID")]
    service_id: String,
    #[serde(rename = "Amount")]
    amount: u64,
    #[serde(rename = "Service Type")]
    service_type: String,
    #[serde(rename = "Service Number")]
    service_number: String,
    #[serde(rename = "PTN")]
    ptn: String,
    #[serde(rename = "Transaction ID")]
    transaction_id: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Error Message")]
    error_message: String,
    #[serde(rename = "Execution Time (s)")]
    execution_secs: String,
}

impl From<&TransactionRecord> for ReportRow {
    fn from(record: &TransactionRecord) -> Self {
        let request = record.request();
        ReportRow {
            service_id: request.service_id.clone(),
            amount: request.amount,
            service_type: request.service_type.to_string(),
            service_number: request.service_number.clone(),
            ptn: record.ptn().unwrap_or(PTN_NOT_GENERATED).to_string(),
            transaction_id: request.transaction_id.clone(),
            status: record.state().to_string(),
            error_message: record
                .error()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
            execution_secs: record
                .execution_time()
                .map(|d| format!("{:.2}", d.as_secs_f64()))
                .unwrap_or_default(),
        }
    }
}

pub fn report_file_name(at: DateTime<Local>) -> String {
    format!("s3p_report_{}.csv", at.format("%Y%m%d_%H%M%S"))
}

/// Writes `records` to a new report in `dir` and returns its path.
pub fn write_report(dir: &Path, records: &[TransactionRecord]) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(Local::now()));

    let mut writer = Writer::from_path(&path)?;
    for record in records {
        writer.serialize(ReportRow::from(record))?;
    }
    if records.is_empty() {
        writer.write_record([
            "Service ID",
            "Amount",
            "Service Type",
            "Service Number",
            "PTN",
            "Transaction ID",
            "Status",
            "Error Message",
            "Execution Time (s)",
        ])?;
    }
    writer.flush()?;

    tracing::info!(path = %path.display(), rows = records.len(), "report written");
    Ok(path)
}
