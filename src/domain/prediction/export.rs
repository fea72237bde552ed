//! CSV export of a ranked report

use csv::{Terminator, WriterBuilder};

use super::report::ClassificationReport;
use crate::domain::DomainError;

pub const CSV_FILE_NAME: &str = "predictions.csv";
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// `Class,Probability` table in display order, no index column
pub fn to_csv(report: &ClassificationReport) -> Result<String, DomainError> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer
        .write_record(["Class", "Probability"])
        .map_err(|e| DomainError::internal(format!("Failed to write CSV header: {}", e)))?;

    for row in &report.ranking {
        let probability = row.probability.to_string();
        writer
            .write_record([row.label.as_str(), probability.as_str()])
            .map_err(|e| DomainError::internal(format!("Failed to write CSV row: {}", e)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| DomainError::internal(format!("Failed to flush CSV: {}", e)))?;

    String::from_utf8(bytes).map_err(|e| DomainError::internal(format!("CSV is not UTF-8: {}", e)))
}
