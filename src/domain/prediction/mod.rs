//! Prediction domain - ranking probabilities against labels and exporting them

mod export;
mod report;

pub use export::{to_csv, CSV_CONTENT_TYPE, CSV_FILE_NAME};
pub use report::{argmax, format_percent, ClassificationReport, RankedPrediction};
