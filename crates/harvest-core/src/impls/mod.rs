//! Port implementations.

pub mod csv_metrics;
pub mod file_credential;
pub mod static_credential;

pub use csv_metrics::CsvMetricsSink;
pub use file_credential::FileCredential;
pub use static_credential::StaticCredential;
