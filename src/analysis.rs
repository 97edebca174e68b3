pub mod analyzer;
pub mod dissector;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use analyzer::{analyze_file, analyze_reader};
pub use types::{top_n, AnalysisReport, Frequency, ProtocolLayer, TlsVersion, DEFAULT_TOP_LIMIT};
