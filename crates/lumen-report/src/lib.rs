//! Response parsing and reporting for Lumen

mod parser;
mod report;
mod ui;


pub use parser::{ReportMarkers, ResponseParser};
pub use report::{
    AnalysisDocument, ReportPaths, SUMMARY_FILE_NAME, format_analysis_report,
    generate_summary_report, write_image_reports, write_summary,
};
pub use ui::{display_banner, echo_chunk, print_batch_totals, print_image_header, print_outcome};

// Re-export core types
pub use lumen_core::{AnalysisRecord, Error, Result};
