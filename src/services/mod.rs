// Service exports
pub mod diagram;
pub mod report;

pub use diagram::render_dot;
pub use report::{read_report, write_first_case, write_report, JsonReport, ReportError};
