pub mod pattern;
pub mod repo;
pub mod service;

pub use pattern::DropPatternRepo;
pub use repo::ReportRepo;
pub use service::{ReportService, SubmittedReport};
