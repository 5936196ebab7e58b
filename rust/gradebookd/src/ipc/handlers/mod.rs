pub mod assessments;
pub mod core;
pub mod fees;
pub mod grading;
pub mod parent;
pub mod reports;
pub mod setup;
