pub mod report;
pub mod transcript;
