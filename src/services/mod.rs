pub mod cache;
pub mod export;
pub mod fields;
pub mod jobs;
pub mod lookup;
pub mod runner;
pub mod upload;
