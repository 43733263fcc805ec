pub mod analysts;
pub mod cluster;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod tasks;
