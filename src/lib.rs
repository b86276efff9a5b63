pub mod augment;
pub mod backend;
pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod parallel;
pub mod pretrained;
pub mod schedule;
pub mod tasks;
pub mod training;
