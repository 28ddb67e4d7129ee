pub mod config;
pub mod dnanexus;
pub mod domain;
pub mod error;
pub mod import;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod output;
pub mod pulsar;
pub mod reconcile;
pub mod resolve;
pub mod results;
