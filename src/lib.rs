pub mod asset;
pub mod catalog;
pub mod config;
pub mod datetime;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod pool;
pub mod provider;
pub mod queue;
pub mod reconcile;
pub mod region;
pub mod run;
pub mod sizing;
pub mod transfer;
