// Library for tests to access modules

pub mod aggregation_worker;
pub mod backfill;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod metrics_repo;
pub mod models;
pub mod report;
pub mod retention;
pub mod routes;
pub mod sampler;
pub mod worker;
