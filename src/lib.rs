//! GameFinder catalog sync: upstream adapters, reconciliation, and the jobs
//! that keep the catalog current.

pub mod api;
pub mod database_ops;
pub mod jobs;
pub mod logging;
pub mod normalization;
pub mod orchestrator;
pub mod scheduler;

pub mod util {
    pub mod db;
    pub mod env;
}

#[cfg(test)]
mod test_support;
