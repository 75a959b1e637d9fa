pub mod catalog;
pub mod igdb;
pub mod models;
pub mod reconcile;
pub mod sources;
pub mod steam;
