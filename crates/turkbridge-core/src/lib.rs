pub mod config;
pub mod marketplace;
pub mod models;
pub mod persistence;
pub mod sqlite;
pub mod sync;
