pub mod config;
pub mod execution;
pub mod history;
pub mod inventory;
pub mod models;
pub mod orchestration;
pub mod outcome;
pub mod persistence;
pub mod plan;
pub mod scan_parser;
pub mod sqlite;
