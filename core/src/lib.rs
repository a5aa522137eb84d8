pub mod catalog;
pub mod db;
pub mod error;
pub mod gap_filler;
pub mod import;
pub mod models;
pub mod mutate;
pub mod persist;
pub mod planner;
pub mod selector;
pub mod service;
pub mod shopping;
