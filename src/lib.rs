pub mod bridge;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod entity_state;
pub mod errors;
pub mod models;
pub mod utils;
pub mod web;
