pub mod character;
pub mod config;
pub mod core;
pub mod memory;
pub mod models;
pub mod providers;
