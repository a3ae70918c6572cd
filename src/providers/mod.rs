pub mod redis;
pub mod twitter;
