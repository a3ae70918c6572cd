pub mod agent;
pub mod content;
pub mod interaction_scheduler;
pub mod post_scheduler;
pub mod rate_limit;
pub mod runtime;
pub mod send_queue;
pub mod thread;
pub mod traits;

#[cfg(test)]
mod tests;
