pub mod executor;
pub mod limiter;
