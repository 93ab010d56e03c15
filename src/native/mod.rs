/// Native module runs agents as plain child processes of the service,
/// enforcing limits through syscalls instead of a container runtime.
pub mod executor;
pub mod limiter;
