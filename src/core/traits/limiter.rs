use crate::core::domain::ResourceLimits;

/// Applies OS-enforced ceilings to the calling process.
///
/// Implementations run inside the child between fork and exec, so they must
/// stick to async-signal-safe calls: no allocation, no locks, no logging.
pub trait ResourceLimiter: std::fmt::Debug + Send + Sync {
    fn apply(&self, limits: &ResourceLimits) -> std::io::Result<()>;
}
