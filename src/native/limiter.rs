use nix::sys::resource::{Resource, getrlimit, setrlimit};

use crate::{
    constants::CPU_HARD_LIMIT_GRACE_SECS,
    core::{domain::ResourceLimits, traits::limiter::ResourceLimiter},
};

/// Ceilings through `setrlimit(2)`, inherited across `exec`.
///
/// CPU time gets a soft limit (SIGXCPU) and a hard limit a few seconds
/// later (SIGKILL) for agents that catch SIGXCPU. Requested values are
/// clamped to the hard limits the parent already runs under.
#[derive(Debug, Default, Clone, Copy)]
pub struct RlimitLimiter;

impl ResourceLimiter for RlimitLimiter {
    fn apply(&self, limits: &ResourceLimits) -> std::io::Result<()> {
        if let Some(cpu) = limits.cpu_time_secs {
            set_clamped(
                Resource::RLIMIT_CPU,
                cpu,
                cpu.saturating_add(CPU_HARD_LIMIT_GRACE_SECS),
            )?;
        }
        if let Some(memory) = limits.memory_bytes {
            set_clamped(Resource::RLIMIT_AS, memory, memory)?;
        }
        Ok(())
    }
}

fn set_clamped(resource: Resource, soft: u64, hard: u64) -> std::io::Result<()> {
    let (_, current_hard) = getrlimit(resource).map_err(std::io::Error::from)?;
    let hard = hard.min(current_hard);
    let soft = soft.min(hard);
    setrlimit(resource, soft, hard).map_err(std::io::Error::from)
}
