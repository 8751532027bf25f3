//! Core affinity for TX workers.

use std::io;

/// Binds the calling OS thread to one CPU.
pub trait AffinityPinner: Send + Sync {
    fn pin_current(&self, core: usize) -> io::Result<()>;
}

/// `sched_setaffinity(0, ...)` on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedAffinity;

impl AffinityPinner for SchedAffinity {
    fn pin_current(&self, core: usize) -> io::Result<()> {
        if core >= libc::CPU_SETSIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("core {core} exceeds CPU_SETSIZE"),
            ));
        }
        // SAFETY: cpu_set_t is plain data; CPU_SET is bounds-checked above and
        // pid 0 targets the calling thread.
        let ret = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(core, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        tracing::debug!(core, "pinned thread");
        Ok(())
    }
}
