//! CPU affinity for spawned instances
//!
//! Used when no external multi-task manager is available: the child process
//! restricts itself to its pool between `fork` and `exec`.

/// Process affinity helper
pub struct ThreadAffinity;

impl ThreadAffinity {
    /// Restrict the calling thread (and anything it execs) to `cpus`
    ///
    /// Does not allocate, so it is safe to call from a `pre_exec` hook.
    #[cfg(target_os = "linux")]
    pub fn pin_to_cpus(cpus: &[usize]) -> std::io::Result<()> {
        use std::mem::MaybeUninit;

        if cpus.is_empty() {
            return Ok(());
        }

        unsafe {
            let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed().assume_init();
            libc::CPU_ZERO(&mut set);

            for &cpu in cpus {
                if cpu >= libc::CPU_SETSIZE as usize {
                    return Err(std::io::Error::from_raw_os_error(libc::EINVAL));
                }
                libc::CPU_SET(cpu, &mut set);
            }

            let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);

            if result == 0 {
                Ok(())
            } else {
                Err(std::io::Error::last_os_error())
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn pin_to_cpus(_cpus: &[usize]) -> std::io::Result<()> {
        // Affinity is left to the OS on this platform
        Ok(())
    }

    /// CPUs the calling thread may currently run on
    #[cfg(target_os = "linux")]
    pub fn current_cpus() -> std::io::Result<Vec<usize>> {
        use std::mem::MaybeUninit;

        unsafe {
            let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed().assume_init();
            let result = libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set);
            if result != 0 {
                return Err(std::io::Error::last_os_error());
            }

            Ok((0..libc::CPU_SETSIZE as usize)
                .filter(|&cpu| libc::CPU_ISSET(cpu, &set))
                .collect())
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn current_cpus() -> std::io::Result<Vec<usize>> {
        Ok((0..num_cpus::get()).collect())
    }
}
