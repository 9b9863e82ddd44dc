//! Best-effort placement of compute units on processors. Failing to pin is
//! never an error; the OS scheduler is trusted to cope.

use std::{num::NonZeroUsize, thread};

/// Processors this process may run on, in ascending order. Never empty.
#[cfg(target_os = "linux")]
pub fn allowed_processors() -> Vec<usize> {
    // SAFETY: cpu_set_t is a plain bitmask, all zeroes is the empty set.
    let allowed = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) == 0 {
            (0..libc::CPU_SETSIZE as usize)
                .filter(|&cpu| libc::CPU_ISSET(cpu, &set))
                .collect()
        } else {
            Vec::new()
        }
    };
    if allowed.is_empty() {
        (0..available_processors()).collect()
    } else {
        allowed
    }
}

#[cfg(not(target_os = "linux"))]
pub fn allowed_processors() -> Vec<usize> {
    (0..available_processors()).collect()
}

pub fn available_processors() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Pins the calling thread to `cpu`. Returns whether the OS accepted it.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> bool {
    if cpu >= libc::CPU_SETSIZE as usize {
        return false;
    }
    // SAFETY: as above; `cpu` is within the set's bounds.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn there_is_always_a_processor() {
        assert!(!allowed_processors().is_empty());
        assert!(available_processors() >= 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pins_a_fresh_thread() {
        let cpu = allowed_processors()[0];
        let pinned = thread::spawn(move || pin_current_thread(cpu)).join().unwrap();
        assert!(pinned);
        assert!(!pin_current_thread(libc::CPU_SETSIZE as usize));
    }
}
