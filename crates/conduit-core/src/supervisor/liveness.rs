//! Whether a supervised pid is still the process we spawned
//!
//! A bare pid is not proof of identity: after a process exits the kernel may
//! hand its pid to an unrelated process. Liveness checks therefore compare the
//! kernel start time recorded at spawn against the current one.

use super::types::ProcessMetrics;

/// Start time of a process in clock ticks since boot
pub type Fingerprint = u64;

#[cfg(target_os = "linux")]
fn stat(pid: u32) -> Option<procfs::process::Stat> {
    let pid = i32::try_from(pid).ok()?;
    procfs::process::Process::new(pid).ok()?.stat().ok()
}

/// Identity of the process currently holding `pid`
#[cfg(target_os = "linux")]
pub fn fingerprint(pid: u32) -> Option<Fingerprint> {
    stat(pid).map(|stat| stat.starttime)
}

#[cfg(not(target_os = "linux"))]
pub fn fingerprint(_pid: u32) -> Option<Fingerprint> {
    None
}

/// Whether `pid` is alive and, when known, still the same incarnation
///
/// Zombies count as dead: they have exited and only wait to be reaped.
pub fn is_alive(pid: u32, expected: Option<Fingerprint>) -> bool {
    if !signal_zero(pid) {
        return false;
    }

    match state_and_start(pid) {
        Some((state, _)) if matches!(state, 'Z' | 'X') => false,
        Some((_, start)) => expected.is_none_or(|fp| fp == start),
        None => true,
    }
}

#[cfg(target_os = "linux")]
fn state_and_start(pid: u32) -> Option<(char, Fingerprint)> {
    stat(pid).map(|stat| (stat.state, stat.starttime))
}

#[cfg(not(target_os = "linux"))]
fn state_and_start(_pid: u32) -> Option<(char, Fingerprint)> {
    None
}

#[cfg(unix)]
fn signal_zero(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(raw), None).is_ok()
}

#[cfg(not(unix))]
fn signal_zero(_pid: u32) -> bool {
    true
}

/// Sample CPU time, resident memory and thread count
#[cfg(target_os = "linux")]
pub fn sample(pid: u32) -> Option<ProcessMetrics> {
    let stat = stat(pid)?;
    let ticks = procfs::ticks_per_second().max(1);
    Some(ProcessMetrics {
        cpu_seconds: (stat.utime + stat.stime) as f64 / ticks as f64,
        memory_bytes: stat.rss * procfs::page_size(),
        threads: u32::try_from(stat.num_threads).unwrap_or(0),
    })
}

#[cfg(not(target_os = "linux"))]
pub fn sample(_pid: u32) -> Option<ProcessMetrics> {
    None
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::Duration;

    #[test]
    fn test_own_process_is_alive_and_sampled() {
        let pid = std::process::id();
        let fp = fingerprint(pid);
        assert!(fp.is_some());
        assert!(is_alive(pid, fp));
        assert!(is_alive(pid, None));
        assert!(!is_alive(pid, fp.map(|f| f + 1)));

        let metrics = sample(pid).unwrap();
        assert!(metrics.memory_bytes > 0);
        assert!(metrics.threads >= 1);
    }

    #[test]
    fn test_unreaped_child_is_not_alive() {
        let mut child = Command::new("true").stdout(Stdio::null()).spawn().unwrap();
        let pid = child.id();
        let fp = fingerprint(pid);

        // The child stays a zombie until wait() below.
        let mut zombie = false;
        for _ in 0..200 {
            if stat(pid).is_some_and(|s| s.state == 'Z') {
                zombie = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(zombie);
        assert!(!is_alive(pid, fp));

        child.wait().unwrap();
        assert!(!is_alive(pid, fp));
    }

    #[test]
    fn test_unknown_pid_is_not_alive() {
        assert!(!is_alive(u32::MAX, None));
        assert!(fingerprint(u32::MAX).is_none());
        assert!(sample(u32::MAX).is_none());
    }
}
