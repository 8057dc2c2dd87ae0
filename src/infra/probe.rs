//! Resident memory via `sysinfo`, cumulative CPU time via `getrusage`.

use std::sync::Mutex;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::app::ports::{ResourceProbe, ResourceSnapshot};

pub struct SysinfoProbe {
    pid: Pid,
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: Mutex::new(System::new()),
        }
    }

    /// RSS of this process, plus every live descendant when `include_children`.
    fn rss_bytes(&self, include_children: bool) -> u64 {
        let mut system = match self.system.lock() {
            Ok(system) => system,
            Err(poisoned) => poisoned.into_inner(),
        };
        let refresh = ProcessRefreshKind::new().with_memory();

        if !include_children {
            system.refresh_processes_specifics(ProcessesToUpdate::Some(&[self.pid]), true, refresh);
            return system.process(self.pid).map_or(0, |process| process.memory());
        }

        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);
        system
            .processes()
            .values()
            .filter(|process| descends_from(&system, process.pid(), self.pid))
            .map(|process| process.memory())
            .sum()
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn snapshot(&self, include_children: bool) -> ResourceSnapshot {
        let cpu_time = if include_children {
            cpu_time(Who::Process).zip(cpu_time(Who::Children)).map(|(own, reaped)| own + reaped)
        } else {
            cpu_time(Who::Process)
        };
        ResourceSnapshot {
            rss_bytes: self.rss_bytes(include_children),
            cpu_time,
        }
    }
}

fn descends_from(system: &System, pid: Pid, root: Pid) -> bool {
    let mut current = Some(pid);
    // bounded walk; pid reuse can make parent chains cyclic
    for _ in 0..64 {
        match current {
            Some(pid) if pid == root => return true,
            Some(pid) => current = system.process(pid).and_then(|process| process.parent()),
            None => return false,
        }
    }
    false
}

#[derive(Debug, Clone, Copy)]
enum Who {
    Process,
    /// Terminated and waited-for children only.
    Children,
}

#[cfg(unix)]
fn cpu_time(who: Who) -> Option<Duration> {
    let who = match who {
        Who::Process => libc::RUSAGE_SELF,
        Who::Children => libc::RUSAGE_CHILDREN,
    };
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: `usage` is a valid, writable rusage; getrusage only writes to it.
    let rc = unsafe { libc::getrusage(who, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: getrusage returned 0, so the struct is initialised.
    let usage = unsafe { usage.assume_init() };
    Some(timeval(usage.ru_utime) + timeval(usage.ru_stime))
}

#[cfg(not(unix))]
fn cpu_time(_who: Who) -> Option<Duration> {
    None
}

#[cfg(unix)]
fn timeval(tv: libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}
