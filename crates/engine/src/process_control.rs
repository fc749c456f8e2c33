//! Suspend and resume of encoder processes.

use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

/// Host capability to freeze and thaw a running process.
pub trait ProcessControl: Send + Sync {
    /// Stop the process without terminating it. Returns false if it could not be signalled.
    fn suspend(&self, pid: u32) -> bool;
    /// Continue a stopped process. Returns false if it could not be signalled.
    fn resume(&self, pid: u32) -> bool;
}

/// Sends SIGSTOP/SIGCONT through sysinfo.
///
/// Stop/Continue are not available on Windows, where every call reports
/// failure and the process keeps running.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessControl;

impl SysinfoProcessControl {
    fn signal(&self, pid: u32, signal: Signal) -> bool {
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        sys.process(pid)
            .and_then(|process| process.kill_with(signal))
            .unwrap_or(false)
    }
}

impl ProcessControl for SysinfoProcessControl {
    fn suspend(&self, pid: u32) -> bool {
        self.signal(pid, Signal::Stop)
    }

    fn resume(&self, pid: u32) -> bool {
        self.signal(pid, Signal::Continue)
    }
}
