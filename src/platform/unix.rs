use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but owned by another user.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

pub fn force_kill(pid: u32) -> anyhow::Result<()> {
    let raw = i32::try_from(pid)?;
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            debug!(pid, "sent SIGKILL");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            debug!(pid, "process already exited");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("kill -9 {} failed: {}", pid, e)),
    }
}
