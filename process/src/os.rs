//! OS-level helpers for execution subprocesses.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    NotRunning,
    Signaled,
}

/// Put the child process in its own session (Unix only) so the entire process
/// group can be signalled via `killpg`, including anything the cell spawned.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut tokio::process::Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Linux-only: the child dies with the engine instead of lingering.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Send `signal` to the process group led by `pid`.
///
/// Children are started with [`set_new_session`], so pid == process group id.
#[cfg(unix)]
pub fn signal_process_group(pid: u32, signal: libc::c_int) -> std::io::Result<SignalOutcome> {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return Ok(SignalOutcome::NotRunning);
    };
    unsafe {
        if libc::killpg(pgid, signal) == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(SignalOutcome::NotRunning);
            }
            return Err(err);
        }
    }
    Ok(SignalOutcome::Signaled)
}
