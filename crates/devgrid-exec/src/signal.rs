//! Termination signals and their delivery.

use std::fmt;
use std::io;

/// Signals used to stop an agent, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopSignal {
    /// Polite interrupt. Both agents treat it as a graceful leave.
    Interrupt,
    Quit,
    Kill,
}

impl StopSignal {
    pub const ESCALATION: [StopSignal; 3] = [StopSignal::Interrupt, StopSignal::Quit, StopSignal::Kill];

    pub fn name(&self) -> &'static str {
        match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Quit => "SIGQUIT",
            StopSignal::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    fn as_nix(&self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            StopSignal::Interrupt => Signal::SIGINT,
            StopSignal::Quit => Signal::SIGQUIT,
            StopSignal::Kill => Signal::SIGKILL,
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ask the OS to deliver `signal` to `pid`.
///
/// `Ok` means the signal was accepted for delivery, not that the process
/// has exited.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: StopSignal) -> io::Result<()> {
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal.as_nix())
        .map_err(io::Error::from)
}
