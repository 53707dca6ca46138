use std::io::{self, IsTerminal};
use std::os::unix::io::RawFd;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

use crate::config::Config;
use crate::job;

/// Signals a job-control shell ignores and its children take back.
pub const JOB_CONTROL_SIGNALS: [Signal; 5] = [
	Signal::SIGINT,
	Signal::SIGQUIT,
	Signal::SIGTSTP,
	Signal::SIGTTIN,
	Signal::SIGTTOU,
];

pub struct State {
	pub config: Config,
	pub job_table: job::JobTable,
	pub shell_pgid: Pid,
	/// The controlling terminal, when stdin is one.
	pub terminal: Option<RawFd>,
}

impl State {
	pub fn new(config: Config) -> State {
		let terminal = if io::stdin().is_terminal() { Some(libc::STDIN_FILENO) } else { None };
		State {
			config: config,
			job_table: job::JobTable::new(),
			shell_pgid: unistd::getpgrp(),
			terminal: terminal,
		}
	}

	pub fn is_interactive(&self) -> bool {
		self.terminal.is_some()
	}

	pub fn shows_prompt(&self) -> bool {
		self.is_interactive() && !self.config.no_prompt
	}

	/// Waits to be put in the foreground, then puts the shell in its own
	/// process group and takes the terminal.
	pub fn init_job_control(&mut self) -> nix::Result<()> {
		let fd = match self.terminal {
			Some(fd) => fd,
			None => return Ok(()),
		};
		loop {
			let pgrp = unistd::getpgrp();
			if job::tcgetpgrp(fd)? == pgrp {
				break;
			}
			signal::killpg(pgrp, Signal::SIGTTIN)?;
		}

		let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
		for &sig in JOB_CONTROL_SIGNALS.iter() {
			unsafe { signal::sigaction(sig, &ignore) }?;
		}

		let pid = unistd::getpid();
		// EPERM when the shell already leads a session
		if let Err(e) = unistd::setpgid(pid, pid) {
			debug!(%e, "setpgid on shell");
		}
		self.shell_pgid = unistd::getpgrp();
		job::tcsetpgrp(fd, self.shell_pgid)?;
		debug!(pgid = %self.shell_pgid, "took the terminal");
		Ok(())
	}

	/// Gives the terminal to a foreground job's group. Only the shell does
	/// this, so a child scheduled late cannot take it back after the reclaim.
	pub fn hand_over_terminal(&self, pgid: Pid) {
		if let Some(fd) = self.terminal {
			if let Err(e) = job::tcsetpgrp(fd, pgid) {
				warn!(%pgid, %e, "failed to hand over the terminal");
			}
		}
	}

	/// Hands the terminal back to the shell's own group.
	pub fn reclaim_terminal(&self) {
		if let Some(fd) = self.terminal {
			if let Err(e) = job::tcsetpgrp(fd, self.shell_pgid) {
				warn!(%e, "failed to reclaim the terminal");
			}
		}
	}
}
