use std::collections::{HashMap, VecDeque};
use std::os::unix::io::{BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use tracing::debug;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State { Running, Stopped, Reaped }

pub trait WaitStatusExt {
	fn state(self) -> State;
}

impl WaitStatusExt for WaitStatus {
	fn state(self) -> State {
		match self {
			WaitStatus::Exited(..) => State::Reaped,
			WaitStatus::Signaled(..) => State::Reaped,
			WaitStatus::Stopped(..) => State::Stopped,
			#[cfg(any(target_os = "linux", target_os = "android"))]
			WaitStatus::PtraceEvent(..) => State::Stopped,
			#[cfg(any(target_os = "linux", target_os = "android"))]
			WaitStatus::PtraceSyscall(..) => State::Stopped,
			WaitStatus::Continued(..) => State::Running,
			WaitStatus::StillAlive => State::Running,
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Process {
	pub pgid: Pid,
	pub state: State,
}

/// Reaped records kept for the "job not found" check; older ones are dropped.
pub const REAPED_KEPT: usize = 256;

/// Status of every child the shell has launched, keyed by pid.
///
/// Reaped entries stay until the pid is reused by a later launch or
/// `REAPED_KEPT` newer reaps push them out, so a job-control builtin can
/// tell a recently finished child from one still around.
#[derive(Debug, Default)]
pub struct JobTable {
	procs: HashMap<Pid, Process>,
	reaped: VecDeque<Pid>,
}

impl JobTable {
	pub fn new() -> JobTable {
		JobTable { procs: HashMap::new(), reaped: VecDeque::new() }
	}

	pub fn insert(&mut self, pid: Pid, pgid: Pid) {
		let old = self.procs.insert(pid, Process { pgid: pgid, state: State::Running });
		if old.map_or(false, |pr| pr.state == State::Reaped) {
			self.reaped.retain(|&p| p != pid);
		}
	}

	pub fn get(&self, pid: Pid) -> Option<&Process> {
		self.procs.get(&pid)
	}

	pub fn is_reaped(&self, pid: Pid) -> bool {
		self.get(pid).map_or(false, |pr| pr.state == State::Reaped)
	}

	pub fn len(&self) -> usize {
		self.procs.len()
	}

	/// Records a wait result. Unknown pids are ignored.
	pub fn update(&mut self, status: WaitStatus) -> Option<State> {
		let pid = status.pid()?;
		self.set_state(pid, status.state())
	}

	pub fn mark_reaped(&mut self, pid: Pid) {
		self.set_state(pid, State::Reaped);
	}

	fn set_state(&mut self, pid: Pid, state: State) -> Option<State> {
		let pr = self.procs.get_mut(&pid)?;
		let newly_reaped = state == State::Reaped && pr.state != State::Reaped;
		pr.state = state;
		if newly_reaped {
			self.reaped.push_back(pid);
			while self.reaped.len() > REAPED_KEPT {
				if let Some(old) = self.reaped.pop_front() {
					self.procs.remove(&old);
				}
			}
		}
		Some(state)
	}

	/// Pids not yet reaped.
	pub fn live(&self) -> Vec<Pid> {
		self.procs.iter().filter(|&(_, pr)| pr.state != State::Reaped).map(|(&pid, _)| pid).collect()
	}

	/// Blocks until `pid` stops or terminates. Callers keep SIGCHLD blocked
	/// so the reaper cannot collect the status first.
	pub fn wait(&mut self, pid: Pid) -> nix::Result<WaitStatus> {
		loop {
			match wait::waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
				Err(Errno::EINTR) => continue,
				Err(Errno::ECHILD) => {
					self.mark_reaped(pid);
					return Err(Errno::ECHILD);
				},
				Err(e) => return Err(e),
				Ok(status) => {
					debug!(?status, "wait returned");
					self.update(status);
					return Ok(status);
				},
			}
		}
	}
}

/// Forks the processes of one pipeline into a shared process group.
#[derive(Debug)]
pub struct JobBuilder {
	pgid: Option<Pid>,
	pids: Vec<Pid>,
}

impl JobBuilder {
	pub fn new(size_hint: usize) -> JobBuilder {
		JobBuilder { pgid: None, pids: Vec::with_capacity(size_hint) }
	}

	/// Both sides call setpgid so the group exists whichever runs first.
	/// The first child leads the group.
	pub fn push_fork(&mut self) -> nix::Result<ForkResult> {
		let r = unsafe { unistd::fork() }?;
		match r {
			ForkResult::Parent { child } => {
				let pgid = *self.pgid.get_or_insert(child);
				// EACCES once the child has exec'd: it already did this itself
				if let Err(e) = unistd::setpgid(child, pgid) {
					debug!(%child, %pgid, %e, "parent setpgid");
				}
				self.pids.push(child);
			},
			ForkResult::Child => {
				let pgid = self.pgid.unwrap_or(Pid::from_raw(0));
				let _ = unistd::setpgid(Pid::from_raw(0), pgid);
			},
		}
		Ok(r)
	}

	pub fn pgid(&self) -> Option<Pid> {
		self.pgid
	}

	pub fn last_pid(&self) -> Option<Pid> {
		self.pids.last().copied()
	}

	pub fn is_empty(&self) -> bool {
		self.pids.is_empty()
	}
}

fn terminal(fd: RawFd) -> BorrowedFd<'static> {
	// the terminal fd stays open for the life of the shell
	unsafe { BorrowedFd::borrow_raw(fd) }
}

pub fn tcsetpgrp(fd: RawFd, pgid: Pid) -> nix::Result<()> {
	unistd::tcsetpgrp(terminal(fd), pgid)
}

pub fn tcgetpgrp(fd: RawFd) -> nix::Result<Pid> {
	unistd::tcgetpgrp(terminal(fd))
}
