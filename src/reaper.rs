//! SIGCHLD handling.
//!
//! The handler collects at most one terminated child per notification and
//! records it in a fixed ring of atomics. Everything else (updating the job
//! table, sweeping children whose notifications were coalesced, logging)
//! happens in `drain`, which the read-eval loop calls before each prompt.
//!
//! While a synchronous wait is in flight SIGCHLD is blocked with `Blocked`, so
//! that wait is the only path that can collect its pid.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::job::JobTable;

const RING_SIZE: usize = 64;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY: AtomicI32 = AtomicI32::new(0);

static REAPED_PIDS: [AtomicI32; RING_SIZE] = [EMPTY; RING_SIZE];
static REAPED_CODES: [AtomicI32; RING_SIZE] = [EMPTY; RING_SIZE];
// HEAD is only advanced by the handler, TAIL only by `drain`
static HEAD: AtomicUsize = AtomicUsize::new(0);
static TAIL: AtomicUsize = AtomicUsize::new(0);

fn record(pid: Pid, code: i32) {
	let head = HEAD.load(Ordering::Relaxed);
	if head.wrapping_sub(TAIL.load(Ordering::Acquire)) >= RING_SIZE {
		// full; the next drain finds the pid gone and marks it reaped
		return;
	}
	let slot = head % RING_SIZE;
	REAPED_PIDS[slot].store(pid.as_raw(), Ordering::Relaxed);
	REAPED_CODES[slot].store(code, Ordering::Relaxed);
	HEAD.store(head.wrapping_add(1), Ordering::Release);
}

fn take() -> Vec<(Pid, i32)> {
	let head = HEAD.load(Ordering::Acquire);
	let mut tail = TAIL.load(Ordering::Relaxed);
	let mut reaped = Vec::with_capacity(head.wrapping_sub(tail));
	while tail != head {
		let slot = tail % RING_SIZE;
		reaped.push((
			Pid::from_raw(REAPED_PIDS[slot].load(Ordering::Relaxed)),
			REAPED_CODES[slot].load(Ordering::Relaxed),
		));
		tail = tail.wrapping_add(1);
	}
	TAIL.store(tail, Ordering::Release);
	reaped
}

extern "C" fn on_sigchld(_: libc::c_int) {
	let saved = Errno::last_raw();
	match wait::waitpid(None, Some(WaitPidFlag::WNOHANG)) {
		Ok(WaitStatus::Exited(pid, code)) => record(pid, code),
		Ok(WaitStatus::Signaled(pid, sig, _)) => record(pid, 128 + sig as i32),
		_ => {},
	}
	Errno::set_raw(saved);
}

pub fn install() -> nix::Result<()> {
	let action = SigAction::new(
		SigHandler::Handler(on_sigchld),
		SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
		SigSet::empty(),
	);
	unsafe { signal::sigaction(Signal::SIGCHLD, &action) }?;
	Ok(())
}

/// Keeps SIGCHLD blocked for as long as it lives. Nesting restores the
/// mask that was in place before.
pub struct Blocked {
	previous: SigSet,
}

impl Blocked {
	pub fn new() -> Blocked {
		let mut set = SigSet::empty();
		set.add(Signal::SIGCHLD);
		let mut previous = SigSet::empty();
		if let Err(e) = signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous)) {
			warn!(%e, "failed to block SIGCHLD");
		}
		Blocked { previous: previous }
	}
}

impl Drop for Blocked {
	fn drop(&mut self) {
		let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
	}
}

/// Folds reaps recorded by the handler into `table`, then collects any
/// tracked child that changed state without a notification of its own.
pub fn drain(table: &mut JobTable) {
	let _blocked = Blocked::new();
	for (pid, code) in take() {
		debug!(%pid, code, "reaped");
		table.mark_reaped(pid);
	}
	let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
	for pid in table.live() {
		match wait::waitpid(pid, Some(flags)) {
			Ok(WaitStatus::StillAlive) => {},
			Ok(status) => {
				debug!(?status, "swept");
				table.update(status);
			},
			Err(Errno::ECHILD) => table.mark_reaped(pid),
			Err(e) => warn!(%pid, %e, "waitpid"),
		}
	}
	debug!(tracked = table.len(), "drained");
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::job::State;

	#[test]
	fn drain_applies_recorded_reaps() {
		let mut table = JobTable::new();
		// never a child of the test process, so the sweep sees ECHILD
		let stranger = Pid::from_raw(1);
		table.insert(stranger, stranger);

		let gone = Pid::from_raw(i32::MAX - 1);
		table.insert(gone, gone);
		record(gone, 0);

		drain(&mut table);
		assert_eq!(table.get(gone).map(|pr| pr.state), Some(State::Reaped));
		assert_eq!(table.get(stranger).map(|pr| pr.state), Some(State::Reaped));
		assert!(take().is_empty());
	}

	#[test]
	fn blocked_guard_restores_mask() {
		let before = SigSet::thread_get_mask().unwrap();
		{
			let _outer = Blocked::new();
			{
				let _inner = Blocked::new();
			}
			assert!(SigSet::thread_get_mask().unwrap().contains(Signal::SIGCHLD));
		}
		assert_eq!(SigSet::thread_get_mask().unwrap().contains(Signal::SIGCHLD), before.contains(Signal::SIGCHLD));
	}
}
