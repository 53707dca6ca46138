use std::convert::Infallible;
use std::ffi::{self, CString};
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{self, ForkResult, Pid};
use thiserror::Error;
use tracing::debug;

use crate::builtin;
use crate::global;
use crate::job;
use crate::reaper;
use crate::types::*;

#[derive(Debug, Error)]
pub enum EvalError {
	#[error("fork failed: {0}")]
	Launch(#[source] nix::Error),
	#[error("pipe failed: {0}")]
	Pipe(#[source] nix::Error),
	#[error("wait failed: {0}")]
	Wait(#[source] nix::Error),
	#[error("argument contains a nul byte")]
	Nul(#[from] ffi::NulError),
}

enum Launched {
	Builtin(Flow),
	Spawned(Pid),
}

fn redirect(fd: Option<&OwnedFd>, target: RawFd) -> nix::Result<()> {
	if let Some(fd) = fd {
		unistd::dup2(fd.as_raw_fd(), target)?;
	}
	Ok(())
}

fn reset_signals() {
	let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
	for &sig in global::JOB_CONTROL_SIGNALS.iter().chain(&[Signal::SIGCHLD]) {
		let _ = unsafe { signal::sigaction(sig, &default) };
	}
	let mut set = SigSet::empty();
	set.add(Signal::SIGCHLD);
	let _ = signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None);
}

fn do_exec_segment(argv: &[CString], input: Option<&OwnedFd>, output: Option<&OwnedFd>) -> nix::Result<Infallible> {
	redirect(input, libc::STDIN_FILENO)?;
	redirect(output, libc::STDOUT_FILENO)?;
	// every pipe end was opened O_CLOEXEC, so exec drops the ones not dup'd
	unistd::execvp(&argv[0], argv)
}

fn exec_segment(argv: &[CString], input: Option<&OwnedFd>, output: Option<&OwnedFd>) -> ! {
	reset_signals();

	let name = argv[0].to_string_lossy();
	let s = match do_exec_segment(argv, input, output) {
		Ok(never) => match never {},
		Err(Errno::ENOENT) => {
			eprintln!("mysh: command not found: {}", name);
			127
		},
		Err(e) => {
			eprintln!("mysh: {}: {}", name, e);
			126
		},
	};
	unsafe { libc::_exit(s) }
}

fn acknowledge(state: &global::State, mode: Mode, pid: Pid, pgid: Pid) {
	let line = match mode {
		Mode::Foreground => format!("Command executed by pid {}", pid),
		Mode::Background => format!("Command executed by pid {} (pgid {}) in background", pid, pgid),
	};
	if state.is_interactive() {
		println!("\x1b[32m{}\x1b[0m", line);
	} else {
		println!("{}", line);
	}
}

/// Runs a builtin in the shell, or forks and execs the segment's program
/// with `input`/`output` as its stdin/stdout (`None` keeps the shell's own).
fn launch_segment(state: &mut global::State, segment: &mut Segment, mode: Mode,
                  input: Option<&OwnedFd>, output: Option<&OwnedFd>,
                  job_builder: &mut job::JobBuilder) -> Result<Launched, EvalError> {
	if let Some(builtin) = builtin::match_builtin(segment.name()) {
		debug!(name = %String::from_utf8_lossy(segment.name()), "builtin");
		return Ok(Launched::Builtin(builtin(state, segment.arguments())));
	}

	let argv = segment.args.iter().map(|&a| CString::new(a)).collect::<Result<Vec<CString>, _>>()?;
	// anything still buffered would be written twice
	let _ = io::stdout().flush();

	match job_builder.push_fork().map_err(EvalError::Launch)? {
		ForkResult::Parent { child } => {
			let pgid = job_builder.pgid().unwrap_or(child);
			segment.pid = Some(child);
			segment.pgid = Some(pgid);
			state.job_table.insert(child, pgid);
			debug!(pid = %child, %pgid, ?argv, ?mode,
			       stdin = ?input.map(|fd| fd.as_raw_fd()), stdout = ?output.map(|fd| fd.as_raw_fd()),
			       "launched");
			acknowledge(state, mode, child, pgid);
			Ok(Launched::Spawned(child))
		},
		ForkResult::Child => exec_segment(&argv, input, output),
	}
}

/// Launches every segment left to right. Each pipe end is dropped, and so
/// closed in the shell, as soon as the segment using it has been launched.
/// A foreground job gets the terminal right after its leader is forked,
/// before any later segment exists.
fn spawn_segments(state: &mut global::State, pipeline: &mut Pipeline,
                  job_builder: &mut job::JobBuilder) -> Result<Flow, EvalError> {
	let mode = pipeline.mode;
	let last = pipeline.segments.len() - 1;
	let mut flow = Flow::Continue;
	let mut input: Option<OwnedFd> = None;
	for (i, segment) in pipeline.segments.iter_mut().enumerate() {
		let (next_input, output) = if i < last {
			let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(EvalError::Pipe)?;
			(Some(read), Some(write))
		} else {
			(None, None)
		};
		match launch_segment(state, segment, mode, input.as_ref(), output.as_ref(), job_builder)? {
			Launched::Builtin(Flow::Terminate) => { flow = Flow::Terminate; },
			Launched::Builtin(Flow::Continue) => {},
			Launched::Spawned(pid) => {
				debug!(%pid, segment = i, "spawned");
				if mode == Mode::Foreground && job_builder.pgid() == Some(pid) {
					state.hand_over_terminal(pid);
				}
			},
		}
		drop(output);
		input = next_input;
	}
	Ok(flow)
}

fn wait_foreground(state: &mut global::State, pgid: Pid, last: Pid) -> Result<(), EvalError> {
	// a builtin earlier in the pipeline may have reclaimed it
	state.hand_over_terminal(pgid);
	if state.is_interactive() {
		// resumes a member stopped by SIGTTIN for reading before the handoff
		if let Err(e) = signal::killpg(pgid, Signal::SIGCONT) {
			debug!(%pgid, %e, "killpg SIGCONT");
		}
	}
	let status = state.job_table.wait(last);
	state.reclaim_terminal();
	debug!(pid = %last, ?status, "foreground done");
	status.map(|_| ()).map_err(EvalError::Wait)
}

/// Runs one pipeline. Returns `Flow::Terminate` only if `exit` ran in it.
pub fn eval(state: &mut global::State, mut pipeline: Pipeline) -> Result<Flow, EvalError> {
	assert!(!pipeline.segments.is_empty());

	// no reaping until the foreground wait below has collected its child
	let _blocked = reaper::Blocked::new();
	let mut job_builder = job::JobBuilder::new(pipeline.segments.len());
	let flow = match spawn_segments(state, &mut pipeline, &mut job_builder) {
		Ok(flow) => flow,
		Err(e) => {
			// a foreground child may already have taken the terminal
			state.reclaim_terminal();
			return Err(e);
		},
	};
	debug!(segments = ?pipeline.segments.iter().map(|s| (s.pid, s.pgid)).collect::<Vec<_>>(),
	       background = pipeline.is_background(), "pipeline launched");

	if !pipeline.is_background() && !job_builder.is_empty() {
		if let (Some(pgid), Some(last)) = (job_builder.pgid(), job_builder.last_pid()) {
			wait_foreground(state, pgid, last)?;
		}
	}
	Ok(flow)
}
