use std::env;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};
use tracing::debug;

use crate::global;
use crate::job;
use crate::reaper;
use crate::types::Flow;

pub type Builtin = fn(&mut global::State, &[&[u8]]) -> Flow;

pub fn builtin_cd(_: &mut global::State, args: &[&[u8]]) -> Flow {
	let target = match args.first() {
		Some(path) => Some(PathBuf::from(OsStr::from_bytes(path))),
		None => env::var_os("HOME").map(PathBuf::from),
	};
	let changed = match target {
		Some(ref path) => env::set_current_dir(path).map_err(|e| debug!(?path, %e, "chdir")).is_ok(),
		None => false,
	};
	if !changed {
		eprintln!("cd: No such file or directory");
	}
	Flow::Continue
}

pub fn builtin_exit(_: &mut global::State, _: &[&[u8]]) -> Flow {
	println!("Goodbye!");
	Flow::Terminate
}

/// The pid a job-control builtin acts on, or `None` after reporting why
/// there is nothing to act on.
fn target_pid(state: &global::State, name: &str, args: &[&[u8]]) -> Option<Pid> {
	let arg = args.first().map(|a| String::from_utf8_lossy(a).into_owned()).unwrap_or_default();
	match arg.parse::<i32>() {
		// 0 and negative pids would address the shell's own group
		Ok(n) if n > 0 && !state.job_table.is_reaped(Pid::from_raw(n)) => Some(Pid::from_raw(n)),
		_ => {
			eprintln!("{}: job not found: {}", name, arg);
			None
		},
	}
}

fn report_wait(state: &mut global::State, name: &str, pid: Pid) {
	match state.job_table.wait(pid) {
		Ok(status) => debug!(%pid, ?status, "{} wait", name),
		Err(e) => debug!(%pid, %e, "{} wait", name),
	}
}

pub fn builtin_fg(state: &mut global::State, args: &[&[u8]]) -> Flow {
	let pid = match target_pid(state, "fg", args) {
		Some(pid) => pid,
		None => return Flow::Continue,
	};
	let _blocked = reaper::Blocked::new();
	debug!(%pid, launched_in = ?state.job_table.get(pid).map(|pr| pr.pgid), "fg");

	// a process launched without a group of its own becomes a leader
	let _ = unistd::setpgid(pid, pid);
	let handed = unistd::getpgid(Some(pid)).and_then(|pgid| match state.terminal {
		Some(fd) => job::tcsetpgrp(fd, pgid),
		None => Ok(()),
	});
	if let Err(e) = handed {
		debug!(%pid, %e, "fg");
		eprintln!("fg: job not found: {}", pid);
		return Flow::Continue;
	}

	match signal::kill(pid, Signal::SIGCONT) {
		Ok(()) => report_wait(state, "fg", pid),
		Err(e) => {
			debug!(%pid, %e, "fg: SIGCONT");
			eprintln!("fg: job not found: {}", pid);
		},
	}
	state.reclaim_terminal();
	Flow::Continue
}

pub fn builtin_bg(state: &mut global::State, args: &[&[u8]]) -> Flow {
	let pid = match target_pid(state, "bg", args) {
		Some(pid) => pid,
		None => return Flow::Continue,
	};
	let _blocked = reaper::Blocked::new();
	match signal::kill(pid, Signal::SIGCONT) {
		Ok(()) => report_wait(state, "bg", pid),
		Err(e) => {
			debug!(%pid, %e, "bg: SIGCONT");
			eprintln!("bg: job not found: {}", pid);
		},
	}
	Flow::Continue
}

pub fn builtin_kill(state: &mut global::State, args: &[&[u8]]) -> Flow {
	let pid = match target_pid(state, "kill", args) {
		Some(pid) => pid,
		None => return Flow::Continue,
	};
	// the reaper collects it
	if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
		debug!(%pid, %e, "kill");
		eprintln!("kill: job not found: {}", pid);
	}
	Flow::Continue
}

pub fn match_builtin(name: &[u8]) -> Option<Builtin> {
	match name {
		b"cd" => Some(builtin_cd),
		b"exit" => Some(builtin_exit),
		b"fg" => Some(builtin_fg),
		b"bg" => Some(builtin_bg),
		b"kill" => Some(builtin_kill),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Config;

	fn state() -> global::State {
		global::State::new(Config::default())
	}

	fn words(words: &[&'static str]) -> Vec<&'static [u8]> {
		words.iter().map(|w| w.as_bytes()).collect()
	}

	#[test]
	fn builtin_names() {
		for name in &["cd", "exit", "fg", "bg", "kill"] {
			assert!(match_builtin(name.as_bytes()).is_some());
		}
		assert!(match_builtin(b"ls").is_none());
		assert!(match_builtin(b"jobs").is_none());
		assert!(match_builtin(b"CD").is_none());
	}

	#[test]
	fn target_pid_rejects_garbage() {
		let state = state();
		assert_eq!(target_pid(&state, "fg", &[]), None);
		assert_eq!(target_pid(&state, "fg", &words(&["abc"])), None);
		assert_eq!(target_pid(&state, "kill", &words(&["0"])), None);
		assert_eq!(target_pid(&state, "kill", &words(&["-1"])), None);
		assert_eq!(target_pid(&state, "bg", &words(&["42", "extra"])), Some(Pid::from_raw(42)));
	}

	#[test]
	fn target_pid_rejects_reaped_children() {
		let mut state = state();
		let pid = Pid::from_raw(4242);
		state.job_table.insert(pid, pid);
		assert_eq!(target_pid(&state, "fg", &words(&["4242"])), Some(pid));
		state.job_table.mark_reaped(pid);
		assert_eq!(target_pid(&state, "fg", &words(&["4242"])), None);
	}

	#[test]
	fn job_control_on_missing_pid_continues() {
		let mut state = state();
		state.terminal = None;
		// above any pid_max
		let missing = words(&["2147483646"]);
		assert_eq!(builtin_fg(&mut state, &missing), Flow::Continue);
		assert_eq!(builtin_bg(&mut state, &missing), Flow::Continue);
		assert_eq!(builtin_kill(&mut state, &missing), Flow::Continue);
	}

	#[test]
	fn exit_terminates() {
		assert_eq!(builtin_exit(&mut state(), &[]), Flow::Terminate);
	}
}
