mod builtin;
mod config;
mod eval;
mod global;
mod job;
mod parser;
mod reaper;
mod types;

use std::env;
use std::io;
use io::Write;
use io::BufRead;

use anyhow::Context;
use nix::unistd::{self, User};
use tracing_subscriber::EnvFilter;

use config::Config;
use types::Flow;

const WELCOME: &str = "Welcome to mysh!";

fn init_logging(config: &Config) {
	let filter = match config.log {
		Some(ref directive) => EnvFilter::new(directive),
		None => EnvFilter::try_from_env(config::LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
	};
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.try_init();
}

fn print_prompt(stdout: &mut io::Stdout) {
	let login = User::from_uid(unistd::getuid()).ok().flatten()
		.map(|user| user.name)
		.or_else(|| env::var("USER").ok())
		.unwrap_or_default();
	let cwd = env::current_dir().map(|p| p.display().to_string()).unwrap_or_default();
	let _ = write!(stdout, "\x1b[34m{}\x1b[0m in \x1b[34m{}\x1b[0m\n\x1b[33mmysh >\x1b[0m ", login, cwd);
	let _ = stdout.flush();
}

fn main() -> anyhow::Result<()> {
	let config: Config = argh::from_env();
	init_logging(&config);

	let mut state = global::State::new(config);
	state.init_job_control().context("failed to take control of the terminal")?;
	reaper::install().context("failed to install the SIGCHLD handler")?;

	let mut stdout = io::stdout();
	let stdin = io::stdin();
	let mut stdin_locked = stdin.lock();
	if !state.config.no_banner {
		let _ = writeln!(stdout, "{}", WELCOME);
	}
	loop {
		reaper::drain(&mut state.job_table);
		if state.shows_prompt() {
			print_prompt(&mut stdout);
		}

		let mut line: Vec<u8> = vec![];
		let n = stdin_locked.read_until(b'\n', &mut line).context("failed to read a line")?;
		if n == 0 {
			if state.is_interactive() {
				let _ = writeln!(stdout);
				let _ = writeln!(stdout, "Goodbye!");
			}
			break;
		}

		let pipeline = match parser::parse(&line, state.config.max_args()) {
			Ok(Some(pipeline)) => pipeline,
			Ok(None) => continue,
			Err(e) => {
				eprintln!("mysh: {}", e);
				continue;
			},
		};
		match eval::eval(&mut state, pipeline) {
			Ok(Flow::Terminate) => break,
			Ok(Flow::Continue) => {},
			Err(e) => eprintln!("mysh: {}", e),
		}
	}
	Ok(())
}
