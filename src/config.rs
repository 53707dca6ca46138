use argh::FromArgs;

/// Matches a 20-slot argv whose last slot holds the terminator.
pub const DEFAULT_MAX_ARGS: usize = 19;

pub const LOG_ENV: &str = "MYSH_LOG";

/// A small job-control shell.
#[derive(Debug, FromArgs)]
pub struct Config {
	/// maximum number of words kept per pipeline segment; the rest are dropped
	#[argh(option, default = "DEFAULT_MAX_ARGS")]
	pub max_args: usize,

	/// do not print the welcome line
	#[argh(switch)]
	pub no_banner: bool,

	/// never print the prompt, even on a terminal
	#[argh(switch)]
	pub no_prompt: bool,

	/// tracing filter for diagnostics on stderr (overrides MYSH_LOG)
	#[argh(option)]
	pub log: Option<String>,
}

impl Default for Config {
	fn default() -> Config {
		Config { max_args: DEFAULT_MAX_ARGS, no_banner: false, no_prompt: false, log: None }
	}
}

impl Config {
	pub fn max_args(&self) -> usize {
		self.max_args.max(1)
	}
}
