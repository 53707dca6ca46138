use nix::unistd::Pid;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Mode { Foreground, Background }

/// What the read-eval loop should do after a line has run.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Flow { Continue, Terminate }

#[derive(Debug)]
pub struct Segment<'a> {
	pub args: Vec<&'a [u8]>,
	pub pid: Option<Pid>,
	pub pgid: Option<Pid>,
}

impl<'a> Segment<'a> {
	pub fn new(args: Vec<&'a [u8]>) -> Segment<'a> {
		assert!(!args.is_empty());
		Segment { args: args, pid: None, pgid: None }
	}

	pub fn name(&self) -> &'a [u8] {
		self.args[0]
	}

	pub fn arguments(&self) -> &[&'a [u8]] {
		&self.args[1..]
	}
}

/// Segments in data order: each one's stdout feeds the next one's stdin.
#[derive(Debug)]
pub struct Pipeline<'a> {
	pub segments: Vec<Segment<'a>>,
	pub mode: Mode,
}

impl<'a> Pipeline<'a> {
	pub fn is_background(&self) -> bool {
		self.mode == Mode::Background
	}
}
