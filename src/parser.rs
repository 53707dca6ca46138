use thiserror::Error;

use crate::types::*;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum ParseError {
	#[error("empty command")]
	EmptyCommand,
	#[error("character after '&': '{0}'")]
	TrailingCharacter(char),
}

pub type ParseResult<T> = Result<T, ParseError>;

struct Parser<'a> {
	line: &'a [u8],
	i: usize,
	max_args: usize,
}

impl<'a> Parser<'a> {
	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(c) = self.line.get(self.i) {
			if !f(*c) { break; }
			self.i += 1;
		}
	}

	fn is_whitespace(c: u8) -> bool {
		matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x07)
	}

	fn is_letter(c: u8) -> bool {
		c != b'|' && !Parser::is_whitespace(c)
	}

	fn skip_whitespaces(&mut self) {
		self.proceed_while(Parser::is_whitespace);
	}

	fn read_word(&mut self) -> &'a [u8] {
		let orig = self.i;
		self.proceed_while(Parser::is_letter);
		&self.line[orig .. self.i]
	}

	fn parse_segment(&mut self) -> ParseResult<Segment<'a>> {
		let mut args: Vec<&'a [u8]> = vec![];
		loop {
			self.skip_whitespaces();
			let word = self.read_word();
			if word.is_empty() {
				break;
			}
			// words past the limit are dropped, not rejected
			if args.len() < self.max_args {
				args.push(word);
			}
		}
		if args.is_empty() {
			return Err(ParseError::EmptyCommand);
		}
		Ok(Segment::new(args))
	}

	fn parse_pipeline(&mut self, mode: Mode) -> ParseResult<Pipeline<'a>> {
		let mut segments: Vec<Segment<'a>> = vec![];
		loop {
			segments.push(self.parse_segment()?);
			match self.line.get(self.i) {
				Some(&b'|') => { self.i += 1; },
				_ => { break; },
			}
		}
		Ok(Pipeline { segments: segments, mode: mode })
	}
}

/// Splits off a trailing `&` and reports the mode it implies.
fn split_background(line: &[u8]) -> ParseResult<(&[u8], Mode)> {
	match line.iter().position(|&c| c == b'&') {
		None => Ok((line, Mode::Foreground)),
		Some(amp) => {
			if let Some(&c) = line[amp + 1 ..].iter().find(|&&c| !Parser::is_whitespace(c)) {
				return Err(ParseError::TrailingCharacter(c as char));
			}
			Ok((&line[.. amp], Mode::Background))
		},
	}
}

/// Parses one input line. A blank line yields `Ok(None)`.
pub fn parse<'a>(line: &'a [u8], max_args: usize) -> ParseResult<Option<Pipeline<'a>>> {
	let (body, mode) = split_background(line)?;
	if body.iter().all(|&c| Parser::is_whitespace(c)) {
		return match mode {
			Mode::Foreground => Ok(None),
			Mode::Background => Err(ParseError::EmptyCommand),
		};
	}
	let mut parser: Parser<'a> = Parser { line: body, i: 0, max_args: max_args.max(1) };
	parser.parse_pipeline(mode).map(Some)
}
