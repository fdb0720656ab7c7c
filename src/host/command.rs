//! Runtime command grammar and line framing.

use std::fmt;

/// Longest command line; longer input is flushed in pieces.
pub const MAX_LINE: usize = 512;

/// A parameter update received from the operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `SET BASS <float>`
    SetBass(f32),
    /// `SET MID <float>`
    SetMid(f32),
    /// `SET TREBLE <float>`
    SetTreble(f32),
    /// `SET FFT INDEX <int>`
    SetFftIndex(i32),
    /// `SET FFT FILTER <0|1>`
    SetFftFilter(bool),
}

impl Command {
    /// Parse one line. Unrecognized or malformed lines yield `None`.
    ///
    /// Keywords are case sensitive; runs of whitespace are treated as one
    /// separator.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        if words.next()? != "SET" {
            return None;
        }
        let command = match (words.next()?, words.next()?) {
            ("BASS", v) => Command::SetBass(v.parse().ok()?),
            ("MID", v) => Command::SetMid(v.parse().ok()?),
            ("TREBLE", v) => Command::SetTreble(v.parse().ok()?),
            ("FFT", "INDEX") => Command::SetFftIndex(words.next()?.parse().ok()?),
            ("FFT", "FILTER") => match words.next()? {
                "0" => Command::SetFftFilter(false),
                "1" => Command::SetFftFilter(true),
                _ => return None,
            },
            _ => return None,
        };
        if words.next().is_some() {
            return None;
        }
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetBass(v) => write!(f, "SET BASS {}", v),
            Command::SetMid(v) => write!(f, "SET MID {}", v),
            Command::SetTreble(v) => write!(f, "SET TREBLE {}", v),
            Command::SetFftIndex(i) => write!(f, "SET FFT INDEX {}", i),
            Command::SetFftFilter(on) => write!(f, "SET FFT FILTER {}", *on as u8),
        }
    }
}

/// Reassembles newline-terminated lines from arbitrary byte chunks.
///
/// Carriage returns are dropped and empty lines are skipped. A line that
/// reaches `MAX_LINE - 1` bytes without a newline is emitted as is.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    /// Empty assembler.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_LINE),
        }
    }

    /// Feed a chunk, calling `on_line` for every completed line.
    pub fn push(&mut self, chunk: &[u8], mut on_line: impl FnMut(&str)) {
        for &byte in chunk {
            match byte {
                b'\r' => {}
                b'\n' => self.flush(&mut on_line),
                _ => {
                    self.buf.push(byte);
                    if self.buf.len() >= MAX_LINE - 1 {
                        self.flush(&mut on_line);
                    }
                }
            }
        }
    }

    fn flush(&mut self, on_line: &mut impl FnMut(&str)) {
        if !self.buf.is_empty() {
            on_line(&String::from_utf8_lossy(&self.buf));
            self.buf.clear();
        }
    }
}
