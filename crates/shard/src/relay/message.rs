//! IRC message parsing and serialization.
//!
//! RFC 2812 shape:
//!   [`:`prefix SPACE] command [SPACE params] [SPACE `:` trailing]
//!
//! Parsing works on one line with the terminator already removed.

use std::fmt;

/// End of MOTD. Registration is complete.
pub const RPL_ENDOFMOTD: &str = "376";
/// No MOTD. Registration is complete.
pub const ERR_NOMOTD: &str = "422";
/// The requested nickname is taken.
pub const ERR_NICKNAMEINUSE: &str = "433";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server name or `nick!user@host`.
    pub prefix: Option<String>,
    pub command: String,
    /// The last one may have been a trailing param (may contain spaces).
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
}

impl Message {
    pub fn new<P: Into<String>>(command: &str, params: impl IntoIterator<Item = P>) -> Self {
        Self {
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches(['\r', '\n']);
        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = match input.strip_prefix(':') {
            Some(tail) => match tail.split_once(' ') {
                Some((prefix, rest)) => (Some(prefix.to_string()), rest.trim_start_matches(' ')),
                None => return Err(ParseError::MissingCommand),
            },
            None => (None, input),
        };

        let (command, mut remaining) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, rest)) => {
                    params.push(param.to_string());
                    remaining = rest;
                }
                None => {
                    params.push(remaining.to_string());
                    break;
                }
            }
        }

        Ok(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Wire form without the trailing `\r\n`. The last param gets the `:`
    /// marker only when it needs one.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(prefix) = &self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(&self.command);

        if let Some((last, init)) = self.params.split_last() {
            for param in init {
                out.push(' ');
                out.push_str(param);
            }
            out.push(' ');
            if needs_trailing_marker(last) {
                out.push(':');
            }
            out.push_str(last);
        }
        out
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Nickname part of a `nick!user@host` prefix.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split_once('!').map_or(prefix, |(nick, _)| nick))
    }
}

/// A final param that is empty, holds a space or starts with `:` can only
/// be sent as a trailing param.
fn needs_trailing_marker(param: &str) -> bool {
    param.is_empty() || param.contains(' ') || param.starts_with(':')
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}
