#![forbid(unsafe_code)]

mod emotes;
mod line;
mod tags;

pub use emotes::{EmoteRange, parse_emote_tag};
pub use line::{ChatCommand, IrcLine};
pub use tags::{Tags, decode_tags, encode_tags, escape_tag_value, unescape_tag_value};

use thiserror::Error;

/// Errors for decoding raw protocol lines. Callers log and drop; a malformed
/// line is never fatal to the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
	#[error("empty line")]
	Empty,

	#[error("missing command keyword: {0}")]
	MissingCommand(String),

	#[error("malformed tag pair: {0}")]
	MalformedTag(String),

	#[error("malformed emote range: {0}")]
	MalformedEmoteRange(String),
}
