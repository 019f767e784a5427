#![forbid(unsafe_code)]

use crate::ProtocolError;

/// One inclusive codepoint range of the message body claimed by a
/// first-party emote.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmoteRange {
	pub id: String,
	pub start: usize,
	pub end: usize,
}

/// Parse the emote tag grammar `id:start-end,start-end/id2:start-end`.
///
/// Positions are codepoint offsets into the trailing parameter, inclusive.
/// Inverted ranges (`end < start`) are dropped rather than rejected; an
/// unparseable group fails the whole tag so the caller can drop and log.
pub fn parse_emote_tag(tag: &str) -> Result<Vec<EmoteRange>, ProtocolError> {
	let mut ranges = Vec::new();
	if tag.is_empty() {
		return Ok(ranges);
	}

	for group in tag.split('/') {
		let (id, positions) = group
			.split_once(':')
			.ok_or_else(|| ProtocolError::MalformedEmoteRange(group.to_string()))?;
		if id.is_empty() {
			return Err(ProtocolError::MalformedEmoteRange(group.to_string()));
		}

		for span in positions.split(',') {
			let (start, end) = span
				.split_once('-')
				.ok_or_else(|| ProtocolError::MalformedEmoteRange(span.to_string()))?;
			let start: usize = start
				.parse()
				.map_err(|_| ProtocolError::MalformedEmoteRange(span.to_string()))?;
			let end: usize = end
				.parse()
				.map_err(|_| ProtocolError::MalformedEmoteRange(span.to_string()))?;
			if end < start {
				continue;
			}
			ranges.push(EmoteRange {
				id: id.to_string(),
				start,
				end,
			});
		}
	}

	ranges.sort_by_key(|r| r.start);
	Ok(ranges)
}
