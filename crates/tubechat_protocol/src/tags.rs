#![forbid(unsafe_code)]

use std::collections::HashMap;

use crate::ProtocolError;

/// Decoded tag map: tag name to unescaped value.
pub type Tags = HashMap<String, String>;

/// Unescape one tag value per the message-tags escaping convention:
/// `\s` → space, `\:` → `;`, `\\` → `\`, `\r`/`\n` → CR/LF.
///
/// A dangling trailing backslash and unknown escape pairs drop the
/// backslash and keep the following character, matching deployed servers.
pub fn unescape_tag_value(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());
	let mut chars = raw.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			out.push(c);
			continue;
		}
		match chars.next() {
			Some('s') => out.push(' '),
			Some(':') => out.push(';'),
			Some('\\') => out.push('\\'),
			Some('r') => out.push('\r'),
			Some('n') => out.push('\n'),
			Some(other) => out.push(other),
			None => {}
		}
	}
	out
}

/// Escape one tag value: the exact inverse of [`unescape_tag_value`] over
/// the five escape sequences.
pub fn escape_tag_value(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	for c in value.chars() {
		match c {
			' ' => out.push_str("\\s"),
			';' => out.push_str("\\:"),
			'\\' => out.push_str("\\\\"),
			'\r' => out.push_str("\\r"),
			'\n' => out.push_str("\\n"),
			other => out.push(other),
		}
	}
	out
}

/// Decode a tag blob (the part between `@` and the first space) into a
/// [`Tags`] map. A tag without `=` carries an empty value.
pub fn decode_tags(blob: &str) -> Result<Tags, ProtocolError> {
	let mut tags = Tags::new();
	for pair in blob.split(';') {
		if pair.is_empty() {
			continue;
		}
		match pair.split_once('=') {
			Some((key, value)) => {
				if key.is_empty() {
					return Err(ProtocolError::MalformedTag(pair.to_string()));
				}
				tags.insert(key.to_string(), unescape_tag_value(value));
			}
			None => {
				tags.insert(pair.to_string(), String::new());
			}
		}
	}
	Ok(tags)
}

/// Encode a [`Tags`] map back into a tag blob. Key order is sorted so the
/// output is deterministic.
pub fn encode_tags(tags: &Tags) -> String {
	let mut keys: Vec<&String> = tags.keys().collect();
	keys.sort();
	keys.iter()
		.map(|k| {
			let v = &tags[*k];
			if v.is_empty() {
				(*k).clone()
			} else {
				format!("{k}={}", escape_tag_value(v))
			}
		})
		.collect::<Vec<_>>()
		.join(";")
}
