#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use tracing::debug;
use tubechat_protocol::EmoteRange;

use crate::{InlineImage, InlineImageKind, Segment};

/// An image claim over `[start, end]` codepoints; keyed by start position
/// in [`ImagePositions`].
#[derive(Debug, Clone)]
pub struct ImageSpan {
	pub end: usize,
	pub image: InlineImage,
}

/// Ordered, non-overlapping start-position → claim map. All positions are
/// codepoint offsets into the message body, inclusive.
pub type ImagePositions = BTreeMap<usize, ImageSpan>;

/// Precompiled bits-cheer token matchers for one prefix set. Compiled once
/// per channel join and cached; never rebuilt per message.
#[derive(Debug, Default)]
pub struct BitsPatternSet {
	patterns: Vec<BitsPattern>,
}

#[derive(Debug)]
struct BitsPattern {
	prefix: String,
	regex: Regex,
}

impl BitsPatternSet {
	/// Compile matchers for the given cheer prefixes (`cheer`, `kappa`,
	/// channel-specific ones). Prefixes that fail to compile are skipped.
	pub fn compile<I, S>(prefixes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let patterns = prefixes
			.into_iter()
			.filter_map(|p| {
				let p = p.as_ref().trim();
				if p.is_empty() {
					return None;
				}
				let regex = match Regex::new(&format!("(?i)^{}([0-9]+)$", regex::escape(p))) {
					Ok(r) => r,
					Err(e) => {
						debug!(prefix = %p, error = %e, "skipping uncompilable cheer prefix");
						return None;
					}
				};
				Some(BitsPattern {
					prefix: p.to_ascii_lowercase(),
					regex,
				})
			})
			.collect();
		Self { patterns }
	}

	pub fn is_empty(&self) -> bool {
		self.patterns.is_empty()
	}

	/// Match a whole whitespace-delimited token; returns the canonical
	/// prefix and the cheer amount.
	fn match_token(&self, token: &str) -> Option<(&str, u64)> {
		for p in &self.patterns {
			if let Some(caps) = p.regex.captures(token) {
				let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
				if amount == 0 {
					continue;
				}
				return Some((&p.prefix, amount));
			}
		}
		None
	}
}

/// Bits tier thresholds, largest first.
const CHEER_TIERS: [(u64, &str); 6] = [
	(100_000, "#f9b114"),
	(10_000, "#f43021"),
	(5_000, "#0099fe"),
	(1_000, "#1db2a5"),
	(100, "#9c3ee8"),
	(1, "#979797"),
];

fn cheer_tier(amount: u64) -> (u64, &'static str) {
	for (tier, color) in CHEER_TIERS {
		if amount >= tier {
			return (tier, color);
		}
	}
	(1, "#979797")
}

/// Output of the resolver: the segment sequence plus the combined cheer
/// amount of every bits match.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMessage {
	pub segments: Vec<Segment>,
	pub cheer_total: u64,
}

/// `[start, end]` is free iff no existing claim overlaps it. Claims in the
/// map never overlap each other, so only the nearest-left entry matters.
fn span_is_free(map: &ImagePositions, start: usize, end: usize) -> bool {
	match map.range(..=end).next_back() {
		Some((_, span)) => span.end < start,
		None => true,
	}
}

/// Whitespace-delimited tokens with inclusive codepoint spans.
fn tokens(chars: &[char]) -> Vec<(usize, usize, String)> {
	let mut out = Vec::new();
	let mut start = None;
	for (i, c) in chars.iter().enumerate() {
		if c.is_whitespace() {
			if let Some(s) = start.take() {
				out.push((s, i - 1, chars[s..i].iter().collect()));
			}
		} else if start.is_none() {
			start = Some(i);
		}
	}
	if let Some(s) = start {
		out.push((s, chars.len() - 1, chars[s..].iter().collect()));
	}
	out
}

/// Resolve a message body into its ordered text/image segments.
///
/// Priority on overlap: explicit emote-tag ranges, then bits-cheer matches,
/// then third-party emote codes; within one priority, the earlier-scanned
/// match wins. Positions are codepoint offsets. Unknown emote ids still
/// become image segments — resolution failure is the renderer's concern.
pub fn resolve_message(
	text: &str,
	emote_ranges: &[EmoteRange],
	bits_sets: &[&BitsPatternSet],
	emote_codes: &[&HashMap<String, String>],
) -> ResolvedMessage {
	let chars: Vec<char> = text.chars().collect();
	let len = chars.len();
	let mut map = ImagePositions::new();
	let mut cheer_total: u64 = 0;

	for range in emote_ranges {
		if range.start >= len {
			debug!(start = range.start, len, "dropping emote range past end of message");
			continue;
		}
		let end = range.end.min(len - 1);
		if !span_is_free(&map, range.start, end) {
			continue;
		}
		map.insert(range.start, ImageSpan {
			end,
			image: InlineImage::emote(&range.id),
		});
	}

	let toks = if bits_sets.iter().any(|s| !s.is_empty()) || !emote_codes.is_empty() {
		tokens(&chars)
	} else {
		Vec::new()
	};

	for (start, end, token) in &toks {
		if !span_is_free(&map, *start, *end) {
			continue;
		}
		let Some((prefix, amount)) = bits_sets.iter().find_map(|s| s.match_token(token)) else {
			continue;
		};
		cheer_total = cheer_total.saturating_add(amount);
		let (tier, color) = cheer_tier(amount);
		map.insert(*start, ImageSpan {
			end: *end,
			image: InlineImage {
				kind: InlineImageKind::Bits,
				key: format!("{prefix}/{tier}"),
				text_suffix: Some(amount.to_string()),
				suffix_color: Some(color.to_string()),
			},
		});
	}

	for (start, end, token) in &toks {
		if !span_is_free(&map, *start, *end) {
			continue;
		}
		let Some(id) = emote_codes.iter().find_map(|m| m.get(token.as_str())) else {
			continue;
		};
		map.insert(*start, ImageSpan {
			end: *end,
			image: InlineImage::third_party(id),
		});
	}

	ResolvedMessage {
		segments: build_segments(&chars, &map),
		cheer_total,
	}
}

/// Single linear pass over the claim map, emitting alternating text and
/// image segments that cover the whole message.
fn build_segments(chars: &[char], map: &ImagePositions) -> Vec<Segment> {
	let mut segments = Vec::with_capacity(map.len() * 2 + 1);
	let mut cursor = 0usize;

	for (&start, span) in map {
		if start > cursor {
			segments.push(Segment::Text {
				text: chars[cursor..start].iter().collect(),
			});
		}
		segments.push(Segment::Image {
			image: span.image.clone(),
			source: chars[start..=span.end].iter().collect(),
		});
		cursor = span.end + 1;
	}

	if cursor < chars.len() {
		segments.push(Segment::Text {
			text: chars[cursor..].iter().collect(),
		});
	}

	segments
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::segments_to_text;

	fn emote(id: &str, start: usize, end: usize) -> EmoteRange {
		EmoteRange {
			id: id.to_string(),
			start,
			end,
		}
	}

	#[test]
	fn emote_tag_beats_bits_where_they_overlap() {
		// "cheer100 LUL": bits claims 0-7, the emote tag claims 9-11.
		let bits = BitsPatternSet::compile(["cheer"]);
		let resolved = resolve_message("cheer100 LUL", &[emote("425618", 9, 11)], &[&bits], &[]);

		assert_eq!(resolved.cheer_total, 100);
		assert_eq!(resolved.segments.len(), 3);
		match &resolved.segments[0] {
			Segment::Image { image, source } => {
				assert_eq!(image.kind, InlineImageKind::Bits);
				assert_eq!(image.key, "cheer/100");
				assert_eq!(image.text_suffix.as_deref(), Some("100"));
				assert_eq!(source, "cheer100");
			}
			other => panic!("expected bits image, got {other:?}"),
		}
		match &resolved.segments[2] {
			Segment::Image { image, source } => {
				assert_eq!(image.kind, InlineImageKind::Emote);
				assert_eq!(image.key, "425618");
				assert_eq!(source, "LUL");
			}
			other => panic!("expected emote image, got {other:?}"),
		}
	}

	#[test]
	fn emote_tag_overlapping_bits_token_suppresses_the_bits_match() {
		// The emote range covers part of the cheer token; the token must
		// stay plain-claimed by the emote, no cheer counted for it.
		let bits = BitsPatternSet::compile(["cheer"]);
		let resolved = resolve_message("cheer100", &[emote("1", 0, 4)], &[&bits], &[]);
		assert_eq!(resolved.cheer_total, 0);
		assert!(matches!(&resolved.segments[0], Segment::Image { image, .. } if image.kind == InlineImageKind::Emote));
	}

	#[test]
	fn bits_beat_third_party_on_the_same_token() {
		let bits = BitsPatternSet::compile(["kappa"]);
		let mut codes = HashMap::new();
		codes.insert("kappa50".to_string(), "3rd-id".to_string());
		let resolved = resolve_message("kappa50", &[], &[&bits], &[&codes]);
		assert_eq!(resolved.cheer_total, 50);
		assert!(matches!(&resolved.segments[0], Segment::Image { image, .. } if image.kind == InlineImageKind::Bits));
	}

	#[test]
	fn third_party_codes_match_whole_tokens_only() {
		let mut codes = HashMap::new();
		codes.insert("monkaS".to_string(), "abc123".to_string());
		let resolved = resolve_message("monkaS monkaSs", &[], &[], &[&codes]);

		assert_eq!(resolved.segments.len(), 2);
		match &resolved.segments[0] {
			Segment::Image { image, source } => {
				assert_eq!(image.key, "abc123");
				assert_eq!(source, "monkaS");
			}
			other => panic!("expected third-party image, got {other:?}"),
		}
		assert_eq!(resolved.segments[1].source_text(), " monkaSs");
	}

	#[test]
	fn segments_cover_text_with_no_gaps_or_overlaps() {
		let bits = BitsPatternSet::compile(["cheer"]);
		let mut codes = HashMap::new();
		codes.insert("LUL".to_string(), "x".to_string());
		let text = "pre cheer1 mid LUL post Kappa";
		let resolved = resolve_message(text, &[emote("25", 24, 28)], &[&bits], &[&codes]);
		assert_eq!(segments_to_text(&resolved.segments), text);

		let covered: usize = resolved.segments.iter().map(|s| s.source_text().chars().count()).sum();
		assert_eq!(covered, text.chars().count());
	}

	#[test]
	fn ranges_are_codepoint_offsets_not_bytes() {
		// Four emoji codepoints then a space; "Kappa" starts at codepoint 5.
		let text = "\u{1F525}\u{1F525}\u{1F525}\u{1F525} Kappa";
		let resolved = resolve_message(text, &[emote("25", 5, 9)], &[], &[]);
		assert_eq!(resolved.segments.len(), 2);
		match &resolved.segments[1] {
			Segment::Image { source, .. } => assert_eq!(source, "Kappa"),
			other => panic!("expected image, got {other:?}"),
		}
		assert_eq!(segments_to_text(&resolved.segments), text);
	}

	#[test]
	fn overlapping_same_priority_keeps_first_by_scan_order() {
		let resolved = resolve_message("abcdef", &[emote("1", 0, 3), emote("2", 2, 5)], &[], &[]);
		assert_eq!(resolved.segments.len(), 2);
		assert!(matches!(&resolved.segments[0], Segment::Image { image, .. } if image.key == "1"));
		assert_eq!(resolved.segments[1].source_text(), "ef");
	}

	#[test]
	fn out_of_bounds_ranges_are_dropped_or_clamped() {
		let resolved = resolve_message("hi", &[emote("1", 5, 9)], &[], &[]);
		assert_eq!(resolved.segments.len(), 1);
		assert_eq!(resolved.segments[0].source_text(), "hi");

		let clamped = resolve_message("hi", &[emote("1", 0, 9)], &[], &[]);
		assert_eq!(clamped.segments.len(), 1);
		assert!(matches!(&clamped.segments[0], Segment::Image { source, .. } if source == "hi"));
	}

	#[test]
	fn cheer_amounts_accumulate_across_matches() {
		let bits = BitsPatternSet::compile(["cheer"]);
		let resolved = resolve_message("cheer100 and cheer5000", &[], &[&bits], &[]);
		assert_eq!(resolved.cheer_total, 5100);

		let tiers: Vec<&str> = resolved
			.segments
			.iter()
			.filter_map(|s| match s {
				Segment::Image { image, .. } => Some(image.key.as_str()),
				_ => None,
			})
			.collect();
		assert_eq!(tiers, vec!["cheer/100", "cheer/5000"]);
	}

	#[test]
	fn zero_amount_cheer_is_not_a_match() {
		let bits = BitsPatternSet::compile(["cheer"]);
		let resolved = resolve_message("cheer0", &[], &[&bits], &[]);
		assert_eq!(resolved.cheer_total, 0);
		assert_eq!(resolved.segments.len(), 1);
		assert!(matches!(&resolved.segments[0], Segment::Text { .. }));
	}

	#[test]
	fn empty_message_yields_no_segments() {
		let resolved = resolve_message("", &[], &[], &[]);
		assert!(resolved.segments.is_empty());
		assert_eq!(resolved.cheer_total, 0);
	}
}
