#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, warn};
use tubechat_domain::{ChannelName, VodId};
use tubechat_protocol::{Tags, encode_tags};
use url::Url;

use crate::backoff_delay;

const MAX_FETCH_ATTEMPTS: u32 = 3;
const RETRY_MIN_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

/// One historical chat message: absolute timestamp (epoch seconds) plus the
/// raw protocol line it replays through the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayMessage {
	pub timestamp: f64,
	pub raw_line: String,
}

/// One fetched page of historical chat.
#[derive(Debug, Clone, Default)]
pub struct ReplayChatChunk {
	pub messages: Vec<ReplayMessage>,
	/// Continuation cursor; `None` means the log is exhausted.
	pub cursor: Option<String>,
	/// Hint for when the following chunk becomes relevant.
	pub next_timestamp: Option<f64>,
}

/// A chunk fetch the session should dispatch. Carries the seek generation
/// so a stale response is recognizable on arrival.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRequest {
	pub generation: u64,
	pub vod_id: VodId,
	pub channel: ChannelName,
	pub cursor: Option<String>,
	/// Anchor for the first fetch after a (re)start or seek.
	pub offset_seconds: Option<f64>,
}

/// What [`ReplaySync::update`] produced: messages now due, in timestamp
/// order, plus at most one prefetch to dispatch.
#[derive(Debug, Default)]
pub struct ReplayAdvance {
	pub due: Vec<ReplayMessage>,
	pub fetch: Option<ChunkRequest>,
}

/// Outcome of a failed chunk fetch.
#[derive(Debug)]
pub enum FetchFailure {
	/// Response belonged to a superseded generation; nothing to do.
	Stale,
	/// Retry the same request after the given delay.
	Retry {
		request: ChunkRequest,
		delay: Duration,
	},
	/// Attempts exhausted; the synchronizer pauses until restarted.
	GaveUp,
}

/// Replays a VOD's chat keyed to a playback offset instead of wall clock.
///
/// Pure state machine: `update` never blocks — it hands back what is
/// already buffered and at most one fetch request; the session dispatches
/// fetches and routes completions into `handle_chunk`.
#[derive(Debug, Default)]
pub struct ReplaySync {
	active: bool,
	paused: bool,
	channel: Option<ChannelName>,
	vod_id: Option<VodId>,
	vod_start_epoch: f64,
	seek_offset: f64,
	/// Absolute playback clock; monotonic within a run, reset on seek.
	current_time: f64,
	next_chunk_timestamp: Option<f64>,
	cursor: Option<String>,
	generation: u64,
	first_load_after_seek: bool,
	request_in_flight: bool,
	last_request: Option<(Option<String>, Option<f64>)>,
	retries: u32,
	pending: VecDeque<ReplayMessage>,
}

impl ReplaySync {
	pub fn is_active(&self) -> bool {
		self.active
	}

	pub fn is_paused(&self) -> bool {
		self.paused
	}

	pub fn channel(&self) -> Option<&ChannelName> {
		self.channel.as_ref()
	}

	/// Enter replay mode anchored at `playback_offset`; returns the first
	/// chunk request.
	pub fn start(&mut self, channel: ChannelName, vod_id: VodId, vod_start_epoch: f64, playback_offset: f64) -> ChunkRequest {
		self.stop();
		self.active = true;
		self.channel = Some(channel);
		self.vod_id = Some(vod_id);
		self.vod_start_epoch = vod_start_epoch;
		self.do_seek(playback_offset)
	}

	/// Jump to a new offset. The pending buffer is discarded and any
	/// in-flight fetch is invalidated via the generation counter.
	pub fn seek(&mut self, new_offset: f64) -> Option<ChunkRequest> {
		if !self.active {
			return None;
		}
		Some(self.do_seek(new_offset))
	}

	fn do_seek(&mut self, new_offset: f64) -> ChunkRequest {
		self.generation = self.generation.wrapping_add(1);
		self.pending.clear();
		self.cursor = None;
		self.next_chunk_timestamp = None;
		self.first_load_after_seek = true;
		self.paused = false;
		self.retries = 0;
		self.seek_offset = new_offset;
		self.current_time = self.vod_start_epoch + new_offset;
		self.request(None, Some(new_offset))
	}

	/// Advance the clock. Emits every buffered message whose timestamp is
	/// due, in timestamp order, and decides whether to prefetch.
	pub fn update(&mut self, new_offset: f64) -> ReplayAdvance {
		if !self.active || self.paused {
			return ReplayAdvance::default();
		}

		let target = self.vod_start_epoch + new_offset;
		if target > self.current_time {
			self.current_time = target;
		}

		let mut due = Vec::new();
		while let Some(front) = self.pending.front() {
			if front.timestamp <= self.current_time {
				due.push(self.pending.pop_front().expect("front checked"));
			} else {
				break;
			}
		}

		let fetch = if self.pending.is_empty()
			&& !self.request_in_flight
			&& self.cursor.is_some()
			&& self.next_chunk_timestamp.is_none_or(|t| t <= self.current_time)
		{
			let cursor = self.cursor.clone();
			Some(self.request(cursor, None))
		} else {
			None
		};

		ReplayAdvance { due, fetch }
	}

	/// Leave replay mode and clear all state. Any in-flight fetch result
	/// will be recognized as stale.
	pub fn stop(&mut self) {
		let generation = self.generation.wrapping_add(1);
		*self = Self {
			generation,
			..Self::default()
		};
	}

	/// Apply a fetched chunk. Chunks from a superseded generation are
	/// dropped without touching buffer or clock.
	pub fn handle_chunk(&mut self, generation: u64, chunk: ReplayChatChunk) {
		if !self.active || generation != self.generation {
			debug!(generation, current = self.generation, "dropping stale replay chunk");
			return;
		}

		self.request_in_flight = false;
		self.retries = 0;

		let mut messages = chunk.messages;
		if self.first_load_after_seek {
			let cutoff = self.vod_start_epoch + self.seek_offset;
			messages.retain(|m| m.timestamp >= cutoff);
			self.first_load_after_seek = false;
		}

		// A chunk arriving early is buffered, not emitted; order the buffer
		// by timestamp regardless of arrival order.
		let mut merged: Vec<ReplayMessage> = self.pending.drain(..).collect();
		merged.extend(messages);
		merged.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(Ordering::Equal));
		self.pending = merged.into();

		self.cursor = chunk.cursor;
		self.next_chunk_timestamp = chunk.next_timestamp;
	}

	/// Apply a failed chunk fetch: bounded retries with backoff, then pause.
	pub fn handle_chunk_error(&mut self, generation: u64) -> FetchFailure {
		if !self.active || generation != self.generation {
			return FetchFailure::Stale;
		}

		self.request_in_flight = false;
		self.retries += 1;
		if self.retries > MAX_FETCH_ATTEMPTS {
			warn!(attempts = self.retries - 1, "replay chunk fetch gave up; pausing replay");
			self.paused = true;
			return FetchFailure::GaveUp;
		}

		let (cursor, offset) = self.last_request.clone().unwrap_or((None, Some(self.seek_offset)));
		let delay = backoff_delay(self.retries, RETRY_MIN_DELAY, RETRY_MAX_DELAY);
		FetchFailure::Retry {
			request: self.request(cursor, offset),
			delay,
		}
	}

	fn request(&mut self, cursor: Option<String>, offset_seconds: Option<f64>) -> ChunkRequest {
		self.request_in_flight = true;
		self.last_request = Some((cursor.clone(), offset_seconds));
		ChunkRequest {
			generation: self.generation,
			vod_id: self.vod_id.expect("request only issued while active"),
			channel: self.channel.clone().expect("request only issued while active"),
			cursor,
			offset_seconds,
		}
	}
}

/// Chunk fetch seam. The HTTP implementation pages the VOD comments API.
#[async_trait::async_trait]
pub trait ReplayChunkFetcher: Send + Sync {
	async fn fetch(&self, request: &ChunkRequest) -> anyhow::Result<ReplayChatChunk>;
}

/// HTTP fetcher for VOD comment pages, synthesized back into tag-annotated
/// protocol lines so replay feeds the same decode path as live chat.
pub struct HttpReplayFetcher {
	base_url: Url,
	client: reqwest::Client,
}

impl HttpReplayFetcher {
	pub fn new(base_url: &str) -> anyhow::Result<Self> {
		Ok(Self {
			base_url: Url::parse(base_url).context("parse replay base url")?,
			client: reqwest::Client::new(),
		})
	}
}

#[derive(Debug, Deserialize)]
struct CommentsResponse {
	#[serde(default)]
	comments: Vec<CommentDto>,
	#[serde(default, rename = "_next")]
	next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentDto {
	created_at: String,
	commenter: CommenterDto,
	message: CommentMessageDto,
}

#[derive(Debug, Deserialize)]
struct CommenterDto {
	name: String,
	#[serde(default)]
	display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentMessageDto {
	#[serde(default)]
	body: String,
	#[serde(default)]
	user_color: Option<String>,
	#[serde(default)]
	user_badges: Vec<CommentBadgeDto>,
	#[serde(default)]
	emoticons: Vec<CommentEmoticonDto>,
	#[serde(default)]
	bits_spent: Option<u64>,
	#[serde(default)]
	is_action: bool,
}

#[derive(Debug, Deserialize)]
struct CommentBadgeDto {
	#[serde(rename = "_id")]
	id: String,
	version: String,
}

#[derive(Debug, Deserialize)]
struct CommentEmoticonDto {
	#[serde(rename = "_id")]
	id: String,
	begin: usize,
	end: usize,
}

fn comment_to_message(channel: &ChannelName, c: CommentDto) -> Option<ReplayMessage> {
	let created = chrono::DateTime::parse_from_rfc3339(&c.created_at)
		.map_err(|e| {
			warn!(created_at = %c.created_at, error = %e, "skipping comment with unparseable timestamp");
			e
		})
		.ok()?;
	let timestamp = created.timestamp_millis() as f64 / 1000.0;

	let login = c.commenter.name.to_ascii_lowercase();
	let mut tags = Tags::new();
	if let Some(display) = c.commenter.display_name.filter(|d| !d.is_empty()) {
		tags.insert("display-name".to_string(), display);
	}
	if let Some(color) = c.message.user_color.filter(|c| !c.is_empty()) {
		tags.insert("color".to_string(), color);
	}
	if !c.message.user_badges.is_empty() {
		let badges = c
			.message
			.user_badges
			.iter()
			.map(|b| format!("{}/{}", b.id, b.version))
			.collect::<Vec<_>>()
			.join(",");
		tags.insert("badges".to_string(), badges);
	}
	if !c.message.emoticons.is_empty() {
		let emotes = c
			.message
			.emoticons
			.iter()
			.map(|e| format!("{}:{}-{}", e.id, e.begin, e.end))
			.collect::<Vec<_>>()
			.join("/");
		tags.insert("emotes".to_string(), emotes);
	}
	if let Some(bits) = c.message.bits_spent.filter(|b| *b > 0) {
		tags.insert("bits".to_string(), bits.to_string());
	}

	let body = if c.message.is_action {
		format!("\u{1}ACTION {}\u{1}", c.message.body)
	} else {
		c.message.body
	};

	let raw_line = format!(
		"@{} :{login}!{login}@{login}.tmi.twitch.tv PRIVMSG {} :{body}",
		encode_tags(&tags),
		channel.irc_channel()
	);

	Some(ReplayMessage { timestamp, raw_line })
}

#[async_trait::async_trait]
impl ReplayChunkFetcher for HttpReplayFetcher {
	async fn fetch(&self, request: &ChunkRequest) -> anyhow::Result<ReplayChatChunk> {
		let url = match (&request.cursor, request.offset_seconds) {
			(Some(cursor), _) => format!("{}videos/{}/comments?cursor={cursor}", self.base_url, request.vod_id),
			(None, Some(offset)) => format!(
				"{}videos/{}/comments?content_offset_seconds={offset}",
				self.base_url, request.vod_id
			),
			(None, None) => format!("{}videos/{}/comments", self.base_url, request.vod_id),
		};

		let resp = self
			.client
			.get(url)
			.send()
			.await
			.context("replay chunk request")?
			.error_for_status()
			.context("replay chunk status")?;

		let body: CommentsResponse = resp.json().await.context("replay chunk json")?;
		let messages: Vec<ReplayMessage> = body
			.comments
			.into_iter()
			.filter_map(|c| comment_to_message(&request.channel, c))
			.collect();
		let next_timestamp = messages.last().map(|m| m.timestamp);

		Ok(ReplayChatChunk {
			messages,
			cursor: body.next,
			next_timestamp,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const VOD_START: f64 = 1_000.0;

	fn msg(ts: f64) -> ReplayMessage {
		ReplayMessage {
			timestamp: ts,
			raw_line: format!(":u!u@u PRIVMSG #c :at {ts}"),
		}
	}

	fn chunk(timestamps: &[f64], cursor: Option<&str>) -> ReplayChatChunk {
		ReplayChatChunk {
			messages: timestamps.iter().copied().map(msg).collect(),
			cursor: cursor.map(str::to_string),
			next_timestamp: None,
		}
	}

	fn started() -> (ReplaySync, ChunkRequest) {
		let mut sync = ReplaySync::default();
		let req = sync.start(ChannelName::new("chan").unwrap(), VodId(1), VOD_START, 0.0);
		(sync, req)
	}

	#[test]
	fn start_anchors_first_fetch_at_the_offset() {
		let mut sync = ReplaySync::default();
		let req = sync.start(ChannelName::new("chan").unwrap(), VodId(7), VOD_START, 42.0);
		assert_eq!(req.offset_seconds, Some(42.0));
		assert_eq!(req.cursor, None);
		assert_eq!(req.vod_id, VodId(7));
		assert!(sync.is_active());
	}

	#[test]
	fn out_of_order_arrivals_emit_in_timestamp_order() {
		let (mut sync, req) = started();
		// Chunks arrive carrying timestamps 10, 5, 8 (as offsets from start).
		sync.handle_chunk(req.generation, chunk(&[VOD_START + 10.0], Some("a")));
		sync.handle_chunk(req.generation, chunk(&[VOD_START + 5.0], Some("b")));
		sync.handle_chunk(req.generation, chunk(&[VOD_START + 8.0], Some("c")));

		let advance = sync.update(10.0);
		let order: Vec<f64> = advance.due.iter().map(|m| m.timestamp - VOD_START).collect();
		assert_eq!(order, vec![5.0, 8.0, 10.0]);
	}

	#[test]
	fn update_emits_only_due_messages_and_never_twice() {
		let (mut sync, req) = started();
		sync.handle_chunk(req.generation, chunk(&[VOD_START + 3.0, VOD_START + 9.0], Some("a")));

		let first = sync.update(5.0);
		assert_eq!(first.due.len(), 1);
		assert_eq!(first.due[0].timestamp, VOD_START + 3.0);

		let second = sync.update(5.0);
		assert!(second.due.is_empty());

		let third = sync.update(9.0);
		assert_eq!(third.due.len(), 1);
		assert_eq!(third.due[0].timestamp, VOD_START + 9.0);
	}

	#[test]
	fn seek_discards_buffer_and_invalidates_in_flight_fetches() {
		let (mut sync, req) = started();
		let old_generation = req.generation;
		sync.handle_chunk(old_generation, chunk(&[VOD_START + 2.0], Some("a")));

		let seek_req = sync.seek(50.0).expect("active");
		assert_eq!(seek_req.offset_seconds, Some(50.0));

		// A fetch response tagged with the pre-seek generation must not
		// mutate buffer or emission state.
		sync.handle_chunk(old_generation, chunk(&[VOD_START + 55.0], Some("stale")));
		let advance = sync.update(60.0);
		assert!(advance.due.is_empty());

		// The post-seek fetch applies normally.
		sync.handle_chunk(seek_req.generation, chunk(&[VOD_START + 55.0], Some("fresh")));
		let advance = sync.update(60.0);
		assert_eq!(advance.due.len(), 1);
	}

	#[test]
	fn first_chunk_after_seek_skips_messages_before_the_seek_point() {
		let (mut sync, _) = started();
		let req = sync.seek(50.0).expect("active");
		sync.handle_chunk(
			req.generation,
			chunk(&[VOD_START + 40.0, VOD_START + 52.0, VOD_START + 58.0], Some("a")),
		);

		let advance = sync.update(60.0);
		let order: Vec<f64> = advance.due.iter().map(|m| m.timestamp - VOD_START).collect();
		assert_eq!(order, vec![52.0, 58.0]);
	}

	#[test]
	fn exhausted_buffer_prefetches_via_the_cursor() {
		let (mut sync, req) = started();
		sync.handle_chunk(req.generation, chunk(&[VOD_START + 1.0], Some("next-cursor")));

		let advance = sync.update(2.0);
		assert_eq!(advance.due.len(), 1);
		let fetch = advance.fetch.expect("prefetch");
		assert_eq!(fetch.cursor.as_deref(), Some("next-cursor"));
		assert_eq!(fetch.offset_seconds, None);

		// No duplicate request while one is in flight.
		assert!(sync.update(3.0).fetch.is_none());
	}

	#[test]
	fn hinted_next_chunk_timestamp_defers_prefetch() {
		let (mut sync, req) = started();
		let mut c = chunk(&[VOD_START + 1.0], Some("next"));
		c.next_timestamp = Some(VOD_START + 30.0);
		sync.handle_chunk(req.generation, c);

		let advance = sync.update(5.0);
		assert!(advance.fetch.is_none());

		let advance = sync.update(31.0);
		assert!(advance.fetch.is_some());
	}

	#[test]
	fn exhausted_log_stops_prefetching() {
		let (mut sync, req) = started();
		sync.handle_chunk(req.generation, chunk(&[VOD_START + 1.0], None));
		let advance = sync.update(10.0);
		assert!(advance.fetch.is_none());
	}

	#[test]
	fn clock_is_monotonic_within_a_run() {
		let (mut sync, req) = started();
		sync.handle_chunk(req.generation, chunk(&[VOD_START + 4.0], Some("a")));

		sync.update(6.0);
		// A backwards offset without a seek does not rewind the clock.
		let advance = sync.update(2.0);
		assert!(advance.due.is_empty());

		sync.handle_chunk(req.generation, chunk(&[VOD_START + 5.0], Some("b")));
		let advance = sync.update(2.0);
		// 5.0 is before the (still advanced) clock, so it is due at once.
		assert_eq!(advance.due.len(), 1);
	}

	#[test]
	fn fetch_failures_retry_then_give_up_and_pause() {
		let (mut sync, req) = started();
		let mut generation = req.generation;

		for _ in 0..3 {
			match sync.handle_chunk_error(generation) {
				FetchFailure::Retry { request, delay } => {
					assert!(delay >= RETRY_MIN_DELAY);
					generation = request.generation;
				}
				other => panic!("expected retry, got {other:?}"),
			}
		}

		assert!(matches!(sync.handle_chunk_error(generation), FetchFailure::GaveUp));
		assert!(sync.is_paused());
		assert!(sync.update(100.0).fetch.is_none());
	}

	#[test]
	fn stale_errors_are_ignored() {
		let (mut sync, req) = started();
		let old = req.generation;
		sync.seek(10.0);
		assert!(matches!(sync.handle_chunk_error(old), FetchFailure::Stale));
		assert!(!sync.is_paused());
	}

	#[test]
	fn stop_clears_state_and_invalidates_everything() {
		let (mut sync, req) = started();
		sync.handle_chunk(req.generation, chunk(&[VOD_START + 1.0], Some("a")));
		sync.stop();
		assert!(!sync.is_active());

		sync.handle_chunk(req.generation, chunk(&[VOD_START + 2.0], Some("b")));
		assert!(sync.update(10.0).due.is_empty());
	}

	#[test]
	fn comment_pages_deserialize_with_cursor() {
		let json = r##"{
			"comments": [{
				"created_at": "2016-05-20T12:00:00Z",
				"commenter": {"name": "someone", "display_name": "SomeOne"},
				"message": {"body": "hi", "user_color": "#FF0000", "bits_spent": 100}
			}],
			"_next": "abc123"
		}"##;
		let page: CommentsResponse = serde_json::from_str(json).expect("page json");
		assert_eq!(page.comments.len(), 1);
		assert_eq!(page.next.as_deref(), Some("abc123"));
		assert_eq!(page.comments[0].message.bits_spent, Some(100));
		assert!(page.comments[0].message.emoticons.is_empty());
	}

	#[test]
	fn synthesized_comment_lines_decode_as_privmsg() {
		let channel = ChannelName::new("chan").unwrap();
		let c = CommentDto {
			created_at: "2016-05-20T12:00:00Z".to_string(),
			commenter: CommenterDto {
				name: "Someone".to_string(),
				display_name: Some("SomeOne".to_string()),
			},
			message: CommentMessageDto {
				body: "hello Kappa".to_string(),
				user_color: Some("#1E90FF".to_string()),
				user_badges: vec![CommentBadgeDto {
					id: "subscriber".to_string(),
					version: "6".to_string(),
				}],
				emoticons: vec![CommentEmoticonDto {
					id: "25".to_string(),
					begin: 6,
					end: 10,
				}],
				bits_spent: None,
				is_action: false,
			},
		};

		let m = comment_to_message(&channel, c).expect("message");
		let line = tubechat_protocol::IrcLine::parse(&m.raw_line).expect("line");
		assert_eq!(line.command, tubechat_protocol::ChatCommand::Privmsg);
		assert_eq!(line.tag("display-name"), Some("SomeOne"));
		assert_eq!(line.tag("badges"), Some("subscriber/6"));
		assert_eq!(line.tag("emotes"), Some("25:6-10"));
		assert_eq!(line.body(), "hello Kappa");
		assert_eq!(line.channel().unwrap().as_str(), "chan");
	}
}
