#![forbid(unsafe_code)]

pub mod assets;
pub mod blocklist;
pub mod builder;
pub mod markup;
pub mod replay;
pub mod session;

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tubechat_domain::{Badge, ChannelId, ChannelName, UserLogin, VodId};

/// Source of an inline image reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InlineImageKind {
	/// First-party emote named by the emote tag.
	Emote,
	/// Bits-cheer tier image.
	Bits,
	/// Emote resolved via an external code lookup.
	ThirdPartyEmote,
}

/// A reference to an inline image within a message, uniform across all
/// three sources. `key` is a lookup key for the download layer, not a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
	pub kind: InlineImageKind,
	pub key: String,

	/// Rendered after the image (e.g. the cheer amount).
	#[serde(default)]
	pub text_suffix: Option<String>,

	#[serde(default)]
	pub suffix_color: Option<String>,
}

impl InlineImage {
	pub fn emote(key: impl Into<String>) -> Self {
		Self {
			kind: InlineImageKind::Emote,
			key: key.into(),
			text_suffix: None,
			suffix_color: None,
		}
	}

	pub fn third_party(key: impl Into<String>) -> Self {
		Self {
			kind: InlineImageKind::ThirdPartyEmote,
			key: key.into(),
			text_suffix: None,
			suffix_color: None,
		}
	}
}

/// One run of a message: plain text or an inline image. The image variant
/// keeps the source substring so the original text reconstructs exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
	Text {
		text: String,
	},
	Image {
		image: InlineImage,
		source: String,
	},
}

impl Segment {
	/// The source text this segment covers.
	pub fn source_text(&self) -> &str {
		match self {
			Segment::Text { text } => text,
			Segment::Image { source, .. } => source,
		}
	}
}

/// Reconstruct the original message text from its segments.
pub fn segments_to_text(segments: &[Segment]) -> String {
	segments.iter().map(Segment::source_text).collect()
}

/// One render-ready chat event. Built once, handed to the renderer by
/// value; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
	/// Display name when the tag carries one, else the login.
	pub author: String,

	pub channel: Option<ChannelName>,

	pub segments: Vec<Segment>,

	#[serde(default)]
	pub color: Option<String>,

	pub is_subscriber: bool,
	pub is_turbo: bool,
	pub is_mod: bool,
	pub is_action: bool,

	/// Badges named by the tag, scoped to the channel's badge set.
	pub badges: Vec<Badge>,

	/// System text for channel notices (sub/raid announcements, purges).
	#[serde(default)]
	pub notice: Option<String>,

	pub is_whisper: bool,

	/// Combined cheer amount of all bits matches in the message.
	#[serde(default)]
	pub bits: Option<u64>,
}

impl ChatEvent {
	pub fn is_channel_notice(&self) -> bool {
		self.notice.is_some()
	}
}

/// Session connection status.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
	pub connected: bool,
	pub detail: String,
	pub last_error: Option<String>,
	pub time: SystemTime,
}

/// Session → embedder event message. One channel carries every event kind;
/// the enum replaces per-kind signal wiring.
#[derive(Debug, Clone)]
pub enum SessionEvent {
	/// An accepted, fully built chat event.
	Message(Box<ChatEvent>),

	/// Raw server/channel notice text.
	Notice(String),

	/// Connection state change or transport/fetch error surface.
	Status(ConnectionStatus),

	/// A replay or resource fetch exhausted its retries.
	DownloadError(String),

	/// Every key of the current reference batch has resolved.
	BulkDownloadComplete,

	/// Confirmed block-list mutations.
	UserBlocked(UserLogin),
	UserUnblocked(UserLogin),
}

/// Embedder → session control message.
#[derive(Debug)]
pub enum SessionControl {
	/// Join a channel (implies login first if not yet authenticated).
	Join {
		channel: ChannelName,
		channel_id: ChannelId,
	},

	/// Part the current channel; the session stays logged in.
	Leave,

	/// Drop the socket and stay down until `Reopen` or `Join`.
	Disconnect,

	/// Reconnect and re-login after a disconnect.
	Reopen,

	/// Send a chat message to the joined channel. `emote_substitutions`
	/// maps shortcodes to emote ids for the locally echoed event.
	SendMessage {
		text: String,
		emote_substitutions: HashMap<String, String>,
	},

	/// Enter replay mode for a VOD, anchored at `playback_offset`.
	Replay {
		channel: ChannelName,
		channel_id: ChannelId,
		vod_id: VodId,
		vod_start_epoch: f64,
		playback_offset: f64,
	},

	/// Jump the replay clock to a new playback offset.
	ReplaySeek {
		offset: f64,
	},

	/// Advance the replay clock; due messages are emitted.
	ReplayUpdate {
		offset: f64,
	},

	/// Leave replay mode and clear all replay state.
	ReplayStop,

	/// Request a block or unblock; the set mutates only on confirmation.
	EditUserBlock {
		username: UserLogin,
		block: bool,
	},

	/// Request a graceful shutdown.
	Shutdown,
}

/// Helper types for wiring a session.
pub type SessionControlTx = mpsc::Sender<SessionControl>;
pub type SessionControlRx = mpsc::Receiver<SessionControl>;
pub type SessionEventTx = mpsc::Sender<SessionEvent>;
pub type SessionEventRx = mpsc::Receiver<SessionEvent>;

/// Build a standard bounded channel pair.
pub fn bounded_session_channels(
	control_capacity: usize,
	events_capacity: usize,
) -> (SessionControlTx, SessionControlRx, SessionEventTx, SessionEventRx) {
	let (control_tx, control_rx) = mpsc::channel(control_capacity);
	let (events_tx, events_rx) = mpsc::channel(events_capacity);
	(control_tx, control_rx, events_tx, events_rx)
}

/// Build a status event.
pub fn status(connected: bool, detail: impl Into<String>) -> SessionEvent {
	SessionEvent::Status(ConnectionStatus {
		connected,
		detail: detail.into(),
		last_error: None,
		time: SystemTime::now(),
	})
}

/// Build an error-carrying status event.
pub fn status_error(detail: impl Into<String>, err: impl std::fmt::Display) -> SessionEvent {
	SessionEvent::Status(ConnectionStatus {
		connected: false,
		detail: detail.into(),
		last_error: Some(err.to_string()),
		time: SystemTime::now(),
	})
}

/// Exponential backoff, doubling from `min` up to `max`.
pub(crate) fn backoff_delay(attempt: u32, min: std::time::Duration, max: std::time::Duration) -> std::time::Duration {
	let pow = attempt.min(16);
	let ms = min.as_millis().saturating_mul(1u128 << pow);
	let d = std::time::Duration::from_millis(ms.min(u64::MAX as u128) as u64);
	d.min(max).max(min)
}

/// Line-oriented transport seam. The session owns protocol semantics only;
/// connect/read/write primitives (and TLS) live behind this trait.
#[async_trait::async_trait]
pub trait Transport: Send {
	async fn connect(&mut self, host: &str, port: u16, tls: bool) -> anyhow::Result<()>;

	async fn write_line(&mut self, line: &str) -> anyhow::Result<()>;

	/// Next line from the peer. `None` means the connection closed.
	async fn next_line(&mut self) -> Option<anyhow::Result<String>>;

	/// Drop the connection; subsequent reads/writes fail until `connect`.
	async fn close(&mut self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn segments_reconstruct_source_text() {
		let segments = vec![
			Segment::Text {
				text: "hello ".to_string(),
			},
			Segment::Image {
				image: InlineImage::emote("25"),
				source: "Kappa".to_string(),
			},
			Segment::Text {
				text: " bye".to_string(),
			},
		];
		assert_eq!(segments_to_text(&segments), "hello Kappa bye");
	}
}
