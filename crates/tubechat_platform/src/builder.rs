#![forbid(unsafe_code)]

use std::collections::HashMap;

use tracing::{debug, warn};
use tubechat_domain::{Badge, ChannelName};
use tubechat_protocol::{ChatCommand, IrcLine, parse_emote_tag};

use crate::blocklist::BlockList;
use crate::markup::{BitsPatternSet, resolve_message};
use crate::{ChatEvent, InlineImage, Segment};

const ACTION_PREFIX: &str = "\u{1}ACTION ";
const ACTION_SUFFIX: char = '\u{1}';

/// Per-channel, per-user chat state: last seen color and mod/subscriber
/// flags, plus the channel's cached badge set. Single writer (the builder);
/// last write wins.
#[derive(Debug, Default)]
pub struct ChannelStateStore {
	channels: HashMap<ChannelName, ChannelState>,
}

#[derive(Debug, Default)]
struct ChannelState {
	colors: HashMap<String, String>,
	moderators: HashMap<String, bool>,
	subscribers: HashMap<String, bool>,
	badge_set: Option<Vec<Badge>>,
}

impl ChannelStateStore {
	fn entry(&mut self, channel: &ChannelName) -> &mut ChannelState {
		self.channels.entry(channel.clone()).or_default()
	}

	/// Install the channel's badge set (refreshed on join).
	pub fn set_badge_set(&mut self, channel: &ChannelName, badges: Vec<Badge>) {
		self.entry(channel).badge_set = Some(badges);
	}

	pub fn badge_set(&self, channel: &ChannelName) -> Option<&[Badge]> {
		self.channels.get(channel).and_then(|c| c.badge_set.as_deref())
	}

	/// Drop everything cached for a channel (on leave).
	pub fn invalidate_channel(&mut self, channel: &ChannelName) {
		self.channels.remove(channel);
	}

	fn record_user(&mut self, channel: &ChannelName, login: &str, line: &IrcLine) {
		let state = self.entry(channel);
		if let Some(color) = line.tag("color")
			&& !color.is_empty()
		{
			state.colors.insert(login.to_string(), color.to_string());
		}
		if line.tag("mod").is_some() {
			state.moderators.insert(login.to_string(), line.flag("mod"));
		}
		if line.tag("subscriber").is_some() {
			state.subscribers.insert(login.to_string(), line.flag("subscriber"));
		}
	}

	fn color_of(&self, channel: &ChannelName, login: &str) -> Option<&str> {
		self.channels.get(channel)?.colors.get(login).map(String::as_str)
	}

	fn mod_of(&self, channel: &ChannelName, login: &str) -> bool {
		self.channels
			.get(channel)
			.and_then(|c| c.moderators.get(login))
			.copied()
			.unwrap_or(false)
	}

	fn subscriber_of(&self, channel: &ChannelName, login: &str) -> bool {
		self.channels
			.get(channel)
			.and_then(|c| c.subscribers.get(login))
			.copied()
			.unwrap_or(false)
	}
}

/// A built chat event plus the badge image keys the renderer will need;
/// the session feeds the keys to the reference cache before emission.
#[derive(Debug, Clone)]
pub struct BuiltMessage {
	pub event: ChatEvent,
	pub badge_keys: Vec<String>,
}

/// Turns decoded lines into [`ChatEvent`]s, consulting the resolver, the
/// channel state store, and the block list.
#[derive(Debug, Default)]
pub struct EventBuilder {
	state: ChannelStateStore,
	own_login: Option<String>,
	global_bits: BitsPatternSet,
	channel_bits: HashMap<ChannelName, BitsPatternSet>,
	global_emote_codes: HashMap<String, String>,
	channel_emote_codes: HashMap<ChannelName, HashMap<String, String>>,
}

impl EventBuilder {
	pub fn new(own_login: Option<String>) -> Self {
		Self {
			own_login,
			..Self::default()
		}
	}

	pub fn set_own_login(&mut self, login: impl Into<String>) {
		self.own_login = Some(login.into());
	}

	pub fn state_mut(&mut self) -> &mut ChannelStateStore {
		&mut self.state
	}

	pub fn set_global_bits<I, S>(&mut self, prefixes: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.global_bits = BitsPatternSet::compile(prefixes);
	}

	pub fn set_channel_bits<I, S>(&mut self, channel: &ChannelName, prefixes: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.channel_bits.insert(channel.clone(), BitsPatternSet::compile(prefixes));
	}

	pub fn set_global_emote_codes(&mut self, codes: HashMap<String, String>) {
		self.global_emote_codes = codes;
	}

	pub fn set_channel_emote_codes(&mut self, channel: &ChannelName, codes: HashMap<String, String>) {
		self.channel_emote_codes.insert(channel.clone(), codes);
	}

	/// The third-party code map for a channel (channel-specific first).
	pub fn emote_codes_for(&self, channel: Option<&ChannelName>) -> Vec<&HashMap<String, String>> {
		let mut maps = Vec::with_capacity(2);
		if let Some(channel) = channel
			&& let Some(m) = self.channel_emote_codes.get(channel)
		{
			maps.push(m);
		}
		maps.push(&self.global_emote_codes);
		maps
	}

	/// Drop channel-scoped pattern and badge caches (on leave).
	pub fn invalidate_channel(&mut self, channel: &ChannelName) {
		self.channel_bits.remove(channel);
		self.channel_emote_codes.remove(channel);
		self.state.invalidate_channel(channel);
	}

	/// Build a chat event from one decoded line, or `None` when the line is
	/// suppressed (blocked author), carries only state, or is unrecognized.
	pub fn build(&mut self, line: &IrcLine, blocked: &BlockList) -> Option<BuiltMessage> {
		match &line.command {
			ChatCommand::Privmsg => self.build_privmsg(line, blocked),
			ChatCommand::Whisper => self.build_whisper(line, blocked),
			ChatCommand::UserNotice => self.build_user_notice(line, blocked),
			ChatCommand::Notice => Some(BuiltMessage {
				event: notice_event(line.channel(), line.body().to_string()),
				badge_keys: Vec::new(),
			}),
			ChatCommand::ClearChat => Some(BuiltMessage {
				event: notice_event(line.channel(), clear_chat_text(line)),
				badge_keys: Vec::new(),
			}),
			ChatCommand::UserState | ChatCommand::GlobalUserState => {
				if let (Some(channel), Some(login)) = (line.channel(), self.own_login.clone()) {
					self.state.record_user(&channel, &login, line);
				}
				None
			}
			ChatCommand::RoomState | ChatCommand::Ping | ChatCommand::Other(_) => None,
		}
	}

	fn build_privmsg(&mut self, line: &IrcLine, blocked: &BlockList) -> Option<BuiltMessage> {
		let channel = line.channel()?;
		let login = line.nick()?.to_ascii_lowercase();

		self.state.record_user(&channel, &login, line);

		if blocked.is_blocked(&login) && self.own_login.as_deref() != Some(login.as_str()) {
			debug!(%channel, user = %login, "suppressing message from blocked user");
			return None;
		}

		let (body, is_action) = strip_action(line.body());

		let emote_ranges = match line.tag("emotes") {
			Some(tag) => match parse_emote_tag(tag) {
				Ok(ranges) => ranges,
				Err(e) => {
					warn!(%channel, error = %e, "dropping malformed emotes tag");
					Vec::new()
				}
			},
			None => Vec::new(),
		};

		let mut bits_sets: Vec<&BitsPatternSet> = Vec::with_capacity(2);
		if let Some(set) = self.channel_bits.get(&channel) {
			bits_sets.push(set);
		}
		bits_sets.push(&self.global_bits);

		let codes = self.emote_codes_for(Some(&channel));
		let resolved = resolve_message(body, &emote_ranges, &bits_sets, &codes);

		let bits = if resolved.cheer_total > 0 {
			Some(resolved.cheer_total)
		} else {
			line.tag("bits").and_then(|b| b.parse().ok())
		};

		let (badges, badge_keys) = self.scoped_badges(line, Some(&channel));

		let color = line
			.tag("color")
			.filter(|c| !c.is_empty())
			.map(str::to_string)
			.or_else(|| self.state.color_of(&channel, &login).map(str::to_string));

		// Tags win; otherwise the last recorded state for the user holds.
		let is_mod = if line.tag("mod").is_some() {
			line.flag("mod")
		} else {
			self.state.mod_of(&channel, &login)
		};
		let is_subscriber = if line.tag("subscriber").is_some() {
			line.flag("subscriber")
		} else {
			self.state.subscriber_of(&channel, &login)
		};

		let event = ChatEvent {
			author: display_name(line, &login),
			channel: Some(channel),
			segments: resolved.segments,
			color,
			is_subscriber,
			is_turbo: line.flag("turbo"),
			is_mod,
			is_action,
			badges,
			notice: None,
			is_whisper: false,
			bits,
		};

		Some(BuiltMessage { event, badge_keys })
	}

	fn build_whisper(&mut self, line: &IrcLine, blocked: &BlockList) -> Option<BuiltMessage> {
		let login = line.nick()?.to_ascii_lowercase();
		if blocked.is_blocked(&login) && self.own_login.as_deref() != Some(login.as_str()) {
			debug!(user = %login, "suppressing whisper from blocked user");
			return None;
		}

		let (body, is_action) = strip_action(line.body());
		let emote_ranges = line
			.tag("emotes")
			.and_then(|tag| parse_emote_tag(tag).ok())
			.unwrap_or_default();
		let codes = self.emote_codes_for(None);
		let resolved = resolve_message(body, &emote_ranges, &[], &codes);
		let (badges, badge_keys) = self.scoped_badges(line, None);

		let event = ChatEvent {
			author: display_name(line, &login),
			channel: None,
			segments: resolved.segments,
			color: line.tag("color").filter(|c| !c.is_empty()).map(str::to_string),
			is_subscriber: false,
			is_turbo: line.flag("turbo"),
			is_mod: false,
			is_action,
			badges,
			notice: None,
			is_whisper: true,
			bits: None,
		};

		Some(BuiltMessage { event, badge_keys })
	}

	fn build_user_notice(&mut self, line: &IrcLine, blocked: &BlockList) -> Option<BuiltMessage> {
		let channel = line.channel();
		let system = line.tag("system-msg").unwrap_or_default().to_string();

		// An attached user message renders like a normal chat line under the
		// system text.
		let mut built = if !line.body().is_empty() {
			self.build_privmsg_from_notice(line, blocked)?
		} else {
			BuiltMessage {
				event: notice_event(channel, String::new()),
				badge_keys: Vec::new(),
			}
		};
		built.event.notice = Some(system);
		Some(built)
	}

	fn build_privmsg_from_notice(&mut self, line: &IrcLine, blocked: &BlockList) -> Option<BuiltMessage> {
		let login = line.tag("login").map(str::to_ascii_lowercase).or_else(|| {
			line.nick().map(|n| n.to_ascii_lowercase())
		})?;
		if blocked.is_blocked(&login) && self.own_login.as_deref() != Some(login.as_str()) {
			return None;
		}

		let channel = line.channel()?;
		let emote_ranges = line
			.tag("emotes")
			.and_then(|tag| parse_emote_tag(tag).ok())
			.unwrap_or_default();
		let codes = self.emote_codes_for(Some(&channel));
		let resolved = resolve_message(line.body(), &emote_ranges, &[], &codes);
		let (badges, badge_keys) = self.scoped_badges(line, Some(&channel));

		let event = ChatEvent {
			author: display_name(line, &login),
			channel: Some(channel),
			segments: resolved.segments,
			color: line.tag("color").filter(|c| !c.is_empty()).map(str::to_string),
			is_subscriber: line.flag("subscriber"),
			is_turbo: line.flag("turbo"),
			is_mod: line.flag("mod"),
			is_action: false,
			badges,
			notice: None,
			is_whisper: false,
			bits: None,
		};
		Some(BuiltMessage { event, badge_keys })
	}

	/// Parse the badges tag and scope it to the channel's cached badge set
	/// when one is loaded. Returns the badges plus their download keys.
	fn scoped_badges(&self, line: &IrcLine, channel: Option<&ChannelName>) -> (Vec<Badge>, Vec<String>) {
		let mut badges: Vec<Badge> = line
			.tag("badges")
			.unwrap_or_default()
			.split(',')
			.filter(|s| !s.is_empty())
			.filter_map(|s| Badge::parse(s).ok())
			.collect();

		if let Some(channel) = channel
			&& let Some(set) = self.state.badge_set(channel)
		{
			badges.retain(|b| set.contains(b));
		}

		let keys = badges.iter().map(Badge::key).collect();
		(badges, keys)
	}
}

fn display_name(line: &IrcLine, login: &str) -> String {
	line.tag("display-name")
		.filter(|d| !d.is_empty())
		.map(str::to_string)
		.unwrap_or_else(|| login.to_string())
}

fn notice_event(channel: Option<ChannelName>, text: String) -> ChatEvent {
	ChatEvent {
		author: String::new(),
		channel,
		segments: Vec::new(),
		color: None,
		is_subscriber: false,
		is_turbo: false,
		is_mod: false,
		is_action: false,
		badges: Vec::new(),
		notice: Some(text),
		is_whisper: false,
		bits: None,
	}
}

fn clear_chat_text(line: &IrcLine) -> String {
	let target = line.body();
	if target.is_empty() {
		return "chat was cleared".to_string();
	}
	match line.tag("ban-duration") {
		Some(secs) => format!("{target} was timed out for {secs}s"),
		None => format!("{target} was banned"),
	}
}

/// `/me`-style messages arrive wrapped in `\x01ACTION ...\x01`.
fn strip_action(body: &str) -> (&str, bool) {
	match body.strip_prefix(ACTION_PREFIX) {
		Some(rest) => (rest.trim_end_matches(ACTION_SUFFIX), true),
		None => (body, false),
	}
}

/// Replace shortcodes of the provided code→id map with emote image
/// segments; used for the local echo of a sent message.
pub fn substitute_emotes(text: &str, codes: &HashMap<String, String>) -> Vec<Segment> {
	if codes.is_empty() {
		return vec![Segment::Text {
			text: text.to_string(),
		}];
	}

	let mut segments: Vec<Segment> = Vec::new();
	let mut pending = String::new();
	for (i, token) in text.split(' ').enumerate() {
		if i > 0 {
			pending.push(' ');
		}
		match codes.get(token) {
			Some(id) => {
				if !pending.is_empty() {
					segments.push(Segment::Text {
						text: std::mem::take(&mut pending),
					});
				}
				segments.push(Segment::Image {
					image: InlineImage::emote(id),
					source: token.to_string(),
				});
			}
			None => pending.push_str(token),
		}
	}
	if !pending.is_empty() {
		segments.push(Segment::Text { text: pending });
	}
	segments
}
