#![forbid(unsafe_code)]

use tubechat_domain::ChannelName;

use crate::tags::{Tags, decode_tags};
use crate::ProtocolError;

/// Commands the chat backend reacts to. Anything else is `Other` and is
/// ignored upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChatCommand {
	/// A chat message (possibly carrying a bits cheer).
	Privmsg,
	/// A direct message outside any channel.
	Whisper,
	/// Server or channel notice text.
	Notice,
	/// Sub/raid/ritual announcement with a system message.
	UserNotice,
	/// A user's messages were purged (or chat was cleared).
	ClearChat,
	/// Own per-channel state (color, badges, mod).
	UserState,
	/// Own global state, sent after login.
	GlobalUserState,
	/// Channel mode flags.
	RoomState,
	/// Keepalive; must be answered with PONG.
	Ping,
	/// Unrecognized command keyword, kept verbatim.
	Other(String),
}

impl ChatCommand {
	fn classify(keyword: &str) -> Self {
		match keyword {
			"PRIVMSG" => Self::Privmsg,
			"WHISPER" => Self::Whisper,
			"NOTICE" => Self::Notice,
			"USERNOTICE" => Self::UserNotice,
			"CLEARCHAT" => Self::ClearChat,
			"USERSTATE" => Self::UserState,
			"GLOBALUSERSTATE" => Self::GlobalUserState,
			"ROOMSTATE" => Self::RoomState,
			"PING" => Self::Ping,
			other => Self::Other(other.to_string()),
		}
	}
}

/// One decoded protocol line: tags, optional prefix, command, middle
/// params, and the trailing parameter taken verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IrcLine {
	pub tags: Tags,
	pub prefix: Option<String>,
	pub command: ChatCommand,
	pub params: Vec<String>,
	pub trailing: Option<String>,
}

impl IrcLine {
	/// Decode one raw line of the form
	/// `[@tag1=val1;tag2=val2 ][:prefix ]COMMAND param1 param2 :trailing`.
	///
	/// The trailing parameter keeps any further colons verbatim.
	pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
		let raw = raw.trim_end_matches(['\r', '\n']);
		if raw.is_empty() {
			return Err(ProtocolError::Empty);
		}

		let (tags, rest) = if let Some(blob) = raw.strip_prefix('@') {
			let (blob, rest) = blob
				.split_once(' ')
				.ok_or_else(|| ProtocolError::MissingCommand(raw.to_string()))?;
			(decode_tags(blob)?, rest)
		} else {
			(Tags::new(), raw)
		};

		let (prefix, rest) = if let Some(rest) = rest.strip_prefix(':') {
			let (prefix, rest) = rest
				.split_once(' ')
				.ok_or_else(|| ProtocolError::MissingCommand(raw.to_string()))?;
			(Some(prefix.to_string()), rest)
		} else {
			(None, rest)
		};

		let (middle, trailing) = match rest.split_once(" :") {
			Some((middle, trailing)) => (middle, Some(trailing.to_string())),
			None => (rest, None),
		};

		let mut words = middle.split_ascii_whitespace();
		let keyword = words.next().ok_or_else(|| ProtocolError::MissingCommand(raw.to_string()))?;
		let params: Vec<String> = words.map(str::to_string).collect();

		Ok(Self {
			tags,
			prefix,
			command: ChatCommand::classify(keyword),
			params,
			trailing,
		})
	}

	/// Channel named by the first `#`-prefixed middle param, if any.
	pub fn channel(&self) -> Option<ChannelName> {
		self.params
			.iter()
			.find(|p| p.starts_with('#'))
			.and_then(|p| ChannelName::new(p.as_str()).ok())
	}

	/// The nick portion of the prefix (`nick!user@host`).
	pub fn nick(&self) -> Option<&str> {
		let prefix = self.prefix.as_deref()?;
		Some(prefix.split('!').next().unwrap_or(prefix))
	}

	/// The message body (trailing param), empty if absent.
	pub fn body(&self) -> &str {
		self.trailing.as_deref().unwrap_or("")
	}

	/// Tag value lookup, `None` when absent.
	pub fn tag(&self, name: &str) -> Option<&str> {
		self.tags.get(name).map(String::as_str)
	}

	/// Tag interpreted as a boolean flag (`"1"` is true).
	pub fn flag(&self, name: &str) -> bool {
		self.tag(name) == Some("1")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_privmsg_with_tags_prefix_and_trailing() {
		let raw = "@badges=moderator/1;color=#00FF7F;display-name=Some\\sOne;mod=1 \
			:someone!someone@someone.tmi.twitch.tv PRIVMSG #channel :hello there";
		let line = IrcLine::parse(raw).unwrap();
		assert_eq!(line.command, ChatCommand::Privmsg);
		assert_eq!(line.tag("display-name"), Some("Some One"));
		assert!(line.flag("mod"));
		assert_eq!(line.nick(), Some("someone"));
		assert_eq!(line.channel().unwrap().as_str(), "channel");
		assert_eq!(line.body(), "hello there");
	}

	#[test]
	fn trailing_keeps_further_colons_verbatim() {
		let line = IrcLine::parse(":a!a@a PRIVMSG #c :see: this :stays").unwrap();
		assert_eq!(line.body(), "see: this :stays");
	}

	#[test]
	fn parses_ping_without_prefix() {
		let line = IrcLine::parse("PING :tmi.twitch.tv").unwrap();
		assert_eq!(line.command, ChatCommand::Ping);
		assert_eq!(line.body(), "tmi.twitch.tv");
	}

	#[test]
	fn classifies_unknown_commands_as_other() {
		let line = IrcLine::parse(":tmi.twitch.tv 372 justinfan123 :You are in a maze").unwrap();
		assert_eq!(line.command, ChatCommand::Other("372".to_string()));
	}

	#[test]
	fn rejects_empty_and_tag_only_lines() {
		assert_eq!(IrcLine::parse("\r\n"), Err(ProtocolError::Empty));
		assert!(matches!(
			IrcLine::parse("@badges=moderator/1"),
			Err(ProtocolError::MissingCommand(_))
		));
	}
}
