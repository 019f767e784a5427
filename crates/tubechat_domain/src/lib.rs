#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "errors")]
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "errors", derive(Error))]
pub enum ParseIdError {
	#[cfg_attr(feature = "errors", error("empty value"))]
	Empty,
	#[cfg_attr(feature = "errors", error("invalid format: {0}"))]
	InvalidFormat(String),
}

/// Chat channel name: the broadcaster login, lowercase, without the IRC `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ChannelName(String);

impl ChannelName {
	/// Create a non-empty channel name. A leading `#` is stripped and the
	/// rest lowercased, so `#Shroud` and `shroud` name the same channel.
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into();
		let name = name.trim().trim_start_matches('#');
		if name.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if name.contains(char::is_whitespace) {
			return Err(ParseIdError::InvalidFormat(name.to_string()));
		}
		Ok(Self(name.to_ascii_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// The wire form sent in JOIN/PART/PRIVMSG params.
	pub fn irc_channel(&self) -> String {
		format!("#{}", self.0)
	}
}

impl fmt::Display for ChannelName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelName::new(s)
	}
}

/// Platform-assigned numeric channel identifier (kept as a string on the
/// wire, as the backing APIs return it).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ChannelId(String);

impl ChannelId {
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelId::new(s.to_string())
	}
}

/// Video-on-demand identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct VodId(pub u64);

impl fmt::Display for VodId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for VodId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim().trim_start_matches('v');
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		s.parse::<u64>().map(VodId).map_err(|_| ParseIdError::InvalidFormat(s.to_string()))
	}
}

/// A chat user's login name (lowercase on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct UserLogin(String);

impl UserLogin {
	pub fn new(login: impl Into<String>) -> Result<Self, ParseIdError> {
		let login = login.into();
		if login.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(login.to_ascii_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for UserLogin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserLogin {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserLogin::new(s)
	}
}

/// A chat badge: `(name, version)` as carried by the `badges` tag, e.g.
/// `subscriber/12` or `moderator/1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Badge {
	pub name: String,
	pub version: String,
}

impl Badge {
	pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			version: version.into(),
		}
	}

	/// Stable download key for the badge image (`name/version`).
	pub fn key(&self) -> String {
		format!("{}/{}", self.name, self.version)
	}

	/// Parse one `name/version` element of the `badges` tag.
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		let (name, version) = s
			.split_once('/')
			.ok_or_else(|| ParseIdError::InvalidFormat(format!("expected name/version, got {s}")))?;
		if name.is_empty() || version.is_empty() {
			return Err(ParseIdError::InvalidFormat(s.to_string()));
		}
		Ok(Self::new(name, version))
	}
}

impl fmt::Display for Badge {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.name, self.version)
	}
}

impl FromStr for Badge {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Badge::parse(s)
	}
}
