#![forbid(unsafe_code)]

pub mod endpoint {
	/// Default plaintext chat port.
	pub const DEFAULT_PORT: u16 = 6667;
	/// Default TLS chat port.
	pub const DEFAULT_TLS_PORT: u16 = 6697;

	/// Parsed `irc://host[:port]` / `ircs://host[:port]` chat endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct ChatEndpoint {
		pub host: String,
		pub port: u16,
		pub tls: bool,
	}

	impl ChatEndpoint {
		/// Returns `host:port`.
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Parse a chat endpoint string. The scheme selects TLS (`ircs`)
		/// or plaintext (`irc`); an omitted port takes the scheme default.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected irc://host[:port])".to_string());
			}

			let (tls, rest) = if let Some(rest) = s.strip_prefix("ircs://") {
				(true, rest)
			} else if let Some(rest) = s.strip_prefix("irc://") {
				(false, rest)
			} else {
				return Err(format!("invalid endpoint (expected irc://host[:port] or ircs://host[:port]): {s}"));
			};

			if rest.contains('/') || rest.contains('?') || rest.contains('#') {
				return Err(format!("invalid endpoint (no path/query/fragment allowed): {s}"));
			}

			let (host, port) = match rest.rsplit_once(':') {
				Some((host, port_str)) => {
					let port: u16 = port_str
						.trim()
						.parse()
						.map_err(|_| format!("invalid endpoint port (expected 1..=65535): {s}"))?;
					if port == 0 {
						return Err(format!("invalid endpoint port (expected 1..=65535): {s}"));
					}
					(host, port)
				}
				None => (rest, if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT }),
			};

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host (expected irc://host[:port]): {s}"));
			}

			Ok(Self {
				host: host.to_string(),
				port,
				tls,
			})
		}
	}

	/// Validate `irc://host[:port]` / `ircs://host[:port]`.
	pub fn validate_chat_endpoint(s: &str) -> Result<(), String> {
		let _ = ChatEndpoint::parse(s)?;
		Ok(())
	}

}
