#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};
use tubechat_domain::{Badge, ChannelId, ChannelName, UserLogin};
use tubechat_protocol::{ChatCommand, IrcLine};
use tubechat_util::endpoint::ChatEndpoint;

use crate::assets::{self, ReferenceCache};
use crate::blocklist::{BlockList, BlockListClient};
use crate::builder::{BuiltMessage, EventBuilder, substitute_emotes};
use crate::replay::{ChunkRequest, FetchFailure, ReplayChatChunk, ReplayChunkFetcher, ReplaySync};
use crate::{
	ChatEvent, SessionControl, SessionControlRx, SessionEvent, SessionEventTx, Transport, backoff_delay, status,
	status_error,
};

const CAP_REQUEST: &str = "CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership";
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Live session configuration.
#[derive(Clone)]
pub struct SessionConfig {
	pub endpoint: ChatEndpoint,
	pub username: String,
	/// `oauth:`-prefixed token; `None` logs in anonymously.
	pub token: Option<String>,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
	/// Best-effort cap on how long message emission waits for badge/emote
	/// references to resolve.
	pub readiness_timeout: Duration,
}

impl SessionConfig {
	pub fn new(username: impl Into<String>) -> Self {
		Self {
			endpoint: ChatEndpoint {
				host: "irc.chat.twitch.tv".to_string(),
				port: tubechat_util::endpoint::DEFAULT_PORT,
				tls: false,
			},
			username: username.into(),
			token: None,
			reconnect_min_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
			readiness_timeout: Duration::from_secs(5),
		}
	}
}

/// Connection state machine. `Disconnected` is reentrant from every state
/// on socket error or explicit disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
	Disconnected,
	Connecting,
	Authenticating,
	Joined(ChannelName),
}

/// Everything a channel join fetches up front: badge image URLs, cheer
/// prefixes, and third-party emote codes (global + channel scope each).
#[derive(Debug, Clone, Default)]
pub struct ChannelResources {
	pub badge_urls: HashMap<String, String>,
	pub cheer_prefixes_global: Vec<String>,
	pub cheer_prefixes_channel: Vec<String>,
	pub emote_codes_global: HashMap<String, String>,
	pub emote_codes_channel: HashMap<String, String>,
}

/// Seam for the per-channel resource fetch dispatched on join.
#[async_trait::async_trait]
pub trait ChannelResourceFetcher: Send + Sync {
	/// Best-effort: individual source failures come back as empty maps.
	async fn fetch(&self, channel: &ChannelName, channel_id: &ChannelId) -> ChannelResources;
}

/// Default fetcher hitting the badge, bits-actions and third-party emote
/// endpoints concurrently.
pub struct HttpChannelResourceFetcher;

#[async_trait::async_trait]
impl ChannelResourceFetcher for HttpChannelResourceFetcher {
	async fn fetch(&self, channel: &ChannelName, channel_id: &ChannelId) -> ChannelResources {
		let (badges_global, badges_channel, bits_global, bits_channel, codes_global, codes_channel) = tokio::join!(
			assets::fetch_global_badge_urls(),
			assets::fetch_channel_badge_urls(channel_id),
			assets::fetch_global_cheer_prefixes(),
			assets::fetch_channel_cheer_prefixes(channel_id),
			assets::fetch_global_emote_codes(),
			assets::fetch_channel_emote_codes(channel_id),
		);

		fn or_empty<T: Default>(label: &str, channel: &ChannelName, r: anyhow::Result<T>) -> T {
			r.unwrap_or_else(|e| {
				warn!(%channel, error = %e, "{label} fetch failed; continuing without");
				T::default()
			})
		}

		let mut badge_urls = or_empty("global badge list", channel, badges_global);
		badge_urls.extend(or_empty::<HashMap<String, String>>("channel badge list", channel, badges_channel));

		ChannelResources {
			badge_urls,
			cheer_prefixes_global: or_empty("global cheer prefixes", channel, bits_global),
			cheer_prefixes_channel: or_empty("channel cheer prefixes", channel, bits_channel),
			emote_codes_global: or_empty("global emote codes", channel, codes_global),
			emote_codes_channel: or_empty("channel emote codes", channel, codes_channel),
		}
	}
}

/// Completions routed back into the session task. Fetches never mutate
/// session state directly; they arrive here and are applied in order.
enum FetchDone {
	ReplayChunk {
		generation: u64,
		result: anyhow::Result<ReplayChatChunk>,
	},
	BlockPage {
		offset: u32,
		result: anyhow::Result<crate::blocklist::BlockPage>,
	},
	BlockEdit {
		username: UserLogin,
		block: bool,
		result: anyhow::Result<()>,
	},
	ChannelResources {
		channel: ChannelName,
		resources: ChannelResources,
	},
}

enum Wake {
	Control(Option<SessionControl>),
	Line(Option<anyhow::Result<String>>),
	Fetch(FetchDone),
	FlushReady,
}

/// The live chat session: owns the socket lifecycle, login handshake,
/// channel membership, and the decode → build → emit pipeline. Replay mode
/// shares the pipeline but is driven by the replay clock instead of the
/// socket.
pub struct ChatSession<T: Transport> {
	cfg: SessionConfig,
	transport: T,
	state: SessionState,
	logged_in: bool,
	current_channel: Option<(ChannelName, ChannelId)>,
	/// A join requested before login confirmation; sent once logged in.
	pending_join: Option<(ChannelName, ChannelId)>,

	builder: EventBuilder,
	blocked: BlockList,
	refs: ReferenceCache,
	replay: ReplaySync,

	replay_fetcher: Arc<dyn ReplayChunkFetcher>,
	blocks_client: Arc<dyn BlockListClient>,
	resource_fetcher: Arc<dyn ChannelResourceFetcher>,

	/// `name/version` and emote keys resolved to image URLs so far.
	badge_urls: HashMap<String, String>,

	/// Raw lines held back until login is confirmed.
	pre_login_lines: Vec<String>,

	/// Built events held back until the reference batch completes.
	msg_queue: Vec<ChatEvent>,
	ready_deadline: Option<Instant>,

	fetch_tx: mpsc::Sender<FetchDone>,
	fetch_rx: mpsc::Receiver<FetchDone>,
}

impl<T: Transport> ChatSession<T> {
	pub fn new(
		cfg: SessionConfig,
		transport: T,
		replay_fetcher: Arc<dyn ReplayChunkFetcher>,
		blocks_client: Arc<dyn BlockListClient>,
		resource_fetcher: Arc<dyn ChannelResourceFetcher>,
	) -> Self {
		let (fetch_tx, fetch_rx) = mpsc::channel(64);
		let own_login = cfg.username.to_ascii_lowercase();
		Self {
			cfg,
			transport,
			state: SessionState::Disconnected,
			logged_in: false,
			current_channel: None,
			pending_join: None,
			builder: EventBuilder::new(Some(own_login)),
			blocked: BlockList::default(),
			refs: ReferenceCache::default(),
			replay: ReplaySync::default(),
			replay_fetcher,
			blocks_client,
			resource_fetcher,
			badge_urls: HashMap::new(),
			pre_login_lines: Vec::new(),
			msg_queue: Vec::new(),
			ready_deadline: None,
			fetch_tx,
			fetch_rx,
		}
	}

	pub fn state(&self) -> &SessionState {
		&self.state
	}

	/// Run the session until shutdown. Single task: every completion is
	/// applied run-to-completion before the next is taken.
	pub async fn run(mut self, mut control_rx: SessionControlRx, events_tx: SessionEventTx) -> anyhow::Result<()> {
		assets::ensure_asset_cache_pruner();
		let _ = events_tx.try_send(status(false, "chat session starting"));

		loop {
			let connected = self.state != SessionState::Disconnected;
			let flush_at = self.ready_deadline;

			let wake = tokio::select! {
				cmd = control_rx.recv() => Wake::Control(cmd),
				line = self.transport.next_line(), if connected => Wake::Line(line),
				Some(done) = self.fetch_rx.recv() => Wake::Fetch(done),
				_ = async { sleep_until(flush_at.expect("branch guarded")).await }, if flush_at.is_some() => Wake::FlushReady,
			};

			match wake {
				Wake::Control(None) => break,
				Wake::Control(Some(SessionControl::Shutdown)) => {
					info!("chat session received Shutdown");
					break;
				}
				Wake::Control(Some(cmd)) => self.handle_control(cmd, &events_tx).await,
				Wake::Line(Some(Ok(line))) => self.handle_line(&line, &events_tx).await,
				Wake::Line(Some(Err(e))) => self.process_error(e, &events_tx).await,
				Wake::Line(None) => self.process_error(anyhow!("connection closed by peer"), &events_tx).await,
				Wake::Fetch(done) => self.handle_fetch_done(done, &events_tx).await,
				Wake::FlushReady => self.flush_ready_queue(&events_tx, true).await,
			}
		}

		let _ = events_tx.try_send(status(false, "chat session stopped"));
		Ok(())
	}

	async fn handle_control(&mut self, cmd: SessionControl, events_tx: &SessionEventTx) {
		match cmd {
			SessionControl::Join { channel, channel_id } => {
				if self.state == SessionState::Disconnected && !self.open_and_login(events_tx).await {
					return;
				}

				// Login must be confirmed before JOIN goes out.
				if !self.logged_in {
					let _ = events_tx.try_send(status(true, format!("join #{channel} queued until login confirms")));
					self.pending_join = Some((channel, channel_id));
					return;
				}

				self.do_join(channel, channel_id, events_tx).await;
			}

			SessionControl::Leave => {
				self.pending_join = None;
				if let SessionState::Joined(channel) = self.state.clone() {
					let _ = self.send_raw(&format!("PART {}", channel.irc_channel()), events_tx).await;
					self.builder.invalidate_channel(&channel);
					self.current_channel = None;
					self.state = SessionState::Authenticating;
					let _ = events_tx.try_send(status(true, format!("left #{channel}")));
				}
			}

			SessionControl::Disconnect => {
				if self.state != SessionState::Disconnected {
					let _ = self.transport.write_line("QUIT").await;
					let _ = self.transport.close().await;
					self.state = SessionState::Disconnected;
					self.logged_in = false;
					self.pending_join = None;
					let _ = events_tx.try_send(status(false, "disconnected"));
				}
			}

			SessionControl::Reopen => {
				let _ = self.transport.close().await;
				self.state = SessionState::Disconnected;
				self.logged_in = false;
				self.reopen_socket(events_tx).await;
			}

			SessionControl::SendMessage {
				text,
				emote_substitutions,
			} => {
				let SessionState::Joined(channel) = self.state.clone() else {
					warn!("sendMessage outside a joined channel; dropping");
					return;
				};
				if !self.logged_in {
					warn!("sendMessage before login confirmation; dropping");
					return;
				}

				if !self
					.send_raw(&format!("PRIVMSG {} :{text}", channel.irc_channel()), events_tx)
					.await
				{
					return;
				}

				// Local echo with shortcode substitution applied.
				let event = ChatEvent {
					author: self.cfg.username.clone(),
					channel: Some(channel),
					segments: substitute_emotes(&text, &emote_substitutions),
					color: None,
					is_subscriber: false,
					is_turbo: false,
					is_mod: false,
					is_action: false,
					badges: Vec::new(),
					notice: None,
					is_whisper: false,
					bits: None,
				};
				let _ = events_tx.try_send(SessionEvent::Message(Box::new(event)));
			}

			SessionControl::Replay {
				channel,
				channel_id,
				vod_id,
				vod_start_epoch,
				playback_offset,
			} => {
				let request = self.replay.start(channel.clone(), vod_id, vod_start_epoch, playback_offset);
				self.spawn_replay_fetch(request, Duration::ZERO);
				self.spawn_channel_resources(channel, channel_id);
			}

			SessionControl::ReplaySeek { offset } => {
				if let Some(request) = self.replay.seek(offset) {
					self.spawn_replay_fetch(request, Duration::ZERO);
				}
			}

			SessionControl::ReplayUpdate { offset } => {
				let advance = self.replay.update(offset);
				for message in advance.due {
					match IrcLine::parse(&message.raw_line) {
						Ok(line) => self.dispatch_line(&line, events_tx).await,
						Err(e) => debug!(error = %e, "dropping malformed replay line"),
					}
				}
				if let Some(request) = advance.fetch {
					self.spawn_replay_fetch(request, Duration::ZERO);
				}
			}

			SessionControl::ReplayStop => {
				self.replay.stop();
			}

			SessionControl::EditUserBlock { username, block } => {
				let client = Arc::clone(&self.blocks_client);
				let tx = self.fetch_tx.clone();
				tokio::spawn(async move {
					let result = client.set_block(username.as_str(), block).await;
					let _ = tx.send(FetchDone::BlockEdit { username, block, result }).await;
				});
			}

			SessionControl::Shutdown => {}
		}
	}

	async fn do_join(&mut self, channel: ChannelName, channel_id: ChannelId, events_tx: &SessionEventTx) {
		if let SessionState::Joined(current) = self.state.clone() {
			if current == channel {
				debug!(%channel, "already joined");
				return;
			}
			let _ = self.send_raw(&format!("PART {}", current.irc_channel()), events_tx).await;
			self.builder.invalidate_channel(&current);
		}

		if !self.send_raw(&format!("JOIN {}", channel.irc_channel()), events_tx).await {
			return;
		}
		self.state = SessionState::Joined(channel.clone());
		self.current_channel = Some((channel.clone(), channel_id.clone()));
		let _ = events_tx.try_send(status(true, format!("joined #{channel}")));

		self.spawn_channel_resources(channel, channel_id);
		if let Some(page) = self.blocked.begin_fetch() {
			self.spawn_block_page(page.offset, page.limit);
		}
	}

	async fn handle_line(&mut self, raw: &str, events_tx: &SessionEventTx) {
		let line = match IrcLine::parse(raw) {
			Ok(line) => line,
			Err(e) => {
				debug!(error = %e, raw, "dropping malformed line");
				return;
			}
		};

		match &line.command {
			ChatCommand::Ping => {
				let _ = self.send_raw(&format!("PONG :{}", line.body()), events_tx).await;
				return;
			}

			// 001 (welcome) and 376 (end of MOTD) both confirm login.
			ChatCommand::Other(code) if code == "001" || code == "376" => {
				if !self.logged_in {
					self.logged_in = true;
					let _ = events_tx.try_send(status(true, "login confirmed"));

					let queued = std::mem::take(&mut self.pre_login_lines);
					for raw in queued {
						if let Ok(line) = IrcLine::parse(&raw) {
							self.dispatch_line(&line, events_tx).await;
						}
					}

					if let Some((channel, channel_id)) = self.pending_join.take() {
						self.do_join(channel, channel_id, events_tx).await;
					}
				}
				return;
			}

			ChatCommand::Notice if !self.logged_in && is_auth_failure(line.body()) => {
				// Unrecoverable: the caller must fix credentials and re-join.
				let _ = events_tx.try_send(status_error("login failed; staying disconnected", line.body()));
				let _ = self.transport.close().await;
				self.state = SessionState::Disconnected;
				return;
			}

			// Server notices surface as raw text, not as chat events.
			ChatCommand::Notice => {
				let _ = events_tx.try_send(SessionEvent::Notice(line.body().to_string()));
				return;
			}

			_ => {}
		}

		if !self.logged_in
			&& matches!(
				line.command,
				ChatCommand::Privmsg | ChatCommand::Whisper | ChatCommand::UserNotice
			) {
			self.pre_login_lines.push(raw.to_string());
			return;
		}

		self.dispatch_line(&line, events_tx).await;
	}

	async fn dispatch_line(&mut self, line: &IrcLine, events_tx: &SessionEventTx) {
		let Some(built) = self.builder.build(line, &self.blocked) else {
			return;
		};
		self.enqueue_or_emit(built, events_tx).await;
	}

	/// Emit immediately when every needed reference is resolved, otherwise
	/// queue until the batch completes or the readiness timeout fires.
	async fn enqueue_or_emit(&mut self, built: BuiltMessage, events_tx: &SessionEventTx) {
		let fresh = self.refs.bulk_request(built.badge_keys.into_iter());
		self.resolve_keys(fresh, events_tx).await;

		if self.refs.all_complete() {
			let _ = events_tx.try_send(SessionEvent::Message(Box::new(built.event)));
		} else {
			if self.ready_deadline.is_none() {
				self.ready_deadline = Some(Instant::now() + self.cfg.readiness_timeout);
			}
			self.msg_queue.push(built.event);
		}
	}

	async fn resolve_keys(&mut self, keys: Vec<String>, events_tx: &SessionEventTx) {
		let mut drained = false;
		for key in keys {
			if let Some(url) = self.badge_urls.get(&key).cloned()
				&& self.refs.complete(&key, Some(url))
			{
				drained = true;
			}
		}
		if drained {
			self.on_batch_complete(events_tx).await;
		}
	}

	async fn on_batch_complete(&mut self, events_tx: &SessionEventTx) {
		let _ = events_tx.try_send(SessionEvent::BulkDownloadComplete);
		self.flush_ready_queue(events_tx, false).await;
	}

	async fn flush_ready_queue(&mut self, events_tx: &SessionEventTx, force: bool) {
		if force {
			// Best-effort threshold reached: unresolved keys count as failed
			// so the batch drains and messages stop waiting.
			for key in self.refs.pending_keys() {
				if self.refs.complete(&key, None) {
					let _ = events_tx.try_send(SessionEvent::BulkDownloadComplete);
				}
			}
		}

		if self.refs.all_complete() {
			self.ready_deadline = None;
			for event in std::mem::take(&mut self.msg_queue) {
				let _ = events_tx.try_send(SessionEvent::Message(Box::new(event)));
			}
		}
	}

	async fn handle_fetch_done(&mut self, done: FetchDone, events_tx: &SessionEventTx) {
		match done {
			FetchDone::ReplayChunk { generation, result } => match result {
				Ok(chunk) => self.replay.handle_chunk(generation, chunk),
				Err(e) => match self.replay.handle_chunk_error(generation) {
					FetchFailure::Retry { request, delay } => {
						warn!(error = %e, ?delay, "replay chunk fetch failed; retrying");
						self.spawn_replay_fetch(request, delay);
					}
					FetchFailure::GaveUp => {
						let _ = events_tx.try_send(SessionEvent::DownloadError(format!("replay chat fetch failed: {e}")));
					}
					FetchFailure::Stale => {}
				},
			},

			FetchDone::BlockPage { offset, result } => match result {
				Ok(page) => {
					if let Some(next) = self.blocked.add_results(page.users, page.next_offset, page.total) {
						self.spawn_block_page(next.offset, next.limit);
					}
				}
				Err(e) => {
					self.blocked.page_failed(offset);
					let _ = events_tx.try_send(status_error("block list page fetch failed; keeping last known set", e));
				}
			},

			FetchDone::BlockEdit { username, block, result } => match result {
				Ok(()) => {
					if block {
						if self.blocked.confirm_block(username.as_str()) {
							let _ = events_tx.try_send(SessionEvent::UserBlocked(username));
						}
					} else if self.blocked.confirm_unblock(username.as_str()) {
						let _ = events_tx.try_send(SessionEvent::UserUnblocked(username));
					}
				}
				Err(e) => {
					let _ = events_tx.try_send(status_error(format!("block edit failed for {username}"), e));
				}
			},

			FetchDone::ChannelResources { channel, resources } => {
				self.apply_channel_resources(channel, resources, events_tx).await;
			}
		}
	}

	async fn apply_channel_resources(
		&mut self,
		channel: ChannelName,
		resources: ChannelResources,
		events_tx: &SessionEventTx,
	) {
		let badge_set: Vec<Badge> = resources.badge_urls.keys().filter_map(|k| Badge::parse(k).ok()).collect();
		self.builder.state_mut().set_badge_set(&channel, badge_set);
		self.badge_urls.extend(resources.badge_urls);

		self.builder.set_global_bits(resources.cheer_prefixes_global.iter());
		self.builder.set_channel_bits(&channel, resources.cheer_prefixes_channel.iter());
		self.builder.set_global_emote_codes(resources.emote_codes_global);
		self.builder.set_channel_emote_codes(&channel, resources.emote_codes_channel);

		info!(%channel, "channel resources applied");

		// The fresh lists may answer keys that were holding the queue.
		let pending = self.refs.pending_keys();
		self.resolve_keys(pending, events_tx).await;
	}

	fn spawn_channel_resources(&self, channel: ChannelName, channel_id: ChannelId) {
		let fetcher = Arc::clone(&self.resource_fetcher);
		let tx = self.fetch_tx.clone();
		tokio::spawn(async move {
			let resources = fetcher.fetch(&channel, &channel_id).await;
			let _ = tx.send(FetchDone::ChannelResources { channel, resources }).await;
		});
	}

	fn spawn_replay_fetch(&self, request: ChunkRequest, delay: Duration) {
		let fetcher = Arc::clone(&self.replay_fetcher);
		let tx = self.fetch_tx.clone();
		tokio::spawn(async move {
			if delay > Duration::ZERO {
				sleep(delay).await;
			}
			let generation = request.generation;
			let result = fetcher.fetch(&request).await;
			let _ = tx.send(FetchDone::ReplayChunk { generation, result }).await;
		});
	}

	fn spawn_block_page(&self, offset: u32, limit: u32) {
		let client = Arc::clone(&self.blocks_client);
		let tx = self.fetch_tx.clone();
		tokio::spawn(async move {
			let result = client.fetch_page(offset, limit).await;
			let _ = tx.send(FetchDone::BlockPage { offset, result }).await;
		});
	}

	async fn open_and_login(&mut self, events_tx: &SessionEventTx) -> bool {
		self.state = SessionState::Connecting;
		let endpoint = self.cfg.endpoint.clone();
		let _ = events_tx.try_send(status(false, format!("connecting to {}", endpoint.hostport())));

		if let Err(e) = self.transport.connect(&endpoint.host, endpoint.port, endpoint.tls).await {
			let _ = events_tx.try_send(status_error(format!("failed to connect to {}", endpoint.hostport()), e));
			self.state = SessionState::Disconnected;
			return false;
		}

		self.state = SessionState::Authenticating;
		self.logged_in = false;

		let nick = self.login_nick();
		let mut ok = self.send_raw(CAP_REQUEST, events_tx).await;
		if ok && let Some(token) = self.cfg.token.clone() {
			ok = self.send_raw(&format!("PASS {token}"), events_tx).await;
		}
		if ok {
			ok = self.send_raw(&format!("NICK {nick}"), events_tx).await;
		}
		if ok {
			let _ = events_tx.try_send(status(true, format!("connected; authenticating as {nick}")));
		}
		ok
	}

	/// The authenticated login, or a `justinfan` guest nick.
	fn login_nick(&self) -> String {
		if self.cfg.token.is_some() {
			self.cfg.username.to_ascii_lowercase()
		} else {
			let n = SystemTime::now()
				.duration_since(UNIX_EPOCH)
				.map(|d| d.subsec_nanos() % 90_000 + 10_000)
				.unwrap_or(12_345);
			format!("justinfan{n}")
		}
	}

	async fn send_raw(&mut self, line: &str, events_tx: &SessionEventTx) -> bool {
		match self.transport.write_line(line).await {
			Ok(()) => true,
			Err(e) => {
				let _ = events_tx.try_send(status_error("socket write failed", e));
				let _ = self.transport.close().await;
				self.state = SessionState::Disconnected;
				self.logged_in = false;
				false
			}
		}
	}

	/// Recoverable transport error path: drop the socket, then
	/// reconnect-and-relogin with bounded exponential backoff.
	async fn process_error(&mut self, err: anyhow::Error, events_tx: &SessionEventTx) {
		warn!(error = %err, "socket error");
		let _ = events_tx.try_send(status_error("socket error", &err));
		let _ = self.transport.close().await;
		self.state = SessionState::Disconnected;
		self.logged_in = false;
		self.reopen_socket(events_tx).await;
	}

	async fn reopen_socket(&mut self, events_tx: &SessionEventTx) {
		for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
			let delay = backoff_delay(attempt, self.cfg.reconnect_min_delay, self.cfg.reconnect_max_delay);
			let _ = events_tx.try_send(status(false, format!("reconnecting in {delay:?} (attempt={attempt})")));
			sleep(delay).await;

			if !self.open_and_login(events_tx).await {
				continue;
			}

			// The rejoin waits for login confirmation like any other join.
			self.pending_join = self.current_channel.clone();
			return;
		}

		let _ = events_tx.try_send(status_error(
			"reconnect attempts exhausted; staying disconnected",
			anyhow!("gave up after {MAX_RECONNECT_ATTEMPTS} attempts"),
		));
	}
}

fn is_auth_failure(notice: &str) -> bool {
	let lower = notice.to_ascii_lowercase();
	lower.contains("login authentication failed") || lower.contains("improperly formatted auth")
}

/// Plain-TCP transport. TLS transports are the embedder's concern and come
/// in through the [`Transport`] trait.
#[derive(Default)]
pub struct TcpTransport {
	lines: Option<Lines<BufReader<OwnedReadHalf>>>,
	writer: Option<OwnedWriteHalf>,
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
	async fn connect(&mut self, host: &str, port: u16, tls: bool) -> anyhow::Result<()> {
		if tls {
			return Err(anyhow!("TcpTransport is plaintext only; supply a TLS transport"));
		}
		let stream = TcpStream::connect((host, port))
			.await
			.with_context(|| format!("connect to {host}:{port}"))?;
		let (read_half, write_half) = stream.into_split();
		self.lines = Some(BufReader::new(read_half).lines());
		self.writer = Some(write_half);
		Ok(())
	}

	async fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
		let writer = self.writer.as_mut().context("transport not connected")?;
		writer.write_all(line.as_bytes()).await.context("socket write")?;
		writer.write_all(b"\r\n").await.context("socket write")?;
		Ok(())
	}

	async fn next_line(&mut self) -> Option<anyhow::Result<String>> {
		let lines = self.lines.as_mut()?;
		match lines.next_line().await {
			Ok(Some(line)) => Some(Ok(line)),
			Ok(None) => None,
			Err(e) => Some(Err(e.into())),
		}
	}

	async fn close(&mut self) -> anyhow::Result<()> {
		self.lines = None;
		self.writer = None;
		Ok(())
	}
}
