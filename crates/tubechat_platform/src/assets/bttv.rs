#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{info, warn};
use tubechat_domain::ChannelId;

use super::common::{
	CachedEntry, get_cached_map, get_cached_optional, prune_map_cache, prune_optional_cache, set_cached_map,
	set_cached_optional,
};

const BTTV_BASE_URL: &str = "https://api.betterttv.net/3";
const BTTV_CHANNEL_TTL: Duration = Duration::from_secs(300);
const BTTV_GLOBAL_TTL: Duration = Duration::from_secs(600);

type CodeMap = HashMap<String, String>;

static BTTV_CHANNEL_CACHE: OnceLock<Mutex<HashMap<String, CachedEntry<CodeMap>>>> = OnceLock::new();
static BTTV_GLOBAL_CACHE: OnceLock<Mutex<Option<CachedEntry<CodeMap>>>> = OnceLock::new();

/// Global third-party emote code → id map.
pub async fn fetch_global_emote_codes() -> anyhow::Result<CodeMap> {
	let cache = BTTV_GLOBAL_CACHE.get_or_init(|| Mutex::new(None));
	if let Some(codes) = get_cached_optional(cache, BTTV_GLOBAL_TTL) {
		return Ok(codes);
	}

	let url = format!("{BTTV_BASE_URL}/cached/emotes/global");
	let resp = reqwest::Client::new()
		.get(url)
		.send()
		.await
		.context("bttv global emotes request")?
		.error_for_status()
		.context("bttv global emotes status")?;

	let body: Vec<BttvEmote> = resp.json().await.context("bttv global emotes json")?;
	let codes: CodeMap = body.into_iter().map(|e| (e.code, e.id)).collect();

	if codes.is_empty() {
		warn!("bttv global emote map empty");
	} else {
		info!(emote_count = codes.len(), "bttv global emote map fetched");
	}

	set_cached_optional(cache, codes.clone());
	Ok(codes)
}

/// Channel-specific third-party emote code → id map.
pub async fn fetch_channel_emote_codes(channel_id: &ChannelId) -> anyhow::Result<CodeMap> {
	let cache = BTTV_CHANNEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
	if let Some(codes) = get_cached_map(cache, channel_id.as_str(), BTTV_CHANNEL_TTL) {
		return Ok(codes);
	}

	let url = format!("{BTTV_BASE_URL}/cached/users/twitch/{channel_id}");
	let resp = reqwest::Client::new()
		.get(url)
		.send()
		.await
		.context("bttv channel emotes request")?
		.error_for_status()
		.context("bttv channel emotes status")?;

	let body: BttvUserResponse = resp.json().await.context("bttv channel emotes json")?;
	let codes: CodeMap = body
		.channel_emotes
		.into_iter()
		.chain(body.shared_emotes)
		.map(|e| (e.code, e.id))
		.collect();

	if codes.is_empty() {
		warn!(%channel_id, "bttv channel emote map empty");
	} else {
		info!(%channel_id, emote_count = codes.len(), "bttv channel emote map fetched");
	}

	set_cached_map(cache, channel_id.as_str(), codes.clone());
	Ok(codes)
}

pub(crate) fn prune_caches() {
	if let Some(cache) = BTTV_CHANNEL_CACHE.get() {
		prune_map_cache(cache, BTTV_CHANNEL_TTL);
	}
	if let Some(cache) = BTTV_GLOBAL_CACHE.get() {
		prune_optional_cache(cache, BTTV_GLOBAL_TTL);
	}
}

#[derive(Debug, Deserialize)]
struct BttvUserResponse {
	#[serde(default, rename = "channelEmotes")]
	channel_emotes: Vec<BttvEmote>,
	#[serde(default, rename = "sharedEmotes")]
	shared_emotes: Vec<BttvEmote>,
}

#[derive(Debug, Deserialize)]
struct BttvEmote {
	id: String,
	code: String,
}
