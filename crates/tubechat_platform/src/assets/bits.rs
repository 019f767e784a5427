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

const BITS_ACTIONS_URL: &str = "https://api.twitch.tv/kraken/bits/actions";
const BITS_CHANNEL_TTL: Duration = Duration::from_secs(600);
const BITS_GLOBAL_TTL: Duration = Duration::from_secs(3600);

static BITS_CHANNEL_CACHE: OnceLock<Mutex<HashMap<String, CachedEntry<Vec<String>>>>> = OnceLock::new();
static BITS_GLOBAL_CACHE: OnceLock<Mutex<Option<CachedEntry<Vec<String>>>>> = OnceLock::new();

/// Globally valid cheer prefixes (`cheer`, `kappa`, ...).
pub async fn fetch_global_cheer_prefixes() -> anyhow::Result<Vec<String>> {
	let cache = BITS_GLOBAL_CACHE.get_or_init(|| Mutex::new(None));
	if let Some(prefixes) = get_cached_optional(cache, BITS_GLOBAL_TTL) {
		return Ok(prefixes);
	}

	let prefixes = fetch_actions(BITS_ACTIONS_URL).await.context("global bits actions")?;
	if prefixes.is_empty() {
		warn!("global cheer prefix list empty");
	} else {
		info!(prefix_count = prefixes.len(), "global cheer prefixes fetched");
	}

	set_cached_optional(cache, prefixes.clone());
	Ok(prefixes)
}

/// Channel-specific cheer prefixes, refreshed on join.
pub async fn fetch_channel_cheer_prefixes(channel_id: &ChannelId) -> anyhow::Result<Vec<String>> {
	let cache = BITS_CHANNEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
	if let Some(prefixes) = get_cached_map(cache, channel_id.as_str(), BITS_CHANNEL_TTL) {
		return Ok(prefixes);
	}

	let url = format!("{BITS_ACTIONS_URL}?channel_id={channel_id}");
	let prefixes = fetch_actions(&url).await.context("channel bits actions")?;
	set_cached_map(cache, channel_id.as_str(), prefixes.clone());
	Ok(prefixes)
}

async fn fetch_actions(url: &str) -> anyhow::Result<Vec<String>> {
	let resp = reqwest::Client::new()
		.get(url)
		.send()
		.await
		.context("bits actions request")?
		.error_for_status()
		.context("bits actions status")?;

	let body: BitsActionsResponse = resp.json().await.context("bits actions json")?;
	Ok(body.actions.into_iter().map(|a| a.prefix).collect())
}

pub(crate) fn prune_caches() {
	if let Some(cache) = BITS_CHANNEL_CACHE.get() {
		prune_map_cache(cache, BITS_CHANNEL_TTL);
	}
	if let Some(cache) = BITS_GLOBAL_CACHE.get() {
		prune_optional_cache(cache, BITS_GLOBAL_TTL);
	}
}

#[derive(Debug, Deserialize)]
struct BitsActionsResponse {
	#[serde(default)]
	actions: Vec<BitsActionDto>,
}

#[derive(Debug, Deserialize)]
struct BitsActionDto {
	prefix: String,
}
