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

const BADGES_BASE_URL: &str = "https://badges.twitch.tv/v1/badges";
const BADGES_CHANNEL_TTL: Duration = Duration::from_secs(300);
const BADGES_GLOBAL_TTL: Duration = Duration::from_secs(600);

/// `name/version` download key → image URL.
type BadgeUrlMap = HashMap<String, String>;

static BADGES_CHANNEL_CACHE: OnceLock<Mutex<HashMap<String, CachedEntry<BadgeUrlMap>>>> = OnceLock::new();
static BADGES_GLOBAL_CACHE: OnceLock<Mutex<Option<CachedEntry<BadgeUrlMap>>>> = OnceLock::new();

/// Global badge set: every `name/version` key mapped to its image URL.
pub async fn fetch_global_badge_urls() -> anyhow::Result<BadgeUrlMap> {
	let cache = BADGES_GLOBAL_CACHE.get_or_init(|| Mutex::new(None));
	if let Some(urls) = get_cached_optional(cache, BADGES_GLOBAL_TTL) {
		return Ok(urls);
	}

	let url = format!("{BADGES_BASE_URL}/global/display");
	let urls = fetch_badge_display(&url).await.context("global badge list")?;

	if urls.is_empty() {
		warn!("global badge list empty");
	} else {
		info!(badge_count = urls.len(), "global badge list fetched");
	}

	set_cached_optional(cache, urls.clone());
	Ok(urls)
}

/// Channel badge set, refreshed on join.
pub async fn fetch_channel_badge_urls(channel_id: &ChannelId) -> anyhow::Result<BadgeUrlMap> {
	let cache = BADGES_CHANNEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
	if let Some(urls) = get_cached_map(cache, channel_id.as_str(), BADGES_CHANNEL_TTL) {
		return Ok(urls);
	}

	let url = format!("{BADGES_BASE_URL}/channels/{channel_id}/display");
	let urls = fetch_badge_display(&url).await.context("channel badge list")?;

	if urls.is_empty() {
		warn!(%channel_id, "channel badge list empty");
	} else {
		info!(%channel_id, badge_count = urls.len(), "channel badge list fetched");
	}

	set_cached_map(cache, channel_id.as_str(), urls.clone());
	Ok(urls)
}

async fn fetch_badge_display(url: &str) -> anyhow::Result<BadgeUrlMap> {
	let resp = reqwest::Client::new()
		.get(url)
		.send()
		.await
		.context("badge list request")?
		.error_for_status()
		.context("badge list status")?;

	let body: BadgeDisplayResponse = resp.json().await.context("badge list json")?;

	let mut urls = BadgeUrlMap::new();
	for (name, set) in body.badge_sets {
		for (version, image) in set.versions {
			urls.insert(format!("{name}/{version}"), image.image_url_1x);
		}
	}
	Ok(urls)
}

pub(crate) fn prune_caches() {
	if let Some(cache) = BADGES_CHANNEL_CACHE.get() {
		prune_map_cache(cache, BADGES_CHANNEL_TTL);
	}
	if let Some(cache) = BADGES_GLOBAL_CACHE.get() {
		prune_optional_cache(cache, BADGES_GLOBAL_TTL);
	}
}

#[derive(Debug, Deserialize)]
struct BadgeDisplayResponse {
	#[serde(default)]
	badge_sets: HashMap<String, BadgeSetDto>,
}

#[derive(Debug, Deserialize)]
struct BadgeSetDto {
	#[serde(default)]
	versions: HashMap<String, BadgeVersionDto>,
}

#[derive(Debug, Deserialize)]
struct BadgeVersionDto {
	image_url_1x: String,
}
