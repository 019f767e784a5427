#![forbid(unsafe_code)]

mod badges;
mod bits;
mod bttv;
mod common;
mod refs;

pub use badges::{fetch_channel_badge_urls, fetch_global_badge_urls};
pub use bits::{fetch_channel_cheer_prefixes, fetch_global_cheer_prefixes};
pub use bttv::{fetch_channel_emote_codes, fetch_global_emote_codes};
pub use refs::ReferenceCache;

use std::sync::OnceLock;
use std::time::Duration;

static ASSET_CACHE_PRUNER: OnceLock<()> = OnceLock::new();

/// Start the background task that expires stale asset bundles. Idempotent.
pub fn ensure_asset_cache_pruner() {
	ASSET_CACHE_PRUNER.get_or_init(|| {
		tokio::spawn(async {
			let mut interval = tokio::time::interval(Duration::from_secs(300));
			loop {
				interval.tick().await;
				prune_asset_caches();
			}
		});
	});
}

fn prune_asset_caches() {
	badges::prune_caches();
	bits::prune_caches();
	bttv::prune_caches();
}
