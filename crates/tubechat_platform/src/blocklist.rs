#![forbid(unsafe_code)]

use std::collections::HashSet;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

/// Block-list pages are fetched at most this many entries at a time.
pub const PAGE_LIMIT: u32 = 100;

/// One pending block-list page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
	pub offset: u32,
	pub limit: u32,
}

/// The blocked-user set plus its pagination state. Mutation happens only on
/// confirmed results; reads gate message emission.
#[derive(Debug, Default)]
pub struct BlockList {
	users: HashSet<String>,
	in_flight: HashSet<u32>,
}

impl BlockList {
	pub fn is_blocked(&self, login: &str) -> bool {
		self.users.contains(login)
	}

	pub fn len(&self) -> usize {
		self.users.len()
	}

	pub fn is_empty(&self) -> bool {
		self.users.is_empty()
	}

	/// Start a pagination pass at offset 0. Returns `None` while a pass is
	/// already in flight.
	pub fn begin_fetch(&mut self) -> Option<PageRequest> {
		if !self.in_flight.is_empty() {
			debug!("block list fetch already in flight; not starting another pass");
			return None;
		}
		self.in_flight.insert(0);
		Some(PageRequest {
			offset: 0,
			limit: PAGE_LIMIT,
		})
	}

	/// Apply one fetched page. Chains exactly one follow-up request while
	/// `next_offset < total`, skipping offsets already in flight.
	pub fn add_results(&mut self, list: Vec<String>, next_offset: u32, total: u32) -> Option<PageRequest> {
		let completed = next_offset.saturating_sub(list.len() as u32);
		self.in_flight.remove(&completed);

		for login in list {
			self.users.insert(login.to_ascii_lowercase());
		}

		if next_offset >= total {
			return None;
		}
		if !self.in_flight.insert(next_offset) {
			return None;
		}
		Some(PageRequest {
			offset: next_offset,
			limit: PAGE_LIMIT,
		})
	}

	/// A page fetch failed: abort the pass, keep the set last-known-good.
	pub fn page_failed(&mut self, offset: u32) {
		self.in_flight.remove(&offset);
	}

	/// Confirmed block callback. Returns whether membership changed.
	pub fn confirm_block(&mut self, login: &str) -> bool {
		self.users.insert(login.to_ascii_lowercase())
	}

	/// Confirmed unblock callback. Returns whether membership changed.
	pub fn confirm_unblock(&mut self, login: &str) -> bool {
		self.users.remove(&login.to_ascii_lowercase())
	}
}

/// One fetched block-list page.
#[derive(Debug, Clone)]
pub struct BlockPage {
	pub users: Vec<String>,
	pub next_offset: u32,
	pub total: u32,
}

/// Block-list backend seam: page fetch plus block/unblock mutation.
#[async_trait::async_trait]
pub trait BlockListClient: Send + Sync {
	async fn fetch_page(&self, offset: u32, limit: u32) -> anyhow::Result<BlockPage>;

	async fn set_block(&self, login: &str, blocked: bool) -> anyhow::Result<()>;
}

/// HTTP block-list client against the user blocks endpoint.
pub struct HttpBlockListClient {
	base_url: Url,
	user_id: String,
	client: reqwest::Client,
}

impl HttpBlockListClient {
	pub fn new(base_url: &str, user_id: impl Into<String>) -> anyhow::Result<Self> {
		Ok(Self {
			base_url: Url::parse(base_url).context("parse block list base url")?,
			user_id: user_id.into(),
			client: reqwest::Client::new(),
		})
	}
}

#[derive(Debug, Deserialize)]
struct BlocksResponse {
	#[serde(default)]
	blocks: Vec<BlockEntry>,
	#[serde(default, rename = "_total")]
	total: u32,
}

#[derive(Debug, Deserialize)]
struct BlockEntry {
	user: BlockedUser,
}

#[derive(Debug, Deserialize)]
struct BlockedUser {
	name: String,
}

#[async_trait::async_trait]
impl BlockListClient for HttpBlockListClient {
	async fn fetch_page(&self, offset: u32, limit: u32) -> anyhow::Result<BlockPage> {
		let url = format!(
			"{}users/{}/blocks?offset={offset}&limit={limit}",
			self.base_url, self.user_id
		);
		let resp = self
			.client
			.get(url)
			.send()
			.await
			.context("block list page request")?
			.error_for_status()
			.context("block list page status")?;

		let body: BlocksResponse = resp.json().await.context("block list page json")?;
		let users: Vec<String> = body.blocks.into_iter().map(|b| b.user.name).collect();
		let next_offset = offset.saturating_add(users.len() as u32);

		if users.is_empty() && next_offset < body.total {
			warn!(offset, total = body.total, "block list page came back short");
		}

		Ok(BlockPage {
			users,
			next_offset,
			total: body.total,
		})
	}

	async fn set_block(&self, login: &str, blocked: bool) -> anyhow::Result<()> {
		let url = format!("{}users/{}/blocks/{login}", self.base_url, self.user_id);
		let req = if blocked {
			self.client.put(url)
		} else {
			self.client.delete(url)
		};
		req.send()
			.await
			.context("block edit request")?
			.error_for_status()
			.context("block edit status")?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn logins(n: usize, from: usize) -> Vec<String> {
		(from..from + n).map(|i| format!("user{i}")).collect()
	}

	#[test]
	fn pagination_chains_until_total_reached() {
		let mut list = BlockList::default();
		let first = list.begin_fetch().expect("first request");
		assert_eq!(first, PageRequest { offset: 0, limit: 100 });

		// 100 items, next=100, total=150: exactly one follow-up at 100.
		let next = list.add_results(logins(100, 0), 100, 150);
		assert_eq!(next, Some(PageRequest { offset: 100, limit: 100 }));

		// 50 items, next=150, total=150: no follow-up.
		let done = list.add_results(logins(50, 100), 150, 150);
		assert_eq!(done, None);
		assert_eq!(list.len(), 150);
	}

	#[test]
	fn duplicate_pass_is_not_started_while_in_flight() {
		let mut list = BlockList::default();
		assert!(list.begin_fetch().is_some());
		assert!(list.begin_fetch().is_none());

		// The pass completes; a new one may start.
		list.add_results(logins(10, 0), 10, 10);
		assert!(list.begin_fetch().is_some());
	}

	#[test]
	fn page_failure_keeps_last_known_good() {
		let mut list = BlockList::default();
		let req = list.begin_fetch().expect("request");
		list.add_results(logins(100, 0), 100, 200);
		assert_eq!(list.len(), 100);

		list.page_failed(100);
		assert_eq!(list.len(), 100);
		// The pass is over; a fresh one may start from scratch.
		assert!(list.begin_fetch().is_some());
		let _ = req;
	}

	#[test]
	fn membership_mutates_only_on_confirmation() {
		let mut list = BlockList::default();
		assert!(!list.is_blocked("annoying"));

		assert!(list.confirm_block("Annoying"));
		assert!(list.is_blocked("annoying"));
		assert!(!list.confirm_block("annoying"));

		assert!(list.confirm_unblock("ANNOYING"));
		assert!(!list.is_blocked("annoying"));
		assert!(!list.confirm_unblock("annoying"));
	}
}
