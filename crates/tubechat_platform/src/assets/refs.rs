#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use tracing::debug;

/// Tracks which badge/emote image keys have been requested and resolved.
///
/// Duplicate concurrent requests for a key collapse into one; an
/// outstanding-count watermark yields exactly one batch-complete signal
/// when every key of the current batch has resolved, success or failure.
#[derive(Debug, Default)]
pub struct ReferenceCache {
	requested: HashSet<String>,
	resolved: HashMap<String, Option<String>>,
	outstanding: usize,
}

impl ReferenceCache {
	/// Register a batch of keys; returns only the keys that actually need
	/// resolving (not already requested or resolved).
	pub fn bulk_request<I>(&mut self, keys: I) -> Vec<String>
	where
		I: IntoIterator<Item = String>,
	{
		let mut fresh = Vec::new();
		for key in keys {
			if self.requested.contains(&key) {
				continue;
			}
			self.requested.insert(key.clone());
			fresh.push(key);
		}
		self.outstanding += fresh.len();
		if !fresh.is_empty() {
			debug!(fresh = fresh.len(), outstanding = self.outstanding, "reference batch grew");
		}
		fresh
	}

	/// Record a key's resolution (`None` = failed). Returns `true` exactly
	/// when this completion drained the current batch.
	pub fn complete(&mut self, key: &str, url: Option<String>) -> bool {
		if !self.requested.contains(key) || self.resolved.contains_key(key) {
			return false;
		}
		self.resolved.insert(key.to_string(), url);
		self.outstanding = self.outstanding.saturating_sub(1);
		self.outstanding == 0
	}

	pub fn is_resolved(&self, key: &str) -> bool {
		self.resolved.contains_key(key)
	}

	/// Resolved URL for a key; `None` when unresolved or failed.
	pub fn url_for(&self, key: &str) -> Option<&str> {
		self.resolved.get(key).and_then(|u| u.as_deref())
	}

	/// Keys requested but not yet resolved.
	pub fn pending_keys(&self) -> Vec<String> {
		self.requested
			.iter()
			.filter(|k| !self.resolved.contains_key(*k))
			.cloned()
			.collect()
	}

	pub fn all_complete(&self) -> bool {
		self.outstanding == 0
	}

	pub fn outstanding(&self) -> usize {
		self.outstanding
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn duplicate_bulk_requests_collapse_into_one_fetch_per_key() {
		let mut cache = ReferenceCache::default();
		let first = cache.bulk_request(["k1".to_string(), "k2".to_string()]);
		assert_eq!(first.len(), 2);

		// The concurrent duplicate requests nothing new.
		let second = cache.bulk_request(["k1".to_string(), "k2".to_string()]);
		assert!(second.is_empty());
		assert_eq!(cache.outstanding(), 2);

		// Exactly one batch-complete signal for the combined set.
		assert!(!cache.complete("k1", Some("url1".to_string())));
		assert!(cache.complete("k2", None));
		assert!(cache.all_complete());

		// Re-completing resolved keys never re-signals.
		assert!(!cache.complete("k2", Some("late".to_string())));
	}

	#[test]
	fn batch_grows_while_outstanding() {
		let mut cache = ReferenceCache::default();
		cache.bulk_request(["a".to_string()]);
		cache.bulk_request(["b".to_string()]);
		assert_eq!(cache.outstanding(), 2);

		assert!(!cache.complete("a", Some("u".to_string())));
		assert!(cache.complete("b", Some("u".to_string())));
	}

	#[test]
	fn failed_resolution_counts_toward_completion_but_yields_no_url() {
		let mut cache = ReferenceCache::default();
		cache.bulk_request(["x".to_string()]);
		assert!(cache.complete("x", None));
		assert!(cache.is_resolved("x"));
		assert_eq!(cache.url_for("x"), None);
	}

	#[test]
	fn pending_keys_lists_only_unresolved() {
		let mut cache = ReferenceCache::default();
		cache.bulk_request(["a".to_string(), "b".to_string()]);
		cache.complete("a", Some("u".to_string()));
		assert_eq!(cache.pending_keys(), vec!["b".to_string()]);
	}

	#[test]
	fn unknown_key_completion_is_ignored() {
		let mut cache = ReferenceCache::default();
		cache.bulk_request(["a".to_string()]);
		assert!(!cache.complete("never-requested", Some("u".to_string())));
		assert_eq!(cache.outstanding(), 1);
	}
}
