#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub(crate) struct CachedEntry<T> {
	pub(crate) fetched_at: Instant,
	pub(crate) value: T,
}

impl<T> CachedEntry<T> {
	pub(crate) fn now(value: T) -> Self {
		Self {
			fetched_at: Instant::now(),
			value,
		}
	}
}

pub(crate) fn prune_map_cache<T>(cache: &Mutex<HashMap<String, CachedEntry<T>>>, ttl: Duration) {
	let mut guard = cache.lock();
	guard.retain(|_, entry| entry.fetched_at.elapsed() <= ttl);
}

pub(crate) fn prune_optional_cache<T>(cache: &Mutex<Option<CachedEntry<T>>>, ttl: Duration) {
	let mut guard = cache.lock();
	if let Some(entry) = guard.as_ref()
		&& entry.fetched_at.elapsed() > ttl
	{
		*guard = None;
	}
}

pub(crate) fn get_cached_map<T: Clone>(
	cache: &Mutex<HashMap<String, CachedEntry<T>>>,
	key: &str,
	ttl: Duration,
) -> Option<T> {
	let mut guard = cache.lock();
	if let Some(entry) = guard.get(key) {
		if entry.fetched_at.elapsed() <= ttl {
			Some(entry.value.clone())
		} else {
			guard.remove(key);
			None
		}
	} else {
		None
	}
}

pub(crate) fn set_cached_map<T>(cache: &Mutex<HashMap<String, CachedEntry<T>>>, key: &str, value: T) {
	let mut guard = cache.lock();
	guard.insert(key.to_string(), CachedEntry::now(value));
}

pub(crate) fn get_cached_optional<T: Clone>(cache: &Mutex<Option<CachedEntry<T>>>, ttl: Duration) -> Option<T> {
	let mut guard = cache.lock();
	let entry = guard.as_ref()?;
	if entry.fetched_at.elapsed() <= ttl {
		Some(entry.value.clone())
	} else {
		*guard = None;
		None
	}
}

pub(crate) fn set_cached_optional<T>(cache: &Mutex<Option<CachedEntry<T>>>, value: T) {
	let mut guard = cache.lock();
	*guard = Some(CachedEntry::now(value));
}
