//! # Subscription Registry
//!
//! Maps each topic filter to the logical subscribers registered on it.
//!
//! ## Invariants
//!
//! - A filter has an entry iff at least one subscriber is registered on it.
//!   Empty subscriber maps are pruned inside the same write lock that emptied
//!   them; the client relies on this to decide network (un)subscription.
//! - The lock is held only for the lookup or mutation itself. Dispatch copies
//!   the matching subscriber lists under the read lock and releases it before
//!   any callback runs.

use crate::topic::TopicFilter;
use parking_lot::RwLock;
use relay_types::{Payload, QoS};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(Payload) + Send + Sync>;

/// One subscriber's registration on one filter.
#[derive(Clone)]
pub struct Subscription {
    pub filter: TopicFilter,
    pub qos: QoS,
    /// Only deliver messages that arrived signed and verified.
    pub requires_signed: bool,
    callback: Callback,
}

impl Subscription {
    pub fn new(filter: TopicFilter, qos: QoS, requires_signed: bool, callback: Callback) -> Self {
        Self {
            filter,
            qos,
            requires_signed,
            callback,
        }
    }

    /// Returns true if a payload with this validation status may be delivered.
    #[must_use]
    pub fn accepts(&self, validated: bool) -> bool {
        !self.requires_signed || validated
    }

    /// Runs the callback on the calling thread.
    pub fn invoke(&self, payload: Payload) {
        (self.callback)(payload);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .field("requires_signed", &self.requires_signed)
            .finish_non_exhaustive()
    }
}

/// A registered filter that matched an inbound topic, with owned copies of
/// its subscribers.
#[derive(Debug, Clone)]
pub struct MatchedRoute {
    pub filter: TopicFilter,
    pub wildcard_elements: Vec<String>,
    pub subscribers: Vec<(String, Subscription)>,
}

type SubscriberMap = HashMap<String, Subscription>;

/// Concurrency-safe filter -> subscriber -> subscription map.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<HashMap<TopicFilter, SubscriberMap>>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `subscriber_id`'s registration on the
    /// subscription's filter.
    ///
    /// Returns true if the filter had no subscribers before this call, i.e. a
    /// network-level subscribe is needed.
    pub fn upsert(&self, subscriber_id: &str, subscription: Subscription) -> bool {
        let mut inner = self.inner.write();
        let is_new = !inner.contains_key(subscription.filter.as_str());
        inner
            .entry(subscription.filter.clone())
            .or_default()
            .insert(subscriber_id.to_string(), subscription);
        is_new
    }

    /// Removes one subscriber from one filter. Returns true if a registration
    /// was removed.
    pub fn remove_one(&self, filter: &str, subscriber_id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(subscribers) = inner.get_mut(filter) else {
            return false;
        };

        let removed = subscribers.remove(subscriber_id).is_some();
        if subscribers.is_empty() {
            inner.remove(filter);
        }
        removed
    }

    /// Removes `id` (or every subscriber whose id starts with `id` when
    /// `is_prefix` is set) from all filters.
    ///
    /// Returns the filters that lost at least one subscriber.
    pub fn remove_all_for_subscriber(&self, id: &str, is_prefix: bool) -> BTreeSet<TopicFilter> {
        let mut affected = BTreeSet::new();
        let mut inner = self.inner.write();

        inner.retain(|filter, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|subscriber_id, _| {
                !(subscriber_id == id || (is_prefix && subscriber_id.starts_with(id)))
            });
            if subscribers.len() != before {
                affected.insert(filter.clone());
            }
            !subscribers.is_empty()
        });

        affected
    }

    /// Returns true if `filter` has no subscribers, including filters that
    /// were never registered.
    #[must_use]
    pub fn is_empty(&self, filter: &str) -> bool {
        self.inner
            .read()
            .get(filter)
            .map_or(true, HashMap::is_empty)
    }

    /// Matches `topic` against every registered filter and copies the
    /// subscribers of each match out of the lock.
    #[must_use]
    pub fn snapshot_matching(&self, topic: &str) -> Vec<MatchedRoute> {
        let inner = self.inner.read();
        inner
            .iter()
            .filter_map(|(filter, subscribers)| {
                filter.matches(topic).map(|wildcard_elements| MatchedRoute {
                    filter: filter.clone(),
                    wildcard_elements,
                    subscribers: subscribers
                        .iter()
                        .map(|(id, sub)| (id.clone(), sub.clone()))
                        .collect(),
                })
            })
            .collect()
    }

    /// Registered filters in sorted order.
    #[must_use]
    pub fn filters(&self) -> Vec<TopicFilter> {
        let mut filters: Vec<_> = self.inner.read().keys().cloned().collect();
        filters.sort();
        filters
    }

    /// Removes everything and returns the filters that were registered.
    pub fn clear(&self) -> Vec<TopicFilter> {
        let mut filters: Vec<_> = self.inner.write().drain().map(|(f, _)| f).collect();
        filters.sort();
        filters
    }

    /// Number of registered filters.
    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.inner.read().len()
    }

    /// Number of subscribers on `filter`.
    #[must_use]
    pub fn subscriber_count(&self, filter: &str) -> usize {
        self.inner.read().get(filter).map_or(0, HashMap::len)
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("filters", &self.filter_count())
            .finish()
    }
}
