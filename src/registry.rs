//! Subscriber table keyed by [`EventKind`].
//!
//! Each kind maps to an immutable, reference-counted list of subscriptions.
//! Mutations build a new list and swap it in under the DashMap shard lock;
//! lookups only clone the `Arc`, so dispatch never runs while a registry lock
//! is held and handlers are free to subscribe, unsubscribe or publish.

use std::{
    any::Any,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::{
    event::{Event, EventKind},
    handler::Handler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque token returned by `subscribe`, used to remove the subscription.
///
/// Handles compare by subscription id only, so subscribing the same handler
/// twice yields two distinct handles.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    kind: EventKind,
    handler: Arc<str>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn handler_name(&self) -> &str {
        &self.handler
    }
}

impl PartialEq for SubscriptionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SubscriptionHandle {}

impl Hash for SubscriptionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One handler bound to one event type.
pub struct Subscription<E: Event> {
    id: SubscriptionId,
    name: Arc<str>,
    handler: Arc<dyn Handler<E>>,
}

impl<E: Event> Subscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn handler(&self) -> &Arc<dyn Handler<E>> {
        &self.handler
    }
}

impl<E: Event> Subscription<E> {
    fn handle(&self, kind: EventKind) -> SubscriptionHandle {
        SubscriptionHandle {
            id: self.id,
            kind,
            handler: Arc::clone(&self.name),
        }
    }
}

impl<E: Event> Clone for Subscription<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<E: Event> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

struct HandlerList<E: Event> {
    subscriptions: Vec<Subscription<E>>,
}

/// Type-erased view of a `HandlerList<E>` so untyped handles can remove entries.
trait SubscriberList: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: SubscriptionId) -> bool;

    /// Copy of the list without `id`, or `None` when `id` is not present.
    fn without(&self, id: SubscriptionId) -> Option<Arc<dyn SubscriberList>>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<E: Event> SubscriberList for HandlerList<E> {
    fn len(&self) -> usize {
        self.subscriptions.len()
    }

    fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.iter().any(|s| s.id == id)
    }

    fn without(&self, id: SubscriptionId) -> Option<Arc<dyn SubscriberList>> {
        let position = self.subscriptions.iter().position(|s| s.id == id)?;
        let mut subscriptions = self.subscriptions.clone();
        subscriptions.remove(position);
        Some(Arc::new(HandlerList { subscriptions }))
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Point-in-time copy of the handlers registered for `E`, in subscription order.
pub struct HandlerSnapshot<E: Event> {
    kind: EventKind,
    list: Option<Arc<HandlerList<E>>>,
}

impl<E: Event> HandlerSnapshot<E> {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.list.as_ref().map_or(0, |l| l.subscriptions.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subscription<E>> {
        match &self.list {
            Some(list) => list.subscriptions.iter(),
            None => Default::default(),
        }
    }

    pub fn to_vec(&self) -> Vec<Subscription<E>> {
        self.iter().cloned().collect()
    }
}

impl<E: Event> Clone for HandlerSnapshot<E> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            list: self.list.clone(),
        }
    }
}

impl<'a, E: Event> IntoIterator for &'a HandlerSnapshot<E> {
    type Item = &'a Subscription<E>;
    type IntoIter = std::slice::Iter<'a, Subscription<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Thread-safe mapping from event kind to its ordered subscriber list.
///
/// A kind is present in the table iff it has at least one live subscription.
#[derive(Default)]
pub struct Registry {
    table: DashMap<EventKind, Arc<dyn SubscriberList>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of type `E`.
    ///
    /// The handler only sees events whose publish starts after this returns.
    pub fn subscribe<E: Event>(&self, handler: Arc<dyn Handler<E>>) -> SubscriptionHandle {
        let kind = EventKind::of::<E>();
        let subscription = Subscription {
            id: SubscriptionId::new(),
            name: Arc::from(handler.name()),
            handler,
        };
        let handle = subscription.handle(kind);

        let replaced = match self.table.entry(kind) {
            Entry::Occupied(mut entry) => {
                let mut subscriptions = Self::downcast::<E>(Arc::clone(entry.get()))
                    .map(|list| list.subscriptions.clone())
                    .unwrap_or_default();
                subscriptions.push(subscription);
                Some(entry.insert(Arc::new(HandlerList { subscriptions })))
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(HandlerList {
                    subscriptions: vec![subscription],
                }));
                None
            }
        };
        drop(replaced);

        debug!(kind = %kind, subscription = %handle.id, handler = %handle.handler, "Subscribed");
        handle
    }

    /// Handle for `handler` that was never inserted into any table.
    pub(crate) fn detached_handle<E: Event>(handler: &dyn Handler<E>) -> SubscriptionHandle {
        SubscriptionHandle {
            id: SubscriptionId::new(),
            kind: EventKind::of::<E>(),
            handler: Arc::from(handler.name()),
        }
    }

    /// Removes the subscription behind `handle`.
    ///
    /// Returns `false` when it was already gone; calling this twice is harmless.
    /// A publish that snapshotted the list earlier may still invoke the handler.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let retired = match self.table.entry(handle.kind) {
            Entry::Occupied(mut entry) => match entry.get().without(handle.id) {
                Some(remaining) if remaining.is_empty() => Some(entry.remove()),
                Some(remaining) => Some(entry.insert(remaining)),
                None => None,
            },
            Entry::Vacant(_) => None,
        };

        // Dropped outside the shard lock: the last reference to a handler may
        // run a destructor that touches this registry again.
        let removed = retired.is_some();
        drop(retired);

        if removed {
            debug!(kind = %handle.kind, subscription = %handle.id, "Unsubscribed");
        } else {
            trace!(kind = %handle.kind, subscription = %handle.id, "Unsubscribe of unknown handle ignored");
        }
        removed
    }

    /// Snapshot of the handlers for `E` in subscription order. Empty if none.
    pub fn lookup<E: Event>(&self) -> HandlerSnapshot<E> {
        let kind = EventKind::of::<E>();
        let list = self
            .table
            .get(&kind)
            .map(|entry| Arc::clone(entry.value()));
        HandlerSnapshot {
            kind,
            list: list.and_then(Self::downcast::<E>),
        }
    }

    pub fn contains(&self, handle: &SubscriptionHandle) -> bool {
        self.table
            .get(&handle.kind)
            .is_some_and(|entry| entry.value().contains(handle.id))
    }

    pub fn subscriber_count(&self, kind: &EventKind) -> usize {
        self.table.get(kind).map_or(0, |entry| entry.value().len())
    }

    /// Total number of live subscriptions across all kinds.
    pub fn len(&self) -> usize {
        self.table.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.table.iter().map(|entry| *entry.key()).collect()
    }

    /// Drops every subscription of `kind`, returning how many were removed.
    pub fn unsubscribe_kind(&self, kind: &EventKind) -> usize {
        let retired = self.table.remove(kind);
        let count = retired.as_ref().map_or(0, |(_, list)| list.len());
        drop(retired);
        if count > 0 {
            debug!(kind = %kind, count, "Unsubscribed all handlers of kind");
        }
        count
    }

    /// Drops every subscription, returning how many were removed.
    pub fn clear(&self) -> usize {
        self.kinds()
            .iter()
            .map(|kind| self.unsubscribe_kind(kind))
            .sum()
    }

    fn downcast<E: Event>(list: Arc<dyn SubscriberList>) -> Option<Arc<HandlerList<E>>> {
        match list.into_any().downcast::<HandlerList<E>>() {
            Ok(list) => Some(list),
            Err(_) => {
                // Keys are derived from the list's own element type, so this
                // only fires if two types ever share a TypeId.
                error!(kind = E::name(), "Subscriber list type does not match its kind");
                None
            }
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in self.table.iter() {
            map.entry(entry.key(), &entry.value().len());
        }
        map.finish()
    }
}
