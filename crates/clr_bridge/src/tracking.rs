//! Cross-boundary object tracking.
//!
//! Values are registered by identity (the address of their `Arc` allocation)
//! and optionally by a unique name. The table only holds [`Weak`] references,
//! so a tracked value lives exactly as long as its other owners keep it alive.
//! Lookups on a value that has been dropped simply miss, and dead entries are
//! purged on the next mutation. A held `Weak` pins the allocation, so an
//! address cannot be reused by another value while its entry exists.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Identity of a tracked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(usize);

impl ObjectKey {
    pub fn of<T: ?Sized>(value: &Arc<T>) -> Self {
        Self(Arc::as_ptr(value) as *const () as usize)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone)]
struct NameEntry {
    key: ObjectKey,
    type_name: &'static str,
}

type ErasedWeak = Weak<dyn Any + Send + Sync>;

/// Weak identity table plus a name index.
///
/// Both indexes are concurrent maps. A call that needs both locks the
/// identity shard before the name shard, never the other way round.
#[derive(Default)]
pub struct ObjectTable {
    objects: DashMap<ObjectKey, ErasedWeak>,
    names: DashMap<String, NameEntry>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `value`, optionally under `name`.
    ///
    /// # Arguments
    ///
    /// * `value` - The value to track. Only a weak reference is kept.
    /// * `name` - Optional unique name for lookups from the managed side
    ///
    /// # Returns
    ///
    /// `false` without changing anything when the value is already tracked
    /// or the name is already taken by a live value. Entries whose value has
    /// been dropped are purged first, so their names can be reused.
    pub fn track<T: Any + Send + Sync>(&self, value: &Arc<T>, name: Option<&str>) -> bool {
        self.sweep();
        let key = ObjectKey::of(value);

        let slot = match self.objects.entry(key) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => slot,
        };

        if let Some(name) = name {
            match self.names.entry(name.to_string()) {
                Entry::Occupied(_) => return false,
                Entry::Vacant(entry) => {
                    entry.insert(NameEntry {
                        key,
                        type_name: std::any::type_name::<T>(),
                    });
                }
            }
        }

        let weak: Weak<T> = Arc::downgrade(value);
        let weak: ErasedWeak = weak;
        slot.insert(weak);
        debug!("Tracking object {} as {:?}", key, name);
        true
    }

    /// Stops tracking `value`. See [`ObjectTable::untrack_key`].
    pub fn untrack<T: ?Sized>(&self, value: &Arc<T>, also_remove_names: bool) -> bool {
        self.untrack_key(ObjectKey::of(value), also_remove_names)
    }

    /// Removes `key` from the identity table. With `also_remove_names`, every
    /// name pointing at `key` is removed too. Returns whether anything was
    /// removed.
    pub fn untrack_key(&self, key: ObjectKey, also_remove_names: bool) -> bool {
        self.sweep();
        let mut removed = self.objects.remove(&key).is_some();
        if also_remove_names {
            let before = self.names.len();
            self.names.retain(|_, entry| entry.key != key);
            removed |= self.names.len() != before;
        }
        removed
    }

    /// Removes the name entry and the identity it pointed at. Returns `false`
    /// if the name was unknown.
    pub fn untrack_by_name(&self, name: &str) -> bool {
        self.sweep();
        let Some((_, entry)) = self.names.remove(name) else {
            return false;
        };
        self.objects.remove(&entry.key);
        true
    }

    /// Whether `key` refers to a tracked value that is still alive.
    pub fn is_tracked(&self, key: ObjectKey) -> bool {
        self.objects
            .get(&key)
            .map(|weak| weak.strong_count() > 0)
            .unwrap_or(false)
    }

    /// The identity registered under `name`.
    pub fn key_of(&self, name: &str) -> Option<ObjectKey> {
        self.names.get(name).map(|entry| entry.key)
    }

    /// Type name recorded when `name` was registered.
    pub fn type_name_of(&self, name: &str) -> Option<&'static str> {
        self.names.get(name).map(|entry| entry.type_name)
    }

    /// Upgrades the value tracked under `key`, if it is alive and a `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: ObjectKey) -> Option<Arc<T>> {
        let strong = self.objects.get(&key)?.upgrade()?;
        strong.downcast::<T>().ok()
    }

    /// Upgrades the value tracked under `name`, if it is alive and a `T`.
    /// A name whose value has been dropped is purged.
    pub fn find<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let key = self.key_of(name)?;
        if !self.is_tracked(key) {
            self.objects.remove_if(&key, |_, weak| weak.strong_count() == 0);
            self.names.remove_if(name, |_, entry| entry.key == key);
            return None;
        }
        self.get(key)
    }

    /// Drops entries whose value is gone, along with names that no longer
    /// resolve to a tracked value. Returns the number of identities removed.
    pub fn sweep(&self) -> usize {
        let before = self.objects.len();
        self.objects.retain(|_, weak| weak.strong_count() > 0);
        let removed = before.saturating_sub(self.objects.len());
        if removed > 0 {
            let live: HashSet<ObjectKey> = self.objects.iter().map(|entry| *entry.key()).collect();
            self.names.retain(|_, entry| live.contains(&entry.key));
            debug!("Swept {} dead tracked objects", removed);
        }
        removed
    }

    /// Number of identity entries, dead ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&self) {
        self.objects.clear();
        self.names.clear();
    }
}

impl fmt::Debug for ObjectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTable")
            .field("objects", &self.objects.len())
            .field("names", &self.names.len())
            .finish()
    }
}
