use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Unique identifier with generation tracking to prevent stale references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct GenerationalId {
    pub index: usize,
    pub generation: u32,
}

impl GenerationalId {
    pub fn new(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// Typed, generation-checked handle into an [`Arena<T>`].
pub struct Handle<T> {
    id: GenerationalId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn new(index: usize, generation: u32) -> Self {
        Self {
            id: GenerationalId::new(index, generation),
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.id.index
    }

    pub fn generation(&self) -> u32 {
        self.id.generation
    }

    pub fn id(&self) -> GenerationalId {
        self.id
    }

    pub fn is_null(&self) -> bool {
        self.id.index == usize::MAX
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::new(usize::MAX, 0)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.id.index, self.id.generation)
    }
}

impl<T> Serialize for Handle<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Handle<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = GenerationalId::deserialize(deserializer)?;
        Ok(Self::new(id.index, id.generation))
    }
}

/// Outcome of [`Arena::release`].
#[derive(Debug, PartialEq, Eq)]
pub enum Release<T> {
    /// The last reference was dropped and the item was removed.
    Freed(T),
    /// Other owners still hold references.
    Shared,
    /// The handle did not refer to a live item.
    Stale,
}

impl<T> Release<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, Release::Stale)
    }
}

struct Slot<T> {
    item: T,
    refs: u32,
}

/// Generational arena with shared ownership.
///
/// Every inserted item starts with one reference held by its creator. Other
/// owners call [`Arena::retain`]; each [`Arena::release`] drops one reference
/// and the item is freed once none remain, bumping the slot generation so
/// stale handles stop resolving.
pub struct Arena<T> {
    items: Vec<Option<Slot<T>>>,
    generations: Vec<u32>,
    free_list: VecDeque<usize>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            generations: Vec::new(),
            free_list: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        let slot = Slot { item, refs: 1 };
        if let Some(index) = self.free_list.pop_front() {
            let generation = self.generations[index];
            self.items[index] = Some(slot);
            return Handle::new(index, generation);
        }

        let index = self.items.len();
        self.items.push(Some(slot));
        self.generations.push(0);
        Handle::new(index, 0)
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.slot(handle).is_some()
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slot(handle).map(|slot| &slot.item)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if self.is_valid(handle) {
            self.items
                .get_mut(handle.index())
                .and_then(|slot| slot.as_mut())
                .map(|slot| &mut slot.item)
        } else {
            None
        }
    }

    pub fn get2_mut(&mut self, a: Handle<T>, b: Handle<T>) -> Option<(&mut T, &mut T)> {
        if a.index() == b.index() || !self.is_valid(a) || !self.is_valid(b) {
            return None;
        }

        let (first, second, flipped) = if a.index() < b.index() {
            (a, b, false)
        } else {
            (b, a, true)
        };

        let (left, right) = self.items.split_at_mut(second.index());
        let first_slot = left.get_mut(first.index()).and_then(|slot| slot.as_mut())?;
        let second_slot = right.get_mut(0).and_then(|slot| slot.as_mut())?;

        if flipped {
            Some((&mut second_slot.item, &mut first_slot.item))
        } else {
            Some((&mut first_slot.item, &mut second_slot.item))
        }
    }

    /// Adds a reference to a live item. Returns false for stale handles.
    pub fn retain(&mut self, handle: Handle<T>) -> bool {
        if !self.is_valid(handle) {
            return false;
        }
        match self.items.get_mut(handle.index()).and_then(|slot| slot.as_mut()) {
            Some(slot) => {
                slot.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one reference, handing the item back if that was the last one.
    pub fn release(&mut self, handle: Handle<T>) -> Release<T> {
        if !self.is_valid(handle) {
            return Release::Stale;
        }
        let remaining = match self.items.get_mut(handle.index()).and_then(|slot| slot.as_mut()) {
            Some(slot) => {
                slot.refs = slot.refs.saturating_sub(1);
                slot.refs
            }
            None => return Release::Stale,
        };
        if remaining > 0 {
            return Release::Shared;
        }
        match self.remove(handle) {
            Some(item) => Release::Freed(item),
            None => Release::Stale,
        }
    }

    pub fn ref_count(&self, handle: Handle<T>) -> u32 {
        self.slot(handle).map(|slot| slot.refs).unwrap_or(0)
    }

    /// Frees the item regardless of outstanding references.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.is_valid(handle) {
            return None;
        }
        let slot = self.items.get_mut(handle.index())?.take()?;
        self.generations[handle.index()] = self.generations[handle.index()].wrapping_add(1);
        self.free_list.push_back(handle.index());
        Some(slot.item)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> + '_ {
        self.items.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref()
                .map(|slot| (Handle::new(index, self.generations[index]), &slot.item))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> + '_ {
        let generations = &self.generations;
        self.items.iter_mut().enumerate().filter_map(move |(index, slot)| {
            slot.as_mut()
                .map(|slot| (Handle::new(index, generations[index]), &mut slot.item))
        })
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle<T>> + '_ {
        self.iter().map(|(handle, _)| handle)
    }

    pub fn len(&self) -> usize {
        self.items.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, handle: Handle<T>) -> Option<&Slot<T>> {
        if self.is_valid(handle) {
            self.items.get(handle.index()).and_then(|slot| slot.as_ref())
        } else {
            None
        }
    }

    fn is_valid(&self, handle: Handle<T>) -> bool {
        self.generations
            .get(handle.index())
            .copied()
            .map(|gen| gen == handle.generation())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handles_become_stale() {
        let mut arena = Arena::new();
        let handle = arena.insert(7_u32);
        assert_eq!(arena.get(handle), Some(&7));

        assert_eq!(arena.release(handle), Release::Freed(7));
        assert!(arena.get(handle).is_none());
        assert!(arena.release(handle).is_stale());

        let reused = arena.insert(9);
        assert_eq!(reused.index(), handle.index());
        assert_ne!(reused.generation(), handle.generation());
        assert!(arena.get(handle).is_none());
    }

    #[test]
    fn shared_items_live_until_last_release() {
        let mut arena = Arena::new();
        let handle = arena.insert("shape");
        assert!(arena.retain(handle));
        assert_eq!(arena.ref_count(handle), 2);

        assert_eq!(arena.release(handle), Release::Shared);
        assert_eq!(arena.get(handle), Some(&"shape"));
        assert_eq!(arena.release(handle), Release::Freed("shape"));
        assert!(!arena.contains(handle));
    }

    #[test]
    fn get2_mut_returns_items_in_argument_order() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        let (x, y) = arena.get2_mut(b, a).expect("distinct handles");
        assert_eq!((*x, *y), (2, 1));
        assert!(arena.get2_mut(a, a).is_none());
    }
}
