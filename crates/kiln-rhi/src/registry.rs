use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::RhiError;

/// Opaque handle to an object owned by a backend.
///
/// Handles carry a generation so a stale id (used after `remove`) is rejected instead of
/// aliasing whatever object reused the slot.
pub struct Id<Tag> {
    index: u32,
    generation: u32,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag> Id<Tag> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _tag: PhantomData,
        }
    }

    pub fn index(self) -> u32 {
        self.index
    }
}

impl<Tag> Clone for Id<Tag> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tag> Copy for Id<Tag> {}

impl<Tag> PartialEq for Id<Tag> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<Tag> Eq for Id<Tag> {}

impl<Tag> Hash for Id<Tag> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<Tag> fmt::Debug for Id<Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slab of backend objects addressed by [`Id`].
pub struct ResourceRegistry<Tag, T> {
    kind: &'static str,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag, T> ResourceRegistry<Tag, T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            _tag: PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> Id<Tag> {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            return Id::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Id::new(index, 0)
    }

    pub fn get(&self, id: Id<Tag>) -> Result<&T, RhiError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
            .ok_or_else(|| self.unknown(id))
    }

    pub fn get_mut(&mut self, id: Id<Tag>) -> Result<&mut T, RhiError> {
        let kind = self.kind;
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or_else(|| RhiError::Backend(format!("unknown {kind} {id:?}")))
    }

    pub fn remove(&mut self, id: Id<Tag>) -> Result<T, RhiError> {
        let value = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.take());
        match value {
            Some(value) => {
                self.free.push(id.index);
                self.live -= 1;
                Ok(value)
            }
            None => Err(self.unknown(id)),
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id<Tag>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Id::new(index as u32, slot.generation), value))
        })
    }

    fn unknown(&self, id: Id<Tag>) -> RhiError {
        RhiError::Backend(format!("unknown {} {id:?}", self.kind))
    }
}
