//! Id Table
//!
//! Sparse mapping from small integer ids to owned objects. Ids are handed out
//! lowest-free-slot first so the table stays dense, and every slot carries a
//! generation counter: freeing a slot bumps its generation, so an id kept
//! across a free no longer resolves even after the index is reissued.
//!
//! ```text
//! slots:  [ Occupied(g0) | Vacant(g3) | Occupied(g1) | Vacant(g0) ]
//! free:   min-heap of vacant indices -> next insert reuses index 1 as (1, g3)
//! ```

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::marker::PhantomData;

/// Raw table id: slot index plus the generation it was issued under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id {
    index: u32,
    generation: u32,
}

impl Id {
    /// Create an id from its parts
    #[inline(always)]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index
    #[inline(always)]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Generation the slot had when this id was issued
    #[inline(always)]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Pack into a single u64 (generation in the high half)
    #[inline(always)]
    pub const fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpack from [`Id::to_bits`]
    #[inline(always)]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Key types usable with [`IdTable`]
pub trait TableKey: Copy {
    fn from_id(id: Id) -> Self;
    fn id(&self) -> Id;
}

impl TableKey for Id {
    #[inline(always)]
    fn from_id(id: Id) -> Self {
        id
    }

    #[inline(always)]
    fn id(&self) -> Id {
        *self
    }
}

#[derive(Debug, Clone)]
enum Slot<V> {
    Occupied { generation: u32, value: V },
    Vacant { generation: u32 },
}

/// Generational slot table keyed by typed ids
#[derive(Debug, Clone)]
pub struct IdTable<K, V> {
    slots: Vec<Slot<V>>,
    free: BinaryHeap<Reverse<u32>>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K: TableKey, V> Default for IdTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TableKey, V> IdTable<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: BinaryHeap::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: BinaryHeap::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    /// Insert a value into the lowest free slot
    pub fn insert(&mut self, value: V) -> K {
        self.insert_with(|_| value)
    }

    /// Insert a value built from its own id
    pub fn insert_with(&mut self, build: impl FnOnce(K) -> V) -> K {
        let id = self.reserve_id();
        self.occupy(id, build(K::from_id(id)));
        K::from_id(id)
    }

    /// Fallible insert: reports allocation failure instead of aborting and
    /// leaves the table untouched on error
    pub fn try_insert_with(&mut self, build: impl FnOnce(K) -> V) -> Result<K> {
        if self.free.is_empty() {
            self.slots
                .try_reserve(1)
                .map_err(|_| StoreError::allocation_failed("id table slot"))?;
        }
        Ok(self.insert_with(build))
    }

    fn reserve_id(&mut self) -> Id {
        if let Some(Reverse(index)) = self.free.pop() {
            let generation = match &self.slots[index as usize] {
                Slot::Vacant { generation } => *generation,
                Slot::Occupied { generation, .. } => {
                    debug_assert!(false, "free list points at an occupied slot");
                    generation.wrapping_add(1)
                }
            };
            Id::new(index, generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Vacant { generation: 0 });
            Id::new(index, 0)
        }
    }

    fn occupy(&mut self, id: Id, value: V) {
        self.slots[id.index() as usize] = Slot::Occupied {
            generation: id.generation(),
            value,
        };
        self.len += 1;
    }

    /// Remove and return the value; the slot becomes reusable under a new generation
    pub fn remove(&mut self, key: K) -> Option<V> {
        let id = key.id();
        let slot = self.slots.get_mut(id.index() as usize)?;
        let generation = match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation() => *generation,
            _ => return None,
        };
        let previous = std::mem::replace(
            slot,
            Slot::Vacant {
                generation: generation.wrapping_add(1),
            },
        );
        self.free.push(Reverse(id.index()));
        self.len -= 1;
        match previous {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get(&self, key: K) -> Option<&V> {
        let id = key.id();
        match self.slots.get(id.index() as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation() => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        let id = key.id();
        match self.slots.get_mut(id.index() as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation() => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever allocated (live + vacant)
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterate live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { generation, value } => {
                Some((K::from_id(Id::new(index as u32, *generation)), value))
            }
            Slot::Vacant { .. } => None,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(key, _)| key)
    }

    /// Remove every live entry, returning them in slot order
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let keys: Vec<K> = self.keys().collect();
        keys.into_iter()
            .filter_map(|key| self.remove(key).map(|value| (key, value)))
            .collect()
    }
}
