//! Slot allocation strategies for topology elements.
//!
//! Every vertex, edge and face of a [`TopologyStore`](super::TopologyStore)
//! lives in a [`Pool`]. The pool owns the element storage; a
//! [`SlotAllocator`] decides which slot a new element goes into.
//!
//! There are two strategies:
//!
//! * [`ArenaAllocator`] – bump allocation. Freed slots are never handed out
//!   again until the whole pool is released. Meant for stores that are built
//!   once and thrown away (render-time evaluation).
//! * [`HeapAllocator`] – keeps a free list and reuses slots of pruned
//!   elements. Meant for long lived stores that are re-synchronized every
//!   frame.
//!
//! Callers observe no difference besides slot numbering.
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// Selects the [`SlotAllocator`] a [`Pool`] uses.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum AllocatorKind {
    /// General purpose allocation with slot reuse.
    #[default]
    Heap = 0,
    /// Allocate-only, release-everything-at-once.
    Arena = 1,
}

impl AllocatorKind {
    /// Creates a fresh allocator of this kind.
    pub fn allocator(self) -> Box<dyn SlotAllocator> {
        match self {
            AllocatorKind::Heap => Box::<HeapAllocator>::default(),
            AllocatorKind::Arena => Box::<ArenaAllocator>::default(),
        }
    }
}

/// Hands out slot numbers for a [`Pool`].
pub trait SlotAllocator: fmt::Debug + Send + Sync {
    /// Returns a slot that is not currently in use.
    fn alloc(&mut self) -> u32;

    /// Marks `slot` as unused.
    fn free(&mut self, slot: u32);

    /// Forgets every slot handed out so far.
    fn release(&mut self);

    /// The strategy this allocator implements.
    fn kind(&self) -> AllocatorKind;

    /// One past the highest slot ever handed out since the last
    /// [`release()`](SlotAllocator::release).
    fn high_water(&self) -> usize;
}

/// Bump allocator. [`free()`](SlotAllocator::free) is a no-op.
#[derive(Debug, Default)]
pub struct ArenaAllocator {
    next: u32,
}

impl SlotAllocator for ArenaAllocator {
    #[inline]
    fn alloc(&mut self) -> u32 {
        let slot = self.next;
        self.next += 1;
        slot
    }

    #[inline]
    fn free(&mut self, _slot: u32) {}

    fn release(&mut self) {
        self.next = 0;
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Arena
    }

    fn high_water(&self) -> usize {
        self.next as _
    }
}

/// Free-list allocator. The most recently freed slot is reused first.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    next: u32,
    free: Vec<u32>,
}

impl SlotAllocator for HeapAllocator {
    #[inline]
    fn alloc(&mut self) -> u32 {
        match self.free.pop() {
            Some(slot) => slot,
            None => {
                let slot = self.next;
                self.next += 1;
                slot
            }
        }
    }

    #[inline]
    fn free(&mut self, slot: u32) {
        debug_assert!(slot < self.next);
        self.free.push(slot);
    }

    fn release(&mut self) {
        self.next = 0;
        self.free.clear();
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Heap
    }

    fn high_water(&self) -> usize {
        self.next as _
    }
}

/// Slot storage for one element class.
pub struct Pool<T> {
    slots: Vec<Option<T>>,
    allocator: Box<dyn SlotAllocator>,
    len: usize,
}

impl<T> Pool<T> {
    /// Creates an empty pool backed by an allocator of the given kind.
    pub fn new(kind: AllocatorKind) -> Self {
        Self {
            slots: Vec::new(),
            allocator: kind.allocator(),
            len: 0,
        }
    }

    /// Stores `value` and returns its slot.
    pub fn insert(&mut self, value: T) -> u32 {
        let slot = self.allocator.alloc();
        let index = slot as usize;
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        debug_assert!(self.slots[index].is_none());
        self.slots[index] = Some(value);
        self.len += 1;
        slot
    }

    /// Removes the element in `slot`, handing the slot back to the
    /// allocator.
    pub fn remove(&mut self, slot: u32) -> Option<T> {
        let value = self.slots.get_mut(slot as usize)?.take();
        if value.is_some() {
            self.len -= 1;
            self.allocator.free(slot);
        }
        value
    }

    /// Drops every element and releases all slots at once.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.allocator.release();
        self.len = 0;
    }

    #[inline]
    pub fn get(&self, slot: u32) -> Option<&T> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, slot: u32) -> Option<&mut T> {
        self.slots.get_mut(slot as usize).and_then(Option::as_mut)
    }

    /// Number of live elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        0 == self.len
    }

    /// Number of slots, live or not.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The allocation strategy of this pool.
    pub fn kind(&self) -> AllocatorKind {
        self.allocator.kind()
    }

    /// Iterates `(slot, element)` pairs of all live elements in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, value)| value.as_ref().map(|value| (slot as u32, value)))
    }

    /// Slots of all live elements, in slot order.
    pub fn slots(&self) -> Vec<u32> {
        self.iter().map(|(slot, _)| slot).collect()
    }
}

impl<T: fmt::Debug> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("kind", &self.kind())
            .field("len", &self.len)
            .field("slots", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_never_reuses_slots() {
        let mut pool = Pool::new(AllocatorKind::Arena);
        let a = pool.insert('a');
        let b = pool.insert('b');
        assert_eq!(pool.remove(a), Some('a'));
        let c = pool.insert('c');

        assert_ne!(c, a);
        assert_eq!(c, b + 1);
        assert_eq!(pool.len(), 2);

        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.insert('d'), 0);
    }

    #[test]
    fn heap_reuses_freed_slots() {
        let mut pool = Pool::new(AllocatorKind::Heap);
        let a = pool.insert(1);
        let _b = pool.insert(2);
        pool.remove(a);

        assert_eq!(pool.insert(3), a);
        assert_eq!(pool.get(a), Some(&3));
        assert_eq!(pool.slot_count(), 2);
    }

    #[test]
    fn removing_twice_is_harmless() {
        let mut pool = Pool::new(AllocatorKind::Heap);
        let a = pool.insert(1);
        assert_eq!(pool.remove(a), Some(1));
        assert_eq!(pool.remove(a), None);
        assert_eq!(pool.len(), 0);
        // The slot was freed once, so it comes back once.
        assert_eq!(pool.insert(5), a);
        assert_eq!(pool.insert(6), a + 1);
    }
}
