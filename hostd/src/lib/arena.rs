use crate::utils::*;

/// Which free block satisfies an allocation request.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Fit {
    /// Lowest-addressed free block that is large enough
    #[default]
    First,
    /// Like first fit, but resume scanning after the last allocation
    Next,
    /// Smallest adequate free block
    Best,
    /// Largest free block
    Worst,
}

/// Stable handle to a block of the arena. Handles of blocks that were
/// merged away during coalescing go stale and may later be recycled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(usize);

#[derive(Clone, Debug)]
struct Block {
    offset:     MemUnits,
    size:       MemUnits,
    allocated:  bool,
    prev:       Option<BlockId>,
    next:       Option<BlockId>,
}

/// Read-only view of a block, as handed out by [`MemoryArena::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockView {
    pub offset:     MemUnits,
    pub size:       MemUnits,
    pub allocated:  bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArenaError {
    #[error("block at {offset} does not start where its predecessor ends ({expected})")]
    Gap { offset: MemUnits, expected: MemUnits },
    #[error("blocks end at {end}, arena is {capacity} long")]
    Overrun { end: MemUnits, capacity: MemUnits },
    #[error("empty block at {0}")]
    EmptyBlock(MemUnits),
    #[error("free block at {0} follows another free block")]
    Uncoalesced(MemUnits),
    #[error("back-link of block at {0} is broken")]
    BrokenLink(MemUnits),
}

/// One flat address space, partitioned into an address-ordered,
/// doubly-linked list of free and used blocks.
///
/// Blocks live in a slab and point to their neighbours by index, so a
/// handle stays valid while neighbours are split and merged around it.
/// The only handles that go stale are those of blocks absorbed by a
/// coalescing predecessor.
///
/// Invariants holding after every public call:
/// - blocks cover `[0, capacity)` exactly, without gaps or overlaps
/// - no block is empty
/// - no two free blocks are adjacent
#[derive(Clone, Debug)]
pub struct MemoryArena {
    slots:      Vec<Option<Block>>,
    vacant:     Vec<usize>,
    head:       BlockId,
    capacity:   MemUnits,
    // Next fit's roving pointer. Names the block right after the
    // last allocated one; `None` means "start from the head".
    cursor:     Option<BlockId>,
}

impl MemoryArena {
    pub fn new(capacity: MemUnits) -> Self {
        assert!(capacity > 0, "Empty arena");
        Self {
            slots:  vec![Some(Block {
                offset:     0,
                size:       capacity,
                allocated:  false,
                prev:       None,
                next:       None,
            })],
            vacant:     vec![],
            head:       BlockId(0),
            capacity,
            cursor:     None,
        }
    }

    pub fn capacity(&self) -> MemUnits {
        self.capacity
    }

    /// `true` if a request of `size` could never be served.
    pub fn exceeds_capacity(&self, size: MemUnits) -> bool {
        size > self.capacity
    }

    fn block(&self, id: BlockId) -> &Block {
        match self.slots.get(id.0) {
            Some(Some(b))   => { b },
            _               => { panic!("Stale block handle {:?}", id); }
        }
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        match self.slots.get_mut(id.0) {
            Some(Some(b))   => { b },
            _               => { panic!("Stale block handle {:?}", id); }
        }
    }

    fn is_live(&self, id: BlockId) -> bool {
        matches!(self.slots.get(id.0), Some(Some(_)))
    }

    /// Walks the blocks in address order.
    fn walk(&self) -> impl Iterator<Item = (BlockId, &Block)> + '_ {
        let mut next = Some(self.head);
        std::iter::from_fn(move || {
            let id = next?;
            let b = self.block(id);
            next = b.next;
            Some((id, b))
        })
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockView> + '_ {
        self.walk()
            .map(|(_, b)| BlockView {
                offset:     b.offset,
                size:       b.size,
                allocated:  b.allocated,
            })
    }

    pub fn offset_of(&self, id: BlockId) -> Option<MemUnits> {
        self.slots.get(id.0)?.as_ref().map(|b| b.offset)
    }

    pub fn size_of(&self, id: BlockId) -> Option<MemUnits> {
        self.slots.get(id.0)?.as_ref().map(|b| b.size)
    }

    pub fn is_allocated(&self, id: BlockId) -> bool {
        self.slots.get(id.0)
            .and_then(Option::as_ref)
            .is_some_and(|b| b.allocated)
    }

    pub fn free_total(&self) -> MemUnits {
        self.walk()
            .filter(|(_, b)| !b.allocated)
            .map(|(_, b)| b.size)
            .sum()
    }

    pub fn largest_free(&self) -> MemUnits {
        self.walk()
            .filter(|(_, b)| !b.allocated)
            .map(|(_, b)| b.size)
            .max()
            .unwrap_or(0)
    }

    /// Finds a free block of at least `size` units according to `fit`,
    /// and carves exactly `size` units out of its beginning.
    ///
    /// Returns `None`, with nothing mutated, if no free block is large
    /// enough. Zero-sized requests are never served.
    pub fn allocate(&mut self, size: MemUnits, fit: Fit) -> Option<BlockId> {
        if size == 0 || self.exceeds_capacity(size) {
            return None;
        }
        let fits = |b: &Block| !b.allocated && b.size >= size;
        let chosen = match fit {
            Fit::First  => {
                self.walk()
                    .find(|(_, b)| fits(*b))
                    .map(|(id, _)| id)
            },
            Fit::Next   => { self.next_fit(size) },
            Fit::Best   => {
                // `min_by_key` keeps the first of equal minima, i.e.
                // the lowest address.
                self.walk()
                    .filter(|(_, b)| fits(*b))
                    .min_by_key(|(_, b)| b.size)
                    .map(|(id, _)| id)
            },
            Fit::Worst  => {
                self.walk()
                    .filter(|(_, b)| fits(*b))
                    .min_by_key(|(_, b)| std::cmp::Reverse(b.size))
                    .map(|(id, _)| id)
            },
        }?;
        self.split(chosen, size);
        self.cursor = self.block(chosen).next;

        Some(chosen)
    }

    /// Carves `size` units out of the very end of the arena. Succeeds
    /// only if the last block is free and large enough, so whatever
    /// stays free below it remains one contiguous span.
    ///
    /// The next-fit cursor is left alone.
    pub fn allocate_at_end(&mut self, size: MemUnits) -> Option<BlockId> {
        if size == 0 || self.exceeds_capacity(size) {
            return None;
        }
        let (tail, offset, tail_size) = self.walk()
            .last()
            .filter(|(_, b)| !b.allocated && b.size >= size)
            .map(|(id, b)| (id, b.offset, b.size))?;
        let remainder = tail_size - size;
        if remainder == 0 {
            self.block_mut(tail).allocated = true;
            return Some(tail);
        }
        let top = self.new_block(Block {
            offset:     offset + remainder,
            size,
            allocated:  true,
            prev:       Some(tail),
            next:       None,
        });
        let t = self.block_mut(tail);
        t.size = remainder;
        t.next = Some(top);

        Some(top)
    }

    fn next_fit(&self, size: MemUnits) -> Option<BlockId> {
        let start = match self.cursor {
            Some(c) if self.is_live(c)  => { c },
            _                           => { self.head },
        };
        let mut id = start;
        loop {
            let b = self.block(id);
            if !b.allocated && b.size >= size {
                return Some(id);
            }
            // Wrap around past the end.
            id = b.next.unwrap_or(self.head);
            if id == start {
                return None;
            }
        }
    }

    /// Marks `id` as used with exactly `size` units, handing the
    /// remainder (if any) to a new free block right after it.
    fn split(&mut self, id: BlockId, size: MemUnits) {
        let (offset, old_size, old_next) = {
            let b = self.block(id);
            (b.offset, b.size, b.next)
        };
        let remainder = old_size - size;
        if remainder > 0 {
            let rest = self.new_block(Block {
                offset:     offset + size,
                size:       remainder,
                allocated:  false,
                prev:       Some(id),
                next:       old_next,
            });
            if let Some(n) = old_next {
                self.block_mut(n).prev = Some(rest);
            }
            self.block_mut(id).next = Some(rest);
        }
        let b = self.block_mut(id);
        b.size = size;
        b.allocated = true;
    }

    fn new_block(&mut self, b: Block) -> BlockId {
        match self.vacant.pop() {
            Some(idx)   => {
                self.slots[idx] = Some(b);
                BlockId(idx)
            },
            None        => {
                self.slots.push(Some(b));
                BlockId(self.slots.len() - 1)
            }
        }
    }

    /// Releases a used block and merges it with free neighbours.
    ///
    /// Returns `false` if `id` is stale or already free. The handle must
    /// not be used afterwards: it may have been merged away.
    pub fn free(&mut self, id: BlockId) -> bool {
        if !self.is_allocated(id) {
            return false;
        }
        self.block_mut(id).allocated = false;
        let next = self.block(id).next;
        if let Some(n) = next.filter(|&n| !self.block(n).allocated) {
            self.absorb(id, n);
        }
        let prev = self.block(id).prev;
        if let Some(p) = prev.filter(|&p| !self.block(p).allocated) {
            self.absorb(p, id);
        }

        true
    }

    /// `keep` swallows its successor `gone`.
    fn absorb(&mut self, keep: BlockId, gone: BlockId) {
        let gone_block = match self.slots[gone.0].take() {
            Some(b) => { b },
            None    => { panic!("Absorbing a stale block"); }
        };
        debug_assert_eq!(gone_block.prev, Some(keep));
        if let Some(n) = gone_block.next {
            self.block_mut(n).prev = Some(keep);
        }
        let k = self.block_mut(keep);
        k.size += gone_block.size;
        k.next = gone_block.next;
        self.vacant.push(gone.0);
        if self.cursor == Some(gone) {
            self.cursor = Some(keep);
        }
    }

    /// Verifies the partitioning invariants.
    pub fn check(&self) -> Result<(), ArenaError> {
        let mut expected = 0;
        let mut prev: Option<BlockId> = None;
        let mut last_was_free = false;
        for (id, b) in self.walk() {
            if b.prev != prev {
                return Err(ArenaError::BrokenLink(b.offset));
            }
            if b.offset != expected {
                return Err(ArenaError::Gap { offset: b.offset, expected });
            }
            if b.size == 0 {
                return Err(ArenaError::EmptyBlock(b.offset));
            }
            if !b.allocated && last_was_free {
                return Err(ArenaError::Uncoalesced(b.offset));
            }
            last_was_free = !b.allocated;
            expected = b.offset + b.size;
            prev = Some(id);
        }
        if expected != self.capacity {
            return Err(ArenaError::Overrun { end: expected, capacity: self.capacity });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(a: &MemoryArena) -> Vec<(MemUnits, MemUnits, bool)> {
        a.blocks()
            .map(|b| (b.offset, b.size, b.allocated))
            .collect()
    }

    /// Builds `[used 10][free 30][used 10][free 10][used 10][free 30]`.
    fn holey() -> (MemoryArena, Vec<BlockId>) {
        let mut a = MemoryArena::new(100);
        let ids: Vec<BlockId> = [10, 30, 10, 10, 10, 30].iter()
            .map(|&s| a.allocate(s, Fit::First).unwrap())
            .collect();
        assert!(a.free(ids[1]));
        assert!(a.free(ids[3]));
        assert!(a.free(ids[5]));
        a.check().unwrap();
        (a, ids)
    }

    #[test]
    fn splits_exactly() {
        let mut a = MemoryArena::new(100);
        let id = a.allocate(40, Fit::First).unwrap();
        assert_eq!(a.offset_of(id), Some(0));
        assert_eq!(layout(&a), vec![(0, 40, true), (40, 60, false)]);
        // No remainder: no empty trailing block.
        a.allocate(60, Fit::First).unwrap();
        assert_eq!(layout(&a), vec![(0, 40, true), (40, 60, true)]);
        assert!(a.allocate(1, Fit::First).is_none());
        a.check().unwrap();
    }

    #[test]
    fn rejects_zero_and_oversized() {
        let mut a = MemoryArena::new(100);
        assert!(a.allocate(0, Fit::First).is_none());
        assert!(a.allocate(101, Fit::Worst).is_none());
        assert!(a.exceeds_capacity(101));
        assert!(!a.exceeds_capacity(100));
        assert_eq!(layout(&a), vec![(0, 100, false)]);
    }

    #[test]
    fn first_fit_takes_lowest_address() {
        let (mut a, _) = holey();
        let id = a.allocate(10, Fit::First).unwrap();
        assert_eq!(a.offset_of(id), Some(10));
    }

    #[test]
    fn best_fit_takes_smallest_hole() {
        let (mut a, _) = holey();
        let id = a.allocate(10, Fit::Best).unwrap();
        assert_eq!(a.offset_of(id), Some(50));
    }

    #[test]
    fn best_fit_ties_go_to_lowest_address() {
        let (mut a, _) = holey();
        let id = a.allocate(25, Fit::Best).unwrap();
        assert_eq!(a.offset_of(id), Some(10));
    }

    #[test]
    fn worst_fit_takes_largest_hole() {
        let (mut a, _) = holey();
        // Two 30-unit holes: the lower one wins.
        let id = a.allocate(5, Fit::Worst).unwrap();
        assert_eq!(a.offset_of(id), Some(10));
        let id = a.allocate(5, Fit::Worst).unwrap();
        assert_eq!(a.offset_of(id), Some(70));
        assert!(a.allocate(31, Fit::Worst).is_none());
    }

    #[test]
    fn next_fit_roves_and_wraps() {
        let (mut a, _) = holey();
        // Cursor starts after the last allocation (nothing: the
        // arena's end), so the scan wraps to the lowest hole.
        let first = a.allocate(10, Fit::Next).unwrap();
        assert_eq!(a.offset_of(first), Some(10));
        // Cursor now names the 20-unit remainder at 20.
        let second = a.allocate(10, Fit::Next).unwrap();
        assert_eq!(a.offset_of(second), Some(20));
        // First fit would go back to 30; next fit carries on.
        let third = a.allocate(10, Fit::Next).unwrap();
        assert_eq!(a.offset_of(third), Some(30));
        // Cursor is on the used block at 40; the hole at 50 is next.
        let fourth = a.allocate(10, Fit::Next).unwrap();
        assert_eq!(a.offset_of(fourth), Some(50));
        let fifth = a.allocate(30, Fit::Next).unwrap();
        assert_eq!(a.offset_of(fifth), Some(70));
        // Everything is used and the cursor fell off the end.
        assert!(a.allocate(1, Fit::Next).is_none());
        a.check().unwrap();
    }

    #[test]
    fn next_fit_cursor_follows_coalescing() {
        let mut a = MemoryArena::new(100);
        let x = a.allocate(20, Fit::Next).unwrap();
        let y = a.allocate(20, Fit::Next).unwrap();
        let _z = a.allocate(20, Fit::Next).unwrap();
        // Cursor sits on the free tail at 60.
        a.free(y);
        a.free(x);
        // [free 40][used 20][free 40]: tail block still the cursor.
        let w = a.allocate(30, Fit::Next).unwrap();
        assert_eq!(a.offset_of(w), Some(60));
        // Cursor sits on the 10-unit remainder at 90; the next 30 wraps.
        let v = a.allocate(30, Fit::Next).unwrap();
        assert_eq!(a.offset_of(v), Some(0));
        a.check().unwrap();
    }

    #[test]
    fn next_fit_cursor_moves_into_merged_predecessor() {
        let mut a = MemoryArena::new(100);
        let x = a.allocate(50, Fit::Next).unwrap();
        let y = a.allocate(50, Fit::Next).unwrap();
        a.free(x);
        // Cursor is `None` (arena end); allocate from the front to move it.
        let x = a.allocate(25, Fit::Next).unwrap();
        assert_eq!(a.offset_of(x), Some(0));
        // Cursor names the free 25 at 25. Freeing x merges that block into x.
        a.free(x);
        a.check().unwrap();
        let again = a.allocate(50, Fit::Next).unwrap();
        assert_eq!(a.offset_of(again), Some(0));
        assert!(a.is_allocated(y));
    }

    #[test]
    fn end_allocation_leaves_one_free_span() {
        let mut a = MemoryArena::new(100);
        let low = a.allocate(30, Fit::First).unwrap();
        let top = a.allocate_at_end(20).unwrap();
        assert_eq!(a.offset_of(top), Some(80));
        assert_eq!(layout(&a), vec![(0, 30, true), (30, 50, false), (80, 20, true)]);
        a.free(low);
        assert_eq!(a.largest_free(), 80);
        // The tail is taken now.
        assert!(a.allocate_at_end(10).is_none());
        a.check().unwrap();
    }

    #[test]
    fn end_allocation_needs_a_free_tail() {
        let mut a = MemoryArena::new(100);
        let _all = a.allocate(100, Fit::First).unwrap();
        assert!(a.allocate_at_end(1).is_none());
        let mut b = MemoryArena::new(100);
        let exact = b.allocate_at_end(100).unwrap();
        assert_eq!(layout(&b), vec![(0, 100, true)]);
        assert!(b.free(exact));
        assert_eq!(layout(&b), vec![(0, 100, false)]);
    }

    #[test]
    fn coalesces_both_sides() {
        let mut a = MemoryArena::new(90);
        let ids: Vec<BlockId> = (0..3)
            .map(|_| a.allocate(30, Fit::First).unwrap())
            .collect();
        a.free(ids[0]);
        a.free(ids[2]);
        assert_eq!(layout(&a), vec![(0, 30, false), (30, 30, true), (60, 30, false)]);
        a.free(ids[1]);
        assert_eq!(layout(&a), vec![(0, 90, false)]);
        a.check().unwrap();
    }

    #[test]
    fn double_free_is_refused() {
        let mut a = MemoryArena::new(90);
        let x = a.allocate(30, Fit::First).unwrap();
        let _y = a.allocate(30, Fit::First).unwrap();
        assert!(a.free(x));
        assert!(!a.free(x));
        a.check().unwrap();
    }

    #[test]
    fn allocate_then_free_round_trips() {
        for fit in [Fit::First, Fit::Best, Fit::Worst] {
            let (mut a, _) = holey();
            let before = layout(&a);
            for size in [1, 10, 25, 30] {
                let id = a.allocate(size, fit).unwrap();
                assert!(a.free(id));
                assert_eq!(layout(&a), before, "{:?} with size {}", fit, size);
            }
        }
    }

    #[test]
    fn handles_are_recycled_after_merges() {
        let mut a = MemoryArena::new(100);
        for _ in 0..50 {
            let x = a.allocate(10, Fit::First).unwrap();
            let y = a.allocate(10, Fit::First).unwrap();
            a.free(x);
            a.free(y);
        }
        assert_eq!(layout(&a), vec![(0, 100, false)]);
        assert!(a.slots.len() <= 3);
        assert_eq!(a.free_total(), 100);
        assert_eq!(a.largest_free(), 100);
    }
}
