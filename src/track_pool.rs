use crate::descriptor::TupleDesc;
use crate::feature::{HybridTrack, TrackHandle};

/// Which list a slot currently belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    Active,
    Inactive,
    /// Dropped during the current frame, still readable
    Dropped,
    /// Storage waiting to be reused
    Free,
}

struct Slot<D> {
    track: HybridTrack<D>,
    membership: Membership,
    /// bumped whenever the slot becomes free
    generation: u32,
    /// position inside `all`, valid while active or inactive
    all_index: usize,
    /// position inside the list named by `membership`
    list_index: usize,
}

/// Owns every track. Tracks live in slots addressed by [`TrackHandle`]; the
/// `all`, `active` and `inactive` lists only hold handles. Every slot records
/// where it sits in those lists so removal is a swap-remove in O(1).
///
/// Slots dropped during a frame are kept readable and only become reusable
/// after [`TrackPool::begin_frame`]. Handles to a recycled slot are stale and
/// resolve to nothing.
pub struct TrackPool<D> {
    slots: Vec<Slot<D>>,
    all: Vec<TrackHandle>,
    active: Vec<TrackHandle>,
    inactive: Vec<TrackHandle>,
    dropped: Vec<TrackHandle>,
    free: Vec<usize>,
}

impl<D: TupleDesc> TrackPool<D> {
    pub fn new() -> Self {
        Self {
            slots: vec![],
            all: vec![],
            active: vec![],
            inactive: vec![],
            dropped: vec![],
            free: vec![],
        }
    }

    /// Recycles the slots dropped during the previous frame
    pub fn begin_frame(&mut self) {
        for h in self.dropped.drain(..) {
            release(&mut self.slots[h.slot], &mut self.free, h.slot);
        }
    }

    /// Adds an active track whose description is a copy of `descriptor`.
    /// Storage of a free slot is reused when there is one, in which case the
    /// old track content is still there and must be overwritten by the caller.
    pub fn spawn(&mut self, descriptor: &D) -> TrackHandle {
        let index = if let Some(index) = self.free.pop() {
            self.slots[index].track.descriptor.set_to(descriptor);
            index
        } else {
            self.slots.push(Slot {
                track: HybridTrack::new(descriptor.clone()),
                membership: Membership::Free,
                generation: 0,
                all_index: 0,
                list_index: 0,
            });
            self.slots.len() - 1
        };

        let slot = &mut self.slots[index];
        let h = TrackHandle {
            slot: index,
            generation: slot.generation,
        };
        slot.membership = Membership::Active;
        slot.all_index = self.all.len();
        slot.list_index = self.active.len();
        self.all.push(h);
        self.active.push(h);
        h
    }

    /// Moves an active track to the inactive list
    pub fn deactivate(&mut self, h: TrackHandle) {
        debug_assert_eq!(self.membership(h), Some(Membership::Active));
        let index = self.slots[h.slot].list_index;
        swap_remove_list(&mut self.active, index, &mut self.slots);
        let slot = &mut self.slots[h.slot];
        slot.membership = Membership::Inactive;
        slot.list_index = self.inactive.len();
        self.inactive.push(h);
    }

    /// Moves an inactive track to the active list
    pub fn activate(&mut self, h: TrackHandle) {
        debug_assert_eq!(self.membership(h), Some(Membership::Inactive));
        let index = self.slots[h.slot].list_index;
        swap_remove_list(&mut self.inactive, index, &mut self.slots);
        let slot = &mut self.slots[h.slot];
        slot.membership = Membership::Active;
        slot.list_index = self.active.len();
        self.active.push(h);
    }

    /// Removes a track from `all` and from the one list it was in. Returns
    /// false if the handle does not refer to a live track.
    pub fn drop_track(&mut self, h: TrackHandle) -> bool {
        let Some(slot) = self.slot(h) else {
            return false;
        };
        let (membership, all_index, list_index) = (slot.membership, slot.all_index, slot.list_index);
        match membership {
            Membership::Active => swap_remove_list(&mut self.active, list_index, &mut self.slots),
            Membership::Inactive => swap_remove_list(&mut self.inactive, list_index, &mut self.slots),
            Membership::Dropped | Membership::Free => return false,
        }
        debug_assert_eq!(self.all[all_index], h);
        self.all.swap_remove(all_index);
        if let Some(&moved) = self.all.get(all_index) {
            self.slots[moved.slot].all_index = all_index;
        }

        let slot = &mut self.slots[h.slot];
        slot.membership = Membership::Dropped;
        slot.list_index = self.dropped.len();
        self.dropped.push(h);
        true
    }

    /// Forgets every track. Their storage is kept for reuse.
    pub fn clear(&mut self) {
        self.all.clear();
        self.active.clear();
        self.inactive.clear();
        self.dropped.clear();
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            release(slot, &mut self.free, index);
        }
    }

    fn slot(&self, h: TrackHandle) -> Option<&Slot<D>> {
        self.slots
            .get(h.slot)
            .filter(|s| s.generation == h.generation)
    }

    /// `None` for stale handles
    pub fn membership(&self, h: TrackHandle) -> Option<Membership> {
        self.slot(h).map(|s| s.membership)
    }

    /// Track stored at `h`, unless the handle is stale
    pub fn get(&self, h: TrackHandle) -> Option<&HybridTrack<D>> {
        self.slot(h)
            .filter(|s| s.membership != Membership::Free)
            .map(|s| &s.track)
    }

    pub(crate) fn get_mut(&mut self, h: TrackHandle) -> Option<&mut HybridTrack<D>> {
        self.slots
            .get_mut(h.slot)
            .filter(|s| s.generation == h.generation && s.membership != Membership::Free)
            .map(|s| &mut s.track)
    }

    pub fn all(&self) -> &[TrackHandle] {
        &self.all
    }

    pub fn active(&self) -> &[TrackHandle] {
        &self.active
    }

    pub fn inactive(&self) -> &[TrackHandle] {
        &self.inactive
    }

    pub fn dropped(&self) -> &[TrackHandle] {
        &self.dropped
    }

    /// Number of slots ever allocated
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Checks that every list agrees with the back references of the slots
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let lists = [
            (Membership::Active, &self.active),
            (Membership::Inactive, &self.inactive),
            (Membership::Dropped, &self.dropped),
        ];
        for (membership, list) in lists {
            for (i, h) in list.iter().enumerate() {
                let slot = &self.slots[h.slot];
                if slot.generation != h.generation || slot.membership != membership || slot.list_index != i {
                    return false;
                }
            }
        }
        for (i, h) in self.all.iter().enumerate() {
            let slot = &self.slots[h.slot];
            let live = matches!(slot.membership, Membership::Active | Membership::Inactive);
            if !live || slot.generation != h.generation || slot.all_index != i {
                return false;
            }
        }
        self.all.len() == self.active.len() + self.inactive.len()
            && self.slots.len()
                == self.all.len() + self.dropped.len() + self.free.len()
    }
}

impl<D: TupleDesc> Default for TrackPool<D> {
    fn default() -> Self {
        Self::new()
    }
}

fn release<D>(slot: &mut Slot<D>, free: &mut Vec<usize>, index: usize) {
    slot.membership = Membership::Free;
    slot.generation = slot.generation.wrapping_add(1);
    free.push(index);
}

fn swap_remove_list<D>(list: &mut Vec<TrackHandle>, index: usize, slots: &mut [Slot<D>]) {
    list.swap_remove(index);
    if let Some(&moved) = list.get(index) {
        slots[moved.slot].list_index = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TupleDescF64;

    fn desc(v: f64) -> TupleDescF64 {
        TupleDescF64::from_slice(&[v, v])
    }

    #[test]
    fn test_lists_follow_moves() {
        let mut pool = TrackPool::new();
        let a = pool.spawn(&desc(0.));
        let b = pool.spawn(&desc(1.));
        let c = pool.spawn(&desc(2.));
        pool.deactivate(a);
        pool.deactivate(c);
        assert_eq!(pool.active(), &[b]);
        assert_eq!(pool.inactive(), &[a, c]);
        assert!(pool.is_consistent());

        pool.activate(a);
        assert_eq!(pool.inactive(), &[c]);
        assert_eq!(pool.membership(a), Some(Membership::Active));
        assert!(pool.is_consistent());
    }

    #[test]
    fn test_drop_and_reuse() {
        let mut pool = TrackPool::new();
        let a = pool.spawn(&desc(0.));
        let b = pool.spawn(&desc(1.));
        pool.deactivate(b);

        assert!(pool.drop_track(a));
        assert!(!pool.drop_track(a));
        assert!(pool.drop_track(b));
        assert!(pool.all().is_empty());
        assert_eq!(pool.dropped(), &[a, b]);
        // still readable until the next frame
        assert_eq!(pool.get(a).unwrap().descriptor, desc(0.));
        assert!(pool.is_consistent());

        // not reused within the same frame
        let c = pool.spawn(&desc(2.));
        assert_eq!(pool.capacity(), 3);
        assert!(pool.drop_track(c));

        pool.begin_frame();
        assert!(pool.get(a).is_none());
        let d = pool.spawn(&desc(3.));
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.get(d).unwrap().descriptor, desc(3.));
        assert!(pool.is_consistent());
    }

    #[test]
    fn test_recycled_slot_rejects_old_handle() {
        let mut pool = TrackPool::new();
        let old = pool.spawn(&desc(0.));
        pool.get_mut(old).unwrap().feature_id = 0;
        assert!(pool.drop_track(old));

        pool.begin_frame();
        let new = pool.spawn(&desc(1.));
        pool.get_mut(new).unwrap().feature_id = 1;
        // same storage, different track
        assert_eq!(new.slot, old.slot);
        assert_ne!(new, old);

        assert!(pool.get(old).is_none());
        assert!(pool.get_mut(old).is_none());
        assert_eq!(pool.membership(old), None);
        assert!(!pool.drop_track(old));
        assert_eq!(pool.active(), &[new]);
        assert_eq!(pool.get(new).unwrap().feature_id, 1);
        assert!(pool.is_consistent());
    }

    #[test]
    fn test_clear_keeps_storage() {
        let mut pool = TrackPool::new();
        let first = pool.spawn(&desc(0.));
        for i in 1..4 {
            pool.spawn(&desc(i as f64));
        }
        pool.clear();
        assert!(pool.all().is_empty());
        assert!(pool.active().is_empty());
        assert!(pool.get(first).is_none());
        assert!(pool.is_consistent());
        for i in 0..4 {
            pool.spawn(&desc(i as f64));
        }
        assert_eq!(pool.capacity(), 4);
        assert!(!pool.drop_track(first));
        assert!(!pool.drop_track(TrackHandle { slot: 17, generation: 0 }));
    }
}
