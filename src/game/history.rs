//! Tick-indexed circular history

use super::Tick;

/// Ticks of history retained per ring (about 34 s at 30 Hz)
pub const HISTORY_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Slot<T> {
    tick: Option<Tick>,
    value: T,
}

/// Fixed-capacity ring mapping `tick mod capacity` to a value.
///
/// Writing tick `T` overwrites whatever tick `T - capacity` held. Each slot
/// remembers which tick it holds, so [`RingHistory::get`] only answers for
/// ticks still retained while [`RingHistory::slot`] returns the raw contents.
#[derive(Debug, Clone)]
pub struct RingHistory<T> {
    slots: Vec<Slot<T>>,
}

impl<T: Clone + Default> RingHistory<T> {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![
                Slot {
                    tick: None,
                    value: T::default(),
                };
                capacity
            ],
        }
    }
}

impl<T> RingHistory<T> {
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, tick: Tick) -> usize {
        tick as usize % self.slots.len()
    }

    /// Store `value` for `tick`, returning the tick that was overwritten
    pub fn insert(&mut self, tick: Tick, value: T) -> Option<Tick> {
        let idx = self.index(tick);
        let slot = &mut self.slots[idx];
        let previous = slot.tick.filter(|&t| t != tick);
        slot.tick = Some(tick);
        slot.value = value;
        previous
    }

    /// Value for `tick` if the ring still holds that exact tick
    pub fn get(&self, tick: Tick) -> Option<&T> {
        let slot = &self.slots[self.index(tick)];
        (slot.tick == Some(tick)).then_some(&slot.value)
    }

    pub fn get_mut(&mut self, tick: Tick) -> Option<&mut T> {
        let idx = self.index(tick);
        let slot = &mut self.slots[idx];
        (slot.tick == Some(tick)).then_some(&mut slot.value)
    }

    /// Raw slot for `tick`, whichever tick last wrote it
    pub fn slot(&self, tick: Tick) -> &T {
        &self.slots[self.index(tick)].value
    }

    /// Tick currently held by the slot `tick` maps to
    pub fn slot_tick(&self, tick: Tick) -> Option<Tick> {
        self.slots[self.index(tick)].tick
    }

    pub fn contains(&self, tick: Tick) -> bool {
        self.slot_tick(tick) == Some(tick)
    }

    /// Forget every entry
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.tick = None;
        }
    }
}

impl<T: Clone + Default> Default for RingHistory<T> {
    fn default() -> Self {
        Self::new()
    }
}
