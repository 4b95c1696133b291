//! Tick-ordered input queue

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use crate::game::{InputFrame, Tick};
use crate::net::ConnectionId;

/// One input waiting for its tick
#[derive(Debug, Clone, Copy)]
pub struct QueuedInput {
    pub tick: Tick,
    pub connection: ConnectionId,
    pub input: InputFrame,
    /// Server tick the client was looking at when it captured the input
    pub view_tick: Tick,
    seq: u64,
}

impl PartialEq for QueuedInput {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedInput {}

impl PartialOrd for QueuedInput {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedInput {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.tick, self.seq).cmp(&(other.tick, other.seq))
    }
}

/// Min-heap on `(tick, arrival order)` shared by every connection.
///
/// A connection holds at most one live input per tick. Pushing another
/// supersedes the earlier one, which stays in the heap until drained and
/// is then dropped.
#[derive(Debug, Default)]
pub struct InputQueue {
    heap: BinaryHeap<Reverse<QueuedInput>>,
    /// Sequence number of the live entry per `(connection, tick)`
    live: HashMap<(ConnectionId, Tick), u64>,
    next_seq: u64,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tick: Tick, connection: ConnectionId, input: InputFrame, view_tick: Tick) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert((connection, tick), seq);
        self.heap.push(Reverse(QueuedInput {
            tick,
            connection,
            input,
            view_tick,
            seq,
        }));
    }

    /// Pop every entry for `tick`. Entries for earlier ticks are discarded;
    /// their count is returned alongside.
    pub fn drain_tick(&mut self, tick: Tick) -> (Vec<QueuedInput>, usize) {
        let mut due = Vec::new();
        let mut discarded = 0;
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.tick > tick {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            let key = (entry.connection, entry.tick);
            if self.live.get(&key) != Some(&entry.seq) {
                continue;
            }
            self.live.remove(&key);
            if entry.tick < tick {
                discarded += 1;
            } else {
                due.push(entry);
            }
        }
        (due, discarded)
    }

    /// Drop everything queued for `connection`
    pub fn remove_connection(&mut self, connection: ConnectionId) {
        self.heap.retain(|Reverse(entry)| entry.connection != connection);
        self.live.retain(|&(owner, _), _| owner != connection);
    }

    /// Number of live entries for `connection`
    pub fn depth(&self, connection: ConnectionId) -> usize {
        self.live.keys().filter(|&&(owner, _)| owner == connection).count()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_tick_order_and_discards_late_entries() {
        let mut queue = InputQueue::new();
        queue.push(12, 1, InputFrame::neutral(), 8);
        queue.push(10, 2, InputFrame::neutral(), 6);
        queue.push(11, 1, InputFrame::neutral(), 7);
        queue.push(9, 1, InputFrame::neutral(), 5);

        let (due, discarded) = queue.drain_tick(10);
        assert_eq!(discarded, 1);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].connection, 2);
        assert_eq!(due[0].view_tick, 6);

        let (due, _) = queue.drain_tick(11);
        assert_eq!(due[0].tick, 11);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn same_tick_keeps_arrival_order() {
        let mut queue = InputQueue::new();
        for connection in [3, 1, 2] {
            queue.push(5, connection, InputFrame::neutral(), 0);
        }
        let (due, _) = queue.drain_tick(5);
        let order: Vec<ConnectionId> = due.iter().map(|e| e.connection).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn removing_a_connection_discards_its_inputs() {
        let mut queue = InputQueue::new();
        queue.push(5, 1, InputFrame::neutral(), 0);
        queue.push(6, 1, InputFrame::neutral(), 0);
        queue.push(5, 2, InputFrame::neutral(), 0);
        assert_eq!(queue.depth(1), 2);
        queue.remove_connection(1);
        assert_eq!(queue.depth(1), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn later_push_supersedes_same_tick() {
        let mut queue = InputQueue::new();
        let mut jump = InputFrame::neutral();
        jump.jump = true;
        queue.push(7, 1, InputFrame::neutral(), 3);
        queue.push(7, 2, InputFrame::neutral(), 3);
        queue.push(7, 1, jump, 5);
        assert_eq!(queue.depth(1), 1);
        assert_eq!(queue.len(), 2);

        let (due, discarded) = queue.drain_tick(7);
        assert_eq!(discarded, 0);
        assert_eq!(due.len(), 2);
        let mine = due.iter().find(|e| e.connection == 1).unwrap();
        assert!(mine.input.jump);
        assert_eq!(mine.view_tick, 5);
        assert!(queue.is_empty());
    }
}
