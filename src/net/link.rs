//! Collaborator seams and the in-process network conditioner
//!
//! The prediction and reconciliation cores never touch a socket. They talk
//! to an [`InputSampler`], a [`ClientLink`] and a [`ServerLink`] injected at
//! construction. [`ConditionedChannel`] carries encoded payloads between
//! roles in-process while imposing latency, jitter and loss.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::LinkSettings;
use crate::game::{InputFrame, Tick};

use super::protocol::{ConnectionId, TickInputBatch, WorldStateMessage};

/// Yields one input per simulated tick
pub trait InputSampler: Send {
    /// `None` is treated as the neutral input
    fn sample(&mut self, tick: Tick) -> Option<InputFrame>;
}

impl<F> InputSampler for F
where
    F: FnMut(Tick) -> Option<InputFrame> + Send,
{
    fn sample(&mut self, tick: Tick) -> Option<InputFrame> {
        self(tick)
    }
}

/// Client-side outbound path for input batches (sequenced delivery)
pub trait ClientLink: Send {
    fn send_input(&mut self, batch: &TickInputBatch);
}

/// Server-side outbound path for world states (sequenced delivery)
pub trait ServerLink: Send {
    fn send_world_state(&mut self, connection: ConnectionId, msg: &WorldStateMessage);
}

/// Client link that keeps every batch it is handed
#[derive(Clone, Default)]
pub struct CapturedInputs {
    batches: Arc<Mutex<Vec<TickInputBatch>>>,
}

impl CapturedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything captured so far
    pub fn take(&self) -> Vec<TickInputBatch> {
        std::mem::take(&mut *self.batches.lock())
    }

    pub fn last(&self) -> Option<TickInputBatch> {
        self.batches.lock().last().cloned()
    }
}

impl ClientLink for CapturedInputs {
    fn send_input(&mut self, batch: &TickInputBatch) {
        self.batches.lock().push(batch.clone());
    }
}

/// Server link that keeps every world state it is handed
#[derive(Clone, Default)]
pub struct CapturedWorldStates {
    sent: Arc<Mutex<Vec<(ConnectionId, WorldStateMessage)>>>,
}

impl CapturedWorldStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything captured so far
    pub fn take(&self) -> Vec<(ConnectionId, WorldStateMessage)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl ServerLink for CapturedWorldStates {
    fn send_world_state(&mut self, connection: ConnectionId, msg: &WorldStateMessage) {
        self.sent.lock().push((connection, msg.clone()));
    }
}

/// Millisecond clock the conditioner schedules deliveries against
#[derive(Debug, Clone)]
pub enum TimeSource {
    /// Advanced explicitly, for deterministic runs
    Manual(Arc<AtomicU64>),
    /// Real elapsed time since creation
    Wall(Instant),
}

impl TimeSource {
    pub fn manual() -> Self {
        Self::Manual(Arc::new(AtomicU64::new(0)))
    }

    pub fn wall() -> Self {
        Self::Wall(Instant::now())
    }

    pub fn now_ms(&self) -> u64 {
        match self {
            Self::Manual(ms) => ms.load(Ordering::Relaxed),
            Self::Wall(start) => start.elapsed().as_millis() as u64,
        }
    }

    /// Move a manual clock forward. Wall clocks ignore this.
    pub fn advance_ms(&self, ms: u64) {
        if let Self::Manual(now) = self {
            now.fetch_add(ms, Ordering::Relaxed);
        }
    }
}

/// Delivery counters for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChannelStats {
    pub sent: u64,
    pub dropped: u64,
    pub delivered: u64,
}

struct ChannelInner {
    settings: LinkSettings,
    rng: ChaCha8Rng,
    /// Keyed by (deliver_at_ms, send sequence)
    in_flight: BTreeMap<(u64, u64), Bytes>,
    next_seq: u64,
    stats: ChannelStats,
}

/// One-way lossy, latent, reordering pipe for encoded payloads
pub struct ConditionedChannel;

impl ConditionedChannel {
    /// Create a connected sender/receiver pair
    pub fn pair(settings: LinkSettings, time: TimeSource, seed: u64) -> (ChannelSender, ChannelReceiver) {
        let inner = Arc::new(Mutex::new(ChannelInner {
            settings,
            rng: ChaCha8Rng::seed_from_u64(seed),
            in_flight: BTreeMap::new(),
            next_seq: 0,
            stats: ChannelStats::default(),
        }));
        (
            ChannelSender {
                inner: inner.clone(),
                time: time.clone(),
            },
            ChannelReceiver { inner, time },
        )
    }
}

/// Sending half of a [`ConditionedChannel`]
#[derive(Clone)]
pub struct ChannelSender {
    inner: Arc<Mutex<ChannelInner>>,
    time: TimeSource,
}

impl ChannelSender {
    /// Schedule `payload` for delivery, or drop it per the loss setting
    pub fn send(&self, payload: Bytes) {
        let now = self.time.now_ms();
        let mut inner = self.inner.lock();
        inner.stats.sent += 1;

        let loss = inner.settings.packet_loss_percent.min(100);
        if loss > 0 && inner.rng.gen_range(0..100) < loss {
            inner.stats.dropped += 1;
            return;
        }

        let min = u64::from(inner.settings.latency_min_ms);
        let max = u64::from(inner.settings.latency_max_ms).max(min);
        let latency = inner.rng.gen_range(min..=max);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.in_flight.insert((now + latency, seq), payload);
    }

    pub fn stats(&self) -> ChannelStats {
        self.inner.lock().stats
    }
}

/// Receiving half of a [`ConditionedChannel`]
pub struct ChannelReceiver {
    inner: Arc<Mutex<ChannelInner>>,
    time: TimeSource,
}

impl ChannelReceiver {
    /// Every payload whose delivery time has passed, in arrival order
    pub fn drain(&self) -> Vec<Bytes> {
        let now = self.time.now_ms();
        let mut inner = self.inner.lock();
        let pending = inner.in_flight.split_off(&(now + 1, 0));
        let due = std::mem::replace(&mut inner.in_flight, pending);
        inner.stats.delivered += due.len() as u64;
        due.into_values().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: u8) -> Bytes {
        Bytes::from(vec![n])
    }

    #[test]
    fn ideal_link_delivers_immediately_in_order() {
        let time = TimeSource::manual();
        let (tx, rx) = ConditionedChannel::pair(LinkSettings::ideal(), time, 1);
        for n in 0..5 {
            tx.send(payload(n));
        }
        let got: Vec<u8> = rx.drain().iter().map(|b| b[0]).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        assert_eq!(tx.stats().delivered, 5);
    }

    #[test]
    fn latency_holds_payloads_until_due() {
        let time = TimeSource::manual();
        let settings = LinkSettings {
            latency_min_ms: 40,
            latency_max_ms: 40,
            packet_loss_percent: 0,
        };
        let (tx, rx) = ConditionedChannel::pair(settings, time.clone(), 1);
        tx.send(payload(9));
        time.advance_ms(39);
        assert!(rx.drain().is_empty());
        time.advance_ms(1);
        assert_eq!(rx.drain().len(), 1);
        assert_eq!(rx.in_flight(), 0);
    }

    #[test]
    fn total_loss_drops_everything() {
        let settings = LinkSettings {
            packet_loss_percent: 100,
            ..LinkSettings::ideal()
        };
        let (tx, rx) = ConditionedChannel::pair(settings, TimeSource::manual(), 3);
        for n in 0..10 {
            tx.send(payload(n));
        }
        assert!(rx.drain().is_empty());
        assert_eq!(tx.stats().dropped, 10);
    }

    #[test]
    fn same_seed_same_schedule() {
        let run = |seed| {
            let time = TimeSource::manual();
            let (tx, rx) = ConditionedChannel::pair(LinkSettings::default(), time.clone(), seed);
            let mut order = Vec::new();
            for n in 0..50 {
                tx.send(payload(n));
                time.advance_ms(10);
                order.extend(rx.drain().iter().map(|b| b[0]));
            }
            order
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn closures_are_samplers() {
        let mut sampler = |tick: Tick| (tick % 2 == 0).then(InputFrame::neutral);
        assert!(sampler.sample(2).is_some());
        assert!(sampler.sample(3).is_none());
    }
}
