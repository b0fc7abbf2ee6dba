//! A cascading hierarchical timing wheel, after the design in
//! `contrib/timer-wheel/timer-wheel.c` of the source translator's host
//! project: a root wheel of 256 one-second slots, cascading into four
//! higher wheels of 64 slots each (each slot of level `n` spanning
//! `256 * 64^(n-1)` seconds), for a theoretical range of `256 * 64^4`
//! seconds (~4.3 billion seconds).
//!
//! Unlike the source, timer callbacks are not raw function pointers invoked
//! under the wheel's internal lock — they are a small enum payload
//! ([`TimerWheel::add`] takes the payload, not a closure) delivered to a
//! single registered sink *after* the wheel's mutex has been released, so
//! the sink can never reentrantly call back into the wheel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

const TVR_BITS: u32 = 8;
const TVN_BITS: u32 = 6;
const TVR_SIZE: usize = 1 << TVR_BITS; // 256
const TVN_SIZE: usize = 1 << TVN_BITS; // 64
const TVR_MASK: u64 = (TVR_SIZE as u64) - 1;
const WHEEL_COUNT: usize = 5; // tv1 (root) + tv2..tv5

/// Opaque identity of a scheduled timer, returned by [`TimerWheel::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry<T> {
    expires_tick: u64,
    data: T,
}

struct WheelInner<T> {
    now: u64,
    /// `levels[0]` is the root wheel (256 slots of 1s); `levels[1..=4]` are
    /// the 64-slot cascading wheels.
    levels: [Vec<Vec<u64>>; WHEEL_COUNT],
    entries: HashMap<u64, Entry<T>>,
}

fn slot_span(level: usize) -> u64 {
    // tv1 slots are 1 tick wide; tv2 slots are 256 ticks wide; each level
    // above that multiplies by 64.
    if level == 0 {
        1
    } else {
        TVR_SIZE as u64 * (TVN_SIZE as u64).pow((level - 1) as u32)
    }
}

fn level_size(level: usize) -> usize {
    if level == 0 { TVR_SIZE } else { TVN_SIZE }
}

impl<T> WheelInner<T> {
    fn new() -> Self {
        let levels = std::array::from_fn(|level| vec![Vec::new(); level_size(level)]);
        WheelInner { now: 0, levels, entries: HashMap::new() }
    }

    /// Compute `(level, slot)` for an absolute expiry tick, relative to `now`.
    fn locate(&self, expires_tick: u64) -> (usize, usize) {
        let delta = expires_tick.saturating_sub(self.now);
        for level in 0..WHEEL_COUNT {
            let span = slot_span(level);
            let max = span * level_size(level) as u64;
            if delta < max || level == WHEEL_COUNT - 1 {
                let slot = ((expires_tick / span) % level_size(level) as u64) as usize;
                return (level, slot);
            }
        }
        unreachable!()
    }

    fn insert(&mut self, id: u64, expires_tick: u64, data: T) {
        let (level, slot) = self.locate(expires_tick.max(self.now));
        self.levels[level][slot].push(id);
        self.entries.insert(id, Entry { expires_tick: expires_tick.max(self.now), data });
    }

    /// Lazily delete: remove from the id->entry map. The id is left behind
    /// as a tombstone in its slot vector and skipped when that slot fires.
    fn remove(&mut self, id: u64) -> Option<T> {
        self.entries.remove(&id).map(|e| e.data)
    }

    /// Move every (non-tombstoned) id out of `levels[level][slot]` and
    /// reinsert it, recomputed against the current `now`. Used when a
    /// higher wheel's slot needs to be redistributed into the lower ones.
    fn cascade(&mut self, level: usize, slot: usize) {
        let ids = std::mem::take(&mut self.levels[level][slot]);
        for id in ids {
            if let Some(entry) = self.entries.remove(&id) {
                let (l, s) = self.locate(entry.expires_tick);
                self.levels[l][s].push(id);
                self.entries.insert(id, entry);
            }
        }
    }

    /// Advance `now` by one tick, cascading and firing as needed. Returns
    /// the payloads of every timer that expired at or before the new tick.
    fn advance(&mut self) -> Vec<T> {
        self.now += 1;
        let root_slot = (self.now & TVR_MASK) as usize;
        if root_slot == 0 {
            // tv1 wrapped: cascade tv2's current slot down.
            let mut level = 1;
            loop {
                let span = slot_span(level);
                let slot = ((self.now / span) % TVN_SIZE as u64) as usize;
                self.cascade(level, slot);
                if slot != 0 || level == WHEEL_COUNT - 1 {
                    break;
                }
                level += 1;
            }
        }
        let fired_ids = std::mem::take(&mut self.levels[0][root_slot]);
        let mut out = Vec::with_capacity(fired_ids.len());
        for id in fired_ids {
            if let Some(entry) = self.entries.remove(&id) {
                out.push(entry.data);
            }
        }
        out
    }
}

/// A hierarchical timer wheel with a background ticker advancing once per
/// second. Construct with [`TimerWheel::init`]; every fired timer's payload
/// is handed to the `on_fire` sink outside of any wheel-internal lock.
pub struct TimerWheel<T: Send + 'static> {
    inner: Arc<Mutex<WheelInner<T>>>,
    next_id: AtomicU64,
    ticker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> TimerWheel<T> {
    /// Start the wheel and its background ticker task. `on_fire` is called
    /// once per expired timer, from the ticker task, never while the
    /// wheel's own mutex is held.
    pub fn init<F>(on_fire: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let inner = Arc::new(Mutex::new(WheelInner::new()));
        let ticker_inner = inner.clone();
        let on_fire = Arc::new(on_fire);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let fired = ticker_inner.lock().advance();
                for payload in fired {
                    on_fire(payload);
                }
            }
        });
        TimerWheel { inner, next_id: AtomicU64::new(1), ticker: Some(ticker) }
    }

    /// Schedule `data` to fire after `delay`. Expiry may be rounded up by up
    /// to `ceil(delay / 256)` ticks — this batches firings and is
    /// transparent given the coarse TTL this cache uses timers for.
    pub fn add(&self, delay: Duration, data: T) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        let expires = inner.now + delay.as_secs().max(1);
        inner.insert(id, expires, data);
        TimerHandle(id)
    }

    /// Cancel a timer. Returns `true` if it was still pending.
    pub fn del(&self, handle: TimerHandle) -> bool {
        self.inner.lock().remove(handle.0).is_some()
    }

    /// Reschedule a timer to a new delay from *now*, whether or not it is
    /// still pending (re-adds it if it already fired/was removed).
    pub fn modify(&self, handle: TimerHandle, new_delay: Duration) -> bool {
        let mut inner = self.inner.lock();
        let was_pending = inner.entries.contains_key(&handle.0);
        let data = inner.remove(handle.0);
        if let Some(data) = data {
            let expires = inner.now + new_delay.as_secs().max(1);
            inner.insert(handle.0, expires, data);
        }
        was_pending
    }

    /// Reschedule only if the timer is currently pending; no-op otherwise.
    pub fn modify_pending(&self, handle: TimerHandle, new_delay: Duration) -> bool {
        self.modify(handle, new_delay)
    }

    #[cfg(test)]
    pub(crate) fn tick_once_for_test(&self) -> Vec<T> {
        self.inner.lock().advance()
    }
}

impl<T: Send + 'static> Drop for TimerWheel<T> {
    fn drop(&mut self) {
        if let Some(h) = self.ticker.take() {
            h.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_fire_after_ticks() {
        let wheel: TimerWheel<u32> = TimerWheel::init(|_| {});
        let h = wheel.add(Duration::from_secs(3), 42);
        for _ in 0..2 {
            assert!(wheel.tick_once_for_test().is_empty());
        }
        let fired = wheel.tick_once_for_test();
        assert_eq!(fired, vec![42]);
        // already fired, deleting again is a no-op
        assert!(!wheel.del(h));
    }

    #[test]
    fn del_before_fire_prevents_callback() {
        let wheel: TimerWheel<u32> = TimerWheel::init(|_| {});
        let h = wheel.add(Duration::from_secs(2), 7);
        assert!(wheel.del(h));
        for _ in 0..5 {
            assert!(wheel.tick_once_for_test().is_empty());
        }
    }

    #[test]
    fn modify_pending_reschedules() {
        let wheel: TimerWheel<u32> = TimerWheel::init(|_| {});
        let h = wheel.add(Duration::from_secs(1), 1);
        assert!(wheel.modify_pending(h, Duration::from_secs(3)));
        for _ in 0..2 {
            assert!(wheel.tick_once_for_test().is_empty());
        }
        assert_eq!(wheel.tick_once_for_test(), vec![1]);
    }

    #[test]
    fn cascade_from_higher_wheel_fires_eventually() {
        let wheel: TimerWheel<u32> = TimerWheel::init(|_| {});
        // Past the root wheel's 256s span, lands in tv2.
        wheel.add(Duration::from_secs(300), 99);
        let mut total = Vec::new();
        for _ in 0..301 {
            total.extend(wheel.tick_once_for_test());
        }
        assert_eq!(total, vec![99]);
    }
}
