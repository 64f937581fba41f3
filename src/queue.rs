// Prefetch queue of generated pairs.
//
// `fill()` only appends and `take()` only pops the head, so a background
// refill racing a take can at worst leave the buffer briefly short.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::PairingError;
use crate::metrics;
use crate::model::{Pair, PairKey, Player};
use crate::pairing::generate_pairs;

pub const DEFAULT_QUEUE_TARGET: usize = 5;

/// Status of the pair queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub target: usize,
}

/// Thread-safe FIFO buffer of pairs waiting to be shown.
#[derive(Debug, Clone)]
pub struct PairQueue {
    inner: Arc<Mutex<VecDeque<Pair>>>,
    target: usize,
}

impl PairQueue {
    pub fn new(target: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(target))),
            target,
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Pair>> {
        // A poisoned buffer still holds whole pairs.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Top the buffer up to the target size.
    ///
    /// `avoid` holds keys that must not be queued (recently resolved pairs);
    /// keys already in the buffer are avoided as well. Returns how many pairs
    /// were added, which may be fewer than the deficit.
    pub fn fill(
        &self,
        players: &[Player],
        avoid: &HashSet<PairKey>,
    ) -> Result<usize, PairingError> {
        let mut queue = self.lock();
        let deficit = self.target.saturating_sub(queue.len());
        if deficit == 0 {
            return Ok(0);
        }

        let mut avoid = avoid.clone();
        avoid.extend(queue.iter().map(Pair::key));

        let pairs = generate_pairs(players, &avoid, deficit, &mut rand::thread_rng())?;
        let added = pairs.len();
        queue.extend(pairs);
        metrics::PAIR_QUEUE_DEPTH.set(queue.len() as i64);
        Ok(added)
    }

    /// Remove and return the next pair from the front of the queue.
    pub fn take(&self) -> Option<Pair> {
        let mut queue = self.lock();
        let result = queue.pop_front();
        metrics::PAIR_QUEUE_DEPTH.set(queue.len() as i64);
        result
    }

    /// Drop every queued pair, e.g. after player ratings were reloaded.
    pub fn clear(&self) {
        let mut queue = self.lock();
        queue.clear();
        metrics::PAIR_QUEUE_DEPTH.set(0);
    }

    /// Peek at the next entry without removing it.
    pub fn peek(&self) -> Option<Pair> {
        self.lock().front().cloned()
    }

    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            depth: self.depth(),
            target: self.target,
        }
    }
}

impl Default for PairQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_TARGET)
    }
}

/// Refill the queue on a background task from a snapshot of the population.
/// Fire-and-forget: callers may drop the handle.
pub fn spawn_refill(
    queue: PairQueue,
    players: Vec<Player>,
    avoid: HashSet<PairKey>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match queue.fill(&players, &avoid) {
            Ok(added) => tracing::debug!("Pair queue refilled with {added} pairs"),
            Err(e) => tracing::warn!("Pair queue refill failed: {e}"),
        }
    })
}
