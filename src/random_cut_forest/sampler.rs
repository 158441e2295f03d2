use crate::random_cut_forest::alias::FType;

use ndarray::Array1;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A retained point together with its sampling key.
///
/// `log_key` is `ln(-ln(u)) - time_decay * sequence_index`: the log of the transformed
/// weight `-ln(u) / exp(-time_decay * age)` with the common "now" factored out.
/// Smaller keys are kept longer.
#[derive(Debug, Clone)]
pub struct WeightedSample<F> {
    pub point: Array1<F>,
    pub sequence_index: u64,
    pub log_key: f64,
}

impl<F> PartialEq for WeightedSample<F> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<F> Eq for WeightedSample<F> {}

impl<F> PartialOrd for WeightedSample<F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<F> Ord for WeightedSample<F> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Sequence indexes are unique, so this is a total order over a reservoir.
        self.log_key
            .total_cmp(&other.log_key)
            .then(self.sequence_index.cmp(&other.sequence_index))
    }
}

/// Result of offering a point to a [`Reservoir`].
#[derive(Debug, Clone)]
pub enum AdmitOutcome<F> {
    /// Stored, the reservoir was not full.
    Accepted,
    /// Stored in place of the returned sample.
    Replaced(WeightedSample<F>),
    Rejected,
}

impl<F> AdmitOutcome<F> {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, AdmitOutcome::Rejected)
    }
}

/// Time-decayed weighted reservoir over the points of one tree.
///
/// Keys follow Efraimidis-Spirakis weighted sampling. With `time_decay = 0` every key is
/// an i.i.d. draw and the reservoir is a uniform sample of the stream.
#[derive(Clone)]
pub struct Reservoir<F> {
    capacity: usize,
    time_decay: f64,
    rng: ChaCha8Rng,
    /// Max-heap: the top is the next eviction candidate.
    heap: BinaryHeap<WeightedSample<F>>,
}

impl<F: FType> Reservoir<F> {
    pub fn new(capacity: usize, time_decay: f64, seed: u64) -> Self {
        Reservoir {
            capacity,
            time_decay,
            rng: ChaCha8Rng::seed_from_u64(seed),
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    fn draw_log_key(&mut self, sequence_index: u64) -> f64 {
        let u: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        (-u.ln()).ln() - self.time_decay * sequence_index as f64
    }

    /// Offer `point` observed at logical time `sequence_index`.
    ///
    /// Sequence indexes must increase across calls.
    pub fn admit(&mut self, point: &Array1<F>, sequence_index: u64) -> AdmitOutcome<F> {
        let log_key = self.draw_log_key(sequence_index);

        if self.heap.len() < self.capacity {
            self.heap.push(WeightedSample {
                point: point.clone(),
                sequence_index,
                log_key,
            });
            return AdmitOutcome::Accepted;
        }

        match self.heap.peek() {
            Some(top) if log_key < top.log_key => {}
            _ => return AdmitOutcome::Rejected,
        }

        let candidate = WeightedSample {
            point: point.clone(),
            sequence_index,
            log_key,
        };
        match self.heap.pop() {
            Some(evicted) => {
                trace!(
                    evicted = evicted.sequence_index,
                    admitted = sequence_index,
                    "reservoir eviction"
                );
                self.heap.push(candidate);
                AdmitOutcome::Replaced(evicted)
            }
            None => AdmitOutcome::Rejected,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained samples, in no particular order.
    pub fn samples(&self) -> impl Iterator<Item = &WeightedSample<F>> {
        self.heap.iter()
    }
}
