/*! Bounded single-producer single-consumer sample ring.

The hand-off between the ADC interrupt (producer) and the polling
demodulator (consumer). Head and tail are atomics with
acquire/release ordering and each slot is an atomic cell, so neither
side ever takes a lock and the count can't be torn.

One slot is sacrificed to tell full from empty.
*/
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

struct Inner {
    buf: Box<[AtomicU16]>,
    // Next write position; owned by the producer.
    head: AtomicUsize,
    // Next read position; owned by the consumer.
    tail: AtomicUsize,
}

impl Inner {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + self.buf.len() - tail) % self.buf.len()
    }
}

/// Producer half; the ADC side.
pub struct Producer(Arc<Inner>);

/// Consumer half; the demodulator side.
pub struct Consumer(Arc<Inner>);

/// Create a ring holding up to `capacity` samples.
pub fn channel(capacity: usize) -> (Producer, Consumer) {
    let buf: Vec<AtomicU16> = (0..capacity + 1).map(|_| AtomicU16::new(0)).collect();
    let inner = Arc::new(Inner {
        buf: buf.into_boxed_slice(),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    (Producer(Arc::clone(&inner)), Consumer(inner))
}

impl Producer {
    /// Push one sample. Returns false (dropping the sample) when the
    /// ring is full; the producer is an interrupt and cannot wait.
    pub fn push(&self, sample: i16) -> bool {
        let inner = &self.0;
        let head = inner.head.load(Ordering::Relaxed);
        let next = (head + 1) % inner.buf.len();
        if next == inner.tail.load(Ordering::Acquire) {
            return false;
        }
        inner.buf[head].store(sample as u16, Ordering::Relaxed);
        inner.head.store(next, Ordering::Release);
        true
    }

    /// Push a block; returns how many samples fit.
    pub fn push_slice(&self, samples: &[i16]) -> usize {
        samples.iter().take_while(|&&s| self.push(s)).count()
    }

    /// Samples currently queued.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Consumer {
    /// Pop one sample.
    pub fn pop(&self) -> Option<i16> {
        let inner = &self.0;
        let tail = inner.tail.load(Ordering::Relaxed);
        if tail == inner.head.load(Ordering::Acquire) {
            return None;
        }
        let sample = inner.buf[tail].load(Ordering::Relaxed) as i16;
        inner.tail.store((tail + 1) % inner.buf.len(), Ordering::Release);
        Some(sample)
    }

    /// Samples currently queued.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
