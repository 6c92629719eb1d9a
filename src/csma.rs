/*! p-persistence CSMA transmit scheduler.

Frames queue up FIFO; at every slot boundary the scheduler draws a
byte and transmits only when the draw is at or under the persistence
value and the channel is clear (or full duplex says go regardless).
Keying, preamble, the frames themselves and the tail then run as one
transmission, with PTT dropped in a cooldown slot afterwards.

The radio side effects go through the [`Channel`] trait so the state
machine is testable against a mock.
*/
use std::collections::VecDeque;

use log::{debug, trace};
use rand::prelude::*;

use crate::config::Config;
use crate::{Error, Result};

/// Bound on the outbound frame queue.
pub const TX_QUEUE_LEN: usize = 8;

/// Scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxPhase {
    /// Nothing to send.
    #[default]
    Idle,
    /// Frames queued; waiting to win a slot draw.
    WaitSlot,
    /// Slot won: keying the transmitter and sending the preamble.
    KeyingUp,
    /// Draining the frame queue.
    Sending,
    /// Sending the closing flag run.
    TailTx,
    /// PTT released; one quiet slot before going idle.
    Cooldown,
}

/// Radio-side effects the scheduler drives. Implemented by the engine
/// over the modulator and `SignalIO`; mocked in tests.
pub trait Channel {
    /// Key or unkey the transmitter.
    fn set_ptt(&mut self, on: bool);
    /// Send a flag run covering `ms` milliseconds.
    fn send_flags(&mut self, ms: u16);
    /// Send one queued frame.
    fn send_frame(&mut self, frame: &[u8]);
}

/// Counters kept by the scheduler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Frames transmitted.
    pub sent: u64,
    /// Frames refused because the queue was full.
    pub dropped: u64,
}

/// The transmit scheduler.
#[derive(Debug)]
pub struct TxScheduler {
    phase: TxPhase,
    queue: VecDeque<Vec<u8>>,
    slot_deadline: u64,
    rng: StdRng,
    stats: SchedulerStats,
}

impl Default for TxScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TxScheduler {
    /// Create an idle scheduler.
    pub fn new() -> Self {
        Self {
            phase: TxPhase::Idle,
            queue: VecDeque::with_capacity(TX_QUEUE_LEN),
            slot_deadline: 0,
            rng: StdRng::from_os_rng(),
            stats: SchedulerStats::default(),
        }
    }

    /// Create with a fixed RNG seed, for tests wanting deterministic
    /// slot draws.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new()
        }
    }

    /// Current phase.
    pub fn phase(&self) -> TxPhase {
        self.phase
    }

    /// Counters.
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Frames waiting (not counting any transmission in progress).
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queue a frame for transmission. Fails with [`Error::TxBusy`]
    /// when the queue is full; the frame is not queued.
    pub fn enqueue(&mut self, frame: Vec<u8>) -> Result<()> {
        if self.queue.len() >= TX_QUEUE_LEN {
            self.stats.dropped += 1;
            return Err(Error::TxBusy);
        }
        trace!("TxScheduler: queued {} byte frame", frame.len());
        self.queue.push_back(frame);
        Ok(())
    }

    /// Advance the state machine. `dcd` is the carrier detect at this
    /// instant; side effects run through `chan`. Call this from the
    /// main poll loop.
    pub fn poll(&mut self, now_ms: u64, dcd: bool, config: &Config, chan: &mut dyn Channel) {
        match self.phase {
            TxPhase::Idle => {
                if !self.queue.is_empty() {
                    self.phase = TxPhase::WaitSlot;
                    self.slot_deadline = now_ms;
                }
            }
            TxPhase::WaitSlot => {
                if now_ms < self.slot_deadline {
                    return;
                }
                let r: u8 = self.rng.random();
                if r <= config.persistence && (!dcd || config.full_duplex) {
                    debug!("TxScheduler: slot won (drew {r})");
                    self.phase = TxPhase::KeyingUp;
                } else {
                    trace!("TxScheduler: holding (drew {r}, dcd {dcd})");
                    self.slot_deadline = now_ms + config.slot_time_ms as u64;
                }
            }
            TxPhase::KeyingUp => {
                chan.set_ptt(true);
                chan.send_flags(config.tx_delay_ms);
                self.phase = TxPhase::Sending;
            }
            TxPhase::Sending => {
                // No cancellation once here: the queue drains in one
                // transmission, in enqueue order.
                while let Some(frame) = self.queue.pop_front() {
                    chan.send_frame(&frame);
                    self.stats.sent += 1;
                }
                self.phase = TxPhase::TailTx;
            }
            TxPhase::TailTx => {
                chan.send_flags(config.tx_tail_ms);
                chan.set_ptt(false);
                self.slot_deadline = now_ms + config.slot_time_ms as u64;
                self.phase = TxPhase::Cooldown;
            }
            TxPhase::Cooldown => {
                if now_ms >= self.slot_deadline {
                    self.phase = TxPhase::Idle;
                }
            }
        }
    }

    /// True from key-up to PTT release.
    pub fn transmitting(&self) -> bool {
        matches!(
            self.phase,
            TxPhase::KeyingUp | TxPhase::Sending | TxPhase::TailTx
        )
    }
}
