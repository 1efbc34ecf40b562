//! The tick-driven event loop.
//!
//! One dedicated task advances the global frame counter at a fixed
//! cadence (20 ms by default) and dispatches every event due on each
//! tick. Events arrive through an MPSC channel from any thread and are
//! ordered by (scheduled frame, insertion order); only the loop task
//! pops. After dispatch, both transports flush the tick's output in one
//! go, then the frame counter increments.
//!
//! The loop never skips frames: when it falls behind it bursts through
//! the backlog, and only re-anchors its phase once drift exceeds five
//! ticks.

pub mod event;

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::FrameClock;
use crate::core::Core;
use crate::model::FrameNum;
use crate::protocol_constants::DRIFT_RESET_TICKS;

pub use event::{DmxEvent, Event};

struct Scheduled {
    frame: FrameNum,
    event: Event,
}

/// Heap entry ordered by (frame, insertion sequence).
struct QueueEntry {
    frame: FrameNum,
    seq: u64,
    event: Event,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.frame == other.frame && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.frame, self.seq).cmp(&(other.frame, other.seq))
    }
}

/// Cloneable handle for scheduling events and reading the clock.
#[derive(Clone)]
pub struct EventLoopHandle {
    tx: mpsc::UnboundedSender<Scheduled>,
    clock: FrameClock,
}

impl EventLoopHandle {
    /// Schedules an event to become due at the start of the given
    /// frame. Frames at or before the current one are coerced to the
    /// next frame; nothing is ever dispatched late-by-design or
    /// dropped.
    pub fn schedule(&self, event: Event, frame: FrameNum) {
        let frame = frame.max(self.clock.next_frame());
        if self
            .tx
            .send(Scheduled { frame, event })
            .is_err()
        {
            log::warn!("event loop is gone; dropping scheduled event");
        }
    }

    pub fn current_frame(&self) -> FrameNum {
        self.clock.current_frame()
    }

    pub fn next_frame(&self) -> FrameNum {
        self.clock.next_frame()
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }
}

/// The loop itself. Constructed once at bootstrap, consumed by
/// [`EventLoop::run`].
pub struct EventLoop {
    rx: mpsc::UnboundedReceiver<Scheduled>,
    clock: FrameClock,
    shutdown: CancellationToken,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
}

impl EventLoop {
    pub fn new(clock: FrameClock, shutdown: CancellationToken) -> (Self, EventLoopHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = EventLoopHandle {
            tx,
            clock: clock.clone(),
        };
        (
            Self {
                rx,
                clock,
                shutdown,
                queue: BinaryHeap::new(),
                next_seq: 0,
            },
            handle,
        )
    }

    /// Runs until the shutdown token fires. One iteration per tick:
    /// sleep to the tick boundary, ingest newly scheduled events,
    /// dispatch everything due, flush the transports, advance the
    /// frame counter.
    pub async fn run(mut self, mut core: Core) {
        let period = self.clock.period();
        let mut epoch = Instant::now();
        log::info!(
            "event loop running, tick period {} ms",
            period.as_millis()
        );

        loop {
            let frame = self.clock.current_frame();
            let deadline = epoch + self.clock.offset_of(frame);

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    log::info!("event loop shutting down at frame {}", frame);
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }

            // Behind schedule? Dispatch immediately rather than skip;
            // past five ticks of drift, re-anchor the phase instead of
            // bursting through a hopeless backlog.
            let now = Instant::now();
            let drift = now.saturating_duration_since(deadline);
            if drift >= period * DRIFT_RESET_TICKS {
                log::warn!(
                    "event loop {} ms behind at frame {}; resetting phase",
                    drift.as_millis(),
                    frame
                );
                epoch = now - self.clock.offset_of(frame);
            } else if drift >= period {
                log::debug!(
                    "event loop drifting: {} ms behind at frame {}",
                    drift.as_millis(),
                    frame
                );
            }

            self.ingest();
            self.dispatch_due(frame, &mut core);
            core.flush_tick();
            self.clock.advance();
        }
    }

    /// Moves everything from the channel into the ordered queue.
    fn ingest(&mut self) {
        while let Ok(scheduled) = self.rx.try_recv() {
            self.queue.push(Reverse(QueueEntry {
                frame: scheduled.frame,
                seq: self.next_seq,
                event: scheduled.event,
            }));
            self.next_seq += 1;
        }
    }

    /// Dispatches every event due at or before `frame`.
    fn dispatch_due(&mut self, frame: FrameNum, core: &mut Core) {
        let slow_threshold = self.clock.period() / 2;
        loop {
            let due = matches!(self.queue.peek(), Some(Reverse(entry)) if entry.frame <= frame);
            if !due {
                break;
            }
            let Some(Reverse(entry)) = self.queue.pop() else {
                break;
            };

            let kind = entry.event.kind();
            let started = Instant::now();
            if let Err(e) = entry.event.dispatch(core) {
                // A failing handler never stops the loop.
                log::error!("{} event failed at frame {}: {}", kind, frame, e);
            }
            let took = started.elapsed();
            if took > slow_threshold {
                log::warn!(
                    "slow {} handler at frame {}: {} ms",
                    kind,
                    frame,
                    took.as_millis()
                );
            }
        }
    }
}
