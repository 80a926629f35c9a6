//! Motion resampler - decouples the bursty USB input stream from the
//! fixed-cadence BLE notification tick.
//!
//! The USB side produces pointing events at up to ~1 kHz in bursts; the
//! BLE side drains them at the negotiated connection interval (~133 Hz).
//! Events are time-stamped into a bounded ring; each tick integrates the
//! events that fall inside the window, saturates the sums to the outbound
//! field widths, and carries anything that did not fit as a residual for
//! the next tick. Nothing is lost to bursts, saturation, or a flaky sink.
//!
//! Sending is a two-phase commit. A single-phase pop-then-rollback scheme
//! races with the producer: a push between pop and rollback can be
//! clobbered or reordered. Instead the tick previews the window read-only,
//! releases the lock, performs the (potentially slow) sink call, and only
//! then commits - or, on transient failure, touches nothing so the same
//! events are re-previewed next tick.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Deque;

use crate::config;
use crate::error::SendError;
use crate::hid::mouse::{PointingReport, POINTING_REPORT_SIZE};

/// Event flag: this event changed the button state relative to the
/// previous event from the same source.
pub const FLAG_BUTTONS_CHANGED: u8 = 0x01;

/// One time-stamped pointing event, as produced by the USB input path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PointingEvent {
    /// Monotonic timestamp in microseconds.
    pub t_us: u64,
    pub dx: i16,
    pub dy: i16,
    pub wheel: i8,
    /// Button state, low 5 bits.
    pub buttons: u8,
    pub flags: u8,
}

/// Resampler lifecycle state, derived from the data on hand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResamplerState {
    /// Sink not ready; ticks return immediately.
    Idle,
    /// Sink ready, nothing buffered, no residual.
    Armed,
    /// Buffered events, residual motion, or an unsent button edge.
    Pending,
}

/// Outcome of one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickOutcome {
    /// Nothing to send; no traffic while idle.
    Quiet,
    /// Report sent and window committed.
    Sent,
    /// Sink reported not-ready mid-send. The window is committed anyway:
    /// the link is quiescing and a disconnect-triggered `clear` follows.
    NotReady,
    /// Transient sink failure; all state retained for retry on next tick.
    Failed,
}

/// A previewed send window: everything phase 2 and 3 need, captured
/// without mutating the resampler.
pub struct Frame {
    report: PointingReport,
    consume: usize,
    residual_dx: i32,
    residual_dy: i32,
    residual_wheel: i32,
    t_now_us: u64,
    overflow_mark: u32,
}

impl Frame {
    /// The encoded 6-byte outbound report.
    pub fn bytes(&self) -> [u8; POINTING_REPORT_SIZE] {
        self.report.to_bytes()
    }
}

/// The resampler state machine. Purely computational: timestamps come in
/// as arguments and locking lives in [`SharedResampler`], so this type is
/// fully exercisable on the host.
pub struct MotionResampler {
    ring: Deque<PointingEvent, { config::EVENT_RING_CAPACITY }>,
    t_last_send_us: u64,
    residual_dx: i32,
    residual_dy: i32,
    residual_wheel: i32,
    last_sent_buttons: u8,
    last_seen_buttons: u8,
    overflow_count: u32,
}

impl MotionResampler {
    pub const fn new() -> Self {
        Self {
            ring: Deque::new(),
            t_last_send_us: 0,
            residual_dx: 0,
            residual_dy: 0,
            residual_wheel: 0,
            last_sent_buttons: 0,
            last_seen_buttons: 0,
            overflow_count: 0,
        }
    }

    /// Enqueue one decoded pointing report. O(1); called from the USB
    /// input path.
    ///
    /// On overflow the *oldest* event is dropped: under a sustained burst
    /// that data was stale and would have been integrated into the same
    /// window anyway, while the newest event carries the current button
    /// state.
    pub fn push(&mut self, t_us: u64, dx: i16, dy: i16, wheel: i8, buttons: u8) {
        let buttons = buttons & config::BUTTON_MASK;
        let mut flags = 0;
        if buttons != self.last_seen_buttons {
            flags |= FLAG_BUTTONS_CHANGED;
        }
        self.last_seen_buttons = buttons;

        let event = PointingEvent {
            t_us,
            dx,
            dy,
            wheel,
            buttons,
            flags,
        };
        if let Err(event) = self.ring.push_back(event) {
            let _ = self.ring.pop_front();
            self.overflow_count += 1;
            // A slot was just freed; this cannot fail.
            let _ = self.ring.push_back(event);
        }
    }

    /// Drop all buffered state. Called on sink disconnect so a reconnect
    /// does not replay stale motion. `overflow_count` survives for
    /// diagnostics.
    pub fn clear(&mut self, t_now_us: u64) {
        while self.ring.pop_front().is_some() {}
        self.residual_dx = 0;
        self.residual_dy = 0;
        self.residual_wheel = 0;
        self.last_sent_buttons = 0;
        self.last_seen_buttons = 0;
        self.t_last_send_us = t_now_us;
    }

    /// Phase 1: integrate the current window read-only.
    ///
    /// Walks the ring oldest-first, accumulating motion and tracking the
    /// last button state, and stops at the first future-dated event (clock
    /// skew must not time-travel). Returns `None` when there is nothing
    /// worth a notification - no tick traffic while idle.
    pub fn preview(&self, t_now_us: u64) -> Option<Frame> {
        let mut sum_dx: i32 = 0;
        let mut sum_dy: i32 = 0;
        let mut sum_wheel: i32 = 0;
        let mut buttons = self.last_sent_buttons;
        let mut motion_dirty = false;
        let mut button_dirty = false;
        let mut consume = 0usize;

        for event in self.ring.iter() {
            if event.t_us > t_now_us {
                break;
            }
            sum_dx += i32::from(event.dx);
            sum_dy += i32::from(event.dy);
            sum_wheel += i32::from(event.wheel);
            if event.dx != 0 || event.dy != 0 || event.wheel != 0 {
                motion_dirty = true;
            }
            if event.flags & FLAG_BUTTONS_CHANGED != 0 {
                button_dirty = true;
            }
            buttons = event.buttons;
            consume += 1;
        }

        // Saturated remainders from earlier ticks keep draining even when
        // no new events arrived.
        sum_dx += self.residual_dx;
        sum_dy += self.residual_dy;
        sum_wheel += self.residual_wheel;
        if self.residual_dx != 0 || self.residual_dy != 0 || self.residual_wheel != 0 {
            motion_dirty = true;
        }
        if buttons != self.last_sent_buttons {
            button_dirty = true;
        }

        if !motion_dirty && !button_dirty {
            return None;
        }

        // Phase 2: saturate to the outbound field widths; what does not
        // fit becomes the next residual instead of being discarded.
        let dx = sum_dx.clamp(-config::AXIS_LIMIT, config::AXIS_LIMIT) as i16;
        let dy = sum_dy.clamp(-config::AXIS_LIMIT, config::AXIS_LIMIT) as i16;
        let wheel = sum_wheel.clamp(-config::WHEEL_LIMIT, config::WHEEL_LIMIT) as i8;

        Some(Frame {
            report: PointingReport {
                buttons,
                dx,
                dy,
                wheel,
            },
            consume,
            residual_dx: sum_dx - i32::from(dx),
            residual_dy: sum_dy - i32::from(dy),
            residual_wheel: sum_wheel - i32::from(wheel),
            t_now_us,
            overflow_mark: self.overflow_count,
        })
    }

    /// Phase 3: the sink accepted the frame; consume the window.
    ///
    /// If the ring overflowed between preview and commit, the dropped
    /// events were exactly the oldest - the ones this frame previewed -
    /// so the pop count shrinks by the overflow delta and un-previewed
    /// events are never consumed.
    pub fn commit(&mut self, frame: &Frame) {
        let lost = (self.overflow_count.wrapping_sub(frame.overflow_mark)) as usize;
        for _ in 0..frame.consume.saturating_sub(lost) {
            let _ = self.ring.pop_front();
        }
        self.residual_dx = frame.residual_dx;
        self.residual_dy = frame.residual_dy;
        self.residual_wheel = frame.residual_wheel;
        self.last_sent_buttons = frame.report.buttons;
        self.t_last_send_us = frame.t_now_us;
    }

    /// One full tick against a sink send function. Equivalent to what
    /// [`SharedResampler::try_send`] does under its lock.
    pub fn try_send(
        &mut self,
        t_now_us: u64,
        send: impl FnOnce(&[u8; POINTING_REPORT_SIZE]) -> Result<(), SendError>,
    ) -> TickOutcome {
        let Some(frame) = self.preview(t_now_us) else {
            return TickOutcome::Quiet;
        };
        match send(&frame.bytes()) {
            Ok(()) => {
                self.commit(&frame);
                TickOutcome::Sent
            }
            Err(SendError::NotReady) => {
                self.commit(&frame);
                TickOutcome::NotReady
            }
            // Leave everything untouched; the same window (plus whatever
            // arrives meanwhile) is retried on the next tick.
            Err(SendError::Transient) => TickOutcome::Failed,
        }
    }

    pub fn state(&self, sink_ready: bool) -> ResamplerState {
        if !sink_ready {
            ResamplerState::Idle
        } else if !self.ring.is_empty()
            || self.residual_dx != 0
            || self.residual_dy != 0
            || self.residual_wheel != 0
            || self.last_seen_buttons != self.last_sent_buttons
        {
            ResamplerState::Pending
        } else {
            ResamplerState::Armed
        }
    }

    /// Number of events currently buffered.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Events dropped to ring overflow since bring-up.
    pub fn overflow_count(&self) -> u32 {
        self.overflow_count
    }

    /// Residual motion carried to the next tick, as (dx, dy, wheel).
    pub fn residuals(&self) -> (i32, i32, i32) {
        (self.residual_dx, self.residual_dy, self.residual_wheel)
    }

    /// Button state reflected by the most recent successful transmission.
    pub fn last_sent_buttons(&self) -> u8 {
        self.last_sent_buttons
    }

    /// Watermark of the last committed window.
    pub fn t_last_send_us(&self) -> u64 {
        self.t_last_send_us
    }
}

impl Default for MotionResampler {
    fn default() -> Self {
        Self::new()
    }
}

/// [`MotionResampler`] behind the spinlock shared by the USB input path,
/// the tick task, and the sink-state task.
///
/// Critical sections are short and bounded; in particular the lock is
/// *not* held across the sink's send call - that is the point of the
/// preview/commit split.
pub struct SharedResampler {
    inner: Mutex<CriticalSectionRawMutex, RefCell<MotionResampler>>,
}

impl SharedResampler {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(MotionResampler::new())),
        }
    }

    /// Producer side; see [`MotionResampler::push`].
    pub fn push(&self, t_us: u64, dx: i16, dy: i16, wheel: i8, buttons: u8) {
        self.inner
            .lock(|r| r.borrow_mut().push(t_us, dx, dy, wheel, buttons));
    }

    /// See [`MotionResampler::clear`].
    pub fn clear(&self, t_now_us: u64) {
        self.inner.lock(|r| r.borrow_mut().clear(t_now_us));
    }

    /// One tick: preview under the lock, send outside it, commit (or not)
    /// under the lock again.
    pub fn try_send(
        &self,
        t_now_us: u64,
        send: impl FnOnce(&[u8; POINTING_REPORT_SIZE]) -> Result<(), SendError>,
    ) -> TickOutcome {
        let Some(frame) = self.inner.lock(|r| r.borrow().preview(t_now_us)) else {
            return TickOutcome::Quiet;
        };
        match send(&frame.bytes()) {
            Ok(()) => {
                self.inner.lock(|r| r.borrow_mut().commit(&frame));
                TickOutcome::Sent
            }
            Err(SendError::NotReady) => {
                self.inner.lock(|r| r.borrow_mut().commit(&frame));
                TickOutcome::NotReady
            }
            Err(SendError::Transient) => TickOutcome::Failed,
        }
    }

    pub fn state(&self, sink_ready: bool) -> ResamplerState {
        self.inner.lock(|r| r.borrow().state(sink_ready))
    }

    pub fn overflow_count(&self) -> u32 {
        self.inner.lock(|r| r.borrow().overflow_count())
    }

    /// Run a closure against the inner resampler (diagnostics, tests).
    pub fn with<R>(&self, f: impl FnOnce(&MotionResampler) -> R) -> R {
        self.inner.lock(|r| f(&r.borrow()))
    }
}

impl Default for SharedResampler {
    fn default() -> Self {
        Self::new()
    }
}
