//! Frame-budget coordination between the render loop and the preloader.
//!
//! The render loop reports `on_frame_start` / `on_frame_end(draw_duration)`
//! around each frame. On frame end the coordinator computes the slack left
//! in the frame period, keeps a small reserve for input handling, and
//! publishes the rest as a grant the background preloader may spend. While
//! a frame is being drawn there is no grant at all.
//!
//! The preloader never begins I/O before the first frame has completed
//! drawing, and consumes grants strictly one frame behind the renderer.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Default frame period: 60 FPS.
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_micros(16_667);

/// Slack held back from every grant for input and event handling.
pub const DEFAULT_SLACK_RESERVE: Duration = Duration::from_millis(2);

/// One frame's slack, granted to the background task.
#[derive(Debug, Clone, Copy)]
pub struct FrameGrant {
    /// Slack available when the grant was issued.
    pub slack: Duration,

    /// Instant past which the grant is spent.
    pub deadline: Instant,

    /// Monotonic grant number; one per completed frame.
    pub seq: u64,
}

#[derive(Debug, Default)]
struct FrameState {
    current: Option<FrameGrant>,
    frames_completed: u64,
    in_frame: bool,
    shutdown: bool,
}

// =============================================================================
// Frame Coordinator
// =============================================================================

/// Receives frame signals from the render loop and grants slack to the
/// background preloader.
pub struct FrameCoordinator {
    period: Duration,
    reserve: Duration,
    state: Mutex<FrameState>,
    granted: Condvar,
}

impl FrameCoordinator {
    pub fn new(period: Duration, reserve: Duration) -> Self {
        Self {
            period,
            reserve,
            state: Mutex::new(FrameState::default()),
            granted: Condvar::new(),
        }
    }

    /// The frame period this coordinator budgets against.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Called by the render loop when it begins drawing a frame.
    ///
    /// Revokes any outstanding grant: while the renderer draws, there is
    /// no slack to spend.
    pub fn on_frame_start(&self) {
        let mut state = self.state.lock();
        state.in_frame = true;
        state.current = None;
    }

    /// Called by the render loop when a frame finished drawing.
    ///
    /// Publishes the remaining slack of this frame period as a grant and
    /// wakes the preloader.
    pub fn on_frame_end(&self, draw_duration: Duration) {
        let slack = self
            .period
            .saturating_sub(draw_duration)
            .saturating_sub(self.reserve);

        let mut state = self.state.lock();
        state.in_frame = false;
        state.frames_completed += 1;
        state.current = Some(FrameGrant {
            slack,
            deadline: Instant::now() + slack,
            seq: state.frames_completed,
        });
        drop(state);
        self.granted.notify_all();
    }

    /// Block until the first frame has completed drawing.
    ///
    /// Returns `false` when the coordinator shut down while waiting.
    pub fn wait_first_frame(&self) -> bool {
        let mut state = self.state.lock();
        while state.frames_completed == 0 && !state.shutdown {
            self.granted.wait(&mut state);
        }
        !state.shutdown
    }

    /// Block until a grant newer than `last_seq` is published.
    ///
    /// Returns `None` on shutdown.
    pub fn wait_for_grant(&self, last_seq: u64) -> Option<FrameGrant> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(grant) = state.current {
                if grant.seq > last_seq {
                    return Some(grant);
                }
            }
            self.granted.wait(&mut state);
        }
    }

    /// Slack remaining in the current grant.
    ///
    /// Zero while a frame is being drawn or when no grant is outstanding.
    pub fn remaining(&self) -> Duration {
        let state = self.state.lock();
        if state.in_frame {
            return Duration::ZERO;
        }
        match state.current {
            Some(grant) => grant.deadline.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Permanently wake all waiters; no further grants are issued.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        state.current = None;
        drop(state);
        self.granted.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

impl Default for FrameCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_PERIOD, DEFAULT_SLACK_RESERVE)
    }
}

// =============================================================================
// Tests
// =============================================================================
