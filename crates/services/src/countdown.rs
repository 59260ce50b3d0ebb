use std::fmt;

use exam_core::model::SessionState;
use tracing::info;

use crate::error::TimerError;

/// Callback invoked once when a timer runs out.
pub type ExpiryHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    Paused,
    Running,
    Expired,
}

/// Result of advancing a timer by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The timer did not move (paused, frozen by submission, not started).
    Idle,
    Ticked { remaining: u32 },
    /// The timer reached zero on this tick. Reported exactly once.
    Expired,
}

//
// ─── MAIN COUNTDOWN ────────────────────────────────────────────────────────────
//

/// Drives the exam clock stored in [`SessionState`].
///
/// `Paused → Running → Expired`. Once [`CountdownController::lock_running`] has
/// been called (audio confirmed), pausing is refused.
pub struct CountdownController {
    status: TimerStatus,
    initial_seconds: u32,
    locked: bool,
    on_expire: Option<ExpiryHook>,
}

impl Default for CountdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: TimerStatus::Paused,
            initial_seconds: 0,
            locked: false,
            on_expire: None,
        }
    }

    /// Set the clock to `initial_seconds` and start running.
    pub fn start(&mut self, state: &mut SessionState, initial_seconds: u32) {
        if !state.set_time_remaining(initial_seconds) {
            return;
        }
        self.initial_seconds = initial_seconds;
        self.status = TimerStatus::Running;
        state.set_timer_paused(false);
    }

    /// # Errors
    ///
    /// Returns `TimerError::PauseLocked` after audio confirmation and
    /// `TimerError::Expired` once the timer ran out.
    pub fn pause(&mut self, state: &mut SessionState) -> Result<(), TimerError> {
        match self.status {
            TimerStatus::Expired => Err(TimerError::Expired),
            _ if self.locked => Err(TimerError::PauseLocked),
            _ => {
                self.status = TimerStatus::Paused;
                state.set_timer_paused(true);
                Ok(())
            }
        }
    }

    /// # Errors
    ///
    /// Returns `TimerError::Expired` once the timer ran out.
    pub fn resume(&mut self, state: &mut SessionState) -> Result<(), TimerError> {
        if self.status == TimerStatus::Expired {
            return Err(TimerError::Expired);
        }
        self.status = TimerStatus::Running;
        state.set_timer_paused(false);
        Ok(())
    }

    /// Resume and refuse every later pause.
    ///
    /// # Errors
    ///
    /// Returns `TimerError::Expired` once the timer ran out.
    pub fn lock_running(&mut self, state: &mut SessionState) -> Result<(), TimerError> {
        self.resume(state)?;
        self.locked = true;
        Ok(())
    }

    pub fn on_expire(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.on_expire = Some(Box::new(hook));
    }

    /// Stop without firing expiry, e.g. when submission begins.
    pub fn halt(&mut self) {
        self.status = TimerStatus::Expired;
        self.on_expire = None;
    }

    /// Consume one second of exam time.
    pub fn tick(&mut self, state: &mut SessionState) -> TickOutcome {
        if self.status != TimerStatus::Running || state.is_submitting() {
            return TickOutcome::Idle;
        }
        match state.consume_second() {
            Some(0) => self.expire(),
            Some(remaining) => TickOutcome::Ticked { remaining },
            // Started at zero (e.g. resumed from an exhausted checkpoint).
            None if state.time_remaining_seconds() == 0 => self.expire(),
            None => TickOutcome::Idle,
        }
    }

    fn expire(&mut self) -> TickOutcome {
        self.status = TimerStatus::Expired;
        info!("exam timer expired");
        if let Some(hook) = self.on_expire.take() {
            hook();
        }
        TickOutcome::Expired
    }

    #[must_use]
    pub fn status(&self) -> TimerStatus {
        self.status
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub fn initial_seconds(&self) -> u32 {
        self.initial_seconds
    }
}

impl fmt::Debug for CountdownController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountdownController")
            .field("status", &self.status)
            .field("initial_seconds", &self.initial_seconds)
            .field("locked", &self.locked)
            .field("has_hook", &self.on_expire.is_some())
            .finish()
    }
}

//
// ─── REVIEW WINDOW ─────────────────────────────────────────────────────────────
//

/// Fixed-length window after listening audio ends.
///
/// Starts only on the audio-end event and ignores the main timer's pause state.
pub struct ReviewTimer {
    duration_seconds: u32,
    remaining: Option<u32>,
    expired: bool,
    on_expire: Option<ExpiryHook>,
}

impl ReviewTimer {
    #[must_use]
    pub fn new(duration_seconds: u32) -> Self {
        Self {
            duration_seconds,
            remaining: None,
            expired: false,
            on_expire: None,
        }
    }

    /// Open the window. Returns `false` if it was already started.
    pub fn start(&mut self) -> bool {
        self.start_with(self.duration_seconds)
    }

    /// Reopen a window that had `remaining` seconds left, capped at the full
    /// length. Zero expires on the next tick.
    pub fn start_with(&mut self, remaining: u32) -> bool {
        if self.remaining.is_some() || self.expired {
            return false;
        }
        let seconds = remaining.min(self.duration_seconds);
        self.remaining = Some(seconds);
        info!(seconds, "review window started");
        true
    }

    pub fn on_expire(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.on_expire = Some(Box::new(hook));
    }

    pub fn halt(&mut self) {
        self.expired = true;
        self.on_expire = None;
    }

    pub fn tick(&mut self, state: &SessionState) -> TickOutcome {
        if self.expired || state.is_submitting() {
            return TickOutcome::Idle;
        }
        let Some(remaining) = self.remaining.as_mut() else {
            return TickOutcome::Idle;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining > 0 {
            return TickOutcome::Ticked {
                remaining: *remaining,
            };
        }
        self.expired = true;
        info!("review window expired");
        if let Some(hook) = self.on_expire.take() {
            hook();
        }
        TickOutcome::Expired
    }

    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        if self.expired { Some(0) } else { self.remaining }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.remaining.is_some() && !self.expired
    }
}

impl fmt::Debug for ReviewTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewTimer")
            .field("duration_seconds", &self.duration_seconds)
            .field("remaining", &self.remaining)
            .field("expired", &self.expired)
            .finish_non_exhaustive()
    }
}
