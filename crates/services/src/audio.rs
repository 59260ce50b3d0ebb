use std::fmt;

use tracing::{debug, info};

use crate::error::AudioError;

/// Host-side audio element the controller drives.
pub trait PlaybackHandle: Send {
    /// Track length in seconds, once metadata has loaded.
    fn duration(&self) -> Option<f64>;
    fn current_time(&self) -> f64;
    fn seek(&mut self, seconds: f64);
    fn play(&mut self);
    fn pause(&mut self);
}

/// Controls the host may render for the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioControl {
    Confirm,
    Play,
    Pause,
    Seek,
    Skip,
}

const PRACTICE_CONTROLS: &[AudioControl] = &[
    AudioControl::Play,
    AudioControl::Pause,
    AudioControl::Seek,
    AudioControl::Skip,
];
const EXAM_CONTROLS: &[AudioControl] = &[AudioControl::Confirm];

/// Keeps listening audio aligned with the exam clock.
///
/// Outside practice mode the track plays once: the only control is the
/// confirmation that starts audio and timer together.
pub struct AudioSyncController {
    playback: Box<dyn PlaybackHandle>,
    practice_mode: bool,
    confirmed: bool,
    ended: bool,
    pending_resume: Option<u32>,
}

impl AudioSyncController {
    #[must_use]
    pub fn new(playback: Box<dyn PlaybackHandle>, practice_mode: bool) -> Self {
        Self {
            playback,
            practice_mode,
            confirmed: false,
            ended: false,
            pending_resume: None,
        }
    }

    /// Start playback after the test-taker's acknowledgment.
    ///
    /// Returns `true` the first time only; the caller resumes the exam timer then.
    pub fn confirm_start(&mut self) -> bool {
        if self.confirmed {
            return false;
        }
        self.confirmed = true;
        self.playback.play();
        info!(position = self.playback.current_time(), "audio playback confirmed");
        true
    }

    /// Seek so that `remaining_audio_seconds` are left to play.
    ///
    /// Returns the seek target, or `None` when the duration is not known yet;
    /// the seek is then applied by [`AudioSyncController::on_metadata_loaded`].
    pub fn resume_from_offset(&mut self, remaining_audio_seconds: u32) -> Option<f64> {
        let Some(duration) = self.playback.duration() else {
            debug!(remaining_audio_seconds, "deferring audio resume until metadata loads");
            self.pending_resume = Some(remaining_audio_seconds);
            return None;
        };
        let target = resume_position(duration, remaining_audio_seconds);
        self.playback.seek(target);
        self.pending_resume = None;
        Some(target)
    }

    /// Apply a deferred resume once the duration is known.
    pub fn on_metadata_loaded(&mut self) -> Option<f64> {
        let remaining = self.pending_resume?;
        self.resume_from_offset(remaining)
    }

    /// Natural end of the track. Returns `true` the first time only, which is
    /// when the review window should open.
    pub fn on_ended(&mut self) -> bool {
        if self.ended {
            return false;
        }
        self.ended = true;
        info!("audio playback ended");
        true
    }

    /// Whole seconds of audio still to play, for checkpoints.
    #[must_use]
    pub fn remaining_audio_seconds(&self) -> Option<u32> {
        if let Some(pending) = self.pending_resume {
            return Some(pending);
        }
        let duration = self.playback.duration()?;
        let left = (duration - self.playback.current_time()).max(0.0).round();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(left.min(f64::from(u32::MAX)) as u32)
    }

    #[must_use]
    pub fn controls(&self) -> &'static [AudioControl] {
        if self.practice_mode {
            PRACTICE_CONTROLS
        } else if self.confirmed {
            &[]
        } else {
            EXAM_CONTROLS
        }
    }

    /// # Errors
    ///
    /// Returns `AudioError::ControlsLocked` outside practice mode.
    pub fn seek(&mut self, seconds: f64) -> Result<(), AudioError> {
        if !self.practice_mode {
            return Err(AudioError::ControlsLocked);
        }
        let upper = self.playback.duration().unwrap_or(f64::MAX);
        self.playback.seek(seconds.clamp(0.0, upper));
        Ok(())
    }

    /// Jump forward or back by `delta` seconds.
    ///
    /// # Errors
    ///
    /// Returns `AudioError::ControlsLocked` outside practice mode and
    /// `AudioError::DurationUnknown` before metadata has loaded.
    pub fn skip(&mut self, delta: f64) -> Result<(), AudioError> {
        if !self.practice_mode {
            return Err(AudioError::ControlsLocked);
        }
        let duration = self.playback.duration().ok_or(AudioError::DurationUnknown)?;
        let target = (self.playback.current_time() + delta).clamp(0.0, duration);
        self.playback.seek(target);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `AudioError::ControlsLocked` outside practice mode.
    pub fn toggle_pause(&mut self, paused: bool) -> Result<(), AudioError> {
        if !self.practice_mode {
            return Err(AudioError::ControlsLocked);
        }
        if paused {
            self.playback.pause();
        } else {
            self.playback.play();
        }
        Ok(())
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    #[must_use]
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    #[must_use]
    pub fn playback(&self) -> &dyn PlaybackHandle {
        self.playback.as_ref()
    }
}

impl fmt::Debug for AudioSyncController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSyncController")
            .field("practice_mode", &self.practice_mode)
            .field("confirmed", &self.confirmed)
            .field("ended", &self.ended)
            .field("pending_resume", &self.pending_resume)
            .finish_non_exhaustive()
    }
}

/// Position to seek to so that `remaining` seconds of a `duration`-long track
/// are left: `max(0, duration - remaining)`.
#[must_use]
pub fn resume_position(duration: f64, remaining: u32) -> f64 {
    (duration - f64::from(remaining)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Transport {
        duration: Option<f64>,
        position: f64,
        playing: bool,
        seeks: Vec<f64>,
    }

    #[derive(Clone, Default)]
    struct FakePlayer(Arc<Mutex<Transport>>);

    impl PlaybackHandle for FakePlayer {
        fn duration(&self) -> Option<f64> {
            self.0.lock().unwrap().duration
        }
        fn current_time(&self) -> f64 {
            self.0.lock().unwrap().position
        }
        fn seek(&mut self, seconds: f64) {
            let mut transport = self.0.lock().unwrap();
            transport.position = seconds;
            transport.seeks.push(seconds);
        }
        fn play(&mut self) {
            self.0.lock().unwrap().playing = true;
        }
        fn pause(&mut self) {
            self.0.lock().unwrap().playing = false;
        }
    }

    fn player(duration: Option<f64>) -> FakePlayer {
        let p = FakePlayer::default();
        p.0.lock().unwrap().duration = duration;
        p
    }

    #[test]
    fn resume_seeks_to_duration_minus_remaining() {
        let p = player(Some(600.0));
        let mut audio = AudioSyncController::new(Box::new(p.clone()), false);
        assert_eq!(audio.resume_from_offset(240), Some(360.0));
        assert_eq!(p.0.lock().unwrap().position, 360.0);
        assert_eq!(audio.remaining_audio_seconds(), Some(240));
    }

    #[test]
    fn resume_clamps_at_track_start() {
        assert_eq!(resume_position(100.0, 250), 0.0);
        assert_eq!(resume_position(100.0, 0), 100.0);
    }

    #[test]
    fn resume_waits_for_metadata() {
        let p = player(None);
        let mut audio = AudioSyncController::new(Box::new(p.clone()), false);
        assert_eq!(audio.resume_from_offset(30), None);
        assert_eq!(audio.remaining_audio_seconds(), Some(30));
        assert!(p.0.lock().unwrap().seeks.is_empty());

        p.0.lock().unwrap().duration = Some(90.0);
        assert_eq!(audio.on_metadata_loaded(), Some(60.0));
        assert_eq!(audio.on_metadata_loaded(), None);
    }

    #[test]
    fn confirmation_plays_once() {
        let p = player(Some(60.0));
        let mut audio = AudioSyncController::new(Box::new(p.clone()), false);
        assert_eq!(audio.controls(), &[AudioControl::Confirm]);
        assert!(audio.confirm_start());
        assert!(!audio.confirm_start());
        assert!(p.0.lock().unwrap().playing);
        assert!(audio.controls().is_empty());
    }

    #[test]
    fn exam_mode_locks_seek_and_skip() {
        let mut audio = AudioSyncController::new(Box::new(player(Some(60.0))), false);
        assert_eq!(audio.seek(10.0), Err(AudioError::ControlsLocked));
        assert_eq!(audio.skip(5.0), Err(AudioError::ControlsLocked));
        assert_eq!(audio.toggle_pause(true), Err(AudioError::ControlsLocked));
    }

    #[test]
    fn practice_mode_exposes_controls() {
        let p = player(Some(60.0));
        let mut audio = AudioSyncController::new(Box::new(p.clone()), true);
        assert!(audio.controls().contains(&AudioControl::Seek));
        audio.seek(50.0).unwrap();
        audio.skip(30.0).unwrap();
        assert_eq!(p.0.lock().unwrap().position, 60.0);
        audio.skip(-100.0).unwrap();
        assert_eq!(p.0.lock().unwrap().position, 0.0);
    }

    #[test]
    fn end_event_reported_once() {
        let mut audio = AudioSyncController::new(Box::new(player(Some(60.0))), false);
        assert!(audio.on_ended());
        assert!(!audio.on_ended());
        assert!(audio.has_ended());
    }
}
