//! Single-task event loop that owns a [`SessionRuntime`].
//!
//! The host talks to the loop through a cloneable [`SessionHandle`]; the loop
//! interleaves clock ticks and host commands so that the runtime is only ever
//! touched from one place.

use exam_core::model::{AnswerKind, AnswerValue, QuestionId, TestId};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::debug;

use crate::autosave::{EditOutcome, FlushReport};
use crate::countdown::TimerStatus;
use crate::error::SessionError;
use crate::runtime::SessionRuntime;
use crate::submission::SubmitOutcome;

type Reply<T> = oneshot::Sender<T>;

/// Host events delivered to the session loop.
#[derive(Debug)]
pub enum SessionCommand {
    AnswerChanged {
        question_id: QuestionId,
        value: AnswerValue,
        kind: Option<AnswerKind>,
        reply: Reply<Result<EditOutcome, SessionError>>,
    },
    Pause(Reply<Result<(), SessionError>>),
    Resume(Reply<Result<(), SessionError>>),
    ConfirmAudio(Reply<Result<bool, SessionError>>),
    AudioEnded,
    AudioMetadataLoaded,
    GoToPart {
        index: usize,
        reply: Reply<Result<(), SessionError>>,
    },
    GoToQuestion {
        number: u32,
        reply: Reply<Result<(), SessionError>>,
    },
    PageHidden,
    Submit(Reply<SubmitOutcome>),
    AdvanceSkill(Reply<Option<TestId>>),
    Shutdown,
}

/// What the host renders between events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub time_remaining: u32,
    pub current_part: usize,
    pub current_question_number: u32,
    pub timer_paused: bool,
    pub timer_expired: bool,
    pub review_remaining: Option<u32>,
    pub answered: usize,
    pub pending_answers: usize,
    pub is_submitting: bool,
}

impl SessionSnapshot {
    fn of(runtime: &SessionRuntime) -> Self {
        let state = runtime.state();
        Self {
            time_remaining: state.time_remaining_seconds(),
            current_part: state.current_part_index(),
            current_question_number: state.current_question_number(),
            timer_paused: state.is_timer_paused(),
            timer_expired: runtime.timer_status() == TimerStatus::Expired,
            review_remaining: runtime.review_remaining(),
            answered: state.answered_count(),
            pending_answers: runtime.autosave().pending_count(),
            is_submitting: state.is_submitting(),
        }
    }
}

/// How the session loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// The attempt was submitted (manually, on expiry, or on skill advance).
    Finished,
    /// The host went away first.
    Detached(FlushReport),
}

/// Cloneable host-side handle to a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| SessionError::Detached)?;
        rx.await.map_err(|_| SessionError::Detached)
    }

    fn notify(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            debug!("session loop already stopped");
        }
    }

    /// # Errors
    ///
    /// Returns `SessionError::UnknownQuestion` for ids outside the test and
    /// `SessionError::Detached` once the loop has stopped.
    pub async fn on_answer_change(
        &self,
        question_id: QuestionId,
        value: AnswerValue,
        kind: Option<AnswerKind>,
    ) -> Result<EditOutcome, SessionError> {
        self.request(|reply| SessionCommand::AnswerChanged {
            question_id,
            value,
            kind,
            reply,
        })
        .await?
    }

    /// # Errors
    ///
    /// Returns `SessionError::Detached` once the loop has stopped.
    pub async fn submit(&self) -> Result<SubmitOutcome, SessionError> {
        self.request(SessionCommand::Submit).await
    }

    /// # Errors
    ///
    /// Returns `SessionError::Detached` once the loop has stopped.
    pub async fn advance_skill(&self) -> Result<Option<TestId>, SessionError> {
        self.request(SessionCommand::AdvanceSkill).await
    }

    /// # Errors
    ///
    /// Returns `SessionError::Timer` once pausing is locked.
    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Pause).await?
    }

    /// # Errors
    ///
    /// Returns `SessionError::Timer` once the timer expired.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Resume).await?
    }

    /// # Errors
    ///
    /// Returns `SessionError::NoAudio` for tests without audio.
    pub async fn confirm_audio_start(&self) -> Result<bool, SessionError> {
        self.request(SessionCommand::ConfirmAudio).await?
    }

    /// # Errors
    ///
    /// Returns `SessionError::UnknownPart` for indices outside the test.
    pub async fn go_to_part(&self, index: usize) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::GoToPart { index, reply })
            .await?
    }

    /// # Errors
    ///
    /// Returns `SessionError::UnknownQuestionNumber` for numbers outside the test.
    pub async fn go_to_question(&self, number: u32) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::GoToQuestion { number, reply })
            .await?
    }

    pub fn audio_ended(&self) {
        self.notify(SessionCommand::AudioEnded);
    }

    pub fn audio_metadata_loaded(&self) {
        self.notify(SessionCommand::AudioMetadataLoaded);
    }

    pub fn page_hidden(&self) {
        self.notify(SessionCommand::PageHidden);
    }

    pub fn shutdown(&self) {
        self.notify(SessionCommand::Shutdown);
    }

    #[must_use]
    pub fn time_remaining(&self) -> u32 {
        self.snapshot.borrow().time_remaining
    }

    #[must_use]
    pub fn current_part(&self) -> usize {
        self.snapshot.borrow().current_part
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified after every tick and command.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }
}

/// Move `runtime` onto its own task and return the host handle.
///
/// Dropping every handle detaches the session the same way as
/// [`SessionHandle::shutdown`].
#[must_use]
pub fn spawn(runtime: SessionRuntime) -> (SessionHandle, JoinHandle<SessionExit>) {
    let (commands, inbox) = mpsc::unbounded_channel();
    let (snapshots, snapshot) = watch::channel(SessionSnapshot::of(&runtime));
    let task = tokio::spawn(run(runtime, inbox, snapshots));
    (SessionHandle { commands, snapshot }, task)
}

async fn run(
    mut runtime: SessionRuntime,
    mut inbox: mpsc::UnboundedReceiver<SessionCommand>,
    snapshots: watch::Sender<SessionSnapshot>,
) -> SessionExit {
    let period = runtime.tick_interval();
    let mut ticker = interval_at(Instant::now() + period, period);

    let exit = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if runtime.tick().await.is_some() {
                    break SessionExit::Finished;
                }
            }
            command = inbox.recv() => {
                let Some(command) = command else {
                    debug!("all session handles dropped");
                    break SessionExit::Detached(runtime.shutdown().await);
                };
                if let Some(exit) = apply(&mut runtime, command).await {
                    break exit;
                }
            }
        }
        snapshots.send_replace(SessionSnapshot::of(&runtime));
    };
    snapshots.send_replace(SessionSnapshot::of(&runtime));
    exit
}

async fn apply(runtime: &mut SessionRuntime, command: SessionCommand) -> Option<SessionExit> {
    match command {
        SessionCommand::AnswerChanged {
            question_id,
            value,
            kind,
            reply,
        } => {
            let _ = reply.send(runtime.on_answer_change(question_id, value, kind));
        }
        SessionCommand::Pause(reply) => {
            let _ = reply.send(runtime.pause());
        }
        SessionCommand::Resume(reply) => {
            let _ = reply.send(runtime.resume());
        }
        SessionCommand::ConfirmAudio(reply) => {
            let _ = reply.send(runtime.confirm_audio_start());
        }
        SessionCommand::AudioEnded => {
            runtime.audio_ended();
        }
        SessionCommand::AudioMetadataLoaded => {
            runtime.audio_metadata_loaded();
        }
        SessionCommand::GoToPart { index, reply } => {
            let _ = reply.send(runtime.go_to_part(index).await);
        }
        SessionCommand::GoToQuestion { number, reply } => {
            let _ = reply.send(runtime.go_to_question(number).await);
        }
        SessionCommand::PageHidden => runtime.page_hidden(),
        SessionCommand::Submit(reply) => {
            let _ = reply.send(runtime.submit().await);
            return Some(SessionExit::Finished);
        }
        SessionCommand::AdvanceSkill(reply) => {
            let _ = reply.send(runtime.advance_skill().await);
            return Some(SessionExit::Finished);
        }
        SessionCommand::Shutdown => {
            return Some(SessionExit::Detached(runtime.shutdown().await));
        }
    }
    None
}
