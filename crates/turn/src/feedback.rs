use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::{ServiceError, ServiceResult};
use crate::message::{Feedback, Message, Vote};
use crate::notify::ChangeNotifier;
use crate::services::{DetailFeedbackSink, FeedbackSink};

/// Coarse phase of the button -> form -> acknowledgement flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackPhase {
    Idle,
    Submitting,
    FormOpen,
    Acknowledged,
}

/// Why a vote press was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteRejection {
    /// Another write for this message is still outstanding.
    Submitting,
    /// The message has no id or creation timestamp to key the write on.
    NoIdentity,
}

/// Detail form actions are only valid while the form is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormNotOpen;

/// What an accepted vote press will write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotePlan {
    pub message_timestamp: String,
    pub feedback: Feedback,
    /// True when this press opened the detail form.
    pub opened_form: bool,
}

/// Local feedback state of one rendered turn.
///
/// At most one of the form and the acknowledgement is visible, and `submitting`
/// covers exactly one outstanding write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackSession {
    submitting: bool,
    form_visible: bool,
    acknowledgement_visible: bool,
    acknowledgement_generation: u64,
    last_failure: Option<ServiceError>,
}

impl FeedbackSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn is_form_visible(&self) -> bool {
        self.form_visible
    }

    pub fn is_acknowledgement_visible(&self) -> bool {
        self.acknowledgement_visible
    }

    /// The most recent failed write, kept until the next press so a host can offer a retry.
    pub fn last_failure(&self) -> Option<&ServiceError> {
        self.last_failure.as_ref()
    }

    pub fn phase(&self) -> FeedbackPhase {
        if self.submitting {
            FeedbackPhase::Submitting
        } else if self.form_visible {
            FeedbackPhase::FormOpen
        } else if self.acknowledgement_visible {
            FeedbackPhase::Acknowledged
        } else {
            FeedbackPhase::Idle
        }
    }

    pub fn is_disabled(&self, message: &Message) -> bool {
        self.submitting || message.feedback_key().is_none()
    }

    /// Resolves a button press into the write to perform and arms the submission guard.
    ///
    /// Pressing the already recorded value clears it with `Neutral`. A fresh thumbs-down opens
    /// the detail form; a thumbs-up or a cleared thumbs-down closes it.
    pub fn begin_vote(&mut self, vote: Vote, message: &Message) -> Result<VotePlan, VoteRejection> {
        if self.submitting {
            return Err(VoteRejection::Submitting);
        }
        let Some(message_timestamp) = message.feedback_key() else {
            return Err(VoteRejection::NoIdentity);
        };

        let requested = vote.as_feedback();
        let previous = message.feedback;
        let mut opened_form = false;

        let feedback = if previous == Some(requested) {
            if vote == Vote::Bad {
                self.form_visible = false;
            }
            Feedback::Neutral
        } else {
            match vote {
                Vote::Good => self.form_visible = false,
                Vote::Bad if previous != Some(Feedback::Bad) => {
                    self.open_form();
                    opened_form = true;
                }
                Vote::Bad => {}
            }
            requested
        };

        self.submitting = true;
        self.last_failure = None;
        tracing::debug!(message_timestamp, %feedback, opened_form, "feedback vote accepted");

        Ok(VotePlan {
            message_timestamp: message_timestamp.to_string(),
            feedback,
            opened_form,
        })
    }

    /// Releases the guard. A failed write leaves the flow idle so the press can be retried.
    pub fn finish_vote(&mut self, plan: &VotePlan, result: &ServiceResult<()>) {
        self.submitting = false;
        if let Err(error) = result {
            if plan.opened_form {
                self.form_visible = false;
            }
            self.last_failure = Some(error.clone());
        }
    }

    /// Swaps the form for the acknowledgement and returns the generation its timer must match.
    pub fn submit_detail_form(&mut self) -> Result<u64, FormNotOpen> {
        if !self.form_visible {
            return Err(FormNotOpen);
        }

        self.form_visible = false;
        self.acknowledgement_visible = true;
        self.acknowledgement_generation += 1;
        Ok(self.acknowledgement_generation)
    }

    pub fn cancel_detail_form(&mut self) -> Result<(), FormNotOpen> {
        if !self.form_visible {
            return Err(FormNotOpen);
        }

        self.form_visible = false;
        Ok(())
    }

    /// Hides the acknowledgement if `generation` is still the one on screen.
    pub fn dismiss_acknowledgement(&mut self, generation: u64) -> bool {
        if !self.acknowledgement_visible || generation != self.acknowledgement_generation {
            return false;
        }

        self.acknowledgement_visible = false;
        true
    }

    /// Clears every flag except the guard of a write that is still outstanding.
    pub fn reset(&mut self) {
        self.form_visible = false;
        self.acknowledgement_visible = false;
        self.acknowledgement_generation += 1;
        self.last_failure = None;
    }

    fn open_form(&mut self) {
        self.form_visible = true;
        if self.acknowledgement_visible {
            self.acknowledgement_visible = false;
            self.acknowledgement_generation += 1;
        }
    }
}

struct Shared {
    session: Mutex<FeedbackSession>,
    notifier: ChangeNotifier,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, FeedbackSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the submission guard when the write task ends, however it ends.
struct SubmissionGuard {
    shared: Arc<Shared>,
    plan: VotePlan,
    outcome: Option<ServiceResult<()>>,
}

impl SubmissionGuard {
    fn complete(&mut self, result: ServiceResult<()>) {
        self.outcome = Some(result);
    }
}

impl Drop for SubmissionGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or_else(|| {
            Err(ServiceError::FeedbackWrite {
                stage: "submission-abandoned",
                timestamp: self.plan.message_timestamp.clone(),
                vote: self.plan.feedback.to_string(),
                message: "feedback write ended without a result".to_string(),
            })
        });
        self.shared.session().finish_vote(&self.plan, &outcome);
        self.shared.notifier.notify();
    }
}

/// Outstanding feedback write. Awaiting it is optional; dropping it detaches the write.
pub struct Submission {
    message_timestamp: String,
    feedback: Feedback,
    task: JoinHandle<ServiceResult<()>>,
}

impl Submission {
    /// The value being written, after toggling against the recorded one.
    pub fn feedback(&self) -> Feedback {
        self.feedback
    }

    pub async fn wait(self) -> ServiceResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(join_error) => Err(ServiceError::FeedbackWrite {
                stage: "join-feedback-write",
                timestamp: self.message_timestamp,
                vote: self.feedback.to_string(),
                message: join_error.to_string(),
            }),
        }
    }
}

/// Drives a [`FeedbackSession`] against the feedback sinks and owns the dismiss timer.
///
/// Must be used inside a tokio runtime. Dropping the controller cancels a pending dismissal.
pub struct FeedbackController {
    shared: Arc<Shared>,
    sink: Arc<dyn FeedbackSink>,
    detail_sink: Arc<dyn DetailFeedbackSink>,
    acknowledgement_delay: Duration,
    dismiss_task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedbackController {
    pub fn new(
        sink: Arc<dyn FeedbackSink>,
        detail_sink: Arc<dyn DetailFeedbackSink>,
        acknowledgement_delay: Duration,
        notifier: ChangeNotifier,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(FeedbackSession::new()),
                notifier,
            }),
            sink,
            detail_sink,
            acknowledgement_delay,
            dismiss_task: Mutex::new(None),
        }
    }

    pub fn session(&self) -> FeedbackSession {
        self.shared.session().clone()
    }

    pub fn is_disabled(&self, message: &Message) -> bool {
        self.shared.session().is_disabled(message)
    }

    /// Handles a thumbs-up/down press. Rejected presses change nothing and write nothing.
    pub fn record_vote(&self, vote: Vote, message: &Message) -> Result<Submission, VoteRejection> {
        let plan = {
            let mut session = self.shared.session();
            let plan = session.begin_vote(vote, message)?;
            if plan.opened_form {
                self.cancel_dismissal();
            }
            plan
        };
        self.shared.notifier.notify();

        let message_timestamp = plan.message_timestamp.clone();
        let feedback = plan.feedback;
        let sink = Arc::clone(&self.sink);
        let mut guard = SubmissionGuard {
            shared: Arc::clone(&self.shared),
            plan,
            outcome: None,
        };
        let task = tokio::spawn(async move {
            let result = sink
                .send_feedback(&guard.plan.message_timestamp, guard.plan.feedback)
                .await;
            if let Err(error) = &result {
                tracing::warn!("feedback write failed: {error}");
            }
            guard.complete(result.clone());
            result
        });

        Ok(Submission {
            message_timestamp,
            feedback,
            task,
        })
    }

    /// Sends the detail form and shows the acknowledgement for the configured delay.
    pub fn submit_detail_form(
        &self,
        reasons: BTreeSet<String>,
        free_text: impl Into<String>,
    ) -> Result<(), FormNotOpen> {
        let generation = self.shared.session().submit_detail_form()?;
        self.shared.notifier.notify();

        let detail_sink = Arc::clone(&self.detail_sink);
        let free_text = free_text.into();
        tokio::spawn(async move {
            if let Err(error) = detail_sink.submit_detail(&reasons, &free_text).await {
                tracing::warn!("detailed feedback was not delivered: {error}");
            }
        });

        self.schedule_dismissal(generation);
        Ok(())
    }

    pub fn cancel_detail_form(&self) -> Result<(), FormNotOpen> {
        self.shared.session().cancel_detail_form()?;
        self.shared.notifier.notify();
        Ok(())
    }

    pub fn reset(&self) {
        self.cancel_dismissal();
        self.shared.session().reset();
        self.shared.notifier.notify();
    }

    fn schedule_dismissal(&self, generation: u64) {
        let shared = Arc::clone(&self.shared);
        let deadline = tokio::time::Instant::now() + self.acknowledgement_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if shared.session().dismiss_acknowledgement(generation) {
                tracing::debug!(generation, "feedback acknowledgement dismissed");
                shared.notifier.notify();
            }
        });

        let previous = self
            .dismiss_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_dismissal(&self) {
        let pending = self
            .dismiss_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pending) = pending {
            pending.abort();
        }
    }
}

impl Drop for FeedbackController {
    fn drop(&mut self) {
        self.cancel_dismissal();
    }
}
