use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::attachments::{AttachmentResolver, AttachmentSlot};
use crate::feedback::{FeedbackController, FeedbackSession, FormNotOpen, Submission, VoteRejection};
use crate::message::{AttachmentKind, Feedback, Message, Role, Vote};
use crate::notify::ChangeNotifier;
use crate::services::{MarkdownRenderer, TurnServices};
use crate::settings::TurnSettings;
use crate::typing::TypingController;

/// Inputs the host passes for one message slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnProps {
    pub message: Message,
    pub loading: bool,
    /// Position in the transcript, used to prefix markdown block keys.
    pub index: usize,
    pub hide_feedback: bool,
}

impl TurnProps {
    pub fn new(message: Message, index: usize) -> Self {
        Self {
            message,
            loading: false,
            index,
            hide_feedback: false,
        }
    }

    pub fn loading(mut self, loading: bool) -> Self {
        self.loading = loading;
        self
    }

    pub fn hide_feedback(mut self, hide_feedback: bool) -> Self {
        self.hide_feedback = hide_feedback;
        self
    }
}

/// One chat turn: typing reveal, attachment URLs and the feedback flow.
///
/// Each turn owns its controllers outright; background work is tied to this value
/// and stops when it is dropped.
pub struct ChatTurn {
    props: TurnProps,
    settings: Arc<TurnSettings>,
    notifier: ChangeNotifier,
    typing: Arc<Mutex<TypingCell>>,
    typing_ticker: Option<JoinHandle<()>>,
    attachments: AttachmentResolver,
    feedback: FeedbackController,
}

impl ChatTurn {
    /// Must be called inside a tokio runtime.
    pub fn new(props: TurnProps, services: TurnServices, settings: Arc<TurnSettings>) -> Self {
        let notifier = ChangeNotifier::new();
        let streaming = props.message.is_streaming(props.loading);
        let typing = Arc::new(Mutex::new(TypingCell::new(TypingController::new(
            streaming,
            &settings.typing,
        ))));
        let attachments = AttachmentResolver::new(services.files, notifier.clone());
        let feedback = FeedbackController::new(
            services.feedback,
            services.detail,
            settings.acknowledgement_delay(),
            notifier.clone(),
        );

        let mut turn = Self {
            props,
            settings,
            notifier,
            typing,
            typing_ticker: None,
            attachments,
            feedback,
        };
        turn.reconcile();
        turn
    }

    pub fn props(&self) -> &TurnProps {
        &self.props
    }

    pub fn message(&self) -> &Message {
        &self.props.message
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.notifier.revision()
    }

    /// Takes the latest message data from the session store.
    pub fn apply(&mut self, message: Message, loading: bool) {
        if self.props.message == message && self.props.loading == loading {
            return;
        }

        self.props.message = message;
        self.props.loading = loading;
        self.reconcile();
    }

    /// Drops all local state, as when the surrounding conversation changes.
    pub fn reset(&mut self) {
        self.stop_ticker();
        let streaming = self.props.message.is_streaming(self.props.loading);
        self.typing_state().controller = TypingController::new(streaming, &self.settings.typing);
        self.attachments.reset();
        self.feedback.reset();
        self.reconcile();
    }

    pub fn revealed_text(&self) -> String {
        self.typing_state().controller.revealed().to_string()
    }

    pub fn attachment_slots(&self) -> Vec<AttachmentSlot> {
        self.attachments.slots()
    }

    pub fn feedback_session(&self) -> FeedbackSession {
        self.feedback.session()
    }

    /// True when the vote buttons must not react.
    pub fn feedback_disabled(&self) -> bool {
        self.feedback.is_disabled(&self.props.message)
    }

    pub fn record_vote(&self, vote: Vote) -> Result<Submission, VoteRejection> {
        self.feedback.record_vote(vote, &self.props.message)
    }

    pub fn submit_detail_form(
        &self,
        reasons: BTreeSet<String>,
        free_text: impl Into<String>,
    ) -> Result<(), FormNotOpen> {
        self.feedback.submit_detail_form(reasons, free_text)
    }

    pub fn cancel_detail_form(&self) -> Result<(), FormNotOpen> {
        self.feedback.cancel_detail_form()
    }

    /// Describes what the host should draw right now.
    pub fn view<R: MarkdownRenderer>(&self, renderer: &R) -> TurnView<R::Output> {
        let message = &self.props.message;
        let loading = self.props.loading;
        let content_empty = message.content.is_empty();
        let revealed = self.revealed_text();

        let trace = message.trace.as_ref().map(|trace| TraceView {
            spinner: loading && content_empty,
            body: renderer.render(trace, &format!("{}-trace", self.props.index)),
        });

        let slots = self.attachments.slots();
        let attachments = message
            .extra_data
            .iter()
            .enumerate()
            .map(|(index, reference)| AttachmentTile {
                kind: reference.kind,
                name: reference.name.clone(),
                slot: slots.get(index).cloned().unwrap_or(AttachmentSlot::Pending),
            })
            .collect();

        let body = match message.role {
            Role::Assistant => {
                let mut text = revealed;
                if loading && !content_empty {
                    text.push_str(&self.settings.streaming_cursor);
                }
                TurnBody::Markdown(renderer.render(&text, &self.props.index.to_string()))
            }
            Role::User | Role::System => {
                TurnBody::Lines(revealed.split('\n').map(str::to_string).collect())
            }
        };

        let feedback_bar = (message.role == Role::Assistant && !loading && !self.props.hide_feedback)
            .then(|| {
                let session = self.feedback.session();
                FeedbackBar {
                    copy_text: message.content.clone(),
                    buttons_disabled: session.is_disabled(message),
                    active: match message.feedback {
                        Some(Feedback::Good) => Some(Vote::Good),
                        Some(Feedback::Bad) => Some(Vote::Bad),
                        Some(Feedback::Neutral) | None => None,
                    },
                    form_visible: session.is_form_visible(),
                    acknowledgement: session
                        .is_acknowledgement_visible()
                        .then(|| self.settings.acknowledgement_text.clone()),
                    last_failure: session.last_failure().map(ToString::to_string),
                }
            });

        TurnView {
            avatar: message.role,
            trace,
            attachments,
            body,
            pulse: (loading && content_empty).then(|| self.settings.streaming_cursor.clone()),
            model_label: match message.role {
                Role::Assistant => message.llm_type.clone(),
                Role::User | Role::System => None,
            },
            feedback_bar,
        }
    }

    fn reconcile(&mut self) {
        let streaming = self.props.message.is_streaming(self.props.loading);
        let caught_up = {
            let mut typing = self.typing_state();
            typing.controller.set_streaming(streaming);
            typing.controller.set_target(&self.props.message.content);
            typing.controller.is_caught_up()
        };

        if streaming && !caught_up {
            self.ensure_ticker();
        } else if !streaming {
            self.stop_ticker();
        }

        self.attachments.set_references(&self.props.message.extra_data);
        self.notifier.notify();
    }

    fn ensure_ticker(&mut self) {
        if !self.typing_state().claim_ticker() {
            return;
        }

        let typing = Arc::clone(&self.typing);
        let notifier = self.notifier.clone();
        let mut interval = tokio::time::interval(self.settings.typing.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.typing_ticker = Some(tokio::spawn(async move {
            loop {
                interval.tick().await;
                let step = typing
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .ticker_step();
                if step.changed {
                    notifier.notify();
                }
                // New text restarts the ticker through `apply`.
                if !step.keep_running {
                    break;
                }
            }
        }));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.typing_ticker.take() {
            ticker.abort();
        }
        self.typing_state().ticking = false;
    }

    fn typing_state(&self) -> MutexGuard<'_, TypingCell> {
        self.typing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Typing state plus whether a ticker task currently owns the reveal.
///
/// `ticking` only changes under the same lock as the controller, so a ticker that
/// stops and an `apply` that extends the text cannot miss each other.
#[derive(Debug)]
struct TypingCell {
    controller: TypingController,
    ticking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TickerStep {
    changed: bool,
    keep_running: bool,
}

impl TypingCell {
    fn new(controller: TypingController) -> Self {
        Self {
            controller,
            ticking: false,
        }
    }

    /// Returns true when the caller must spawn a ticker.
    fn claim_ticker(&mut self) -> bool {
        if self.ticking {
            return false;
        }
        self.ticking = true;
        true
    }

    fn ticker_step(&mut self) -> TickerStep {
        let changed = self.controller.tick();
        let keep_running = !self.controller.is_caught_up();
        if !keep_running {
            self.ticking = false;
        }
        TickerStep {
            changed,
            keep_running,
        }
    }
}

impl Drop for ChatTurn {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

/// Headless render description of one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnView<M> {
    pub avatar: Role,
    pub trace: Option<TraceView<M>>,
    pub attachments: Vec<AttachmentTile>,
    pub body: TurnBody<M>,
    /// Liveness marker shown while an answer has no text yet.
    pub pulse: Option<String>,
    pub model_label: Option<String>,
    pub feedback_bar: Option<FeedbackBar>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceView<M> {
    pub spinner: bool,
    pub body: M,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentTile {
    pub kind: AttachmentKind,
    pub name: Option<String>,
    pub slot: AttachmentSlot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnBody<M> {
    Lines(Vec<String>),
    Markdown(M),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackBar {
    pub copy_text: String,
    pub buttons_disabled: bool,
    pub active: Option<Vote>,
    pub form_visible: bool,
    pub acknowledgement: Option<String>,
    pub last_failure: Option<String>,
}
