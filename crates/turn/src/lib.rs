#![deny(unsafe_code)]

//! Headless state for rendering one chat turn.
//!
//! A [`ChatTurn`] reveals streamed answers gradually, resolves attachment references into
//! download URLs, and runs the thumbs-up/down feedback flow. Drawing is left to the host,
//! which reads a [`TurnView`] whenever the turn's revision changes.

/// Signed-URL resolution for images and files.
pub mod attachments;
pub mod error;
/// Vote, detail form and acknowledgement flow.
pub mod feedback;
/// Domain entities supplied by the chat session store.
pub mod message;
pub mod notify;
/// Collaborator contracts and their simple implementations.
pub mod services;
pub mod settings;
pub mod turn;
/// Incremental reveal of streamed text.
pub mod typing;

pub use attachments::{AttachmentResolver, AttachmentSlot};
pub use error::{ServiceError, ServiceResult, SettingsError};
pub use feedback::{
    FeedbackController, FeedbackPhase, FeedbackSession, FormNotOpen, Submission, VotePlan,
    VoteRejection,
};
pub use message::{Attachment, AttachmentKind, Feedback, Message, MessageId, Role, Vote};
pub use notify::ChangeNotifier;
pub use services::{
    BoxFuture, DetailFeedbackSink, FeedbackSink, FileUrlService, LoggingDetailSink,
    LoggingFeedbackSink, MarkdownRenderer, PlainTextRenderer, StaticUrlService, TextBlock,
    TurnServices,
};
pub use settings::{SettingsStore, TurnSettings, TypingSettings};
pub use turn::{AttachmentTile, ChatTurn, FeedbackBar, TraceView, TurnBody, TurnProps, TurnView};
pub use typing::TypingController;
