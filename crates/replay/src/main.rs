use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use snafu::{OptionExt, ResultExt};
use tracing_subscriber::EnvFilter;
use zova_turn::{
    AttachmentSlot, BoxFuture, ChatTurn, Feedback, FeedbackSink, LoggingFeedbackSink,
    PlainTextRenderer, ServiceError, ServiceResult, SettingsStore, StaticUrlService, TurnBody,
    TurnProps, TurnServices, TurnSettings,
};

mod transcript;

use transcript::{Action, LoadSettingsSnafu, ReplayResult, Transcript, UsageSnafu};

/// Feedback sink that rejects every write.
struct OfflineFeedbackSink;

impl FeedbackSink for OfflineFeedbackSink {
    fn send_feedback<'a>(
        &'a self,
        message_timestamp: &'a str,
        feedback: Feedback,
    ) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            Err(ServiceError::FeedbackWrite {
                stage: "offline-sink",
                timestamp: message_timestamp.to_string(),
                vote: feedback.to_string(),
                message: "feedback service unreachable".to_string(),
            })
        })
    }
}

/// Replays a scripted message slot and prints every frame the host would draw.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(error) = run().await {
        tracing::error!("{error}");
        std::process::exit(1);
    }
}

async fn run() -> ReplayResult<()> {
    let mut args = std::env::args().skip(1);
    let transcript_path = args.next().map(PathBuf::from).context(UsageSnafu {
        stage: "parse-arguments",
    })?;
    let settings = match args.next() {
        Some(path) => Arc::new(
            TurnSettings::extract(&PathBuf::from(path)).context(LoadSettingsSnafu {
                stage: "load-explicit-settings",
            })?,
        ),
        None => SettingsStore::load().settings(),
    };

    let transcript = Transcript::load(&transcript_path)?;
    let feedback_sink: Arc<dyn FeedbackSink> = if transcript.fail_feedback {
        Arc::new(OfflineFeedbackSink)
    } else {
        Arc::new(LoggingFeedbackSink)
    };
    let services = TurnServices::new(
        Arc::new(StaticUrlService::new(transcript.base_url.clone())),
        feedback_sink,
    );

    let mut message = transcript.message.clone();
    let mut loading = transcript.loading;
    let mut turn = ChatTurn::new(
        TurnProps::new(message.clone(), transcript.index).loading(loading),
        services,
        settings,
    );
    let mut revisions = turn.subscribe();
    print_frame(&turn);

    for step in &transcript.steps {
        pump(&turn, &mut revisions, Duration::from_millis(step.after_ms)).await;

        match &step.action {
            Action::Append { text } => {
                message.content.push_str(text);
                turn.apply(message.clone(), loading);
            }
            Action::Replace { text } => {
                message.content.clone_from(text);
                turn.apply(message.clone(), loading);
            }
            Action::Finish => {
                loading = false;
                turn.apply(message.clone(), loading);
            }
            Action::Vote { vote } => match turn.record_vote(*vote) {
                Ok(submission) => {
                    let written = submission.feedback();
                    if submission.wait().await.is_ok() {
                        // The session store echoes the recorded value back.
                        message.feedback = Some(written);
                        turn.apply(message.clone(), loading);
                    }
                }
                Err(rejection) => tracing::info!(?rejection, "vote ignored"),
            },
            Action::Detail { reasons, text } => {
                if turn.submit_detail_form(reasons.clone(), text.clone()).is_err() {
                    tracing::info!("detail form is not open");
                }
            }
            Action::Cancel => {
                if turn.cancel_detail_form().is_err() {
                    tracing::info!("detail form is not open");
                }
            }
            Action::Reset => turn.reset(),
        }
    }

    pump(
        &turn,
        &mut revisions,
        Duration::from_millis(transcript.tail_ms),
    )
    .await;
    print_frame(&turn);
    Ok(())
}

/// Prints a frame for every revision seen during `window`.
async fn pump(
    turn: &ChatTurn,
    revisions: &mut tokio::sync::watch::Receiver<u64>,
    window: Duration,
) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        if revisions.has_changed().unwrap_or(false) {
            let _ = revisions.borrow_and_update();
            print_frame(turn);
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let _ = revisions.borrow_and_update();
                print_frame(turn);
            }
        }
    }
}

fn print_frame(turn: &ChatTurn) {
    let view = turn.view(&PlainTextRenderer);
    println!("--- revision {} ({:?})", turn.revision(), view.avatar);

    if let Some(trace) = &view.trace {
        let marker = if trace.spinner { " …" } else { "" };
        println!("[trace{marker}]");
        for block in &trace.body {
            println!("  {}", block.text);
        }
    }
    for tile in &view.attachments {
        let state = match &tile.slot {
            AttachmentSlot::Pending => "loading".to_string(),
            AttachmentSlot::Resolved(url) => url.clone(),
            AttachmentSlot::Failed(reason) => format!("failed: {reason}"),
        };
        let name = tile.name.as_deref().unwrap_or("-");
        println!("[{:?} {name}] {state}", tile.kind);
    }
    match &view.body {
        TurnBody::Lines(lines) => lines.iter().for_each(|line| println!("{line}")),
        TurnBody::Markdown(blocks) => blocks.iter().for_each(|block| println!("{}", block.text)),
    }
    if let Some(pulse) = &view.pulse {
        println!("{pulse}");
    }
    if let Some(label) = &view.model_label {
        println!("({label})");
    }
    if let Some(bar) = &view.feedback_bar {
        let active = bar
            .active
            .map(|vote| format!("{vote:?}"))
            .unwrap_or_else(|| "none".to_string());
        let state = if bar.buttons_disabled { "disabled" } else { "enabled" };
        println!("[copy] [good] [bad] active={active} {state}");
        if bar.form_visible {
            println!("[detail form]");
        }
        if let Some(text) = &bar.acknowledgement {
            println!("[{text}]");
        }
        if let Some(failure) = &bar.last_failure {
            println!("[retry: {failure}]");
        }
    }
}
