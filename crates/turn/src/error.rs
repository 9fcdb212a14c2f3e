use std::path::PathBuf;

use snafu::Snafu;

/// Failures reported by the collaborators a chat turn consumes.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ServiceError {
    #[snafu(display("failed to resolve download url for '{attachment_id}' on `{stage}`: {message}"))]
    DownloadUrl {
        stage: &'static str,
        attachment_id: String,
        message: String,
    },
    #[snafu(display("failed to record feedback '{vote}' for message {timestamp} on `{stage}`: {message}"))]
    FeedbackWrite {
        stage: &'static str,
        timestamp: String,
        vote: String,
        message: String,
    },
    #[snafu(display("failed to submit detailed feedback on `{stage}`: {message}"))]
    DetailWrite {
        stage: &'static str,
        message: String,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to load turn settings from {path:?} on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        path: PathBuf,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
}
