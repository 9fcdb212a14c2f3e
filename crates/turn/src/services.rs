use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ServiceResult;
use crate::message::Feedback;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Turns markdown source into whatever the host draws.
///
/// Must be a pure function of its inputs; `key_prefix` keeps block keys stable across renders.
pub trait MarkdownRenderer {
    type Output;

    fn render(&self, text: &str, key_prefix: &str) -> Self::Output;
}

/// Resolves an opaque attachment id into a signed download URL.
pub trait FileUrlService: Send + Sync {
    fn download_url<'a>(&'a self, attachment_id: &'a str) -> BoxFuture<'a, ServiceResult<String>>;
}

/// Records a vote keyed by the message creation timestamp.
pub trait FeedbackSink: Send + Sync {
    fn send_feedback<'a>(
        &'a self,
        message_timestamp: &'a str,
        feedback: Feedback,
    ) -> BoxFuture<'a, ServiceResult<()>>;
}

/// Provisional sink for the reasons collected after a thumbs-down.
pub trait DetailFeedbackSink: Send + Sync {
    fn submit_detail<'a>(
        &'a self,
        reasons: &'a BTreeSet<String>,
        free_text: &'a str,
    ) -> BoxFuture<'a, ServiceResult<()>>;
}

/// Collaborators shared by every controller of one turn.
#[derive(Clone)]
pub struct TurnServices {
    pub files: Arc<dyn FileUrlService>,
    pub feedback: Arc<dyn FeedbackSink>,
    pub detail: Arc<dyn DetailFeedbackSink>,
}

impl TurnServices {
    pub fn new(files: Arc<dyn FileUrlService>, feedback: Arc<dyn FeedbackSink>) -> Self {
        Self {
            files,
            feedback,
            detail: Arc::new(LoggingDetailSink),
        }
    }

    pub fn with_detail_sink(mut self, detail: Arc<dyn DetailFeedbackSink>) -> Self {
        self.detail = detail;
        self
    }
}

/// One rendered markdown block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub key: String,
    pub text: String,
}

/// Splits on blank lines without interpreting any markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

impl MarkdownRenderer for PlainTextRenderer {
    type Output = Vec<TextBlock>;

    fn render(&self, text: &str, key_prefix: &str) -> Self::Output {
        text.split("\n\n")
            .filter(|block| !block.trim().is_empty())
            .enumerate()
            .map(|(index, block)| TextBlock {
                key: format!("{key_prefix}-{index}"),
                text: block.to_string(),
            })
            .collect()
    }
}

/// Builds URLs by joining a base with the attachment id.
#[derive(Debug, Clone)]
pub struct StaticUrlService {
    base_url: String,
}

impl StaticUrlService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl FileUrlService for StaticUrlService {
    fn download_url<'a>(&'a self, attachment_id: &'a str) -> BoxFuture<'a, ServiceResult<String>> {
        Box::pin(async move { Ok(format!("{}/{attachment_id}", self.base_url)) })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingFeedbackSink;

impl FeedbackSink for LoggingFeedbackSink {
    fn send_feedback<'a>(
        &'a self,
        message_timestamp: &'a str,
        feedback: Feedback,
    ) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            tracing::info!(message_timestamp, %feedback, "feedback recorded");
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDetailSink;

impl DetailFeedbackSink for LoggingDetailSink {
    fn submit_detail<'a>(
        &'a self,
        reasons: &'a BTreeSet<String>,
        free_text: &'a str,
    ) -> BoxFuture<'a, ServiceResult<()>> {
        Box::pin(async move {
            tracing::info!(?reasons, free_text, "detailed feedback received");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_renderer_keys_blocks_by_prefix() {
        let blocks = PlainTextRenderer.render("first\n\n\n\nsecond\nline", "3");
        assert_eq!(
            blocks,
            vec![
                TextBlock {
                    key: "3-0".to_string(),
                    text: "first".to_string(),
                },
                TextBlock {
                    key: "3-1".to_string(),
                    text: "second\nline".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn static_service_joins_base_and_id() {
        let service = StaticUrlService::new("https://files.example/");
        let url = service.download_url("abc").await.expect("static urls never fail");
        assert_eq!(url, "https://files.example/abc");
    }
}
