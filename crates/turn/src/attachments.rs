use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::task::JoinHandle;

use crate::message::Attachment;
use crate::notify::ChangeNotifier;
use crate::services::FileUrlService;

/// Display state of one attachment position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSlot {
    Pending,
    Resolved(String),
    Failed(String),
}

impl AttachmentSlot {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Resolved(url) => Some(url),
            Self::Pending | Self::Failed(_) => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Default)]
struct ResolverState {
    generation: u64,
    references: Vec<Attachment>,
    slots: Vec<AttachmentSlot>,
}

struct Shared {
    state: Mutex<ResolverState>,
    notifier: ChangeNotifier,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes one result unless a newer reference set replaced the one it belongs to.
    fn write_slot(&self, generation: u64, index: usize, slot: AttachmentSlot) {
        let mut state = self.state();
        if state.generation != generation {
            return;
        }
        if let Some(target) = state.slots.get_mut(index) {
            *target = slot;
            drop(state);
            self.notifier.notify();
        }
    }
}

/// Turns attachment references into download URLs, one slot per reference.
///
/// The slot count always equals the reference count, and lookups land in their own index
/// whatever order they finish in.
pub struct AttachmentResolver {
    shared: Arc<Shared>,
    files: Arc<dyn FileUrlService>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AttachmentResolver {
    pub fn new(files: Arc<dyn FileUrlService>, notifier: ChangeNotifier) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ResolverState::default()),
                notifier,
            }),
            files,
            task: Mutex::new(None),
        }
    }

    pub fn slots(&self) -> Vec<AttachmentSlot> {
        self.shared.state().slots.clone()
    }

    /// Starts resolving `references` if they differ from the current set.
    ///
    /// Placeholders for every position are in place before this returns. Must be called
    /// inside a tokio runtime when `references` is non-empty.
    pub fn set_references(&self, references: &[Attachment]) -> bool {
        let generation = {
            let mut state = self.shared.state();
            if state.references == references {
                return false;
            }

            state.generation += 1;
            state.references = references.to_vec();
            state.slots = vec![AttachmentSlot::Pending; references.len()];
            state.generation
        };
        self.abort_pending();
        self.shared.notifier.notify();

        if references.is_empty() {
            return true;
        }

        let shared = Arc::clone(&self.shared);
        let files = Arc::clone(&self.files);
        let source_ids = references
            .iter()
            .map(|reference| reference.source_id.clone())
            .collect::<Vec<_>>();
        tracing::debug!(generation, count = source_ids.len(), "resolving attachments");

        let task = tokio::spawn(async move {
            let mut lookups = source_ids
                .iter()
                .enumerate()
                .map(|(index, source_id)| {
                    let files = &files;
                    async move { (index, source_id, files.download_url(source_id).await) }
                })
                .collect::<FuturesUnordered<_>>();

            while let Some((index, source_id, result)) = lookups.next().await {
                let slot = match result {
                    Ok(url) => AttachmentSlot::Resolved(url),
                    Err(error) => {
                        tracing::warn!(source_id, "attachment url unavailable: {error}");
                        AttachmentSlot::Failed(error.to_string())
                    }
                };
                shared.write_slot(generation, index, slot);
            }
        });

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        true
    }

    pub fn reset(&self) {
        self.abort_pending();
        {
            let mut state = self.shared.state();
            state.generation += 1;
            state.references.clear();
            state.slots.clear();
        }
        self.shared.notifier.notify();
    }

    fn abort_pending(&self) {
        let pending = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pending) = pending {
            pending.abort();
        }
    }
}

impl Drop for AttachmentResolver {
    fn drop(&mut self) {
        self.abort_pending();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio::sync::oneshot;

    use super::*;
    use crate::error::{ServiceError, ServiceResult};
    use crate::services::BoxFuture;

    /// Lookups block until the test releases them one by one.
    #[derive(Default)]
    struct GatedUrls {
        pending: Mutex<HashMap<String, oneshot::Receiver<ServiceResult<String>>>>,
    }

    impl GatedUrls {
        fn gate(&self, source_id: &str) -> oneshot::Sender<ServiceResult<String>> {
            let (sender, receiver) = oneshot::channel();
            self.pending
                .lock()
                .expect("pending lock")
                .insert(source_id.to_string(), receiver);
            sender
        }
    }

    impl FileUrlService for GatedUrls {
        fn download_url<'a>(
            &'a self,
            attachment_id: &'a str,
        ) -> BoxFuture<'a, ServiceResult<String>> {
            let receiver = self
                .pending
                .lock()
                .expect("pending lock")
                .remove(attachment_id);
            Box::pin(async move {
                match receiver {
                    Some(receiver) => receiver.await.unwrap_or_else(|_| {
                        Err(ServiceError::DownloadUrl {
                            stage: "test-gate",
                            attachment_id: attachment_id.to_string(),
                            message: "gate dropped".to_string(),
                        })
                    }),
                    None => Ok(format!("https://files.test/{attachment_id}")),
                }
            })
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn refs() -> Vec<Attachment> {
        vec![
            Attachment::image("ref0"),
            Attachment::file("ref1", "notes.txt"),
            Attachment::image("ref2"),
        ]
    }

    #[tokio::test]
    async fn out_of_order_results_keep_reference_order() {
        let urls = Arc::new(GatedUrls::default());
        let gates = ["ref0", "ref1", "ref2"].map(|id| urls.gate(id));
        let resolver = AttachmentResolver::new(urls.clone(), ChangeNotifier::new());

        assert!(resolver.set_references(&refs()));
        assert_eq!(resolver.slots(), vec![AttachmentSlot::Pending; 3]);

        let [gate0, gate1, gate2] = gates;
        gate2
            .send(Ok("url2".to_string()))
            .expect("lookup is waiting");
        settle().await;
        assert_eq!(
            resolver.slots(),
            vec![
                AttachmentSlot::Pending,
                AttachmentSlot::Pending,
                AttachmentSlot::Resolved("url2".to_string()),
            ]
        );

        gate0
            .send(Ok("url0".to_string()))
            .expect("lookup is waiting");
        gate1
            .send(Ok("url1".to_string()))
            .expect("lookup is waiting");
        settle().await;

        let urls = resolver
            .slots()
            .iter()
            .map(|slot| slot.url().map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(
            urls,
            vec![
                Some("url0".to_string()),
                Some("url1".to_string()),
                Some("url2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_lookup_is_distinguishable() {
        let urls = Arc::new(GatedUrls::default());
        let gate = urls.gate("ref1");
        let resolver = AttachmentResolver::new(urls.clone(), ChangeNotifier::new());
        resolver.set_references(&refs());

        gate.send(Err(ServiceError::DownloadUrl {
            stage: "test",
            attachment_id: "ref1".to_string(),
            message: "expired".to_string(),
        }))
        .expect("lookup is waiting");
        settle().await;

        let slots = resolver.slots();
        assert_eq!(slots.len(), 3);
        assert!(matches!(slots[1], AttachmentSlot::Failed(_)));
        assert!(!slots[1].is_loading());
        assert_eq!(slots[0].url(), Some("https://files.test/ref0"));
        assert_eq!(slots[2].url(), Some("https://files.test/ref2"));
    }

    #[tokio::test]
    async fn emptied_references_clear_slots_immediately() {
        let resolver = AttachmentResolver::new(
            Arc::new(GatedUrls::default()),
            ChangeNotifier::new(),
        );
        resolver.set_references(&refs());
        settle().await;
        assert_eq!(resolver.slots().len(), 3);

        assert!(resolver.set_references(&[]));
        assert!(resolver.slots().is_empty());
    }

    #[tokio::test]
    async fn superseded_lookups_are_dropped() {
        let urls = Arc::new(GatedUrls::default());
        let stale = urls.gate("ref0");
        let resolver = AttachmentResolver::new(urls.clone(), ChangeNotifier::new());
        resolver.set_references(&refs()[..1]);

        resolver.set_references(&[Attachment::image("fresh")]);
        let _ = stale.send(Ok("stale-url".to_string()));
        settle().await;

        assert_eq!(
            resolver.slots(),
            vec![AttachmentSlot::Resolved(
                "https://files.test/fresh".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn unchanged_references_are_not_refetched() {
        let resolver = AttachmentResolver::new(
            Arc::new(GatedUrls::default()),
            ChangeNotifier::new(),
        );
        assert!(resolver.set_references(&refs()));
        settle().await;
        assert!(!resolver.set_references(&refs()));
        assert!(resolver.slots().iter().all(|slot| slot.url().is_some()));
    }
}
