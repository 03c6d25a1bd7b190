//! One live shared document: current text, subscribers, revision index.
//!
//! Every mutating operation runs under the document's own lock and finishes
//! its fan-out before returning, so updates to one document are linearized
//! while different documents never contend.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::fingerprint::RevisionId;
use crate::protocol::ServerEvent;
use crate::store::{RevisionStore, StoreError};
use crate::subscriber::{ConnectionId, DeliveryError, Subscriber};

/// Upper bound on a single delivery before it is abandoned.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Document {0} was evicted")]
    Evicted(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

struct DocumentState {
    text: String,
    subscribers: HashMap<ConnectionId, Arc<dyn Subscriber>>,
    revisions: Vec<RevisionId>,
    hydrated: bool,
    evicted: bool,
}

pub struct Document {
    name: Arc<str>,
    store: RevisionStore,
    state: Mutex<DocumentState>,
}

impl Document {
    pub(crate) fn new(name: &str, store: RevisionStore) -> Self {
        Self {
            name: Arc::from(name),
            store,
            state: Mutex::new(DocumentState {
                text: String::new(),
                subscribers: HashMap::new(),
                revisions: Vec::new(),
                hydrated: false,
                evicted: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn text(&self) -> String {
        self.state.lock().await.text.clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    /// Revision ids known to this document, oldest first.
    pub async fn revisions(&self) -> Vec<RevisionId> {
        self.state.lock().await.revisions.clone()
    }

    /// Load the latest stored revision the first time the document is used.
    pub(crate) async fn hydrate(&self) {
        let mut state = self.state.lock().await;
        self.hydrate_locked(&mut state).await;
    }

    async fn hydrate_locked(&self, state: &mut DocumentState) {
        if state.hydrated {
            return;
        }
        state.hydrated = true;

        if let Err(e) = self.store.ensure_namespace(&self.name).await {
            warn!("Failed to create namespace for {}: {}", self.name, e);
        }

        match self.store.list(&self.name).await {
            Ok(revisions) => state.revisions = revisions,
            Err(e) => warn!("Failed to list revisions of {}: {}", self.name, e),
        }

        let Some(latest) = state.revisions.last().cloned() else {
            debug!("Created empty document {}", self.name);
            return;
        };

        match self.store.read(&self.name, &latest).await {
            Ok(text) => {
                info!("Hydrated {} from revision {}", self.name, latest);
                state.text = text;
            }
            Err(e) => warn!("Failed to hydrate {}, starting empty: {}", self.name, e),
        }
    }

    /// Re-read the revision index from storage, keeping the cached one on failure.
    async fn refresh_revisions(&self, state: &mut DocumentState) -> Result<(), StoreError> {
        state.revisions = self.store.list(&self.name).await?;
        Ok(())
    }

    /// Register `subscriber` and push the current state to it.
    ///
    /// Everyone (including the newcomer) first sees the new subscriber count;
    /// the newcomer then receives the text and revision list privately.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Result<(), DocumentError> {
        let mut state = self.state.lock().await;
        if state.evicted {
            return Err(DocumentError::Evicted(self.name.to_string()));
        }
        self.hydrate_locked(&mut state).await;

        let id = subscriber.id();
        state.subscribers.insert(id, Arc::clone(&subscriber));
        info!(
            "{} joined {} ({} subscriber(s))",
            id,
            self.name,
            state.subscribers.len()
        );

        if let Err(e) = self.refresh_revisions(&mut state).await {
            warn!("Using cached revisions of {} for {}: {}", self.name, id, e);
        }

        let count = ServerEvent::Subscribers {
            count: state.subscribers.len(),
        };
        fan_out(&state.subscribers, &count).await;

        let text = ServerEvent::State {
            text: state.text.clone(),
        };
        deliver(subscriber.as_ref(), text.to_json()).await;
        deliver(
            subscriber.as_ref(),
            ServerEvent::revisions(&state.revisions).to_json(),
        )
        .await;
        Ok(())
    }

    /// Remove a subscriber. Returns how many remain.
    pub async fn unsubscribe(&self, id: ConnectionId) -> usize {
        let mut state = self.state.lock().await;
        if state.subscribers.remove(&id).is_none() {
            return state.subscribers.len();
        }

        let remaining = state.subscribers.len();
        info!("{} left {} ({} subscriber(s))", id, self.name, remaining);

        let count = ServerEvent::Subscribers { count: remaining };
        fan_out(&state.subscribers, &count).await;
        remaining
    }

    /// Replace the text (last write wins) and notify every subscriber.
    ///
    /// With `persist`, the text is stored as a revision first; if that fails
    /// nothing changes and no event is sent. Returns the stored revision.
    pub async fn apply_update(
        &self,
        content: String,
        persist: bool,
    ) -> Result<Option<RevisionId>, DocumentError> {
        let mut state = self.state.lock().await;
        self.hydrate_locked(&mut state).await;

        let revision = if persist {
            let id = self.store.put(&self.name, &content).await?;
            info!("Committed revision {} of {}", id, self.name);
            if let Err(e) = self.refresh_revisions(&mut state).await {
                warn!("Failed to re-list revisions of {}: {}", self.name, e);
                state.revisions.retain(|r| r != &id);
                state.revisions.push(id.clone());
            }
            Some(id)
        } else {
            None
        };

        state.text = content;

        let text = ServerEvent::State {
            text: state.text.clone(),
        };
        let delivered = fan_out(&state.subscribers, &text).await;
        debug!(
            "Broadcast state of {} to {}/{} subscriber(s)",
            self.name,
            delivered,
            state.subscribers.len()
        );

        if revision.is_some() {
            fan_out(&state.subscribers, &ServerEvent::revisions(&state.revisions)).await;
        }
        Ok(revision)
    }

    /// Send the current revision list to one subscriber, even when it is empty.
    pub async fn send_revisions(&self, id: ConnectionId) -> Result<(), DocumentError> {
        let mut state = self.state.lock().await;
        self.hydrate_locked(&mut state).await;
        self.refresh_revisions(&mut state).await?;

        if let Some(subscriber) = state.subscribers.get(&id) {
            deliver(
                subscriber.as_ref(),
                ServerEvent::revisions(&state.revisions).to_json(),
            )
            .await;
        }
        Ok(())
    }

    /// Mark the document evicted if nobody is subscribed, running `on_evict`
    /// while the document is still locked.
    ///
    /// An evicted document refuses new subscribers, so a caller holding a
    /// stale handle has to resolve the name again.
    pub(crate) async fn evict_if_idle(&self, on_evict: impl FnOnce()) -> bool {
        let mut state = self.state.lock().await;
        if state.evicted || !state.subscribers.is_empty() {
            return false;
        }
        state.evicted = true;
        on_evict();
        true
    }
}

/// Deliver one event to every subscriber concurrently.
///
/// Failures are logged and skipped; the broken connection is reaped by its own
/// session. Returns the number of successful deliveries.
async fn fan_out(
    subscribers: &HashMap<ConnectionId, Arc<dyn Subscriber>>,
    event: &ServerEvent,
) -> usize {
    if subscribers.is_empty() {
        return 0;
    }
    let payload = event.to_json();
    let sends = subscribers
        .values()
        .map(|subscriber| deliver(subscriber.as_ref(), Arc::clone(&payload)));
    join_all(sends).await.into_iter().filter(|ok| *ok).count()
}

async fn deliver(subscriber: &dyn Subscriber, payload: Arc<str>) -> bool {
    let id = subscriber.id();
    let result = match timeout(SEND_TIMEOUT, subscriber.send(payload)).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::TimedOut(id)),
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Dropping event for {}: {}", id, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{InMemoryFs, ReadOnlyFs};
    use crate::subscriber::ChannelSubscriber;
    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedReceiver;

    type Inbox = UnboundedReceiver<Arc<str>>;

    fn memory_store() -> RevisionStore {
        RevisionStore::new(Arc::new(InMemoryFs::new()))
    }

    fn subscriber(n: u64) -> (Arc<ChannelSubscriber>, Inbox) {
        ChannelSubscriber::new(ConnectionId::new(n))
    }

    fn drain(rx: &mut Inbox) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            events.push(ServerEvent::from_json(&payload).unwrap());
        }
        events
    }

    /// Subscriber whose sends never complete.
    struct StalledSubscriber(ConnectionId);

    #[async_trait]
    impl Subscriber for StalledSubscriber {
        fn id(&self) -> ConnectionId {
            self.0
        }

        async fn send(&self, _payload: Arc<str>) -> Result<(), DeliveryError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_subscribe_sends_count_then_snapshots() {
        let store = memory_store();
        let rev = store.put("doc", "stored").await.unwrap();
        let doc = Document::new("doc", store);

        let (sub, mut rx) = subscriber(1);
        doc.subscribe(sub).await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                ServerEvent::Subscribers { count: 1 },
                ServerEvent::State {
                    text: "stored".into()
                },
                ServerEvent::Revisions {
                    ids: vec![rev.into_string()]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_subscribe_notifies_existing_subscribers() {
        let doc = Document::new("doc", memory_store());
        let (first, mut first_rx) = subscriber(1);
        let (second, mut second_rx) = subscriber(2);

        doc.subscribe(first).await.unwrap();
        drain(&mut first_rx);
        doc.subscribe(second).await.unwrap();

        assert_eq!(drain(&mut first_rx), vec![ServerEvent::Subscribers { count: 2 }]);
        assert_eq!(drain(&mut second_rx)[0], ServerEvent::Subscribers { count: 2 });
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_is_idempotent() {
        let doc = Document::new("doc", memory_store());
        let (sub, _rx) = subscriber(1);

        doc.subscribe(sub.clone()).await.unwrap();
        doc.subscribe(sub).await.unwrap();

        assert_eq!(doc.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_notifies_remaining() {
        let doc = Document::new("doc", memory_store());
        let (first, mut first_rx) = subscriber(1);
        let (second, _second_rx) = subscriber(2);
        doc.subscribe(first).await.unwrap();
        doc.subscribe(second).await.unwrap();
        drain(&mut first_rx);

        assert_eq!(doc.unsubscribe(ConnectionId::new(2)).await, 1);
        assert_eq!(drain(&mut first_rx), vec![ServerEvent::Subscribers { count: 1 }]);

        // Unknown connection: no change, no event.
        assert_eq!(doc.unsubscribe(ConnectionId::new(99)).await, 1);
        assert!(drain(&mut first_rx).is_empty());
    }

    #[tokio::test]
    async fn test_set_state_broadcasts_without_persisting() {
        let store = memory_store();
        let doc = Document::new("doc", store.clone());
        let (sub, mut rx) = subscriber(1);
        doc.subscribe(sub).await.unwrap();
        drain(&mut rx);

        let revision = doc.apply_update("draft".into(), false).await.unwrap();

        assert_eq!(revision, None);
        assert_eq!(doc.text().await, "draft");
        assert_eq!(drain(&mut rx), vec![ServerEvent::State { text: "draft".into() }]);
        assert!(store.list("doc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_broadcasts_state_then_revisions() {
        let store = memory_store();
        let doc = Document::new("doc", store.clone());
        let (sub, mut rx) = subscriber(1);
        doc.subscribe(sub).await.unwrap();
        drain(&mut rx);

        let revision = doc.apply_update("v1".into(), true).await.unwrap().unwrap();

        assert_eq!(store.list("doc").await.unwrap(), vec![revision.clone()]);
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerEvent::State { text: "v1".into() },
                ServerEvent::Revisions {
                    ids: vec![revision.into_string()]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_commit_fan_out_count() {
        let doc = Document::new("doc", memory_store());
        let mut inboxes = Vec::new();
        for n in 1..=3 {
            let (sub, rx) = subscriber(n);
            doc.subscribe(sub).await.unwrap();
            inboxes.push(rx);
        }
        for rx in &mut inboxes {
            drain(rx);
        }

        doc.apply_update("shared".into(), true).await.unwrap();

        let events: Vec<ServerEvent> = inboxes.iter_mut().flat_map(drain).collect();
        let states = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::State { .. }))
            .count();
        let revisions = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::Revisions { .. }))
            .count();
        assert_eq!(states, 3);
        assert_eq!(revisions, 3);
    }

    #[tokio::test]
    async fn test_failed_commit_changes_nothing() {
        let store = RevisionStore::new(Arc::new(ReadOnlyFs(InMemoryFs::new())));
        let doc = Document::new("doc", store);
        let (sub, mut rx) = subscriber(1);
        doc.subscribe(sub).await.unwrap();
        doc.apply_update("before".into(), false).await.unwrap();
        drain(&mut rx);

        let err = doc.apply_update("after".into(), true).await.unwrap_err();

        assert!(matches!(err, DocumentError::Storage(_)));
        assert_eq!(doc.text().await, "before");
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_broken_subscriber_does_not_block_others() {
        let doc = Document::new("doc", memory_store());
        let (healthy, mut healthy_rx) = subscriber(1);
        let (broken, broken_rx) = subscriber(2);
        doc.subscribe(healthy).await.unwrap();
        doc.subscribe(broken).await.unwrap();
        drain(&mut healthy_rx);
        drop(broken_rx);

        let result = doc.apply_update("still delivered".into(), true).await;

        assert!(result.is_ok());
        let events = drain(&mut healthy_rx);
        assert_eq!(
            events[0],
            ServerEvent::State {
                text: "still delivered".into()
            }
        );
        assert!(matches!(events[1], ServerEvent::Revisions { .. }));
        // Reaped by its own session, not by the failed send.
        assert_eq!(doc.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn test_send_revisions_replies_only_to_requester() {
        let doc = Document::new("doc", memory_store());
        let (first, mut first_rx) = subscriber(1);
        let (second, mut second_rx) = subscriber(2);
        doc.subscribe(first).await.unwrap();
        doc.subscribe(second).await.unwrap();
        drain(&mut first_rx);
        drain(&mut second_rx);

        doc.send_revisions(ConnectionId::new(1)).await.unwrap();

        assert_eq!(drain(&mut first_rx), vec![ServerEvent::Revisions { ids: vec![] }]);
        assert!(drain(&mut second_rx).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_linearized() {
        let doc = Arc::new(Document::new("doc", memory_store()));
        let (sub, mut rx) = subscriber(1);
        doc.subscribe(sub).await.unwrap();
        drain(&mut rx);

        let contents: Vec<String> = (0..16).map(|i| format!("edit-{}", i)).collect();
        let tasks = contents.iter().cloned().map(|text| {
            let doc = Arc::clone(&doc);
            tokio::spawn(async move { doc.apply_update(text, false).await })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let states: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::State { text } => Some(text),
                _ => None,
            })
            .collect();

        // Every update was broadcast exactly once, and the final text is the
        // last one the subscriber saw.
        assert_eq!(states.len(), contents.len());
        let mut seen = states.clone();
        seen.sort();
        let mut expected = contents.clone();
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(&doc.text().await, states.last().unwrap());
    }

    #[tokio::test]
    async fn test_evicted_document_refuses_subscribers() {
        let doc = Document::new("doc", memory_store());
        assert!(doc.evict_if_idle(|| {}).await);
        assert!(!doc.evict_if_idle(|| {}).await);

        let (sub, _rx) = subscriber(1);
        let err = doc.subscribe(sub).await.unwrap_err();
        assert!(matches!(err, DocumentError::Evicted(_)));
    }

    #[tokio::test]
    async fn test_evict_if_idle_keeps_busy_document() {
        let doc = Document::new("doc", memory_store());
        let (sub, _rx) = subscriber(1);
        doc.subscribe(sub).await.unwrap();

        let mut ran = false;
        assert!(!doc.evict_if_idle(|| ran = true).await);
        assert!(!ran);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_gives_up_after_send_timeout() {
        let stalled = StalledSubscriber(ConnectionId::new(1));
        let start = tokio::time::Instant::now();

        assert!(!deliver(&stalled, Arc::from("{}")).await);
        assert!(start.elapsed() >= SEND_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_does_not_block_others() {
        let doc = Document::new("doc", memory_store());
        let (healthy, mut healthy_rx) = subscriber(1);
        doc.subscribe(Arc::new(StalledSubscriber(ConnectionId::new(2))))
            .await
            .unwrap();
        doc.subscribe(healthy).await.unwrap();
        drain(&mut healthy_rx);

        let rev = doc.apply_update("v1".into(), true).await.unwrap();

        assert!(rev.is_some());
        let events = drain(&mut healthy_rx);
        assert_eq!(events[0], ServerEvent::State { text: "v1".into() });
        assert!(matches!(events[1], ServerEvent::Revisions { .. }));
        assert_eq!(doc.text().await, "v1");
        assert_eq!(doc.subscriber_count().await, 2);
    }
}
