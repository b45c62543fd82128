//! crates/bookwise_core/src/events.rs
//!
//! Change notifications for the session store.
//!
//! Stores publish a `StoreEvent` after every committed write. Callers subscribe
//! to a `Topic` and receive only the events relevant to it, until they drop the
//! subscription or cancel it through its `UnsubscribeHandle`.

use crate::domain::{Message, Session};
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Default number of events buffered per subscriber before it starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A committed change in the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    SessionCreated {
        session: Session,
    },
    SessionRenamed {
        session_id: Uuid,
        owner: Uuid,
        title: String,
    },
    SessionDeleted {
        session_id: Uuid,
        owner: Uuid,
    },
    MessageAppended {
        message: Message,
    },
}

/// What a subscriber is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// The owner's session list: creations, renames and deletions.
    Owner(Uuid),
    /// One session's transcript, plus renames and deletion of that session.
    Session(Uuid),
}

impl Topic {
    pub fn matches(&self, event: &StoreEvent) -> bool {
        match (self, event) {
            (Topic::Owner(owner), StoreEvent::SessionCreated { session }) => session.owner == *owner,
            (Topic::Owner(owner), StoreEvent::SessionRenamed { owner: o, .. }) => o == owner,
            (Topic::Owner(owner), StoreEvent::SessionDeleted { owner: o, .. }) => o == owner,
            (Topic::Owner(_), StoreEvent::MessageAppended { .. }) => false,
            (Topic::Session(id), StoreEvent::MessageAppended { message }) => message.session_id == *id,
            (Topic::Session(id), StoreEvent::SessionRenamed { session_id, .. }) => session_id == id,
            (Topic::Session(id), StoreEvent::SessionDeleted { session_id, .. }) => session_id == id,
            (Topic::Session(_), StoreEvent::SessionCreated { .. }) => false,
        }
    }
}

/// Fan-out hub shared by a store and all of its subscribers.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all current subscribers. With no subscribers the event is dropped.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        Subscription {
            topic,
            receiver: self.sender.subscribe(),
            token: CancellationToken::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Cancels a `Subscription` from anywhere, e.g. from the task that created it.
#[derive(Debug, Clone)]
pub struct UnsubscribeHandle(CancellationToken);

impl UnsubscribeHandle {
    pub fn unsubscribe(&self) {
        self.0.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// A live, topic-filtered view of store events.
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<StoreEvent>,
    token: CancellationToken,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn handle(&self) -> UnsubscribeHandle {
        UnsubscribeHandle(self.token.clone())
    }

    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    /// Waits for the next event on this topic.
    ///
    /// Returns `None` once the subscription is cancelled or the store is gone.
    /// A subscriber that falls behind skips the missed events and keeps going.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return None,
                result = self.receiver.recv() => match result {
                    Ok(event) if self.topic.matches(&event) => return Some(event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, topic = ?self.topic, "Subscriber lagged behind store events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    /// Converts the subscription into a stream that ends on unsubscribe.
    pub fn into_stream(self) -> impl Stream<Item = StoreEvent> + Send + 'static {
        async_stream::stream! {
            let mut subscription = self;
            while let Some(event) = subscription.recv().await {
                yield event;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use chrono::Utc;
    use futures::StreamExt;

    fn message_in(session_id: Uuid, content: &str) -> StoreEvent {
        StoreEvent::MessageAppended {
            message: Message {
                id: Uuid::new_v4(),
                session_id,
                role: Role::User,
                content: content.to_string(),
                created_at: Utc::now(),
                audio_src: None,
            },
        }
    }

    #[tokio::test]
    async fn delivers_only_events_for_the_subscribed_session() {
        let hub = EventHub::new(16);
        let watched = Uuid::new_v4();
        let mut sub = hub.subscribe(Topic::Session(watched));

        hub.publish(message_in(Uuid::new_v4(), "elsewhere"));
        hub.publish(message_in(watched, "here"));

        match sub.recv().await {
            Some(StoreEvent::MessageAppended { message }) => assert_eq!(message.content, "here"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn owner_topic_sees_deletions_but_not_messages() {
        let hub = EventHub::new(16);
        let owner = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let mut sub = hub.subscribe(Topic::Owner(owner));

        hub.publish(message_in(session_id, "ignored"));
        hub.publish(StoreEvent::SessionDeleted { session_id, owner });

        assert_eq!(
            sub.recv().await,
            Some(StoreEvent::SessionDeleted { session_id, owner })
        );
    }

    #[tokio::test]
    async fn unsubscribe_handle_ends_the_subscription() {
        let hub = EventHub::new(16);
        let session_id = Uuid::new_v4();
        let mut sub = hub.subscribe(Topic::Session(session_id));
        let handle = sub.handle();

        hub.publish(message_in(session_id, "pending"));
        handle.unsubscribe();

        assert!(handle.is_unsubscribed());
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let hub = EventHub::default();
        hub.publish(message_in(Uuid::new_v4(), "nobody listening"));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_receiving() {
        let hub = EventHub::new(2);
        let session_id = Uuid::new_v4();
        let mut sub = hub.subscribe(Topic::Session(session_id));

        for i in 0..5 {
            hub.publish(message_in(session_id, &format!("m{i}")));
        }

        assert!(sub.recv().await.is_some());
    }

    #[tokio::test]
    async fn stream_ends_after_unsubscribe() {
        let hub = EventHub::new(16);
        let session_id = Uuid::new_v4();
        let sub = hub.subscribe(Topic::Session(session_id));
        let handle = sub.handle();
        let mut stream = Box::pin(sub.into_stream());

        hub.publish(message_in(session_id, "first"));
        assert!(stream.next().await.is_some());

        handle.unsubscribe();
        assert!(stream.next().await.is_none());
    }
}
