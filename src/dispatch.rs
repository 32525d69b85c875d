//! Hand-off of decoded push events from the session actor to the consumer.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TryRecvError};

use crate::codec::{DispatchEvent, Message, MessageDelete, Session};
use crate::core::{GatewayError, GatewayResult};

/// Consumer-level events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Handshake finished; carries the new session.
    Connected(Arc<Session>),
    MessageReceived(Message),
    MessageUpdated(Message),
    MessageDeleted(MessageDelete),
    /// Unrecognised dispatch, only produced when forwarding is enabled.
    Raw { name: String, data: Bytes },
}

impl GatewayEvent {
    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::Connected(_) => "CONNECTED",
            GatewayEvent::MessageReceived(_) => "MESSAGE_CREATE",
            GatewayEvent::MessageUpdated(_) => "MESSAGE_UPDATE",
            GatewayEvent::MessageDeleted(_) => "MESSAGE_DELETE",
            GatewayEvent::Raw { name, .. } => name,
        }
    }
}

/// Why a dispatch never reached the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoSession,
    OwnMessage,
    MissingContent,
    UnknownEvent,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::NoSession => "no_session",
            DropReason::OwnMessage => "own_message",
            DropReason::MissingContent => "missing_content",
            DropReason::UnknownEvent => "unknown_event",
        }
    }
}

fn accept_message(message: &Message, session: &Session) -> Result<(), DropReason> {
    let Some(author) = message.author.as_ref() else {
        return Err(DropReason::MissingContent);
    };
    if message.content.is_none() {
        return Err(DropReason::MissingContent);
    }
    if author.id == session.user.id {
        return Err(DropReason::OwnMessage);
    }
    Ok(())
}

/// Turn a non-ready dispatch into a consumer event, or say why it is dropped.
///
/// Messages authored by the session's own user, and messages without author or content,
/// are dropped. Deletes always pass.
pub fn filter_dispatch(
    event: DispatchEvent,
    session: Option<&Session>,
    forward_unknown: bool,
) -> Result<GatewayEvent, DropReason> {
    let Some(session) = session else {
        return Err(DropReason::NoSession);
    };

    match event {
        DispatchEvent::Ready(session) => Ok(GatewayEvent::Connected(Arc::new(session))),
        DispatchEvent::MessageCreate(message) => {
            accept_message(&message, session)?;
            Ok(GatewayEvent::MessageReceived(message))
        }
        DispatchEvent::MessageUpdate(message) => {
            accept_message(&message, session)?;
            Ok(GatewayEvent::MessageUpdated(message))
        }
        DispatchEvent::MessageDelete(delete) => Ok(GatewayEvent::MessageDeleted(delete)),
        DispatchEvent::Unknown { name, raw } if forward_unknown => {
            Ok(GatewayEvent::Raw { name, data: raw })
        }
        DispatchEvent::Unknown { .. } => Err(DropReason::UnknownEvent),
    }
}

/// Callback used by [`DispatchMode::Inline`]. Runs on the session actor, in arrival order.
pub trait GatewayEventHandler: Send + Sync + 'static {
    fn on_event(&self, event: &GatewayEvent);
}

impl<F> GatewayEventHandler for F
where
    F: Fn(&GatewayEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &GatewayEvent) {
        self(event)
    }
}

/// Producer half of the bounded dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<GatewayEvent>,
    enqueue_timeout: Duration,
}

/// Consumer half of the bounded dispatch queue.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<GatewayEvent>,
}

/// Create a queue holding at most `capacity` events (at least one).
pub fn dispatch_queue(capacity: usize, enqueue_timeout: Duration) -> (DispatchQueue, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DispatchQueue { tx, enqueue_timeout }, EventReceiver { rx })
}

impl DispatchQueue {
    /// Enqueue, waiting at most the configured timeout for room.
    pub async fn enqueue(&self, event: GatewayEvent) -> GatewayResult<()> {
        match self.tx.send_timeout(event, self.enqueue_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(GatewayError::timeout("dispatch enqueue")),
            Err(SendTimeoutError::Closed(_)) => Err(GatewayError::QueueClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Events currently waiting for the consumer.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventReceiver {
    /// Next event, or `None` once the client is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        self.rx.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> GatewayResult<Option<GatewayEvent>> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .map_err(|_| GatewayError::timeout("dispatch recv"))
    }

    pub fn try_recv(&mut self) -> GatewayResult<Option<GatewayEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(GatewayError::QueueClosed),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Where dispatched events go.
#[derive(Clone)]
pub enum DispatchMode {
    Queued(DispatchQueue),
    Inline(Arc<dyn GatewayEventHandler>),
}

impl std::fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Queued(queue) => f.debug_tuple("Queued").field(queue).finish(),
            DispatchMode::Inline(_) => f.write_str("Inline"),
        }
    }
}

impl DispatchMode {
    pub async fn deliver(&self, event: GatewayEvent) -> GatewayResult<()> {
        match self {
            DispatchMode::Queued(queue) => queue.enqueue(event).await,
            DispatchMode::Inline(handler) => {
                handler.on_event(&event);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::codec::User;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            username: format!("user-{id}"),
            discriminator: None,
            bot: false,
        }
    }

    fn session(user_id: &str) -> Session {
        Session {
            session_id: "s1".to_string(),
            user: user(user_id),
        }
    }

    fn message(author: Option<&str>, content: Option<&str>) -> Message {
        Message {
            id: "m1".to_string(),
            channel_id: "c1".to_string(),
            guild_id: None,
            content: content.map(str::to_string),
            author: author.map(user),
        }
    }

    #[test]
    fn own_messages_are_dropped() {
        let me = session("U1");
        for event in [
            DispatchEvent::MessageCreate(message(Some("U1"), Some("hi"))),
            DispatchEvent::MessageUpdate(message(Some("U1"), Some("edited"))),
        ] {
            assert_eq!(
                filter_dispatch(event, Some(&me), true),
                Err(DropReason::OwnMessage)
            );
        }
    }

    #[test]
    fn messages_from_others_pass() {
        let me = session("U1");
        let event = filter_dispatch(
            DispatchEvent::MessageCreate(message(Some("U2"), Some("hi"))),
            Some(&me),
            false,
        )
        .expect("passes");
        match event {
            GatewayEvent::MessageReceived(message) => {
                assert_eq!(message.content.as_deref(), Some("hi"))
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn incomplete_messages_are_dropped() {
        let me = session("U1");
        assert_eq!(
            filter_dispatch(
                DispatchEvent::MessageCreate(message(None, Some("hi"))),
                Some(&me),
                false
            ),
            Err(DropReason::MissingContent)
        );
        assert_eq!(
            filter_dispatch(
                DispatchEvent::MessageUpdate(message(Some("U2"), None)),
                Some(&me),
                false
            ),
            Err(DropReason::MissingContent)
        );
    }

    #[test]
    fn deletes_pass_unfiltered_and_need_a_session() {
        let delete = MessageDelete {
            id: "m1".to_string(),
            channel_id: "c1".to_string(),
            guild_id: None,
        };
        assert_eq!(
            filter_dispatch(DispatchEvent::MessageDelete(delete.clone()), None, false),
            Err(DropReason::NoSession)
        );
        assert_eq!(
            filter_dispatch(
                DispatchEvent::MessageDelete(delete.clone()),
                Some(&session("U1")),
                false
            ),
            Ok(GatewayEvent::MessageDeleted(delete))
        );
    }

    #[test]
    fn unknown_events_forwarded_only_when_enabled() {
        let me = session("U1");
        let unknown = || DispatchEvent::Unknown {
            name: "TYPING_START".to_string(),
            raw: Bytes::from_static(b"{}"),
        };
        assert_eq!(
            filter_dispatch(unknown(), Some(&me), false),
            Err(DropReason::UnknownEvent)
        );
        assert_eq!(
            filter_dispatch(unknown(), Some(&me), true),
            Ok(GatewayEvent::Raw {
                name: "TYPING_START".to_string(),
                data: Bytes::from_static(b"{}")
            })
        );
    }

    #[tokio::test]
    async fn queue_preserves_order_and_times_out_when_full() {
        let (queue, mut rx) = dispatch_queue(2, Duration::from_millis(20));
        let delete = |id: &str| {
            GatewayEvent::MessageDeleted(MessageDelete {
                id: id.to_string(),
                channel_id: "c1".to_string(),
                guild_id: None,
            })
        };

        queue.enqueue(delete("1")).await.expect("first");
        queue.enqueue(delete("2")).await.expect("second");
        assert_eq!(queue.len(), 2);
        assert!(matches!(
            queue.enqueue(delete("3")).await,
            Err(GatewayError::Timeout { .. })
        ));

        assert_eq!(rx.len(), 2);
        assert_eq!(rx.recv().await, Some(delete("1")));
        assert_eq!(rx.try_recv().expect("open"), Some(delete("2")));
        assert_eq!(rx.try_recv().expect("open"), None);

        drop(queue);
        assert!(matches!(rx.try_recv(), Err(GatewayError::QueueClosed)));
    }

    #[tokio::test]
    async fn closed_receiver_reports_queue_closed() {
        let (queue, rx) = dispatch_queue(1, Duration::from_millis(10));
        drop(rx);
        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue(GatewayEvent::Raw {
                name: "X".to_string(),
                data: Bytes::new()
            })
            .await,
            Err(GatewayError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn inline_mode_runs_handler_synchronously() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mode = DispatchMode::Inline(Arc::new(move |event: &GatewayEvent| {
            sink.lock().expect("lock").push(event.name().to_string());
        }));

        mode.deliver(GatewayEvent::Raw {
            name: "A".to_string(),
            data: Bytes::new(),
        })
        .await
        .expect("inline");
        assert_eq!(*seen.lock().expect("lock"), vec!["A".to_string()]);
    }
}
