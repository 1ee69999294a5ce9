//! IM worker: take messages from the inbound queue, drop the bot's own, and hand each channel's
//! messages to a per-channel lane. A lane answers its messages one at a time through the
//! channel's session, so a channel's replies keep receipt order while channels run concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::daemon::{OutboundHub, OutboundMsg};
use super::log::{channel_name, chat_id, truncate_content_default};
use super::session::SessionStore;
use super::transport::ImTransport;
use crate::ai::ChatBackend;

const LANE_CAPACITY: usize = 64;
/// Platforms clear "typing..." after a few seconds (Discord: ~10 s), so it is re-sent while the
/// backend call runs.
const TYPING_REFRESH: Duration = Duration::from_secs(8);

/// Where an inbound message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A person (or another bot) in the channel.
    User,
    /// This bot's own account, e.g. our replies or the echoed briefing prompt.
    Bot,
    /// The daily briefing scheduler.
    Scheduler,
}

/// Inbound message from any IM channel (or the scheduler) to the worker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub text: String,
    pub origin: Origin,
    /// Display name for logs.
    pub author: String,
}

impl InboundMessage {
    pub fn from_user(channel_id: String, text: String, author: String) -> Self {
        Self { channel_id, text, origin: Origin::User, author }
    }

    pub fn from_bot(channel_id: String, text: String) -> Self {
        Self { channel_id, text, origin: Origin::Bot, author: "self".into() }
    }

    pub fn from_scheduler(channel_id: String, text: String) -> Self {
        Self { channel_id, text, origin: Origin::Scheduler, author: "scheduler".into() }
    }
}

/// Self-reply guard: the bot never answers its own account; user and scheduler messages pass.
pub fn should_handle(msg: &InboundMessage) -> bool {
    !matches!(msg.origin, Origin::Bot)
}

/// Answer one message: session lookup/create, typing kept up during the backend call, enqueue reply.
/// Returns the reply, or None when the backend failed (the channel gets no reply).
pub async fn handle_message<T>(
    msg: &InboundMessage,
    outbound: &OutboundHub<T>,
    store: &SessionStore,
    backend: &dyn ChatBackend,
) -> Option<String>
where
    T: ImTransport + 'static,
{
    let channel_id = msg.channel_id.as_str();
    let session = store.get_or_create(channel_id);

    outbound.send(channel_id, OutboundMsg::Typing).await;

    let mut session = session.lock().await;
    let result = {
        let reply = session.send(backend, &msg.text);
        tokio::pin!(reply);
        let mut refresh = tokio::time::interval_at(Instant::now() + TYPING_REFRESH, TYPING_REFRESH);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                result = &mut reply => break result,
                _ = refresh.tick() => outbound.send(channel_id, OutboundMsg::Typing).await,
            }
        }
    };
    match result {
        Ok(reply) => {
            tracing::info!(
                channel = channel_name(channel_id),
                chat_id = chat_id(channel_id),
                model = backend.model(),
                turns = session.history.len(),
                direction = "reply",
                content = %truncate_content_default(&reply),
                "reply generated"
            );
            outbound.send(channel_id, OutboundMsg::Send(reply.clone())).await;
            Some(reply)
        }
        Err(e) => {
            tracing::error!(
                channel = channel_name(channel_id),
                chat_id = chat_id(channel_id),
                model = backend.model(),
                prompt = %truncate_content_default(&msg.text),
                error = %e,
                "backend call failed, no reply sent"
            );
            None
        }
    }
}

/// One lane: handles a single channel's messages in order.
async fn run_lane<T>(
    mut rx: mpsc::Receiver<InboundMessage>,
    outbound: Arc<OutboundHub<T>>,
    store: Arc<SessionStore>,
    backend: Arc<dyn ChatBackend>,
) where
    T: ImTransport + 'static,
{
    while let Some(msg) = rx.recv().await {
        handle_message(&msg, &outbound, &store, backend.as_ref()).await;
    }
}

pub async fn run_worker<T>(
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    outbound: Arc<OutboundHub<T>>,
    store: Arc<SessionStore>,
    backend: Arc<dyn ChatBackend>,
) where
    T: ImTransport + 'static,
{
    let mut lanes: HashMap<String, mpsc::Sender<InboundMessage>> = HashMap::new();

    while let Some(msg) = inbound_rx.recv().await {
        let origin = match msg.origin {
            Origin::User => "user",
            Origin::Bot => "bot",
            Origin::Scheduler => "scheduler",
        };
        if !should_handle(&msg) {
            tracing::debug!(
                channel = channel_name(&msg.channel_id),
                chat_id = chat_id(&msg.channel_id),
                origin,
                "ignoring own message"
            );
            continue;
        }
        tracing::info!(
            channel = channel_name(&msg.channel_id),
            chat_id = chat_id(&msg.channel_id),
            from = %msg.author,
            origin,
            direction = "incoming",
            content = %truncate_content_default(&msg.text),
            "message received"
        );

        let lane = lanes.entry(msg.channel_id.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(LANE_CAPACITY);
            tokio::spawn(run_lane(rx, Arc::clone(&outbound), Arc::clone(&store), Arc::clone(&backend)));
            tx
        });
        let sent = lane.send(msg).await;
        if let Err(mpsc::error::SendError(msg)) = sent {
            // Lane task ended (it panicked); start a fresh one for this channel.
            let (tx, rx) = mpsc::channel(LANE_CAPACITY);
            tokio::spawn(run_lane(rx, Arc::clone(&outbound), Arc::clone(&store), Arc::clone(&backend)));
            let channel_id = msg.channel_id.clone();
            if let Err(mpsc::error::SendError(msg)) = tx.send(msg).await {
                tracing::warn!(
                    channel = channel_name(&channel_id),
                    chat_id = chat_id(&channel_id),
                    content = %truncate_content_default(&msg.text),
                    "lane restart failed, message dropped"
                );
            }
            lanes.insert(channel_id, tx);
        }
    }
    tracing::info!("inbound queue closed, worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatMessage;
    use crate::im::testing::{wait_until, RecordingTransport, ScriptedBackend};

    struct Harness {
        transport: Arc<RecordingTransport>,
        store: Arc<SessionStore>,
        backend: Arc<ScriptedBackend>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    }

    fn start(script: Vec<Result<String, String>>) -> Harness {
        start_with(ScriptedBackend::new(script))
    }

    fn start_with(backend: ScriptedBackend) -> Harness {
        let transport = Arc::new(RecordingTransport::new(2000));
        let outbound = OutboundHub::new(Arc::clone(&transport));
        let store = Arc::new(SessionStore::new());
        let backend = Arc::new(backend);
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        tokio::spawn(run_worker(inbound_rx, outbound, Arc::clone(&store), backend.clone() as Arc<dyn ChatBackend>));
        Harness { transport, store, backend, inbound_tx }
    }

    fn user(channel: &str, text: &str) -> InboundMessage {
        InboundMessage::from_user(channel.into(), text.into(), "alice".into())
    }

    #[test]
    fn guard_checks_origin_not_content() {
        let prompt = crate::briefing::BRIEFING_PROMPT.to_string();
        assert!(!should_handle(&InboundMessage::from_bot("discord:1".into(), prompt.clone())));
        assert!(!should_handle(&InboundMessage::from_bot("discord:1".into(), "hi".into())));
        assert!(should_handle(&InboundMessage::from_scheduler("discord:1".into(), prompt)));
        assert!(should_handle(&user("discord:1", "hi")));
    }

    #[tokio::test(start_paused = true)]
    async fn hello_gets_ok_and_one_session() {
        let h = start(vec![Ok("OK".into())]);

        h.inbound_tx.send(user("test:1", "hello")).await.unwrap();

        wait_until(500, || !h.transport.sent().is_empty()).await;
        assert_eq!(h.transport.sent_to("test:1"), vec!["OK"]);
        assert_eq!(h.transport.typing(), vec!["test:1".to_string()]);
        assert_eq!(h.store.len(), 1);
        assert!(h.store.contains("test:1"));
        assert_eq!(
            h.store.history("test:1").await.unwrap(),
            vec![ChatMessage::user("hello"), ChatMessage::model("OK")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn typing_stays_up_during_slow_backend_call() {
        let h = start_with(ScriptedBackend::new(vec![Ok("slow answer".into())]).with_delay(Duration::from_secs(45)));

        h.inbound_tx.send(user("test:1", "think hard")).await.unwrap();

        wait_until(10_000, || !h.transport.sent().is_empty()).await;
        // One before the call, then one per refresh period while it runs.
        let typing = h.transport.typing().len();
        assert!(typing >= 45 / TYPING_REFRESH.as_secs() as usize, "typing sent {} times", typing);
        assert_eq!(h.transport.sent_to("test:1"), vec!["slow answer"]);

        // Nothing more once the reply is out.
        tokio::time::sleep(TYPING_REFRESH * 3).await;
        assert_eq!(h.transport.typing().len(), typing);
    }

    #[tokio::test(start_paused = true)]
    async fn own_messages_are_dropped_without_session() {
        let h = start(vec![Ok("should not be used".into()), Ok("OK".into())]);

        h.inbound_tx
            .send(InboundMessage::from_bot("test:1".into(), "our earlier reply".into()))
            .await
            .unwrap();
        h.inbound_tx
            .send(InboundMessage::from_bot("test:1".into(), crate::briefing::BRIEFING_PROMPT.into()))
            .await
            .unwrap();
        // A later user message in another channel proves the bot messages were consumed.
        h.inbound_tx.send(user("test:2", "ping")).await.unwrap();

        wait_until(500, || !h.transport.sent().is_empty()).await;
        assert!(h.transport.sent_to("test:1").is_empty());
        assert!(!h.store.contains("test:1"));
        assert_eq!(h.backend.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_message_flows_through_session() {
        let h = start(vec![Ok("briefing reply".into())]);

        h.inbound_tx
            .send(InboundMessage::from_scheduler("test:9".into(), crate::briefing::BRIEFING_PROMPT.into()))
            .await
            .unwrap();

        wait_until(500, || !h.transport.sent().is_empty()).await;
        assert_eq!(h.transport.sent_to("test:9"), vec!["briefing reply"]);
        let history = h.store.history("test:9").await.unwrap();
        assert_eq!(history[0], ChatMessage::user(crate::briefing::BRIEFING_PROMPT));
    }

    #[tokio::test(start_paused = true)]
    async fn backend_failure_sends_nothing_and_lane_keeps_going() {
        let h = start(vec![Ok("first".into()), Err("network down".into()), Ok("third".into())]);

        for text in ["one", "two", "three"] {
            h.inbound_tx.send(user("test:1", text)).await.unwrap();
        }

        wait_until(500, || h.transport.sent().len() == 2).await;
        assert_eq!(h.transport.sent_to("test:1"), vec!["first", "third"]);
        // The failed turn never made it into the history the third call saw.
        let third_call = &h.backend.calls()[2];
        assert_eq!(third_call.len(), 3);
        assert_eq!(third_call[2], ChatMessage::user("three"));
    }

    #[tokio::test(start_paused = true)]
    async fn same_channel_messages_are_answered_in_order() {
        let h = start(vec![Ok("a".into()), Ok("b".into()), Ok("c".into())]);

        for text in ["1", "2", "3"] {
            h.inbound_tx.send(user("test:1", text)).await.unwrap();
        }

        wait_until(500, || h.transport.sent().len() == 3).await;
        let history = h.store.history("test:1").await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["1", "a", "2", "b", "3", "c"]);
    }
}
