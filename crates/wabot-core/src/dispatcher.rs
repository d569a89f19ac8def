//! Fan-out of inbound message batches to the registered handlers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::{
    domain::{DeliveryMode, InboundMessage, MessageBatch},
    transport::Session,
    Result,
};

/// A stateless reaction to one inbound message.
///
/// Handlers see the same immutable message and never depend on each other's
/// output. An `Err` is logged by the dispatcher and otherwise ignored.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, session: &dyn Session, msg: &InboundMessage) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages that went through the handler chain.
    pub dispatched: usize,
    /// Messages dropped before any handler ran (backfill, self-sent, no body).
    pub skipped: usize,
    /// Handler invocations that returned an error or panicked.
    pub failures: usize,
}

/// Ordered handler registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn Handler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; handlers run in registration order.
    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Process one batch from the transport.
    ///
    /// Only live batches are dispatched; backfilled history must never
    /// re-trigger replies. Within a batch, messages are handled in delivery
    /// order and each handler runs to completion before the next one starts.
    pub async fn on_batch(&self, session: Arc<dyn Session>, batch: MessageBatch) -> DispatchReport {
        let mut report = DispatchReport::default();

        if batch.mode != DeliveryMode::Live {
            debug!(count = batch.messages.len(), "ignoring backfill batch");
            report.skipped = batch.messages.len();
            return report;
        }

        for msg in batch.messages {
            if !is_dispatchable(&msg) {
                report.skipped += 1;
                continue;
            }
            report.dispatched += 1;

            let msg = Arc::new(msg);
            for handler in &self.handlers {
                // Each invocation gets its own task so a panic is contained too.
                let task = {
                    let handler = handler.clone();
                    let session = session.clone();
                    let msg = msg.clone();
                    tokio::spawn(async move { handler.handle(session.as_ref(), &msg).await })
                };

                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        report.failures += 1;
                        warn!(
                            handler = handler.name(),
                            chat = %msg.chat(),
                            message_id = %msg.key.id,
                            error = %e,
                            "handler failed"
                        );
                    }
                    Err(e) => {
                        report.failures += 1;
                        error!(
                            handler = handler.name(),
                            chat = %msg.chat(),
                            message_id = %msg.key.id,
                            error = %e,
                            "handler panicked"
                        );
                    }
                }
            }
        }

        report
    }
}

/// Self-sent messages and events without a body never reach handlers.
pub fn is_dispatchable(msg: &InboundMessage) -> bool {
    msg.has_content() && !msg.is_from_me()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::Error,
        testing::{text_message, FakeSession},
    };
    use std::sync::Mutex;

    /// Records `(handler, message id)` for every call into a shared log.
    struct Probe {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, String)>>>,
        behavior: Behavior,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        Fail,
        Panic,
    }

    #[async_trait]
    impl Handler for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, _session: &dyn Session, msg: &InboundMessage) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push((self.name, msg.key.id.clone()));
            match self.behavior {
                Behavior::Ok => Ok(()),
                Behavior::Fail => Err(Error::External("boom".to_string())),
                Behavior::Panic => panic!("handler bug"),
            }
        }
    }

    fn dispatcher_with(
        behaviors: &[(&'static str, Behavior)],
    ) -> (EventDispatcher, Arc<Mutex<Vec<(&'static str, String)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut d = EventDispatcher::new();
        for &(name, behavior) in behaviors {
            d = d.with_handler(Arc::new(Probe {
                name,
                log: log.clone(),
                behavior,
            }));
        }
        (d, log)
    }

    fn live(messages: Vec<InboundMessage>) -> MessageBatch {
        MessageBatch {
            mode: DeliveryMode::Live,
            messages,
        }
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order_per_message() {
        let (d, log) = dispatcher_with(&[("a", Behavior::Ok), ("b", Behavior::Ok)]);
        let session: Arc<dyn Session> = Arc::new(FakeSession::default());

        let report = d
            .on_batch(
                session,
                live(vec![
                    text_message("1@s.whatsapp.net", "M1", "hi"),
                    text_message("2@s.whatsapp.net", "M2", "yo"),
                ]),
            )
            .await;

        assert_eq!(report.dispatched, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("a", "M1".to_string()),
                ("b", "M1".to_string()),
                ("a", "M2".to_string()),
                ("b", "M2".to_string()),
            ]
        );
        assert_eq!(d.handler_names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_do_not_stop_the_chain() {
        let (d, log) = dispatcher_with(&[
            ("fails", Behavior::Fail),
            ("panics", Behavior::Panic),
            ("after", Behavior::Ok),
        ]);
        let session: Arc<dyn Session> = Arc::new(FakeSession::default());

        let report = d
            .on_batch(
                session,
                live(vec![
                    text_message("1@s.whatsapp.net", "M1", "x"),
                    text_message("1@s.whatsapp.net", "M2", "y"),
                ]),
            )
            .await;

        assert_eq!(report.failures, 4);
        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.len(), 6);
        assert!(calls.contains(&("after", "M1".to_string())));
        assert!(calls.contains(&("after", "M2".to_string())));
    }

    #[tokio::test]
    async fn self_sent_and_bodyless_messages_are_skipped() {
        let (d, log) = dispatcher_with(&[("a", Behavior::Ok)]);
        let session: Arc<dyn Session> = Arc::new(FakeSession::default());

        let mut mine = text_message("1@s.whatsapp.net", "M1", ",menu");
        mine.key.from_me = true;
        let mut empty = text_message("1@s.whatsapp.net", "M2", "");
        empty.content = None;

        let report = d.on_batch(session, live(vec![mine, empty])).await;

        assert_eq!(report.dispatched, 0);
        assert_eq!(report.skipped, 2);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backfill_batches_never_reach_handlers() {
        let (d, log) = dispatcher_with(&[("a", Behavior::Ok)]);
        let session: Arc<dyn Session> = Arc::new(FakeSession::default());

        let report = d
            .on_batch(
                session,
                MessageBatch {
                    mode: DeliveryMode::Backfill,
                    messages: vec![text_message("1@s.whatsapp.net", "M1", ",menu")],
                },
            )
            .await;

        assert_eq!(report.dispatched, 0);
        assert_eq!(report.skipped, 1);
        assert!(log.lock().unwrap().is_empty());
    }
}
