use std::sync::Arc;

use relay_core::{ConnectionId, PushOutcome, TopicCatalog, Transport};
use relay_store::SubscriptionStore;
use relay_telemetry::MetricsRecorder;

use crate::protocol::{
    parse_command, Action, Command, CommandResponse, Outbound, SUBSCRIBED, UNSUBSCRIBED,
};

/// Applies subscribe/unsubscribe requests from a connection.
///
/// Every request, valid or not, produces exactly one push back to the
/// requesting connection: the acknowledgment or the error.
pub struct CommandHandler {
    store: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn Transport>,
    catalog: TopicCatalog,
    metrics: Arc<MetricsRecorder>,
}

impl CommandHandler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn Transport>,
        catalog: TopicCatalog,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            store,
            transport,
            catalog,
            metrics,
        }
    }

    /// Handle one raw inbound frame.
    pub async fn handle(&self, connection_id: &ConnectionId, raw: &str) -> CommandResponse {
        match parse_command(raw, &self.catalog) {
            Ok(command) => self.handle_command(connection_id, &command).await,
            Err(rejection) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    reason = %rejection,
                    "rejected malformed request"
                );
                self.metrics.counter_inc(
                    "relay_commands_total",
                    &[("action", "invalid"), ("status", "error")],
                    1,
                );
                let response = CommandResponse::error(rejection.to_string());
                self.reply(connection_id, &response).await;
                response
            }
        }
    }

    /// Apply an already validated command.
    pub async fn handle_command(
        &self,
        connection_id: &ConnectionId,
        command: &Command,
    ) -> CommandResponse {
        let result = match command.action {
            Action::Subscribe => self.store.put(connection_id, &command.topic).await,
            Action::Unsubscribe => self.store.delete(connection_id, &command.topic).await,
        };

        let response = match result {
            Ok(()) => {
                tracing::info!(
                    connection_id = %connection_id,
                    topic = %command.topic,
                    action = command.action.as_str(),
                    "subscription updated"
                );
                CommandResponse::success(match command.action {
                    Action::Subscribe => SUBSCRIBED,
                    Action::Unsubscribe => UNSUBSCRIBED,
                })
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    topic = %command.topic,
                    action = command.action.as_str(),
                    error = %e,
                    "subscription update failed"
                );
                CommandResponse::error(format!("{} failed: {e}", command.action.as_str()))
            }
        };

        self.metrics.counter_inc(
            "relay_commands_total",
            &[
                ("action", command.action.as_str()),
                ("status", response.status.as_str()),
            ],
            1,
        );
        self.reply(connection_id, &response).await;
        response
    }

    async fn reply(&self, connection_id: &ConnectionId, response: &CommandResponse) {
        let frame = match Outbound::Response(response.clone()).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode response frame");
                return;
            }
        };
        match self.transport.push(connection_id, &frame).await {
            PushOutcome::Delivered => {}
            outcome => {
                tracing::debug!(connection_id = %connection_id, %outcome, "response not delivered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::protocol::CommandStatus;
    use relay_core::Topic;
    use relay_store::{FaultyStore, MemorySubscriptionStore, StoreOp};

    struct Fixture {
        handler: CommandHandler,
        store: Arc<FaultyStore>,
        transport: Arc<MockTransport>,
        metrics: Arc<MetricsRecorder>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FaultyStore::new());
        let transport = Arc::new(MockTransport::new());
        let metrics = Arc::new(MetricsRecorder::new());
        let handler = CommandHandler::new(
            store.clone(),
            transport.clone(),
            TopicCatalog::default(),
            metrics.clone(),
        );
        Fixture {
            handler,
            store,
            transport,
            metrics,
        }
    }

    fn pushed_response(payload: &str) -> CommandResponse {
        match serde_json::from_str::<Outbound>(payload).unwrap() {
            Outbound::Response(resp) => resp,
            other => panic!("expected response frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_stores_and_acks() {
        let f = fixture();
        let c1 = ConnectionId::new();

        let resp = f
            .handler
            .handle(&c1, r#"{"action":"subscribe","subscription":"time"}"#)
            .await;

        assert_eq!(resp, CommandResponse::success(SUBSCRIBED));
        assert!(f.store.contains(&c1, &Topic::new("time")).await.unwrap());
        let pushes = f.transport.pushes_to(&c1);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushed_response(&pushes[0]), resp);
        assert_eq!(
            f.metrics.counter_get(
                "relay_commands_total",
                &[("action", "subscribe"), ("status", "success")]
            ),
            1
        );
    }

    #[tokio::test]
    async fn duplicate_subscribe_keeps_one_record_and_acks_each_time() {
        let f = fixture();
        let c1 = ConnectionId::new();
        let raw = r#"{"action":"subscribe","subscription":"time"}"#;

        assert!(f.handler.handle(&c1, raw).await.is_success());
        assert!(f.handler.handle(&c1, raw).await.is_success());

        assert_eq!(f.store.inner().len(), 1);
        assert_eq!(f.transport.pushes_to(&c1).len(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_never_subscribed_is_success() {
        let f = fixture();
        let c1 = ConnectionId::new();
        let other = ConnectionId::new();
        f.store.put(&other, &Topic::new("time")).await.unwrap();

        let resp = f
            .handler
            .handle(&c1, r#"{"action":"unsubscribe","subscription":"time"}"#)
            .await;

        assert_eq!(resp, CommandResponse::success(UNSUBSCRIBED));
        assert_eq!(f.store.inner().len(), 1);
        assert_eq!(f.transport.pushes_to(&c1).len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_topic() {
        let f = fixture();
        let c1 = ConnectionId::new();
        f.handler
            .handle(&c1, r#"{"action":"subscribe","subscription":"time"}"#)
            .await;
        f.handler
            .handle(&c1, r#"{"action":"subscribe","subscription":"location"}"#)
            .await;
        f.handler
            .handle(&c1, r#"{"action":"unsubscribe","subscription":"time"}"#)
            .await;

        assert_eq!(
            f.store.list_by_connection(&c1).await.unwrap(),
            vec![Topic::new("location")]
        );
    }

    #[tokio::test]
    async fn malformed_action_is_rejected_to_requester_only() {
        let f = fixture();
        let c1 = ConnectionId::new();
        let bystander = ConnectionId::new();
        f.store.put(&bystander, &Topic::new("time")).await.unwrap();

        let resp = f
            .handler
            .handle(&c1, r#"{"action":"publish","subscription":"time"}"#)
            .await;

        assert_eq!(resp.status, CommandStatus::Error);
        assert_eq!(resp.message, r#"Action: "publish" not supported"#);
        assert_eq!(f.store.inner().len(), 1);
        assert!(!f.store.contains(&c1, &Topic::new("time")).await.unwrap());

        let pushes = f.transport.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, c1);
        assert_eq!(pushed_response(&pushes[0].1), resp);
    }

    #[tokio::test]
    async fn unknown_topic_and_garbage_are_rejected() {
        let f = fixture();
        let c1 = ConnectionId::new();

        for raw in [
            r#"{"action":"subscribe","subscription":"weather"}"#,
            r#"{"action":"subscribe"}"#,
            "not json at all",
            r#"["subscribe","time"]"#,
        ] {
            let resp = f.handler.handle(&c1, raw).await;
            assert!(!resp.is_success(), "accepted {raw}");
        }

        assert!(f.store.inner().is_empty());
        assert_eq!(f.transport.pushes_to(&c1).len(), 4);
        assert_eq!(
            f.metrics.counter_get(
                "relay_commands_total",
                &[("action", "invalid"), ("status", "error")]
            ),
            4
        );
    }

    #[tokio::test]
    async fn store_failure_returns_error_not_ack() {
        let f = fixture();
        let c1 = ConnectionId::new();
        f.store.fail(StoreOp::Put);

        let resp = f
            .handler
            .handle(&c1, r#"{"action":"subscribe","subscription":"time"}"#)
            .await;

        assert_eq!(resp.status, CommandStatus::Error);
        assert!(resp.message.starts_with("subscribe failed:"));
        let pushes = f.transport.pushes_to(&c1);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushed_response(&pushes[0]).status, CommandStatus::Error);
        assert!(f.store.inner().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_store_failure_returns_error() {
        let f = fixture();
        let c1 = ConnectionId::new();
        f.store.fail(StoreOp::Delete);

        let resp = f
            .handler
            .handle(&c1, r#"{"action":"unsubscribe","subscription":"time"}"#)
            .await;
        assert!(resp.message.starts_with("unsubscribe failed:"));
        assert_eq!(f.transport.pushes_to(&c1).len(), 1);
    }

    #[tokio::test]
    async fn undeliverable_reply_still_applies_command() {
        let store = Arc::new(MemorySubscriptionStore::new());
        let transport = Arc::new(MockTransport::new());
        let handler = CommandHandler::new(
            store.clone(),
            transport.clone(),
            TopicCatalog::default(),
            Arc::new(MetricsRecorder::new()),
        );
        let c1 = ConnectionId::new();
        transport.script(&c1, PushOutcome::TransientError("queue full".into()));

        let resp = handler
            .handle(&c1, r#"{"action":"subscribe","topic":"location"}"#)
            .await;
        assert!(resp.is_success());
        assert!(store.contains(&c1, &Topic::new("location")).await.unwrap());
    }
}
