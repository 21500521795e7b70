//! Feathers service facade.
//!
//! A [`Service`] names a remote resource collection and turns the CRUD verbs
//! into calls: `service.get("f0001", json!({}))` sends
//! `{"id":1,"type":0,"data":["get","devices","f0001",{}]}`.

use serde_json::Value;

use super::bus::{MessageBus, PendingCall};
use crate::error::Result;

/// Builds the event name a service emits for an operation,
/// e.g. `service_event_name("devices", "patched") == "devices patched"`.
#[must_use]
pub fn service_event_name(service: &str, event: &str) -> String {
    format!("{service} {event}")
}

/// Handle to a named Feathers service on a connection.
///
/// Each verb issues one call and waits for its result. Server errors come
/// back as [`FeathersError::Server`](crate::FeathersError::Server); nothing
/// is retried.
#[derive(Clone)]
pub struct Service {
    bus: MessageBus,
    name: String,
}

impl Service {
    pub(crate) fn new(bus: MessageBus, name: &str) -> Self {
        Self {
            bus,
            name: name.to_string(),
        }
    }

    /// The service name, e.g. `"devices"`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the event this service emits for `event`
    /// (`created`, `updated`, `patched`, `removed`, ...).
    #[must_use]
    pub fn event_name(&self, event: &str) -> String {
        service_event_name(&self.name, event)
    }

    /// Finds records matching `params` (usually `{"query": {...}}`).
    pub async fn find(&self, params: impl Into<Value>) -> Result<Value> {
        self.call("find", vec![params.into()])?.await
    }

    /// Gets one record by id.
    pub async fn get(&self, id: impl Into<Value>, params: impl Into<Value>) -> Result<Value> {
        self.call("get", vec![id.into(), params.into()])?.await
    }

    /// Creates a record.
    pub async fn create(&self, data: impl Into<Value>, params: impl Into<Value>) -> Result<Value> {
        self.call("create", vec![data.into(), params.into()])?.await
    }

    /// Replaces a record.
    pub async fn update(
        &self,
        id: impl Into<Value>,
        data: impl Into<Value>,
        params: impl Into<Value>,
    ) -> Result<Value> {
        self.call("update", vec![id.into(), data.into(), params.into()])?.await
    }

    /// Merges `data` into a record.
    pub async fn patch(
        &self,
        id: impl Into<Value>,
        data: impl Into<Value>,
        params: impl Into<Value>,
    ) -> Result<Value> {
        self.call("patch", vec![id.into(), data.into(), params.into()])?.await
    }

    /// Removes a record.
    pub async fn remove(&self, id: impl Into<Value>, params: impl Into<Value>) -> Result<Value> {
        self.call("remove", vec![id.into(), params.into()])?.await
    }

    fn call(&self, method: &str, args: Vec<Value>) -> Result<PendingCall> {
        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Value::String(self.name.clone()));
        data.extend(args);
        self.bus.issue_call(method, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::bus::Outbound;
    use crate::error::FeathersError;
    use futures_util::StreamExt;
    use serde_json::json;

    /// Runs `op` against a fresh bus, answers the first outbound call with
    /// `reply`, and returns the wire text of the call plus the op's result.
    async fn exchange<F, Fut>(op: F, reply: &str) -> (String, Result<Value>)
    where
        F: FnOnce(Service) -> Fut,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        let (bus, mut rx) = MessageBus::new();
        let service = Service::new(bus.clone(), "devices");
        let task = tokio::spawn(op(service));

        let sent = match rx.next().await {
            Some(Outbound::Text(text)) => text,
            other => panic!("Expected call frame, got {other:?}"),
        };
        bus.process_frame(reply).await;

        (sent, task.await.unwrap())
    }

    #[tokio::test]
    async fn test_get() {
        let (sent, result) = exchange(
            |s| async move { s.get("f0001", json!({})).await },
            r#"{"id":1,"type":1,"data":[null,{"_id":"f0001"}]}"#,
        )
        .await;

        assert_eq!(sent, r#"{"id":1,"type":0,"data":["get","devices","f0001",{}]}"#);
        assert_eq!(result.unwrap(), json!({"_id": "f0001"}));
    }

    #[tokio::test]
    async fn test_update() {
        let (sent, result) = exchange(
            |s| async move {
                s.update(
                    "f0001",
                    json!({"_id": "f0001", "schedule": "[]"}),
                    json!({}),
                )
                .await
            },
            r#"{"id":1,"type":1,"data":[null,{"_id":"f0001","schedule":"[]"}]}"#,
        )
        .await;

        assert_eq!(
            sent,
            r#"{"id":1,"type":0,"data":["update","devices","f0001",{"_id":"f0001","schedule":"[]"},{}]}"#
        );
        assert_eq!(result.unwrap()["schedule"], json!("[]"));
    }

    #[tokio::test]
    async fn test_patch_remove_find_create_wire_format() {
        let (sent, _) = exchange(
            |s| async move { s.patch("f0001", json!({"status": "online"}), json!({})).await },
            r#"{"id":1,"type":1,"data":[null,{}]}"#,
        )
        .await;
        assert_eq!(
            sent,
            r#"{"id":1,"type":0,"data":["patch","devices","f0001",{"status":"online"},{}]}"#
        );

        let (sent, _) = exchange(
            |s| async move { s.remove("f0001", json!({})).await },
            r#"{"id":1,"type":1,"data":[null,{}]}"#,
        )
        .await;
        assert_eq!(sent, r#"{"id":1,"type":0,"data":["remove","devices","f0001",{}]}"#);

        let (sent, result) = exchange(
            |s| async move { s.find(json!({"query": {"status": "online"}})).await },
            r#"{"id":1,"type":1,"data":[null,[{"_id":"f0001"}]]}"#,
        )
        .await;
        assert_eq!(
            sent,
            r#"{"id":1,"type":0,"data":["find","devices",{"query":{"status":"online"}}]}"#
        );
        assert_eq!(result.unwrap(), json!([{"_id": "f0001"}]));

        let (sent, _) = exchange(
            |s| async move { s.create(json!({"name": "lamp"}), json!({})).await },
            r#"{"id":1,"type":1,"data":[null,{}]}"#,
        )
        .await;
        assert_eq!(sent, r#"{"id":1,"type":0,"data":["create","devices",{"name":"lamp"},{}]}"#);
    }

    #[tokio::test]
    async fn test_server_error_propagates() {
        let (_, result) = exchange(
            |s| async move { s.get("f0001", json!({})).await },
            r#"{"id":1,"type":1,"data":[{"name":"NotFound","message":"No record","code":404}]}"#,
        )
        .await;

        match result {
            Err(FeathersError::Server(err)) => assert_eq!(err.code(), Some(404)),
            other => panic!("Expected server error, got {other:?}"),
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(service_event_name("ezdevs", "patched"), "ezdevs patched");
        assert_eq!(
            service_event_name("ezdevs", "event:joyframe"),
            "ezdevs event:joyframe"
        );

        let (bus, _rx) = MessageBus::new();
        let service = Service::new(bus, "devices");
        assert_eq!(service.name(), "devices");
        assert_eq!(service.event_name("created"), "devices created");
    }
}
