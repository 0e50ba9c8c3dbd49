//! Built-in consumers.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tenvis_relay_core::{ChannelLayer, Consumer, ConsumerError, Message};
use tracing::debug;

/// Send a response message on the request's reply channel.
async fn reply(
    layer: &dyn ChannelLayer,
    request: &Message,
    response: Message,
) -> Result<(), ConsumerError> {
    let channel = request
        .reply_channel()
        .ok_or_else(|| ConsumerError::failed("message has no reply_channel"))?;
    layer.send(channel, response).await?;
    Ok(())
}

fn response(status: u16, content_type: &str, content: Vec<u8>) -> Message {
    Message::new()
        .with("status", status)
        .with("headers", json!([["content-type", content_type]]))
        .with("content", Value::from(content))
}

fn not_found() -> Message {
    response(404, "text/plain", b"Not Found".to_vec())
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Serves files under a URL prefix from a directory, replying on the
/// request's `reply_channel`. Other paths go to the fallback consumer.
pub struct StaticFilesConsumer {
    layer: Arc<dyn ChannelLayer>,
    root: PathBuf,
    url: String,
    fallback: Option<Arc<dyn Consumer>>,
}

impl StaticFilesConsumer {
    /// Serve `root` under the URL prefix `url`.
    #[must_use]
    pub fn new(
        layer: Arc<dyn ChannelLayer>,
        root: impl Into<PathBuf>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            layer,
            root: root.into(),
            url: url.into(),
            fallback: None,
        }
    }

    /// Hand non-static requests to another consumer.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Option<Arc<dyn Consumer>>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Map a request path to a file under the root, refusing anything that
    /// would escape it.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.strip_prefix(&self.url)?);
        if relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            Some(self.root.join(relative))
        } else {
            None
        }
    }

    async fn serve(&self, path: &str, message: &Message) -> Result<(), ConsumerError> {
        let Some(file) = self.resolve(path) else {
            debug!(path = %path, "Rejected static path");
            return reply(self.layer.as_ref(), message, not_found()).await;
        };

        let result = match tokio::fs::read(&file).await {
            Ok(content) => response(200, content_type(&file), content),
            Err(e) => {
                debug!(path = %path, error = %e, "Static file unavailable");
                not_found()
            }
        };
        reply(self.layer.as_ref(), message, result).await
    }
}

#[async_trait]
impl Consumer for StaticFilesConsumer {
    async fn handle(&self, channel: &str, message: Message) -> Result<(), ConsumerError> {
        let path = message.get_str("path").unwrap_or_default().to_string();

        if path.starts_with(&self.url) {
            return self.serve(&path, &message).await;
        }

        match &self.fallback {
            Some(fallback) => fallback.handle(channel, message).await,
            None => reply(self.layer.as_ref(), &message, not_found()).await,
        }
    }

    fn name(&self) -> &str {
        "static-files"
    }
}

/// Replies with the message it received. The demo front-door consumer.
pub struct EchoConsumer {
    layer: Arc<dyn ChannelLayer>,
}

impl EchoConsumer {
    /// Create an echo consumer replying through `layer`.
    #[must_use]
    pub fn new(layer: Arc<dyn ChannelLayer>) -> Self {
        Self { layer }
    }
}

#[async_trait]
impl Consumer for EchoConsumer {
    async fn handle(&self, _channel: &str, message: Message) -> Result<(), ConsumerError> {
        let echoed = message.clone();
        reply(self.layer.as_ref(), &message, echoed).await
    }

    fn name(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenvis_relay_core::{consumer_fn, InMemoryChannelLayer};

    async fn request(layer: &InMemoryChannelLayer, path: &str) -> (String, Message) {
        let reply_channel = layer.new_channel("http.response").await.unwrap();
        let message = Message::new()
            .with("path", path)
            .with("reply_channel", reply_channel.clone());
        (reply_channel, message)
    }

    async fn take(layer: &InMemoryChannelLayer, channel: &str) -> Message {
        layer
            .receive(&[channel.to_string()], false)
            .await
            .unwrap()
            .expect("no reply sent")
            .1
    }

    fn static_consumer(layer: &Arc<InMemoryChannelLayer>, root: &Path) -> StaticFilesConsumer {
        StaticFilesConsumer::new(layer.clone(), root, "/static/")
    }

    #[tokio::test]
    async fn test_serves_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.css"), "body {}").unwrap();
        let layer = Arc::new(InMemoryChannelLayer::new());
        let consumer = static_consumer(&layer, dir.path());

        let (reply_channel, message) = request(&layer, "/static/app.css").await;
        consumer.handle("http.request", message).await.unwrap();

        let response = take(&layer, &reply_channel).await;
        assert_eq!(response.get("status"), Some(&json!(200)));
        assert_eq!(response.get("content"), Some(&Value::from(b"body {}".to_vec())));
        assert_eq!(
            response.get("headers"),
            Some(&json!([["content-type", "text/css"]]))
        );
    }

    #[tokio::test]
    async fn test_missing_and_traversal_are_404() {
        let dir = tempfile::tempdir().unwrap();
        let layer = Arc::new(InMemoryChannelLayer::new());
        let consumer = static_consumer(&layer, dir.path());

        for path in ["/static/missing.js", "/static/../secret.txt", "/static//etc/passwd"] {
            let (reply_channel, message) = request(&layer, path).await;
            consumer.handle("http.request", message).await.unwrap();
            let response = take(&layer, &reply_channel).await;
            assert_eq!(response.get("status"), Some(&json!(404)), "{path}");
        }
    }

    #[tokio::test]
    async fn test_non_static_goes_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let layer = Arc::new(InMemoryChannelLayer::new());
        let fallback: Arc<dyn Consumer> = Arc::new(EchoConsumer::new(layer.clone()));
        let consumer = static_consumer(&layer, dir.path()).with_fallback(Some(fallback));

        let (reply_channel, message) = request(&layer, "/api/items").await;
        consumer.handle("http.request", message.clone()).await.unwrap();
        assert_eq!(take(&layer, &reply_channel).await, message);
    }

    #[tokio::test]
    async fn test_non_static_without_fallback_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let layer = Arc::new(InMemoryChannelLayer::new());
        let consumer = static_consumer(&layer, dir.path());

        let (reply_channel, message) = request(&layer, "/").await;
        consumer.handle("http.request", message).await.unwrap();
        assert_eq!(
            take(&layer, &reply_channel).await.get("status"),
            Some(&json!(404))
        );
    }

    #[tokio::test]
    async fn test_fallback_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let layer = Arc::new(InMemoryChannelLayer::new());
        let failing: Arc<dyn Consumer> = Arc::new(consumer_fn("view", |_c, _m| async {
            Err(ConsumerError::failed("view broke"))
        }));
        let consumer = static_consumer(&layer, dir.path()).with_fallback(Some(failing));

        let err = consumer
            .handle("http.request", Message::new().with("path", "/"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("view broke"));
    }

    #[tokio::test]
    async fn test_echo_requires_reply_channel() {
        let layer = Arc::new(InMemoryChannelLayer::new());
        let echo = EchoConsumer::new(layer.clone());
        assert!(echo.handle("http.request", Message::new()).await.is_err());
        assert_eq!(echo.name(), "echo");
    }
}
