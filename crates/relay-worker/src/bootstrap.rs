//! Turns a [`Config`] and an application's routes into running workers.
//!
//! The sequence is fixed: build the layer, refuse a process-local layer in a
//! multi-process deployment, register routes, run the pre-check hook,
//! validate the default channel, then build and ready the workers.

use crate::config::{Config, LayerConfig};
use crate::consumers::StaticFilesConsumer;
use crate::metrics::MetricsObserver;
use std::sync::Arc;
use tenvis_relay_core::{
    ChannelFilter, ChannelLayer, Consumer, InMemoryChannelLayer, LoggingObserver, ObserverChain,
    Router, RouterError, Shutdown, Worker, WorkerError, WorkerGroup, WorkerObserver, WorkerStats,
};
use thiserror::Error;
use tracing::{debug, info};

/// Fatal errors raised before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No layer backend with this name.
    #[error("Unknown channel layer backend: {0}")]
    UnknownBackend(String),

    /// A process-local layer cannot be shared between processes.
    #[error("You cannot span {processes} processes with the {layer} layer; it is process-local")]
    LocalOnlyLayer {
        /// Layer name.
        layer: String,
        /// Configured process count.
        processes: usize,
    },

    /// Route registration or default channel validation failed.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// A worker could not be built or made ready.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Build the channel layer named by `config.backend`.
///
/// # Errors
///
/// Returns [`ConfigurationError::UnknownBackend`] for an unrecognized name.
pub fn build_layer(config: &LayerConfig) -> Result<Arc<dyn ChannelLayer>, ConfigurationError> {
    match config.backend.as_str() {
        "memory" | "inmemory" | "in-memory" => Ok(Arc::new(InMemoryChannelLayer::with_config(
            config.in_memory(),
        ))),
        other => Err(ConfigurationError::UnknownBackend(other.to_string())),
    }
}

/// Refuse to run a process-local layer across several processes.
///
/// # Errors
///
/// Returns [`ConfigurationError::LocalOnlyLayer`] if `layer` is local-only
/// and `processes` is greater than one.
pub fn check_locality(
    layer: &dyn ChannelLayer,
    processes: usize,
) -> Result<(), ConfigurationError> {
    if layer.local_only() && processes > 1 {
        return Err(ConfigurationError::LocalOnlyLayer {
            layer: layer.name().to_string(),
            processes,
        });
    }
    Ok(())
}

/// Points where an embedding application can hook into startup.
pub trait BootstrapHooks: Send + Sync {
    /// Called with the fully registered router, before the default channel is
    /// validated.
    fn before_check_default(&self, _router: &Router) {}

    /// Called once every worker in the process is ready.
    fn workers_ready(&self, _workers: usize) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl BootstrapHooks for NoHooks {}

/// Either one worker or a pool of them.
#[derive(Debug)]
pub enum Runner {
    /// A single worker on the current task.
    Single(Worker),
    /// Several workers sharing the layer and router.
    Group(WorkerGroup),
}

impl Runner {
    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Runner::Single(_) => 1,
            Runner::Group(group) => group.len(),
        }
    }

    /// Always false.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ready every worker.
    ///
    /// # Errors
    ///
    /// Returns the first worker error.
    pub fn ready(&mut self) -> Result<(), WorkerError> {
        match self {
            Runner::Single(worker) => worker.ready(),
            Runner::Group(group) => group.ready(),
        }
    }

    /// Run until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidState`] if the workers are not ready.
    pub async fn run(&mut self, shutdown: Shutdown) -> Result<WorkerStats, WorkerError> {
        match self {
            Runner::Single(worker) => worker.run(shutdown).await,
            Runner::Group(group) => group.run(shutdown).await,
        }
    }
}

/// Builder for a worker process.
pub struct Bootstrap {
    config: Config,
    hooks: Arc<dyn BootstrapHooks>,
    observers: Vec<Arc<dyn WorkerObserver>>,
}

impl Bootstrap {
    /// Start from a loaded configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            hooks: Arc::new(NoHooks),
            observers: Vec::new(),
        }
    }

    /// Install startup hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn BootstrapHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Add an observer attached to every worker, after the built-in ones.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn observer(&self) -> Option<Arc<dyn WorkerObserver>> {
        let mut chain = ObserverChain::new();
        if self.config.metrics.enabled {
            chain = chain.with(Arc::new(MetricsObserver));
        }
        if self.config.worker.verbosity > 1 {
            chain = chain.with(Arc::new(LoggingObserver));
        }
        for observer in &self.observers {
            chain = chain.with(observer.clone());
        }
        (!chain.is_empty()).then(|| Arc::new(chain) as Arc<dyn WorkerObserver>)
    }

    fn static_override(
        &self,
        layer: &Arc<dyn ChannelLayer>,
        router: &Router,
    ) -> Option<Arc<dyn Consumer>> {
        if !self.config.debug {
            return None;
        }
        let root = self.config.static_files.root.as_ref()?;
        let fallback = router.resolve(router.default_channel()).ok();
        info!(root = %root.display(), url = %self.config.static_files.url, "Serving static files");
        Some(Arc::new(
            StaticFilesConsumer::new(layer.clone(), root, self.config.static_files.url.clone())
                .with_fallback(fallback),
        ))
    }

    /// Build the layer, routes and workers, and make every worker ready.
    ///
    /// `routes` registers the application's consumers against the layer the
    /// process will use.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] for anything that must stop the
    /// process before it consumes a message.
    pub fn prepare<F>(self, routes: F) -> Result<Prepared, ConfigurationError>
    where
        F: FnOnce(&mut Router, &Arc<dyn ChannelLayer>) -> Result<(), RouterError>,
    {
        let layer = build_layer(&self.config.layer)?;
        check_locality(layer.as_ref(), self.config.worker.processes)?;

        let mut router = Router::with_default_channel(self.config.worker.default_channel.clone());
        routes(&mut router, &layer)?;
        debug!(routes = router.len(), "Routes registered");

        self.hooks.before_check_default(&router);
        let override_consumer = self.static_override(&layer, &router);
        router.check_default(override_consumer)?;
        let router = Arc::new(router);

        let filter = ChannelFilter::new(
            &self.config.worker.only_channels,
            &self.config.worker.exclude_channels,
        )?;

        let threads = self.config.worker.threads;
        let mut runner = if threads <= 1 {
            info!("Using single-threaded worker.");
            let mut worker = Worker::new(layer.clone(), router.clone()).with_filter(filter);
            if let Some(observer) = self.observer() {
                worker = worker.with_observer(observer);
            }
            Runner::Single(worker)
        } else {
            info!("Using multi-threaded worker, {} thread(s).", threads);
            let mut group =
                WorkerGroup::new(layer.clone(), router.clone(), threads)?.with_filter(filter);
            if let Some(observer) = self.observer() {
                group = group.with_observer(observer);
            }
            Runner::Group(group)
        };

        info!(layer = layer.name(), "Running worker against channel layer {}", layer.name());
        runner.ready()?;
        self.hooks.workers_ready(runner.len());

        Ok(Prepared {
            layer,
            router,
            runner,
        })
    }
}

/// Workers that are ready to run.
#[derive(Debug)]
pub struct Prepared {
    layer: Arc<dyn ChannelLayer>,
    router: Arc<Router>,
    runner: Runner,
}

impl Prepared {
    /// The process's channel layer.
    #[must_use]
    pub fn layer(&self) -> &Arc<dyn ChannelLayer> {
        &self.layer
    }

    /// The validated routing table.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The workers.
    #[must_use]
    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Consume messages until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Worker`] if a worker cannot start.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<WorkerStats, ConfigurationError> {
        let stats = self.runner.run(shutdown).await?;
        info!(
            received = stats.received,
            processed = stats.processed,
            consumer_errors = stats.consumer_errors,
            routing_errors = stats.routing_errors,
            "Worker stopped"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::EchoConsumer;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tenvis_relay_core::{consumer_fn, shutdown, ConsumerError, Message};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.metrics.enabled = false;
        config.layer.receive_timeout_ms = 20;
        config
    }

    fn echo_routes(router: &mut Router, layer: &Arc<dyn ChannelLayer>) -> Result<(), RouterError> {
        router.register("http.request", Arc::new(EchoConsumer::new(layer.clone())))?;
        Ok(())
    }

    fn noop() -> Arc<dyn Consumer> {
        Arc::new(consumer_fn("noop", |_c, _m| async { Ok::<(), ConsumerError>(()) }))
    }

    #[test]
    fn test_local_only_layer_rejects_many_processes() {
        let mut config = test_config();
        config.worker.processes = 2;

        let err = Bootstrap::new(config).prepare(echo_routes).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::LocalOnlyLayer { processes: 2, .. }
        ));
        assert!(err.to_string().contains("cannot span 2 processes"));
    }

    #[test]
    fn test_local_only_layer_allows_one_process_many_threads() {
        let mut config = test_config();
        config.worker.threads = 3;

        let prepared = Bootstrap::new(config).prepare(echo_routes).unwrap();
        assert!(matches!(prepared.runner(), Runner::Group(g) if g.len() == 3));
    }

    #[test]
    fn test_unknown_backend() {
        let mut config = test_config();
        config.layer.backend = "redis".into();

        let err = Bootstrap::new(config).prepare(echo_routes).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownBackend(name) if name == "redis"));
    }

    #[test]
    fn test_missing_default_consumer_is_fatal() {
        let err = Bootstrap::new(test_config())
            .prepare(|router, _layer| {
                router.register("jobs", noop())?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::Router(RouterError::NoDefaultConsumer(_))
        ));
    }

    #[test]
    fn test_single_worker_for_one_thread() {
        let prepared = Bootstrap::new(test_config()).prepare(echo_routes).unwrap();
        assert!(matches!(prepared.runner(), Runner::Single(_)));
        assert_eq!(prepared.runner().len(), 1);
        assert_eq!(prepared.router().channels(), vec!["http.request"]);
    }

    #[test]
    fn test_filters_excluding_everything_fail_ready() {
        let mut config = test_config();
        config.worker.exclude_channels = vec!["*".into()];

        let err = Bootstrap::new(config).prepare(echo_routes).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::Worker(WorkerError::NoChannels(0))
        ));
    }

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<String>>,
    }

    impl BootstrapHooks for RecordingHooks {
        fn before_check_default(&self, router: &Router) {
            self.events
                .lock()
                .unwrap()
                .push(format!("check_default:{}", router.len()));
        }

        fn workers_ready(&self, workers: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("ready:{workers}"));
        }
    }

    #[test]
    fn test_hooks_called_in_order() {
        let hooks = Arc::new(RecordingHooks::default());
        let mut config = test_config();
        config.worker.threads = 2;

        Bootstrap::new(config)
            .with_hooks(hooks.clone())
            .prepare(echo_routes)
            .unwrap();

        assert_eq!(
            *hooks.events.lock().unwrap(),
            vec!["check_default:1".to_string(), "ready:2".to_string()]
        );
    }

    #[test]
    fn test_hook_runs_even_when_check_default_fails() {
        let hooks = Arc::new(RecordingHooks::default());
        let result = Bootstrap::new(test_config())
            .with_hooks(hooks.clone())
            .prepare(|_router, _layer| Ok(()));

        assert!(result.is_err());
        assert_eq!(*hooks.events.lock().unwrap(), vec!["check_default:0".to_string()]);
    }

    #[tokio::test]
    async fn test_debug_static_files_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<p>hi</p>").unwrap();

        let mut config = test_config();
        config.debug = true;
        config.static_files.root = Some(dir.path().to_path_buf());

        // No default consumer registered; the static override supplies one
        let prepared = Bootstrap::new(config)
            .prepare(|router, _layer| {
                router.register("jobs", noop())?;
                Ok(())
            })
            .unwrap();

        let consumer = prepared.router().resolve("http.request").unwrap();
        assert_eq!(consumer.name(), "static-files");

        let layer = prepared.layer().clone();
        let reply_channel = layer.new_channel("http.response").await.unwrap();
        let request = Message::new()
            .with("path", "/static/index.html")
            .with("reply_channel", reply_channel.clone());
        consumer.handle("http.request", request).await.unwrap();

        let (_, response) = layer
            .receive(&[reply_channel], false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.get("status"), Some(&json!(200)));
    }

    #[tokio::test]
    async fn test_prepared_run_round_trip() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        let prepared = Bootstrap::new(test_config())
            .prepare(move |router, layer| {
                echo_routes(router, layer)?;
                router.register(
                    "jobs",
                    Arc::new(consumer_fn("jobs", move |_c, _m| {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok::<(), ConsumerError>(())
                        }
                    })),
                )?;
                Ok(())
            })
            .unwrap();

        let layer = prepared.layer().clone();
        let reply_channel = layer.new_channel("http.response").await.unwrap();
        layer
            .send(
                "http.request",
                Message::new()
                    .with("path", "/")
                    .with("reply_channel", reply_channel.clone()),
            )
            .await
            .unwrap();
        layer.send("jobs", Message::new()).await.unwrap();

        let (trigger, signal) = shutdown::channel();
        let handle = tokio::spawn(prepared.run(signal));

        let reply = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some((_, message)) =
                    layer.receive(&[reply_channel.clone()], true).await.unwrap()
                {
                    return message;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reply.get_str("path"), Some("/"));

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        trigger.trigger();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.routing_errors, 0);
    }
}
