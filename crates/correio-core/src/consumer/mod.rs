mod executor;

pub use executor::{Ack, ConsumerExecutor, ExecuteItem};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::GroupConfig;
use crate::error::{CodecError, RegistryError};
use crate::message::Message;

/// Invocation context handed to a subscriber handler: the decoded message
/// plus the resolved group and topic it was matched on.
#[derive(Debug, Clone)]
pub struct ConsumerContext {
    pub message: Message,
    pub group: String,
    pub topic: String,
}

impl ConsumerContext {
    /// Deserialize the message payload into the handler's expected type.
    pub fn body<T: serde::de::DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(serde_json::from_value(self.message.body.clone())?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.message.headers.get(name).map(String::as_str)
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Type-erased subscriber handler.
pub type Handler = Arc<dyn Fn(ConsumerContext) -> HandlerFuture + Send + Sync>;

/// Binds a resolved `(group, topic)` pair to a handler. Built once at
/// startup, immutable thereafter.
#[derive(Clone)]
pub struct ConsumerExecutorDescriptor {
    pub topic: String,
    pub group: String,
    pub(crate) handler: Handler,
}

impl std::fmt::Debug for ConsumerExecutorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerExecutorDescriptor")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Explicit subscriber registration. Application code registers
/// `(topic, group?) -> handler` pairs at startup; `build` resolves naming
/// rules and produces the immutable lookup table the executor consults.
#[derive(Default)]
pub struct ConsumerRegistryBuilder {
    bindings: Vec<(String, Option<String>, Handler)>,
}

impl ConsumerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to a topic in the default group.
    pub fn subscribe<F, Fut>(self, topic: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ConsumerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.bind(topic, None, handler)
    }

    /// Subscribe a handler to a topic in an explicit group.
    pub fn subscribe_group<F, Fut>(
        self,
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(ConsumerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let group = group.into();
        self.bind(topic, Some(group), handler)
    }

    fn bind<F, Fut>(mut self, topic: impl Into<String>, group: Option<String>, handler: F) -> Self
    where
        F: Fn(ConsumerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.bindings.push((topic.into(), group, handler));
        self
    }

    /// Resolve naming rules and build the immutable registry.
    ///
    /// Two bindings resolving to the same `(group, topic)` are a startup
    /// configuration error — reported here, never retried at runtime.
    pub fn build(self, config: &GroupConfig) -> Result<ConsumerRegistry, RegistryError> {
        let mut table = HashMap::new();
        for (topic, group, handler) in self.bindings {
            let group = resolve_group(group.as_deref(), config);
            let topic = resolve_topic(&topic, config);
            let key = (group.clone(), topic.clone());
            if table.contains_key(&key) {
                return Err(RegistryError::DuplicateBinding { group, topic });
            }
            table.insert(
                key,
                ConsumerExecutorDescriptor {
                    topic,
                    group,
                    handler,
                },
            );
        }
        Ok(ConsumerRegistry { table })
    }
}

/// Resolved group name: explicit group or the configured default, then the
/// version suffix, then the optional group-name prefix.
pub(crate) fn resolve_group(explicit: Option<&str>, config: &GroupConfig) -> String {
    let base = explicit.unwrap_or(&config.default_group);
    let versioned = format!("{base}.{}", config.version);
    match &config.group_prefix {
        Some(prefix) => format!("{prefix}.{versioned}"),
        None => versioned,
    }
}

/// Resolved topic name: the optional topic prefix prepended.
pub(crate) fn resolve_topic(topic: &str, config: &GroupConfig) -> String {
    match &config.topic_prefix {
        Some(prefix) => format!("{prefix}.{topic}"),
        None => topic.to_string(),
    }
}

/// Immutable `(group, topic) -> descriptor` table, looked up by exact match
/// on every inbound message.
#[derive(Debug)]
pub struct ConsumerRegistry {
    table: HashMap<(String, String), ConsumerExecutorDescriptor>,
}

impl ConsumerRegistry {
    /// An empty registry for publish-only applications.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    pub fn select(&self, group: &str, topic: &str) -> Option<&ConsumerExecutorDescriptor> {
        self.table.get(&(group.to_string(), topic.to_string()))
    }

    /// Distinct resolved group names, sorted for deterministic startup order.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self
            .table
            .keys()
            .map(|(group, _)| group.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        groups.sort();
        groups
    }

    /// Topics a group subscribes to, sorted.
    pub fn topics_for_group(&self, group: &str) -> Vec<String> {
        let mut topics: Vec<String> = self
            .table
            .keys()
            .filter(|(g, _)| g == group)
            .map(|(_, topic)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
