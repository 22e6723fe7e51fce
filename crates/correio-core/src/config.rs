use serde::Deserialize;

/// Top-level configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CorreioConfig {
    pub group: GroupConfig,
    pub retry: RetryConfig,
    pub dispatch: DispatchConfig,
}

/// Consumer group and topic naming rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Group used when a subscription does not name one.
    pub default_group: String,
    /// Optional prefix prepended to every resolved group name.
    pub group_prefix: Option<String>,
    /// Version suffix appended to every resolved group name.
    pub version: String,
    /// Optional prefix prepended to every topic name, on both the publish
    /// and subscribe sides.
    pub topic_prefix: Option<String>,
}

/// Retry sweeper and expiry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry ceiling — an envelope whose `retries` reaches this count is
    /// never re-submitted by the sweeper.
    pub failed_retry_count: u32,
    /// Sweep interval in seconds.
    pub failed_retry_interval_secs: u64,
    /// Grace window in seconds: the sweeper only picks envelopes older than
    /// this, so it does not race rows still in the normal pipeline.
    pub retry_grace_secs: u64,
    /// Max candidate rows per sweep pass, per direction.
    pub retry_batch_size: usize,
    /// TTL of a `Succeeded` row before the purge pass deletes it.
    pub succeed_expired_after_secs: u64,
    /// TTL of a `Failed` row — kept longer so it stays queryable.
    pub failed_expired_after_secs: u64,
}

/// Dispatcher worker and channel sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Publish pipeline worker count.
    pub publish_concurrency: usize,
    /// Execute pipeline worker count, per consumer group.
    pub consumer_concurrency: usize,
    /// Bounded capacity of each dispatch channel.
    pub channel_capacity: usize,
    /// Outbound transport connection pool ceiling.
    pub connection_pool_size: usize,
    /// Consumer client poll timeout in milliseconds.
    pub poll_timeout_ms: u64,
    /// How long shutdown waits for in-flight work to drain.
    pub drain_timeout_secs: u64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            default_group: "correio.queue.default".to_string(),
            group_prefix: None,
            version: "v1".to_string(),
            topic_prefix: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            failed_retry_count: 50,
            failed_retry_interval_secs: 60,
            retry_grace_secs: 240,
            retry_batch_size: 200,
            succeed_expired_after_secs: 24 * 60 * 60,
            failed_expired_after_secs: 15 * 24 * 60 * 60,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            publish_concurrency: 1,
            consumer_concurrency: 1,
            channel_capacity: 5_000,
            connection_pool_size: 10,
            poll_timeout_ms: 1_000,
            drain_timeout_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = CorreioConfig::default();
        assert_eq!(config.group.default_group, "correio.queue.default");
        assert_eq!(config.group.version, "v1");
        assert_eq!(config.retry.failed_retry_count, 50);
        assert_eq!(config.retry.retry_batch_size, 200);
        assert_eq!(config.dispatch.connection_pool_size, 10);
        assert_eq!(config.dispatch.channel_capacity, 5_000);
    }

    #[test]
    fn toml_parsing_with_overrides() {
        let toml_str = r#"
            [group]
            default_group = "billing"
            group_prefix = "prod"

            [retry]
            failed_retry_count = 3
            failed_retry_interval_secs = 5

            [dispatch]
            publish_concurrency = 4
        "#;
        let config: CorreioConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.group.default_group, "billing");
        assert_eq!(config.group.group_prefix.as_deref(), Some("prod"));
        assert_eq!(config.retry.failed_retry_count, 3);
        assert_eq!(config.retry.failed_retry_interval_secs, 5);
        assert_eq!(config.dispatch.publish_concurrency, 4);
    }

    #[test]
    fn toml_parsing_empty_uses_defaults() {
        let config: CorreioConfig = toml::from_str("").unwrap();
        assert_eq!(config.retry.failed_retry_count, 50);
        assert_eq!(config.dispatch.consumer_concurrency, 1);
    }

    #[test]
    fn toml_parsing_partial_config() {
        let toml_str = r#"
            [retry]
            retry_grace_secs = 0
        "#;
        let config: CorreioConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry.retry_grace_secs, 0);
        // Other sections keep their defaults
        assert_eq!(config.group.version, "v1");
        assert_eq!(config.dispatch.poll_timeout_ms, 1_000);
    }
}
