//! Client tunables shared by every stream the gateway opens.
use std::time::Duration;

use crate::utils::now;

pub const DEFAULT_CLIENT_ID: &str = "kafka-gateway";
const DEFAULT_FETCH_MAX_WAIT_MILLIS: i32 = 60_000;
const DEFAULT_FETCH_MAX_BYTES: i32 = 50 * 1024 * 1024;
const DEFAULT_FETCH_PARTITION_MAX_BYTES: i32 = 50 * 1024 * 1024;
const DEFAULT_PRODUCE_MAX_REQUEST_MILLIS: i64 = 0;
const DEFAULT_PRODUCE_MAX_RESPONSE_MILLIS: i32 = 120_000;
const DEFAULT_PRODUCE_MAX_BYTES: i32 = i32::MAX;
const DEFAULT_PRODUCE_RECORD_FRAMING_SIZE: i32 = 512;
const DEFAULT_META_MAX_AGE_MILLIS: i64 = 300_000;
const DEFAULT_DESCRIBE_MAX_AGE_MILLIS: i64 = 300_000;
const DEFAULT_GROUP_REBALANCE_TIMEOUT: Duration = Duration::from_secs(4);
const DEFAULT_SLOT_CAPACITY: usize = 64 * 1024;
const DEFAULT_SLOT_COUNT: usize = 1024;

/// Immutable configuration, see [`GatewayConfigBuilder`] for the knobs.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayConfig {
    pub client_id: String,
    pub fetch_max_wait_millis: i32,
    pub fetch_max_bytes: i32,
    pub fetch_partition_max_bytes: i32,
    /// Linger before a produce request is sent, `0` sends as soon as a record completes.
    pub produce_max_request_millis: i64,
    pub produce_max_response_millis: i32,
    pub produce_max_bytes: i32,
    /// Padding granted on produce windows to fit one record's framing.
    pub produce_record_framing_size: i32,
    pub meta_max_age_millis: i64,
    pub describe_max_age_millis: i64,
    pub group_rebalance_timeout: Duration,
    /// Stable identity sent as `group.instance.id` for static membership.
    pub group_instance_id: String,
    pub slot_capacity: usize,
    pub slot_count: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfigBuilder::new().build()
    }
}

impl GatewayConfig {
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::new()
    }
}

/// Configure a [`GatewayConfig`].
///
/// ### Example
/// ```rust
/// let config = kafka_gateway::config::GatewayConfig::builder()
///     .client_id("gateway")
///     .fetch_max_wait_millis(500)
///     .slot_capacity(8192)
///     .build();
/// assert_eq!(config.client_id, "gateway");
/// ```
#[derive(Clone, Debug)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl Default for GatewayConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: GatewayConfig {
                client_id: DEFAULT_CLIENT_ID.to_owned(),
                fetch_max_wait_millis: DEFAULT_FETCH_MAX_WAIT_MILLIS,
                fetch_max_bytes: DEFAULT_FETCH_MAX_BYTES,
                fetch_partition_max_bytes: DEFAULT_FETCH_PARTITION_MAX_BYTES,
                produce_max_request_millis: DEFAULT_PRODUCE_MAX_REQUEST_MILLIS,
                produce_max_response_millis: DEFAULT_PRODUCE_MAX_RESPONSE_MILLIS,
                produce_max_bytes: DEFAULT_PRODUCE_MAX_BYTES,
                produce_record_framing_size: DEFAULT_PRODUCE_RECORD_FRAMING_SIZE,
                meta_max_age_millis: DEFAULT_META_MAX_AGE_MILLIS,
                describe_max_age_millis: DEFAULT_DESCRIBE_MAX_AGE_MILLIS,
                group_rebalance_timeout: DEFAULT_GROUP_REBALANCE_TIMEOUT,
                group_instance_id: format!("kafka-gateway-{:x}-{:x}", std::process::id(), now()),
                slot_capacity: DEFAULT_SLOT_CAPACITY,
                slot_count: DEFAULT_SLOT_COUNT,
            },
        }
    }

    pub fn client_id(&mut self, client_id: &str) -> &mut Self {
        self.config.client_id = client_id.to_owned();
        self
    }

    /// How long the broker may hold a fetch request open waiting for data.
    pub fn fetch_max_wait_millis(&mut self, millis: i32) -> &mut Self {
        self.config.fetch_max_wait_millis = millis;
        self
    }

    pub fn fetch_max_bytes(&mut self, bytes: i32) -> &mut Self {
        self.config.fetch_max_bytes = bytes;
        self
    }

    pub fn fetch_partition_max_bytes(&mut self, bytes: i32) -> &mut Self {
        self.config.fetch_partition_max_bytes = bytes;
        self
    }

    /// The maximum time a completed record waits for more records before
    /// the produce request is sent.
    ///
    /// Increasing this number will increase latency, but also increase throughput.
    pub fn produce_max_request_millis(&mut self, millis: i64) -> &mut Self {
        self.config.produce_max_request_millis = millis;
        self
    }

    /// The timeout the broker is given to acknowledge a produce request.
    pub fn produce_max_response_millis(&mut self, millis: i32) -> &mut Self {
        self.config.produce_max_response_millis = millis;
        self
    }

    pub fn produce_max_bytes(&mut self, bytes: i32) -> &mut Self {
        self.config.produce_max_bytes = bytes;
        self
    }

    pub fn produce_record_framing_size(&mut self, bytes: i32) -> &mut Self {
        self.config.produce_record_framing_size = bytes;
        self
    }

    pub fn meta_max_age_millis(&mut self, millis: i64) -> &mut Self {
        self.config.meta_max_age_millis = millis;
        self
    }

    pub fn describe_max_age_millis(&mut self, millis: i64) -> &mut Self {
        self.config.describe_max_age_millis = millis;
        self
    }

    pub fn group_rebalance_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.group_rebalance_timeout = timeout;
        self
    }

    pub fn group_instance_id(&mut self, instance_id: &str) -> &mut Self {
        self.config.group_instance_id = instance_id.to_owned();
        self
    }

    /// Size of each buffer pool slot, which bounds how much of a single
    /// response or request is held in memory.
    pub fn slot_capacity(&mut self, capacity: usize) -> &mut Self {
        self.config.slot_capacity = capacity;
        self
    }

    pub fn slot_count(&mut self, count: usize) -> &mut Self {
        self.config.slot_count = count;
        self
    }

    pub fn build(&self) -> GatewayConfig {
        self.config.clone()
    }
}
