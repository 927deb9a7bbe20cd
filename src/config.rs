//! Configuration for shrink operations

use std::time::Duration;

/// Environment variable holding the advertise address of the local process
pub const ENV_POD_IP: &str = "POD_IP";

/// Timeouts, retry budgets and command locations used by the shrink pipeline.
#[derive(Debug, Clone)]
pub struct ShrinkConfig {
    /// Advertise address of the host this process runs on.
    /// When it equals the removal target, the process steps down instead of running the pipeline.
    pub local_address: Option<String>,

    /// How long to wait for a launched agent to report in
    pub agent_connect_timeout: Duration,

    /// Bound on tearing down the launched agent
    pub agent_stop_timeout: Duration,

    /// Overall bound on draining workloads off the node
    pub drain_timeout: Duration,

    /// Total retry budget for removing the coordination store member
    pub member_removal_timeout: Duration,

    /// Cap on the delay between member removal attempts
    pub member_removal_max_interval: Duration,

    pub retry_interval: Duration,
    pub retry_attempts: u32,
    /// Attempt cap for best-effort polling
    pub retry_less_attempts: u32,

    /// Bound on polling the service registry for the node to disappear
    pub registry_query_timeout: Duration,

    /// Lifetime of the agent provisioning token
    pub token_ttl: Duration,

    /// Random bytes in a provisioning token (hex encoded, so twice as many characters)
    pub token_bytes: usize,

    pub system_log_path: String,
    pub gravity_bin: String,
    pub kubectl_bin: String,
    pub etcdctl_bin: String,

    /// Address agents dial back to
    pub agent_server_addr: String,
    pub portal_url: String,
    pub agent_service_name: String,
    pub service_uid: String,
    pub service_gid: String,
}

impl Default for ShrinkConfig {
    fn default() -> Self {
        Self {
            local_address: None,
            agent_connect_timeout: Duration::from_secs(5 * 60),
            agent_stop_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10 * 60),
            member_removal_timeout: Duration::from_secs(5 * 60),
            member_removal_max_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
            retry_attempts: 100,
            retry_less_attempts: 50,
            registry_query_timeout: Duration::from_secs(60),
            token_ttl: Duration::from_secs(4 * 60 * 60),
            token_bytes: 32,
            system_log_path: "/var/log/gravity-system.log".to_string(),
            gravity_bin: "gravity".to_string(),
            kubectl_bin: "/usr/bin/kubectl".to_string(),
            etcdctl_bin: "/usr/bin/etcdctl".to_string(),
            agent_server_addr: "127.0.0.1:3012".to_string(),
            portal_url: "https://127.0.0.1:3009".to_string(),
            agent_service_name: "gravity-agent.service".to_string(),
            service_uid: "1000".to_string(),
            service_gid: "1000".to_string(),
        }
    }
}

impl ShrinkConfig {
    /// Create a configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults plus the local advertise address from `POD_IP`, if set
    pub fn from_env() -> Self {
        let local_address = std::env::var(ENV_POD_IP).ok().filter(|addr| !addr.is_empty());
        Self {
            local_address,
            ..Default::default()
        }
    }

    pub fn with_local_address(mut self, address: impl Into<String>) -> Self {
        self.local_address = Some(address.into());
        self
    }

    pub fn with_agent_connect_timeout(mut self, timeout: Duration) -> Self {
        self.agent_connect_timeout = timeout;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_member_removal_timeout(mut self, timeout: Duration) -> Self {
        self.member_removal_timeout = timeout;
        self
    }

    /// Set the interval and attempt cap for retried commands
    pub fn with_retry(mut self, interval: Duration, attempts: u32) -> Self {
        self.retry_interval = interval;
        self.retry_attempts = attempts;
        self
    }

    pub fn with_registry_query_timeout(mut self, timeout: Duration) -> Self {
        self.registry_query_timeout = timeout;
        self
    }

    /// Whether this process runs on the host with the given advertise address
    pub fn is_local(&self, advertise_address: &str) -> bool {
        self.local_address.as_deref() == Some(advertise_address)
    }
}
