//! In-memory collaborators for driving the shrink pipeline end to end
#![allow(dead_code)]

use async_trait::async_trait;
use node_shrink::agent::{AgentReport, AgentServerInfo, AgentService, InMemoryTokenStore};
use node_shrink::cluster::{Cluster, ClusterBackend, ClusterKey, ClusterState, Server, ServerRole, TrustedCluster};
use node_shrink::config::ShrinkConfig;
use node_shrink::error::{Result, ShrinkError};
use node_shrink::leadership::{LocalLeadership, NodeDrainer};
use node_shrink::logging::discard_logger;
use node_shrink::manifest::{HookKind, HookRunner, Manifest};
use node_shrink::membership::{Member, MembershipClient};
use node_shrink::operation::{InMemoryOperationStore, Operation, OperationKey};
use node_shrink::packages::{Locator, PackageEnvelope, PackageStore, LABEL_ADVERTISE_IP};
use node_shrink::provisioner::{AwsCredentials, CredentialVerifier, Provisioner};
use node_shrink::registry::{RegistryServer, ServiceRegistry, LABEL_HOSTNAME, LABEL_ROLE};
use node_shrink::runner::{ControlPlaneTransport, RunnerTarget};
use node_shrink::secrets::{MasterSecretsRequest, NodeSecretsRequest, RotatePackageResponse, SecretsPackager};
use node_shrink::shrink::{ShrinkDeps, ShrinkService};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CLUSTER: &str = "example.com";
pub const ACCOUNT: &str = "acct";

/// Ordered record of every side effect, with injectable failures
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
    faults: Mutex<Vec<String>>,
}

impl Journal {
    /// Record an entry; fails if it matches an injected fault
    pub fn record(&self, entry: impl Into<String>) -> Result<()> {
        let entry = entry.into();
        let failed = self.faults.lock().unwrap().iter().any(|f| entry.contains(f.as_str()));
        self.entries.lock().unwrap().push(entry.clone());
        if failed {
            return Err(ShrinkError::transient(format!("injected failure: {}", entry)));
        }
        Ok(())
    }

    /// Make every future entry containing `pattern` fail
    pub fn fail_on(&self, pattern: &str) {
        self.faults.lock().unwrap().push(pattern.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Index of the first entry containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.contains(pattern))
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.position(pattern).is_some()
    }
}

pub struct FakeBackend {
    pub journal: Arc<Journal>,
    pub cluster: Mutex<Cluster>,
}

#[async_trait]
impl ClusterBackend for FakeBackend {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Cluster> {
        let cluster = self.cluster.lock().unwrap().clone();
        if &cluster.key != key {
            return Err(ShrinkError::not_found(format!("cluster {} not found", key)));
        }
        Ok(cluster)
    }

    async fn delete_peer(&self, peer_id: &str) -> Result<()> {
        self.journal.record(format!("peer delete {}", peer_id))
    }

    async fn remove_servers(&self, _key: &ClusterKey, hostnames: &[String]) -> Result<()> {
        self.journal.record(format!("state remove {}", hostnames.join(",")))?;
        self.cluster
            .lock()
            .unwrap()
            .state
            .servers
            .retain(|s| !hostnames.contains(&s.hostname));
        Ok(())
    }

    async fn trusted_cluster(&self, _key: &ClusterKey) -> Result<Option<TrustedCluster>> {
        Ok(None)
    }

    async fn cluster_configuration(&self, _key: &ClusterKey) -> Result<Vec<u8>> {
        Ok(br#"{"spec":{"global":{"apiServerCertSANs":[]}}}"#.to_vec())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    pub servers: Mutex<Vec<RegistryServer>>,
}

impl FakeRegistry {
    pub fn remove_address(&self, address: &str) {
        self.servers.lock().unwrap().retain(|s| s.address != address);
    }
}

#[async_trait]
impl ServiceRegistry for FakeRegistry {
    async fn list_servers(&self, _cluster: &str) -> Result<Vec<RegistryServer>> {
        Ok(self.servers.lock().unwrap().clone())
    }
}

/// Agents connect when the start command runs and uninstall makes the node leave the registry
pub struct FakeAgents {
    pub journal: Arc<Journal>,
    pub registry: Arc<FakeRegistry>,
    pub connected: Mutex<Vec<AgentServerInfo>>,
}

#[async_trait]
impl AgentService for FakeAgents {
    async fn wait_for_agents(&self, _key: &OperationKey) -> Result<AgentReport> {
        Ok(AgentReport {
            servers: self.connected.lock().unwrap().clone(),
            message: "waiting for agents".to_string(),
        })
    }

    async fn exec(&self, _key: &OperationKey, address: &str, args: &[String]) -> Result<Vec<u8>> {
        self.journal.record(format!("agent {}: {}", address, args.join(" ")))?;
        if args.iter().any(|a| a == "uninstall") {
            self.registry.remove_address(address);
        }
        Ok(Vec::new())
    }

    async fn stop_agents(&self, key: &OperationKey) -> Result<()> {
        self.journal.record(format!("agents stop {}", key.operation_id))
    }
}

pub struct FakeTransport {
    pub journal: Arc<Journal>,
    pub agents: Arc<FakeAgents>,
}

#[async_trait]
impl ControlPlaneTransport for FakeTransport {
    async fn exec(&self, _cluster: &str, target: &RunnerTarget, args: &[String]) -> Result<Vec<u8>> {
        self.journal.record(format!("{}: {}", target.address, args.join(" ")))?;
        if args.iter().any(|a| a == "agent") {
            let advertise_addr = args
                .iter()
                .skip_while(|a| a.as_str() != "--advertise-addr")
                .nth(1)
                .cloned()
                .unwrap_or_default();
            self.agents.connected.lock().unwrap().push(AgentServerInfo {
                advertise_addr,
                hostname: target.hostname.clone(),
            });
        }
        Ok(Vec::new())
    }
}

pub struct FakeMembership {
    pub journal: Arc<Journal>,
    pub members: Mutex<Vec<Member>>,
}

#[async_trait]
impl MembershipClient for FakeMembership {
    async fn list_members(&self) -> Result<Vec<Member>> {
        Ok(self.members.lock().unwrap().clone())
    }

    async fn remove_member(&self, id: u64) -> Result<()> {
        self.journal.record(format!("member remove {}", id))?;
        self.members.lock().unwrap().retain(|m| m.id != id);
        Ok(())
    }
}

pub struct FakePackages {
    pub journal: Arc<Journal>,
    pub packages: Mutex<Vec<PackageEnvelope>>,
}

#[async_trait]
impl PackageStore for FakePackages {
    async fn list_packages(&self) -> Result<Vec<PackageEnvelope>> {
        Ok(self.packages.lock().unwrap().clone())
    }

    async fn delete_package(&self, locator: &Locator) -> Result<()> {
        self.journal.record(format!("package delete {}", locator))?;
        self.packages.lock().unwrap().retain(|p| &p.locator != locator);
        Ok(())
    }
}

pub struct FakeHooks {
    pub journal: Arc<Journal>,
}

#[async_trait]
impl HookRunner for FakeHooks {
    async fn run_hook(&self, _operation: &Operation, hook: HookKind) -> Result<()> {
        self.journal.record(format!("hook {}", hook))
    }
}

pub struct FakeDrainer {
    pub journal: Arc<Journal>,
}

#[async_trait]
impl NodeDrainer for FakeDrainer {
    async fn drain(&self, kube_node_id: &str) -> Result<()> {
        self.journal.record(format!("drain {}", kube_node_id))
    }
}

/// Accepts any credentials except the access key "bad"
pub struct FakeVerifier;

#[async_trait]
impl CredentialVerifier for FakeVerifier {
    async fn verify_aws(&self, credentials: &AwsCredentials) -> Result<()> {
        if credentials.access_key == "bad" {
            return Err(ShrinkError::invalid_request("access denied"));
        }
        Ok(())
    }
}

pub struct FakeSecrets;

#[async_trait]
impl SecretsPackager for FakeSecrets {
    async fn node_secrets(&self, request: &NodeSecretsRequest) -> Result<RotatePackageResponse> {
        Ok(RotatePackageResponse {
            locator: request.package.clone(),
            labels: HashMap::new(),
        })
    }

    async fn master_secrets(&self, request: &MasterSecretsRequest) -> Result<RotatePackageResponse> {
        Ok(RotatePackageResponse {
            locator: request.package.clone(),
            labels: HashMap::new(),
        })
    }
}

pub fn server(hostname: &str, ip: &str, role: ServerRole) -> Server {
    Server {
        hostname: hostname.to_string(),
        advertise_ip: ip.to_string(),
        cluster_role: role,
        profile: role.as_str().to_string(),
        instance_id: String::new(),
    }
}

fn registry_entry(server: &Server) -> RegistryServer {
    let mut labels = HashMap::new();
    labels.insert(LABEL_HOSTNAME.to_string(), server.hostname.clone());
    labels.insert(LABEL_ROLE.to_string(), server.cluster_role.as_str().to_string());
    RegistryServer {
        address: server.advertise_ip.clone(),
        hostname: server.hostname.clone(),
        labels,
    }
}

pub fn default_manifest() -> Manifest {
    Manifest::default()
        .with_hook(HookKind::NodeRemoving)
        .with_hook(HookKind::NodeRemoved)
        .with_profile("master", &[("node-role.kubernetes.io/master", "true"), ("role", "master")])
        .with_profile("node", &[("node-role.kubernetes.io/node", "true"), ("role", "node")])
}

/// Short timeouts so retries and polls finish quickly
pub fn test_config() -> ShrinkConfig {
    let mut config = ShrinkConfig::default()
        .with_retry(Duration::from_millis(10), 3)
        .with_drain_timeout(Duration::from_secs(2))
        .with_member_removal_timeout(Duration::from_secs(2))
        .with_registry_query_timeout(Duration::from_secs(1))
        .with_agent_connect_timeout(Duration::from_secs(1));
    config.retry_less_attempts = 3;
    config.agent_stop_timeout = Duration::from_secs(1);
    config
}

pub struct HarnessBuilder {
    servers: Vec<Server>,
    online: Vec<String>,
    manifest: Manifest,
    config: ShrinkConfig,
    provisioner: Provisioner,
    provider_vars: BTreeMap<String, String>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            servers: Vec::new(),
            online: Vec::new(),
            manifest: default_manifest(),
            config: test_config(),
            provisioner: Provisioner::OnPrem,
            provider_vars: BTreeMap::new(),
        }
    }

    /// Add a server registered in the cluster state and connected to the registry
    pub fn online(mut self, hostname: &str, ip: &str, role: ServerRole) -> Self {
        self.servers.push(server(hostname, ip, role));
        self.online.push(hostname.to_string());
        self
    }

    /// Add a server present in the cluster state but missing from the registry
    pub fn offline(mut self, hostname: &str, ip: &str, role: ServerRole) -> Self {
        self.servers.push(server(hostname, ip, role));
        self
    }

    pub fn manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn config(mut self, config: ShrinkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provisioner(mut self, provisioner: Provisioner) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn provider_var(mut self, name: &str, value: &str) -> Self {
        self.provider_vars.insert(name.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Harness {
        let journal = Arc::new(Journal::default());
        let cluster_key = ClusterKey::new(ACCOUNT, CLUSTER);

        let registry = Arc::new(FakeRegistry::default());
        *registry.servers.lock().unwrap() = self
            .servers
            .iter()
            .filter(|s| self.online.contains(&s.hostname))
            .map(registry_entry)
            .collect();

        let backend = Arc::new(FakeBackend {
            journal: journal.clone(),
            cluster: Mutex::new(Cluster {
                key: cluster_key.clone(),
                provisioner: self.provisioner,
                state: ClusterState {
                    servers: self.servers.clone(),
                },
                provider_vars: self.provider_vars,
            }),
        });

        let agents = Arc::new(FakeAgents {
            journal: journal.clone(),
            registry: registry.clone(),
            connected: Mutex::new(Vec::new()),
        });

        let members = self
            .servers
            .iter()
            .enumerate()
            .map(|(i, s)| Member {
                id: i as u64 + 1,
                name: s.hostname.clone(),
                peer_urls: vec![s.etcd_peer_url()],
            })
            .collect();

        let packages = self
            .servers
            .iter()
            .flat_map(|s| {
                let suffix = s.advertise_ip.replace('.', "_");
                let mut labels = HashMap::new();
                labels.insert(LABEL_ADVERTISE_IP.to_string(), s.advertise_ip.clone());
                vec![
                    PackageEnvelope {
                        locator: Locator::new(CLUSTER, format!("planet-config-{}", suffix), "0.0.1"),
                        labels: HashMap::new(),
                    },
                    PackageEnvelope {
                        locator: Locator::new(CLUSTER, format!("site-export-{}", suffix), "0.0.1"),
                        labels,
                    },
                ]
            })
            .collect();

        let store = Arc::new(InMemoryOperationStore::new());
        let leadership = Arc::new(LocalLeadership::new(discard_logger()));

        let deps = ShrinkDeps {
            operations: store.clone(),
            backend: backend.clone(),
            registry: registry.clone(),
            transport: Arc::new(FakeTransport {
                journal: journal.clone(),
                agents: agents.clone(),
            }),
            agents: agents.clone(),
            tokens: Arc::new(InMemoryTokenStore::new()),
            membership: Arc::new(FakeMembership {
                journal: journal.clone(),
                members: Mutex::new(members),
            }),
            packages: Arc::new(FakePackages {
                journal: journal.clone(),
                packages: Mutex::new(packages),
            }),
            hooks: Arc::new(FakeHooks { journal: journal.clone() }),
            drainer: Arc::new(FakeDrainer { journal: journal.clone() }),
            leadership: leadership.clone(),
            verifier: Arc::new(FakeVerifier),
            secrets: Arc::new(FakeSecrets),
        };

        let service = ShrinkService::new(deps, self.manifest, self.config, discard_logger());
        Harness {
            service,
            journal,
            backend,
            registry,
            store,
            leadership,
            cluster_key,
        }
    }
}

pub struct Harness {
    pub service: ShrinkService,
    pub journal: Arc<Journal>,
    pub backend: Arc<FakeBackend>,
    pub registry: Arc<FakeRegistry>,
    pub store: Arc<InMemoryOperationStore>,
    pub leadership: Arc<LocalLeadership>,
    pub cluster_key: ClusterKey,
}

impl Harness {
    /// Two masters and a worker, all online
    pub fn three_nodes() -> Harness {
        HarnessBuilder::new()
            .online("node-1", "10.0.0.1", ServerRole::Master)
            .online("node-2", "10.0.0.2", ServerRole::Node)
            .online("node-3", "10.0.0.3", ServerRole::Master)
            .build()
    }

    pub fn cluster_servers(&self) -> Vec<String> {
        self.backend
            .cluster
            .lock()
            .unwrap()
            .state
            .servers
            .iter()
            .map(|s| s.hostname.clone())
            .collect()
    }
}
