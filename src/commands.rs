//! Command lines executed through runners

use crate::config::ShrinkConfig;
use crate::provisioner::Provisioner;

/// Label identifying a node object by hostname in the orchestration layer
pub const LABEL_KUBE_HOSTNAME: &str = "kubernetes.io/hostname";

/// Agent `--vars` value selecting shrink mode
pub const AGENT_MODE_SHRINK: &str = "mode:shrink";

/// Builds command lines from the configured binary locations
#[derive(Clone, Copy)]
pub struct Commands<'a> {
    config: &'a ShrinkConfig,
}

/// Parameters for starting a shrink agent
pub struct AgentStart<'a> {
    pub advertise_addr: &'a str,
    pub token: &'a str,
    pub provisioner: Provisioner,
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

impl<'a> Commands<'a> {
    pub fn new(config: &'a ShrinkConfig) -> Self {
        Self { config }
    }

    /// Invoke the cluster management binary
    ///
    /// # Arguments
    /// * `args` - Subcommand and flags, appended after the binary path
    ///
    /// # Returns
    /// * `<gravity> args...`
    pub fn gravity(&self, args: &[&str]) -> Vec<String> {
        let mut command = vec![self.config.gravity_bin.clone()];
        command.extend(owned(args));
        command
    }

    /// Run `bin args...` inside the system container
    pub fn planet_enter(&self, bin: &str, args: &[String]) -> Vec<String> {
        let mut command = self.gravity(&["planet", "enter", "--", "--notty", bin, "--"]);
        command.extend(args.iter().cloned());
        command
    }

    fn node_selector(kube_node_id: &str) -> String {
        format!("-l={}={}", LABEL_KUBE_HOSTNAME, kube_node_id)
    }

    /// Remove the given labels from the node object
    pub fn unlabel_node<'l>(&self, kube_node_id: &str, labels: impl IntoIterator<Item = &'l String>) -> Vec<String> {
        let mut args = owned(&["label", "nodes"]);
        args.push(Self::node_selector(kube_node_id));
        let mut flags: Vec<String> = labels.into_iter().map(|label| format!("{}-", label)).collect();
        flags.sort();
        args.extend(flags);
        self.planet_enter(&self.config.kubectl_bin, &args)
    }

    /// Election participation key of a server
    pub fn election_key(cluster: &str, advertise_ip: &str) -> String {
        format!("/planet/cluster/{}/election/{}", cluster, advertise_ip)
    }

    /// Enable or disable leader election participation of a server
    pub fn set_election(&self, cluster: &str, advertise_ip: &str, enable: bool) -> Vec<String> {
        let args = vec![
            "set".to_string(),
            Self::election_key(cluster, advertise_ip),
            enable.to_string(),
        ];
        self.planet_enter(&self.config.etcdctl_bin, &args)
    }

    /// Delete the node object, succeeding if it is already gone
    pub fn delete_node(&self, kube_node_id: &str) -> Vec<String> {
        let mut args = owned(&["delete", "nodes", "--ignore-not-found=true"]);
        args.push(Self::node_selector(kube_node_id));
        self.planet_enter(&self.config.kubectl_bin, &args)
    }

    /// Uninstall node-local system software
    pub fn uninstall_system(&self) -> Vec<String> {
        self.gravity(&[
            "system",
            "uninstall",
            "--confirm",
            "--system-log-file",
            &self.config.system_log_path,
        ])
    }

    /// Start a shrink agent on a node
    pub fn start_agent(&self, params: &AgentStart<'_>) -> Vec<String> {
        self.gravity(&[
            "ops",
            "agent",
            &self.config.portal_url,
            "--advertise-addr",
            params.advertise_addr,
            "--server-addr",
            &self.config.agent_server_addr,
            "--token",
            params.token,
            "--vars",
            AGENT_MODE_SHRINK,
            "--service-uid",
            &self.config.service_uid,
            "--service-gid",
            &self.config.service_gid,
            "--service-name",
            &self.config.agent_service_name,
            "--cloud-provider",
            params.provisioner.cloud_provider(),
        ])
    }
}
