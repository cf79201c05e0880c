use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::DaemonConfig;

#[derive(Parser, Debug)]
#[command(name = "podnet")]
#[command(about = "Provision pod sandboxes and endpoints on a remote network engine")]
#[command(version)]
pub struct Args {
    /// Path to a daemon config file (YAML or JSON)
    #[arg(short, long, env = "PODNET_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: resolve and print the configuration without serving
    #[arg(long)]
    pub dry_run: bool,

    /// Path to a .env file loaded before anything else
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Listen address: unix:/path or host:port
    #[arg(long, env = "PODNET_LISTEN", value_name = "ADDR")]
    pub listen: Option<String>,

    /// Base URL of the network engine
    #[arg(long, env = "PODNET_ENGINE_URL", value_name = "URL")]
    pub engine_url: Option<String>,

    /// Directory holding pod network records
    #[arg(long, env = "PODNET_STORE_PATH", value_name = "DIR")]
    pub store_path: Option<String>,

    /// Keep records in memory only (records are lost on restart)
    #[arg(long)]
    pub ephemeral_store: bool,

    /// Node whose pods are reported as active
    #[arg(long, env = "PODNET_NODE_NAME")]
    pub node_name: Option<String>,

    /// Cluster API server URL (in-cluster discovery when unset)
    #[arg(long, env = "PODNET_API_URL", value_name = "URL")]
    pub api_url: Option<String>,

    /// Bearer token file for the cluster API
    #[arg(long, env = "PODNET_TOKEN_PATH", value_name = "FILE")]
    pub token_path: Option<String>,

    /// Timeout for a single engine call, in seconds
    #[arg(long, env = "PODNET_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Network new endpoints are created on
    #[arg(long, env = "PODNET_NETWORK")]
    pub network: Option<String>,

    /// Undo completed setup steps when a later one fails
    #[arg(long)]
    pub rollback: bool,
}

impl Args {
    /// Overlay command-line values on a loaded config
    pub fn apply(&self, mut config: DaemonConfig) -> DaemonConfig {
        if let Some(ref listen) = self.listen {
            config.listen = listen.clone();
        }
        if let Some(ref url) = self.engine_url {
            config.engine_url = url.clone();
        }
        if let Some(ref path) = self.store_path {
            config.store_path = path.clone();
        }
        if self.ephemeral_store {
            config.ephemeral_store = true;
        }
        if let Some(ref node) = self.node_name {
            config.node_name = Some(node.clone());
        }
        if let Some(ref url) = self.api_url {
            config.cluster.api_url = Some(url.clone());
        }
        if let Some(ref path) = self.token_path {
            config.cluster.token_path = Some(path.clone());
        }
        if let Some(timeout) = self.timeout {
            config.remote_timeout_secs = timeout;
        }
        if let Some(ref network) = self.network {
            config.network_name = network.clone();
        }
        if self.rollback {
            config.rollback_on_failure = true;
        }
        config
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

/// Format the resolved configuration for `--dry-run`.
/// Pure function - returns a formatted string.
pub fn format_dry_run(config: &DaemonConfig, node_name: &str) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "podnet v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Listen:          {}\n", config.listen));
    output.push_str(&format!("Engine:          {}\n", config.engine_url));
    if config.ephemeral_store {
        output.push_str("Store:           in-memory (ephemeral)\n");
    } else {
        output.push_str(&format!("Store:           {}\n", config.store_dir().display()));
    }
    output.push_str(&format!("Node:            {}\n", node_name));
    output.push_str(&format!(
        "Cluster API:     {}\n",
        config.cluster.api_url.as_deref().unwrap_or("in-cluster")
    ));
    output.push_str(&format!("Network:         {}\n", config.network_name));
    output.push_str(&format!("Remote timeout:  {}s\n", config.remote_timeout_secs));
    output.push_str(&format!("Conflict retry:  {}\n", config.conflict_retries));
    output.push_str(&format!(
        "On failure:      {}\n",
        if config.rollback_on_failure {
            "roll back completed steps"
        } else {
            "report created resources"
        }
    ));

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Remove --dry-run to start serving.\n");

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clap_defaults() {
        let args = Args::parse_from(["podnet"]);
        assert!(args.config.is_none());
        assert!(!args.dry_run);
        assert!(!args.rollback);

        let config = args.apply(DaemonConfig::default());
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_clap_verbose() {
        let args = Args::parse_from(["podnet", "-vvv"]);
        assert_eq!(args.verbose, 3);
    }

    #[test]
    fn test_clap_overrides() {
        let args = Args::parse_from([
            "podnet",
            "--listen",
            "127.0.0.1:9005",
            "--engine-url",
            "http://engine:2389",
            "--timeout",
            "5",
            "--rollback",
            "--ephemeral-store",
        ]);
        let config = args.apply(DaemonConfig::default());
        assert_eq!(config.listen, "127.0.0.1:9005");
        assert_eq!(config.engine_url, "http://engine:2389");
        assert_eq!(config.remote_timeout_secs, 5);
        assert!(config.rollback_on_failure);
        assert!(config.ephemeral_store);
    }

    #[test]
    fn test_flags_do_not_clear_file_values() {
        let file = DaemonConfig {
            rollback_on_failure: true,
            network_name: "pods".to_string(),
            ..Default::default()
        };
        let config = Args::parse_from(["podnet"]).apply(file);
        assert!(config.rollback_on_failure);
        assert_eq!(config.network_name, "pods");
    }

    #[test]
    fn test_format_dry_run() {
        let config = DaemonConfig::default();
        let output = format_dry_run(&config, "worker-1");

        assert!(output.contains("unix:/var/run/cniserver.sock"));
        assert!(output.contains("/var/run/libnetwork/cnidb"));
        assert!(output.contains("Node:            worker-1"));
        assert!(output.contains("in-cluster"));
        assert!(output.contains("Validation: PASSED"));
    }
}
