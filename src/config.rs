//! Pipeline configuration: an explicit value type passed at
//! construction, loaded via `clap::Args` and layered with the `config`
//! crate for file/env overrides.

use clap::Parser;
use serde::{Deserialize, Serialize};

fn default_buffer_size() -> usize {
    crate::capture::DEFAULT_QUEUE_DEPTH
}

fn default_flow_timeout_secs() -> u64 {
    300
}

fn default_max_flows() -> usize {
    10_000
}

fn default_http_port() -> u16 {
    7878
}

fn default_alert_profile() -> String {
    "general".to_string()
}

/// Round-trips through TOML/YAML via `serde`, the way
/// `SnifferConfig.from_dict`/`to_dict` do in the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub interfaces: Vec<String>,
    pub bpf_filter: Option<String>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_flow_timeout_secs")]
    pub flow_timeout_secs: u64,
    #[serde(default = "default_max_flows")]
    pub max_flows: usize,
    #[serde(default = "default_alert_profile")]
    pub alert_profile: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    pub promiscuous: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            bpf_filter: None,
            buffer_size: default_buffer_size(),
            flow_timeout_secs: default_flow_timeout_secs(),
            max_flows: default_max_flows(),
            alert_profile: default_alert_profile(),
            http_port: default_http_port(),
            promiscuous: false,
        }
    }
}

impl PipelineConfig {
    /// Loads layered config: defaults, then an optional file, then
    /// environment variables prefixed `NETDIAG_`, mirroring
    /// `SnifferConfig.load`'s multi-path search but using the `config`
    /// crate's builder instead of hand-rolled path probing.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&PipelineConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("NETDIAG").separator("__"));
        builder.build()?.try_deserialize()
    }

    pub fn flow_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.flow_timeout_secs)
    }
}

/// CLI surface.
#[derive(Debug, Parser)]
#[command(name = "netdiag", about = "Multi-interface network diagnostic pipeline")]
pub struct Args {
    /// Capture interface name; may be given multiple times.
    #[arg(short, long)]
    pub interface: Vec<String>,

    /// Optional config file (TOML), layered under CLI args.
    #[arg(short, long)]
    pub config: Option<String>,

    /// BPF filter expression, opaque pass-through to the capture source.
    #[arg(short, long)]
    pub filter: Option<String>,

    /// HTTP status/metrics API port.
    #[arg(short, long, default_value_t = default_http_port())]
    pub port: u16,

    #[arg(long)]
    pub promiscuous: bool,

    #[arg(short, long, default_value_t = default_buffer_size())]
    pub buffer_size: usize,
}

impl Args {
    /// Merges CLI args over a file/env-loaded `PipelineConfig`, CLI wins.
    pub fn into_config(self) -> Result<PipelineConfig, config::ConfigError> {
        let mut cfg = PipelineConfig::load(self.config.as_deref())?;
        if !self.interface.is_empty() {
            cfg.interfaces = self.interface;
        }
        if self.filter.is_some() {
            cfg.bpf_filter = self.filter;
        }
        cfg.http_port = self.port;
        cfg.promiscuous = self.promiscuous;
        cfg.buffer_size = self.buffer_size;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_flows, 10_000);
        assert_eq!(cfg.flow_timeout_secs, 300);
    }
}
