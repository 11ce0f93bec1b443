use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_REGION: &str = "us-west-1";
pub const REGION_ENV: &str = "AWS_DEFAULT_REGION";

/// Which entry point the configuration is for. The two flows have
/// historically used different cluster names; they are kept apart here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Setup,
    Teardown,
}

impl Flow {
    pub fn default_cluster_name(self) -> &'static str {
        match self {
            Flow::Setup => "my-demo-cluster",
            Flow::Teardown => "my-eks-demo-cluster",
        }
    }
}

/// Everything the orchestrators need, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    pub cluster_name: String,
    pub region: String,
    pub terraform_dir: PathBuf,
    pub kubernetes_dir: PathBuf,
    pub helm_repo_name: String,
    pub helm_repo_url: String,
    pub chart: String,
    pub release: String,
    pub namespace: String,
    pub service_account: String,
    pub values_file: PathBuf,
    pub workload: String,
    pub readiness_timeout: Duration,
    pub readiness_interval: Duration,
}

impl DeployConfig {
    pub fn defaults(flow: Flow, region: &str) -> Self {
        let kubernetes_dir = PathBuf::from("kubernetes");
        Self {
            cluster_name: flow.default_cluster_name().to_string(),
            region: region.to_string(),
            terraform_dir: PathBuf::from("terraform"),
            values_file: kubernetes_dir.join("jenkins").join("values.yaml"),
            kubernetes_dir,
            helm_repo_name: "jenkinsci".to_string(),
            helm_repo_url: "https://charts.jenkins.io".to_string(),
            chart: "jenkinsci/jenkins".to_string(),
            release: "jenkins".to_string(),
            namespace: "jenkins".to_string(),
            service_account: "jenkins".to_string(),
            workload: "statefulset/jenkins".to_string(),
            readiness_timeout: Duration::from_secs(120),
            readiness_interval: Duration::from_secs(5),
        }
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(cluster_name) = file.cluster_name {
            self.cluster_name = cluster_name;
        }
        if let Some(region) = file.region {
            self.region = region;
        }
        if let Some(terraform_dir) = file.terraform_dir {
            self.terraform_dir = terraform_dir;
        }
        if let Some(kubernetes_dir) = file.kubernetes_dir {
            self.values_file = kubernetes_dir.join("jenkins").join("values.yaml");
            self.kubernetes_dir = kubernetes_dir;
        }
        if let Some(helm_repo_name) = file.helm_repo_name {
            self.helm_repo_name = helm_repo_name;
        }
        if let Some(helm_repo_url) = file.helm_repo_url {
            self.helm_repo_url = helm_repo_url;
        }
        if let Some(chart) = file.chart {
            self.chart = chart;
        }
        if let Some(release) = file.release {
            self.release = release;
        }
        if let Some(namespace) = file.namespace {
            self.namespace = namespace;
        }
        if let Some(service_account) = file.service_account {
            self.service_account = service_account;
        }
        if let Some(values_file) = file.values_file {
            self.values_file = values_file;
        }
        if let Some(workload) = file.workload {
            self.workload = workload;
        }
        if let Some(secs) = file.readiness_timeout_secs {
            self.readiness_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.readiness_interval_secs {
            self.readiness_interval = Duration::from_secs(secs);
        }
    }
}

/// Optional JSON overlay on top of the built-in defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub cluster_name: Option<String>,
    pub region: Option<String>,
    pub terraform_dir: Option<PathBuf>,
    pub kubernetes_dir: Option<PathBuf>,
    pub helm_repo_name: Option<String>,
    pub helm_repo_url: Option<String>,
    pub chart: Option<String>,
    pub release: Option<String>,
    pub namespace: Option<String>,
    pub service_account: Option<String>,
    pub values_file: Option<PathBuf>,
    pub workload: Option<String>,
    pub readiness_timeout_secs: Option<u64>,
    pub readiness_interval_secs: Option<u64>,
}

/// Command-line overrides; these win over everything else.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub cluster_name: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config field '{0}' must not be empty")]
    EmptyField(&'static str),
    #[error("readiness interval must be greater than zero")]
    ZeroInterval,
    #[error("readiness interval ({interval:?}) exceeds readiness timeout ({timeout:?})")]
    IntervalExceedsTimeout {
        interval: Duration,
        timeout: Duration,
    },
}

/// `AWS_DEFAULT_REGION` if set and non-empty, otherwise [`DEFAULT_REGION`].
pub fn resolve_region<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(REGION_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// Build the configuration for `flow`: defaults, then the config file, then
/// the region environment variable, then command-line overrides.
pub fn resolve_config<F>(
    flow: Flow,
    file: Option<&Path>,
    overrides: &Overrides,
    lookup: F,
) -> anyhow::Result<DeployConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = DeployConfig::defaults(flow, DEFAULT_REGION);

    if let Some(path) = file {
        config.apply_file(load_config_file(path)?);
    }

    if lookup(REGION_ENV).is_some_and(|value| !value.trim().is_empty()) {
        config.region = resolve_region(&lookup);
    }

    if let Some(cluster_name) = &overrides.cluster_name {
        config.cluster_name = cluster_name.clone();
    }
    if let Some(region) = &overrides.region {
        config.region = region.clone();
    }

    match file {
        Some(path) => validate_config(config)
            .with_context(|| format!("validating config at {}", path.display())),
        None => validate_config(config).context("validating config"),
    }
}

pub fn load_config_file(path: &Path) -> anyhow::Result<ConfigFile> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing config at {}", path.display()))
}

fn validate_config(config: DeployConfig) -> Result<DeployConfig, ConfigError> {
    let required = [
        ("cluster_name", config.cluster_name.as_str()),
        ("region", config.region.as_str()),
        ("chart", config.chart.as_str()),
        ("release", config.release.as_str()),
        ("namespace", config.namespace.as_str()),
        ("service_account", config.service_account.as_str()),
        ("workload", config.workload.as_str()),
        ("helm_repo_name", config.helm_repo_name.as_str()),
        ("helm_repo_url", config.helm_repo_url.as_str()),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyField(name));
        }
    }

    if config.readiness_interval.is_zero() {
        return Err(ConfigError::ZeroInterval);
    }

    if config.readiness_interval > config.readiness_timeout {
        return Err(ConfigError::IntervalExceedsTimeout {
            interval: config.readiness_interval,
            timeout: config.readiness_timeout,
        });
    }

    Ok(config)
}
