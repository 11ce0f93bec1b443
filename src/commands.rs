//! Invocations of the wrapped tools, built from a [`DeployConfig`].

use crate::config::DeployConfig;
use crate::outputs::JENKINS_ROLE_ARN;
use crate::runner::Invocation;

pub const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

fn var(name: &str, value: &str) -> String {
    format!("-var={name}={value}")
}

fn cluster_vars(config: &DeployConfig) -> [String; 2] {
    [
        var("cluster_name", &config.cluster_name),
        var("aws_region", &config.region),
    ]
}

pub fn terraform_init(config: &DeployConfig) -> Invocation {
    Invocation::new("terraform", ["init", "-upgrade"]).in_dir(&config.terraform_dir)
}

pub fn terraform_apply(config: &DeployConfig) -> Invocation {
    let [cluster, region] = cluster_vars(config);
    Invocation::new(
        "terraform",
        ["apply".to_string(), "-auto-approve".to_string(), cluster, region],
    )
    .in_dir(&config.terraform_dir)
}

pub fn terraform_output(config: &DeployConfig) -> Invocation {
    Invocation::new("terraform", ["output", "-json"])
        .in_dir(&config.terraform_dir)
        .captured()
}

/// Best-effort: a failed destroy is reported, never fatal.
pub fn terraform_destroy(config: &DeployConfig) -> Invocation {
    let [cluster, region] = cluster_vars(config);
    Invocation::new(
        "terraform",
        ["destroy".to_string(), "-auto-approve".to_string(), cluster, region],
    )
    .in_dir(&config.terraform_dir)
    .tolerant()
}

pub fn update_kubeconfig(config: &DeployConfig) -> Invocation {
    Invocation::new(
        "aws",
        [
            "eks",
            "update-kubeconfig",
            "--name",
            config.cluster_name.as_str(),
            "--region",
            config.region.as_str(),
        ],
    )
}

/// Tolerant so that re-runs against an existing namespace continue.
pub fn create_namespace(config: &DeployConfig) -> Invocation {
    Invocation::new("kubectl", ["create", "namespace", config.namespace.as_str()]).tolerant()
}

pub fn helm_repo_add(config: &DeployConfig) -> Invocation {
    Invocation::new(
        "helm",
        ["repo", "add", config.helm_repo_name.as_str(), config.helm_repo_url.as_str()],
    )
}

pub fn helm_repo_update() -> Invocation {
    Invocation::new("helm", ["repo", "update"])
}

pub fn helm_upgrade_install(config: &DeployConfig) -> Invocation {
    Invocation::new(
        "helm",
        [
            "upgrade".to_string(),
            "--install".to_string(),
            config.release.clone(),
            config.chart.clone(),
            "--namespace".to_string(),
            config.namespace.clone(),
            "-f".to_string(),
            config.values_file.to_string_lossy().into_owned(),
        ],
    )
}

/// Readiness probe: succeeds once the release has created its service account.
/// Failures are expected while waiting, so they are kept quiet.
pub fn get_service_account(config: &DeployConfig) -> Invocation {
    Invocation::new(
        "kubectl",
        [
            "get",
            "serviceaccount",
            config.service_account.as_str(),
            "-n",
            config.namespace.as_str(),
        ],
    )
    .captured()
    .tolerant()
    .quiet()
}

pub fn annotate_service_account(config: &DeployConfig, role_arn: &str) -> Invocation {
    Invocation::new(
        "kubectl",
        [
            "annotate".to_string(),
            "serviceaccount".to_string(),
            "-n".to_string(),
            config.namespace.clone(),
            config.service_account.clone(),
            format!("{ROLE_ARN_ANNOTATION}={role_arn}"),
            "--overwrite".to_string(),
        ],
    )
}

pub fn rollout_restart(config: &DeployConfig) -> Invocation {
    Invocation::new(
        "kubectl",
        ["rollout", "restart", config.workload.as_str(), "-n", config.namespace.as_str()],
    )
}

/// Every invocation `setup` would issue, in order. The role ARN is not known
/// until terraform has run, so it appears as a placeholder.
pub fn setup_plan(config: &DeployConfig) -> Vec<Invocation> {
    let placeholder = format!("<{JENKINS_ROLE_ARN}>");
    vec![
        terraform_init(config),
        terraform_apply(config),
        terraform_output(config),
        update_kubeconfig(config),
        create_namespace(config),
        helm_repo_add(config),
        helm_repo_update(),
        helm_upgrade_install(config),
        get_service_account(config),
        annotate_service_account(config, &placeholder),
        rollout_restart(config),
    ]
}

pub fn teardown_plan(config: &DeployConfig) -> Vec<Invocation> {
    vec![terraform_destroy(config)]
}
