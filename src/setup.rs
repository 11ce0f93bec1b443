use std::fmt;
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::commands;
use crate::config::DeployConfig;
use crate::console;
use crate::outputs::{ECR_REPOSITORY_URL, JENKINS_ROLE_ARN, OutputError, TerraformOutputs};
use crate::readiness::{PollSettings, ReadinessError, wait_until_ready};
use crate::runner::{CommandRunner, Invocation, RunError, RunOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    Provision,
    Outputs,
    ClusterAccess,
    Deploy,
    Report,
}

impl SetupStep {
    pub fn number(self) -> usize {
        match self {
            SetupStep::Provision => 1,
            SetupStep::Outputs => 2,
            SetupStep::ClusterAccess => 3,
            SetupStep::Deploy => 4,
            SetupStep::Report => 5,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            SetupStep::Provision => "Setting up EKS, ECR, and IAM with Terraform",
            SetupStep::Outputs => "Retrieving outputs from Terraform",
            SetupStep::ClusterAccess => "Configuring kubectl",
            SetupStep::Deploy => "Deploying Jenkins and Configuring IAM Role",
            SetupStep::Report => "Reporting",
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.number(), self.title())
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Outputs(#[from] OutputError),
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    #[error("writing to console: {0}")]
    Console(#[from] std::io::Error),
}

#[derive(Debug, Error)]
#[error("{step} failed")]
pub struct SetupError {
    pub step: SetupStep,
    #[source]
    pub source: StepError,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    pub cluster_name: String,
    pub region: String,
    pub jenkins_role_arn: String,
    pub ecr_repository_url: String,
    pub readiness_attempts: u32,
    pub commands_run: usize,
    pub completed_at: DateTime<Utc>,
}

/// Counts the invocations passed through to the wrapped runner.
struct Counting<'a, R> {
    inner: &'a mut R,
    calls: usize,
}

impl<R: CommandRunner> CommandRunner for Counting<'_, R> {
    fn run(&mut self, invocation: &Invocation) -> Result<RunOutcome, RunError> {
        self.calls += 1;
        self.inner.run(invocation)
    }
}

/// Run the whole setup sequence. Stops at the first failing step; only the
/// namespace creation is allowed to fail.
pub fn run_setup<R: CommandRunner, W: Write>(
    config: &DeployConfig,
    runner: &mut R,
    out: &mut W,
) -> Result<SetupReport, SetupError> {
    let runner = &mut Counting {
        inner: runner,
        calls: 0,
    };
    within(SetupStep::Provision, provision_infrastructure(config, runner, out))?;
    let outputs = within(SetupStep::Outputs, fetch_outputs(config, runner, out))?;
    within(SetupStep::ClusterAccess, configure_cluster_access(config, runner, out))?;

    let role_arn = within(
        SetupStep::Deploy,
        outputs.string(JENKINS_ROLE_ARN).map_err(StepError::from),
    )?;
    let readiness_attempts = within(
        SetupStep::Deploy,
        deploy_and_bind_identity(config, role_arn, runner, out),
    )?;

    let ecr_url = within(
        SetupStep::Report,
        outputs.string(ECR_REPOSITORY_URL).map_err(StepError::from),
    )?;
    within(SetupStep::Report, report_completion(ecr_url, out))?;

    Ok(SetupReport {
        cluster_name: config.cluster_name.clone(),
        region: config.region.clone(),
        jenkins_role_arn: role_arn.to_string(),
        ecr_repository_url: ecr_url.to_string(),
        readiness_attempts,
        commands_run: runner.calls,
        completed_at: Utc::now(),
    })
}

fn within<T>(step: SetupStep, result: Result<T, StepError>) -> Result<T, SetupError> {
    result.map_err(|source| SetupError { step, source })
}

fn announce<W: Write>(step: SetupStep, out: &mut W) -> Result<(), StepError> {
    info!(step = step.number(), "{}", step.title());
    let title = format!("Step {}: {}", step.number(), step.title());
    writeln!(out, "{}", console::heading(&title))?;
    Ok(())
}

pub fn provision_infrastructure<R: CommandRunner, W: Write>(
    config: &DeployConfig,
    runner: &mut R,
    out: &mut W,
) -> Result<(), StepError> {
    announce(SetupStep::Provision, out)?;
    runner.run(&commands::terraform_init(config))?;
    runner.run(&commands::terraform_apply(config))?;
    writeln!(out, "{}", console::success("Terraform apply completed successfully."))?;
    Ok(())
}

pub fn fetch_outputs<R: CommandRunner, W: Write>(
    config: &DeployConfig,
    runner: &mut R,
    out: &mut W,
) -> Result<TerraformOutputs, StepError> {
    announce(SetupStep::Outputs, out)?;
    let outcome = runner.run(&commands::terraform_output(config))?;
    let outputs = TerraformOutputs::parse(outcome.stdout.as_deref().unwrap_or_default())?;
    Ok(outputs)
}

pub fn configure_cluster_access<R: CommandRunner, W: Write>(
    config: &DeployConfig,
    runner: &mut R,
    out: &mut W,
) -> Result<(), StepError> {
    announce(SetupStep::ClusterAccess, out)?;
    runner.run(&commands::update_kubeconfig(config))?;
    writeln!(
        out,
        "{}",
        console::success("`kubectl` is now configured to connect to the EKS cluster.")
    )?;
    Ok(())
}

/// Install the release, wait for its service account, bind the IAM role and
/// restart the workload. Returns the number of readiness probes issued.
pub fn deploy_and_bind_identity<R: CommandRunner, W: Write>(
    config: &DeployConfig,
    role_arn: &str,
    runner: &mut R,
    out: &mut W,
) -> Result<u32, StepError> {
    announce(SetupStep::Deploy, out)?;

    let namespace = runner.run(&commands::create_namespace(config))?;
    if !namespace.success() {
        warn!(
            namespace = %config.namespace,
            code = namespace.code,
            "namespace creation failed, assuming it already exists"
        );
    }

    writeln!(out, "\nAdding Jenkins Helm repo...")?;
    runner.run(&commands::helm_repo_add(config))?;
    runner.run(&commands::helm_repo_update())?;

    writeln!(out, "\nDeploying Jenkins release '{}'...", config.release)?;
    runner.run(&commands::helm_upgrade_install(config))?;

    writeln!(
        out,
        "\nWaiting for service account '{}' to be created by Helm...",
        config.service_account
    )?;
    let attempts = wait_until_ready(
        runner,
        &commands::get_service_account(config),
        PollSettings {
            timeout: config.readiness_timeout,
            interval: config.readiness_interval,
        },
    )?;

    writeln!(
        out,
        "Annotating service account '{}' with IAM Role: {role_arn}",
        config.service_account
    )?;
    runner.run(&commands::annotate_service_account(config, role_arn))?;
    writeln!(
        out,
        "{}",
        console::success("Jenkins service account annotated for ECR access.")
    )?;

    writeln!(out, "\nRestarting Jenkins pod to apply the IAM role annotation...")?;
    runner.run(&commands::rollout_restart(config))?;
    Ok(attempts)
}

pub fn report_completion<W: Write>(ecr_url: &str, out: &mut W) -> Result<(), StepError> {
    writeln!(out, "\n{}", console::heading("Setup Complete!"))?;
    writeln!(
        out,
        "\n\n{} {ecr_url}",
        console::emphasis("ECR Repository URL (for your Jenkinsfile):")
    )?;
    writeln!(out, "\n{}", console::emphasis("Next Steps:"))?;
    writeln!(
        out,
        "1. The `Jenkinsfile` in this project is now configured to use this ECR repo."
    )?;
    writeln!(
        out,
        "2. Log in to Jenkins, create a 'Pipeline' job, point it to your Git repo, and run it!"
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{Flow, Overrides, resolve_config};
    use crate::runner::testing::ScriptedRunner;

    const OUTPUTS: &str = r#"{"jenkins_iam_role_arn":{"value":"arn:aws:iam::123:role/x"},"ecr_repository_url":{"value":"123.dkr.ecr/x"}}"#;

    fn config() -> DeployConfig {
        DeployConfig::defaults(Flow::Setup, "us-west-1")
    }

    fn runner() -> ScriptedRunner {
        ScriptedRunner::new().respond(&["terraform", "output"], 0, OUTPUTS)
    }

    #[test]
    fn full_sequence_runs_in_order() {
        let mut runner = runner();
        let mut out = Vec::new();
        let report = run_setup(&config(), &mut runner, &mut out).expect("setup should succeed");

        assert_eq!(
            runner.summary(),
            vec![
                "terraform init",
                "terraform apply",
                "terraform output",
                "aws eks",
                "kubectl create",
                "helm repo",
                "helm repo",
                "helm upgrade",
                "kubectl get",
                "kubectl annotate",
                "kubectl rollout",
            ]
        );
        assert_eq!(report.jenkins_role_arn, "arn:aws:iam::123:role/x");
        assert_eq!(report.readiness_attempts, 1);
        assert_eq!(report.commands_run, 11);
        assert_eq!(report.commands_run, runner.calls.len());
    }

    #[test]
    fn raw_report_lists_command_count() {
        let mut runner = runner();
        let report = run_setup(&config(), &mut runner, &mut Vec::new()).unwrap();
        let json = serde_json::to_value(&report).expect("report serialises");
        assert_eq!(json["commands_run"], 11);
        assert_eq!(json["ecr_repository_url"], "123.dkr.ecr/x");
    }

    #[test]
    fn any_checked_failure_halts_the_rest() {
        let cases: [(&[&str], SetupStep, usize); 6] = [
            (&["terraform", "init"], SetupStep::Provision, 1),
            (&["terraform", "output"], SetupStep::Outputs, 3),
            (&["helm", "repo", "add"], SetupStep::Deploy, 6),
            (&["helm", "repo", "update"], SetupStep::Deploy, 7),
            (&["kubectl", "annotate"], SetupStep::Deploy, 10),
            (&["kubectl", "rollout"], SetupStep::Deploy, 11),
        ];

        for (prefix, step, calls) in cases {
            let mut runner = ScriptedRunner::new()
                .respond(prefix, 1, "")
                .respond(&["terraform", "output"], 0, OUTPUTS);
            let err = run_setup(&config(), &mut runner, &mut Vec::new())
                .expect_err("checked failure should abort");

            assert_eq!(err.step, step, "{prefix:?}");
            assert!(
                matches!(err.source, StepError::Run(RunError::Failed { code: 1, .. })),
                "{prefix:?}"
            );
            assert_eq!(runner.calls.len(), calls, "{prefix:?}");
            let last = runner.calls.last().unwrap();
            assert_eq!(last.program, prefix[0]);
            assert_eq!(last.args[..prefix.len() - 1], prefix[1..]);
        }
    }

    #[test]
    fn role_arn_feeds_annotation_and_url_reaches_summary() {
        let mut runner = runner();
        let mut out = Vec::new();
        run_setup(&config(), &mut runner, &mut out).expect("setup should succeed");

        let annotate = runner
            .calls
            .iter()
            .find(|call| call.args.first().map(String::as_str) == Some("annotate"))
            .expect("annotate should be issued");
        assert!(annotate
            .args
            .contains(&"eks.amazonaws.com/role-arn=arn:aws:iam::123:role/x".to_string()));

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("123.dkr.ecr/x"));
        assert!(printed.contains("Setup Complete!"));
    }

    #[test]
    fn failing_apply_stops_everything_after_it() {
        let mut runner = runner().respond(&["terraform", "apply"], 1, "");
        let err = run_setup(&config(), &mut runner, &mut Vec::new()).expect_err("apply fails");

        assert_eq!(err.step, SetupStep::Provision);
        assert!(matches!(err.source, StepError::Run(RunError::Failed { code: 1, .. })));
        assert_eq!(runner.summary(), vec!["terraform init", "terraform apply"]);
    }

    #[test]
    fn failing_kubeconfig_update_aborts_before_deploy() {
        let mut runner = runner().respond(&["aws"], 255, "");
        let err = run_setup(&config(), &mut runner, &mut Vec::new()).expect_err("aws fails");

        assert_eq!(err.step, SetupStep::ClusterAccess);
        assert_eq!(runner.calls.last().unwrap().program, "aws");
    }

    #[test]
    fn namespace_creation_failure_is_tolerated() {
        let mut runner = runner().respond(&["kubectl", "create", "namespace"], 1, "");
        run_setup(&config(), &mut runner, &mut Vec::new())
            .expect("existing namespace must not abort setup");
        assert!(runner.summary().contains(&"kubectl rollout".to_string()));
    }

    #[test]
    fn failing_helm_install_aborts_before_annotation() {
        let mut runner = runner().respond(&["helm", "upgrade"], 1, "");
        let err = run_setup(&config(), &mut runner, &mut Vec::new()).expect_err("helm fails");
        assert_eq!(err.step, SetupStep::Deploy);
        assert!(!runner.summary().contains(&"kubectl annotate".to_string()));
    }

    #[test]
    fn missing_output_key_is_reported_by_name() {
        let mut runner = ScriptedRunner::new().respond(
            &["terraform", "output"],
            0,
            r#"{"ecr_repository_url":{"value":"123.dkr.ecr/x"}}"#,
        );
        let err = run_setup(&config(), &mut runner, &mut Vec::new()).expect_err("arn missing");
        assert!(matches!(
            err.source,
            StepError::Outputs(OutputError::Missing(ref name)) if name == "jenkins_iam_role_arn"
        ));
        assert!(!runner.summary().contains(&"kubectl create".to_string()));
    }

    #[test]
    fn malformed_outputs_abort_at_step_two() {
        let mut runner = ScriptedRunner::new().respond(&["terraform", "output"], 0, "not json");
        let err = run_setup(&config(), &mut runner, &mut Vec::new()).expect_err("bad json");
        assert_eq!(err.step, SetupStep::Outputs);
        assert_eq!(runner.calls.len(), 3);
    }

    #[test]
    fn missing_tool_aborts_even_on_tolerant_call() {
        let mut runner = runner().missing("kubectl");
        let err = run_setup(&config(), &mut runner, &mut Vec::new()).expect_err("no kubectl");
        assert!(matches!(err.source, StepError::Run(RunError::NotInstalled { .. })));
        assert_eq!(runner.calls.last().unwrap().args[0], "create");
    }

    #[test]
    fn waits_for_service_account_before_annotating() {
        let mut runner = runner().respond_seq(
            &["kubectl", "get", "serviceaccount"],
            &[(1, ""), (0, "jenkins")],
        );
        let mut config = config();
        config.readiness_interval = Duration::from_millis(1);

        let report = run_setup(&config, &mut runner, &mut Vec::new()).expect("setup succeeds");
        assert_eq!(report.readiness_attempts, 2);
    }

    #[test]
    fn readiness_timeout_aborts_without_annotating() {
        let mut runner = runner().respond(&["kubectl", "get", "serviceaccount"], 1, "");
        let mut config = config();
        config.readiness_timeout = Duration::from_millis(10);
        config.readiness_interval = Duration::from_millis(2);

        let err = run_setup(&config, &mut runner, &mut Vec::new()).expect_err("never ready");
        assert!(matches!(
            err.source,
            StepError::Readiness(ReadinessError::TimedOut { .. })
        ));
        assert!(!runner.summary().contains(&"kubectl annotate".to_string()));
    }

    fn region_args(runner: &ScriptedRunner) -> Vec<String> {
        let mut regions = Vec::new();
        for call in &runner.calls {
            for (idx, arg) in call.args.iter().enumerate() {
                if let Some(region) = arg.strip_prefix("-var=aws_region=") {
                    regions.push(region.to_string());
                }
                if arg == "--region" {
                    regions.push(call.args[idx + 1].clone());
                }
            }
        }
        regions
    }

    #[test]
    fn region_defaults_when_env_unset() {
        let config = resolve_config(Flow::Setup, None, &Overrides::default(), |_: &str| None)
            .expect("defaults are valid");
        let mut runner = runner();
        run_setup(&config, &mut runner, &mut Vec::new()).unwrap();

        let regions = region_args(&runner);
        assert_eq!(regions.len(), 2);
        assert!(regions.iter().all(|region| region == "us-west-1"));
    }

    #[test]
    fn region_follows_env_everywhere() {
        let config = resolve_config(Flow::Setup, None, &Overrides::default(), |key: &str| {
            (key == "AWS_DEFAULT_REGION").then(|| "eu-west-2".to_string())
        })
        .expect("config is valid");
        let mut runner = runner();
        run_setup(&config, &mut runner, &mut Vec::new()).unwrap();

        let regions = region_args(&runner);
        assert_eq!(regions.len(), 2);
        assert!(regions.iter().all(|region| region == "eu-west-2"));
    }
}
