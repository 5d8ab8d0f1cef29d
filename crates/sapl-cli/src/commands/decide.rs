use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sapl_core::{AuthorizationDecision, AuthorizationSubscription};
use sapl_pdp::{
    DynamicPolicyDecisionPoint, PdpConfiguration, PipAttributeBroker, ReportingInterceptor, Settings,
    StandardFunctionBroker, VoteInterceptor,
};
use tracing::info;

use super::read_json;
use crate::cli::{DecideArgs, OutputFormat};
use crate::output::print_decision;

pub async fn decide(args: &DecideArgs, settings: &Settings, format: OutputFormat) -> Result<()> {
    let mut decisions = decisions(args, settings)?;
    let mut printed = 0usize;
    loop {
        tokio::select! {
            next = decisions.next() => match next {
                Some(decision) => {
                    print_decision(&decision, format);
                    printed += 1;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
        if !args.stream || args.take.is_some_and(|take| printed >= take) {
            break;
        }
    }
    Ok(())
}

/// Loads the configuration into a fresh decision point and subscribes.
pub fn decisions(args: &DecideArgs, settings: &Settings) -> Result<BoxStream<'static, AuthorizationDecision>> {
    let configuration: PdpConfiguration = read_json(&args.config, "configuration")?;
    let subscription: AuthorizationSubscription = read_json(&args.subscription, "subscription")?;

    let mut interceptors: Vec<Arc<dyn VoteInterceptor>> = Vec::new();
    if args.report {
        interceptors.push(Arc::new(ReportingInterceptor));
    }
    let pdp = DynamicPolicyDecisionPoint::from_settings(
        settings,
        Arc::new(StandardFunctionBroker::new()),
        Arc::new(PipAttributeBroker::new()),
    )
    .with_interceptors(interceptors);

    pdp.register()
        .load_configuration(&configuration, settings.pdp.keep_old_on_error)
        .with_context(|| format!("Configuration '{}' was rejected", configuration.configuration_id))?;
    info!(
        pdp_id = %configuration.pdp_id,
        configuration_id = %configuration.configuration_id,
        "Subscribing"
    );
    Ok(pdp.decide_for(&configuration.pdp_id, subscription))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sapl_core::Decision;
    use std::io::Write;
    use std::path::PathBuf;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const CONFIGURATION: &str = r#"{
        "pdpId": "tenant",
        "configurationId": "v1",
        "algorithm": "deny-unless-permit",
        "documents": [
            {"element": {
                "type": "policy",
                "name": "readers",
                "entitlement": "permit",
                "target": {
                    "type": "binary",
                    "operator": "equal",
                    "left": {"type": "identifier", "name": "action"},
                    "right": {"type": "literal", "value": "read"}
                },
                "obligations": [{"type": "literal", "value": "log access"}]
            }}
        ]
    }"#;

    fn args(config: PathBuf, subscription: PathBuf) -> DecideArgs {
        DecideArgs {
            config,
            subscription,
            stream: false,
            take: None,
            report: true,
        }
    }

    #[tokio::test]
    async fn test_decides_against_the_configured_pdp_id() {
        let config = write(CONFIGURATION);
        let subscription = write(r#"{"subject": "alice", "action": "read", "resource": "doc"}"#);
        let mut decisions =
            decisions(&args(config.path().into(), subscription.path().into()), &Settings::default()).unwrap();
        let decision = decisions.next().await.unwrap();
        assert_eq!(decision.decision, Decision::Permit);
        assert_eq!(decision.obligations.len(), 1);
    }

    #[tokio::test]
    async fn test_non_matching_subscription_falls_back_to_default() {
        let config = write(CONFIGURATION);
        let subscription = write(r#"{"subject": "alice", "action": "write", "resource": "doc"}"#);
        let mut decisions =
            decisions(&args(config.path().into(), subscription.path().into()), &Settings::default()).unwrap();
        assert_eq!(decisions.next().await.unwrap().decision, Decision::Deny);
    }

    #[tokio::test]
    async fn test_single_decision_mode_returns() {
        let config = write(CONFIGURATION);
        let subscription = write(r#"{"subject": "alice", "action": "read", "resource": "doc"}"#);
        let result = decide(
            &args(config.path().into(), subscription.path().into()),
            &Settings::default(),
            OutputFormat::Json,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_configuration_is_an_error() {
        let config = write(r#"{"pdpId": "default", "configurationId": "bad", "algorithm": "first-applicable"}"#);
        let subscription = write(r#"{"subject": "alice", "action": "read", "resource": "doc"}"#);
        let result = decisions(&args(config.path().into(), subscription.path().into()), &Settings::default());
        assert!(result.is_err());
    }
}
