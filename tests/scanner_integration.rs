//! Integration tests for the provider scanner against a real stdio
//! fixture provider: a clean scan, a connect failure, and a scan
//! timeout.

use std::collections::HashMap;
use std::time::Duration;

use mcp_gateway::config::{GatewaySettings, ProviderConfig, StdioParameters};
use mcp_gateway::scanner::{self, ScanResult};

fn fake_provider_path() -> String {
    env!("CARGO_BIN_EXE_fake_provider").to_string()
}

fn stdio_provider(namespace: &str, env: HashMap<String, String>) -> ProviderConfig {
    ProviderConfig::Stdio {
        namespace: namespace.to_string(),
        provider_parameters: StdioParameters {
            command: fake_provider_path(),
            args: Vec::new(),
            env,
        },
    }
}

#[tokio::test]
async fn scan_of_healthy_provider_reports_its_tools_and_prompts() {
    let provider = stdio_provider("echo", HashMap::new());
    let settings = GatewaySettings::default();

    match scanner::scan(&provider, &settings).await {
        ScanResult::Success { namespace, tools, prompts, .. } => {
            assert_eq!(namespace, "echo");
            assert_eq!(tools.len(), 1);
            assert_eq!(prompts.len(), 1);
        }
        ScanResult::Failure { reasons, .. } => panic!("expected success, got {reasons:?}"),
    }
}

#[tokio::test]
async fn scan_of_provider_that_exits_before_handshake_reports_failure() {
    let provider = stdio_provider(
        "broken",
        HashMap::from([("FAKE_PROVIDER_EXIT_BEFORE_INIT".to_string(), "1".to_string())]),
    );
    let settings = GatewaySettings::default();

    match scanner::scan(&provider, &settings).await {
        ScanResult::Failure { namespace, reasons } => {
            assert_eq!(namespace, "broken");
            assert!(!reasons.is_empty());
        }
        ScanResult::Success { .. } => panic!("expected failure"),
    }
}

#[tokio::test]
async fn scan_past_its_deadline_reports_a_timeout_failure() {
    let provider = stdio_provider("echo", HashMap::new());
    let mut settings = GatewaySettings::default();
    settings.scan_deadline = Duration::from_millis(1);

    match scanner::scan(&provider, &settings).await {
        ScanResult::Failure { reasons, .. } => {
            assert!(reasons[0].contains("did not complete"));
        }
        ScanResult::Success { .. } => panic!("expected a deadline failure"),
    }
}
