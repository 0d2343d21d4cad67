//! Router-level integration tests against a real stdio subprocess (the
//! `fake_provider` fixture binary), covering the tools/list,
//! tools/call-routing, unknown-namespace, and partial-connect-failure
//! scenarios.

use std::collections::HashMap;
use std::time::Duration;

use mcp_gateway::config::{ProviderConfig, StdioParameters};
use mcp_gateway::error::Error;
use mcp_gateway::protocol::{PromptsGetParams, ToolsCallParams};
use mcp_gateway::router::Router;

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

/// S1 — single stdio provider, list tools: the aggregated listing
/// carries the provider's tool under its namespaced name.
#[tokio::test]
async fn single_provider_tools_list_is_namespaced() {
    let router = Router::new(Duration::from_secs(5));
    let provider = stdio_provider("echo", HashMap::new());

    let failed = router.connect(&[provider]).await.unwrap();
    assert!(failed.is_empty());

    let listing = router.list_tools().await;
    assert_eq!(listing.tools.len(), 1);
    assert_eq!(listing.tools[0].name, "echo_say");

    router.stop().await;
}

/// S2 — a namespaced tools/call is routed to the right provider, and
/// its result comes back with the id/content untouched by the router.
#[tokio::test]
async fn tool_call_is_routed_to_the_named_provider() {
    let router = Router::new(Duration::from_secs(5));
    let a = stdio_provider("a", HashMap::new());
    let b = stdio_provider("b", HashMap::new());

    let failed = router.connect(&[a, b]).await.unwrap();
    assert!(failed.is_empty());

    let result = router
        .route_tool_call(ToolsCallParams {
            name: "b_say".to_string(),
            arguments: serde_json::json!({"who": "world"}),
        })
        .await
        .unwrap();

    assert!(!result.is_error);
    assert_eq!(result.content.len(), 1);

    let prompt = router
        .route_get_prompt(PromptsGetParams {
            name: "b_greet".to_string(),
            arguments: Some(HashMap::from([("who".to_string(), "world".to_string())])),
        })
        .await
        .unwrap();
    assert_eq!(prompt.messages.len(), 1);

    router.stop().await;
}

/// S3 — an unnamespaced or unknown-namespace name is rejected with
/// `-32602` before any provider is contacted.
#[tokio::test]
async fn unknown_namespace_is_rejected_with_invalid_params() {
    let router = Router::new(Duration::from_secs(5));
    let provider = stdio_provider("echo", HashMap::new());
    router.connect(&[provider]).await.unwrap();

    let err = router
        .route_tool_call(ToolsCallParams {
            name: "zz_x".to_string(),
            arguments: serde_json::json!({}),
        })
        .await
        .unwrap_err();

    match err {
        Error::InvalidParams(message) => assert!(message.contains("zz")),
        other => panic!("expected InvalidParams, got {other:?}"),
    }

    router.stop().await;
}

/// S4 — one provider's handshake fails; the session still starts, the
/// healthy provider's tools are still listed, and the failure is
/// reported rather than aborting the whole connect.
#[tokio::test]
async fn one_provider_failing_to_connect_does_not_abort_the_session() {
    let router = Router::new(Duration::from_secs(5));
    let healthy = stdio_provider("echo", HashMap::new());
    let broken = stdio_provider(
        "broken",
        HashMap::from([("FAKE_PROVIDER_EXIT_BEFORE_INIT".to_string(), "1".to_string())]),
    );

    let failed = router.connect(&[healthy, broken]).await.unwrap();
    assert_eq!(failed, vec!["broken".to_string()]);

    let listing = router.list_tools().await;
    assert_eq!(listing.tools.len(), 1);
    assert_eq!(listing.tools[0].name, "echo_say");

    router.stop().await;
}

/// A provider whose `initialize` call itself returns an error is
/// treated the same as a connect failure.
#[tokio::test]
async fn initialize_error_is_treated_as_connect_failure() {
    let router = Router::new(Duration::from_secs(5));
    let broken = stdio_provider(
        "broken",
        HashMap::from([("FAKE_PROVIDER_FAIL_INIT".to_string(), "1".to_string())]),
    );

    let failed = router.connect(&[broken]).await;
    assert!(matches!(failed, Err(Error::ProviderConnect { .. })));
}

/// A provider that never advertises a tools capability is skipped by
/// the aggregated listing without affecting other providers.
#[tokio::test]
async fn provider_without_tools_capability_is_skipped_in_listing() {
    let router = Router::new(Duration::from_secs(5));
    let no_tools = stdio_provider(
        "notools",
        HashMap::from([("FAKE_PROVIDER_NO_TOOLS".to_string(), "1".to_string())]),
    );
    let healthy = stdio_provider("echo", HashMap::new());

    let failed = router.connect(&[no_tools, healthy]).await.unwrap();
    assert!(failed.is_empty());

    let listing = router.list_tools().await;
    assert_eq!(listing.tools.len(), 1);
    assert_eq!(listing.tools[0].name, "echo_say");

    router.stop().await;
}

/// A provider that takes longer than the router's per-request timeout
/// to answer surfaces as `Error::Timeout`, not a hang.
#[tokio::test]
async fn slow_provider_call_times_out() {
    let router = Router::new(Duration::from_millis(200));
    let slow = stdio_provider(
        "slow",
        HashMap::from([("FAKE_PROVIDER_DELAY_MS".to_string(), "2000".to_string())]),
    );
    router.connect(&[slow]).await.unwrap();

    let err = router
        .route_tool_call(ToolsCallParams {
            name: "slow_say".to_string(),
            arguments: serde_json::json!({}),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));
    router.stop().await;
}
