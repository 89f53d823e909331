use grantseq_core::simulator::{run_scenario, Scenario};
use grantseq_core::{ConfigError, GrantError, SessionStatus};
use pretty_assertions::assert_eq;
use std::io::Write;

#[tokio::test]
async fn test_demo_scenario() {
    let report = run_scenario(Scenario::demo()).await.unwrap();

    assert_eq!(report.status, SessionStatus::Succeeded);
    assert!(!report.stalled);
    assert_eq!(report.results.get("contacts.read"), Some(true));
    assert_eq!(report.results.get("sms.read"), Some(true));
    assert_eq!(report.results.get("calendar.read"), Some(false));
    assert_eq!(report.results.get("sensors.body"), Some(true));
    // declined at the rationale, never requested
    assert_eq!(report.results.get("phone.call"), None);
    assert!(report.requests.iter().all(|r| r.capabilities != vec!["phone.call".to_string()]));

    let titles: Vec<&str> = report.prompts.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["Capability required: Read contacts", "Calls and body sensors"]);
    assert!(report.passed());
}

#[tokio::test]
async fn test_scenario_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[capability]]
name = "location"
decision = "deny"

[[capability]]
name = "storage"
granted = true

[[request]]
kind = "group"
title = "Maps"
message = "Show where you are"

[[request.children]]
kind = "leaf"
name = "location"

[[request.children]]
kind = "leaf"
name = "storage"
critical = false
"#
    )
    .unwrap();

    let scenario = Scenario::from_file(file.path()).unwrap();
    let report = run_scenario(scenario).await.unwrap();

    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(report.results.to_string(), "{location: false, storage: true}");
    assert_eq!(report.requests.len(), 1);
    assert!(report.generate_text().contains("location: denied"));
}

#[tokio::test]
async fn test_ignored_request_stalls_and_cancels() {
    let scenario = Scenario::from_toml_str(
        r#"
settle_ms = 50

[[capability]]
name = "camera"
decision = "ignore"

[[request]]
kind = "leaf"
name = "camera"
"#,
    )
    .unwrap();

    let report = run_scenario(scenario).await.unwrap();
    assert!(report.stalled);
    assert_eq!(report.status, SessionStatus::Cancelled);
    assert_eq!(report.requests.len(), 1);
    assert!(report.results.is_empty());
}

#[tokio::test]
async fn test_invalid_scenario_tree() {
    let scenario = Scenario::from_toml_str(
        r#"
[[request]]
kind = "group"
children = []
"#,
    )
    .unwrap();

    assert!(matches!(run_scenario(scenario).await, Err(GrantError::InvalidNode(_))));
}

#[test]
fn test_scenario_config_validated() {
    assert!(matches!(
        Scenario::from_toml_str("[config]\ncode_ceiling = 0"),
        Err(ConfigError::CodeCeilingOutOfRange { .. })
    ));
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let report = run_scenario(Scenario::demo()).await.unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["status"], "succeeded");
    assert_eq!(json["results"]["calendar.read"], false);
    assert_eq!(json["stalled"], false);
}
