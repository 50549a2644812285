use serde_json::Value;
use std::io::Write;
use std::process::{Command, Stdio};

fn run_host(args: &[&str], input: &str) -> Vec<Value> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_plugin-control"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn host");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_host_session() {
    let bundles = tempfile::tempdir().unwrap();
    let weather = bundles.path().join("weather");
    std::fs::create_dir(&weather).unwrap();
    std::fs::write(
        weather.join("plugin.json"),
        r#"{"name":"weather","version":"1.0.0","permissions":["objectModelRead"]}"#,
    )
    .unwrap();

    let config = bundles.path().join("config.json");
    std::fs::write(
        &config,
        format!(r#"{{"plugin_directory": {:?}}}"#, bundles.path().to_string_lossy()),
    )
    .unwrap();

    let input = [
        r#"{"command":"InstallPlugin","pluginFile":"weather"}"#,
        r#"{"caller":"plugin:weather","command":"SetPluginData","plugin":"weather","key":"apiKey","value":"abc123"}"#,
        r#"{"caller":"plugin:other","command":"SetPluginData","plugin":"weather","key":"apiKey","value":"x"}"#,
        r#"{"command":"StartPlugin","plugin":"weather"}"#,
        r#"{"command":"UninstallPlugin","plugin":"weather"}"#,
        r#"{"command":"StartPlugin"}"#,
        "not json",
    ]
    .join("\n");

    let responses = run_host(&["--config", config.to_str().unwrap()], &input);
    assert_eq!(responses.len(), 7);

    assert_eq!(responses[0]["success"], true);
    assert_eq!(responses[0]["result"]["state"], "installed");

    assert_eq!(responses[1]["success"], true);
    assert_eq!(responses[1]["result"]["key"], "apiKey");

    assert_eq!(responses[2]["success"], false);
    assert_eq!(responses[2]["errorType"], "PermissionDenied");

    assert_eq!(responses[3]["result"]["state"], "starting");

    assert_eq!(responses[4]["errorType"], "InvalidState");
    assert_eq!(responses[5]["errorType"], "InvalidRequest");
    assert_eq!(responses[6]["errorType"], "InvalidRequest");
}

#[test]
fn test_plugin_caller_flag() {
    let responses = run_host(
        &["--config", "/nonexistent/config.json", "--caller", "plugin:weather"],
        r#"{"command":"StartPlugin","plugin":"weather"}"#,
    );
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["errorType"], "PermissionDenied");
}
