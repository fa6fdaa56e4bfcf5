mod support_http;

use std::fs;

use serde_json::json;
use tempfile::tempdir;

use support_http::{run_tpsearch, spawn_http_server, stdout_json};

fn write_scenario(base: &str, profile_header: &str) -> Result<(tempfile::TempDir, String), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let path = dir.path().join("flow.toml");
    let content = format!(
        r#"
[vars]
user = "ada"

[scenario]
base_url = "{base}"

[[scenario.steps]]
name = "login"
request = {{ method = "POST", path = "login", body = {{ user = "${{user}}" }} }}
expect_status = 200
extract = [
    {{ target = "token", kind = "json_path", path = "$.token" }},
    {{ target = "user_id", kind = "json_path", path = "$.id" }},
]

[[scenario.steps]]
name = "profile"
request = {{ path = "profile", headers = {{ Authorization = "{profile_header}" }} }}
expect_status = 200
extract = [{{ target = "name", kind = "json_path", path = "$.name" }}]
"#
    );
    fs::write(&path, content).map_err(|err| format!("write config failed: {}", err))?;
    Ok((dir, path.to_string_lossy().into_owned()))
}

#[test]
fn e2e_chain_threads_token_into_next_step() -> Result<(), String> {
    let (base, _server) = spawn_http_server()?;
    let (_dir, config) = write_scenario(&base, "Bearer ${token}")?;
    let output = run_tpsearch(["chain", "--config", &config, "--output", "json"])?;
    if !output.status.success() {
        return Err(format!(
            "chain failed\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    let reports = stdout_json(&output)?;
    let report = reports.get(0).ok_or("Missing report")?;
    let parameters = report.get("parameters").ok_or("Missing parameters")?;
    if parameters.get("token") != Some(&json!("e2e-token"))
        || parameters.get("user_id") != Some(&json!(11))
        || parameters.get("name") != Some(&json!("ada"))
    {
        return Err(format!("Unexpected parameters {}", parameters));
    }
    Ok(())
}

#[test]
fn e2e_chain_failure_exits_non_zero() -> Result<(), String> {
    let (base, _server) = spawn_http_server()?;
    let (_dir, config) = write_scenario(&base, "Bearer wrong")?;
    let output = run_tpsearch([
        "chain",
        "--config",
        &config,
        "--iterations",
        "2",
        "--output",
        "json",
    ])?;
    if output.status.success() {
        return Err("Expected the failing chain to exit non-zero".to_owned());
    }
    let reports = stdout_json(&output)?;
    let statuses: Vec<&str> = reports
        .as_array()
        .ok_or("Expected an array of reports")?
        .iter()
        .filter_map(|report| report.pointer("/steps/1/status"))
        .filter_map(serde_json::Value::as_str)
        .collect();
    if statuses != vec!["failed", "failed"] {
        return Err(format!("Unexpected step statuses {:?}", statuses));
    }
    Ok(())
}
