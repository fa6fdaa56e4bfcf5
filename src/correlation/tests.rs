use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::*;
use crate::args::PositiveUsize;
use crate::error::{CorrelationError, ErrorKind};
use crate::exec::{ConcurrentExecutor, ExecutorConfig};
use crate::params::ParameterStore;

fn run_async_test<F>(future: F) -> Result<(), String>
where
    F: Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(future)
}

fn engine_with(entries: &[(&str, Value)]) -> CorrelationEngine {
    let store = Arc::new(ParameterStore::new());
    for (name, value) in entries {
        store.set(*name, value.clone());
    }
    CorrelationEngine::new(store)
}

#[derive(Default)]
struct MockDispatcher {
    counter: AtomicU64,
}

#[async_trait]
impl StepDispatcher for MockDispatcher {
    async fn dispatch(&self, request: &Value) -> Result<ResponseData, String> {
        let path = request
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing path".to_owned())?;
        match path {
            "/login" => Ok(ResponseData::new(
                200,
                vec![("Set-Cookie".to_owned(), "sid=s-1; Path=/".to_owned())],
                r#"{"token":"abc"}"#.to_owned(),
            )),
            "/profile" => {
                let auth = request
                    .pointer("/headers/Authorization")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(ResponseData::from_json(json!({ "auth": auth })))
            }
            "/counter" => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                Ok(ResponseData::from_json(json!({ "n": n })))
            }
            "/echo" => Ok(ResponseData::from_json(
                request.get("body").cloned().unwrap_or(Value::Null),
            )),
            other => Err(format!("unknown path {}", other)),
        }
    }
}

fn step(name: &str, request: Value, extract: Vec<ExtractionRule>) -> ChainStep {
    ChainStep {
        name: name.to_owned(),
        request,
        extract,
        expect_status: Some(200),
        assertions: Vec::new(),
    }
}

fn counter_echo_chain() -> Result<Arc<StepChain>, String> {
    counter_echo_chain_with(Arc::new(MockDispatcher::default()))
}

fn counter_echo_chain_with(dispatcher: Arc<dyn StepDispatcher>) -> Result<Arc<StepChain>, String> {
    let steps = vec![
        step(
            "count",
            json!({ "path": "/counter" }),
            vec![ExtractionRule::json_path("n", "$.n")],
        ),
        step(
            "echo",
            json!({ "path": "/echo", "body": { "n": "${n}" } }),
            vec![ExtractionRule::json_path("echoed", "$.n")],
        ),
    ];
    StepChain::new(steps, dispatcher)
        .map(Arc::new)
        .map_err(|err| err.to_string())
}

/// Panics on its first call, then answers like [`MockDispatcher`].
#[derive(Default)]
struct PanicOnceDispatcher {
    inner: MockDispatcher,
    tripped: AtomicBool,
}

#[async_trait]
#[expect(clippy::panic, reason = "A dispatcher panic must only fail its own step")]
impl StepDispatcher for PanicOnceDispatcher {
    async fn dispatch(&self, request: &Value) -> Result<ResponseData, String> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("dispatcher blew up");
        }
        self.inner.dispatch(request).await
    }
}

#[test]
fn resolves_bearer_token() -> Result<(), String> {
    let engine = engine_with(&[("token", json!("abc123"))]);
    let resolved = engine
        .resolve(&json!({ "Authorization": "Bearer ${token}" }))
        .map_err(|err| err.to_string())?;
    if resolved != json!({ "Authorization": "Bearer abc123" }) {
        return Err(format!("Unexpected resolution: {}", resolved));
    }
    Ok(())
}

#[test]
fn missing_parameter_fails_unless_left() -> Result<(), String> {
    let engine = engine_with(&[]);
    match engine.resolve(&json!({ "x": "${missing}" })) {
        Err(err) if err.kind() == ErrorKind::UnresolvedParameter => {}
        other => return Err(format!("Expected UnresolvedParameter, got {:?}", other)),
    }

    let lenient = engine.with_mode(UnresolvedMode::Leave);
    let kept = lenient
        .resolve_str("id=${missing}")
        .map_err(|err| err.to_string())?;
    if kept != "id=${missing}" {
        return Err(format!("Expected placeholder kept, got {}", kept));
    }
    Ok(())
}

#[test]
fn resolves_keys_nested_values_and_builtins() -> Result<(), String> {
    let engine = engine_with(&[("field", json!("name")), ("count", json!(3))]);
    let resolved = engine
        .resolve(&json!({
            "${field}": ["${count}", { "deep": "n=${count}" }, 7, null],
            "fixed": "${random_num(4, 4)}",
        }))
        .map_err(|err| err.to_string())?;
    let expected = json!({
        "name": ["3", { "deep": "n=3" }, 7, null],
        "fixed": "4",
    });
    if resolved != expected {
        return Err(format!("Unexpected resolution: {}", resolved));
    }

    let shadowed = engine_with(&[("timestamp", json!("frozen"))]);
    if shadowed
        .resolve_str("${timestamp}")
        .map_err(|err| err.to_string())?
        != "frozen"
    {
        return Err("Store entries should shadow built-ins".to_owned());
    }
    Ok(())
}

#[test]
fn two_placeholders_resolve_in_any_order() -> Result<(), String> {
    let engine = engine_with(&[("a", json!("first")), ("b", json!(2))]);
    for (template, expected) in [
        (r#"{"v":"${a}-${b}"}"#, json!({ "v": "first-2" })),
        (r#"{"v":"${b}-${a}"}"#, json!({ "v": "2-first" })),
    ] {
        let parsed: Value = serde_json::from_str(template).map_err(|err| err.to_string())?;
        let resolved = engine.resolve(&parsed).map_err(|err| err.to_string())?;
        if resolved != expected {
            return Err(format!("{} resolved to {}", template, resolved));
        }
    }
    Ok(())
}

#[test]
fn malformed_placeholders_stay_literal() -> Result<(), String> {
    let engine = engine_with(&[("a", json!("x"))]);
    let rendered = engine
        .resolve_str("${} ${a} ${a")
        .map_err(|err| err.to_string())?;
    if rendered != "${} x ${a" {
        return Err(format!("Unexpected rendering: {}", rendered));
    }
    Ok(())
}

#[test]
fn placeholder_scan_lists_names() -> Result<(), String> {
    let names = template::placeholders("${ a }/${b}/${}/${c");
    if names != vec!["a", "b"] {
        return Err(format!("Unexpected names: {:?}", names));
    }
    Ok(())
}

#[test]
fn extracts_json_path_into_store() -> Result<(), String> {
    let engine = engine_with(&[]);
    let response = ResponseData::from_json(json!({ "id": 42 }));
    engine
        .extract(&response, &[ExtractionRule::json_path("uid", "$.id")])
        .map_err(|err| err.to_string())?;
    if engine.store().get("uid").map_err(|err| err.to_string())? != json!(42) {
        return Err("Expected uid == 42".to_owned());
    }
    Ok(())
}

#[test]
fn failed_required_rule_writes_nothing() -> Result<(), String> {
    let engine = engine_with(&[]);
    let response = ResponseData::from_json(json!({ "id": 42 }));
    let rules = [
        ExtractionRule::json_path("first", "$.id"),
        ExtractionRule::json_path("uid", "$.missing"),
    ];
    match engine.extract(&response, &rules) {
        Err(err @ CorrelationError::ExtractionFailed { .. }) if err.kind() == ErrorKind::ExtractionFailed => {}
        other => return Err(format!("Expected ExtractionFailed, got {:?}", other)),
    }
    if engine.store().contains("uid") || engine.store().contains("first") {
        return Err("No value may be written when a required rule fails".to_owned());
    }

    let optional = [
        ExtractionRule::json_path("first", "$.id"),
        ExtractionRule::json_path("uid", "$.missing").optional(),
    ];
    engine
        .extract(&response, &optional)
        .map_err(|err| err.to_string())?;
    if !engine.store().contains("first") || engine.store().contains("uid") {
        return Err("Optional misses should be skipped silently".to_owned());
    }
    Ok(())
}

#[test]
fn extracts_from_headers_cookies_regex_and_status() -> Result<(), String> {
    let engine = engine_with(&[]);
    let response = ResponseData::new(
        201,
        vec![
            ("X-Request-Id".to_owned(), "req-9".to_owned()),
            ("set-cookie".to_owned(), "theme=dark".to_owned()),
            ("Set-Cookie".to_owned(), "sid=s-77; HttpOnly".to_owned()),
        ],
        "order=A-17 ready".to_owned(),
    );
    let rules = [
        ExtractionRule::header("request_id", "x-request-id"),
        ExtractionRule::new("session", ExtractSource::Cookie { name: "sid".to_owned() }),
        ExtractionRule::regex("order", r"order=([A-Z]-\d+)", 1),
        ExtractionRule::new("status", ExtractSource::StatusCode),
        ExtractionRule::new("size", ExtractSource::BodyLength),
    ];
    engine
        .extract(&response, &rules)
        .map_err(|err| err.to_string())?;

    let expected = BTreeMap::from([
        ("order".to_owned(), json!("A-17")),
        ("request_id".to_owned(), json!("req-9")),
        ("session".to_owned(), json!("s-77")),
        ("size".to_owned(), json!(16)),
        ("status".to_owned(), json!(201)),
    ]);
    if engine.store().get_all() != expected {
        return Err(format!("Unexpected extraction: {:?}", engine.store().get_all()));
    }
    Ok(())
}

#[test]
fn invalid_patterns_are_config_errors() -> Result<(), String> {
    let rules = [ExtractionRule::regex("bad", "(unclosed", 1)];
    match CompiledRules::compile(&rules) {
        Err(err) if err.kind() == ErrorKind::InvalidConfig => Ok(()),
        other => Err(format!("Expected InvalidConfig, got {:?}", other)),
    }
}

#[test]
fn rules_deserialize_from_tagged_config() -> Result<(), String> {
    let rules: Vec<ExtractionRule> = serde_json::from_value(json!([
        { "target": "uid", "kind": "json_path", "path": "$.id" },
        { "target": "code", "kind": "regex", "pattern": "code=(\\d+)", "required": false },
        { "target": "status", "kind": "status_code" },
    ]))
    .map_err(|err| err.to_string())?;
    let expected = vec![
        ExtractionRule::json_path("uid", "$.id"),
        ExtractionRule::regex("code", "code=(\\d+)", 1).optional(),
        ExtractionRule::new("status", ExtractSource::StatusCode),
    ];
    if rules != expected {
        return Err(format!("Unexpected rules: {:?}", rules));
    }
    Ok(())
}

#[test]
fn chain_passes_token_between_steps() -> Result<(), String> {
    run_async_test(async {
        let steps = vec![
            step(
                "login",
                json!({ "path": "/login" }),
                vec![
                    ExtractionRule::json_path("token", "$.token"),
                    ExtractionRule::new("sid", ExtractSource::Cookie { name: "sid".to_owned() }),
                ],
            ),
            step(
                "profile",
                json!({ "path": "/profile", "headers": { "Authorization": "Bearer ${token}" } }),
                vec![ExtractionRule::json_path("seen", "$.auth")],
            ),
        ];
        let chain = StepChain::new(steps, Arc::new(MockDispatcher::default()))
            .map_err(|err| err.to_string())?;
        let report = chain.run(Arc::new(ParameterStore::new())).await;

        if !report.success {
            return Err(format!("Chain failed: {:?}", report));
        }
        if report.parameters.get("seen") != Some(&json!("Bearer abc"))
            || report.parameters.get("sid") != Some(&json!("s-1"))
        {
            return Err(format!("Unexpected parameters: {:?}", report.parameters));
        }
        Ok(())
    })
}

#[test]
fn failure_policy_controls_later_steps() -> Result<(), String> {
    run_async_test(async {
        let mut login = step("login", json!({ "path": "/login" }), vec![]);
        login.expect_status = Some(201);
        let steps = vec![
            login,
            step("echo", json!({ "path": "/echo", "body": "ok" }), vec![]),
        ];

        let stop = StepChain::new(steps.clone(), Arc::new(MockDispatcher::default()))
            .map_err(|err| err.to_string())?;
        let report = stop.run(Arc::new(ParameterStore::new())).await;
        let statuses: Vec<_> = report.steps.iter().map(|step| step.status).collect();
        if statuses != vec![StepStatus::Failed, StepStatus::Skipped] {
            return Err(format!("Unexpected stop statuses: {:?}", statuses));
        }

        let proceed = StepChain::new(steps, Arc::new(MockDispatcher::default()))
            .map_err(|err| err.to_string())?
            .with_policy(FailurePolicy::Continue);
        let report = proceed.run(Arc::new(ParameterStore::new())).await;
        let statuses: Vec<_> = report.steps.iter().map(|step| step.status).collect();
        if statuses != vec![StepStatus::Failed, StepStatus::Passed] || report.success {
            return Err(format!("Unexpected continue statuses: {:?}", statuses));
        }
        Ok(())
    })
}

#[test]
fn per_iteration_stores_stay_isolated() -> Result<(), String> {
    run_async_test(async {
        let chain = counter_echo_chain()?;
        let store = Arc::new(ParameterStore::new());
        let reports = chain
            .run_parallel(Arc::clone(&store), 4, StoreIsolation::PerIteration)
            .await;

        if reports.len() != 4 {
            return Err(format!("Expected 4 reports, got {}", reports.len()));
        }
        for report in &reports {
            let n = report.parameters.get("n").map(Value::to_string);
            let echoed = report
                .parameters
                .get("echoed")
                .and_then(Value::as_str)
                .map(str::to_owned);
            if !report.success || n.is_none() || n != echoed {
                return Err(format!("Iteration saw foreign values: {:?}", report));
            }
        }
        if !store.is_empty() {
            return Err("Isolated iterations must not write the session store".to_owned());
        }
        Ok(())
    })
}

#[test]
fn shared_store_iterations_advance_together() -> Result<(), String> {
    run_async_test(async {
        let chain = counter_echo_chain()?;
        let store = Arc::new(ParameterStore::new());
        let reports = chain
            .run_parallel(Arc::clone(&store), 3, StoreIsolation::SharedWithBarrier)
            .await;

        if reports.len() != 3 || reports.iter().any(|report| !report.success) {
            return Err(format!("Shared iterations failed: {:?}", reports));
        }
        let echoed: Vec<_> = reports
            .iter()
            .map(|report| report.parameters.get("echoed").cloned())
            .collect();
        if echoed.windows(2).any(|pair| pair.first() != pair.last()) {
            return Err(format!("Shared snapshots diverged: {:?}", echoed));
        }
        if !store.contains("n") {
            return Err("Shared iterations should write the session store".to_owned());
        }
        Ok(())
    })
}

#[test]
fn chain_runs_as_executor_tasks() -> Result<(), String> {
    run_async_test(async {
        let chain = counter_echo_chain()?;
        let factory = chain.task_factory(BTreeMap::new());
        let workers = PositiveUsize::try_from(2).map_err(|err| err.to_string())?;
        let executor =
            ConcurrentExecutor::new(ExecutorConfig::new(workers)).map_err(|err| err.to_string())?;
        let results = executor.submit(&factory, 3).await;

        if results.len() != 3 || results.iter().any(|result| !result.success) {
            return Err(format!("Chain tasks failed: {:?}", results));
        }
        Ok(())
    })
}

#[test]
fn panicking_dispatch_fails_one_iteration_without_stalling_others() -> Result<(), String> {
    run_async_test(async {
        let chain = counter_echo_chain_with(Arc::new(PanicOnceDispatcher::default()))?;
        let store = Arc::new(ParameterStore::new());
        let reports = tokio::time::timeout(
            Duration::from_secs(3),
            chain.run_parallel(Arc::clone(&store), 3, StoreIsolation::SharedWithBarrier),
        )
        .await
        .map_err(|elapsed| format!("Iterations stalled at the barrier: {}", elapsed))?;

        if reports.len() != 3 {
            return Err(format!("Expected 3 reports, got {}", reports.len()));
        }
        let failed: Vec<&ChainReport> = reports.iter().filter(|report| !report.success).collect();
        let [report] = failed.as_slice() else {
            return Err(format!("Expected exactly one failed iteration: {:?}", reports));
        };
        let statuses: Vec<StepStatus> = report.steps.iter().map(|step| step.status).collect();
        if statuses != vec![StepStatus::Failed, StepStatus::Skipped] {
            return Err(format!("Unexpected statuses: {:?}", statuses));
        }
        if !report.first_error().is_some_and(|error| error.contains("panicked")) {
            return Err(format!("Missing panic message: {:?}", report.first_error()));
        }
        Ok(())
    })
}

fn profile_response() -> ResponseData {
    ResponseData::from_json(json!({
        "user": { "id": 7, "name": "ada", "roles": ["admin", "dev"] },
        "balance": "12.5",
        "items": [1, 2, 3],
    }))
}

#[test]
fn assertions_check_json_text_numbers_and_lengths() -> Result<(), String> {
    let passing: Vec<Assertion> = serde_json::from_value(json!([
        { "kind": "json_equals", "path": "$.user.name", "expected": "ada" },
        { "kind": "json_contains", "path": "$.user.roles", "expected": "dev" },
        { "kind": "json_contains", "path": "$.user", "expected": { "id": 7 } },
        { "kind": "json_exists", "path": "$.items" },
        { "kind": "body_contains", "text": "admin" },
        { "kind": "regex", "pattern": "\"id\":\\s*7" },
        { "kind": "compare", "path": "$.user.id", "op": "ge", "value": 7 },
        { "kind": "compare", "path": "$.balance", "op": "lt", "value": 20 },
        { "kind": "between", "path": "$.balance", "min": 10, "max": 12.5 },
        { "kind": "length", "path": "$.items", "expected": 3 },
    ]))
    .map_err(|err| err.to_string())?;
    let compiled = CompiledAssertions::compile(&passing).map_err(|err| err.to_string())?;
    compiled
        .check(&profile_response())
        .map_err(|err| format!("Expected all assertions to pass: {}", err))?;

    let failing = [
        Assertion::JsonEquals {
            path: "$.user.name".to_owned(),
            expected: json!("bob"),
        },
        Assertion::JsonExists {
            path: "$.missing".to_owned(),
        },
        Assertion::Compare {
            path: "$.user.id".to_owned(),
            op: CompareOp::Gt,
            value: 7.into(),
        },
        Assertion::Length {
            path: Some("$.user.roles".to_owned()),
            expected: 3,
        },
        Assertion::Compare {
            path: "$.user.name".to_owned(),
            op: CompareOp::Eq,
            value: 1.into(),
        },
    ];
    for assertion in failing {
        let compiled = CompiledAssertions::compile(std::slice::from_ref(&assertion))
            .map_err(|err| err.to_string())?;
        match compiled.check(&profile_response()) {
            Err(err @ CorrelationError::AssertionFailed { .. })
                if err.kind() == ErrorKind::AssertionFailed => {}
            other => return Err(format!("{:?} should fail, got {:?}", assertion, other)),
        }
    }
    Ok(())
}

#[test]
fn malformed_assertions_are_config_errors() -> Result<(), String> {
    let assertions = [Assertion::Regex {
        pattern: "(unclosed".to_owned(),
    }];
    match CompiledAssertions::compile(&assertions) {
        Err(err) if err.kind() == ErrorKind::InvalidConfig => Ok(()),
        other => Err(format!("Expected InvalidConfig, got {:?}", other)),
    }
}

#[test]
fn failing_assertion_fails_its_step_after_extraction() -> Result<(), String> {
    run_async_test(async {
        let mut echo = step(
            "echo",
            json!({ "path": "/echo", "body": { "n": "${n}" } }),
            vec![ExtractionRule::json_path("echoed", "$.n")],
        );
        echo.assertions = vec![Assertion::JsonEquals {
            path: "$.n".to_owned(),
            expected: json!("never"),
        }];
        let steps = vec![
            step(
                "count",
                json!({ "path": "/counter" }),
                vec![ExtractionRule::json_path("n", "$.n")],
            ),
            echo,
            step("again", json!({ "path": "/counter" }), vec![]),
        ];
        let chain = StepChain::new(steps, Arc::new(MockDispatcher::default()))
            .map_err(|err| err.to_string())?;
        let report = chain.run(Arc::new(ParameterStore::new())).await;

        let statuses: Vec<StepStatus> = report.steps.iter().map(|step| step.status).collect();
        if statuses != vec![StepStatus::Passed, StepStatus::Failed, StepStatus::Skipped] {
            return Err(format!("Unexpected statuses: {:?}", statuses));
        }
        let echo_report = report.steps.get(1).ok_or("Missing echo report")?;
        if echo_report.extracted != vec!["echoed".to_owned()] {
            return Err(format!("Extraction should run first: {:?}", echo_report));
        }
        if !report.first_error().is_some_and(|error| error.contains("Assertion")) {
            return Err(format!("Unexpected error: {:?}", report.first_error()));
        }
        Ok(())
    })
}

#[test]
fn steps_read_assertions_from_config() -> Result<(), String> {
    let parsed: ChainStep = toml::from_str(
        r#"
name = "profile"
request = { path = "/profile" }
assert = [
  { kind = "json_equals", path = "$.name", expected = "ada" },
  { kind = "length", expected = 2 },
]
"#,
    )
    .map_err(|err| err.to_string())?;
    let expected = vec![
        Assertion::JsonEquals {
            path: "$.name".to_owned(),
            expected: json!("ada"),
        },
        Assertion::Length {
            path: None,
            expected: 2,
        },
    ];
    if parsed.assertions != expected {
        return Err(format!("Unexpected assertions: {:?}", parsed.assertions));
    }
    Ok(())
}
