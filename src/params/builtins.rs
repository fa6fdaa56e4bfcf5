use chrono::{Local, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;

use crate::error::CorrelationError;

const RANDOM_NUM_MIN: i64 = 1000;
const RANDOM_NUM_MAX: i64 = 9999;
const RANDOM_STR_LEN: usize = 10;
const RANDOM_STR_MAX_LEN: usize = 4096;

/// Evaluates a built-in dynamic value such as `timestamp` or
/// `random_num(1, 10)`. Returns `None` when `expr` names no built-in.
///
/// # Errors
///
/// Returns `InvalidBuiltinArgs` when a known built-in gets bad arguments.
pub fn evaluate(expr: &str) -> Option<Result<Value, CorrelationError>> {
    let (name, args) = split_call(expr.trim());
    let value = match name {
        "timestamp" => no_args(name, &args).map(|()| Value::from(Utc::now().timestamp())),
        "timestamp_ms" => no_args(name, &args).map(|()| Value::from(Utc::now().timestamp_millis())),
        "date" => no_args(name, &args)
            .map(|()| Value::from(Local::now().format("%Y-%m-%d").to_string())),
        "datetime" => no_args(name, &args)
            .map(|()| Value::from(Local::now().format("%Y-%m-%d %H:%M:%S").to_string())),
        "random_num" => random_num(name, &args),
        "random_str" => random_str(name, &args),
        _ => return None,
    };
    Some(value)
}

/// `name(a, b)` splits into `("name", ["a", "b"])`; a bare name has no args.
fn split_call(expr: &str) -> (&str, Vec<&str>) {
    let Some(open) = expr.find('(') else {
        return (expr, Vec::new());
    };
    let (name, rest) = expr.split_at(open);
    let inner = rest
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'));
    match inner {
        Some(inner) if inner.trim().is_empty() => (name.trim(), Vec::new()),
        Some(inner) => (name.trim(), inner.split(',').map(str::trim).collect()),
        // Malformed call syntax never names a built-in.
        None => (expr, Vec::new()),
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> CorrelationError {
    CorrelationError::InvalidBuiltinArgs {
        name: name.to_owned(),
        reason: reason.into(),
    }
}

fn no_args(name: &str, args: &[&str]) -> Result<(), CorrelationError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(invalid(name, "takes no arguments"))
    }
}

fn random_num(name: &str, args: &[&str]) -> Result<Value, CorrelationError> {
    let (min, max) = match args {
        [] => (RANDOM_NUM_MIN, RANDOM_NUM_MAX),
        [min, max] => {
            let min = min
                .parse::<i64>()
                .map_err(|err| invalid(name, format!("min '{}': {}", min, err)))?;
            let max = max
                .parse::<i64>()
                .map_err(|err| invalid(name, format!("max '{}': {}", max, err)))?;
            (min, max)
        }
        _ => return Err(invalid(name, "expects (min, max)")),
    };
    if min > max {
        return Err(invalid(name, format!("min {} is above max {}", min, max)));
    }
    Ok(Value::from(rand::thread_rng().gen_range(min..=max)))
}

fn random_str(name: &str, args: &[&str]) -> Result<Value, CorrelationError> {
    let len = match args {
        [] => RANDOM_STR_LEN,
        [len] => len
            .parse::<usize>()
            .map_err(|err| invalid(name, format!("length '{}': {}", len, err)))?,
        _ => return Err(invalid(name, "expects (length)")),
    };
    if len > RANDOM_STR_MAX_LEN {
        return Err(invalid(
            name,
            format!("length {} exceeds {}", len, RANDOM_STR_MAX_LEN),
        ));
    }
    let value: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    Ok(Value::from(value))
}
