use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use super::*;
use crate::error::{CorrelationError, ErrorKind};

#[test]
fn get_reports_missing_key() -> Result<(), String> {
    let store = ParameterStore::new();
    store.set("token", "abc123");
    if store.get("token").map_err(|err| err.to_string())? != json!("abc123") {
        return Err("Unexpected stored value".to_owned());
    }
    match store.get("missing") {
        Err(err @ CorrelationError::KeyNotFound { .. }) if err.kind() == ErrorKind::KeyNotFound => {}
        other => return Err(format!("Expected KeyNotFound, got {:?}", other)),
    }
    if store.get_or("missing", json!(7)) != json!(7) {
        return Err("get_or should fall back to the default".to_owned());
    }
    Ok(())
}

#[test]
fn last_write_wins_and_snapshot_is_detached() -> Result<(), String> {
    let store = ParameterStore::new();
    store.set("id", 1);
    store.set("id", 2);
    let snapshot = store.get_all();
    store.set("id", 3);
    if snapshot.get("id") != Some(&json!(2)) {
        return Err(format!("Snapshot changed: {:?}", snapshot));
    }
    if store.lookup("id") != Some(json!(3)) || store.len() != 1 {
        return Err("Expected the latest write to win".to_owned());
    }
    if store.remove("id").is_none() || !store.is_empty() {
        return Err("Remove should empty the store".to_owned());
    }
    Ok(())
}

#[test]
fn session_clears_on_start_and_drop() -> Result<(), String> {
    let store = Arc::new(ParameterStore::seeded(BTreeMap::from([(
        "stale".to_owned(),
        json!(true),
    )])));
    {
        let session = Session::start(Arc::clone(&store));
        if !session.store().is_empty() {
            return Err("Session start should clear stale entries".to_owned());
        }
        session.store().set("user", "alice");
        if store.len() != 1 {
            return Err("Session writes should reach the shared store".to_owned());
        }
    }
    if !store.is_empty() {
        return Err("Session drop should clear the store".to_owned());
    }
    Ok(())
}

#[test]
fn builtins_produce_values() -> Result<(), String> {
    let Some(Ok(Value::String(text))) = builtins::evaluate("random_str(16)") else {
        return Err("random_str(16) should evaluate".to_owned());
    };
    if text.len() != 16 || !text.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(format!("Unexpected random string: {}", text));
    }

    let Some(Ok(number)) = builtins::evaluate("random_num(5, 5)") else {
        return Err("random_num(5, 5) should evaluate".to_owned());
    };
    if number != json!(5) {
        return Err(format!("Expected 5, got {}", number));
    }

    let Some(Ok(Value::Number(stamp))) = builtins::evaluate("timestamp") else {
        return Err("timestamp should evaluate to a number".to_owned());
    };
    if stamp.as_i64().unwrap_or(0) < 1_600_000_000 {
        return Err(format!("Implausible timestamp {}", stamp));
    }

    let Some(Ok(Value::String(date))) = builtins::evaluate("date") else {
        return Err("date should evaluate to a string".to_owned());
    };
    if date.len() != 10 {
        return Err(format!("Unexpected date format {}", date));
    }
    Ok(())
}

#[test]
fn builtins_reject_bad_arguments() -> Result<(), String> {
    for expr in ["random_num(9, 1)", "random_num(a, 2)", "random_str(1, 2)", "date(1)"] {
        match builtins::evaluate(expr) {
            Some(Err(err)) if err.kind() == ErrorKind::InvalidConfig => {}
            other => return Err(format!("Expected rejection for {}: {:?}", expr, other)),
        }
    }
    if builtins::evaluate("user_id").is_some() {
        return Err("Unknown names are not built-ins".to_owned());
    }
    Ok(())
}

#[test]
fn concurrent_writers_and_readers_keep_the_map_consistent() -> Result<(), String> {
    const WRITERS: u64 = 8;
    const KEYS_PER_WRITER: u64 = 50;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(async {
        let store = Arc::new(ParameterStore::new());
        let mut writers = tokio::task::JoinSet::new();
        for writer in 0..WRITERS {
            let store = Arc::clone(&store);
            writers.spawn(async move {
                for key in 0..KEYS_PER_WRITER {
                    let tag = format!("w{}-{}", writer, key);
                    store.set(tag.clone(), key);
                    store.set("latest", tag.clone());
                    store.commit(vec![
                        ("pair_a".to_owned(), json!(tag.clone())),
                        ("pair_b".to_owned(), json!(tag)),
                    ]);
                    tokio::task::yield_now().await;
                }
            });
        }
        let mut readers = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            readers.spawn(async move {
                for _ in 0..200 {
                    let snapshot = store.get_all();
                    if snapshot.get("pair_a") != snapshot.get("pair_b") {
                        return Err(format!("Torn commit observed: {:?}", snapshot));
                    }
                    tokio::task::yield_now().await;
                }
                Ok(())
            });
        }

        while let Some(joined) = writers.join_next().await {
            joined.map_err(|err| format!("Writer failed: {}", err))?;
        }
        while let Some(joined) = readers.join_next().await {
            joined.map_err(|err| format!("Reader failed: {}", err))??;
        }

        let expected_len = WRITERS.saturating_mul(KEYS_PER_WRITER).saturating_add(3);
        if u64::try_from(store.len()).map_err(|err| err.to_string())? != expected_len {
            return Err(format!("Lost entries: {} of {}", store.len(), expected_len));
        }
        for writer in 0..WRITERS {
            for key in 0..KEYS_PER_WRITER {
                if store.lookup(&format!("w{}-{}", writer, key)) != Some(json!(key)) {
                    return Err(format!("Missing or wrong entry w{}-{}", writer, key));
                }
            }
        }
        let latest = store.get("latest").map_err(|err| err.to_string())?;
        let written = latest
            .as_str()
            .and_then(|tag| tag.strip_prefix('w'))
            .and_then(|rest| rest.split_once('-'))
            .and_then(|(writer, key)| Some((writer.parse::<u64>().ok()?, key.parse::<u64>().ok()?)));
        match written {
            Some((writer, key)) if writer < WRITERS && key < KEYS_PER_WRITER => Ok(()),
            Some(_) | None => Err(format!("Shared key holds a value nobody wrote: {}", latest)),
        }
    })
}
