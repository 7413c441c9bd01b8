use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::events::EventSink;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::values::{parse_date, parse_money};

pub type HandlerResult = Result<serde_json::Value, HandlerErr>;

/// Runs `f` against the open workspace and wraps its result in a response.
pub fn with_workspace<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &dyn EventSink, &serde_json::Value) -> HandlerResult,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, state.events.as_ref(), &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn to_json<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

/// Patch semantics: absent key => `None` (leave as is), `null` => clear.
pub fn get_patch_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<Option<String>>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(serde_json::Value::Null) => Ok(Some(None)),
        Some(serde_json::Value::String(s)) => Ok(Some(Some(s.clone()))),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string or null", key))),
    }
}

pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    Ok(parse_date(key, &raw)?)
}

pub fn get_optional_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match get_optional_str(params, key)? {
        Some(raw) if !raw.trim().is_empty() => Ok(Some(parse_date(key, &raw)?)),
        _ => Ok(None),
    }
}

pub fn get_required_money(params: &serde_json::Value, key: &str) -> Result<Decimal, HandlerErr> {
    let Some(v) = params.get(key).filter(|v| !v.is_null()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    Ok(parse_money(key, v)?)
}

pub fn get_optional_money(params: &serde_json::Value, key: &str) -> Result<Option<Decimal>, HandlerErr> {
    match params.get(key).filter(|v| !v.is_null()) {
        Some(v) => Ok(Some(parse_money(key, v)?)),
        None => Ok(None),
    }
}

/// Integer from a JSON number or a numeric string ("85").
pub fn get_optional_int(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| HandlerErr::bad_params(format!("{} must be an integer", key))),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_required_int(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    get_optional_int(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_string_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must contain only strings", key)))
        })
        .collect()
}

pub fn get_optional_string_array(
    params: &serde_json::Value,
    key: &str,
) -> Result<Vec<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(_) => get_string_array(params, key),
    }
}
