//! JSON wire decoding: the event-parsing boundary.
//!
//! Everything that comes off the network passes through here before it
//! reaches the cache. Decoding either yields fully validated domain types
//! or an error; nothing half-parsed leaks past this module.
//!
//! Stream frames:
//! ```text
//! {"e":"outboundAccountPosition","E":1564034571105,"u":1564034571073,
//!  "B":[{"a":"ETH","f":"10000.000000","l":"0.000000"}]}
//! {"e":"listenKeyExpired","E":1576653824250,"listenKey":"..."}
//! ```
//! Combined-stream envelopes (`{"stream":..,"data":{..}}`) are unwrapped.

use std::time::Duration;

use balsync_types::{
    AccountSnapshot, AccountUpdate, AssetBalance, BalsyncError, KeepAlive, Result, SessionGrant,
    SessionToken, UpdateEvent, constants,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// REST error code for an unknown or expired session token.
const CODE_SESSION_NOT_FOUND: i64 = -1125;

/// REST error codes meaning the credentials themselves were rejected.
const AUTH_ERROR_CODES: [i64; 3] = [-1022, -2014, -2015];

#[derive(Deserialize)]
struct RawPosition {
    #[serde(rename = "E")]
    event_time: Value,
    #[serde(rename = "u", default)]
    last_update_time: Option<Value>,
    #[serde(rename = "B")]
    balances: Vec<RawStreamBalance>,
}

#[derive(Deserialize)]
struct RawStreamBalance {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "f")]
    free: String,
    #[serde(rename = "l")]
    locked: String,
}

#[derive(Deserialize)]
struct RawSnapshot {
    balances: Vec<RawSnapshotBalance>,
    #[serde(rename = "updateTime", default)]
    update_time: Option<i64>,
}

#[derive(Deserialize)]
struct RawSnapshotBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Deserialize)]
struct RawSessionOpen {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

#[derive(Deserialize)]
struct RawApiError {
    code: i64,
    #[serde(default)]
    msg: String,
}

fn malformed(reason: impl Into<String>) -> BalsyncError {
    BalsyncError::MalformedEvent {
        reason: reason.into(),
    }
}

/// Millisecond timestamps arrive as numbers or numeric strings.
fn millis(value: &Value) -> Option<DateTime<Utc>> {
    let ms = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp_millis(ms)
}

/// Decode one raw stream frame.
///
/// Unknown event types decode to [`UpdateEvent::Other`] so the caller can
/// skip them without treating them as errors.
///
/// # Errors
/// [`BalsyncError::MalformedEvent`] if the frame is not JSON, has no event
/// type, or an account update carries an unparseable or invalid balance.
pub fn decode_frame(frame: &str) -> Result<UpdateEvent> {
    let mut value: Value =
        serde_json::from_str(frame).map_err(|e| malformed(format!("not JSON: {e}")))?;
    if value.get("stream").is_some() {
        if let Some(data) = value.get_mut("data").map(Value::take) {
            value = data;
        }
    }

    let event_type = value
        .get("e")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing event type field \"e\""))?
        .to_string();

    match event_type.as_str() {
        constants::EVENT_ACCOUNT_POSITION | constants::EVENT_ACCOUNT_INFO => {
            decode_position(value).map(UpdateEvent::AccountUpdate)
        }
        constants::EVENT_SESSION_EXPIRED => {
            let event_time = value
                .get("E")
                .and_then(millis)
                .ok_or_else(|| malformed("listenKeyExpired without event time"))?;
            Ok(UpdateEvent::SessionExpired { event_time })
        }
        _ => Ok(UpdateEvent::Other {
            event_time: value.get("E").and_then(millis),
            event_type,
        }),
    }
}

fn decode_position(value: Value) -> Result<AccountUpdate> {
    let raw: RawPosition = serde_json::from_value(value)
        .map_err(|e| malformed(format!("account update shape: {e}")))?;
    let event_time = millis(&raw.event_time).ok_or_else(|| malformed("bad event time \"E\""))?;

    let balances = raw
        .balances
        .into_iter()
        .map(|b| {
            AssetBalance::parse(b.asset, &b.free, &b.locked).map_err(|e| malformed(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(AccountUpdate {
        event_time,
        last_update_time: raw.last_update_time.as_ref().and_then(millis),
        balances,
    })
}

/// Decode the account snapshot response body.
///
/// # Errors
/// - [`BalsyncError::Serialization`] if the body does not have the expected shape
/// - [`BalsyncError::InvalidBalance`] for a bad amount
/// - [`BalsyncError::InvalidSnapshot`] if an asset appears twice
pub fn decode_account_snapshot(body: &str) -> Result<AccountSnapshot> {
    let raw: RawSnapshot = serde_json::from_str(body)?;
    let balances = raw
        .balances
        .into_iter()
        .map(|b| AssetBalance::parse(b.asset, &b.free, &b.locked))
        .collect::<Result<Vec<_>>>()?;

    let mut snapshot = AccountSnapshot::new(balances);
    if let Some(as_of) = raw.update_time.and_then(DateTime::from_timestamp_millis) {
        snapshot = snapshot.with_as_of(as_of);
    }
    snapshot.validate()?;
    Ok(snapshot)
}

/// Decode the session-open response body.
///
/// The exchange does not echo the token's lifetime, so the caller supplies
/// the documented `validity`.
///
/// # Errors
/// [`BalsyncError::Serialization`] for a malformed body,
/// [`BalsyncError::TransientFetch`] for an empty token.
pub fn decode_session_open(body: &str, validity: Duration) -> Result<SessionGrant> {
    let raw: RawSessionOpen = serde_json::from_str(body)?;
    if raw.listen_key.trim().is_empty() {
        return Err(BalsyncError::transient("session-open returned an empty token"));
    }
    Ok(SessionGrant::new(SessionToken::new(raw.listen_key), validity))
}

/// [`decode_session_open`] with the exchange's standard 60 minute validity.
pub fn decode_session_open_default(body: &str) -> Result<SessionGrant> {
    decode_session_open(
        body,
        Duration::from_millis(constants::DEFAULT_SESSION_VALIDITY_MS),
    )
}

/// Decode a keepalive response body.
///
/// An empty object means renewed. The "unknown token" error code means
/// [`KeepAlive::NotFound`]; any other error code is classified by
/// [`classify_api_error`].
///
/// # Errors
/// Whatever [`classify_api_error`] maps a non-session error code to.
pub fn decode_keep_alive(body: &str) -> Result<KeepAlive> {
    match serde_json::from_str::<RawApiError>(body) {
        Ok(err) if err.code == CODE_SESSION_NOT_FOUND => Ok(KeepAlive::NotFound),
        Ok(_) => Err(classify_api_error(body)),
        Err(_) => Ok(KeepAlive::Renewed),
    }
}

/// Map an exchange error body to the matching [`BalsyncError`].
///
/// Credential errors become [`BalsyncError::Auth`] and the unknown-token
/// code becomes [`BalsyncError::SessionLost`]. Everything else, including
/// unparseable bodies, is transient.
pub fn classify_api_error(body: &str) -> BalsyncError {
    match serde_json::from_str::<RawApiError>(body) {
        Ok(err) if AUTH_ERROR_CODES.contains(&err.code) => {
            BalsyncError::auth(format!("code {}: {}", err.code, err.msg))
        }
        Ok(err) if err.code == CODE_SESSION_NOT_FOUND => BalsyncError::SessionLost {
            reason: format!("code {}: {}", err.code, err.msg),
        },
        Ok(err) => BalsyncError::transient(format!("code {}: {}", err.code, err.msg)),
        Err(_) => BalsyncError::transient(format!("unrecognised error body: {body}")),
    }
}
