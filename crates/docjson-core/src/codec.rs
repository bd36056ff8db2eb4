//! # Primitive Value Codec
//!
//! Bidirectional conversion between native `Value`s and JSON.
//!
//! Two wire forms exist and never mix within one call:
//! - human-readable: identifiers as strings, date/times as ISO-8601 (or epoch
//!   milliseconds), binary as `{"data", "type"}`
//! - extended (raw): MongoDB Extended JSON wrappers such as `{"$oid": ..}`;
//!   this is also the storage record format
//!
//! Reference and embedded values are graph-level concerns and are handled by
//! the serializer and deserializer, not here.

use crate::primitives::{BINARY_SUBTYPE_GENERIC, BINARY_SUBTYPE_UUID};
use crate::schema::PrimitiveKind;
use crate::types::{Binary, Code, DbRef, DocId, DocjsonError, IdKind, ObjectId, Regex, Timestamp, Value};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value as Json, json};
use std::collections::BTreeMap;
use uuid::Uuid;

/// JSON type name used in error messages.
#[must_use]
pub fn json_type_name(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Json::Number(_) => "float",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn unsupported(kind: PrimitiveKind, json: &Json) -> DocjsonError {
    DocjsonError::unsupported(kind.as_str(), json_type_name(json))
}

fn finite_number(f: f64) -> Result<Number, DocjsonError> {
    Number::from_f64(f).ok_or_else(|| DocjsonError::unsupported("finite float", f.to_string()))
}

// =============================================================================
// DATE/TIME
// =============================================================================

/// Milliseconds since the Unix epoch, truncated toward zero.
///
/// Seconds are floored by the calendar conversion, so a negative instant with
/// a sub-millisecond remainder is moved one millisecond toward zero.
#[must_use]
pub fn epoch_millis(dt: &DateTime<Utc>) -> i64 {
    let micros = i64::from(dt.timestamp_subsec_micros());
    let millis = dt.timestamp().saturating_mul(1000).saturating_add(micros / 1000);
    if millis < 0 && micros % 1000 != 0 {
        millis.saturating_add(1)
    } else {
        millis
    }
}

fn datetime_from_millis(ms: i64) -> Result<DateTime<Utc>, DocjsonError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DocjsonError::malformed("$", format!("{} ms is out of range", ms)))
}

/// Parse a calendar timestamp.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.f]` or `YYYY-MM-DD HH:MM:SS[.f]`
/// (read as UTC), and a bare `YYYY-MM-DD`.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DocjsonError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| DocjsonError::malformed("$", format!("'{}' is not a date/time", s)))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// =============================================================================
// HUMAN-READABLE ENCODING
// =============================================================================

/// Encode a native value into its human-readable JSON form.
pub fn encode_primitive(value: &Value, epoch_mode: bool) -> Result<Json, DocjsonError> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => json!(n),
        Value::Float(f) => Json::Number(finite_number(*f)?),
        Value::String(s) => Json::String(s.clone()),
        Value::DateTime(dt) if epoch_mode => json!(epoch_millis(dt)),
        Value::DateTime(dt) => Json::String(format_datetime(dt)),
        Value::Binary(bin) => json!({
            "data": STANDARD.encode(&bin.bytes),
            "type": bin.subtype,
        }),
        Value::ObjectId(oid) => Json::String(oid.to_hex()),
        Value::Uuid(u) => Json::String(u.to_string()),
        Value::Regex(re) => {
            let mut out = Map::new();
            out.insert("regex".to_string(), Json::String(re.pattern.clone()));
            if !re.flags.is_empty() {
                out.insert("flags".to_string(), Json::String(re.flags.clone()));
            }
            Json::Object(out)
        }
        Value::DbRef(dbref) => {
            let mut out = Map::new();
            out.insert("collection".to_string(), Json::String(dbref.collection.clone()));
            out.insert("id".to_string(), encode_primitive(&dbref.id.to_value(), epoch_mode)?);
            if let Some(db) = &dbref.database {
                out.insert("db".to_string(), Json::String(db.clone()));
            }
            for (key, extra) in &dbref.extra {
                out.insert(key.clone(), encode_primitive(extra, epoch_mode)?);
            }
            Json::Object(out)
        }
        Value::Timestamp(ts) => json!({ "time": ts.time, "inc": ts.inc }),
        Value::Code(code) => json!({
            "code": code.code,
            "scope": match &code.scope {
                Some(scope) => encode_map(scope, epoch_mode)?,
                None => Json::Null,
            },
        }),
        Value::MinKey => json!({ "minKey": true }),
        Value::MaxKey => json!({ "maxKey": true }),
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|item| encode_primitive(item, epoch_mode))
                .collect::<Result<_, _>>()?,
        ),
        Value::Dict(map) => encode_map(map, epoch_mode)?,
        Value::Reference(reference) => encode_primitive(&reference.require_id("$")?.to_value(), epoch_mode)?,
        Value::Embedded(_) => return Err(DocjsonError::unsupported("primitive", "embedded")),
    })
}

fn encode_map(map: &BTreeMap<String, Value>, epoch_mode: bool) -> Result<Json, DocjsonError> {
    let mut out = Map::new();
    for (key, value) in map {
        out.insert(key.clone(), encode_primitive(value, epoch_mode)?);
    }
    Ok(Json::Object(out))
}

// =============================================================================
// HUMAN-READABLE DECODING
// =============================================================================

fn object_str<'a>(obj: &'a Map<String, Json>, key: &str) -> Result<&'a str, DocjsonError> {
    obj.get(key)
        .and_then(Json::as_str)
        .ok_or_else(|| DocjsonError::malformed("$", format!("missing string '{}'", key)))
}

fn object_u32(obj: &Map<String, Json>, key: &str) -> Result<u32, DocjsonError> {
    obj.get(key)
        .and_then(Json::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| DocjsonError::malformed("$", format!("missing 32-bit integer '{}'", key)))
}

fn decode_base64(data: &str) -> Result<Vec<u8>, DocjsonError> {
    STANDARD
        .decode(data)
        .map_err(|e| DocjsonError::malformed("$", format!("invalid base64: {}", e)))
}

/// Decode an identifier whose kind is not declared (DbRef targets).
///
/// Integers become `Int`; strings become `ObjectId` or `Uuid` when they parse
/// as one, `String` otherwise.
pub fn decode_loose_id(json: &Json, raw: bool) -> Result<DocId, DocjsonError> {
    match json {
        Json::Number(n) => n
            .as_i64()
            .map(DocId::Int)
            .ok_or_else(|| DocjsonError::unsupported("identifier", "float")),
        Json::String(s) => Ok(ObjectId::parse_str(s)
            .map(DocId::ObjectId)
            .or_else(|_| Uuid::parse_str(s).map(DocId::Uuid))
            .unwrap_or_else(|_| DocId::String(s.clone()))),
        Json::Object(_) if raw => {
            let value = decode_extended(json, PrimitiveKind::Any)?;
            DocId::from_value(&value)
                .ok_or_else(|| DocjsonError::unsupported("identifier", value.type_name()))
        }
        other => Err(DocjsonError::unsupported("identifier", json_type_name(other))),
    }
}

/// Decode an identifier of a declared kind.
pub fn decode_id(json: &Json, kind: IdKind, raw: bool) -> Result<DocId, DocjsonError> {
    match json {
        Json::Number(n) if kind == IdKind::Int => n
            .as_i64()
            .map(DocId::Int)
            .ok_or_else(|| DocjsonError::malformed("$", format!("{} is not an integer id", n))),
        Json::String(s) => DocId::parse(kind, s),
        Json::Object(_) if raw => {
            let value = decode_extended(json, PrimitiveKind::Any)?;
            DocId::from_value(&value)
                .filter(|id| id.kind() == kind)
                .ok_or_else(|| DocjsonError::unsupported(kind.as_str(), value.type_name()))
        }
        other => Err(DocjsonError::unsupported(kind.as_str(), json_type_name(other))),
    }
}

/// Encode an identifier in either wire form.
pub fn encode_id(id: &DocId, raw: bool) -> Result<Json, DocjsonError> {
    if raw {
        encode_extended(&id.to_value())
    } else {
        encode_primitive(&id.to_value(), false)
    }
}

fn decode_dbref(obj: &Map<String, Json>, raw: bool) -> Result<DbRef, DocjsonError> {
    let (collection_key, id_key, db_key) = if raw {
        ("$ref", "$id", "$db")
    } else {
        ("collection", "id", "db")
    };
    let collection = object_str(obj, collection_key)?;
    let id_json = obj
        .get(id_key)
        .ok_or_else(|| DocjsonError::malformed("$", format!("missing '{}'", id_key)))?;
    let mut dbref = DbRef::new(collection, decode_loose_id(id_json, raw)?);
    if let Some(db) = obj.get(db_key).and_then(Json::as_str) {
        dbref.database = Some(db.to_string());
    }
    for (key, value) in obj {
        if key != collection_key && key != id_key && key != db_key {
            let extra = if raw {
                decode_extended(value, PrimitiveKind::Any)?
            } else {
                decode_primitive(value, PrimitiveKind::Any)?
            };
            dbref.extra.insert(key.clone(), extra);
        }
    }
    Ok(dbref)
}

fn decode_scope(json: Option<&Json>, raw: bool) -> Result<Option<BTreeMap<String, Value>>, DocjsonError> {
    match json {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Object(obj)) => {
            let mut scope = BTreeMap::new();
            for (key, value) in obj {
                let decoded = if raw {
                    decode_extended(value, PrimitiveKind::Any)?
                } else {
                    decode_primitive(value, PrimitiveKind::Any)?
                };
                scope.insert(key.clone(), decoded);
            }
            Ok(Some(scope))
        }
        Some(other) => Err(DocjsonError::unsupported("code scope", json_type_name(other))),
    }
}

/// Decode a human-readable JSON value as a declared primitive kind.
///
/// A JSON type with no rule for `kind` is `UnsupportedPrimitiveType`; the
/// right JSON type with unparseable content is `MalformedInput`.
pub fn decode_primitive(json: &Json, kind: PrimitiveKind) -> Result<Value, DocjsonError> {
    if json.is_null() {
        return Ok(Value::Null);
    }
    match (kind, json) {
        (PrimitiveKind::String, Json::String(s)) => Ok(Value::String(s.clone())),
        (PrimitiveKind::Int, Json::Number(n)) => n
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| unsupported(kind, json)),
        (PrimitiveKind::Float, Json::Number(n)) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| unsupported(kind, json)),
        (PrimitiveKind::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
        (PrimitiveKind::DateTime, Json::Number(n)) => {
            let ms = n.as_i64().ok_or_else(|| unsupported(kind, json))?;
            Ok(Value::DateTime(datetime_from_millis(ms)?))
        }
        (PrimitiveKind::DateTime, Json::String(s)) => Ok(Value::DateTime(parse_datetime(s)?)),
        (PrimitiveKind::Binary, Json::Object(obj)) => {
            let bytes = decode_base64(object_str(obj, "data")?)?;
            let subtype = match obj.get("type") {
                None => BINARY_SUBTYPE_GENERIC,
                Some(_) => u8::try_from(object_u32(obj, "type")?)
                    .map_err(|e| DocjsonError::malformed("$", format!("binary type: {}", e)))?,
            };
            Ok(Value::Binary(Binary::new(subtype, bytes)))
        }
        (PrimitiveKind::ObjectId, Json::String(s)) => Ok(Value::ObjectId(ObjectId::parse_str(s)?)),
        (PrimitiveKind::Uuid, Json::String(s)) => Uuid::parse_str(s)
            .map(Value::Uuid)
            .map_err(|e| DocjsonError::malformed("$", format!("'{}' is not a UUID: {}", s, e))),
        (PrimitiveKind::Regex, Json::Object(obj)) => {
            let flags = obj.get("flags").and_then(Json::as_str).unwrap_or_default();
            Ok(Value::Regex(Regex::new(object_str(obj, "regex")?, flags)))
        }
        (PrimitiveKind::DbRef, Json::Object(obj)) => Ok(Value::DbRef(decode_dbref(obj, false)?)),
        (PrimitiveKind::Timestamp, Json::Object(obj)) => Ok(Value::Timestamp(Timestamp {
            time: object_u32(obj, "time")?,
            inc: object_u32(obj, "inc")?,
        })),
        (PrimitiveKind::Code, Json::Object(obj)) => Ok(Value::Code(Code {
            code: object_str(obj, "code")?.to_string(),
            scope: decode_scope(obj.get("scope"), false)?,
        })),
        (PrimitiveKind::Any, _) => Ok(decode_any(json)),
        _ => Err(unsupported(kind, json)),
    }
}

/// Decode an untyped JSON value from its shape alone.
fn decode_any(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(decode_any).collect()),
        Json::Object(obj) if obj.len() == 1 && obj.get("minKey") == Some(&Json::Bool(true)) => {
            Value::MinKey
        }
        Json::Object(obj) if obj.len() == 1 && obj.get("maxKey") == Some(&Json::Bool(true)) => {
            Value::MaxKey
        }
        Json::Object(obj) => Value::Dict(
            obj.iter()
                .map(|(key, value)| (key.clone(), decode_any(value)))
                .collect(),
        ),
    }
}

// =============================================================================
// EXTENDED (RAW) JSON
// =============================================================================

/// Encode a native value as Extended JSON.
pub fn encode_extended(value: &Value) -> Result<Json, DocjsonError> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => json!(n),
        Value::Float(f) if f.is_nan() => json!({ "$numberDouble": "NaN" }),
        Value::Float(f) if f.is_infinite() && f.is_sign_positive() => {
            json!({ "$numberDouble": "Infinity" })
        }
        Value::Float(f) if f.is_infinite() => json!({ "$numberDouble": "-Infinity" }),
        Value::Float(f) => Json::Number(finite_number(*f)?),
        Value::String(s) => Json::String(s.clone()),
        Value::DateTime(dt) => json!({ "$date": { "$numberLong": dt.timestamp_millis().to_string() } }),
        Value::Binary(bin) => json!({
            "$binary": {
                "base64": STANDARD.encode(&bin.bytes),
                "subType": format!("{:02x}", bin.subtype),
            }
        }),
        Value::ObjectId(oid) => json!({ "$oid": oid.to_hex() }),
        Value::Uuid(u) => json!({ "$uuid": u.to_string() }),
        Value::Regex(re) => json!({
            "$regularExpression": { "pattern": re.pattern, "options": re.flags }
        }),
        Value::DbRef(dbref) => {
            let mut out = Map::new();
            out.insert("$ref".to_string(), Json::String(dbref.collection.clone()));
            out.insert("$id".to_string(), encode_extended(&dbref.id.to_value())?);
            if let Some(db) = &dbref.database {
                out.insert("$db".to_string(), Json::String(db.clone()));
            }
            for (key, extra) in &dbref.extra {
                out.insert(key.clone(), encode_extended(extra)?);
            }
            Json::Object(out)
        }
        Value::Timestamp(ts) => json!({ "$timestamp": { "t": ts.time, "i": ts.inc } }),
        Value::Code(code) => {
            let mut out = Map::new();
            out.insert("$code".to_string(), Json::String(code.code.clone()));
            if let Some(scope) = &code.scope {
                out.insert("$scope".to_string(), encode_extended_map(scope)?);
            }
            Json::Object(out)
        }
        Value::MinKey => json!({ "$minKey": 1 }),
        Value::MaxKey => json!({ "$maxKey": 1 }),
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(encode_extended)
                .collect::<Result<_, _>>()?,
        ),
        Value::Dict(map) => encode_extended_map(map)?,
        Value::Reference(reference) => encode_extended(&reference.require_id("$")?.to_value())?,
        Value::Embedded(_) => return Err(DocjsonError::unsupported("primitive", "embedded")),
    })
}

fn encode_extended_map(map: &BTreeMap<String, Value>) -> Result<Json, DocjsonError> {
    let mut out = Map::new();
    for (key, value) in map {
        out.insert(key.clone(), encode_extended(value)?);
    }
    Ok(Json::Object(out))
}

fn decode_wrapper(key: &str, inner: &Json, obj: &Map<String, Json>) -> Result<Option<Value>, DocjsonError> {
    let value = match (key, inner) {
        ("$oid", Json::String(s)) => Value::ObjectId(ObjectId::parse_str(s)?),
        ("$date", Json::Object(date)) => {
            let ms = object_str(date, "$numberLong")?
                .parse::<i64>()
                .map_err(|e| DocjsonError::malformed("$", format!("$numberLong: {}", e)))?;
            Value::DateTime(datetime_from_millis(ms)?)
        }
        ("$date", Json::Number(n)) => {
            let ms = n
                .as_i64()
                .ok_or_else(|| DocjsonError::unsupported("datetime", "float"))?;
            Value::DateTime(datetime_from_millis(ms)?)
        }
        ("$date", Json::String(s)) => Value::DateTime(parse_datetime(s)?),
        ("$binary", Json::Object(bin)) => {
            let bytes = decode_base64(object_str(bin, "base64")?)?;
            let subtype = u8::from_str_radix(object_str(bin, "subType")?, 16)
                .map_err(|e| DocjsonError::malformed("$", format!("subType: {}", e)))?;
            Value::Binary(Binary::new(subtype, bytes))
        }
        ("$uuid", Json::String(s)) => Value::Uuid(
            Uuid::parse_str(s).map_err(|e| DocjsonError::malformed("$", e.to_string()))?,
        ),
        ("$regularExpression", Json::Object(re)) => Value::Regex(Regex::new(
            object_str(re, "pattern")?,
            re.get("options").and_then(Json::as_str).unwrap_or_default(),
        )),
        ("$ref", Json::String(_)) => Value::DbRef(decode_dbref(obj, true)?),
        ("$timestamp", Json::Object(ts)) => Value::Timestamp(Timestamp {
            time: object_u32(ts, "t")?,
            inc: object_u32(ts, "i")?,
        }),
        ("$code", Json::String(code)) => Value::Code(Code {
            code: code.clone(),
            scope: decode_scope(obj.get("$scope"), true)?,
        }),
        ("$minKey", _) => Value::MinKey,
        ("$maxKey", _) => Value::MaxKey,
        ("$numberDouble", Json::String(s)) => Value::Float(
            s.parse::<f64>()
                .map_err(|e| DocjsonError::malformed("$", format!("$numberDouble: {}", e)))?,
        ),
        ("$numberLong" | "$numberInt", Json::String(s)) => Value::Int(
            s.parse::<i64>()
                .map_err(|e| DocjsonError::malformed("$", format!("{}: {}", key, e)))?,
        ),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Extended JSON wrapper keys, checked in this order.
const WRAPPER_KEYS: [&str; 13] = [
    "$oid",
    "$date",
    "$binary",
    "$uuid",
    "$regularExpression",
    "$ref",
    "$timestamp",
    "$code",
    "$minKey",
    "$maxKey",
    "$numberDouble",
    "$numberLong",
    "$numberInt",
];

fn decode_extended_any(json: &Json) -> Result<Value, DocjsonError> {
    match json {
        Json::Array(items) => Ok(Value::List(
            items
                .iter()
                .map(decode_extended_any)
                .collect::<Result<_, _>>()?,
        )),
        Json::Object(obj) => {
            for key in WRAPPER_KEYS {
                if let Some(inner) = obj.get(key)
                    && let Some(value) = decode_wrapper(key, inner, obj)?
                {
                    return Ok(value);
                }
            }
            let mut map = BTreeMap::new();
            for (key, value) in obj {
                map.insert(key.clone(), decode_extended_any(value)?);
            }
            Ok(Value::Dict(map))
        }
        other => Ok(decode_any(other)),
    }
}

/// Decode an Extended JSON value as a declared primitive kind.
pub fn decode_extended(json: &Json, kind: PrimitiveKind) -> Result<Value, DocjsonError> {
    let value = decode_extended_any(json)?;
    let matches = match (kind, &value) {
        (_, Value::Null) | (PrimitiveKind::Any, _) => true,
        (PrimitiveKind::Float, Value::Int(n)) => return Ok(Value::Float(*n as f64)),
        (PrimitiveKind::Uuid, Value::Binary(bin)) if bin.subtype == BINARY_SUBTYPE_UUID => {
            return Uuid::from_slice(&bin.bytes)
                .map(Value::Uuid)
                .map_err(|e| DocjsonError::malformed("$", e.to_string()));
        }
        (PrimitiveKind::String, Value::String(_))
        | (PrimitiveKind::Int, Value::Int(_))
        | (PrimitiveKind::Float, Value::Float(_))
        | (PrimitiveKind::Bool, Value::Bool(_))
        | (PrimitiveKind::DateTime, Value::DateTime(_))
        | (PrimitiveKind::Binary, Value::Binary(_))
        | (PrimitiveKind::ObjectId, Value::ObjectId(_))
        | (PrimitiveKind::Uuid, Value::Uuid(_))
        | (PrimitiveKind::Regex, Value::Regex(_))
        | (PrimitiveKind::DbRef, Value::DbRef(_))
        | (PrimitiveKind::Timestamp, Value::Timestamp(_))
        | (PrimitiveKind::Code, Value::Code(_)) => true,
        _ => false,
    };
    if matches {
        Ok(value)
    } else {
        Err(DocjsonError::unsupported(kind.as_str(), value.type_name()))
    }
}
