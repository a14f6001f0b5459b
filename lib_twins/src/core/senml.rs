//! # SenML Measurement Decoding
//!
//! Inbound payloads are JSON SenML packs (RFC 8428). A pack is decoded into
//! resolved [`Measurement`]s: base fields are folded into each record and
//! carried forward to the records that follow, as the RFC prescribes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{Result, TwinsError};

/// A raw SenML record as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "bn", default, skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    #[serde(rename = "bt", default, skip_serializing_if = "Option::is_none")]
    pub base_time: Option<f64>,
    #[serde(rename = "bu", default, skip_serializing_if = "Option::is_none")]
    pub base_unit: Option<String>,
    #[serde(rename = "bv", default, skip_serializing_if = "Option::is_none")]
    pub base_value: Option<f64>,
    #[serde(rename = "bs", default, skip_serializing_if = "Option::is_none")]
    pub base_sum: Option<f64>,
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(rename = "vs", default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(rename = "vd", default, skip_serializing_if = "Option::is_none")]
    pub data_value: Option<String>,
    #[serde(rename = "vb", default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(rename = "ut", default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<f64>,
}

/// A record with its base fields applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub unit: Option<String>,
    /// Absolute record time; `None` when the record carries no time.
    pub time: Option<DateTime<Utc>>,
    pub value: Value,
}

#[derive(Default)]
struct BaseFields {
    name: String,
    time: f64,
    unit: Option<String>,
    value: f64,
    sum: f64,
}

/// Resolved times below 2^28 seconds are relative to the time of decoding.
const RELATIVE_TIME_LIMIT: f64 = 268_435_456.0;

/// Decodes a JSON SenML pack. An empty pack yields no measurements.
pub fn decode(payload: &[u8]) -> Result<Vec<Measurement>> {
    decode_at(payload, Utc::now())
}

/// Decodes a pack, resolving relative record times against `now`.
pub fn decode_at(payload: &[u8], now: DateTime<Utc>) -> Result<Vec<Measurement>> {
    let records: Vec<Record> = serde_json::from_slice(payload)?;
    let mut base = BaseFields::default();
    records.iter().map(|rec| resolve(&mut base, rec, now)).collect()
}

fn resolve(base: &mut BaseFields, rec: &Record, now: DateTime<Utc>) -> Result<Measurement> {
    if let Some(bn) = &rec.base_name {
        base.name = bn.clone();
    }
    if let Some(bt) = rec.base_time {
        base.time = bt;
    }
    if let Some(bu) = &rec.base_unit {
        base.unit = Some(bu.clone());
    }
    if let Some(bv) = rec.base_value {
        base.value = bv;
    }
    if let Some(bs) = rec.base_sum {
        base.sum = bs;
    }

    let name = format!("{}{}", base.name, rec.name.as_deref().unwrap_or_default());
    let seconds = base.time + rec.time.unwrap_or_default();
    let time = if seconds == 0.0 {
        None
    } else if seconds < RELATIVE_TIME_LIMIT {
        let now_seconds = now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9;
        Some(to_datetime(now_seconds + seconds)?)
    } else {
        Some(to_datetime(seconds)?)
    };

    // Value priority: numeric, string, data, boolean, sum.
    let value = if let Some(v) = rec.value {
        Value::from(base.value + v)
    } else if let Some(vs) = &rec.string_value {
        Value::from(vs.clone())
    } else if let Some(vd) = &rec.data_value {
        Value::from(vd.clone())
    } else if let Some(vb) = rec.bool_value {
        Value::from(vb)
    } else if let Some(s) = rec.sum {
        Value::from(base.sum + s)
    } else {
        Value::Null
    };

    Ok(Measurement {
        name,
        unit: rec.unit.clone().or_else(|| base.unit.clone()),
        time,
        value,
    })
}

fn to_datetime(seconds: f64) -> Result<DateTime<Utc>> {
    let out_of_range = || TwinsError::MalformedEntity(format!("record time {} out of range", seconds));
    if !seconds.is_finite() {
        return Err(out_of_range());
    }
    let whole = seconds.floor();
    // Always in [0, 1) after flooring, also for negative times.
    let nanos = (((seconds - whole) * 1e9) as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos).ok_or_else(out_of_range)
}
