//! Aggregate results.
//!
//! ```text
//! ungrouped: groups:u32(=0) acc
//! grouped:   groups:u32 (key_len:u16 key acc)*
//! ```
//!
//! Accumulator slots, little-endian:
//!
//! | fn | slot |
//! |----|------|
//! | count | `n:u32` |
//! | sum, min, max | `f64` (min/max stay infinite until a value is seen) |
//! | avg | `sum:f64 n:u64` |
//! | stddev, var | `n:u64 mean:f64 m2:f64` (Welford) |
//!
//! Variance is the sample variance and is 0 for fewer than two values.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::encoding::ByteReader;
use crate::error::DecodeError;
use crate::query::AggFn;
use crate::types::Value;

use super::arena::DecodeArena;
use super::reader::{ReadAggFn, ReadAggregate};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AggregateResult {
    /// (key range, accumulator range); the key range is empty when ungrouped.
    groups: Vec<(Range<usize>, Range<usize>)>,
}

impl AggregateResult {
    pub(crate) fn build(agg: &ReadAggregate, bytes: &[u8]) -> Result<Self, DecodeError> {
        let acc = agg.acc_size as usize;
        let mut r = ByteReader::new(bytes);
        let count = r.u32()? as usize;
        let mut groups = Vec::new();
        if agg.group.is_none() {
            if count != 0 {
                return Err(DecodeError::InvalidPayload {
                    field: String::new(),
                    reason: "groups in an ungrouped aggregate",
                });
            }
            let start = r.position();
            r.skip(acc)?;
            groups.push((start..start, start..start + acc));
        } else {
            if count.saturating_mul(2 + acc) > r.remaining() {
                return Err(DecodeError::Truncated {
                    offset: r.position(),
                    needed: count.saturating_mul(2 + acc) - r.remaining(),
                });
            }
            groups.reserve(count);
            for _ in 0..count {
                let key_len = r.u16()? as usize;
                let key = r.position()..r.position() + key_len;
                r.skip(key_len)?;
                let start = r.position();
                r.skip(acc)?;
                groups.push((key, start..start + acc));
            }
        }
        if !r.is_empty() {
            return Err(DecodeError::UnexpectedMarker {
                offset: r.position(),
                marker: bytes[r.position()],
            });
        }
        Ok(Self { groups })
    }

    pub(crate) fn to_value(
        &self,
        agg: &ReadAggregate,
        bytes: &[u8],
        arena: &mut DecodeArena,
    ) -> Result<Value, DecodeError> {
        let Some(group) = &agg.group else {
            let acc = self.groups.first().map(|(_, acc)| &bytes[acc.clone()]).unwrap_or_default();
            return decode_acc(&agg.fns, acc);
        };
        let mut out = BTreeMap::new();
        for (key, acc) in &self.groups {
            let key_value = if key.is_empty() {
                (group.codec.empty)(group)
            } else {
                (group.codec.decode)(group, &bytes[key.clone()], arena.bump())?
            };
            out.insert(key_string(&key_value), decode_acc(&agg.fns, &bytes[acc.clone()])?);
        }
        Ok(Value::Object(out))
    }
}

fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => match other.to_json() {
            serde_json::Value::String(s) => s,
            json => json.to_string(),
        },
    }
}

fn finite(v: f64) -> Value {
    if v.is_finite() {
        Value::Float(v)
    } else {
        Value::Null
    }
}

fn decode_fn(f: &ReadAggFn, acc: &[u8]) -> Result<Value, DecodeError> {
    let start = f.slot as usize;
    let slot = acc
        .get(start..start + f.width as usize)
        .ok_or(DecodeError::Truncated {
            offset: start,
            needed: (start + f.width as usize).saturating_sub(acc.len()),
        })?;
    let mut r = ByteReader::new(slot);
    Ok(match f.func {
        AggFn::Count => Value::Int(r.u32()? as i64),
        AggFn::Sum => Value::Float(r.f64()?),
        AggFn::Min | AggFn::Max => finite(r.f64()?),
        AggFn::Avg => {
            let sum = r.f64()?;
            match r.u64()? {
                0 => Value::Null,
                n => Value::Float(sum / n as f64),
            }
        }
        AggFn::Stddev | AggFn::Var => {
            let n = r.u64()?;
            let _mean = r.f64()?;
            let m2 = r.f64()?;
            let var = if n > 1 { m2 / (n - 1) as f64 } else { 0.0 };
            if f.func == AggFn::Var {
                Value::Float(var)
            } else {
                Value::Float(var.sqrt())
            }
        }
    })
}

/// `{count: n, field: {fn: value}}` for one accumulator.
fn decode_acc(fns: &[ReadAggFn], acc: &[u8]) -> Result<Value, DecodeError> {
    let mut out: BTreeMap<String, Value> = BTreeMap::new();
    for f in fns {
        let value = decode_fn(f, acc)?;
        if f.field.is_empty() {
            out.insert(f.func.name().to_string(), value);
            continue;
        }
        let entry = out
            .entry(f.field.clone())
            .or_insert_with(|| Value::Object(BTreeMap::new()));
        if let Value::Object(fields) = entry {
            fields.insert(f.func.name().to_string(), value);
        }
    }
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::PutLe;

    fn fns() -> Vec<ReadAggFn> {
        vec![
            ReadAggFn {
                func: AggFn::Count,
                field: String::new(),
                slot: 0,
                width: 4,
            },
            ReadAggFn {
                func: AggFn::Avg,
                field: "price".into(),
                slot: 4,
                width: 16,
            },
            ReadAggFn {
                func: AggFn::Var,
                field: "price".into(),
                slot: 20,
                width: 24,
            },
            ReadAggFn {
                func: AggFn::Min,
                field: "price".into(),
                slot: 44,
                width: 8,
            },
        ]
    }

    #[test]
    fn decodes_an_ungrouped_accumulator() {
        let agg = ReadAggregate {
            group: None,
            fns: fns(),
            acc_size: 52,
        };
        let mut bytes = Vec::new();
        bytes.put_u32(0);
        bytes.put_u32(3);
        bytes.put_f64(30.0);
        bytes.put_u64(3);
        // values 5, 10, 15: mean 10, m2 50
        bytes.put_u64(3);
        bytes.put_f64(10.0);
        bytes.put_f64(50.0);
        bytes.put_f64(f64::INFINITY);

        let result = AggregateResult::build(&agg, &bytes).unwrap();
        let value = result.to_value(&agg, &bytes, &mut DecodeArena::new()).unwrap();
        assert_eq!(value.get("count"), Some(&Value::Int(3)));
        let price = value.get("price").unwrap();
        assert_eq!(price.get("avg"), Some(&Value::Float(10.0)));
        assert_eq!(price.get("var"), Some(&Value::Float(25.0)));
        assert_eq!(price.get("min"), Some(&Value::Null));
    }

    #[test]
    fn rejects_short_accumulators() {
        let agg = ReadAggregate {
            group: None,
            fns: fns(),
            acc_size: 52,
        };
        let mut bytes = Vec::new();
        bytes.put_u32(0);
        bytes.put_u32(3);
        assert!(AggregateResult::build(&agg, &bytes).is_err());
    }
}
