//! Aggregate section.
//!
//! ```text
//! group:u8 [field:u8 tag:u8 start:u16 len:u16]
//! count:u16 (fn:u8 field:u8 tag:u8 start:u16 len:u16 slot:u16 width:u8)*
//! acc_size:u16
//! ```
//!
//! Every function owns `width` bytes of the accumulator starting at `slot`.
//! Aggregated fields are main-region numerics, addressed like filter fields.

use std::sync::Arc;

use crate::config::MAIN_FIELD;
use crate::decode::{ReadAggFn, ReadAggregate, ReadField};
use crate::encoding::PutLe;
use crate::error::SchemaError;
use crate::schema::TypeLayout;
use crate::types::TypeTag;

use super::def::{AggFn, AggregateDef};

pub(crate) fn compile_aggregate(
    layout: &TypeLayout,
    agg: &AggregateDef,
    locales: Arc<[String]>,
    out: &mut Vec<u8>,
) -> Result<ReadAggregate, SchemaError> {
    let group = match &agg.group_by {
        None => {
            out.put_u8(0);
            None
        }
        Some(name) => {
            let desc = layout.field(name)?;
            let groupable = match desc.tag {
                TypeTag::String | TypeTag::Alias => true,
                TypeTag::Vector | TypeTag::MicroBuffer => false,
                _ => desc.is_main(),
            };
            if !groupable {
                return Err(SchemaError::InvalidFilter {
                    field: name.clone(),
                    reason: format!("cannot group by {} fields", desc.tag),
                });
            }
            let (field, start, len) = if desc.separate {
                (desc.number, 0, 0)
            } else {
                (MAIN_FIELD, desc.offset, desc.len)
            };
            out.put_u8(1);
            out.put_u8(field);
            out.put_u8(desc.tag.code());
            out.put_u16(start);
            out.put_u16(len);
            Some(ReadField::from_descriptor(desc, locales))
        }
    };

    let mut fns = Vec::with_capacity(agg.fns.len() + 1);
    let mut slot: u32 = 0;
    let mut entries = Vec::new();
    let mut push = |func: AggFn, field: String, tag: TypeTag, start: u16, len: u16, entries: &mut Vec<u8>| {
        let width = func.width();
        entries.put_u8(func as u8);
        entries.put_u8(MAIN_FIELD);
        entries.put_u8(tag.code());
        entries.put_u16(start);
        entries.put_u16(len);
        entries.put_u16(slot as u16);
        entries.put_u8(width);
        fns.push(ReadAggFn {
            func,
            field,
            slot: slot as u16,
            width,
        });
        slot += width as u32;
    };

    if agg.count || agg.fns.is_empty() {
        push(AggFn::Count, String::new(), TypeTag::Null, 0, 0, &mut entries);
    }
    for (func, name) in &agg.fns {
        let desc = layout.field(name)?;
        if desc.separate || !desc.tag.is_numeric() {
            return Err(SchemaError::NotNumeric(name.clone()));
        }
        push(*func, name.clone(), desc.tag, desc.offset, desc.len, &mut entries);
    }

    let acc_size = u16::try_from(slot).map_err(|_| SchemaError::InvalidFilter {
        field: String::new(),
        reason: "aggregate accumulator exceeds 65535 bytes".into(),
    })?;
    out.put_u16(fns.len() as u16);
    out.put_bytes(&entries);
    out.put_u16(acc_size);
    Ok(ReadAggregate {
        group,
        fns,
        acc_size,
    })
}
