//! Operation bytes of the mutation stream.
//!
//! ```text
//! SWITCH_FIELD        0x00 field:u8
//! SWITCH_CURSOR       0x01 field:u8 tag:u8 id:u32
//! SWITCH_TYPE         0x02 type_id:u16
//! CREATE              0x03 payload
//! UPDATE_PARTIAL      0x05 len:u32 (offset:u16 len:u16 bytes)*
//! UPDATE              0x06 payload
//! ADD_EMPTY_SORT      0x07 count:u16 field:u8*
//! DELETE_RECORD       0x0A id:u32
//! DELETE              0x0B
//! ARRAY_OVERWRITE     0x0C refs-payload
//! ARRAY_ADD           0x0D refs-payload
//! ARRAY_DELETE        0x0E refs-payload
//! ADD_EMPTY_SORT_TEXT 0x0F count:u16 (field:u8 locale:u8)*
//! DELETE_TEXT_LOCALE  0x10 locale:u8
//! INCREMENT           0x11 tag:u8 offset:u16 value
//! DECREMENT           0x12 tag:u8 offset:u16 value
//! ```

pub const SWITCH_FIELD: u8 = 0x00;
pub const SWITCH_CURSOR: u8 = 0x01;
pub const SWITCH_TYPE: u8 = 0x02;
pub const CREATE: u8 = 0x03;
pub const UPDATE_PARTIAL: u8 = 0x05;
pub const UPDATE: u8 = 0x06;
pub const ADD_EMPTY_SORT: u8 = 0x07;
pub const DELETE_RECORD: u8 = 0x0A;
pub const DELETE: u8 = 0x0B;
pub const ARRAY_OVERWRITE: u8 = 0x0C;
pub const ARRAY_ADD: u8 = 0x0D;
pub const ARRAY_DELETE: u8 = 0x0E;
pub const ADD_EMPTY_SORT_TEXT: u8 = 0x0F;
pub const DELETE_TEXT_LOCALE: u8 = 0x10;
pub const INCREMENT: u8 = 0x11;
pub const DECREMENT: u8 = 0x12;

/// Bytes of a full cursor: op, field, tag, id.
pub const FULL_CURSOR_LEN: usize = 7;
/// Bytes of a short cursor: op, field.
pub const SHORT_CURSOR_LEN: usize = 2;
/// Bytes of a type switch: op, type id.
pub const SWITCH_TYPE_LEN: usize = 3;

/// Flags byte of reference payloads.
pub const REF_HAS_INDEX: u8 = 0x01;
pub const REF_HAS_EDGES: u8 = 0x02;

/// String payload flag values.
pub const STRING_RAW: u8 = 0;
pub const STRING_DEFLATE: u8 = 1;
