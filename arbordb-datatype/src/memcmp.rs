//! Memory comparable encoding: byte-wise comparison of encoded values
//! yields the same order as comparison of the original values. Group
//! storage keys (hKeys) and index keys are built from this format.

use crate::error::{Error, Result};
use crate::konst::Const;

pub const NULL_FLAG: u8 = 0x01;
pub const NON_NULL_FLAG: u8 = 0x02;

const GROUP_LEN: usize = 8;
const GROUP_CONT: u8 = 0xff;

/// Appends an unsigned 16-bit ordinal in big-endian order.
/// Used for table ordinals inside an hKey.
#[inline]
pub fn attach_ordinal(buf: &mut Vec<u8>, ordinal: u16) {
    buf.extend(ordinal.to_be_bytes());
}

/// Appends a signed integer. The sign bit is flipped so negative values
/// order before non-negative ones under unsigned byte comparison.
#[inline]
pub fn attach_i64(buf: &mut Vec<u8>, value: i64) {
    let mut bs = value.to_be_bytes();
    bs[0] ^= 0x80;
    buf.extend(bs);
}

#[inline]
pub fn attach_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend(value.to_be_bytes());
}

/// Appends a finite f64. Positive values flip only the sign bit,
/// negative values flip all bits.
#[inline]
pub fn attach_f64(buf: &mut Vec<u8>, value: f64) {
    let mut bs = value.to_be_bytes();
    if value >= 0.0 {
        bs[0] ^= 0x80;
    } else {
        bs.iter_mut().for_each(|b| *b = !*b);
    }
    buf.extend(bs);
}

/// Appends variable-length bytes in 8-byte groups. Each group is padded
/// with zeros and followed by a marker byte: the count of significant
/// bytes, or a continuation marker when the group is full and more data
/// follows. Prefixes order before their extensions.
#[inline]
pub fn attach_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    let mut rest = data;
    loop {
        let take = rest.len().min(GROUP_LEN);
        buf.extend(&rest[..take]);
        buf.extend(std::iter::repeat(0u8).take(GROUP_LEN - take));
        rest = &rest[take..];
        if take == GROUP_LEN && !rest.is_empty() {
            buf.push(GROUP_CONT);
        } else {
            buf.push(take as u8);
            break;
        }
    }
}

/// Appends a constant prefixed with its null flag. Null orders before
/// every non-null value.
pub fn attach_const(buf: &mut Vec<u8>, value: &Const) {
    match value {
        Const::Null => buf.push(NULL_FLAG),
        other => {
            buf.push(NON_NULL_FLAG);
            attach_non_null(buf, other);
        }
    }
}

/// Appends a constant that must not be null, e.g. a primary key field.
pub fn attach_key_const(buf: &mut Vec<u8>, value: &Const) -> Result<()> {
    if value.is_null() {
        return Err(Error::NullInKey);
    }
    buf.push(NON_NULL_FLAG);
    attach_non_null(buf, value);
    Ok(())
}

fn attach_non_null(buf: &mut Vec<u8>, value: &Const) {
    match value {
        Const::Null => unreachable!("null handled by caller"),
        Const::Bool(b) => buf.push(*b as u8),
        Const::I64(i) => attach_i64(buf, *i),
        Const::U64(u) => attach_u64(buf, *u),
        Const::F64(f) => attach_f64(buf, f.value()),
        Const::Str(s) => attach_bytes(buf, s.as_bytes()),
        Const::Bytes(bs) => attach_bytes(buf, bs),
        Const::Datetime(ts) => {
            attach_i64(buf, ts.assume_utc().unix_timestamp());
            attach_u64(buf, ts.nanosecond() as u64);
        }
    }
}
