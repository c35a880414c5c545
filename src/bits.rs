//! Fixed-width integer helpers for shifted and extended operands.

pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Reinterpret the low `width` bits of `value` as two's complement.
pub fn to_signed(value: u64, width: u32) -> i64 {
    if width == 0 {
        return 0;
    }
    if width >= 64 {
        return value as i64;
    }
    let value = value & mask(width);
    let sign = 1u64 << (width - 1);
    if value & sign != 0 {
        (value | !mask(width)) as i64
    } else {
        value as i64
    }
}

pub fn lsl(value: u64, amount: u32, width: u32) -> u64 {
    value.checked_shl(amount).unwrap_or(0) & mask(width)
}

pub fn lsr(value: u64, amount: u32, width: u32) -> u64 {
    (value & mask(width)).checked_shr(amount).unwrap_or(0)
}

pub fn asr(value: u64, amount: u32, width: u32) -> u64 {
    let signed = to_signed(value, width);
    (signed >> amount.min(63)) as u64 & mask(width)
}

pub fn ror(value: u64, amount: u32, width: u32) -> u64 {
    if width == 0 {
        return 0;
    }
    let value = value & mask(width);
    let amount = amount % width;
    if amount == 0 {
        return value;
    }
    ((value >> amount) | (value << (width - amount))) & mask(width)
}
