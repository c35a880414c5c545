//! Pointer chains through live debuggee memory.

use crate::arch::ArchInfo;
use crate::format::address_and_symbol;
use crate::process::{MemoryReader, SymbolResolver};

pub const ARROW: &str = " —▸ ";
pub const STRING_ARROW: &str = " ◂— ";

/// Follow up to `limit` pointers starting at `address`. Stops at the first
/// unreadable link or when a value repeats. Never empty.
pub fn get<M: MemoryReader + ?Sized>(
    mem: &M,
    arch: &ArchInfo,
    address: u64,
    limit: usize,
) -> Vec<u64> {
    let mut result = vec![address];
    let mut current = address;
    for _ in 0..limit {
        let value = match mem.read_pointer(arch, current) {
            Ok(value) => value & arch.ptrmask(),
            Err(_) => break,
        };
        let looped = result.contains(&value);
        result.push(value);
        if looped {
            break;
        }
        current = value;
    }
    result
}

/// Render a chain as `a —▸ b —▸ c`. With `can_dereference`, the last link is
/// also probed for a printable string.
pub fn format<P: MemoryReader + SymbolResolver + ?Sized>(
    process: &P,
    arch: &ArchInfo,
    addresses: &[u64],
    limit: usize,
    can_dereference: bool,
    string_length: usize,
) -> String {
    let Some((&last, links)) = addresses
        .get(..addresses.len().min(limit + 1))
        .and_then(|shown| shown.split_last())
    else {
        return String::new();
    };

    let mut parts: Vec<String> = links
        .iter()
        .map(|link| address_and_symbol(process, *link))
        .collect();

    let mut tail = address_and_symbol(process, last);
    if can_dereference {
        if let Some(text) = string_at(process, arch, last, string_length) {
            tail.push_str(STRING_ARROW);
            tail.push_str(&text);
        }
    }
    parts.push(tail);

    let mut out = parts.join(ARROW);
    if addresses.len() > limit + 1 {
        out.push_str(ARROW);
        out.push_str("...");
    }
    out
}

const MIN_STRING: usize = 2;

fn string_at<M: MemoryReader + ?Sized>(
    mem: &M,
    arch: &ArchInfo,
    address: u64,
    max_len: usize,
) -> Option<String> {
    if max_len == 0 || address & arch.ptrmask() != address {
        return None;
    }
    let bytes = mem.read(address, max_len + 1, true).ok()?;
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let text = &bytes[..end];
    if text.len() < MIN_STRING
        || !text
            .iter()
            .all(|b| b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\n'))
    {
        return None;
    }
    let shown: String = text.iter().take(max_len).map(|b| *b as char).collect();
    let shown = shown.escape_default().to_string();
    if text.len() > max_len {
        Some(format!("'{}'...", shown))
    } else {
        Some(format!("'{}'", shown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;
    use crate::error::MemoryError;

    struct Words(Vec<(u64, Vec<u8>)>);

    impl MemoryReader for Words {
        fn read(&self, address: u64, length: usize, partial: bool) -> Result<Vec<u8>, MemoryError> {
            for (start, data) in &self.0 {
                if address >= *start && address < start + data.len() as u64 {
                    let off = (address - start) as usize;
                    let avail = &data[off..];
                    if avail.len() >= length {
                        return Ok(avail[..length].to_vec());
                    }
                    if partial {
                        return Ok(avail.to_vec());
                    }
                }
            }
            Err(MemoryError::Unmapped { address, length })
        }
    }

    impl SymbolResolver for Words {
        fn resolve(&self, _address: u64) -> Option<String> {
            None
        }
    }

    fn arch() -> ArchInfo {
        ArchInfo::new(Architecture::X86_64)
    }

    #[test]
    fn stops_at_unreadable_link() {
        let mem = Words(vec![(0x1000, 0xdead0000u64.to_le_bytes().to_vec())]);
        assert_eq!(get(&mem, &arch(), 0x1000, 5), vec![0x1000, 0xdead0000]);
    }

    #[test]
    fn stops_on_self_loop() {
        let mem = Words(vec![(0x1000, 0x1000u64.to_le_bytes().to_vec())]);
        assert_eq!(get(&mem, &arch(), 0x1000, 5), vec![0x1000, 0x1000]);
    }

    #[test]
    fn string_preview_on_last_link() {
        let mem = Words(vec![(0x2000, b"hello\0".to_vec())]);
        let text = format(&mem, &arch(), &[0x1000, 0x2000], 3, true, 50);
        assert_eq!(text, "0x1000 —▸ 0x2000 ◂— 'hello'");
        let text = format(&mem, &arch(), &[0x1000, 0x2000], 3, false, 50);
        assert_eq!(text, "0x1000 —▸ 0x2000");
    }

    #[test]
    fn truncated_chain_marked() {
        let mem = Words(vec![]);
        let text = format(&mem, &arch(), &[0x1000, 0x2000, 0x3000], 1, false, 50);
        assert_eq!(text, "0x1000 —▸ 0x2000 —▸ ...");
    }
}
