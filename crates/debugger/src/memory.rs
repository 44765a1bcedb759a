/// Read `length` bytes of `memory` starting at `start_address`.
///
/// Reads past the end are shortened to the available bytes; a negative start or a start at
/// or beyond the end yields no bytes.
pub fn read_memory(memory: &[u8], start_address: i64, length: u64) -> &[u8] {
    let Ok(start) = usize::try_from(start_address) else {
        return &[];
    };
    if start >= memory.len() {
        return &[];
    }

    let available = memory.len() - start;
    let length = usize::try_from(length).map_or(available, |length| length.min(available));
    &memory[start..start + length]
}

#[cfg(test)]
mod tests {
    use super::read_memory;

    const MEMORY: &[u8] = b"ABCDE";

    #[test]
    fn full_read() {
        assert_eq!(read_memory(MEMORY, 1, 3), b"BCD");
        assert_eq!(read_memory(MEMORY, 0, 5), b"ABCDE");
    }

    #[test]
    fn short_read() {
        assert_eq!(read_memory(MEMORY, 3, 10), b"DE");
    }

    #[test]
    fn start_past_end() {
        assert!(read_memory(MEMORY, 5, 1).is_empty());
        assert!(read_memory(MEMORY, 10, 4).is_empty());
    }

    #[test]
    fn negative_start() {
        assert!(read_memory(MEMORY, -1, 3).is_empty());
    }

    #[test]
    fn huge_length_is_truncated() {
        assert_eq!(read_memory(MEMORY, 2, u64::MAX), b"CDE");
    }

    #[test]
    fn zero_length() {
        assert!(read_memory(MEMORY, 2, 0).is_empty());
    }

    #[test]
    fn length_matches_formula() {
        for start in -2i64..8 {
            for length in 0u64..8 {
                let bytes = read_memory(MEMORY, start, length);
                let available = (MEMORY.len() as i64 - start).max(0) as u64;
                let expected_len = if start < 0 { 0 } else { length.min(available) };
                assert_eq!(bytes.len() as u64, expected_len, "start={start} length={length}");
                if !bytes.is_empty() {
                    let s = start as usize;
                    assert_eq!(bytes, &MEMORY[s..s + bytes.len()]);
                }
            }
        }
    }
}
