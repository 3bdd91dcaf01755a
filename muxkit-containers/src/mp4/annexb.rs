//! Annex-B to length-prefixed NAL unit conversion.
//!
//! Encoders usually emit H.264/H.265 access units as start-code delimited
//! (Annex-B) byte streams, while `avc1`/`hvc1` samples need every NAL unit
//! preceded by its 4-byte big-endian length.

/// Find the next start code in a byte slice.
///
/// Returns the offset of the start code and its length (3 or 4 bytes).
pub(crate) fn find_start_code(data: &[u8]) -> Option<(usize, usize)> {
    let len = data.len();
    if len < 3 {
        return None;
    }

    for i in 0..len - 2 {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            } else if i + 3 < len && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
    }

    None
}

/// Check whether a sample begins with a start code.
pub(crate) fn is_annex_b(data: &[u8]) -> bool {
    matches!(find_start_code(data), Some((0, _)))
}

/// Split an Annex-B stream into NAL units, without start codes.
///
/// Trailing zero bytes before the next start code are not part of the NAL
/// unit and are dropped.
pub(crate) fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut rest = match find_start_code(data) {
        Some((offset, len)) => &data[offset + len..],
        None => return units,
    };

    loop {
        let (unit, next) = match find_start_code(rest) {
            Some((offset, len)) => (&rest[..offset], Some(&rest[offset + len..])),
            None => (rest, None),
        };
        let end = unit.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        if end > 0 {
            units.push(&unit[..end]);
        }
        match next {
            Some(next) => rest = next,
            None => return units,
        }
    }
}

/// Rewrite an Annex-B sample with 4-byte length prefixes.
pub(crate) fn annex_b_to_avcc(data: &[u8]) -> Vec<u8> {
    let units = nal_units(data);
    let mut result = Vec::with_capacity(data.len() + units.len());
    for unit in units {
        result.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        result.extend_from_slice(unit);
    }
    result
}
