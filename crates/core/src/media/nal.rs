//! Annex B helpers shared by the H.264 and H.265 packetizers.

/// Split an Annex B bitstream into NAL units, excluding start codes.
///
/// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte `00 00 01`)
/// and returns the NAL data between them. The start code length is tracked
/// per NAL so boundaries stay correct when both forms are mixed.
pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut nal_units = Vec::new();
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = match start_entries.get(idx + 1) {
            Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
            None => data.len(),
        };
        if start < end {
            nal_units.push(&data[start..end]);
        }
    }

    nal_units
}

/// Length of the Annex B start code at the head of `data`, if any.
pub fn start_code_len(data: &[u8]) -> Option<usize> {
    if data.starts_with(&[0, 0, 0, 1]) {
        Some(4)
    } else if data.starts_with(&[0, 0, 1]) {
        Some(3)
    } else {
        None
    }
}

/// NAL units of one frame unit.
///
/// A unit that begins with a start code may hold several NAL units; a unit
/// without one is taken as a single raw NAL unit.
pub fn unit_nals(data: &[u8]) -> Vec<&[u8]> {
    if start_code_len(data).is_some() {
        extract_nal_units(data)
    } else if data.is_empty() {
        Vec::new()
    } else {
        vec![data]
    }
}
