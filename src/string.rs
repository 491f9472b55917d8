use std::io;

use crate::consts;

/// Strings are stored as UTF-16LE from this major version on.
const UTF16_MAJOR_VERSION: u32 = 17;

/// Reads the null-terminated string that starts at `offset` in `data`.
pub(crate) fn read_null_terminated_string(
    data: &[u8],
    offset: usize,
    major_version: u32,
) -> io::Result<String> {
    if offset >= data.len() {
        invalid_data!(
            "String offset {:#x} is outside the descriptor ({} bytes)",
            offset,
            data.len()
        );
    }
    let data = &data[offset..];
    if major_version >= UTF16_MAJOR_VERSION {
        read_utf16(data)
    } else {
        read_narrow(data)
    }
}

fn read_narrow(data: &[u8]) -> io::Result<String> {
    let end = match data.iter().position(|&byte| byte == 0) {
        Some(end) => end,
        None => invalid_data!("Unterminated string"),
    };
    if end > consts::MAX_STRING_SIZE {
        invalid_data!(
            "String longer than maximum of {} bytes",
            consts::MAX_STRING_SIZE
        );
    }
    Ok(String::from_utf8_lossy(&data[..end]).to_string())
}

fn read_utf16(data: &[u8]) -> io::Result<String> {
    let mut units = Vec::<u16>::new();
    for pair in data.chunks_exact(2) {
        let unit = u16::from_le_bytes([pair[0], pair[1]]);
        if unit == 0 {
            return Ok(String::from_utf16_lossy(&units));
        } else if units.len() == consts::MAX_STRING_SIZE {
            invalid_data!(
                "String longer than maximum of {} characters",
                consts::MAX_STRING_SIZE
            );
        }
        units.push(unit);
    }
    invalid_data!("Unterminated string")
}
