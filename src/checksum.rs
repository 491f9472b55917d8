use md5::{Digest, Md5};

/// A running MD5 over the bytes written for one extracted file.
pub struct Checksum {
    hasher: Md5,
}

impl Checksum {
    pub fn new() -> Checksum {
        Checksum { hasher: Md5::new() }
    }

    pub fn update(&mut self, buf: &[u8]) {
        self.hasher.update(buf);
    }

    pub fn value(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.hasher.finalize());
        bytes
    }
}

/// Renders a hash the way it is compared: lowercase hex, no separators.
pub fn to_hex(hash: &[u8; 16]) -> String {
    hex::encode(hash)
}

/// Compares two hex renderings, ignoring case.
pub fn hex_matches(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}
