pub const CAB_SIGNATURE: u32 = 0x28635349; // "ISc(" stored little-endian

pub const COMMON_HEADER_SIZE: usize = 20;
pub const VOLUME_HEADER_SIZE_V5: usize = 40;
pub const VOLUME_HEADER_SIZE_V6: usize = 64;

pub const MAX_FILE_GROUP_COUNT: usize = 71;
pub const MAX_COMPONENT_COUNT: usize = 71;
pub const MAX_STRING_SIZE: usize = 4096;

// Offsets within the cabinet descriptor:
pub const CAB_DESCRIPTOR_FILE_TABLE_OFFSET: usize = 0x0c;
pub const CAB_DESCRIPTOR_GROUP_OFFSETS: usize = 0x3e;
pub const CAB_DESCRIPTOR_MIN_SIZE: usize =
    CAB_DESCRIPTOR_GROUP_OFFSETS + 4 * (MAX_FILE_GROUP_COUNT + MAX_COMPONENT_COUNT);

pub const FILE_DESCRIPTOR_SIZE_V5: usize = 0x3a;
pub const FILE_DESCRIPTOR_SIZE_V6: usize = 0x57;

// File descriptor flags:
pub const FILE_SPLIT: u16 = 0x1;
pub const FILE_OBFUSCATED: u16 = 0x2;
pub const FILE_COMPRESSED: u16 = 0x4;
pub const FILE_INVALID: u16 = 0x8;

// File descriptor link flags:
pub const LINK_PREV: u8 = 0x1;
pub const LINK_NEXT: u8 = 0x2;

/// Marks a V5 volume header with no "last file" entry.
pub const NO_LAST_FILE_OFFSET: u64 = 0x7fff_ffff;

/// Output buffer size for one inflated chunk.
pub const BUFFER_SIZE: usize = 64 * 1024;

pub const HEADER_SUFFIX: &str = "hdr";
pub const CABINET_SUFFIX: &str = "cab";
