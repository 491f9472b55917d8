use std::cmp;
use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::consts;

/// The 20-byte header that starts every header and cabinet volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommonHeader {
    version: u32,
    volume_info: u32,
    cab_descriptor_offset: u32,
    cab_descriptor_size: u32,
}

impl CommonHeader {
    pub(crate) fn read<R: Read>(mut reader: R) -> io::Result<CommonHeader> {
        let mut raw = [0u8; consts::COMMON_HEADER_SIZE];
        reader.read_exact(&mut raw)?;
        let mut reader = Cursor::new(&raw[..]);
        let signature = reader.read_u32::<LittleEndian>()?;
        if signature != consts::CAB_SIGNATURE {
            invalid_data!(
                "Not an InstallShield cabinet (invalid signature {:08x})",
                signature
            );
        }
        let version = reader.read_u32::<LittleEndian>()?;
        let volume_info = reader.read_u32::<LittleEndian>()?;
        let cab_descriptor_offset = reader.read_u32::<LittleEndian>()?;
        let cab_descriptor_size = reader.read_u32::<LittleEndian>()?;
        Ok(CommonHeader {
            version,
            volume_info,
            cab_descriptor_offset,
            cab_descriptor_size,
        })
    }

    /// Returns the raw version field.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the raw volume info field.
    pub fn volume_info(&self) -> u32 {
        self.volume_info
    }

    /// Returns the offset of the cabinet descriptor within this volume.
    pub fn cab_descriptor_offset(&self) -> u32 {
        self.cab_descriptor_offset
    }

    /// Returns the size of the cabinet descriptor, or zero if this volume
    /// carries none.
    pub fn cab_descriptor_size(&self) -> u32 {
        self.cab_descriptor_size
    }

    /// Returns true if this volume carries the file and directory tables.
    pub fn has_cab_descriptor(&self) -> bool {
        self.cab_descriptor_size != 0
    }

    /// Decodes the format major version from the version field.  Unknown
    /// encodings and versions below 5 are reported as 5, since they share
    /// its layout.
    pub fn major_version(&self) -> u32 {
        let major = match self.version >> 24 {
            1 => (self.version >> 12) & 0xf,
            2 | 4 => (self.version & 0xffff) / 100,
            _ => 0,
        };
        cmp::max(major, 5)
    }
}

/// Layout of the volume header, chosen once from the major version.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum VolumeLayout {
    /// 32-bit offsets and sizes.
    V5,
    /// Low/high 32-bit pairs forming 64-bit values.
    V6Plus,
}

impl VolumeLayout {
    fn for_major(major_version: u32) -> VolumeLayout {
        if major_version <= 5 {
            VolumeLayout::V5
        } else {
            VolumeLayout::V6Plus
        }
    }
}

/// Per-volume placement data, normalized to 64-bit values.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VolumeHeader {
    pub(crate) data_offset: u64,
    pub(crate) first_file_index: u32,
    pub(crate) last_file_index: u32,
    pub(crate) first_file_offset: u64,
    pub(crate) first_file_size_expanded: u64,
    pub(crate) first_file_size_compressed: u64,
    pub(crate) last_file_offset: u64,
    pub(crate) last_file_size_expanded: u64,
    pub(crate) last_file_size_compressed: u64,
}

impl VolumeHeader {
    /// Parses the volume header that directly follows the common header of
    /// a cabinet volume.
    pub(crate) fn read<R: Read>(
        mut reader: R,
        major_version: u32,
    ) -> io::Result<VolumeHeader> {
        match VolumeLayout::for_major(major_version) {
            VolumeLayout::V5 => {
                let mut raw = [0u8; consts::VOLUME_HEADER_SIZE_V5];
                reader.read_exact(&mut raw)?;
                let mut r = Cursor::new(&raw[..]);
                let data_offset = r.read_u32::<LittleEndian>()?;
                let _unknown = r.read_u32::<LittleEndian>()?;
                let first_file_index = r.read_u32::<LittleEndian>()?;
                let last_file_index = r.read_u32::<LittleEndian>()?;
                let first_file_offset = r.read_u32::<LittleEndian>()?;
                let first_file_size_expanded = r.read_u32::<LittleEndian>()?;
                let first_file_size_compressed = r.read_u32::<LittleEndian>()?;
                let mut last_file_offset = r.read_u32::<LittleEndian>()? as u64;
                let last_file_size_expanded = r.read_u32::<LittleEndian>()?;
                let last_file_size_compressed = r.read_u32::<LittleEndian>()?;
                if last_file_offset == 0 {
                    last_file_offset = consts::NO_LAST_FILE_OFFSET;
                }
                Ok(VolumeHeader {
                    data_offset: data_offset as u64,
                    first_file_index,
                    last_file_index,
                    first_file_offset: first_file_offset as u64,
                    first_file_size_expanded: first_file_size_expanded as u64,
                    first_file_size_compressed: first_file_size_compressed
                        as u64,
                    last_file_offset,
                    last_file_size_expanded: last_file_size_expanded as u64,
                    last_file_size_compressed: last_file_size_compressed
                        as u64,
                })
            }
            VolumeLayout::V6Plus => {
                let mut raw = [0u8; consts::VOLUME_HEADER_SIZE_V6];
                reader.read_exact(&mut raw)?;
                let mut r = Cursor::new(&raw[..]);
                let data_offset = read_u64_pair(&mut r)?;
                let first_file_index = r.read_u32::<LittleEndian>()?;
                let last_file_index = r.read_u32::<LittleEndian>()?;
                Ok(VolumeHeader {
                    data_offset,
                    first_file_index,
                    last_file_index,
                    first_file_offset: read_u64_pair(&mut r)?,
                    first_file_size_expanded: read_u64_pair(&mut r)?,
                    first_file_size_compressed: read_u64_pair(&mut r)?,
                    last_file_offset: read_u64_pair(&mut r)?,
                    last_file_size_expanded: read_u64_pair(&mut r)?,
                    last_file_size_compressed: read_u64_pair(&mut r)?,
                })
            }
        }
    }

    /// Returns the offset at which file data begins in this volume.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Returns the index of the first file with data in this volume.
    pub fn first_file_index(&self) -> u32 {
        self.first_file_index
    }

    /// Returns the index of the last file with data in this volume.
    pub fn last_file_index(&self) -> u32 {
        self.last_file_index
    }
}

/// Reads a low 32-bit word followed by its high 32-bit extension.
fn read_u64_pair<R: Read>(reader: &mut R) -> io::Result<u64> {
    let low = reader.read_u32::<LittleEndian>()? as u64;
    let high = reader.read_u32::<LittleEndian>()? as u64;
    Ok((high << 32) | low)
}

/// The table of contents found at the cabinet descriptor offset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CabDescriptor {
    pub(crate) file_table_offset: u32,
    pub(crate) file_table_size: u32,
    pub(crate) file_table_size2: u32,
    pub(crate) directory_count: u32,
    pub(crate) file_count: u32,
    pub(crate) file_table_offset2: u32,
    pub(crate) file_group_offsets: Vec<u32>,
    pub(crate) component_offsets: Vec<u32>,
}

impl CabDescriptor {
    /// Parses the descriptor from the bytes starting at the descriptor
    /// offset.
    pub(crate) fn parse(data: &[u8]) -> io::Result<CabDescriptor> {
        if data.len() < consts::CAB_DESCRIPTOR_MIN_SIZE {
            invalid_data!(
                "Cabinet descriptor too short ({} bytes; need {})",
                data.len(),
                consts::CAB_DESCRIPTOR_MIN_SIZE
            );
        }
        let mut r = Cursor::new(data);
        r.set_position(consts::CAB_DESCRIPTOR_FILE_TABLE_OFFSET as u64);
        let file_table_offset = r.read_u32::<LittleEndian>()?;
        let _unknown = r.read_u32::<LittleEndian>()?;
        let file_table_size = r.read_u32::<LittleEndian>()?;
        let file_table_size2 = r.read_u32::<LittleEndian>()?;
        let directory_count = r.read_u32::<LittleEndian>()?;
        let _unknown = r.read_u64::<LittleEndian>()?;
        let file_count = r.read_u32::<LittleEndian>()?;
        let file_table_offset2 = r.read_u32::<LittleEndian>()?;
        if file_table_size != file_table_size2 {
            tracing::debug!(
                "File table sizes do not match ({} vs {})",
                file_table_size,
                file_table_size2
            );
        }
        r.set_position(consts::CAB_DESCRIPTOR_GROUP_OFFSETS as u64);
        let mut file_group_offsets =
            Vec::with_capacity(consts::MAX_FILE_GROUP_COUNT);
        for _ in 0..consts::MAX_FILE_GROUP_COUNT {
            file_group_offsets.push(r.read_u32::<LittleEndian>()?);
        }
        let mut component_offsets =
            Vec::with_capacity(consts::MAX_COMPONENT_COUNT);
        for _ in 0..consts::MAX_COMPONENT_COUNT {
            component_offsets.push(r.read_u32::<LittleEndian>()?);
        }
        Ok(CabDescriptor {
            file_table_offset,
            file_table_size,
            file_table_size2,
            directory_count,
            file_count,
            file_table_offset2,
            file_group_offsets,
            component_offsets,
        })
    }

    /// Returns how many descriptor bytes must be loaded so that the file
    /// table and everything before it are in memory.
    pub(crate) fn required_len(&self, descriptor_size: u32) -> u64 {
        let table_end =
            self.file_table_offset as u64 + self.file_table_size as u64;
        table_end.max(descriptor_size as u64)
    }
}
