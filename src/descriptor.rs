use std::io::{self, Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::consts;
use crate::header::CabDescriptor;
use crate::string::read_null_terminated_string;

/// Metadata about one file stored in a cabinet set.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FileDescriptor {
    name: String,
    name_offset: u32,
    directory_index: u32,
    flags: u16,
    link_flags: u8,
    expanded_size: u64,
    compressed_size: u64,
    data_offset: u64,
    volume: u32,
    link_previous: u32,
    link_next: u32,
    md5: [u8; 16],
}

impl FileDescriptor {
    /// Returns the name of the file, without its directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the index into the directory name table.
    pub fn directory_index(&self) -> u32 {
        self.directory_index
    }

    /// Returns the size of the file once extracted.  This is authoritative:
    /// extracted output is always exactly this long.
    pub fn expanded_size(&self) -> u64 {
        self.expanded_size
    }

    /// Returns the number of bytes the file's data occupies in the volumes.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Returns the offset of the file's data within its home volume.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Returns the (1-based) id of the volume holding the start of the
    /// file's data.
    pub fn volume(&self) -> u32 {
        self.volume
    }

    /// Returns the index of the descriptor whose data this one reuses.
    pub fn link_previous(&self) -> u32 {
        self.link_previous
    }

    /// Returns the index of the next descriptor sharing this one's data.
    pub fn link_next(&self) -> u32 {
        self.link_next
    }

    /// Returns the stored MD5 of the extracted file.  This is only checked
    /// for major version 6 and later.
    pub fn md5(&self) -> &[u8; 16] {
        &self.md5
    }

    /// Returns true if the file's data is deflate-compressed.
    pub fn is_compressed(&self) -> bool {
        (self.flags & consts::FILE_COMPRESSED) != 0
    }

    /// Returns true if the file's data is obfuscated.
    pub fn is_obfuscated(&self) -> bool {
        (self.flags & consts::FILE_OBFUSCATED) != 0
    }

    /// Returns true if the file's data straddles more than one volume.
    pub fn is_split(&self) -> bool {
        (self.flags & consts::FILE_SPLIT) != 0
    }

    /// Returns true if the file is flagged invalid.
    pub fn is_invalid(&self) -> bool {
        (self.flags & consts::FILE_INVALID) != 0
    }

    /// Returns true if this descriptor reuses the data of the descriptor at
    /// [`link_previous`](FileDescriptor::link_previous).
    pub fn links_previous(&self) -> bool {
        (self.link_flags & consts::LINK_PREV) != 0
    }

    /// Returns true if a later descriptor reuses this one's data.
    pub fn links_next(&self) -> bool {
        (self.link_flags & consts::LINK_NEXT) != 0
    }

    /// Returns true if this entry describes extractable data: it is not
    /// flagged invalid and has both a name and a data offset.
    pub fn is_valid(&self) -> bool {
        !self.is_invalid() && self.name_offset != 0 && self.data_offset != 0
    }

    /// Returns how many bytes of the file are stored in the volumes.
    pub(crate) fn stored_size(&self) -> u64 {
        if self.is_compressed() {
            self.compressed_size
        } else {
            self.expanded_size
        }
    }

    pub(crate) fn mark_split(&mut self) {
        self.flags |= consts::FILE_SPLIT;
    }
}

/// Parses the descriptor for file `index` out of the cabinet descriptor
/// bytes.  `home_volume` is the volume id given to pre-6 descriptors, which
/// do not record one.
pub(crate) fn parse_file_descriptor(
    data: &[u8],
    cab: &CabDescriptor,
    file_table: &[u32],
    index: usize,
    major_version: u32,
    home_volume: u32,
) -> io::Result<FileDescriptor> {
    let table_start = cab.file_table_offset as u64;
    let mut reader = Cursor::new(data);
    let mut fd = if major_version <= 5 {
        let slot = cab.directory_count as usize + index;
        let entry_offset = match file_table.get(slot) {
            Some(&offset) => offset as u64,
            None => invalid_data!("File table has no entry for file {}", index),
        };
        let entry_start = table_start + entry_offset;
        if entry_start + consts::FILE_DESCRIPTOR_SIZE_V5 as u64 > data.len() as u64 {
            invalid_data!("Descriptor for file {} is out of range", index);
        }
        reader.seek(SeekFrom::Start(entry_start))?;
        let name_offset = reader.read_u32::<LittleEndian>()?;
        let directory_index = reader.read_u32::<LittleEndian>()?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let expanded_size = reader.read_u32::<LittleEndian>()? as u64;
        let compressed_size = reader.read_u32::<LittleEndian>()? as u64;
        reader.seek(SeekFrom::Current(0x14))?;
        let data_offset = reader.read_u32::<LittleEndian>()? as u64;
        let mut md5 = [0u8; 16];
        reader.read_exact(&mut md5)?;
        FileDescriptor {
            name: String::new(),
            name_offset,
            directory_index,
            flags,
            link_flags: 0,
            expanded_size,
            compressed_size,
            data_offset,
            volume: home_volume,
            link_previous: 0,
            link_next: 0,
            md5,
        }
    } else {
        let entry_offset = table_start
            + cab.file_table_offset2 as u64
            + (index * consts::FILE_DESCRIPTOR_SIZE_V6) as u64;
        reader.seek(SeekFrom::Start(entry_offset))?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let expanded_size = reader.read_u64::<LittleEndian>()?;
        let compressed_size = reader.read_u64::<LittleEndian>()?;
        let data_offset = reader.read_u64::<LittleEndian>()?;
        let mut md5 = [0u8; 16];
        reader.read_exact(&mut md5)?;
        reader.seek(SeekFrom::Current(0x10))?;
        let name_offset = reader.read_u32::<LittleEndian>()?;
        let directory_index = reader.read_u16::<LittleEndian>()? as u32;
        reader.seek(SeekFrom::Current(0xc))?;
        let link_previous = reader.read_u32::<LittleEndian>()?;
        let link_next = reader.read_u32::<LittleEndian>()?;
        let link_flags = reader.read_u8()?;
        let volume = reader.read_u16::<LittleEndian>()? as u32;
        FileDescriptor {
            name: String::new(),
            name_offset,
            directory_index,
            flags,
            link_flags,
            expanded_size,
            compressed_size,
            data_offset,
            volume,
            link_previous,
            link_next,
            md5,
        }
    };
    if fd.name_offset != 0 {
        let name_at = (table_start + fd.name_offset as u64) as usize;
        fd.name = read_null_terminated_string(data, name_at, major_version)?;
    }
    if !fd.is_compressed() && fd.compressed_size != fd.expanded_size {
        tracing::trace!(
            "File {} is not compressed but compressed size is {} and \
             expanded size is {}",
            index,
            fd.compressed_size,
            fd.expanded_size
        );
    }
    Ok(fd)
}

#[cfg(test)]
pub(crate) fn test_descriptor(
    name: &str,
    flags: u16,
    expanded_size: u64,
    compressed_size: u64,
    data_offset: u64,
    volume: u32,
) -> FileDescriptor {
    FileDescriptor {
        name: name.to_string(),
        name_offset: 1,
        directory_index: 0,
        flags,
        link_flags: 0,
        expanded_size,
        compressed_size,
        data_offset,
        volume,
        link_previous: 0,
        link_next: 0,
        md5: [0; 16],
    }
}

#[cfg(test)]
mod tests {
    use super::test_descriptor;
    use crate::consts;

    #[test]
    fn validity_predicate() {
        let fd = test_descriptor("a.txt", 0, 10, 10, 0x200, 1);
        assert!(fd.is_valid());

        let fd = test_descriptor("a.txt", consts::FILE_INVALID, 10, 10, 0x200, 1);
        assert!(!fd.is_valid());

        let fd = test_descriptor("a.txt", 0, 10, 10, 0, 1);
        assert!(!fd.is_valid());

        let mut fd = test_descriptor("a.txt", 0, 10, 10, 0x200, 1);
        fd.name_offset = 0;
        assert!(!fd.is_valid());
    }

    #[test]
    fn stored_size_follows_compressed_flag() {
        let fd = test_descriptor("a", consts::FILE_COMPRESSED, 100, 40, 1, 1);
        assert_eq!(fd.stored_size(), 40);
        let fd = test_descriptor("a", 0, 100, 100, 1, 1);
        assert_eq!(fd.stored_size(), 100);
    }

    #[test]
    fn mark_split_sets_flag() {
        let mut fd = test_descriptor("a", consts::FILE_COMPRESSED, 1, 1, 1, 1);
        assert!(!fd.is_split());
        fd.mark_split();
        assert!(fd.is_split());
        assert!(fd.is_compressed());
    }
}
