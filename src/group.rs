use std::io::{self, Cursor, Seek, SeekFrom};
use std::ops::RangeInclusive;
use std::slice;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::consts;
use crate::string::read_null_terminated_string;

/// A named, contiguous range of files.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FileGroup {
    name: String,
    first_file: u32,
    last_file: u32,
}

/// A named set of file groups.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Component {
    name: String,
    file_group_names: Vec<String>,
}

/// An iterator over the file groups in a cabinet set.
#[derive(Clone)]
pub struct FileGroups<'a> {
    pub(crate) iter: slice::Iter<'a, FileGroup>,
}

/// An iterator over the components in a cabinet set.
#[derive(Clone)]
pub struct Components<'a> {
    pub(crate) iter: slice::Iter<'a, Component>,
}

impl FileGroup {
    /// Returns the name of the group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the index of the first file in the group.
    pub fn first_file(&self) -> u32 {
        self.first_file
    }

    /// Returns the index of the last file in the group.
    pub fn last_file(&self) -> u32 {
        self.last_file
    }

    /// Returns the range of file indices in the group.
    pub fn files(&self) -> RangeInclusive<usize> {
        self.first_file as usize..=self.last_file as usize
    }

    /// Returns true if the file with the given index is in the group.
    pub fn contains(&self, index: usize) -> bool {
        self.files().contains(&index)
    }
}

impl Component {
    /// Returns the name of the component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the names of the file groups belonging to this component.
    pub fn file_group_names(&self) -> &[String] {
        &self.file_group_names
    }
}

impl<'a> Iterator for FileGroups<'a> {
    type Item = &'a FileGroup;

    fn next(&mut self) -> Option<&'a FileGroup> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for FileGroups<'a> {}

impl<'a> Iterator for Components<'a> {
    type Item = &'a Component;

    fn next(&mut self) -> Option<&'a Component> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for Components<'a> {}

/// Follows each linked list of (name, record, next) nodes starting at
/// `heads` and returns the record offsets in order.
pub(crate) fn walk_offset_lists(
    data: &[u8],
    heads: &[u32],
) -> io::Result<Vec<u32>> {
    let mut records = Vec::new();
    for &head in heads.iter().filter(|&&head| head != 0) {
        let mut offset = head;
        let mut hops = 0usize;
        while offset != 0 {
            // Each node is 12 bytes, so a longer walk must be a cycle.
            hops += 1;
            if hops > data.len() / 12 + 1 {
                invalid_data!("Offset list starting at {:#x} loops", head);
            }
            let mut reader = Cursor::new(data);
            reader.seek(SeekFrom::Start(offset as u64))?;
            let _name_offset = reader.read_u32::<LittleEndian>()?;
            let record_offset = reader.read_u32::<LittleEndian>()?;
            let next_offset = reader.read_u32::<LittleEndian>()?;
            records.push(record_offset);
            offset = next_offset;
        }
    }
    Ok(records)
}

pub(crate) fn parse_file_group(
    data: &[u8],
    offset: u32,
    major_version: u32,
) -> io::Result<FileGroup> {
    let mut reader = Cursor::new(data);
    reader.seek(SeekFrom::Start(offset as u64))?;
    let name_offset = reader.read_u32::<LittleEndian>()?;
    let skip = if major_version <= 5 { 0x48 } else { 0x12 };
    reader.seek(SeekFrom::Current(skip))?;
    let first_file = reader.read_u32::<LittleEndian>()?;
    let last_file = reader.read_u32::<LittleEndian>()?;
    let name =
        read_null_terminated_string(data, name_offset as usize, major_version)?;
    if first_file > last_file {
        tracing::debug!(
            "File group {:?} has first file {} after last file {}",
            name,
            first_file,
            last_file
        );
    }
    Ok(FileGroup { name, first_file, last_file })
}

pub(crate) fn parse_component(
    data: &[u8],
    offset: u32,
    major_version: u32,
) -> io::Result<Component> {
    let mut reader = Cursor::new(data);
    reader.seek(SeekFrom::Start(offset as u64))?;
    let name_offset = reader.read_u32::<LittleEndian>()?;
    let skip = if major_version <= 5 { 0x6c } else { 0x6b };
    reader.seek(SeekFrom::Current(skip))?;
    let file_group_count = reader.read_u16::<LittleEndian>()? as usize;
    if file_group_count > consts::MAX_FILE_GROUP_COUNT {
        invalid_data!(
            "Component lists {} file groups (max is {})",
            file_group_count,
            consts::MAX_FILE_GROUP_COUNT
        );
    }
    let table_offset = reader.read_u32::<LittleEndian>()?;
    let name =
        read_null_terminated_string(data, name_offset as usize, major_version)?;
    let mut file_group_names = Vec::with_capacity(file_group_count);
    reader.seek(SeekFrom::Start(table_offset as u64))?;
    for _ in 0..file_group_count {
        let group_name_offset = reader.read_u32::<LittleEndian>()?;
        file_group_names.push(read_null_terminated_string(
            data,
            group_name_offset as usize,
            major_version,
        )?);
    }
    Ok(Component { name, file_group_names })
}
