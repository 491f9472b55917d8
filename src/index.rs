use std::io::{self, Cursor, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::consts;
use crate::descriptor::{parse_file_descriptor, FileDescriptor};
use crate::group::{
    parse_component, parse_file_group, walk_offset_lists, Component,
    Components, FileGroup, FileGroups,
};
use crate::header::CabDescriptor;
use crate::string::read_null_terminated_string;

/// Read-only lookup tables over the file descriptors, directory names, file
/// groups and components of a cabinet set.  Built once when the set is
/// opened and never modified afterwards.
#[derive(Debug)]
pub struct DescriptorIndex {
    major_version: u32,
    directories: Vec<String>,
    files: Vec<Option<FileDescriptor>>,
    file_groups: Vec<FileGroup>,
    components: Vec<Component>,
}

impl DescriptorIndex {
    /// Builds the index from the bytes that start at the cabinet descriptor
    /// offset of the header volume.  Entries that cannot be decoded are
    /// recorded as missing rather than failing the whole index.
    pub(crate) fn parse(
        data: &[u8],
        major_version: u32,
        home_volume: u32,
    ) -> io::Result<DescriptorIndex> {
        let cab = CabDescriptor::parse(data)?;
        let file_table = read_file_table(data, &cab, major_version)?;
        let table_start = cab.file_table_offset as usize;

        let mut directories = Vec::with_capacity(cab.directory_count as usize);
        for index in 0..cab.directory_count as usize {
            let name = file_table
                .get(index)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        "Directory index out of file table range",
                    )
                })
                .and_then(|&offset| {
                    read_null_terminated_string(
                        data,
                        table_start + offset as usize,
                        major_version,
                    )
                });
            match name {
                Ok(name) => directories.push(name),
                Err(error) => {
                    tracing::debug!("Bad directory name {}: {}", index, error);
                    directories.push(String::new());
                }
            }
        }

        if major_version > 5 {
            let table_end = table_start as u64
                + cab.file_table_offset2 as u64
                + cab.file_count as u64 * consts::FILE_DESCRIPTOR_SIZE_V6 as u64;
            if table_end > data.len() as u64 {
                invalid_data!(
                    "{} file descriptors do not fit in the descriptor",
                    cab.file_count
                );
            }
        }
        let mut files = Vec::with_capacity(cab.file_count as usize);
        for index in 0..cab.file_count as usize {
            match parse_file_descriptor(
                data,
                &cab,
                &file_table,
                index,
                major_version,
                home_volume,
            ) {
                Ok(fd) => files.push(Some(fd)),
                Err(error) => {
                    tracing::debug!("Bad file descriptor {}: {}", index, error);
                    files.push(None);
                }
            }
        }

        let mut file_groups = Vec::new();
        for offset in walk_offset_lists(data, &cab.file_group_offsets)? {
            match parse_file_group(data, offset, major_version) {
                Ok(group) => file_groups.push(group),
                Err(error) => {
                    tracing::debug!("Bad file group at {:#x}: {}", offset, error)
                }
            }
        }

        let mut components = Vec::new();
        for offset in walk_offset_lists(data, &cab.component_offsets)? {
            match parse_component(data, offset, major_version) {
                Ok(component) => components.push(component),
                Err(error) => {
                    tracing::debug!("Bad component at {:#x}: {}", offset, error)
                }
            }
        }

        Ok(DescriptorIndex {
            major_version,
            directories,
            files,
            file_groups,
            components,
        })
    }

    /// Returns the format major version the tables were decoded with.
    pub fn major_version(&self) -> u32 {
        self.major_version
    }

    /// Returns the number of file descriptors, valid or not.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Returns the number of directory names.
    pub fn directory_count(&self) -> usize {
        self.directories.len()
    }

    /// Returns the directory name with the given index.
    pub fn directory_name(&self, index: usize) -> Option<&str> {
        self.directories.get(index).map(String::as_str)
    }

    /// Returns the descriptor for the file with the given index, if it
    /// exists and could be decoded.
    pub fn file_descriptor(&self, index: usize) -> Option<&FileDescriptor> {
        self.files.get(index).and_then(Option::as_ref)
    }

    /// Returns true if the file with the given index can be extracted.
    pub fn file_is_valid(&self, index: usize) -> bool {
        self.file_descriptor(index).map_or(false, FileDescriptor::is_valid)
    }

    /// Returns the name of the directory containing the given file.
    pub fn file_directory(&self, index: usize) -> Option<&str> {
        let fd = self.file_descriptor(index)?;
        self.directory_name(fd.directory_index() as usize)
    }

    /// Returns an iterator over the file groups.
    pub fn file_groups(&self) -> FileGroups<'_> {
        FileGroups { iter: self.file_groups.iter() }
    }

    /// Returns an iterator over the components.
    pub fn components(&self) -> Components<'_> {
        Components { iter: self.components.iter() }
    }

    /// Returns the file group with the given name, if any.
    pub fn find_file_group(&self, name: &str) -> Option<&FileGroup> {
        self.file_groups.iter().find(|group| group.name() == name)
    }

    #[cfg(test)]
    pub(crate) fn from_descriptors(
        major_version: u32,
        directories: Vec<String>,
        files: Vec<FileDescriptor>,
    ) -> DescriptorIndex {
        DescriptorIndex {
            major_version,
            directories,
            files: files.into_iter().map(Some).collect(),
            file_groups: Vec::new(),
            components: Vec::new(),
        }
    }
}

/// Reads the offsets of the directory names and, before version 6, of the
/// file descriptors.
fn read_file_table(
    data: &[u8],
    cab: &CabDescriptor,
    major_version: u32,
) -> io::Result<Vec<u32>> {
    let mut count = cab.directory_count as u64;
    if major_version <= 5 {
        count += cab.file_count as u64;
    }
    if count * 4 > data.len() as u64 {
        invalid_data!(
            "File table with {} entries does not fit in the descriptor",
            count
        );
    }
    let mut reader = Cursor::new(data);
    reader.seek(SeekFrom::Start(cab.file_table_offset as u64))?;
    let mut table = Vec::with_capacity(count as usize);
    for _ in 0..count {
        table.push(reader.read_u32::<LittleEndian>()?);
    }
    Ok(table)
}
