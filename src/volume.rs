use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::slice;

use crate::consts;
use crate::descriptor::FileDescriptor;
use crate::error::{ExtractError, Result};
use crate::group::{Components, FileGroup, FileGroups};
use crate::header::{CabDescriptor, CommonHeader, VolumeHeader};
use crate::index::DescriptorIndex;

/// What a volume file holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VolumeKind {
    /// A `.hdr` file: metadata only.
    Header,
    /// A `.cab` file: file data, and possibly metadata too.
    Cabinet,
}

/// One physical file of a cabinet set.
#[derive(Clone, Debug)]
pub struct Volume {
    index: u32,
    kind: VolumeKind,
    path: PathBuf,
    common: CommonHeader,
    header: Option<VolumeHeader>,
    previous: Option<usize>,
    next: Option<usize>,
}

/// An iterator over the volumes of a cabinet set, in discovery order.
#[derive(Clone)]
pub struct Volumes<'a> {
    iter: slice::Iter<'a, Volume>,
}

/// A logical cabinet archive: the ordered chain of volume files sharing one
/// name pattern, plus the descriptor tables read from the first of them.
///
/// The set is read-only once opened.  It keeps no file handles; every
/// [`VolumeReader`](crate::VolumeReader) opens the volumes it needs itself,
/// so independent readers never share mutable state.
#[derive(Debug)]
pub struct VolumeSet {
    pattern: PathBuf,
    volumes: Vec<Volume>,
    index: DescriptorIndex,
}

impl Volume {
    fn load(
        index: u32,
        kind: VolumeKind,
        path: PathBuf,
        major_version: u32,
    ) -> io::Result<Volume> {
        let mut file = File::open(&path)?;
        let common = CommonHeader::read(&mut file)?;
        let header = match kind {
            VolumeKind::Header => None,
            VolumeKind::Cabinet => {
                Some(VolumeHeader::read(&mut file, major_version)?)
            }
        };
        Ok(Volume {
            index,
            kind,
            path,
            common,
            header,
            previous: None,
            next: None,
        })
    }

    /// Returns the volume's number within the set (starting at 1).
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns whether this is a header or a cabinet volume.
    pub fn kind(&self) -> VolumeKind {
        self.kind
    }

    /// Returns the path the volume was found at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the volume's common header.
    pub fn common_header(&self) -> &CommonHeader {
        &self.common
    }

    /// Returns the data placement header, for cabinet volumes.
    pub fn volume_header(&self) -> Option<&VolumeHeader> {
        self.header.as_ref()
    }

    /// Returns the position of the preceding volume in the set.
    pub fn previous(&self) -> Option<usize> {
        self.previous
    }

    /// Returns the position of the following volume in the set.
    pub fn next(&self) -> Option<usize> {
        self.next
    }
}

impl<'a> Iterator for Volumes<'a> {
    type Item = &'a Volume;

    fn next(&mut self) -> Option<&'a Volume> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for Volumes<'a> {}

impl VolumeSet {
    /// Opens the cabinet set that `path` belongs to.  `path` may name any
    /// volume of the set (`data1.hdr`, `data2.cab`, ...) or just the pattern
    /// (`data`).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<VolumeSet> {
        let pattern = volume_pattern(path.as_ref());
        let found = discover_volumes(&pattern);
        let (first_index, first_path) = match found.first() {
            Some((index, _, path)) => (*index, path.clone()),
            None => {
                return Err(ExtractError::VolumeUnavailable {
                    volume: 1,
                    path: volume_candidates(&pattern, 1, consts::CABINET_SUFFIX)
                        .swap_remove(0),
                });
            }
        };

        let mut file = File::open(&first_path).map_err(|_| {
            ExtractError::VolumeUnavailable {
                volume: first_index,
                path: first_path.clone(),
            }
        })?;
        let common = CommonHeader::read(&mut file)
            .map_err(|error| ExtractError::InvalidHeader(error.to_string()))?;
        if !common.has_cab_descriptor() {
            return Err(ExtractError::InvalidHeader(format!(
                "{} has no cabinet descriptor",
                first_path.display()
            )));
        }
        let major_version = common.major_version();
        let descriptor = read_cab_descriptor(&mut file, &common)
            .map_err(|error| ExtractError::InvalidHeader(error.to_string()))?;
        let index =
            DescriptorIndex::parse(&descriptor, major_version, first_index)
                .map_err(|error| ExtractError::InvalidHeader(error.to_string()))?;
        tracing::debug!(
            "Opened {} (version {}, {} files, {} directories)",
            first_path.display(),
            major_version,
            index.file_count(),
            index.directory_count()
        );

        let mut volumes: Vec<Volume> = Vec::with_capacity(found.len());
        for (volume_index, kind, path) in found {
            match Volume::load(volume_index, kind, path.clone(), major_version)
            {
                Ok(volume) => volumes.push(volume),
                Err(error) => {
                    // The chain ends at the first unreadable volume.
                    tracing::warn!(
                        "Ignoring {} and later volumes: {}",
                        path.display(),
                        error
                    );
                    break;
                }
            }
        }
        link_volumes(&mut volumes);
        Ok(VolumeSet { pattern, volumes, index })
    }

    /// Returns the path prefix shared by the set's volume files.
    pub fn pattern(&self) -> &Path {
        &self.pattern
    }

    /// Returns an iterator over the set's volumes.
    pub fn volumes(&self) -> Volumes<'_> {
        Volumes { iter: self.volumes.iter() }
    }

    /// Returns the data-bearing volume with the given id, if it was found.
    pub fn cabinet_volume(&self, volume: u32) -> Option<&Volume> {
        self.volumes.iter().find(|candidate| {
            candidate.kind == VolumeKind::Cabinet && candidate.index == volume
        })
    }

    /// Returns the highest cabinet volume id in the set.
    pub fn last_cabinet_volume(&self) -> u32 {
        self.volumes
            .iter()
            .filter(|volume| volume.kind == VolumeKind::Cabinet)
            .map(|volume| volume.index)
            .max()
            .unwrap_or(0)
    }

    /// Returns the lookup tables for the set.
    pub fn descriptor_index(&self) -> &DescriptorIndex {
        &self.index
    }

    /// Returns the format major version.
    pub fn major_version(&self) -> u32 {
        self.index.major_version()
    }

    /// Returns the number of file descriptors, valid or not.
    pub fn file_count(&self) -> usize {
        self.index.file_count()
    }

    /// Returns the number of directory names.
    pub fn directory_count(&self) -> usize {
        self.index.directory_count()
    }

    /// Returns the directory name with the given index.
    pub fn directory_name(&self, index: usize) -> Option<&str> {
        self.index.directory_name(index)
    }

    /// Returns the descriptor for the file with the given index.
    pub fn file_descriptor(&self, index: usize) -> Option<&FileDescriptor> {
        self.index.file_descriptor(index)
    }

    /// Returns the name of the file with the given index.
    pub fn file_name(&self, index: usize) -> Option<&str> {
        self.file_descriptor(index).map(FileDescriptor::name)
    }

    /// Returns the directory name of the file with the given index.
    pub fn file_directory(&self, index: usize) -> Option<&str> {
        self.index.file_directory(index)
    }

    /// Returns the extracted size of the file with the given index.
    pub fn file_size(&self, index: usize) -> Option<u64> {
        self.file_descriptor(index).map(FileDescriptor::expanded_size)
    }

    /// Returns true if the file with the given index can be extracted.
    pub fn file_is_valid(&self, index: usize) -> bool {
        self.index.file_is_valid(index)
    }

    /// Returns an iterator over the file groups.
    pub fn file_groups(&self) -> FileGroups<'_> {
        self.index.file_groups()
    }

    /// Returns an iterator over the components.
    pub fn components(&self) -> Components<'_> {
        self.index.components()
    }

    /// Returns the file group with the given name, if any.
    pub fn find_file_group(&self, name: &str) -> Option<&FileGroup> {
        self.index.find_file_group(name)
    }
}

/// Derives the name pattern shared by a set's volumes by stripping the
/// extension and any trailing digits: `/x/data1.cab` gives `/x/data`.
pub fn volume_pattern(path: &Path) -> PathBuf {
    let stem = match path.file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => return path.to_path_buf(),
    };
    let stripped = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    match path.parent() {
        Some(parent) => parent.join(stripped),
        None => PathBuf::from(stripped),
    }
}

/// Lists the paths to try for volume `index` with the given suffix, in the
/// order they are tried: lowercase suffix first, then uppercase.
pub fn volume_candidates(
    pattern: &Path,
    index: u32,
    suffix: &str,
) -> Vec<PathBuf> {
    [suffix.to_ascii_lowercase(), suffix.to_ascii_uppercase()]
        .iter()
        .map(|suffix| {
            let mut name = OsString::from(pattern.as_os_str());
            name.push(format!("{}.{}", index, suffix));
            PathBuf::from(name)
        })
        .collect()
}

/// Returns the first candidate that exists as a file.
pub fn probe_first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|candidate| candidate.is_file()).cloned()
}

/// Probes volume indices 1, 2, ... until one has neither a header nor a
/// cabinet file.
fn discover_volumes(pattern: &Path) -> Vec<(u32, VolumeKind, PathBuf)> {
    let mut found = Vec::new();
    for index in 1u32.. {
        let header = probe_first_existing(&volume_candidates(
            pattern,
            index,
            consts::HEADER_SUFFIX,
        ));
        let cabinet = probe_first_existing(&volume_candidates(
            pattern,
            index,
            consts::CABINET_SUFFIX,
        ));
        if header.is_none() && cabinet.is_none() {
            break;
        }
        if let Some(path) = header {
            found.push((index, VolumeKind::Header, path));
        }
        if let Some(path) = cabinet {
            found.push((index, VolumeKind::Cabinet, path));
        }
    }
    found
}

fn link_volumes(volumes: &mut [Volume]) {
    let count = volumes.len();
    for (position, volume) in volumes.iter_mut().enumerate() {
        volume.previous = position.checked_sub(1);
        volume.next = if position + 1 < count { Some(position + 1) } else { None };
    }
}

/// Loads the cabinet descriptor and everything up to the end of its file
/// table.
fn read_cab_descriptor<R: Read + Seek>(
    reader: &mut R,
    common: &CommonHeader,
) -> io::Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(common.cab_descriptor_offset() as u64))?;
    let initial_len = (common.cab_descriptor_size() as u64)
        .max(consts::CAB_DESCRIPTOR_MIN_SIZE as u64);
    let mut data = Vec::new();
    reader.by_ref().take(initial_len).read_to_end(&mut data)?;
    let cab = CabDescriptor::parse(&data)?;
    let required = cab.required_len(common.cab_descriptor_size());
    if required > data.len() as u64 {
        let more = required - data.len() as u64;
        reader.by_ref().take(more).read_to_end(&mut data)?;
    }
    Ok(data)
}
