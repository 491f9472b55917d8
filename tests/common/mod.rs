#![allow(dead_code)]

//! Writes small but structurally complete cabinet sets for the integration
//! tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::{Compress, Compression, FlushCompress};
use md5::{Digest, Md5};

const SIGNATURE: u32 = 0x28635349;
const FILE_TABLE_OFFSET: usize = 0x280;
const GROUP_OFFSETS: usize = 0x3e;
const LIST_HEADS: usize = 71;

const FILE_SPLIT: u16 = 0x1;
const FILE_OBFUSCATED: u16 = 0x2;
const FILE_COMPRESSED: u16 = 0x4;
const FILE_INVALID: u16 = 0x8;
const LINK_PREV: u8 = 0x1;

/// One file to store in a test cabinet set.
#[derive(Clone)]
pub struct FileSpec {
    name: String,
    directory: u32,
    data: Vec<u8>,
    compressed: bool,
    obfuscated: bool,
    invalid: bool,
    link_previous: Option<usize>,
    md5: Option<[u8; 16]>,
}

impl FileSpec {
    pub fn new(name: &str, data: &[u8]) -> FileSpec {
        FileSpec {
            name: name.to_string(),
            directory: 0,
            data: data.to_vec(),
            compressed: false,
            obfuscated: false,
            invalid: false,
            link_previous: None,
            md5: None,
        }
    }

    pub fn compressed(mut self) -> FileSpec {
        self.compressed = true;
        self
    }

    pub fn obfuscated(mut self) -> FileSpec {
        self.obfuscated = true;
        self
    }

    pub fn invalid(mut self) -> FileSpec {
        self.invalid = true;
        self
    }

    pub fn in_directory(mut self, directory: u32) -> FileSpec {
        self.directory = directory;
        self
    }

    /// Makes this entry reuse the data of file `index`.
    pub fn linked_to(mut self, index: usize) -> FileSpec {
        self.link_previous = Some(index);
        self
    }

    pub fn with_md5(mut self, md5: [u8; 16]) -> FileSpec {
        self.md5 = Some(md5);
        self
    }
}

#[derive(Clone, Copy, Default)]
struct Placement {
    volume: u32,
    offset: u64,
    split: bool,
}

#[derive(Default)]
struct VolumeData {
    data_start: u64,
    bytes: Vec<u8>,
    has_files: bool,
    first_index: u32,
    last_index: u32,
    first: (u64, u64, u64),
    last: (u64, u64, u64),
}

impl VolumeData {
    fn new(data_start: u64) -> VolumeData {
        VolumeData { data_start, ..VolumeData::default() }
    }

    fn record(&mut self, index: usize, fields: (u64, u64, u64)) {
        if !self.has_files {
            self.has_files = true;
            self.first_index = index as u32;
            self.first = fields;
        }
        self.last_index = index as u32;
        self.last = fields;
    }
}

/// Builds `data1.hdr`, `data1.cab`, `data2.cab`, ... in a directory.
pub struct CabinetSetBuilder {
    major_version: u32,
    directories: Vec<String>,
    files: Vec<FileSpec>,
    volume_capacity: usize,
    header_file: bool,
    flag_splits: bool,
    legacy_chunks: bool,
    chunk_size: usize,
    groups: Vec<(String, u32, u32)>,
    components: Vec<(String, Vec<String>)>,
}

impl CabinetSetBuilder {
    pub fn new(major_version: u32) -> CabinetSetBuilder {
        CabinetSetBuilder {
            major_version,
            directories: Vec::new(),
            files: Vec::new(),
            volume_capacity: usize::MAX,
            header_file: true,
            flag_splits: true,
            legacy_chunks: false,
            chunk_size: 0x8000,
            groups: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn add_directory(&mut self, name: &str) -> u32 {
        self.directories.push(name.to_string());
        (self.directories.len() - 1) as u32
    }

    pub fn add_file(&mut self, file: FileSpec) -> usize {
        self.files.push(file);
        self.files.len() - 1
    }

    pub fn add_file_group(&mut self, name: &str, first: u32, last: u32) {
        self.groups.push((name.to_string(), first, last));
    }

    pub fn add_component(&mut self, name: &str, groups: &[&str]) {
        self.components.push((
            name.to_string(),
            groups.iter().map(|group| group.to_string()).collect(),
        ));
    }

    /// Limits how many data bytes each cabinet volume holds.
    pub fn set_volume_capacity(&mut self, capacity: usize) {
        self.volume_capacity = capacity;
    }

    /// Chooses between a separate `data1.hdr` and a descriptor embedded in
    /// `data1.cab`.
    pub fn set_header_file(&mut self, header_file: bool) {
        self.header_file = header_file;
    }

    /// Chooses whether split files carry the split flag in their
    /// descriptors.  Version 5 readers must detect them either way.
    pub fn set_flag_splits(&mut self, flag_splits: bool) {
        self.flag_splits = flag_splits;
    }

    /// Writes chunks the way the legacy encoder does: sync-flushed, never
    /// finishing the deflate stream.
    pub fn set_legacy_chunks(&mut self, legacy_chunks: bool) {
        self.legacy_chunks = legacy_chunks;
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size;
    }

    /// Writes the set into `dir` and returns the path to open it by.
    pub fn build(&self, dir: &Path) -> io::Result<PathBuf> {
        let streams: Vec<Vec<u8>> =
            self.files.iter().map(|file| self.stored_stream(file)).collect();
        let volume_header_size =
            if self.major_version <= 5 { 40 } else { 64 };
        let cab_header_size = 20 + volume_header_size;

        // The descriptor's size does not depend on where data lands.
        let dummy = vec![Placement::default(); self.files.len()];
        let descriptor_len = self.descriptor(&streams, &dummy).len() as u64;
        let first_data_start = if self.header_file {
            cab_header_size
        } else {
            cab_header_size + descriptor_len
        };
        let (placements, volumes) =
            self.layout(&streams, first_data_start, cab_header_size);
        let descriptor = self.descriptor(&streams, &placements);

        let version = 0x0100_0000 | (self.major_version << 12);
        if self.header_file {
            let mut hdr = common_header(version, 0x200, descriptor.len() as u32);
            hdr.resize(0x200, 0);
            hdr.extend_from_slice(&descriptor);
            fs::write(dir.join("data1.hdr"), hdr)?;
        }
        for (position, volume) in volumes.iter().enumerate() {
            let embed = position == 0 && !self.header_file;
            let mut cab = if embed {
                common_header(
                    version,
                    cab_header_size as u32,
                    descriptor.len() as u32,
                )
            } else {
                common_header(version, 0, 0)
            };
            cab.extend_from_slice(&self.volume_header(volume));
            if embed {
                cab.extend_from_slice(&descriptor);
            }
            assert_eq!(cab.len() as u64, volume.data_start);
            cab.extend_from_slice(&volume.bytes);
            fs::write(dir.join(format!("data{}.cab", position + 1)), cab)?;
        }
        Ok(if self.header_file {
            dir.join("data1.hdr")
        } else {
            dir.join("data1.cab")
        })
    }

    /// Returns the bytes a file occupies in the volumes.
    fn stored_stream(&self, file: &FileSpec) -> Vec<u8> {
        if file.link_previous.is_some() || file.invalid {
            return Vec::new();
        }
        let mut stored = if file.compressed {
            let mut stored = Vec::new();
            for piece in file.data.chunks(self.chunk_size) {
                let chunk = raw_deflate(piece, self.legacy_chunks);
                stored.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
                stored.extend_from_slice(&chunk);
            }
            stored
        } else {
            file.data.clone()
        };
        if file.obfuscated {
            iscab::obfuscate(&mut stored, 0);
        }
        stored
    }

    fn layout(
        &self,
        streams: &[Vec<u8>],
        first_data_start: u64,
        data_start: u64,
    ) -> (Vec<Placement>, Vec<VolumeData>) {
        let capacity = self.volume_capacity;
        let mut volumes = vec![VolumeData::new(first_data_start)];
        let mut placements = vec![Placement::default(); self.files.len()];
        for (index, file) in self.files.iter().enumerate() {
            if let Some(target) = file.link_previous {
                placements[index] = placements[target];
                continue;
            }
            if file.invalid {
                continue;
            }
            let stored = &streams[index];
            if !stored.is_empty()
                && volumes.last().map_or(0, |v| v.bytes.len()) >= capacity
            {
                volumes.push(VolumeData::new(data_start));
            }
            let room = capacity - volumes.last().map_or(0, |v| v.bytes.len());
            let split = stored.len() > room;
            let volume = volumes.len() as u32;
            let start = volumes.last().map_or(0, |v| v.data_start + v.bytes.len() as u64);
            placements[index] = Placement { volume, offset: start, split };

            let mut remaining = &stored[..];
            loop {
                let current = volumes.last_mut().unwrap();
                let room = capacity - current.bytes.len();
                let take = room.min(remaining.len());
                let offset = current.data_start + current.bytes.len() as u64;
                current.bytes.extend_from_slice(&remaining[..take]);
                let fields = if split {
                    (offset, take as u64, take as u64)
                } else {
                    (offset, file.data.len() as u64, stored.len() as u64)
                };
                current.record(index, fields);
                remaining = &remaining[take..];
                if remaining.is_empty() {
                    break;
                }
                volumes.push(VolumeData::new(data_start));
            }
        }
        (placements, volumes)
    }

    fn volume_header(&self, volume: &VolumeData) -> Vec<u8> {
        let mut out = Vec::new();
        if self.major_version <= 5 {
            for word in [
                volume.data_start,
                0,
                volume.first_index as u64,
                volume.last_index as u64,
                volume.first.0,
                volume.first.1,
                volume.first.2,
                volume.last.0,
                volume.last.1,
                volume.last.2,
            ] {
                out.extend_from_slice(&(word as u32).to_le_bytes());
            }
        } else {
            let pair = |out: &mut Vec<u8>, value: u64| {
                out.extend_from_slice(&(value as u32).to_le_bytes());
                out.extend_from_slice(&((value >> 32) as u32).to_le_bytes());
            };
            pair(&mut out, volume.data_start);
            out.extend_from_slice(&volume.first_index.to_le_bytes());
            out.extend_from_slice(&volume.last_index.to_le_bytes());
            for value in [
                volume.first.0,
                volume.first.1,
                volume.first.2,
                volume.last.0,
                volume.last.1,
                volume.last.2,
            ] {
                pair(&mut out, value);
            }
        }
        out
    }

    fn descriptor(&self, streams: &[Vec<u8>], placements: &[Placement]) -> Vec<u8> {
        let v5 = self.major_version <= 5;
        let entries = self.directories.len() + if v5 { self.files.len() } else { 0 };
        let mut table = vec![0u8; entries * 4];
        for (index, name) in self.directories.iter().enumerate() {
            let offset = push_string(&mut table, name);
            put_u32(&mut table, index * 4, offset);
        }
        let name_offsets: Vec<u32> = self
            .files
            .iter()
            .map(|file| push_string(&mut table, &file.name))
            .collect();

        let mut file_table_offset2 = 0;
        if !v5 {
            file_table_offset2 = table.len() as u32;
        }
        for (index, file) in self.files.iter().enumerate() {
            let (source, placement) = match file.link_previous {
                Some(target) => (target, placements[target]),
                None => (index, placements[index]),
            };
            let source_file = &self.files[source];
            let mut flags = 0u16;
            if source_file.compressed {
                flags |= FILE_COMPRESSED;
            }
            if source_file.obfuscated {
                flags |= FILE_OBFUSCATED;
            }
            if placement.split && self.flag_splits {
                flags |= FILE_SPLIT;
            }
            if file.invalid {
                flags |= FILE_INVALID;
            }
            let expanded = source_file.data.len() as u64;
            let compressed = streams[source].len() as u64;
            let md5 = file.md5.unwrap_or_else(|| md5_of(&source_file.data));
            if v5 {
                let offset = table.len() as u32;
                put_u32(&mut table, (self.directories.len() + index) * 4, offset);
                table.extend_from_slice(&name_offsets[index].to_le_bytes());
                table.extend_from_slice(&file.directory.to_le_bytes());
                table.extend_from_slice(&flags.to_le_bytes());
                table.extend_from_slice(&(expanded as u32).to_le_bytes());
                table.extend_from_slice(&(compressed as u32).to_le_bytes());
                table.extend_from_slice(&[0u8; 0x14]);
                table.extend_from_slice(&(placement.offset as u32).to_le_bytes());
                table.extend_from_slice(&md5);
            } else {
                table.extend_from_slice(&flags.to_le_bytes());
                table.extend_from_slice(&expanded.to_le_bytes());
                table.extend_from_slice(&compressed.to_le_bytes());
                table.extend_from_slice(&placement.offset.to_le_bytes());
                table.extend_from_slice(&md5);
                table.extend_from_slice(&[0u8; 0x10]);
                table.extend_from_slice(&name_offsets[index].to_le_bytes());
                table.extend_from_slice(&(file.directory as u16).to_le_bytes());
                table.extend_from_slice(&[0u8; 0xc]);
                let link_previous = file.link_previous.unwrap_or(0) as u32;
                table.extend_from_slice(&link_previous.to_le_bytes());
                table.extend_from_slice(&0u32.to_le_bytes());
                let link_flags =
                    if file.link_previous.is_some() { LINK_PREV } else { 0 };
                table.push(link_flags);
                table.extend_from_slice(&(placement.volume as u16).to_le_bytes());
            }
        }

        let mut blob = vec![0u8; FILE_TABLE_OFFSET];
        blob.extend_from_slice(&table);
        let group_head = self.write_groups(&mut blob);
        let component_head = self.write_components(&mut blob);

        put_u32(&mut blob, 0x0c, FILE_TABLE_OFFSET as u32);
        put_u32(&mut blob, 0x14, table.len() as u32);
        put_u32(&mut blob, 0x18, table.len() as u32);
        put_u32(&mut blob, 0x1c, self.directories.len() as u32);
        put_u32(&mut blob, 0x28, self.files.len() as u32);
        put_u32(&mut blob, 0x2c, file_table_offset2);
        put_u32(&mut blob, GROUP_OFFSETS, group_head);
        put_u32(&mut blob, GROUP_OFFSETS + 4 * LIST_HEADS, component_head);
        blob
    }

    fn write_groups(&self, blob: &mut Vec<u8>) -> u32 {
        let skip = if self.major_version <= 5 { 0x48 } else { 0x12 };
        let mut records = Vec::new();
        for (name, first, last) in &self.groups {
            let name_offset = push_string(blob, name);
            let record = blob.len() as u32;
            blob.extend_from_slice(&name_offset.to_le_bytes());
            blob.resize(blob.len() + skip, 0);
            blob.extend_from_slice(&first.to_le_bytes());
            blob.extend_from_slice(&last.to_le_bytes());
            records.push((name_offset, record));
        }
        write_list(blob, &records)
    }

    fn write_components(&self, blob: &mut Vec<u8>) -> u32 {
        let skip = if self.major_version <= 5 { 0x6c } else { 0x6b };
        let mut records = Vec::new();
        for (name, groups) in &self.components {
            let name_offset = push_string(blob, name);
            let group_names: Vec<u32> =
                groups.iter().map(|group| push_string(blob, group)).collect();
            let table = blob.len() as u32;
            for offset in group_names {
                blob.extend_from_slice(&offset.to_le_bytes());
            }
            let record = blob.len() as u32;
            blob.extend_from_slice(&name_offset.to_le_bytes());
            blob.resize(blob.len() + skip, 0);
            blob.extend_from_slice(&(groups.len() as u16).to_le_bytes());
            blob.extend_from_slice(&table.to_le_bytes());
            records.push((name_offset, record));
        }
        write_list(blob, &records)
    }
}

/// Writes a linked list of (name, record, next) nodes and returns its head.
fn write_list(blob: &mut Vec<u8>, records: &[(u32, u32)]) -> u32 {
    let mut head = 0;
    let mut previous_next: Option<usize> = None;
    for &(name_offset, record) in records {
        let node = blob.len();
        blob.extend_from_slice(&name_offset.to_le_bytes());
        blob.extend_from_slice(&record.to_le_bytes());
        blob.extend_from_slice(&0u32.to_le_bytes());
        match previous_next {
            Some(at) => put_u32(blob, at, node as u32),
            None => head = node as u32,
        }
        previous_next = Some(node + 8);
    }
    head
}

fn common_header(version: u32, descriptor_offset: u32, descriptor_size: u32) -> Vec<u8> {
    let mut out = Vec::new();
    for word in [SIGNATURE, version, 0, descriptor_offset, descriptor_size] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

fn push_string(buf: &mut Vec<u8>, value: &str) -> u32 {
    let offset = buf.len() as u32;
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
    offset
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn raw_deflate(data: &[u8], legacy: bool) -> Vec<u8> {
    let flush = if legacy { FlushCompress::Sync } else { FlushCompress::Finish };
    let mut compressor = Compress::new(Compression::default(), false);
    let mut out = Vec::with_capacity(data.len() + 1024);
    compressor.compress_vec(data, &mut out, flush).unwrap();
    assert_eq!(compressor.total_in() as usize, data.len());
    out
}

pub fn md5_of(data: &[u8]) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&Md5::digest(data));
    bytes
}

/// Returns `len` bytes of reproducible pseudo-random data.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    use rand::{RngCore, SeedableRng};
    let mut rng = rand::rngs::SmallRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}
