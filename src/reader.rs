use std::cmp;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use crate::cancel::CancellationToken;
use crate::consts;
use crate::descriptor::FileDescriptor;
use crate::error::{ExtractError, Result};
use crate::header::VolumeHeader;
use crate::obfuscation::deobfuscate;
use crate::volume::{volume_candidates, VolumeSet};

/// Where a [`VolumeReader`] is in its walk over the volumes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReaderState {
    /// No volume has been opened yet.
    Init,
    /// The given volume is open and positioned at the file's data.
    VolumeOpen(u32),
    /// Bytes are being read from the current volume.
    Reading,
    /// The current volume holds no more of the file's data.
    NeedNextVolume,
    /// All of the file's stored bytes have been read.
    Done,
    /// A previous read failed; the reader cannot continue.
    Error,
}

/// Reads the stored (possibly compressed) bytes of one file, following the
/// data across volume boundaries and undoing obfuscation on the way.
pub struct VolumeReader<'a> {
    set: &'a VolumeSet,
    index: usize,
    file: FileDescriptor,
    state: ReaderState,
    volume: u32,
    handle: Option<File>,
    volume_header: VolumeHeader,
    volume_bytes_left: u64,
    volume_bytes_read: u64,
    stored_bytes_left: u64,
    seed: u32,
    cancel: CancellationToken,
}

impl<'a> VolumeReader<'a> {
    /// Opens a reader for the stored data of file `index`.  The reader is
    /// positioned at the start of the data in the volume that holds it.
    pub fn open(
        set: &'a VolumeSet,
        index: usize,
        cancel: CancellationToken,
    ) -> Result<VolumeReader<'a>> {
        let file = match set.file_descriptor(index) {
            Some(fd) => fd.clone(),
            None => return Err(ExtractError::InvalidDescriptor(index)),
        };
        let mut reader = VolumeReader {
            set,
            index,
            stored_bytes_left: file.stored_size(),
            state: ReaderState::Init,
            volume: start_volume(&file),
            file,
            handle: None,
            volume_header: VolumeHeader::default(),
            volume_bytes_left: 0,
            volume_bytes_read: 0,
            seed: 0,
            cancel,
        };
        let mut volume = reader.volume;
        loop {
            reader.open_volume(volume)?;
            // Pre-6 descriptors only name the volume the set starts in.
            if set.major_version() <= 5
                && index as u64 > reader.volume_header.last_file_index() as u64
            {
                tracing::trace!(
                    "File {} is past volume {}, trying the next one",
                    index,
                    volume
                );
                volume += 1;
                continue;
            }
            break;
        }
        Ok(reader)
    }

    /// Returns the index of the file being read.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the descriptor of the file being read, including any split
    /// flag discovered while opening it.
    pub fn descriptor(&self) -> &FileDescriptor {
        &self.file
    }

    /// Returns the id of the volume currently being read.
    pub fn volume(&self) -> u32 {
        self.volume
    }

    /// Returns the reader's state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Returns how many stored bytes of the file remain to be read.
    pub fn stored_bytes_left(&self) -> u64 {
        self.stored_bytes_left
    }

    /// Fills `buf` completely, or fails with `TruncatedRead`.
    pub fn read_exact_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let count = self.read_some(&mut buf[filled..])?;
            if count == 0 {
                return Err(ExtractError::truncated(
                    buf.len() as u64,
                    filled as u64,
                ));
            }
            filled += count;
        }
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state == ReaderState::Error {
            return Err(ExtractError::Io(io::Error::new(
                io::ErrorKind::Other,
                "reader failed earlier",
            )));
        }
        let result = self.read_from_volumes(buf);
        if result.is_err() {
            self.state = ReaderState::Error;
            self.handle = None;
        }
        result
    }

    fn read_from_volumes(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.stored_bytes_left == 0 {
                self.state = ReaderState::Done;
                self.handle = None;
                return Ok(0);
            }
            if buf.is_empty() {
                return Ok(0);
            }
            if self.volume_bytes_left == 0 {
                self.state = ReaderState::NeedNextVolume;
                self.cancel.check()?;
                let next = self.volume + 1;
                self.open_volume(next)?;
                continue;
            }

            self.state = ReaderState::Reading;
            let wanted = cmp::min(
                buf.len() as u64,
                cmp::min(self.volume_bytes_left, self.stored_bytes_left),
            ) as usize;
            let count = match self.handle.as_mut() {
                Some(handle) => handle.read(&mut buf[..wanted])?,
                None => return Err(self.unavailable(self.volume)),
            };
            if count == 0 {
                return Err(ExtractError::truncated(
                    self.volume_bytes_read + self.volume_bytes_left,
                    self.volume_bytes_read,
                ));
            }
            self.volume_bytes_left -= count as u64;
            self.volume_bytes_read += count as u64;
            self.stored_bytes_left -= count as u64;
            if self.file.is_obfuscated() {
                self.seed = deobfuscate(&mut buf[..count], self.seed);
            }
            return Ok(count);
        }
    }

    /// Opens volume `volume` and positions it at this file's data.
    fn open_volume(&mut self, volume: u32) -> Result<()> {
        // Release the previous volume before touching the next one.
        self.handle = None;
        let entry = match self.set.cabinet_volume(volume) {
            Some(entry) => entry,
            None => return Err(self.unavailable(volume)),
        };
        let header = match entry.volume_header() {
            Some(header) => *header,
            None => return Err(self.unavailable(volume)),
        };
        let mut handle = File::open(entry.path()).map_err(|_| {
            ExtractError::VolumeUnavailable {
                volume,
                path: entry.path().to_path_buf(),
            }
        })?;
        self.state = ReaderState::VolumeOpen(volume);
        self.volume = volume;
        self.volume_header = header;
        tracing::debug!(
            "Opened volume {} for file {} (files {} to {})",
            volume,
            self.index,
            header.first_file_index(),
            header.last_file_index()
        );

        if self.set.major_version() <= 5 {
            self.detect_v5_split();
        }

        let index = self.index as u64;
        let compressed = self.file.is_compressed();
        let (data_offset, volume_bytes) = if self.file.is_split() {
            if index == header.last_file_index as u64
                && header.last_file_offset != consts::NO_LAST_FILE_OFFSET
            {
                let size = if compressed {
                    header.last_file_size_compressed
                } else {
                    header.last_file_size_expanded
                };
                (header.last_file_offset, size)
            } else if index == header.first_file_index as u64 {
                let size = if compressed {
                    header.first_file_size_compressed
                } else {
                    header.first_file_size_expanded
                };
                (header.first_file_offset, size)
            } else {
                tracing::trace!(
                    "Volume {} holds no data for file {}",
                    volume,
                    self.index
                );
                self.volume_bytes_left = 0;
                self.volume_bytes_read = 0;
                self.handle = Some(handle);
                return Ok(());
            }
        } else {
            (self.file.data_offset(), self.file.stored_size())
        };

        handle.seek(SeekFrom::Start(data_offset))?;
        self.volume_bytes_left = volume_bytes;
        self.volume_bytes_read = 0;
        self.handle = Some(handle);
        Ok(())
    }

    /// Version 5 descriptors do not flag split files; a size mismatch with
    /// the volume header's first or last file betrays them.
    fn detect_v5_split(&mut self) {
        let header = &self.volume_header;
        let index = self.index as u64;
        let compressed_size = self.file.compressed_size();
        let is_last = index + 1 < self.set.file_count() as u64
            && index == header.last_file_index as u64
            && header.last_file_size_compressed != compressed_size;
        let is_first = index > 0
            && index == header.first_file_index as u64
            && header.first_file_size_compressed != compressed_size;
        if (is_last || is_first) && !self.file.is_split() {
            tracing::trace!(
                "File {} is split ({} in volume {})",
                self.index,
                if is_last { "last" } else { "first" },
                self.volume
            );
            self.file.mark_split();
        }
    }

    fn unavailable(&self, volume: u32) -> ExtractError {
        let path = match self.set.cabinet_volume(volume) {
            Some(entry) => entry.path().to_path_buf(),
            None => volume_candidates(
                self.set.pattern(),
                volume,
                consts::CABINET_SUFFIX,
            )
            .swap_remove(0),
        };
        ExtractError::VolumeUnavailable { volume, path }
    }
}

impl<'a> Read for VolumeReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_some(buf).map_err(io::Error::from)
    }
}

/// Volume ids of 0 and all-ones mean "the first volume".
fn start_volume(file: &FileDescriptor) -> u32 {
    match file.volume() {
        0 => 1,
        volume if volume == u16::MAX as u32 || volume == u32::MAX => 1,
        volume => volume,
    }
}
