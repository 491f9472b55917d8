use std::cmp;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::cancel::CancellationToken;
use crate::checksum::{hex_matches, to_hex, Checksum};
use crate::consts;
use crate::error::{ExtractError, Result};
use crate::inflate::{read_chunk, ChunkDecompressor, InflateMode};
use crate::reader::VolumeReader;
use crate::volume::VolumeSet;

/// Settings for extracting files from a [`VolumeSet`].
#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    verbose: bool,
    inflate_mode: InflateMode,
    junk_paths: bool,
    lowercase: bool,
    file_group: Option<String>,
    cancel: CancellationToken,
}

impl ExtractOptions {
    /// Returns the default options: quiet, single-call inflate, full paths.
    pub fn new() -> ExtractOptions {
        ExtractOptions::default()
    }

    /// Returns true if per-file problems are reported at `warn` level.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Sets whether per-file problems are reported at `warn` level rather
    /// than `debug`.  This never changes what gets extracted.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Returns how compressed chunks are inflated.
    pub fn inflate_mode(&self) -> InflateMode {
        self.inflate_mode
    }

    /// Sets how compressed chunks are inflated.
    pub fn set_inflate_mode(&mut self, mode: InflateMode) {
        self.inflate_mode = mode;
    }

    /// Returns true if directory names are dropped from output paths.
    pub fn junk_paths(&self) -> bool {
        self.junk_paths
    }

    /// Sets whether directory names are dropped from output paths.
    pub fn set_junk_paths(&mut self, junk_paths: bool) {
        self.junk_paths = junk_paths;
    }

    /// Returns true if output paths are lowercased.
    pub fn lowercase(&self) -> bool {
        self.lowercase
    }

    /// Sets whether output paths are lowercased.
    pub fn set_lowercase(&mut self, lowercase: bool) {
        self.lowercase = lowercase;
    }

    /// Returns the file group that `extract_all` is restricted to, if any.
    pub fn file_group(&self) -> Option<&str> {
        self.file_group.as_deref()
    }

    /// Restricts `extract_all` to the files of one file group.
    pub fn set_file_group<S: Into<String>>(&mut self, name: Option<S>) {
        self.file_group = name.map(Into::into);
    }

    /// Returns the token checked between chunks and at volume hand-off.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sets the token checked between chunks and at volume hand-off.
    pub fn set_cancel_token(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }
}

/// What happened to one file during [`VolumeSet::extract_all`].
#[derive(Debug)]
pub struct FileOutcome {
    index: usize,
    path: PathBuf,
    result: Result<u64>,
}

impl FileOutcome {
    /// Returns the descriptor index of the file.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the path the file was written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of bytes written, or why the file failed.
    pub fn result(&self) -> &Result<u64> {
        &self.result
    }

    /// Returns true if the file was extracted and verified.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-file results of [`VolumeSet::extract_all`].
#[derive(Debug, Default)]
pub struct ExtractReport {
    outcomes: Vec<FileOutcome>,
}

impl ExtractReport {
    /// Returns the outcome of every file that was attempted, in index order.
    pub fn outcomes(&self) -> &[FileOutcome] {
        &self.outcomes
    }

    /// Returns an iterator over the files that failed.
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    /// Returns true if every attempted file succeeded.
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(FileOutcome::is_success)
    }
}

/// Writes a file's bytes to the caller's sink, cut or zero-padded to the
/// declared size, hashing exactly what was written.
struct SizedSink<'w, W: Write> {
    writer: &'w mut W,
    checksum: Checksum,
    expected: u64,
    written: u64,
    produced: u64,
}

impl<'w, W: Write> SizedSink<'w, W> {
    fn new(writer: &'w mut W, expected: u64) -> SizedSink<'w, W> {
        SizedSink {
            writer,
            checksum: Checksum::new(),
            expected,
            written: 0,
            produced: 0,
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.produced += data.len() as u64;
        let room = self.expected - self.written;
        let data = &data[..cmp::min(room, data.len() as u64) as usize];
        self.writer.write_all(data)?;
        self.checksum.update(data);
        self.written += data.len() as u64;
        Ok(())
    }

    /// Pads the output to the declared size.  Returns the hash of the
    /// written bytes and the number of bytes the data actually produced.
    fn finish(mut self) -> io::Result<([u8; 16], u64)> {
        let padding = [0u8; 4096];
        while self.written < self.expected {
            let count =
                cmp::min(self.expected - self.written, padding.len() as u64)
                    as usize;
            self.writer.write_all(&padding[..count])?;
            self.checksum.update(&padding[..count]);
            self.written += count as u64;
        }
        self.writer.flush()?;
        Ok((self.checksum.value(), self.produced))
    }
}

impl VolumeSet {
    /// Extracts file `index` into memory using default options.
    pub fn read_file(&self, index: usize) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.extract_file(index, &mut data, &ExtractOptions::default())?;
        Ok(data)
    }

    /// Extracts file `index` to `writer` and returns the number of bytes
    /// written, which is always the file's expanded size.
    ///
    /// Descriptors that reuse an earlier descriptor's data are followed to
    /// that descriptor.  For major version 6 and later the written bytes are
    /// checked against the stored MD5.
    pub fn extract_file<W: Write>(
        &self,
        index: usize,
        writer: &mut W,
        options: &ExtractOptions,
    ) -> Result<u64> {
        if !self.file_is_valid(index) {
            return Err(ExtractError::InvalidDescriptor(index));
        }
        let data_index = self.resolve_data_index(index)?;
        let fd = match self.file_descriptor(data_index) {
            Some(fd) => fd,
            None => return Err(ExtractError::InvalidDescriptor(data_index)),
        };
        if data_index != index {
            tracing::debug!(
                "File {} reuses the data of file {}",
                index,
                data_index
            );
        }

        let mut reader =
            VolumeReader::open(self, data_index, options.cancel.clone())?;
        let expanded_size = fd.expanded_size();
        let mut sink = SizedSink::new(writer, expanded_size);
        if fd.is_compressed() {
            let mut decompressor =
                ChunkDecompressor::new(options.inflate_mode);
            let mut chunk = Vec::new();
            let mut bytes_left = fd.compressed_size();
            while bytes_left > 0 {
                options.cancel.check()?;
                let used = read_chunk(&mut reader, &mut chunk)?;
                sink.write(decompressor.decompress_chunk(&chunk)?)?;
                bytes_left = bytes_left.saturating_sub(used);
                tracing::trace!(
                    "File {}: chunk of {} bytes, {} left",
                    data_index,
                    used,
                    bytes_left
                );
            }
            if decompressor.tolerated_errors() > 0 {
                diagnose(
                    options,
                    format_args!(
                        "File {}: ignored {} inflate data errors",
                        index,
                        decompressor.tolerated_errors()
                    ),
                );
            }
        } else {
            let mut buffer = vec![0u8; consts::BUFFER_SIZE];
            let mut bytes_left = expanded_size;
            while bytes_left > 0 {
                options.cancel.check()?;
                let count = cmp::min(bytes_left, buffer.len() as u64) as usize;
                reader.read_exact_bytes(&mut buffer[..count])?;
                sink.write(&buffer[..count])?;
                bytes_left -= count as u64;
            }
        }

        let (hash, produced) = sink.finish()?;
        if produced != expanded_size {
            let mismatch = ExtractError::SizeMismatch {
                expected: expanded_size,
                actual: produced,
            };
            diagnose(options, format_args!("File {}: {}", index, mismatch));
        }

        if self.major_version() >= 6 {
            let expected = to_hex(fd.md5());
            let actual = to_hex(&hash);
            if !hex_matches(&expected, &actual) {
                return Err(ExtractError::ChecksumMismatch {
                    index,
                    expected,
                    actual,
                });
            }
        }
        Ok(expanded_size)
    }

    /// Extracts file `index` to a new file at `path`, creating parent
    /// directories as needed.  On a checksum mismatch the file is left in
    /// place; on any other failure the partial file is removed.
    pub fn extract_file_to_path<P: AsRef<Path>>(
        &self,
        index: usize,
        path: P,
        options: &ExtractOptions,
    ) -> Result<u64> {
        let path = path.as_ref();
        if !self.file_is_valid(index) {
            return Err(ExtractError::InvalidDescriptor(index));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        let result = self
            .extract_file(index, &mut writer, options)
            .and_then(|size| writer.flush().map(|()| size).map_err(Into::into));
        drop(writer);
        if let Err(ref error) = result {
            if !matches!(error, ExtractError::ChecksumMismatch { .. }) {
                if let Err(remove_error) = fs::remove_file(path) {
                    tracing::debug!(
                        "Could not remove partial file {}: {}",
                        path.display(),
                        remove_error
                    );
                }
            }
        }
        result
    }

    /// Returns where `extract_all` writes file `index` under `root`, or
    /// `None` if there is no such file.
    pub fn output_path<P: AsRef<Path>>(
        &self,
        index: usize,
        root: P,
        options: &ExtractOptions,
    ) -> Option<PathBuf> {
        let name = self.file_name(index)?;
        let mut path = root.as_ref().to_path_buf();
        if !options.junk_paths {
            if let Some(directory) = self.file_directory(index) {
                for component in sanitized_components(directory) {
                    path.push(adjust_case(component, options));
                }
            }
        }
        let mut name_components = sanitized_components(name);
        let file_name = match name_components.pop() {
            Some(file_name) => file_name,
            None => format!("file{}", index),
        };
        if !options.junk_paths {
            for component in name_components {
                path.push(adjust_case(component, options));
            }
        }
        path.push(adjust_case(file_name, options));
        Some(path)
    }

    /// Extracts every valid file (or, when a file group is set in
    /// `options`, every valid file of that group) under `root`.  Invalid
    /// descriptors are skipped silently.  Every remaining file is attempted
    /// even if earlier ones fail; the report records each outcome.
    pub fn extract_all<P: AsRef<Path>>(
        &self,
        root: P,
        options: &ExtractOptions,
    ) -> Result<ExtractReport> {
        let root = root.as_ref();
        let indices = self.selected_files(options)?;
        let mut report = ExtractReport::default();
        for index in indices {
            if !self.file_is_valid(index) {
                tracing::trace!("Skipping invalid file {}", index);
                continue;
            }
            options.cancel.check()?;
            let path = match self.output_path(index, root, options) {
                Some(path) => path,
                None => continue,
            };
            let result = self.extract_file_to_path(index, &path, options);
            match &result {
                Ok(size) => {
                    tracing::debug!("Extracted {} ({} bytes)", path.display(), size)
                }
                Err(ExtractError::Cancelled) => {
                    return Err(ExtractError::Cancelled)
                }
                Err(error) => diagnose(
                    options,
                    format_args!("Failed to extract {}: {}", path.display(), error),
                ),
            }
            report.outcomes.push(FileOutcome { index, path, result });
        }
        Ok(report)
    }

    /// Returns the file indices `extract_all` walks for these options.
    pub fn selected_files(&self, options: &ExtractOptions) -> Result<Vec<usize>> {
        let count = self.file_count();
        match options.file_group() {
            None => Ok((0..count).collect()),
            Some(name) => match self.find_file_group(name) {
                Some(group) => {
                    let files = group.files();
                    let end = cmp::min(files.end().saturating_add(1), count);
                    Ok((*files.start()..end).collect())
                }
                None => Err(ExtractError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No file group named {:?}", name),
                ))),
            },
        }
    }

    /// Follows link-previous references to the descriptor that holds the
    /// data.  A chain longer than the file table must loop.
    fn resolve_data_index(&self, index: usize) -> Result<usize> {
        let mut current = index;
        for _ in 0..=self.file_count() {
            let fd = match self.file_descriptor(current) {
                Some(fd) => fd,
                None => return Err(ExtractError::InvalidDescriptor(current)),
            };
            if !fd.links_previous() {
                return Ok(current);
            }
            current = fd.link_previous() as usize;
        }
        Err(ExtractError::InvalidDescriptor(index))
    }
}

fn diagnose(options: &ExtractOptions, message: fmt::Arguments) {
    if options.verbose {
        tracing::warn!("{}", message);
    } else {
        tracing::debug!("{}", message);
    }
}

/// Splits a stored name on either separator and makes each piece safe to
/// use as a single path component.
fn sanitized_components(name: &str) -> Vec<String> {
    name.split(|c| c == '\\' || c == '/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .map(|part| {
            part.chars()
                .map(|c| match c {
                    '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
                    c if c.is_control() => '_',
                    c => c,
                })
                .collect()
        })
        .collect()
}

fn adjust_case(component: String, options: &ExtractOptions) -> String {
    if options.lowercase {
        component.to_lowercase()
    } else {
        component
    }
}
