//! Directory-backed simplex transport.
//!
//! Models removable media or a shared folder: each outgoing connection becomes
//! one file, and polling picks up whatever files are present. File names carry
//! no contact information; the tag inside is the only way to tell who a
//! connection is from.
//!
//! Files are written under a `.tmp` name and renamed to `.dat` only when the
//! writer is disposed cleanly, so a reader never sees a half-written
//! connection. Names are random, and a rename never replaces an existing
//! connection file, so devices sharing the medium cannot overwrite each
//! other's undelivered connections.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    MAX_FRAME_LENGTH,
    context::{ContactId, TransportId},
    error::TransportError,
    plugin::{SimplexPlugin, TransportConnectionReader, TransportConnectionWriter},
};

const CONNECTION_EXTENSION: &str = "dat";
const PARTIAL_EXTENSION: &str = "tmp";

/// Configuration for [`FilePlugin`].
#[derive(Debug, Clone)]
pub struct FilePluginConfig {
    /// Directory holding connection files
    pub directory: PathBuf,
    /// Bytes each outgoing connection may carry
    pub capacity: u64,
    /// Advertised delivery latency
    pub max_latency: Duration,
    /// Delay between polls
    pub polling_interval: Duration,
}

impl FilePluginConfig {
    /// Defaults for a directory: 1 MiB per connection, one day latency, one
    /// minute polling.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            capacity: 1024 * 1024,
            max_latency: Duration::from_secs(24 * 60 * 60),
            polling_interval: Duration::from_secs(60),
        }
    }
}

/// Simplex plugin storing one connection per file.
#[derive(Debug)]
pub struct FilePlugin {
    id: TransportId,
    config: FilePluginConfig,
    running: AtomicBool,
}

impl FilePlugin {
    /// Identifier of this plugin type.
    pub const ID: &'static str = "murmur.file";

    /// Create a stopped plugin.
    pub fn new(config: FilePluginConfig) -> Self {
        Self {
            id: TransportId::new(Self::ID),
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &FilePluginConfig {
        &self.config
    }

    fn create_partial_file(&self) -> Result<(PathBuf, File), TransportError> {
        loop {
            let name = format!("{}.{PARTIAL_EXTENSION}", random_stem()?);
            let path = self.config.directory.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {},
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl SimplexPlugin for FilePlugin {
    fn id(&self) -> &TransportId {
        &self.id
    }

    fn start(&self) -> Result<(), TransportError> {
        fs::create_dir_all(&self.config.directory)?;
        self.running.store(true, Ordering::SeqCst);
        info!(directory = %self.config.directory.display(), "file transport started");
        Ok(())
    }

    fn stop(&self) -> Result<(), TransportError> {
        self.running.store(false, Ordering::SeqCst);
        info!("file transport stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn should_poll(&self) -> bool {
        true
    }

    fn polling_interval(&self) -> Duration {
        self.config.polling_interval
    }

    fn poll(&self) -> Result<Vec<Box<dyn TransportConnectionReader>>, TransportError> {
        if !self.is_running() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.config.directory)? {
            let path = entry?.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(CONNECTION_EXTENSION)
            {
                paths.push(path);
            }
        }
        paths.sort();

        let mut readers: Vec<Box<dyn TransportConnectionReader>> = Vec::with_capacity(paths.len());
        for path in paths {
            let file = File::open(&path)?;
            readers.push(Box::new(FileReader { path, input: BufReader::new(file) }));
        }

        debug!(count = readers.len(), "polled file transport");
        Ok(readers)
    }

    fn create_reader(
        &self,
        _contact: ContactId,
    ) -> Result<Option<Box<dyn TransportConnectionReader>>, TransportError> {
        // Files are not addressed to contacts; incoming connections come from poll.
        Ok(None)
    }

    fn create_writer(
        &self,
        contact: ContactId,
    ) -> Result<Option<Box<dyn TransportConnectionWriter>>, TransportError> {
        if !self.is_running() {
            return Ok(None);
        }

        let (path, file) = self.create_partial_file()?;
        debug!(%contact, path = %path.display(), "created connection file");

        Ok(Some(Box::new(FileWriter {
            path,
            output: Some(BufWriter::new(file)),
            sink: io::sink(),
            capacity: self.config.capacity,
            max_latency: self.config.max_latency,
        })))
    }
}

struct FileWriter {
    path: PathBuf,
    output: Option<BufWriter<File>>,
    sink: io::Sink,
    capacity: u64,
    max_latency: Duration,
}

impl TransportConnectionWriter for FileWriter {
    fn max_frame_length(&self) -> usize {
        MAX_FRAME_LENGTH
    }

    fn max_latency(&self) -> Duration {
        self.max_latency
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn output(&mut self) -> &mut dyn Write {
        match self.output.as_mut() {
            Some(output) => output as &mut dyn Write,
            None => &mut self.sink,
        }
    }

    fn dispose(&mut self, exception: bool) -> Result<(), TransportError> {
        let Some(mut output) = self.output.take() else {
            return Ok(());
        };

        let flushed = output.flush();
        drop(output);

        if exception || flushed.is_err() {
            remove_quietly(&self.path);
            return flushed.map_err(Into::into);
        }

        // An empty connection carries nothing worth delivering
        if fs::metadata(&self.path)?.len() == 0 {
            remove_quietly(&self.path);
            return Ok(());
        }

        let finished = unused_connection_path(&self.path)?;
        fs::rename(&self.path, &finished)?;
        debug!(path = %finished.display(), "connection file ready");
        Ok(())
    }
}

struct FileReader {
    path: PathBuf,
    input: BufReader<File>,
}

impl TransportConnectionReader for FileReader {
    fn max_frame_length(&self) -> usize {
        MAX_FRAME_LENGTH
    }

    fn input(&mut self) -> &mut dyn Read {
        &mut self.input
    }

    fn dispose(&mut self, exception: bool, recognised: bool) -> Result<(), TransportError> {
        // Unrecognised files may belong to another device sharing the medium
        if !exception && recognised {
            fs::remove_file(&self.path)?;
            debug!(path = %self.path.display(), "consumed connection file");
        }
        Ok(())
    }
}

fn random_stem() -> Result<String, TransportError> {
    let mut bytes = [0u8; 16];
    getrandom::fill(&mut bytes).map_err(|e| TransportError::Io(e.to_string()))?;
    Ok(format!("{:032x}", u128::from_be_bytes(bytes)))
}

/// Connection file name for `partial` that no file in the directory has yet.
fn unused_connection_path(partial: &Path) -> Result<PathBuf, TransportError> {
    let mut finished = partial.with_extension(CONNECTION_EXTENSION);
    while finished.try_exists()? {
        finished.set_file_name(format!("{}.{CONNECTION_EXTENSION}", random_stem()?));
    }
    Ok(finished)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove connection file");
    }
}
