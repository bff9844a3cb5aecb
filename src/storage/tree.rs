//! # Storage Tree
//!
//! Root of a storage hierarchy plus its persistence.
//!
//! ## Blob Format
//! A saved tree is exactly one frame. The whole encoded root (see
//! [`codec`](crate::storage::codec)) is staged, run once through the tree's
//! formatter and written behind a 4-byte length:
//! ```text
//! [length: u32 LE] [formatter(root children ... End)]
//! ```
//! Members have no formatter of their own.
//!
//! ## Paths
//! A path is a sequence of container keys. `["settings", "video", "width"]`
//! addresses the member `width` inside container `video` inside container
//! `settings`. [`StorageTree::get_dotted`] accepts the same path as one
//! `.`-separated id, which is why keys may not contain dots.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::{StorageConfig, DEFAULT_MAX_DEPTH, MAX_FRAME_SIZE};
use crate::core::formatter::Formatter;
use crate::core::stream::{StreamReader, StreamWriter};
use crate::core::value::Value;
use crate::error::{constants, ProtocolError, Result};
use crate::storage::codec::{decode_container, encode_container};
use crate::storage::member::{Container, Member};
use crate::utils::metrics::Timer;

#[derive(Debug, Clone)]
pub struct StorageTree {
    root: Container,
    formatter: Option<Arc<dyn Formatter>>,
    max_blob_size: Option<usize>,
    max_depth: usize,
}

impl PartialEq for StorageTree {
    /// Trees are equal when their contents are; formatters are not compared.
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Default for StorageTree {
    fn default() -> Self {
        Self {
            root: Container::new(),
            formatter: None,
            max_blob_size: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl StorageTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree using the blob formatter and size limit from `config`.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            root: Container::new(),
            formatter: config.formatter(),
            max_blob_size: Some(config.max_blob_size),
            max_depth: config.max_depth,
        }
    }

    /// Deepest container/list nesting accepted by [`load`](Self::load).
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Formatter applied to whole blobs on save and undone on load.
    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_root(mut self, root: Container) -> Self {
        self.root = root;
        self
    }

    pub fn root(&self) -> &Container {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Container {
        &mut self.root
    }

    pub fn into_root(self) -> Container {
        self.root
    }

    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&Member> {
        let (last, parents) = path.split_last()?;
        let mut container = &self.root;
        for key in parents {
            container = container.get(key.as_ref())?.as_container()?;
        }
        container.get(last.as_ref())
    }

    pub fn get_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut Member> {
        let (last, parents) = path.split_last()?;
        let mut container = &mut self.root;
        for key in parents {
            container = container.get_mut(key.as_ref())?.as_container_mut()?;
        }
        container.get_mut(last.as_ref())
    }

    /// Value of the field at `path`, `None` if absent or not a field.
    pub fn get_value<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        self.get(path)?.as_value()
    }

    /// [`get`](Self::get) with a `.`-separated id such as `"test.BEEF"`.
    pub fn get_dotted(&self, id: &str) -> Option<&Member> {
        let path: Vec<&str> = id.split('.').collect();
        self.get(&path)
    }

    pub fn contains<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.get(path).is_some()
    }

    /// Put `member` at `path`, creating missing containers on the way.
    /// Returns the member it replaced.
    ///
    /// # Errors
    /// `Storage` when the path is empty, a key is invalid, or a non-container
    /// member sits where a container is needed.
    pub fn set<S: AsRef<str>>(&mut self, path: &[S], member: impl Into<Member>) -> Result<Option<Member>> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| ProtocolError::Storage(constants::ERR_EMPTY_PATH.to_string()))?;
        let mut container = &mut self.root;
        for key in parents {
            container = container.child_container(key.as_ref())?;
        }
        container.insert(last.as_ref(), member)
    }

    /// Shorthand for setting a field.
    pub fn set_value<S: AsRef<str>>(&mut self, path: &[S], value: impl Into<Value>) -> Result<Option<Member>> {
        self.set(path, Member::field(value)?)
    }

    pub fn remove<S: AsRef<str>>(&mut self, path: &[S]) -> Option<Member> {
        let (last, parents) = path.split_last()?;
        let mut container = &mut self.root;
        for key in parents {
            container = container.get_mut(key.as_ref())?.as_container_mut()?;
        }
        container.remove(last.as_ref())
    }

    pub fn clear(&mut self) {
        self.root = Container::new();
    }

    /// Write the tree as one frame. Returns the bytes written, length prefix included.
    pub fn save<W: Write>(&self, writer: W) -> Result<usize> {
        let _timer = Timer::start("storage_save");
        let mut stream = StreamWriter::new(writer, false);
        encode_container(&mut stream, &self.root)?;
        let written = stream.flush_frame(self.formatter.as_deref())?;
        debug!(bytes = written, members = self.root.len(), "Storage saved");
        Ok(written)
    }

    /// Replace the contents of this tree with the frame read from `reader`.
    ///
    /// On error the tree is left unchanged.
    pub fn load<R: Read>(&mut self, reader: R) -> Result<()> {
        let _timer = Timer::start("storage_load");
        let mut stream = StreamReader::new(reader, false)
            .with_max_frame_size(self.max_blob_size.unwrap_or(MAX_FRAME_SIZE));
        let len = stream.read_frame(self.formatter.as_deref())?;
        let root = decode_container(&mut stream, self.max_depth)?;
        match stream.remaining() {
            0 => {}
            n => return Err(ProtocolError::TrailingBytes(n)),
        }
        debug!(bytes = len, members = root.len(), "Storage loaded");
        self.root = root;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.save(&mut out)?;
        Ok(out)
    }

    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.load(io::Cursor::new(bytes))
    }

    /// A tree without a formatter, loaded from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut tree = Self::new();
        tree.load_bytes(bytes)?;
        Ok(tree)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let file = File::create(path.as_ref())?;
        let written = self.save(BufWriter::new(file))?;
        debug!(path = %path.as_ref().display(), "Storage file written");
        Ok(written)
    }

    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::open(path.as_ref())?;
        self.load(BufReader::new(file))
    }
}
