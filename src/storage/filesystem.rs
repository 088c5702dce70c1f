//! Loose-object store in git's on-disk layout.

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use gix_object::Kind;
use tempfile::NamedTempFile;

use super::traits::{ObjectFilter, ObjectSink, ObjectSource, StoredObject};
use crate::error::PackError;
use crate::object::{object_header, parse_loose, ObjectId};
use crate::pack::{ObjectType, Result};

/// Objects are stored zlib-compressed as `objects/ab/cdef…`, each file
/// holding `"<kind> <size>\0<data>"`.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    base_path: PathBuf,
    compression: Compression,
}

impl FilesystemStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        FilesystemStorage {
            base_path: base_path.as_ref().to_path_buf(),
            compression: Compression::default(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn objects_dir(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        let (dir, file) = hex.split_at(2);
        self.objects_dir().join(dir).join(file)
    }

    /// Create the objects directory.
    pub fn initialize(&self) -> Result<()> {
        fs::create_dir_all(self.objects_dir())?;
        Ok(())
    }

    /// Read and inflate one object, checking it against its id.
    pub fn read(&self, id: &ObjectId) -> Result<(Kind, Vec<u8>)> {
        let path = self.object_path(id);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(PackError::NotFound(*id)),
            Err(e) => return Err(e.into()),
        };

        let mut content = Vec::new();
        ZlibDecoder::new(file).read_to_end(&mut content)?;
        let (kind, data) = parse_loose(&content)?;
        if ObjectId::compute(kind, data) != *id {
            return Err(PackError::CorruptObject {
                offset: 0,
                reason: format!("loose object {} does not hash to its name", path.display()),
            });
        }

        let header_len = content.len() - data.len();
        Ok((kind, content.split_off(header_len)))
    }

    /// Every stored object id, sorted.
    pub fn list_ids(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        let objects_dir = self.objects_dir();
        if !objects_dir.exists() {
            return Ok(ids);
        }

        for dir in fs::read_dir(&objects_dir)? {
            let dir = dir?;
            let prefix = dir.file_name().to_string_lossy().into_owned();
            if prefix.len() != 2 || !dir.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(dir.path())? {
                let name = file?.file_name().to_string_lossy().into_owned();
                match format!("{prefix}{name}").parse::<ObjectId>() {
                    Ok(id) => ids.push(id),
                    Err(_) => tracing::warn!(prefix, name, "skipping stray file in object store"),
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

impl ObjectSource for FilesystemStorage {
    fn object(&self, filter: ObjectFilter, id: &ObjectId) -> Result<StoredObject<'_>> {
        let (kind, data) = self.read(id)?;
        let kind = ObjectType::from(kind);
        if !filter.accepts(kind) {
            return Err(PackError::NotFound(*id));
        }
        Ok(StoredObject {
            kind,
            size: data.len() as u64,
            reader: Box::new(Cursor::new(data)),
        })
    }

    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.object_path(id).exists())
    }
}

impl ObjectSink for FilesystemStorage {
    fn write_object(&self, id: &ObjectId, kind: Kind, data: &[u8]) -> Result<()> {
        let path = self.object_path(id);
        // Content addressed: an existing file already holds these bytes.
        if path.exists() {
            return Ok(());
        }
        let dir = path.parent().unwrap_or(&self.base_path);
        fs::create_dir_all(dir)?;

        let temp = NamedTempFile::new_in(dir)?;
        let mut encoder = ZlibEncoder::new(temp, self.compression);
        encoder.write_all(&object_header(kind, data.len() as u64))?;
        encoder.write_all(data)?;
        let temp = encoder.finish()?;
        temp.persist(&path).map_err(|e| e.error)?;

        tracing::trace!(%id, path = %path.display(), "wrote loose object");
        Ok(())
    }
}
