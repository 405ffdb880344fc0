//! Lazily-built, disk-backed record caches.
//!
//! Each cache holds a flat sequence of fixed-width little-endian records in a
//! process-local file. The file is written once, on first read, by whichever
//! caller gets there first; afterwards every read is served from disk. A
//! reader-writer lock gives the standard discipline: one builder excludes
//! everyone, any number of readers enumerate concurrently.
//!
//! Builds are staged: records go to `<name>.partial` and the file is renamed
//! into place only after the full sequence has been written, so a failed or
//! interrupted build never leaves a half-written file that looks valid.

use byteorder::{ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub type LE = byteorder::LittleEndian;

/// A fixed-width binary record. All records in one cache must report the
/// same width; the width of the first record written fixes the cache's
/// record size for its lifetime.
pub trait Record: Sized {
    /// Encoded size in bytes.
    fn width(&self) -> usize;
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()>;
    /// Decode one record of `width` bytes.
    fn decode<R: Read>(r: &mut R, width: usize) -> io::Result<Self>;
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache {0} has not been built")]
    NotBuilt(&'static str),
    #[error("cache {name} record width mismatch: expected {expected} bytes, got {actual}")]
    WidthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("cache {name} build failed")]
    Build {
        name: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

struct Backing {
    path: PathBuf,
    built: bool,
    record_width: usize,
    records: u64,
}

/// Single-writer/many-reader disk cache of records of type `T`.
///
/// `read()` holds the shared lock for exactly one enumeration pass; every
/// call starts a fresh pass from the first record. Calling `read()` on a
/// thread that already holds this cache's write lock (i.e. from inside its
/// own generator) deadlocks — the lock is not re-entrant.
pub struct LazyDiskCache<T: Record> {
    name: &'static str,
    state: Arc<RwLock<Backing>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> LazyDiskCache<T> {
    /// A cache backed by `dir/<name>`. Nothing is created on disk until the
    /// first build.
    pub fn new(name: &'static str, dir: &Path) -> Self {
        Self {
            name,
            state: Arc::new(RwLock::new(Backing {
                path: dir.join(name),
                built: false,
                record_width: 0,
                records: 0,
            })),
            _marker: PhantomData,
        }
    }

    pub fn is_built(&self) -> bool {
        self.state.read().built
    }

    /// Build the backing store if it does not exist yet. The generator runs
    /// under the exclusive lock; a build request that arrives while another
    /// is in flight becomes a no-op once the first completes.
    pub fn ensure_built<F, I>(&self, generate: F) -> Result<(), CacheError>
    where
        F: FnOnce() -> anyhow::Result<I>,
        I: IntoIterator<Item = anyhow::Result<T>>,
    {
        if self.state.read().built {
            return Ok(());
        }

        let mut state = self.state.write();
        // Another build may have completed while we waited for the lock.
        if state.built {
            return Ok(());
        }

        let staging = state.path.with_extension("partial");
        match self.write_records(&staging, generate) {
            Ok((record_width, records)) => {
                fs::rename(&staging, &state.path)?;
                state.record_width = record_width;
                state.records = records;
                state.built = true;
                log::debug!(
                    "cache {}: built {} records x {} bytes",
                    self.name,
                    records,
                    record_width
                );
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&staging);
                Err(err)
            }
        }
    }

    fn write_records<F, I>(&self, staging: &Path, generate: F) -> Result<(usize, u64), CacheError>
    where
        F: FnOnce() -> anyhow::Result<I>,
        I: IntoIterator<Item = anyhow::Result<T>>,
    {
        let build_err = |source: anyhow::Error| CacheError::Build {
            name: self.name,
            source: source.into(),
        };

        let mut writer = BufWriter::new(File::create(staging)?);
        let mut record_width = 0usize;
        let mut records = 0u64;

        for item in generate().map_err(build_err)? {
            let record = item.map_err(build_err)?;
            if records == 0 {
                record_width = record.width();
            } else if record.width() != record_width {
                return Err(CacheError::WidthMismatch {
                    name: self.name,
                    expected: record_width,
                    actual: record.width(),
                });
            }
            record.encode(&mut writer)?;
            records += 1;
        }
        writer.flush()?;
        Ok((record_width, records))
    }

    /// Start one enumeration pass over the cache. Fails with `NotBuilt` if no
    /// build has completed yet; see [`read_with`](Self::read_with) for the
    /// build-on-first-read variant.
    pub fn read(&self) -> Result<CacheReader<T>, CacheError> {
        let guard = self.state.read_arc();
        if !guard.built {
            return Err(CacheError::NotBuilt(self.name));
        }
        let file = File::open(&guard.path)?;
        Ok(CacheReader {
            reader: BufReader::new(file),
            remaining: guard.records,
            record_width: guard.record_width,
            _guard: guard,
            _marker: PhantomData,
        })
    }

    /// `ensure_built` followed by `read` — the first-read-triggers-build path.
    pub fn read_with<F, I>(&self, generate: F) -> Result<CacheReader<T>, CacheError>
    where
        F: FnOnce() -> anyhow::Result<I>,
        I: IntoIterator<Item = anyhow::Result<T>>,
    {
        self.ensure_built(generate)?;
        self.read()
    }
}

/// One pass over a built cache. Holds the shared lock until dropped, which
/// happens on normal completion, early termination, or error alike.
pub struct CacheReader<T: Record> {
    reader: BufReader<File>,
    remaining: u64,
    record_width: usize,
    _guard: parking_lot::lock_api::ArcRwLockReadGuard<parking_lot::RawRwLock, Backing>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> CacheReader<T> {
    /// Records left in this pass.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<T: Record> Iterator for CacheReader<T> {
    type Item = Result<T, CacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(T::decode(&mut self.reader, self.record_width).map_err(CacheError::from))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining as usize;
        (n, Some(n))
    }
}

/// A flat row of `f64` values; the record shape shared by spectrum frames
/// and subband series.
pub fn encode_f64_row<W: Write>(values: &[f64], w: &mut W) -> io::Result<()> {
    for &v in values {
        w.write_f64::<LE>(v)?;
    }
    Ok(())
}

pub fn decode_f64_row<R: Read>(r: &mut R, width: usize) -> io::Result<Vec<f64>> {
    let count = width / std::mem::size_of::<f64>();
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(r.read_f64::<LE>()?);
    }
    Ok(values)
}
