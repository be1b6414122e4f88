//! Job target: open, size, fill, close
//!
//! A target is a regular file or a raw block device. Regular files are sized
//! with `stat`; anything else is sized by seeking to its end. A target that
//! is smaller than the requested size is filled with pattern blocks by a
//! small parallel pool before any workload runs, so reads never hit holes.

use crate::error::InitError;
use crate::pattern::{FillPattern, Lcg};
use crate::util::log::LogContext;
use rayon::prelude::*;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Bytes written per fill task
pub const FILL_CHUNK: u64 = 1024 * 1024;

/// Upper bound on fill threads
pub const MAX_FILL_WORKERS: usize = 4;

pub fn default_fill_workers() -> usize {
    num_cpus::get().clamp(1, MAX_FILL_WORKERS)
}

#[derive(Debug)]
pub struct Target {
    path: PathBuf,
    file: Arc<File>,
    /// Size of the target as found at open
    found_size: u64,
    /// Extent the workload addresses
    size: u64,
    created: bool,
    filled: bool,
}

impl Target {
    /// Open `path`, creating it if absent, and determine the working extent
    ///
    /// `requested == 0` means "use the existing size", which then must be
    /// non-zero.
    pub fn open(path: &Path, requested: u64) -> Result<Self, InitError> {
        let open_err = |source| InitError::Open {
            path: path.to_path_buf(),
            source,
        };

        let (mut file, created) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => (f, false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let f = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(path)
                    .map_err(open_err)?;
                (f, true)
            }
            Err(e) => return Err(open_err(e)),
        };

        let found_size = detect_size(&mut file).map_err(open_err)?;
        let size = if requested > 0 { requested } else { found_size };

        if size == 0 {
            if created {
                let _ = std::fs::remove_file(path);
            }
            return Err(InitError::UnknownSize(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(file),
            found_size,
            size,
            created,
            filled: false,
        })
    }

    /// True when the target is smaller than the working extent
    pub fn needs_fill(&self) -> bool {
        self.found_size < self.size
    }

    /// Write pattern blocks over `[found_size, size)`, then rewind and flush
    ///
    /// Each 1 MiB chunk is an independent task on a pool of `workers`
    /// threads. `Lcg` content is seeded per chunk so the result does not
    /// depend on scheduling.
    pub fn fill(
        &mut self,
        pattern: FillPattern,
        seed: u64,
        workers: usize,
        log: &LogContext,
    ) -> Result<(), InitError> {
        if !self.needs_fill() {
            return Ok(());
        }
        let fill_err = |source| InitError::Fill {
            path: self.path.clone(),
            source,
        };

        let start = self.found_size;
        let end = self.size;
        let started = Instant::now();
        log.detail(format_args!(
            "filling {} from {} to {} with {} pattern",
            self.path.display(),
            start,
            end,
            pattern
        ));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("fill-{}", i))
            .build()
            .map_err(|e| fill_err(io::Error::new(io::ErrorKind::Other, e)))?;

        let chunks: Vec<u64> = (start..end).step_by(FILL_CHUNK as usize).collect();
        let file = Arc::clone(&self.file);

        pool.install(|| {
            chunks.par_iter().try_for_each(|&offset| {
                let len = (end - offset).min(FILL_CHUNK) as usize;
                let mut lcg = Lcg::new(seed.wrapping_add(offset / FILL_CHUNK));
                let block = pattern.block(len, &mut lcg);
                file.write_all_at(&block, offset)
            })
        })
        .map_err(fill_err)?;

        (&*self.file).seek(SeekFrom::Start(0)).map_err(fill_err)?;
        self.file.sync_all().map_err(fill_err)?;

        self.found_size = end;
        self.filled = true;
        log.detail(format_args!(
            "fill of {} bytes took {:.2}s",
            end - start,
            started.elapsed().as_secs_f64()
        ));
        Ok(())
    }

    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Working extent in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether this job created the target
    pub fn created(&self) -> bool {
        self.created
    }

    /// Whether a fill phase ran
    pub fn filled(&self) -> bool {
        self.filled
    }

    /// Close the handle; remove the file if this job created it
    pub fn close(self) -> io::Result<()> {
        let Target {
            path, file, created, ..
        } = self;
        drop(file);
        if created {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// `stat` for regular files, seek-to-end for devices
fn detect_size(file: &mut File) -> io::Result<u64> {
    let meta = file.metadata()?;
    if meta.is_file() {
        return Ok(meta.len());
    }
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    Ok(size)
}
