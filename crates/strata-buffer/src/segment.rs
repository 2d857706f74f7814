//! Segment file I/O.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use strata_common::{PageId, Result};

/// Performs page-granular reads and writes against segment files.
///
/// Each 16-bit segment id maps to one file under the data directory, named
/// by the decimal value of the id. Segments are logically sparse: reading a
/// page that was never written yields zeroed bytes, and a write past the
/// current end grows the file.
pub struct SegmentManager {
    data_dir: PathBuf,
    page_size: usize,
    fsync_enabled: bool,
    /// Open file handles keyed by segment id.
    files: Mutex<HashMap<u16, File>>,
}

impl SegmentManager {
    /// Creates a segment manager rooted at the given directory.
    pub fn new(data_dir: impl Into<PathBuf>, page_size: usize, fsync_enabled: bool) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self {
            data_dir,
            page_size,
            fsync_enabled,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the page size this manager reads and writes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn segment_path(&self, segment_id: u16) -> PathBuf {
        self.data_dir.join(segment_id.to_string())
    }

    /// Runs `op` with the open handle for a segment, opening it on first use.
    fn with_segment<R>(&self, segment_id: u16, op: impl FnOnce(&mut File) -> Result<R>) -> Result<R> {
        let mut files = self.files.lock();
        let file = match files.entry(segment_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(self.segment_path(segment_id))?;
                entry.insert(file)
            }
        };
        op(file)
    }

    /// Reads one page into `buf`.
    ///
    /// Bytes past the current end of the segment file read as zero.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        let offset = page_id.segment_page_id() * self.page_size as u64;

        self.with_segment(page_id.segment_id(), |file| {
            let file_len = file.metadata()?.len();
            if offset >= file_len {
                buf.fill(0);
                return Ok(());
            }

            let available = ((file_len - offset) as usize).min(buf.len());
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf[..available])?;
            buf[available..].fill(0);
            Ok(())
        })
    }

    /// Writes one page from `buf`, growing the segment file as needed.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size);
        let offset = page_id.segment_page_id() * self.page_size as u64;

        self.with_segment(page_id.segment_id(), |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)?;
            if self.fsync_enabled {
                file.sync_all()?;
            }
            Ok(())
        })
    }
}
