use crate::disk::FileHandle;
use crate::PageId;

/// Identifies a frame in the buffer pool.
pub type FrameId = usize;

/// Associative index from `(file, page)` to the frame holding that page.
///
/// Absence is an ordinary outcome, not an error: `lookup` and `remove`
/// return `None` on a miss and callers branch on it.
pub trait PageTable {
    /// Finds the frame holding `page_no` of `file`, if resident.
    fn lookup(&self, file: &FileHandle, page_no: PageId) -> Option<FrameId>;

    /// Adds a mapping. The key must be absent; inserting a duplicate is a
    /// caller bug.
    fn insert(&mut self, file: &FileHandle, page_no: PageId, frame_id: FrameId);

    /// Removes the mapping and returns the frame it pointed to, or `None`
    /// if the key was absent.
    fn remove(&mut self, file: &FileHandle, page_no: PageId) -> Option<FrameId>;

    /// Returns the number of resident mappings.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
struct Entry {
    file: FileHandle,
    page_no: PageId,
    frame_id: FrameId,
}

/// Chained-hashing page table with a bucket count derived from the pool
/// size (1.2 growth factor, rounded to an odd integer, at least 1).
pub struct ChainedPageTable {
    buckets: Vec<Vec<Entry>>,
    len: usize,
}

fn bucket_count(num_frames: usize) -> usize {
    (num_frames + num_frames / 5) | 1
}

impl ChainedPageTable {
    /// Creates a table sized for a pool of `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); bucket_count(num_frames)],
            len: 0,
        }
    }

    fn bucket_of(&self, file: &FileHandle, page_no: PageId) -> usize {
        let mixed = file
            .id()
            .wrapping_mul(0x9e37_79b9)
            .wrapping_add(page_no);
        (mixed % self.buckets.len() as u64) as usize
    }
}

impl PageTable for ChainedPageTable {
    fn lookup(&self, file: &FileHandle, page_no: PageId) -> Option<FrameId> {
        let bucket = self.bucket_of(file, page_no);
        self.buckets[bucket]
            .iter()
            .find(|entry| entry.file == *file && entry.page_no == page_no)
            .map(|entry| entry.frame_id)
    }

    fn insert(&mut self, file: &FileHandle, page_no: PageId, frame_id: FrameId) {
        debug_assert!(
            self.lookup(file, page_no).is_none(),
            "duplicate page table insert for page {} of {}",
            page_no,
            file.filename()
        );
        let bucket = self.bucket_of(file, page_no);
        self.buckets[bucket].push(Entry {
            file: file.clone(),
            page_no,
            frame_id,
        });
        self.len += 1;
    }

    fn remove(&mut self, file: &FileHandle, page_no: PageId) -> Option<FrameId> {
        let bucket = self.bucket_of(file, page_no);
        let position = self.buckets[bucket]
            .iter()
            .position(|entry| entry.file == *file && entry.page_no == page_no)?;
        let entry = self.buckets[bucket].swap_remove(position);
        self.len -= 1;
        Some(entry.frame_id)
    }

    fn len(&self) -> usize {
        self.len
    }
}
