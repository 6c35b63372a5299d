use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, trace};
use thiserror::Error;

use crate::disk::FileHandle;
use crate::frame::FrameDesc;
use crate::page::Page;
use crate::page_table::{ChainedPageTable, FrameId, PageTable};
use crate::{PageId, INVALID_PAGE_ID};

/// Pool size used when the caller has no opinion.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Errors returned by the buffer pool manager.
#[derive(Debug, Error)]
pub enum BufferPoolError {
    /// Every frame is pinned; nothing can be evicted.
    #[error("all {0} buffer frames are pinned")]
    BufferExceeded(usize),
    /// An unpin was requested for a page with no outstanding pins.
    #[error("page {page_no} of file {file} (frame {frame_no}) is not pinned")]
    PageNotPinned {
        file: String,
        page_no: PageId,
        frame_no: FrameId,
    },
    /// A file flush found one of the file's pages still pinned.
    #[error("page {page_no} of file {file} (frame {frame_no}) is still pinned")]
    PagePinned {
        file: String,
        page_no: PageId,
        frame_no: FrameId,
    },
    /// A valid frame carries the reserved page id; the frame table is corrupt.
    #[error("bad buffer frame {frame_no} (dirty: {dirty}, valid: {valid}, ref_bit: {ref_bit})")]
    BadBuffer {
        frame_no: FrameId,
        dirty: bool,
        valid: bool,
        ref_bit: bool,
    },
    /// The buffer pool lock was poisoned.
    #[error("buffer pool lock poisoned")]
    LockPoisoned,
    /// The underlying file store failed.
    #[error("disk i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for buffer pool results.
pub type BufferPoolResult<T> = Result<T, BufferPoolError>;

/// Guard that provides access to a pinned page while holding the pool lock.
///
/// The guard is the borrowed page reference: it is valid until dropped, and
/// no other pool operation can run while it is alive. Dropping it releases
/// the borrow only; the pin stays until [`BufferPoolManager::unpin_page`].
pub struct PageGuard<'a> {
    state: MutexGuard<'a, BufferPoolState>,
    frame_id: FrameId,
}

impl<'a> PageGuard<'a> {
    /// Returns the frame id backing this guard.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

impl Deref for PageGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        &self.state.pool[self.frame_id]
    }
}

impl DerefMut for PageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state.pool[self.frame_id]
    }
}

struct BufferPoolState {
    descriptors: Vec<FrameDesc>,
    pool: Vec<Page>,
    page_table: Box<dyn PageTable + Send>,
    clock_hand: usize,
}

#[derive(Default)]
struct BufferPoolMetrics {
    fetch_count: AtomicUsize,
}

/// Buffer pool manager mediating between the in-memory frame cache and the
/// on-disk page files, with clock replacement.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<Mutex<BufferPoolState>>,
    metrics: Arc<BufferPoolMetrics>,
}

impl BufferPoolManager {
    /// Creates a pool with `num_frames` frames and the built-in chained
    /// page table.
    pub fn new(num_frames: usize) -> Self {
        Self::new_with_table(num_frames, Box::new(ChainedPageTable::new(num_frames)))
    }

    /// Creates a pool with an injected page table implementation.
    pub fn new_with_table(num_frames: usize, page_table: Box<dyn PageTable + Send>) -> Self {
        assert!(num_frames > 0, "buffer pool needs at least one frame");
        let descriptors = (0..num_frames).map(FrameDesc::new).collect();
        let pool = vec![Page::default(); num_frames];
        let state = BufferPoolState {
            descriptors,
            pool,
            page_table,
            // first advance lands on frame 0
            clock_hand: num_frames - 1,
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
            metrics: Arc::new(BufferPoolMetrics::default()),
        }
    }

    fn lock_state(&self) -> BufferPoolResult<MutexGuard<'_, BufferPoolState>> {
        self.inner.lock().map_err(|_| BufferPoolError::LockPoisoned)
    }

    /// Returns the number of page fetches since last reset.
    pub fn fetch_count(&self) -> usize {
        self.metrics.fetch_count.load(Ordering::Relaxed)
    }

    /// Resets the fetch counter to zero.
    pub fn reset_fetch_count(&self) {
        self.metrics.fetch_count.store(0, Ordering::Relaxed);
    }

    /// Fetches `page_no` of `file` into the pool, pinning its frame, and
    /// returns a guarded reference to it.
    pub fn read_page(&self, file: &FileHandle, page_no: PageId) -> BufferPoolResult<PageGuard<'_>> {
        self.metrics.fetch_count.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock_state()?;

        if let Some(frame_id) = state.page_table.lookup(file, page_no) {
            let desc = &mut state.descriptors[frame_id];
            desc.ref_bit = true;
            desc.pin_count += 1;
            trace!("hit for page {} of {}", page_no, file.filename());
            return Ok(PageGuard { state, frame_id });
        }

        debug!("miss for page {} of {}", page_no, file.filename());
        let frame_id = Self::alloc_frame(&mut state)?;
        Self::evict_frame(&mut state, frame_id);

        // the frame is empty here, so a failed read leaves the pool coherent
        let page = file.read_page(page_no)?;
        state.pool[frame_id] = page;
        state.page_table.insert(file, page_no, frame_id);
        state.descriptors[frame_id].set(file.clone(), page_no);
        Ok(PageGuard { state, frame_id })
    }

    /// Allocates a fresh page in `file`, pins it into a frame, and returns
    /// its id together with a guarded reference.
    pub fn alloc_page(&self, file: &FileHandle) -> BufferPoolResult<(PageId, PageGuard<'_>)> {
        let mut state = self.lock_state()?;

        let page = file.allocate_page()?;
        let page_no = page.page_number();
        let frame_id = Self::alloc_frame(&mut state)?;
        Self::evict_frame(&mut state, frame_id);

        state.page_table.insert(file, page_no, frame_id);
        state.descriptors[frame_id].set(file.clone(), page_no);
        state.pool[frame_id] = page;
        debug!(
            "allocated page {} of {} into frame {}",
            page_no,
            file.filename(),
            frame_id
        );
        Ok((page_no, PageGuard { state, frame_id }))
    }

    /// Drops one pin on `page_no` of `file`, optionally marking the frame
    /// dirty. A once-dirtied page stays dirty until flushed. Unpinning a
    /// page that is not resident is a silent no-op.
    pub fn unpin_page(
        &self,
        file: &FileHandle,
        page_no: PageId,
        dirty: bool,
    ) -> BufferPoolResult<()> {
        let mut state = self.lock_state()?;
        let frame_id = match state.page_table.lookup(file, page_no) {
            Some(frame_id) => frame_id,
            None => return Ok(()),
        };
        let desc = &mut state.descriptors[frame_id];
        if desc.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned {
                file: file.filename(),
                page_no,
                frame_no: frame_id,
            });
        }
        desc.pin_count -= 1;
        if dirty {
            desc.dirty = true;
        }
        Ok(())
    }

    /// Writes back every dirty page of `file` and drops all of the file's
    /// pages from the pool. Fails before any write if one of the file's
    /// pages is still pinned or a frame is corrupt.
    pub fn flush_file(&self, file: &FileHandle) -> BufferPoolResult<()> {
        let mut state = self.lock_state()?;
        Self::flush_file_locked(&mut state, file)
    }

    /// Drops `page_no` of `file` from the pool if resident, then deletes it
    /// from the file.
    pub fn dispose_page(&self, file: &FileHandle, page_no: PageId) -> BufferPoolResult<()> {
        let mut state = self.lock_state()?;
        if let Some(frame_id) = state.page_table.remove(file, page_no) {
            state.descriptors[frame_id].clear();
            trace!("disposed page {} of {}", page_no, file.filename());
        }
        file.delete_page(page_no)?;
        Ok(())
    }

    /// Prints each frame descriptor and a count of valid frames.
    pub fn print_self(&self) {
        let state = match self.lock_state() {
            Ok(state) => state,
            Err(_) => {
                println!("buffer pool state unavailable (lock poisoned)");
                return;
            }
        };
        let mut valid_frames = 0;
        for desc in &state.descriptors {
            println!("frame {}: {}", desc.frame_no, desc);
            if desc.valid {
                valid_frames += 1;
            }
        }
        println!("total number of valid frames: {}", valid_frames);
    }

    /// Clock replacement. Assumes the eager all-pinned check makes the loop
    /// finite: an unpinned frame exists, its ref_bit is cleared within one
    /// sweep, and it is selected on the next pass at the latest.
    fn alloc_frame(state: &mut BufferPoolState) -> BufferPoolResult<FrameId> {
        if state.descriptors.iter().all(|desc| desc.pin_count >= 1) {
            return Err(BufferPoolError::BufferExceeded(state.descriptors.len()));
        }

        loop {
            state.clock_hand = (state.clock_hand + 1) % state.descriptors.len();
            let hand = state.clock_hand;

            if !state.descriptors[hand].valid {
                return Ok(hand);
            }
            if state.descriptors[hand].ref_bit {
                state.descriptors[hand].ref_bit = false;
                continue;
            }
            if state.descriptors[hand].pin_count >= 1 {
                continue;
            }
            if state.descriptors[hand].dirty {
                // write-back takes the victim's whole file with it
                if let Some(file) = state.descriptors[hand].file.clone() {
                    debug!(
                        "dirty victim in frame {}, flushing file {}",
                        hand,
                        file.filename()
                    );
                    Self::flush_file_locked(state, &file)?;
                }
                return Ok(hand);
            }
            return Ok(hand);
        }
    }

    /// Vacates a previously selected frame: removes its stale mapping (absence
    /// is tolerated, the mapping may already be gone) and clears the
    /// descriptor. No-op on an invalid frame.
    fn evict_frame(state: &mut BufferPoolState, frame_id: FrameId) {
        if !state.descriptors[frame_id].valid {
            return;
        }
        let page_no = state.descriptors[frame_id].page_no;
        if let Some(file) = state.descriptors[frame_id].file.clone() {
            state.page_table.remove(&file, page_no);
            trace!(
                "evicting page {} of {} from frame {}",
                page_no,
                file.filename(),
                frame_id
            );
        }
        state.descriptors[frame_id].clear();
    }

    /// Two-phase file flush over the locked state. Phase 1 validates every
    /// frame of the file, phase 2 writes dirty pages and vacates the frames;
    /// nothing is written when validation fails.
    fn flush_file_locked(state: &mut BufferPoolState, file: &FileHandle) -> BufferPoolResult<()> {
        for desc in &state.descriptors {
            if !desc.belongs_to(file) {
                continue;
            }
            if desc.pin_count >= 1 {
                return Err(BufferPoolError::PagePinned {
                    file: file.filename(),
                    page_no: desc.page_no,
                    frame_no: desc.frame_no,
                });
            }
            if desc.page_no == INVALID_PAGE_ID {
                return Err(BufferPoolError::BadBuffer {
                    frame_no: desc.frame_no,
                    dirty: desc.dirty,
                    valid: desc.valid,
                    ref_bit: desc.ref_bit,
                });
            }
        }

        for frame_id in 0..state.descriptors.len() {
            if !state.descriptors[frame_id].belongs_to(file) {
                continue;
            }
            if state.descriptors[frame_id].dirty {
                file.write_page(&state.pool[frame_id])?;
                state.descriptors[frame_id].dirty = false;
            }
            let page_no = state.descriptors[frame_id].page_no;
            state.page_table.remove(file, page_no);
            state.descriptors[frame_id].clear();
        }
        debug!("flushed file {}", file.filename());
        Ok(())
    }
}

impl Default for BufferPoolManager {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl Drop for BufferPoolState {
    fn drop(&mut self) {
        // write back whatever is still dirty; flushing a file clears all of
        // its frames, so later iterations find them clean already
        for frame_id in 0..self.descriptors.len() {
            if !self.descriptors[frame_id].dirty {
                continue;
            }
            if let Some(file) = self.descriptors[frame_id].file.clone() {
                if let Err(err) = BufferPoolManager::flush_file_locked(self, &file) {
                    error!("teardown flush of {} failed: {}", file.filename(), err);
                }
            }
        }
    }
}
