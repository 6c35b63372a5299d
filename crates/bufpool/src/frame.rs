use std::fmt;

use crate::disk::FileHandle;
use crate::page_table::FrameId;
use crate::{PageId, INVALID_PAGE_ID};

/// Per-frame bookkeeping record. `file` and `page_no` are meaningful only
/// while `valid` is set.
#[derive(Debug, Clone)]
pub(crate) struct FrameDesc {
    pub(crate) frame_no: FrameId,
    pub(crate) file: Option<FileHandle>,
    pub(crate) page_no: PageId,
    pub(crate) pin_count: u32,
    pub(crate) dirty: bool,
    pub(crate) valid: bool,
    pub(crate) ref_bit: bool,
}

impl FrameDesc {
    pub(crate) fn new(frame_no: FrameId) -> Self {
        Self {
            frame_no,
            file: None,
            page_no: INVALID_PAGE_ID,
            pin_count: 0,
            dirty: false,
            valid: false,
            ref_bit: false,
        }
    }

    /// Marks the frame as freshly populated with `page_no` of `file`,
    /// pinned once and recently used.
    pub(crate) fn set(&mut self, file: FileHandle, page_no: PageId) {
        self.file = Some(file);
        self.page_no = page_no;
        self.pin_count = 1;
        self.dirty = false;
        self.valid = true;
        self.ref_bit = true;
    }

    /// Resets the frame to the unoccupied state.
    pub(crate) fn clear(&mut self) {
        self.file = None;
        self.page_no = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.dirty = false;
        self.valid = false;
        self.ref_bit = false;
    }

    /// True iff the frame currently holds a page of `file`.
    pub(crate) fn belongs_to(&self, file: &FileHandle) -> bool {
        self.valid && self.file.as_ref() == Some(file)
    }
}

impl fmt::Display for FrameDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = match &self.file {
            Some(handle) => handle.filename(),
            None => "-".to_string(),
        };
        write!(
            f,
            "file: {} page: {} pin_count: {} dirty: {} valid: {} ref_bit: {}",
            file, self.page_no, self.pin_count, self.dirty, self.valid, self.ref_bit
        )
    }
}
