//! `src/cache/entry_cache.rs`
//! ============================================================================
//! # Windowed display-entry cache
//!
//! Two tiers over the filtered index:
//! - **block**: ring buffer of `size` (power of two) entries covering the
//!   contiguous range `[block_start, block_end)`, re-centred by
//!   [`EntryCache::cache_block`]. Only the non-overlapping part of the old
//!   range is rebuilt.
//! - **misc**: FIFO of up to `size` entries for isolated lookups outside
//!   the block range.
//!
//! `uids` maps every cached UID to its filtered index, so one UID is never
//! materialised twice. Consumer-thread only.

use std::cmp::{max, min};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitflags::bitflags;
use compact_str::CompactString;
use hashbrown::HashMap;
use tracing::{instrument, trace};

use crate::asset::library::{AssetHandle, AssetRepresentation};
use crate::model::entry::{FileAttributes, InternEntry, TypeFlags, Uid};
use crate::model::id_code::IdCode;
use crate::preview::pipeline::PreviewPipeline;
use crate::preview::thumbnail::PreviewImage;

pub const DEFAULT_CACHE_SIZE: usize = 256;
pub const MAX_CACHE_SIZE: usize = 8192;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u8 {
        const PREVIEW_LOADING       = 1 << 0;
        /// Loading failed; not retried while the entry stays cached.
        const INVALID_PREVIEW       = 1 << 1;
        const NAME_IS_OWNED         = 1 << 2;
        const BLENDERLIB_NO_PREVIEW = 1 << 3;
    }
}

/// Materialised copy of an [`InternEntry`] for display.
#[derive(Debug, Clone)]
pub struct DisplayEntry {
    pub uid: Uid,
    pub relpath: CompactString,
    pub name: CompactString,
    pub typeflag: TypeFlags,
    pub attributes: FileAttributes,
    pub size: u64,
    pub mtime: i64,
    pub id_code: Option<IdCode>,
    pub redirection_path: Option<PathBuf>,
    pub asset: Option<AssetHandle>,
    pub is_main_data: bool,
    pub preview: Option<PreviewImage>,
    pub flags: EntryFlags,
}

impl DisplayEntry {
    #[must_use]
    pub fn from_intern(entry: &InternEntry) -> Self {
        let mut flags = EntryFlags::empty();
        if entry.name_is_owned {
            flags |= EntryFlags::NAME_IS_OWNED;
        }
        if entry.blenderlib_has_no_preview {
            flags |= EntryFlags::BLENDERLIB_NO_PREVIEW;
        }

        Self {
            uid: entry.uid,
            relpath: entry.relpath.clone(),
            name: entry.display_name(),
            typeflag: entry.typeflag,
            attributes: entry.attributes,
            size: entry.stat.size,
            mtime: entry.stat.mtime_secs(),
            id_code: entry.id_code,
            redirection_path: entry.redirection_path.clone(),
            asset: entry.asset.clone(),
            is_main_data: entry.is_main_data(),
            // In-memory data may already carry a finished preview.
            preview: entry
                .local_data
                .as_ref()
                .and_then(|local| local.preview.clone()),
            flags,
        }
    }

    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.typeflag.contains(TypeFlags::DIR)
    }

    #[must_use]
    pub fn asset(&self) -> Option<Arc<AssetRepresentation>> {
        self.asset.as_ref().and_then(AssetHandle::resolve)
    }
}

/// Previews to service while re-centring the block.
#[derive(Debug)]
pub struct PreviewContext<'a> {
    pub pipeline: &'a mut PreviewPipeline,
    pub root: &'a Path,
}

/// Cache size for a visible window: roughly twice the window, a power of
/// two in `[DEFAULT_CACHE_SIZE, MAX_CACHE_SIZE]`.
#[must_use]
pub fn window_cache_size(window_size: usize) -> usize {
    let wanted = window_size.saturating_mul(2);
    let mut size = DEFAULT_CACHE_SIZE;
    while size < wanted && size < MAX_CACHE_SIZE {
        size *= 2;
    }
    size
}

#[derive(Debug)]
pub struct EntryCache {
    size: usize,

    block_entries: Vec<Option<DisplayEntry>>,
    block_start: usize,
    block_end: usize,
    block_cursor: usize,
    block_center: usize,

    misc_entries: HashMap<usize, DisplayEntry>,
    misc_indices: Vec<Option<usize>>,
    misc_cursor: usize,

    uids: HashMap<Uid, usize>,

    /// Display entries built since creation; lets callers observe reuse.
    created: u64,
}

impl Default for EntryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl EntryCache {
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            block_entries: vec![None; size],
            block_start: 0,
            block_end: 0,
            block_cursor: 0,
            block_center: 0,
            misc_entries: HashMap::with_capacity(size),
            misc_indices: vec![None; size],
            misc_cursor: 0,
            uids: HashMap::with_capacity(size * 2),
            created: 0,
        }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn created(&self) -> u64 {
        self.created
    }

    #[must_use]
    pub const fn block_range(&self) -> (usize, usize) {
        (self.block_start, self.block_end)
    }

    /// Number of materialised entries across both tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.uids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Drop everything and resize. Preview state is the caller's business.
    pub fn clear(&mut self, new_size: usize) {
        let created = self.created;
        *self = Self::new(new_size);
        self.created = created;
    }

    const fn block_slot(&self, index: usize) -> usize {
        (index - self.block_start + self.block_cursor) % self.size
    }

    const fn in_block(&self, index: usize) -> bool {
        index >= self.block_start && index < self.block_end
    }

    fn create_entry(&mut self, filtered: &[Arc<InternEntry>], index: usize) -> DisplayEntry {
        self.created += 1;
        DisplayEntry::from_intern(&filtered[index])
    }

    /// Cached entry at `index`, never materialising.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&DisplayEntry> {
        if self.in_block(index) {
            return self.block_entries[self.block_slot(index)].as_ref();
        }
        self.misc_entries.get(&index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DisplayEntry> {
        if self.in_block(index) {
            let slot = self.block_slot(index);
            return self.block_entries[slot].as_mut();
        }
        self.misc_entries.get_mut(&index)
    }

    /// Filtered index of a cached UID.
    #[must_use]
    pub fn index_of_uid(&self, uid: Uid) -> Option<usize> {
        self.uids.get(&uid).copied()
    }

    /// Entry at `index`; when not cached and `materialize` is set, build it
    /// into the misc tier, evicting the oldest misc entry.
    pub fn file_ex(
        &mut self,
        index: usize,
        filtered: &[Arc<InternEntry>],
        materialize: bool,
    ) -> Option<&mut DisplayEntry> {
        if index >= filtered.len() {
            return None;
        }

        if self.in_block(index) || self.misc_entries.contains_key(&index) {
            return self.get_mut(index);
        }

        if !materialize {
            return None;
        }

        let entry = self.create_entry(filtered, index);
        if let Some(old_index) = self.misc_indices[self.misc_cursor] {
            if let Some(old) = self.misc_entries.remove(&old_index) {
                self.uids.remove(&old.uid);
            }
        }
        self.uids.insert(entry.uid, index);
        self.misc_entries.insert(index, entry);
        self.misc_indices[self.misc_cursor] = Some(index);
        self.misc_cursor = (self.misc_cursor + 1) % self.size;

        self.misc_entries.get_mut(&index)
    }

    /// Forget in-flight preview requests after the pipeline was cleared, so
    /// the entries get requested again.
    pub fn reset_preview_loading(&mut self) {
        for entry in self.block_entries.iter_mut().flatten() {
            entry.flags.remove(EntryFlags::PREVIEW_LOADING);
        }
        for entry in self.misc_entries.values_mut() {
            entry.flags.remove(EntryFlags::PREVIEW_LOADING);
        }
    }

    // Low-level ring helpers; they assume `cursor + count <= size`.

    fn block_create(&mut self, filtered: &[Arc<InternEntry>], start_index: usize, count: usize, cursor: usize) {
        for offset in 0..count {
            let index = start_index + offset;
            // Possibly requested earlier through the misc tier.
            let entry = match self.misc_entries.remove(&index) {
                Some(entry) => entry,
                None => {
                    let entry = self.create_entry(filtered, index);
                    self.uids.insert(entry.uid, index);
                    entry
                }
            };
            self.block_entries[cursor + offset] = Some(entry);
        }
    }

    fn block_release(&mut self, count: usize, cursor: usize) {
        for slot in cursor..cursor + count {
            if let Some(entry) = self.block_entries[slot].take() {
                self.uids.remove(&entry.uid);
            }
        }
    }

    /// Release `count` ring slots starting at `cursor`, wrapping at `size`.
    fn block_release_wrapped(&mut self, count: usize, cursor: usize) {
        let mut first = count;
        if cursor + first > self.size {
            let wrapped = cursor + first - self.size;
            first -= wrapped;
            self.block_release(wrapped, 0);
        }
        self.block_release(first, cursor);
    }

    fn clear_previews(&mut self, previews: &mut Option<PreviewContext<'_>>, update_first: bool) {
        if let Some(ctx) = previews.as_mut() {
            if update_first {
                ctx.pipeline.update(self);
            }
            ctx.pipeline.clear();
            self.reset_preview_loading();
        }
    }

    /// Centre the block tier on `index`, rebuilding only what left the
    /// window, then queue previews outward from `index`. `full_refresh`
    /// forces a complete rebuild. Returns `false` for an out-of-range index.
    #[instrument(level = "trace", skip(self, filtered, previews), fields(size = self.size))]
    pub fn cache_block(
        &mut self,
        index: usize,
        filtered: &[Arc<InternEntry>],
        full_refresh: bool,
        mut previews: Option<PreviewContext<'_>>,
    ) -> bool {
        let entries_num = filtered.len();
        if index >= entries_num {
            return false;
        }

        let size = self.size;
        let mut start_index = index.saturating_sub(size / 2);
        let mut end_index = min(entries_num, index + size / 2);

        // Maximise the cached range.
        if end_index - start_index < size {
            if start_index == 0 {
                end_index = min(entries_num, size);
            } else if end_index == entries_num {
                start_index = end_index.saturating_sub(size);
            }
        }

        if full_refresh || start_index != self.block_start || end_index != self.block_end {
            if full_refresh || start_index >= self.block_end || end_index <= self.block_start {
                trace!(start_index, end_index, "Full block recache");
                self.clear_previews(&mut previews, false);

                self.block_release_wrapped(self.block_end - self.block_start, self.block_cursor);
                self.block_start = 0;
                self.block_end = 0;
                self.block_cursor = 0;

                self.block_create(filtered, start_index, end_index - start_index, 0);
                self.block_start = start_index;
                self.block_end = end_index;
            } else {
                trace!(start_index, end_index, "Partial block recache");
                // Keep what finished, then requeue from the new centre below.
                self.clear_previews(&mut previews, true);

                if start_index > self.block_start {
                    let count = start_index - self.block_start;
                    let cursor = self.block_cursor;
                    self.block_release_wrapped(count, cursor);
                    self.block_cursor = (cursor + count) % size;
                    self.block_start = start_index;
                }

                if end_index < self.block_end {
                    let count = self.block_end - end_index;
                    let cursor = (self.block_cursor + end_index - self.block_start) % size;
                    self.block_release_wrapped(count, cursor);
                    self.block_end = end_index;
                }

                if start_index < self.block_start {
                    // New entries go just before the cursor, wrapping backwards.
                    let count = self.block_start - start_index;
                    let cursor = self.block_cursor;
                    let new_cursor = if count > cursor {
                        let tail = count - cursor;
                        self.block_create(filtered, start_index + tail, cursor, 0);
                        self.block_create(filtered, start_index, tail, size - tail);
                        size - tail
                    } else {
                        self.block_create(filtered, start_index, count, cursor - count);
                        cursor - count
                    };
                    self.block_cursor = new_cursor;
                    self.block_start = start_index;
                }

                if end_index > self.block_end {
                    let count = end_index - self.block_end;
                    let slot = (self.block_cursor + self.block_end - self.block_start) % size;
                    if slot + count > size {
                        let head = size - slot;
                        let wrapped = count - head;
                        self.block_create(filtered, end_index - wrapped, wrapped, 0);
                        self.block_create(filtered, self.block_end, head, slot);
                    } else {
                        self.block_create(filtered, self.block_end, count, slot);
                    }
                    self.block_end = end_index;
                }
            }
        } else if self.block_center != index {
            // Visible entries first: restart the preview queue.
            self.clear_previews(&mut previews, true);
        }

        if let Some(ctx) = previews.as_mut() {
            let max_offset = max(end_index - index, index - start_index);
            for offset in 0..=max_offset {
                let candidates = [index.checked_add(offset), index.checked_sub(offset)];
                let count = if offset == 0 { 1 } else { 2 };
                for candidate in candidates.into_iter().take(count).flatten() {
                    if candidate < start_index || candidate >= end_index {
                        continue;
                    }
                    let slot = self.block_slot(candidate);
                    if let Some(entry) = self.block_entries[slot].as_mut() {
                        ctx.pipeline.push(entry, candidate, ctx.root);
                    }
                }
            }
        }

        self.block_center = index;
        true
    }
}
