//! `src/listing/sort.rs`
//!
//! # Sort engine
//!
//! Every comparator first applies [`compare_generic`] (directories first,
//! then `.` and `..`), which is never inverted. The key-specific comparison
//! and the tiebreak are inverted together when requested. The tiebreak ends
//! on the relative path and then the UID, so the order is total.

use std::cmp::Ordering;
use std::sync::Arc;

use rayon::slice::ParallelSliceMut;
use serde::{Deserialize, Serialize};

use crate::model::entry::{InternEntry, TypeFlags};

const PARALLEL_SORT_THRESHOLD: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
    /// Newest first.
    Date,
    /// Largest first.
    Size,
    Extension,
    AssetCatalog,
}

/// Case-insensitive comparison with digit runs compared by value, so
/// `file2` sorts before `file10`.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let start_a = i;
            let start_b = j;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }

            let digits_a = trim_leading_zeros(&a[start_a..i]);
            let digits_b = trim_leading_zeros(&b[start_b..j]);
            let order = digits_a
                .len()
                .cmp(&digits_b.len())
                .then_with(|| digits_a.cmp(digits_b));
            if order != Ordering::Equal {
                return order;
            }
            continue;
        }

        let order = a[i].to_ascii_lowercase().cmp(&b[j].to_ascii_lowercase());
        if order != Ordering::Equal {
            return order;
        }
        i += 1;
        j += 1;
    }

    (a.len() - i).cmp(&(b.len() - j))
}

fn trim_leading_zeros(digits: &[u8]) -> &[u8] {
    let first = digits.iter().position(|&d| d != b'0').unwrap_or(digits.len());
    &digits[first..]
}

/// Directories before files; among directories plain ones, then blend files,
/// then library groups; then `.` and `..`. Never inverted.
#[must_use]
pub fn compare_generic(a: &InternEntry, b: &InternEntry) -> Ordering {
    match (a.is_dir(), b.is_dir()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (true, true) => {
            let rank = |entry: &InternEntry| -> u8 {
                if entry.typeflag.contains(TypeFlags::BLENDERLIB) {
                    2
                } else if entry.typeflag.intersects(TypeFlags::BLEND_FILES) {
                    1
                } else {
                    0
                }
            };
            let order = rank(a).cmp(&rank(b));
            if order != Ordering::Equal {
                return order;
            }
        }
        (false, false) => {}
    }

    for special in [InternEntry::is_current, InternEntry::is_parent] {
        match (special(a), special(b)) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
    }

    Ordering::Equal
}

/// Natural name order, then in-memory data first (by type code when both
/// are), then path and UID.
#[must_use]
pub fn compare_tiebreaker(a: &InternEntry, b: &InternEntry) -> Ordering {
    natural_cmp(&a.name, &b.name)
        .then_with(|| match (&a.local_data, &b.local_data) {
            (Some(_), Some(_)) => a.id_code.cmp(&b.id_code),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.relpath.cmp(&b.relpath))
        .then_with(|| a.uid.cmp(&b.uid))
}

/// `.blend.gz` counts as one suffix; otherwise everything from the last dot.
fn extension_suffix(relpath: &str) -> &str {
    relpath
        .find(".blend.gz")
        .or_else(|| relpath.rfind('.'))
        .map_or("", |at| &relpath[at..])
}

fn compare_key(a: &InternEntry, b: &InternEntry, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => Ordering::Equal,
        SortKey::Date => b.stat.mtime_secs().cmp(&a.stat.mtime_secs()),
        SortKey::Size => b.stat.size.cmp(&a.stat.size),
        SortKey::Extension => match (a.is_library_item(), b.is_library_item()) {
            (true, true) => a.id_code.map(|c| c.as_u16()).cmp(&b.id_code.map(|c| c.as_u16())),
            _ => {
                let suffix_a = extension_suffix(&a.relpath).to_ascii_lowercase();
                let suffix_b = extension_suffix(&b.relpath).to_ascii_lowercase();
                suffix_a.cmp(&suffix_b)
            }
        },
        SortKey::AssetCatalog => {
            let path = |entry: &InternEntry| {
                entry
                    .asset()
                    .and_then(|asset| asset.catalog_path.clone())
                    .unwrap_or_default()
            };
            path(a).cmp(&path(b))
        }
    }
}

/// Library items before other entries, and their data-blocks before their
/// group directories. Not inverted.
fn compare_extension_groups(a: &InternEntry, b: &InternEntry) -> Ordering {
    match (a.is_library_item(), b.is_library_item()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => a.is_dir().cmp(&b.is_dir()),
        (false, false) => Ordering::Equal,
    }
}

/// Full comparator for `key`.
#[must_use]
pub fn compare(a: &InternEntry, b: &InternEntry, key: SortKey, invert: bool) -> Ordering {
    let generic = compare_generic(a, b);
    if generic != Ordering::Equal {
        return generic;
    }

    if key == SortKey::Extension {
        let groups = compare_extension_groups(a, b);
        if groups != Ordering::Equal {
            return groups;
        }
    }

    let order = compare_key(a, b, key).then_with(|| compare_tiebreaker(a, b));
    if invert { order.reverse() } else { order }
}

/// Sort in place. Large lists are sorted on the rayon pool.
pub fn sort_entries(entries: &mut [Arc<InternEntry>], key: SortKey, invert: bool) {
    if entries.len() >= PARALLEL_SORT_THRESHOLD {
        entries.par_sort_by(|a, b| compare(a, b, key, invert));
    } else {
        entries.sort_by(|a, b| compare(a, b, key, invert));
    }
}
