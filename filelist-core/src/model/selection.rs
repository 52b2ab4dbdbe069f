//! `src/model/selection.rs`
//!
//! Selection state keyed by entry UID, so it survives cache eviction and
//! re-filtering for as long as the entry itself exists.

use bitflags::bitflags;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::model::entry::Uid;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SelectFlags: u8 {
        const HIGHLIGHTED = 1 << 0;
        const SELECTED    = 1 << 1;
        const EDITING     = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOp {
    Remove,
    Add,
    Toggle,
}

/// Which kind of entries an operation is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectCheck {
    Dirs,
    Files,
    #[default]
    All,
}

impl SelectCheck {
    #[must_use]
    pub const fn accepts(self, is_dir: bool) -> bool {
        match self {
            Self::Dirs => is_dir,
            Self::Files => !is_dir,
            Self::All => true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Selection {
    flags: HashMap<Uid, SelectFlags>,
}

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `op` for `flag` on `uid`. Returns the resulting flags.
    pub fn set(
        &mut self,
        uid: Uid,
        is_dir: bool,
        op: SelectOp,
        flag: SelectFlags,
        check: SelectCheck,
    ) -> SelectFlags {
        let current: SelectFlags = self.flags.get(&uid).copied().unwrap_or_default();
        if uid == 0 || !check.accepts(is_dir) {
            return current;
        }

        let next = match op {
            SelectOp::Add => current | flag,
            SelectOp::Remove => current - flag,
            SelectOp::Toggle => current ^ flag,
        };

        if next.is_empty() {
            self.flags.remove(&uid);
        } else {
            self.flags.insert(uid, next);
        }
        next
    }

    #[must_use]
    pub fn get(&self, uid: Uid, is_dir: bool, check: SelectCheck) -> SelectFlags {
        if !check.accepts(is_dir) {
            return SelectFlags::empty();
        }
        self.flags.get(&uid).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn is_selected(&self, uid: Uid, is_dir: bool, flag: SelectFlags, check: SelectCheck) -> bool {
        self.get(uid, is_dir, check).intersects(flag)
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// UIDs carrying any of `flag`.
    pub fn uids_with(&self, flag: SelectFlags) -> impl Iterator<Item = Uid> + '_ {
        self.flags
            .iter()
            .filter(move |(_, flags)| flags.intersects(flag))
            .map(|(uid, _)| *uid)
    }
}
