//! `src/listing/glob.rs`
//!
//! Case-insensitive shell-style matching on top of `globset`. Patterns are
//! compiled once per filter change into a [`GlobFilter`]; `*` also matches `/`.

use compact_str::CompactString;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

/// A compiled glob list. Matches when any of its patterns does; an empty
/// filter matches nothing.
#[derive(Debug, Clone)]
pub struct GlobFilter {
    source: CompactString,
    set: GlobSet,
}

impl Default for GlobFilter {
    fn default() -> Self {
        Self {
            source: CompactString::default(),
            set: GlobSet::empty(),
        }
    }
}

impl PartialEq for GlobFilter {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for GlobFilter {}

impl GlobFilter {
    /// `;`-separated list, e.g. `*.png;*.jpg`. Blank items are skipped.
    #[must_use]
    pub fn new(globs: &str) -> Self {
        Self::build(
            globs,
            globs.split(';').map(str::trim).filter(|glob| !glob.is_empty()),
        )
    }

    /// One pattern, taken as a whole (`;` has no special meaning).
    #[must_use]
    pub fn single(pattern: &str) -> Self {
        Self::build(pattern, std::iter::once(pattern).filter(|glob| !glob.is_empty()))
    }

    fn build<'a>(source: &str, patterns: impl Iterator<Item = &'a str>) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if let Some(glob) = compile(pattern) {
                builder.add(glob);
            }
        }

        let set = builder.build().unwrap_or_else(|err| {
            warn!(
                marker = "GLOB_SET_FAILED",
                operation_type = "filter",
                globs = source,
                error = %err,
                "Glob list does not compile, matching nothing"
            );
            GlobSet::empty()
        });

        Self {
            source: source.into(),
            set,
        }
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.set.is_match(text)
    }

    /// No usable pattern.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// The text the filter was built from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn case_insensitive(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).case_insensitive(true).build()
}

/// A pattern globset rejects (an unclosed `[`, say) is matched literally.
fn compile(pattern: &str) -> Option<Glob> {
    match case_insensitive(pattern) {
        Ok(glob) => Some(glob),
        Err(err) => {
            debug!(
                marker = "GLOB_PATTERN_LITERAL",
                operation_type = "filter",
                pattern = pattern,
                error = %err,
                "Matching malformed glob literally"
            );
            case_insensitive(&globset::escape(pattern)).ok()
        }
    }
}

/// Wrap a free-text search in `*` on both ends. Empty stays empty.
#[must_use]
pub fn pad_search(search: &str) -> CompactString {
    let trimmed = search.trim_matches('*');
    if trimmed.is_empty() {
        return CompactString::default();
    }
    let mut padded = CompactString::with_capacity(trimmed.len() + 2);
    padded.push('*');
    padded.push_str(trimmed);
    padded.push('*');
    padded
}

/// The search text without its padding wildcards.
#[must_use]
pub fn strip_search(padded: &str) -> &str {
    padded.trim_matches('*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_basics() {
        assert!(GlobFilter::single("*.PNG").is_match("photo.png"));
        assert!(GlobFilter::single("a?c").is_match("ABC"));
        assert!(GlobFilter::single("*").is_match(""));
        assert!(GlobFilter::single("*cube*").is_match("Object/Cube.001"));
        assert!(!GlobFilter::single("*.png").is_match("photo.png.bak"));
        assert!(!GlobFilter::single("a?c").is_match("ac"));
    }

    #[test]
    fn test_glob_classes() {
        assert!(GlobFilter::single("file[0-9].txt").is_match("file7.txt"));
        assert!(!GlobFilter::single("file[!0-9].txt").is_match("file7.txt"));
        assert!(GlobFilter::single("file[!0-9].txt").is_match("fileA.txt"));
        // Unclosed class falls back to a literal match.
        let literal = GlobFilter::single("x[");
        assert!(!literal.is_empty());
        assert!(literal.is_match("x["));
        assert!(!literal.is_match("xy"));
    }

    #[test]
    fn test_glob_list() {
        let globs = GlobFilter::new("*.png; *.exr;");
        assert!(globs.is_match("render.EXR"));
        assert!(globs.is_match("a.png"));
        assert!(!globs.is_match("render.tif"));
        assert_eq!(globs.as_str(), "*.png; *.exr;");

        let empty = GlobFilter::new("");
        assert!(empty.is_empty());
        assert!(!empty.is_match("render.tif"));
        assert_eq!(empty, GlobFilter::default());
    }

    #[test]
    fn test_single_keeps_semicolons() {
        let search = GlobFilter::single("*a;b*");
        assert!(search.is_match("xa;by"));
        assert!(!search.is_match("a"));
    }

    #[test]
    fn test_pad_search() {
        assert_eq!(pad_search("cube"), "*cube*");
        assert_eq!(pad_search("*cube*"), "*cube*");
        assert_eq!(pad_search(""), "");
        assert_eq!(strip_search("*cube*"), "cube");
    }
}
