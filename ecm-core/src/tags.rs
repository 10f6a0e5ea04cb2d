//! Tag Index (Component E): case-sensitive/insensitive substring matcher
//! backing `tag_group` conditions in the Normalization Engine.
//!
//! Per-group, invalidation flips a rebuild on next read under a mutex —
//! the index is lazily rebuilt the first time a group is consulted after
//! any tag/tag-group mutation.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::models::{Tag, TagMatchPosition};

struct GroupIndex {
    /// Lowercased values for case-insensitive tags, original case kept
    /// for case-sensitive ones; each paired with its sensitivity flag.
    entries: Vec<(String, bool)>,
}

struct Inner {
    groups: HashMap<i64, GroupIndex>,
    dirty: std::collections::HashSet<i64>,
}

/// Builds and caches per-group substring matchers. Callers provide the
/// current tag list for a group via `rebuild`; `mark_dirty` flags a
/// group for lazy rebuild without needing the full tag list on hand.
pub struct TagIndex {
    inner: Mutex<Inner>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                groups: HashMap::new(),
                dirty: std::collections::HashSet::new(),
            }),
        }
    }

    /// Replace the index for `group_id` with the given enabled tags.
    pub fn rebuild(&self, group_id: i64, tags: &[Tag]) {
        let entries = tags
            .iter()
            .filter(|t| t.enabled)
            .map(|t| (t.value.clone(), t.case_sensitive))
            .collect();
        let mut inner = self.inner.lock().expect("tag index mutex poisoned");
        inner.groups.insert(group_id, GroupIndex { entries });
        inner.dirty.remove(&group_id);
    }

    /// Flag a group as needing rebuild on next read, without touching the
    /// cached matcher yet (the mutation may have come from an endpoint
    /// that doesn't hold the updated tag list).
    pub fn mark_dirty(&self, group_id: i64) {
        self.inner
            .lock()
            .expect("tag index mutex poisoned")
            .dirty
            .insert(group_id);
    }

    pub fn is_dirty(&self, group_id: i64) -> bool {
        self.inner
            .lock()
            .expect("tag index mutex poisoned")
            .dirty
            .contains(&group_id)
    }

    /// Whether `input` matches any tag in `group_id` at the requested
    /// position. Returns `false` (not an error) if the group has never
    /// been built — callers are expected to `rebuild` first when dirty.
    pub fn matches(&self, group_id: i64, input: &str, position: TagMatchPosition) -> bool {
        let inner = self.inner.lock().expect("tag index mutex poisoned");
        let Some(index) = inner.groups.get(&group_id) else {
            return false;
        };
        index.entries.iter().any(|(value, case_sensitive)| {
            let (haystack, needle): (std::borrow::Cow<str>, std::borrow::Cow<str>) =
                if *case_sensitive {
                    (input.into(), value.as_str().into())
                } else {
                    (input.to_lowercase().into(), value.to_lowercase().into())
                };
            match position {
                TagMatchPosition::Prefix => haystack.starts_with(needle.as_ref()),
                TagMatchPosition::Suffix => haystack.ends_with(needle.as_ref()),
                TagMatchPosition::Contains => haystack.contains(needle.as_ref()),
            }
        })
    }
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new()
    }
}
