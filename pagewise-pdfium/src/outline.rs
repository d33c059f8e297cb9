//! Bookmark tree snapshot, walked once per document.
//!
//! pdfium hands out bookmark handles that cannot be compared, so a malformed
//! outline whose `/Next` or `/First` entries loop back is recognised by
//! content instead: an entry is fingerprinted with its own title and
//! destination together with those of its first child and next sibling. A
//! revisited handle reproduces the same fingerprint, and the walk stops there.
//! Runs of entries identical in all of those collapse into the first one.

use std::collections::HashSet;

use pagewise_core::backend::{BookmarkKey, RawBookmark, RawDestination};
use pagewise_core::{MAX_OUTLINE_DEPTH, MAX_OUTLINE_NODES};
use tracing::{debug, warn};

/// One step of a bookmark walk.
pub(crate) trait OutlineCursor: Sized {
    fn entry_title(&self) -> String;
    fn entry_destination(&self) -> Option<RawDestination>;
    fn first_child_entry(&self) -> Option<Self>;
    fn next_sibling_entry(&self) -> Option<Self>;
}

#[derive(Debug)]
struct ArenaEntry {
    bookmark: RawBookmark,
    first_child: Option<usize>,
    next_sibling: Option<usize>,
}

/// Flattened outline; bookmark keys are entry indices.
#[derive(Debug, Default)]
pub(crate) struct OutlineArena {
    entries: Vec<ArenaEntry>,
}

impl OutlineArena {
    pub(crate) fn build<C: OutlineCursor>(root: Option<C>) -> Self {
        let mut builder = ArenaBuilder::default();
        builder.chain(root, 0);
        debug!(entries = builder.entries.len(), "outline snapshot taken");
        Self {
            entries: builder.entries,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn first_child(&self, parent: Option<BookmarkKey>) -> Option<BookmarkKey> {
        match parent {
            None if !self.entries.is_empty() => Some(BookmarkKey(0)),
            None => None,
            Some(key) => self.entry(key)?.first_child.map(key_of),
        }
    }

    pub(crate) fn next_sibling(&self, key: BookmarkKey) -> Option<BookmarkKey> {
        self.entry(key)?.next_sibling.map(key_of)
    }

    pub(crate) fn bookmark(&self, key: BookmarkKey) -> Option<RawBookmark> {
        self.entry(key).map(|entry| entry.bookmark.clone())
    }

    fn entry(&self, key: BookmarkKey) -> Option<&ArenaEntry> {
        usize::try_from(key.0)
            .ok()
            .and_then(|index| self.entries.get(index))
    }
}

fn key_of(index: usize) -> BookmarkKey {
    BookmarkKey(index as u64)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryStamp {
    title: String,
    page: Option<usize>,
    x: Option<u64>,
    y: Option<u64>,
    zoom: Option<u64>,
}

impl EntryStamp {
    fn new(title: String, destination: Option<&RawDestination>) -> Self {
        let bits = |value: Option<f64>| value.map(f64::to_bits);
        Self {
            title,
            page: destination.and_then(|dest| dest.page),
            x: bits(destination.and_then(|dest| dest.x)),
            y: bits(destination.and_then(|dest| dest.y)),
            zoom: bits(destination.and_then(|dest| dest.zoom)),
        }
    }

    fn of<C: OutlineCursor>(cursor: &C) -> Self {
        Self::new(cursor.entry_title(), cursor.entry_destination().as_ref())
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct Fingerprint {
    entry: EntryStamp,
    first_child: Option<EntryStamp>,
    next_sibling: Option<EntryStamp>,
}

#[derive(Default)]
struct ArenaBuilder {
    entries: Vec<ArenaEntry>,
    seen: HashSet<Fingerprint>,
}

impl ArenaBuilder {
    /// Records the sibling chain starting at `head` and returns the index of
    /// its first entry.
    fn chain<C: OutlineCursor>(&mut self, head: Option<C>, depth: usize) -> Option<usize> {
        if depth >= MAX_OUTLINE_DEPTH {
            if head.is_some() {
                warn!(depth, "outline nested too deeply; dropping deeper entries");
            }
            return None;
        }

        let mut first = None;
        let mut previous: Option<usize> = None;
        let mut cursor = head;
        while let Some(current) = cursor {
            if self.entries.len() >= MAX_OUTLINE_NODES {
                warn!(limit = MAX_OUTLINE_NODES, "outline too large; truncating");
                break;
            }
            let bookmark = RawBookmark {
                title: current.entry_title(),
                destination: current.entry_destination(),
            };
            let first_child = current.first_child_entry();
            let next_sibling = current.next_sibling_entry();
            let fingerprint = Fingerprint {
                entry: EntryStamp::new(bookmark.title.clone(), bookmark.destination.as_ref()),
                first_child: first_child.as_ref().map(EntryStamp::of),
                next_sibling: next_sibling.as_ref().map(EntryStamp::of),
            };
            if !self.seen.insert(fingerprint) {
                warn!(title = %bookmark.title, depth, "outline entry repeats; stopping at the cycle");
                break;
            }

            let index = self.entries.len();
            self.entries.push(ArenaEntry {
                bookmark,
                first_child: None,
                next_sibling: None,
            });
            match previous {
                Some(previous) => self.entries[previous].next_sibling = Some(index),
                None => first = Some(index),
            }
            previous = Some(index);

            let child = self.chain(first_child, depth + 1);
            self.entries[index].first_child = child;
            cursor = next_sibling;
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bookmark records linked by index, loops allowed.
    struct Node {
        title: String,
        page: Option<usize>,
        first_child: Option<usize>,
        next_sibling: Option<usize>,
    }

    fn node(title: &str, first_child: Option<usize>, next_sibling: Option<usize>) -> Node {
        Node {
            title: title.to_string(),
            page: None,
            first_child,
            next_sibling,
        }
    }

    #[derive(Clone, Copy)]
    struct Linked<'a> {
        nodes: &'a [Node],
        at: usize,
    }

    impl<'a> Linked<'a> {
        fn root(nodes: &'a [Node]) -> Option<Self> {
            (!nodes.is_empty()).then_some(Self { nodes, at: 0 })
        }

        fn hop(&self, to: Option<usize>) -> Option<Self> {
            to.map(|at| Self {
                nodes: self.nodes,
                at,
            })
        }
    }

    impl OutlineCursor for Linked<'_> {
        fn entry_title(&self) -> String {
            self.nodes[self.at].title.clone()
        }

        fn entry_destination(&self) -> Option<RawDestination> {
            self.nodes[self.at].page.map(RawDestination::page)
        }

        fn first_child_entry(&self) -> Option<Self> {
            self.hop(self.nodes[self.at].first_child)
        }

        fn next_sibling_entry(&self) -> Option<Self> {
            self.hop(self.nodes[self.at].next_sibling)
        }
    }

    fn titles(arena: &OutlineArena, parent: Option<BookmarkKey>) -> Vec<String> {
        let mut titles = Vec::new();
        let mut key = arena.first_child(parent);
        while let Some(current) = key {
            titles.push(arena.bookmark(current).unwrap().title);
            key = arena.next_sibling(current);
        }
        titles
    }

    #[test]
    fn nested_outline_is_navigable_by_key() {
        let nodes = [
            Node {
                page: Some(0),
                ..node("Intro", None, Some(1))
            },
            node("Body", Some(2), Some(4)),
            node("Part A", None, Some(3)),
            node("Part B", None, None),
            node("Index", None, None),
        ];
        let arena = OutlineArena::build(Linked::root(&nodes));

        assert_eq!(arena.len(), 5);
        assert_eq!(titles(&arena, None), ["Intro", "Body", "Index"]);
        let body = arena.next_sibling(BookmarkKey(0)).unwrap();
        assert_eq!(titles(&arena, Some(body)), ["Part A", "Part B"]);
        assert_eq!(
            arena.bookmark(BookmarkKey(0)).unwrap().destination,
            Some(RawDestination::page(0))
        );
        assert_eq!(arena.bookmark(BookmarkKey(99)), None);
    }

    #[test]
    fn sibling_pointing_at_itself_is_recorded_once() {
        let nodes = [node("Loop", None, Some(0))];
        let arena = OutlineArena::build(Linked::root(&nodes));
        assert_eq!(arena.len(), 1);
        assert_eq!(titles(&arena, None), ["Loop"]);
    }

    #[test]
    fn sibling_chain_looping_back_stops_at_the_repeat() {
        let nodes = [node("A", None, Some(1)), node("B", None, Some(0))];
        let arena = OutlineArena::build(Linked::root(&nodes));
        assert_eq!(titles(&arena, None), ["A", "B"]);
    }

    #[test]
    fn child_pointing_at_its_parent_terminates() {
        let nodes = [node("Parent", Some(1), None), node("Child", Some(0), None)];
        let arena = OutlineArena::build(Linked::root(&nodes));

        assert_eq!(arena.len(), 2);
        assert_eq!(titles(&arena, Some(BookmarkKey(0))), ["Child"]);
        assert_eq!(arena.first_child(Some(BookmarkKey(1))), None);
    }

    #[test]
    fn entries_with_the_same_title_are_kept() {
        let notes = |page, next| Node {
            page: Some(page),
            ..node("Notes", None, next)
        };
        let nodes = [notes(0, Some(1)), notes(1, Some(2)), notes(2, None)];
        let arena = OutlineArena::build(Linked::root(&nodes));
        assert_eq!(titles(&arena, None), ["Notes", "Notes", "Notes"]);
    }

    #[test]
    fn long_chains_are_walked_once() {
        let nodes: Vec<Node> = (0..5_000)
            .map(|at| node(&format!("Entry {at}"), None, (at + 1 < 5_000).then_some(at + 1)))
            .collect();
        let arena = OutlineArena::build(Linked::root(&nodes));
        assert_eq!(arena.len(), 5_000);
    }

    #[test]
    fn empty_outline_has_no_first_entry() {
        let arena = OutlineArena::build(Linked::root(&[]));
        assert_eq!(arena.first_child(None), None);
    }
}
