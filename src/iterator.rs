use crate::element::{INVALID_INDEX, Index};

/// Walks a singly linked list of corners stored as a `next` array, starting
/// from `first`. The list ends at [`INVALID_INDEX`].
///
/// This is how the corners around a vertex, and around an edge, are
/// traversed. Each step is a single array lookup, and no memory is
/// allocated.
#[derive(Clone)]
pub struct CornerChainIter<'a> {
    next: &'a [Index],
    current: Index,
}

impl<'a> CornerChainIter<'a> {
    pub fn new(next: &'a [Index], first: Index) -> Self {
        CornerChainIter {
            next,
            current: first,
        }
    }
}

impl Iterator for CornerChainIter<'_> {
    type Item = Index;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current {
            INVALID_INDEX => None,
            current => {
                self.current = self
                    .next
                    .get(current as usize)
                    .copied()
                    .unwrap_or(INVALID_INDEX);
                Some(current)
            }
        }
    }
}

/// Iterates the corners of a facet, starting from `start` and wrapping
/// around, so that corner `c` is followed by the next corner of the same
/// facet.
pub(crate) struct FacetCornerIter {
    begin: Index,
    end: Index,
    start: Index,
    current: Option<Index>,
}

impl FacetCornerIter {
    pub fn new(begin: Index, end: Index, start: Index) -> Self {
        debug_assert!(begin <= start && (start < end || begin == end));
        FacetCornerIter {
            begin,
            end,
            start,
            current: if begin < end { Some(start) } else { None },
        }
    }
}

impl Iterator for FacetCornerIter {
    type Item = Index;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current {
            Some(current) => {
                let next = if current + 1 == self.end {
                    self.begin
                } else {
                    current + 1
                };
                self.current = if next == self.start { None } else { Some(next) };
                Some(current)
            }
            None => None,
        }
    }
}

/// The corner after `c` in the facet spanning corners `begin..end`.
pub(crate) fn next_corner_in_facet(begin: Index, end: Index, c: Index) -> Index {
    if c + 1 == end { begin } else { c + 1 }
}

/// The corner before `c` in the facet spanning corners `begin..end`.
pub(crate) fn prev_corner_in_facet(begin: Index, end: Index, c: Index) -> Index {
    if c == begin { end - 1 } else { c - 1 }
}
