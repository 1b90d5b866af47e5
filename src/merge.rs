//! Stable two-way streaming merge.
//!
//! Merges two key-sorted fallible streams into one. On equal keys the left
//! stream's record is emitted first, then the right stream's, and both
//! streams advance; this is the deterministic tie-break for equal keys
//! originating from different runs.

use std::cmp::Ordering;

use crate::error::Result;

pub(crate) struct MergeIter<K, V, L, R, C>
where
    L: Iterator<Item = Result<(K, V)>>,
    R: Iterator<Item = Result<(K, V)>>,
    C: Fn(&K, &K) -> Ordering,
{
    left: L,
    right: R,
    cmp: C,
    left_head: Option<(K, V)>,
    right_head: Option<(K, V)>,
    // Right record of an equal-key pair, owed to the caller before anything
    // else is compared.
    pending_right: Option<(K, V)>,
    primed: bool,
}

impl<K, V, L, R, C> MergeIter<K, V, L, R, C>
where
    L: Iterator<Item = Result<(K, V)>>,
    R: Iterator<Item = Result<(K, V)>>,
    C: Fn(&K, &K) -> Ordering,
{
    pub(crate) fn new(left: L, right: R, cmp: C) -> Self {
        Self {
            left,
            right,
            cmp,
            left_head: None,
            right_head: None,
            pending_right: None,
            primed: false,
        }
    }
}

impl<K, V, L, R, C> Iterator for MergeIter<K, V, L, R, C>
where
    L: Iterator<Item = Result<(K, V)>>,
    R: Iterator<Item = Result<(K, V)>>,
    C: Fn(&K, &K) -> Ordering,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.pending_right.take() {
            return Some(Ok(record));
        }

        if !self.primed {
            self.primed = true;
            match self.left.next().transpose() {
                Ok(head) => self.left_head = head,
                Err(e) => return Some(Err(e)),
            }
            match self.right.next().transpose() {
                Ok(head) => self.right_head = head,
                Err(e) => return Some(Err(e)),
            }
        }

        let emitted = match (self.left_head.take(), self.right_head.take()) {
            (None, None) => return None,
            (Some(l), None) => {
                match self.left.next().transpose() {
                    Ok(head) => self.left_head = head,
                    Err(e) => return Some(Err(e)),
                }
                l
            }
            (None, Some(r)) => {
                match self.right.next().transpose() {
                    Ok(head) => self.right_head = head,
                    Err(e) => return Some(Err(e)),
                }
                r
            }
            (Some(l), Some(r)) => match (self.cmp)(&l.0, &r.0) {
                Ordering::Less => {
                    self.right_head = Some(r);
                    match self.left.next().transpose() {
                        Ok(head) => self.left_head = head,
                        Err(e) => return Some(Err(e)),
                    }
                    l
                }
                Ordering::Greater => {
                    self.left_head = Some(l);
                    match self.right.next().transpose() {
                        Ok(head) => self.right_head = head,
                        Err(e) => return Some(Err(e)),
                    }
                    r
                }
                Ordering::Equal => {
                    self.pending_right = Some(r);
                    match self.left.next().transpose() {
                        Ok(head) => self.left_head = head,
                        Err(e) => return Some(Err(e)),
                    }
                    match self.right.next().transpose() {
                        Ok(head) => self.right_head = head,
                        Err(e) => return Some(Err(e)),
                    }
                    l
                }
            },
        };
        Some(Ok(emitted))
    }
}
