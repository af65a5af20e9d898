//! Operation algebra for concurrent plain-text edits.
//!
//! Two peers editing the same document produce operations against different
//! versions of the text. Before a late operation can be applied it must be
//! rewritten as if the earlier one had already happened:
//!
//! ```text
//!     base ── a            apply(after(b, a), apply(a, base))
//!        \                          ==
//!         b                apply(after(a, b), apply(b, base))
//! ```
//!
//! [`Op::after`] performs that rewrite for every insert/delete pairing, and
//! [`conflicts`] reports when the two operations touch, i.e. when the order
//! of application is observable to the user.
//!
//! All indices are byte offsets into UTF-8 text. Callers are responsible for
//! keeping offsets on character boundaries; the algebra does not validate.

/// A single edit against a known version of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Insert `text` before byte `idx`.
    Insert { idx: usize, text: String },
    /// Delete `nchars` bytes starting at byte `idx`.
    ///
    /// `text` carries the removed bytes when the operation originated
    /// locally and the content was captured at deletion time. Operations
    /// received off the wire, and most outputs of [`Op::after`], leave it
    /// `None`.
    Delete {
        idx: usize,
        nchars: usize,
        text: Option<String>,
    },
}

impl Op {
    /// Build an insert operation.
    pub fn insert(idx: usize, text: impl Into<String>) -> Self {
        Op::Insert {
            idx,
            text: text.into(),
        }
    }

    /// Build a delete operation with no captured text.
    pub fn delete(idx: usize, nchars: usize) -> Self {
        Op::Delete {
            idx,
            nchars,
            text: None,
        }
    }

    /// Byte offset the operation acts at.
    pub fn idx(&self) -> usize {
        match self {
            Op::Insert { idx, .. } | Op::Delete { idx, .. } => *idx,
        }
    }

    /// Apply the operation to `text`, returning the new document.
    pub fn apply(&self, text: &str) -> String {
        match self {
            Op::Insert { idx, text: ins } => {
                let mut out = String::with_capacity(text.len() + ins.len());
                out.push_str(&text[..*idx]);
                out.push_str(ins);
                out.push_str(&text[*idx..]);
                out
            }
            Op::Delete { idx, nchars, .. } => {
                let mut out = String::with_capacity(text.len() - nchars);
                out.push_str(&text[..*idx]);
                out.push_str(&text[idx + nchars..]);
                out
            }
        }
    }

    /// Rewrite this operation so it applies to a document where `other` has
    /// already happened.
    ///
    /// Returns `None` when the rewrite leaves nothing to do: a delete whose
    /// entire range was already removed by `other`.
    pub fn after(&self, other: &Op) -> Option<Op> {
        match (self, other) {
            (Op::Insert { idx, text }, Op::Insert { idx: oidx, text: otext }) => {
                if *oidx > *idx {
                    Some(self.clone())
                } else {
                    // Ties break in favor of the earlier operation: both
                    // inserts land adjacent with `other`'s text first.
                    Some(Op::Insert {
                        idx: idx + otext.len(),
                        text: text.clone(),
                    })
                }
            }
            (Op::Insert { idx, text }, Op::Delete { idx: oidx, nchars, .. }) => {
                if *oidx > *idx {
                    Some(self.clone())
                } else if oidx + nchars < *idx {
                    Some(Op::Insert {
                        idx: idx - nchars,
                        text: text.clone(),
                    })
                } else {
                    // The insertion point fell inside (or on the boundary
                    // of) the deleted range; clamp to the deletion start.
                    Some(Op::Insert {
                        idx: *oidx,
                        text: text.clone(),
                    })
                }
            }
            (Op::Delete { idx, nchars, text }, Op::Insert { idx: oidx, text: otext }) => {
                if *oidx > idx + nchars {
                    Some(self.clone())
                } else if *oidx <= *idx {
                    // Insertion at or before our start shifts us right; an
                    // insert exactly at the left boundary is not captured.
                    Some(Op::Delete {
                        idx: idx + otext.len(),
                        nchars: *nchars,
                        text: text.clone(),
                    })
                } else if *oidx == idx + nchars {
                    // Right boundary: not captured either.
                    Some(self.clone())
                } else {
                    // Strictly inside the range we meant to delete; swallow
                    // the insertion. The captured text no longer matches.
                    Some(Op::Delete {
                        idx: *idx,
                        nchars: nchars + otext.len(),
                        text: None,
                    })
                }
            }
            (
                Op::Delete { idx, nchars, text },
                Op::Delete {
                    idx: oidx,
                    nchars: onchars,
                    ..
                },
            ) => {
                if *oidx >= idx + nchars {
                    Some(self.clone())
                } else if oidx + onchars <= *idx {
                    Some(Op::Delete {
                        idx: idx - onchars,
                        nchars: *nchars,
                        text: text.clone(),
                    })
                } else if *oidx <= *idx && oidx + onchars >= idx + nchars {
                    // Everything we would delete is already gone.
                    None
                } else if *oidx <= *idx {
                    // Overlap on our left flank.
                    let overlap = onchars - (idx - oidx);
                    Some(Op::Delete {
                        idx: *oidx,
                        nchars: nchars - overlap,
                        text: None,
                    })
                } else if oidx + onchars > idx + nchars {
                    // Overlap on our right flank.
                    Some(Op::Delete {
                        idx: *idx,
                        nchars: oidx - idx,
                        text: None,
                    })
                } else {
                    // `other` is contained within our range.
                    Some(Op::Delete {
                        idx: *idx,
                        nchars: nchars - onchars,
                        text: None,
                    })
                }
            }
        }
    }
}

/// Whether applying `a` and `b` in different orders is observable.
///
/// Insert/insert conflict only at the same offset. Delete/delete conflict
/// whenever the ranges touch, endpoints included. Insert/delete conflict
/// when the insertion point lies inside the deleted range, endpoints
/// included.
pub fn conflicts(a: &Op, b: &Op) -> bool {
    match (a, b) {
        (Op::Insert { idx: ia, .. }, Op::Insert { idx: ib, .. }) => ia == ib,
        (
            Op::Delete { idx: ia, nchars: na, .. },
            Op::Delete { idx: ib, nchars: nb, .. },
        ) => {
            let (lo, lo_n, hi) = if ia <= ib { (ia, na, ib) } else { (ib, nb, ia) };
            lo + lo_n >= *hi
        }
        (Op::Insert { idx: i, .. }, Op::Delete { idx: d, nchars: n, .. })
        | (Op::Delete { idx: d, nchars: n, .. }, Op::Insert { idx: i, .. }) => {
            *i >= *d && *i <= d + n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn del(idx: usize, nchars: usize) -> Op {
        Op::delete(idx, nchars)
    }

    fn ins(idx: usize, text: &str) -> Op {
        Op::insert(idx, text)
    }

    #[test]
    fn test_apply_insert() {
        assert_eq!(ins(0, "hello ").apply("world"), "hello world");
        assert_eq!(ins(5, " cruel").apply("hello world"), "hello cruel world");
    }

    #[test]
    fn test_apply_delete() {
        assert_eq!(del(0, 6).apply("hello world"), "world");
        assert_eq!(del(5, 6).apply("hello world"), "hello");
    }

    #[test]
    fn test_apply_length_change() {
        let text = "some document text";
        assert_eq!(ins(4, "abc").apply(text).len(), text.len() + 3);
        assert_eq!(del(4, 3).apply(text).len(), text.len() - 3);
    }

    #[test]
    fn test_insert_after_insert() {
        assert_eq!(ins(5, "abc").after(&ins(6, "xyz")), Some(ins(5, "abc")));
        assert_eq!(ins(5, "abc").after(&ins(5, "xyz")), Some(ins(8, "abc")));
        assert_eq!(ins(5, "abc").after(&ins(4, "xyz")), Some(ins(8, "abc")));
    }

    #[test]
    fn test_insert_after_delete() {
        assert_eq!(ins(5, "abc").after(&del(6, 3)), Some(ins(5, "abc")));
        assert_eq!(ins(5, "abc").after(&del(1, 3)), Some(ins(2, "abc")));
        assert_eq!(ins(5, "abc").after(&del(2, 3)), Some(ins(2, "abc")));
        assert_eq!(ins(5, "abc").after(&del(3, 3)), Some(ins(3, "abc")));
        assert_eq!(ins(5, "abc").after(&del(5, 3)), Some(ins(5, "abc")));
    }

    #[test]
    fn test_delete_after_insert() {
        assert_eq!(del(5, 6).after(&ins(12, "xyz")), Some(del(5, 6)));
        assert_eq!(del(5, 6).after(&ins(4, "xyz")), Some(del(8, 6)));
        assert_eq!(del(5, 6).after(&ins(5, "xyz")), Some(del(8, 6)));
        assert_eq!(del(5, 6).after(&ins(11, "xyz")), Some(del(5, 6)));
        assert_eq!(del(5, 6).after(&ins(7, "xyz")), Some(del(5, 9)));
    }

    #[test]
    fn test_delete_after_delete_disjoint() {
        assert_eq!(del(5, 6).after(&del(12, 3)), Some(del(5, 6)));
        assert_eq!(del(5, 6).after(&del(1, 3)), Some(del(2, 6)));
    }

    #[test]
    fn test_delete_after_delete_other_before() {
        assert_eq!(del(5, 6).after(&del(4, 6)), Some(del(4, 1)));
        assert_eq!(del(5, 6).after(&del(4, 7)), None);
        assert_eq!(del(5, 6).after(&del(4, 8)), None);
    }

    #[test]
    fn test_delete_after_delete_tied() {
        assert_eq!(del(5, 6).after(&del(5, 5)), Some(del(5, 1)));
        assert_eq!(del(5, 6).after(&del(5, 6)), None);
        assert_eq!(del(5, 6).after(&del(5, 7)), None);
    }

    #[test]
    fn test_delete_after_delete_other_after() {
        assert_eq!(del(5, 6).after(&del(6, 4)), Some(del(5, 2)));
        assert_eq!(del(5, 6).after(&del(6, 5)), Some(del(5, 1)));
        assert_eq!(del(5, 6).after(&del(6, 6)), Some(del(5, 1)));
    }

    #[test]
    fn test_delete_keeps_captured_text_on_plain_shift() {
        let d = Op::Delete {
            idx: 5,
            nchars: 2,
            text: Some("ab".into()),
        };
        match d.after(&ins(0, "xy")) {
            Some(Op::Delete { idx: 7, nchars: 2, text: Some(t) }) => assert_eq!(t, "ab"),
            other => panic!("unexpected transform result: {other:?}"),
        }
        // An overlap invalidates the captured text.
        match d.after(&del(4, 3)) {
            Some(Op::Delete { text: None, .. }) => {}
            other => panic!("unexpected transform result: {other:?}"),
        }
    }

    #[test]
    fn test_conflicts_insert_insert() {
        assert!(!conflicts(&ins(5, "abc"), &ins(4, "abc")));
        assert!(!conflicts(&ins(5, "abc"), &ins(6, "abc")));
        assert!(conflicts(&ins(5, "abc"), &ins(5, "abc")));
    }

    #[test]
    fn test_conflicts_insert_delete() {
        assert!(!conflicts(&del(5, 6), &ins(4, "abc")));
        assert!(!conflicts(&del(5, 6), &ins(12, "abc")));
        assert!(conflicts(&del(5, 6), &ins(5, "abc")));
        assert!(conflicts(&del(5, 6), &ins(9, "abc")));
        assert!(conflicts(&del(5, 6), &ins(11, "abc")));
    }

    #[test]
    fn test_conflicts_delete_delete() {
        assert!(!conflicts(&del(5, 6), &del(3, 1)));
        assert!(!conflicts(&del(5, 6), &del(12, 1)));
        assert!(conflicts(&del(5, 6), &del(3, 2)));
        assert!(conflicts(&del(5, 6), &del(3, 7)));
        assert!(conflicts(&del(5, 6), &del(3, 9)));
        assert!(conflicts(&del(5, 6), &del(5, 1)));
        assert!(conflicts(&del(5, 6), &del(5, 6)));
        assert!(conflicts(&del(5, 6), &del(6, 4)));
        assert!(conflicts(&del(5, 6), &del(11, 1)));
    }

    #[test]
    fn test_conflicts_is_symmetric() {
        let ops = [
            ins(0, "q"),
            ins(5, "q"),
            ins(8, "q"),
            del(2, 3),
            del(5, 2),
            del(0, 8),
        ];
        for a in &ops {
            for b in &ops {
                assert_eq!(conflicts(a, b), conflicts(b, a), "{a:?} vs {b:?}");
            }
        }
    }

    /// Non-conflicting operations applied in either order converge; that is
    /// the defining property of the rewrite (and of the conflict predicate:
    /// pairs it flags are exactly those whose order is observable).
    /// Exercised over a grid of operations at varied offsets.
    #[test]
    fn test_transform_convergence() {
        let base = "the quick brown fox jumps";
        let mut ops = Vec::new();
        for idx in [0, 3, 9, 15, 25] {
            ops.push(ins(idx, "XY"));
        }
        for idx in [0, 3, 9, 15] {
            for nchars in [1, 4, 9] {
                if idx + nchars <= base.len() {
                    ops.push(del(idx, nchars));
                }
            }
        }

        for a in &ops {
            for b in &ops {
                if conflicts(a, b) {
                    continue;
                }
                let ab = a.apply(base);
                let ba = b.apply(base);
                let left = match b.after(a) {
                    Some(bp) => bp.apply(&ab),
                    None => ab.clone(),
                };
                let right = match a.after(b) {
                    Some(ap) => ap.apply(&ba),
                    None => ba.clone(),
                };
                assert_eq!(left, right, "diverged for a={a:?} b={b:?}");
            }
        }
    }

    /// Overlapping deletes also converge even though they conflict (the
    /// conflict is about invertibility, not the resulting document).
    #[test]
    fn test_overlapping_deletes_converge() {
        let base = "0123456789";
        let cases = [
            (del(2, 4), del(4, 4)),
            (del(2, 6), del(3, 2)),
            (del(0, 5), del(4, 6)),
            (del(3, 3), del(3, 3)),
        ];
        for (a, b) in &cases {
            let left = match b.after(a) {
                Some(bp) => bp.apply(&a.apply(base)),
                None => a.apply(base),
            };
            let right = match a.after(b) {
                Some(ap) => ap.apply(&b.apply(base)),
                None => b.apply(base),
            };
            assert_eq!(left, right, "diverged for a={a:?} b={b:?}");
        }
    }
}
