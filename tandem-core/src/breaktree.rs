//! Line-indexed document model backed by a balanced tree.
//!
//! The document is a chain of lines, each ending in `\n`, held twice:
//!
//! ```text
//!            sentinel
//!               │ l
//!           ┌───┴───┐            tree: ordered by document position,
//!           │ line  │            levels balanced Andersson-style
//!        ┌──┴──┐ ┌──┴──┐         (skew = right rotation, split = left
//!        │ line│ │ line│          rotation + promote)
//!        └─────┘ └─────┘
//!
//!    head ⇄ line ⇄ line ⇄ … ⇄ ghost      list: document order
//! ```
//!
//! Every node carries the byte length and node count of its left subtree
//! (`lsum`/`lcount`), so a byte index resolves to a `(line, column)` pair in
//! O(log n), and the linked list makes neighbor access O(1). The two views
//! always agree: the list order equals the in-order tree traversal.
//!
//! The last node is the *ghost* line. Its final `\n` is a terminator that is
//! not part of the document text, which keeps every node's text
//! `\n`-terminated and makes insertion at end-of-document land on a real
//! node like any other. Deletes cannot reach the terminator, so the ghost
//! node is never removed.

use thiserror::Error;

/// Errors from document index arithmetic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocError {
    #[error("byte index {idx} out of range for {len}-byte document")]
    IndexOutOfRange { idx: usize, len: usize },
    #[error("delete of {nchars} bytes at {idx} runs past {len}-byte document")]
    RangeOutOfRange { idx: usize, nchars: usize, len: usize },
    #[error("empty delete at {idx}")]
    EmptyDelete { idx: usize },
}

type NodeId = usize;

const SENTINEL: NodeId = 0;
const NIL: NodeId = usize::MAX;

/// One line of the document plus its tree bookkeeping.
#[derive(Debug)]
struct Line {
    /// Line content, always ending in `\n`.
    text: String,
    level: i32,
    parent: NodeId,
    l: NodeId,
    r: NodeId,
    prev: NodeId,
    next: NodeId,
    /// Total byte length of the left subtree.
    lsum: usize,
    /// Node count of the left subtree.
    lcount: usize,
}

impl Line {
    fn new(text: String, level: i32) -> Self {
        Line {
            text,
            level,
            parent: NIL,
            l: NIL,
            r: NIL,
            prev: NIL,
            next: NIL,
            lsum: 0,
            lcount: 0,
        }
    }
}

/// The balanced line index.
///
/// The tree hangs off the sentinel's left link, so the sentinel's
/// `lsum`/`lcount` are the whole document's byte and line totals.
pub struct BreakTree {
    nodes: Vec<Line>,
    free: Vec<NodeId>,
    head: NodeId,
    ghost: NodeId,
}

impl BreakTree {
    /// An empty document: sentinel plus the ghost line.
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(16);
        // The sentinel's level keeps rebalancing from ever rotating it.
        nodes.push(Line::new(String::new(), i32::MAX));
        nodes.push(Line::new("\n".to_string(), 0));
        nodes[SENTINEL].l = 1;
        nodes[SENTINEL].lsum = 1;
        nodes[SENTINEL].lcount = 1;
        nodes[1].parent = SENTINEL;
        BreakTree {
            nodes,
            free: Vec::new(),
            head: 1,
            ghost: 1,
        }
    }

    /// Build a document from a snapshot.
    pub fn from_text(text: &str) -> Self {
        let mut tree = Self::new();
        if !text.is_empty() {
            tree.insert_text(0, text)
                .expect("index 0 is always in range");
        }
        tree
    }

    /// Document length in bytes (excluding the ghost terminator).
    pub fn len_bytes(&self) -> usize {
        self.nodes[SENTINEL].lsum - 1
    }

    /// Number of lines, ghost included.
    pub fn line_count(&self) -> usize {
        self.nodes[SENTINEL].lcount
    }

    /// The full document text.
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.nodes[SENTINEL].lsum);
        let mut n = self.head;
        while n != NIL {
            out.push_str(&self.nodes[n].text);
            n = self.nodes[n].next;
        }
        out.pop(); // ghost terminator
        out
    }

    /// Text of line `lineno` (ghost included), with its trailing `\n`.
    pub fn line_text(&self, lineno: usize) -> Option<&str> {
        if lineno >= self.line_count() {
            return None;
        }
        let mut node = self.nodes[SENTINEL].l;
        let mut skipped = 0;
        loop {
            let n = &self.nodes[node];
            if lineno < skipped + n.lcount {
                node = n.l;
            } else if lineno == skipped + n.lcount {
                return Some(&n.text);
            } else {
                skipped += n.lcount + 1;
                node = n.r;
            }
        }
    }

    /// Resolve a byte index to `(line, column)`.
    ///
    /// Valid indices are `0 ..= len_bytes()`; the topmost index resolves to
    /// the position just before the ghost terminator, so it addresses
    /// end-of-document for insertion.
    pub fn find(&self, idx: usize) -> Result<(usize, usize), DocError> {
        let (_, line, col) = self.locate(idx)?;
        Ok((line, col))
    }

    fn locate(&self, idx: usize) -> Result<(NodeId, usize, usize), DocError> {
        if idx > self.len_bytes() {
            return Err(DocError::IndexOutOfRange {
                idx,
                len: self.len_bytes(),
            });
        }
        let mut node = self.nodes[SENTINEL].l;
        let mut remaining = idx;
        let mut line = 0;
        loop {
            let n = &self.nodes[node];
            if remaining < n.lsum {
                node = n.l;
            } else if remaining < n.lsum + n.text.len() {
                return Ok((node, line + n.lcount, remaining - n.lsum));
            } else {
                remaining -= n.lsum + n.text.len();
                line += n.lcount + 1;
                node = n.r;
            }
        }
    }

    /// Insert `text` at byte index `idx`. Returns the `(line, column)` of
    /// the insertion point, for translation into an editor buffer call.
    pub fn insert_text(&mut self, idx: usize, text: &str) -> Result<(usize, usize), DocError> {
        let (node, line, col) = self.locate(idx)?;
        if text.is_empty() {
            return Ok((line, col));
        }
        if !text.contains('\n') {
            self.nodes[node].text.insert_str(col, text);
            self.propagate(node, text.len() as isize, 0);
        } else {
            // Split: the prefix and every full segment become new lines in
            // front of the target; the target keeps the tail.
            let prefix = self.nodes[node].text[..col].to_string();
            let suffix = self.nodes[node].text[col..].to_string();
            let mut segments = text.split('\n');
            let first = segments.next().unwrap_or_default();
            let rest: Vec<&str> = segments.collect();
            let (last, middles) = rest.split_last().unwrap_or((&"", &[]));

            self.insert_line(node, format!("{prefix}{first}\n"));
            for middle in middles {
                self.insert_line(node, format!("{middle}\n"));
            }
            let tail = format!("{last}{suffix}");
            let delta = tail.len() as isize - self.nodes[node].text.len() as isize;
            self.nodes[node].text = tail;
            self.propagate(node, delta, 0);
        }
        #[cfg(debug_assertions)]
        self.validate();
        Ok((line, col))
    }

    /// Delete `nchars` bytes at byte index `idx`.
    ///
    /// Returns the removed text and the editor-ready range
    /// `(start_line, start_col, end_line, end_col)`: line indices are
    /// end-inclusive and columns end-exclusive, an end column of zero being
    /// folded back onto the end of the previous line.
    pub fn delete_text(
        &mut self,
        idx: usize,
        nchars: usize,
    ) -> Result<(String, usize, usize, usize, usize), DocError> {
        if nchars == 0 {
            return Err(DocError::EmptyDelete { idx });
        }
        let len = self.len_bytes();
        if idx >= len || idx + nchars > len {
            return Err(DocError::RangeOutOfRange { idx, nchars, len });
        }
        let (snode, sl, sc) = self.locate(idx)?;
        let (enode, el, ec) = self.locate(idx + nchars)?;

        // Editor range, computed against the pre-delete line layout.
        let (rel, rec) = if ec == 0 {
            let prev = self.nodes[enode].prev;
            (el - 1, self.nodes[prev].text.len())
        } else {
            (el, ec)
        };

        let removed;
        if snode == enode {
            removed = self.nodes[snode].text[sc..sc + nchars].to_string();
            self.nodes[snode].text.replace_range(sc..sc + nchars, "");
            self.propagate(snode, -(nchars as isize), 0);
        } else {
            let mut buf = String::with_capacity(nchars);
            buf.push_str(&self.nodes[snode].text[sc..]);
            let mut m = self.nodes[snode].next;
            while m != enode {
                buf.push_str(&self.nodes[m].text);
                m = self.nodes[m].next;
            }
            buf.push_str(&self.nodes[enode].text[..ec]);
            removed = buf;

            // The end node absorbs the start node's prefix, then every
            // wholly-consumed line in front of it is dropped.
            let merged = format!(
                "{}{}",
                &self.nodes[snode].text[..sc],
                &self.nodes[enode].text[ec..]
            );
            let delta = merged.len() as isize - self.nodes[enode].text.len() as isize;
            self.nodes[enode].text = merged;
            self.propagate(enode, delta, 0);
            for _ in 0..(el - sl) {
                let dead = self.nodes[enode].prev;
                self.delete_line(dead);
            }
        }
        #[cfg(debug_assertions)]
        self.validate();
        Ok((removed, sl, sc, rel, rec))
    }

    // ── linked structure maintenance ───────────────────────────────────

    fn alloc(&mut self, text: String) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Line::new(text, 0);
                id
            }
            None => {
                self.nodes.push(Line::new(text, 0));
                self.nodes.len() - 1
            }
        }
    }

    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        if self.nodes[parent].l == old {
            self.nodes[parent].l = new;
        } else {
            debug_assert_eq!(self.nodes[parent].r, old);
            self.nodes[parent].r = new;
        }
    }

    /// Add `dbytes`/`dcount` to the aggregates of every ancestor that holds
    /// `node` in its left subtree.
    fn propagate(&mut self, mut node: NodeId, dbytes: isize, dcount: isize) {
        loop {
            let parent = self.nodes[node].parent;
            if node == SENTINEL || parent == NIL {
                break;
            }
            if self.nodes[parent].l == node {
                let p = &mut self.nodes[parent];
                p.lsum = (p.lsum as isize + dbytes) as usize;
                p.lcount = (p.lcount as isize + dcount) as usize;
            }
            node = parent;
        }
    }

    fn level(&self, node: NodeId) -> i32 {
        if node == NIL {
            -1
        } else {
            self.nodes[node].level
        }
    }

    /// Turn a left-horizontal link into a right-horizontal one. Returns the
    /// node now occupying the argument's position.
    fn skew(&mut self, x: NodeId) -> NodeId {
        let l = self.nodes[x].l;
        if l == NIL || self.nodes[l].level != self.nodes[x].level {
            return x;
        }
        let parent = self.nodes[x].parent;
        let lr = self.nodes[l].r;
        self.nodes[x].l = lr;
        if lr != NIL {
            self.nodes[lr].parent = x;
        }
        self.nodes[l].r = x;
        self.nodes[x].parent = l;
        self.nodes[l].parent = parent;
        self.replace_child(parent, x, l);
        // The demoted node now accounts only for what was l's right subtree.
        self.nodes[x].lsum -= self.nodes[l].lsum + self.nodes[l].text.len();
        self.nodes[x].lcount -= self.nodes[l].lcount + 1;
        l
    }

    /// Break up two consecutive right-horizontal links. Returns the node
    /// now occupying the argument's position.
    fn split(&mut self, x: NodeId) -> NodeId {
        let r = self.nodes[x].r;
        if r == NIL {
            return x;
        }
        if self.level(self.nodes[r].r) != self.nodes[x].level {
            return x;
        }
        let parent = self.nodes[x].parent;
        let rl = self.nodes[r].l;
        self.nodes[x].r = rl;
        if rl != NIL {
            self.nodes[rl].parent = x;
        }
        self.nodes[r].l = x;
        self.nodes[x].parent = r;
        self.nodes[r].parent = parent;
        self.replace_child(parent, x, r);
        self.nodes[r].level += 1;
        self.nodes[r].lsum += self.nodes[x].lsum + self.nodes[x].text.len();
        self.nodes[r].lcount += self.nodes[x].lcount + 1;
        r
    }

    /// Insert a new line immediately before `at`, in both list and tree.
    fn insert_line(&mut self, at: NodeId, text: String) {
        let n = self.alloc(text);

        let prev = self.nodes[at].prev;
        self.nodes[n].prev = prev;
        self.nodes[n].next = at;
        self.nodes[at].prev = n;
        if prev != NIL {
            self.nodes[prev].next = n;
        } else {
            self.head = n;
        }

        // The in-order slot before `at` is the rightmost position of its
        // left subtree.
        if self.nodes[at].l == NIL {
            self.nodes[at].l = n;
            self.nodes[n].parent = at;
        } else {
            let mut m = self.nodes[at].l;
            while self.nodes[m].r != NIL {
                m = self.nodes[m].r;
            }
            self.nodes[m].r = n;
            self.nodes[n].parent = m;
        }

        let nbytes = self.nodes[n].text.len() as isize;
        self.propagate(n, nbytes, 1);

        let mut x = self.nodes[n].parent;
        while x != SENTINEL {
            let top = self.skew(x);
            let top = self.split(top);
            x = self.nodes[top].parent;
        }
    }

    /// Remove line `n` from both list and tree. Never called on the ghost.
    fn delete_line(&mut self, n: NodeId) {
        debug_assert_ne!(n, self.ghost);
        let rebalance_from;
        if self.nodes[n].l == NIL {
            // Leaf (or leaf with a single level-0 right child): splice the
            // child up into our slot.
            let bytes = self.nodes[n].text.len() as isize;
            self.propagate(n, -bytes, -1);
            let parent = self.nodes[n].parent;
            let r = self.nodes[n].r;
            self.replace_child(parent, n, r);
            if r != NIL {
                self.nodes[r].parent = parent;
            }

            let prev = self.nodes[n].prev;
            let next = self.nodes[n].next;
            if prev != NIL {
                self.nodes[prev].next = next;
            } else {
                self.head = next;
            }
            self.nodes[next].prev = prev;

            self.free.push(n);
            rebalance_from = parent;
        } else {
            // Interior node: its in-order predecessor is the list
            // predecessor, a true leaf inside the left subtree. The
            // predecessor's text moves here and the leaf is spliced out.
            let prev = self.nodes[n].prev;
            debug_assert_eq!(self.nodes[prev].l, NIL);
            debug_assert_eq!(self.nodes[prev].r, NIL);
            let old_bytes = self.nodes[n].text.len() as isize;
            self.propagate(n, -old_bytes, -1);

            let prev_text = std::mem::take(&mut self.nodes[prev].text);
            // The predecessor is rightmost in our left subtree, so no
            // aggregate between it and us changes; only ours does.
            self.nodes[n].lsum -= prev_text.len();
            self.nodes[n].lcount -= 1;
            self.nodes[n].text = prev_text;

            let leaf_parent = self.nodes[prev].parent;
            self.replace_child(leaf_parent, prev, NIL);

            let before = self.nodes[prev].prev;
            self.nodes[n].prev = before;
            if before != NIL {
                self.nodes[before].next = n;
            } else {
                self.head = n;
            }

            self.free.push(prev);
            rebalance_from = if leaf_parent == n { n } else { leaf_parent };
        }

        let mut x = rebalance_from;
        while x != SENTINEL {
            let want = self
                .level(self.nodes[x].l)
                .min(self.level(self.nodes[x].r))
                + 1;
            if want < self.nodes[x].level {
                self.nodes[x].level = want;
                let r = self.nodes[x].r;
                if r != NIL && self.nodes[r].level > want {
                    self.nodes[r].level = want;
                }
            }
            let x2 = self.skew(x);
            let r = self.nodes[x2].r;
            if r != NIL {
                let r2 = self.skew(r);
                let rr = self.nodes[r2].r;
                if rr != NIL {
                    self.skew(rr);
                }
            }
            let x3 = self.split(x2);
            let r3 = self.nodes[x3].r;
            if r3 != NIL {
                self.split(r3);
            }
            x = self.nodes[x3].parent;
        }
    }

    // ── structural validation ──────────────────────────────────────────

    /// Panic if any structural invariant is broken. O(n); run from tests
    /// and, on debug builds, after every mutation.
    pub fn validate(&self) {
        let root = self.nodes[SENTINEL].l;
        assert_ne!(root, NIL, "tree lost its ghost line");
        let (bytes, count, leftmost, rightmost) = self.validate_subtree(root, SENTINEL);
        assert_eq!(
            bytes, self.nodes[SENTINEL].lsum,
            "sentinel byte aggregate out of sync"
        );
        assert_eq!(
            count, self.nodes[SENTINEL].lcount,
            "sentinel count aggregate out of sync"
        );
        assert_eq!(leftmost, self.head, "head is not the leftmost node");
        assert_eq!(rightmost, self.ghost, "ghost is not the last node");
        assert_eq!(self.nodes[self.ghost].next, NIL);
        assert!(self.nodes[self.ghost].text.ends_with('\n'));

        // List order equals in-order traversal.
        let mut n = self.head;
        let mut seen = 0;
        let mut prev = NIL;
        while n != NIL {
            assert_eq!(self.nodes[n].prev, prev, "list backlink broken at {n}");
            assert!(
                self.nodes[n].text.ends_with('\n'),
                "line {n} lost its terminator"
            );
            seen += 1;
            prev = n;
            n = self.nodes[n].next;
        }
        assert_eq!(seen, count, "list length disagrees with tree count");
    }

    /// Returns `(bytes, count, leftmost, rightmost)` for the subtree.
    fn validate_subtree(&self, node: NodeId, parent: NodeId) -> (usize, usize, NodeId, NodeId) {
        let n = &self.nodes[node];
        assert_eq!(n.parent, parent, "parent link broken at {node}");
        assert!(n.level >= 0);
        if n.l == NIL || n.r == NIL {
            assert_eq!(n.level, 0, "leaf-ish node {node} above level 0");
        }
        if n.l != NIL {
            assert_eq!(
                self.nodes[n.l].level,
                n.level - 1,
                "left child of {node} not one level down"
            );
        }
        if n.r != NIL {
            let rl = self.nodes[n.r].level;
            assert!(
                rl == n.level || rl == n.level - 1,
                "right child of {node} at level {rl} vs {}",
                n.level
            );
            if rl == n.level {
                let rr = self.nodes[n.r].r;
                assert!(
                    rr == NIL || self.nodes[rr].level < n.level,
                    "right-right chain at level {} under {node}",
                    n.level
                );
            }
        }

        let (lb, lc, lmost) = if n.l != NIL {
            let (b, c, lm, rm) = self.validate_subtree(n.l, node);
            assert_eq!(self.nodes[rm].next, node, "in-order successor broken");
            (b, c, lm)
        } else {
            (0, 0, node)
        };
        assert_eq!(lb, n.lsum, "byte aggregate wrong at {node}");
        assert_eq!(lc, n.lcount, "count aggregate wrong at {node}");

        let (rb, rc, rmost) = if n.r != NIL {
            let (b, c, lm, rm) = self.validate_subtree(n.r, node);
            assert_eq!(self.nodes[lm].prev, node, "in-order predecessor broken");
            (b, c, rm)
        } else {
            (0, 0, node)
        };

        (lb + n.text.len() + rb, lc + 1 + rc, lmost, rmost)
    }
}

impl Default for BreakTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_of(tree: &BreakTree) -> Vec<String> {
        (0..tree.line_count())
            .map(|i| tree.line_text(i).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_empty_document() {
        let tree = BreakTree::new();
        assert_eq!(tree.len_bytes(), 0);
        assert_eq!(tree.line_count(), 1);
        assert_eq!(tree.text(), "");
        assert_eq!(tree.line_text(0), Some("\n"));
        tree.validate();
    }

    #[test]
    fn test_insert_without_newline() {
        let mut tree = BreakTree::new();
        assert_eq!(tree.insert_text(0, "hello").unwrap(), (0, 0));
        assert_eq!(tree.text(), "hello");
        assert_eq!(tree.len_bytes(), 5);
        assert_eq!(tree.line_count(), 1);
        assert_eq!(tree.insert_text(5, " world").unwrap(), (0, 5));
        assert_eq!(tree.text(), "hello world");
    }

    #[test]
    fn test_insert_with_newlines() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "one\ntwo\nthree").unwrap();
        assert_eq!(tree.text(), "one\ntwo\nthree");
        assert_eq!(tree.line_count(), 3);
        assert_eq!(lines_of(&tree), vec!["one\n", "two\n", "three\n"]);
    }

    #[test]
    fn test_insert_trailing_newline_restores_ghost() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "hello world\n").unwrap();
        assert_eq!(tree.text(), "hello world\n");
        assert_eq!(lines_of(&tree), vec!["hello world\n", "\n"]);
    }

    #[test]
    fn test_insert_in_middle_of_line() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "hello world\n").unwrap();
        assert_eq!(tree.insert_text(5, " cruel").unwrap(), (0, 5));
        assert_eq!(tree.text(), "hello cruel world\n");
    }

    #[test]
    fn test_insert_splits_line() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "hello world\n").unwrap();
        tree.insert_text(5, "\ngoodbye").unwrap();
        assert_eq!(tree.text(), "hello\ngoodbye world\n");
        assert_eq!(lines_of(&tree), vec!["hello\n", "goodbye world\n", "\n"]);
    }

    #[test]
    fn test_append_at_end() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "ab\n").unwrap();
        let (line, col) = tree.insert_text(3, "x").unwrap();
        assert_eq!((line, col), (1, 0));
        assert_eq!(tree.text(), "ab\nx");
        // The ghost holds the unterminated tail.
        assert_eq!(lines_of(&tree), vec!["ab\n", "x\n"]);
    }

    #[test]
    fn test_find_positions() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "ab\ncde\nf\n").unwrap();
        assert_eq!(tree.find(0).unwrap(), (0, 0));
        assert_eq!(tree.find(2).unwrap(), (0, 2));
        assert_eq!(tree.find(3).unwrap(), (1, 0));
        assert_eq!(tree.find(6).unwrap(), (1, 3));
        assert_eq!(tree.find(7).unwrap(), (2, 0));
        assert_eq!(tree.find(9).unwrap(), (3, 0)); // end-of-document
        assert_eq!(
            tree.find(10),
            Err(DocError::IndexOutOfRange { idx: 10, len: 9 })
        );
    }

    #[test]
    fn test_delete_within_line() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "hello cruel world\n").unwrap();
        let (removed, sl, sc, el, ec) = tree.delete_text(5, 6).unwrap();
        assert_eq!(removed, " cruel");
        assert_eq!((sl, sc, el, ec), (0, 5, 0, 11));
        assert_eq!(tree.text(), "hello world\n");
    }

    #[test]
    fn test_delete_across_lines() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "one\ntwo\nthree\n").unwrap();
        let (removed, sl, sc, el, ec) = tree.delete_text(2, 7).unwrap();
        assert_eq!(removed, "e\ntwo\nt");
        assert_eq!((sl, sc, el, ec), (0, 2, 2, 1));
        assert_eq!(tree.text(), "onhree\n");
        assert_eq!(lines_of(&tree), vec!["onhree\n", "\n"]);
    }

    #[test]
    fn test_delete_whole_line_folds_end_column() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "ab\ncd\nef\n").unwrap();
        let (removed, sl, sc, el, ec) = tree.delete_text(3, 3).unwrap();
        assert_eq!(removed, "cd\n");
        // End landed on a line boundary, folded back to the end of the
        // deleted line: line 1, column len("cd\n").
        assert_eq!((sl, sc, el, ec), (1, 0, 1, 3));
        assert_eq!(tree.text(), "ab\nef\n");
    }

    #[test]
    fn test_delete_everything() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "one\ntwo\nthree\n").unwrap();
        let (removed, ..) = tree.delete_text(0, 14).unwrap();
        assert_eq!(removed, "one\ntwo\nthree\n");
        assert_eq!(tree.text(), "");
        assert_eq!(tree.line_count(), 1);
    }

    #[test]
    fn test_delete_rejects_bad_ranges() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "abc\n").unwrap();
        assert_eq!(tree.delete_text(0, 0), Err(DocError::EmptyDelete { idx: 0 }));
        assert_eq!(
            tree.delete_text(2, 5),
            Err(DocError::RangeOutOfRange {
                idx: 2,
                nchars: 5,
                len: 4
            })
        );
        // The ghost terminator is out of reach.
        assert_eq!(
            tree.delete_text(4, 1),
            Err(DocError::RangeOutOfRange {
                idx: 4,
                nchars: 1,
                len: 4
            })
        );
    }

    /// The layered insert/delete scenario: build up a document through
    /// mid-line splits, then delete across the seams.
    #[test]
    fn test_layered_edit_scenario() {
        let mut tree = BreakTree::new();
        tree.insert_text(0, "a").unwrap();
        assert_eq!(tree.text(), "a");
        tree.insert_text(1, "\n").unwrap();
        assert_eq!(tree.text(), "a\n");
        tree.insert_text(1, "b\nbb\n").unwrap();
        assert_eq!(tree.text(), "ab\nbb\n\n");
        tree.insert_text(4, "c\nccc\ncc").unwrap();
        assert_eq!(tree.text(), "ab\nbc\nccc\nccb\n\n");

        let (removed, sl, sc, el, ec) = tree.delete_text(4, 5).unwrap();
        assert_eq!(removed, "c\nccc");
        assert_eq!((sl, sc), (1, 1));
        assert_eq!((el, ec), (2, 3));
        assert_eq!(tree.text(), "ab\nb\nccb\n\n");
        assert_eq!(lines_of(&tree), vec!["ab\n", "b\n", "ccb\n", "\n", "\n"]);
    }

    #[test]
    fn test_from_text_round_trip() {
        for text in ["", "x", "x\n", "one\ntwo", "one\ntwo\n", "\n\n\n"] {
            let tree = BreakTree::from_text(text);
            assert_eq!(tree.text(), text, "round trip failed for {text:?}");
            tree.validate();
        }
    }

    #[test]
    fn test_many_lines_stay_balanced() {
        let mut tree = BreakTree::new();
        let mut expect = String::new();
        for i in 0..500 {
            let line = format!("line number {i}\n");
            let at = expect.len();
            tree.insert_text(at, &line).unwrap();
            expect.push_str(&line);
        }
        assert_eq!(tree.text(), expect);
        assert_eq!(tree.line_count(), 501);
        tree.validate();
        // Delete every other line from the middle outward.
        for _ in 0..200 {
            let (line, _) = tree.find(tree.len_bytes() / 2).unwrap();
            let start: usize = (0..line)
                .map(|l| tree.line_text(l).unwrap().len())
                .sum();
            let nchars = tree.line_text(line).unwrap().len();
            if start + nchars <= tree.len_bytes() {
                tree.delete_text(start, nchars).unwrap();
            }
        }
        tree.validate();
    }

    /// Mirror a long pseudo-random edit session against a plain string.
    #[test]
    fn test_shadow_model_fuzz() {
        let mut tree = BreakTree::new();
        let mut shadow = String::new();
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut rng = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        for round in 0..800 {
            let r = rng();
            if shadow.is_empty() || r % 3 != 0 {
                let idx = (r as usize / 7) % (shadow.len() + 1);
                let pick = (r / 11) % 5;
                let text = match pick {
                    0 => "x",
                    1 => "\n",
                    2 => "ab\ncd",
                    3 => "long line of text\n",
                    _ => "\n\n",
                };
                tree.insert_text(idx, text).unwrap();
                shadow.insert_str(idx, text);
            } else {
                let idx = (r as usize / 7) % shadow.len();
                let max = shadow.len() - idx;
                let nchars = 1 + (r as usize / 13) % max.min(9);
                let (removed, ..) = tree.delete_text(idx, nchars).unwrap();
                let expect: String = shadow.drain(idx..idx + nchars).collect();
                assert_eq!(removed, expect, "round {round}");
            }
            assert_eq!(tree.text(), shadow, "round {round}");
            tree.validate();
        }
    }
}
