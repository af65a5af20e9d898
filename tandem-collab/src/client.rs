//! Client-side sequencing and transform coordination.
//!
//! The client sits between the editor seam and the transport. Local edits
//! become numbered submissions parented on either our own last in-flight
//! edit or the last server-sequenced edit we have seen:
//!
//! ```text
//!   local edit ──► BreakTree ──► Submission { seq, parent } ──► transport
//!
//!   external ──► rewritten through the in-flight queue ──► BreakTree
//!                                                           └► editor range
//! ```
//!
//! External edits arrive in the server's frame; each is rewritten through
//! every in-flight submission while those submissions are rewritten against
//! it, so the next external meets the queue in the right frame. Accepts
//! must match the head of the queue exactly; anything else means the stream
//! is corrupt and the session is over.

use std::collections::VecDeque;

use tandem_core::{BreakTree, DocError, Op};
use thiserror::Error;

use crate::protocol::{Submission, SERVER_AUTHOR};

/// Protocol-invariant violations and document failures. All fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("accept for seq {got} does not match in-flight head {expected}")]
    AcceptMismatch { expected: u64, got: u64 },
    #[error("accept for seq {seq} with nothing in flight")]
    UnexpectedAccept { seq: u64 },
    #[error(transparent)]
    Doc(#[from] DocError),
}

/// A submission awaiting its accept. The op degrades to `None` when an
/// external delete consumed its entire range; the slot still has to wait
/// for its accept.
#[derive(Debug)]
struct InFlight {
    seq: u64,
    op: Option<Op>,
}

/// What the editor must do to mirror an externally-authored edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferEdit {
    Insert {
        line: usize,
        col: usize,
        text: String,
    },
    /// Line indices end-inclusive, columns end-exclusive.
    Delete {
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    },
}

/// Document state plus submission bookkeeping for one session.
pub struct Client {
    author_id: u64,
    seq: u64,
    latest_server_seq: u64,
    inflight: VecDeque<InFlight>,
    tree: BreakTree,
}

impl Client {
    /// Start from a negotiation snapshot.
    pub fn new(author_id: u64, latest_server_seq: u64, text: &str) -> Self {
        Client {
            author_id,
            seq: 0,
            latest_server_seq,
            inflight: VecDeque::new(),
            tree: BreakTree::from_text(text),
        }
    }

    pub fn author_id(&self) -> u64 {
        self.author_id
    }

    pub fn latest_server_seq(&self) -> u64 {
        self.latest_server_seq
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// The document as this client sees it.
    pub fn text(&self) -> String {
        self.tree.text()
    }

    pub fn tree(&self) -> &BreakTree {
        &self.tree
    }

    /// Reseed the document from a fresh snapshot, keeping identity and
    /// sequence state.
    pub fn reseed(&mut self, latest_server_seq: u64, text: &str) {
        self.latest_server_seq = latest_server_seq;
        self.tree = BreakTree::from_text(text);
    }

    /// Ops still awaiting an accept, oldest first.
    pub fn inflight_ops(&self) -> impl Iterator<Item = &Op> {
        self.inflight.iter().filter_map(|inf| inf.op.as_ref())
    }

    /// Re-apply surviving in-flight ops to a reseeded document, oldest
    /// first. Used after a resume: the server snapshot does not include
    /// edits it has not acknowledged, but they are still queued for
    /// retransmission and still part of what the user sees.
    pub fn replay_inflight(&mut self) -> Result<(), ClientError> {
        let ops: Vec<Op> = self.inflight.iter().filter_map(|i| i.op.clone()).collect();
        for op in ops {
            match op {
                Op::Insert { idx, text } => {
                    self.tree.insert_text(idx, &text)?;
                }
                Op::Delete { idx, nchars, .. } => {
                    self.tree.delete_text(idx, nchars)?;
                }
            }
        }
        Ok(())
    }

    /// Record a local insert and build its submission. The returned
    /// [`BufferEdit`] names the same change in editor coordinates, for
    /// callers whose buffer does not already show it.
    pub fn local_insert(
        &mut self,
        idx: usize,
        text: &str,
    ) -> Result<(Submission, BufferEdit), ClientError> {
        let (line, col) = self.tree.insert_text(idx, text)?;
        let edit = BufferEdit::Insert {
            line,
            col,
            text: text.to_string(),
        };
        Ok((self.submit(Op::insert(idx, text)), edit))
    }

    /// Record a local delete; the removed text is captured from the
    /// document model.
    pub fn local_delete(
        &mut self,
        idx: usize,
        nchars: usize,
    ) -> Result<(Submission, BufferEdit), ClientError> {
        let (removed, start_line, start_col, end_line, end_col) =
            self.tree.delete_text(idx, nchars)?;
        let edit = BufferEdit::Delete {
            start_line,
            start_col,
            end_line,
            end_col,
        };
        Ok((
            self.submit(Op::Delete {
                idx,
                nchars,
                text: Some(removed),
            }),
            edit,
        ))
    }

    fn submit(&mut self, op: Op) -> Submission {
        // Parent: our own last in-flight edit if there is one, otherwise
        // the last server-sequenced edit.
        let (parent_seq, parent_author) = match self.inflight.back() {
            Some(last) => (last.seq, self.author_id),
            None => (self.latest_server_seq, SERVER_AUTHOR),
        };
        self.seq += 1;
        self.inflight.push_back(InFlight {
            seq: self.seq,
            op: Some(op.clone()),
        });
        Submission {
            seq: self.seq,
            parent_seq,
            parent_author,
            op,
        }
    }

    /// Apply a server-sequenced edit from another peer. Returns the buffer
    /// change the editor must mirror, or `None` when the edit was entirely
    /// absorbed by our own in-flight deletes.
    pub fn apply_external(
        &mut self,
        seq: u64,
        op: Op,
    ) -> Result<Option<BufferEdit>, ClientError> {
        self.latest_server_seq = seq;

        // Rewrite the external through the queue while reparenting the
        // queue onto it.
        let mut external = Some(op);
        for inf in self.inflight.iter_mut() {
            let Some(x) = external else { break };
            match inf.op.take() {
                Some(mine) => {
                    external = x.after(&mine);
                    inf.op = mine.after(&x);
                }
                None => external = Some(x),
            }
        }
        let Some(op) = external else { return Ok(None) };

        match op {
            Op::Insert { idx, text } => {
                let (line, col) = self.tree.insert_text(idx, &text)?;
                Ok(Some(BufferEdit::Insert { line, col, text }))
            }
            Op::Delete { idx, nchars, .. } => {
                let (_removed, start_line, start_col, end_line, end_col) =
                    self.tree.delete_text(idx, nchars)?;
                Ok(Some(BufferEdit::Delete {
                    start_line,
                    start_col,
                    end_line,
                    end_col,
                }))
            }
        }
    }

    /// Handle the server acknowledging our oldest in-flight submission.
    ///
    /// The accepted edit takes the next slot in the server's history, so
    /// the last-known server sequence advances with it; a later submission
    /// parented on `(latest_server_seq, server)` then names our own landed
    /// edit.
    pub fn apply_accept(&mut self, seq: u64) -> Result<(), ClientError> {
        match self.inflight.pop_front() {
            Some(inf) if inf.seq == seq => {
                self.latest_server_seq += 1;
                Ok(())
            }
            Some(inf) => Err(ClientError::AcceptMismatch {
                expected: inf.seq,
                got: seq,
            }),
            None => Err(ClientError::UnexpectedAccept { seq }),
        }
    }
}
