//! The host-editor seam.
//!
//! The agent treats the editor as an external collaborator: it receives
//! [`ByteEdit`] reports for edits the user makes, and it mirrors remote
//! edits back through the [`Editor`] trait. Adapters for real editors
//! implement the trait over their buffer API; [`MemoryEditor`] is the
//! in-memory implementation used by tests and headless runs.
//!
//! Coordinates are byte-based: row `r`, column `c` addresses the byte `c`
//! bytes past the start of line `r`, where a line's span includes its
//! trailing newline. Row `line_count` with column 0 addresses the end of
//! the buffer, so appends need no special casing.
//!
//! Mutations performed through the trait are the agent's own; an adapter
//! must not report them back as byte edits, or every remote edit would
//! echo forever.

/// An editor-reported byte-level change, the shape host editors emit from
/// their change-watching callbacks. End positions are deltas relative to
/// the start row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteEdit {
    /// Buffer change tick, for ordering and diagnostics.
    pub tick: u64,
    pub start_row: usize,
    pub start_col: usize,
    /// Absolute byte offset of the change start.
    pub start_byte: usize,
    /// Rows spanned by the replaced range.
    pub old_end_row: usize,
    /// Column of the replaced range's end: relative to `start_col` when
    /// `old_end_row` is zero, absolute in the end row otherwise.
    pub old_end_col: usize,
    /// Byte length of the replaced range.
    pub old_len: usize,
    pub new_end_row: usize,
    pub new_end_col: usize,
    /// Byte length of the replacement.
    pub new_len: usize,
}

/// Buffer mutation interface the agent drives.
pub trait Editor: Send + 'static {
    /// Replace the whole buffer. Used for the initial snapshot and for
    /// resume reseeds.
    fn replace_all(&mut self, text: &str);

    /// Replace the range from `(start_row, start_col)` to
    /// `(end_row, end_col)` with `lines` joined by newlines. Rows are
    /// end-inclusive, columns end-exclusive.
    fn set_text(
        &mut self,
        start_row: usize,
        start_col: usize,
        end_row: usize,
        end_col: usize,
        lines: &[String],
    );

    /// Read the range back as lines, split on newlines.
    fn get_text(
        &self,
        start_row: usize,
        start_col: usize,
        end_row: usize,
        end_col: usize,
    ) -> Vec<String>;

    /// Surface a message on the editor's error channel.
    fn error(&mut self, msg: &str);
}

/// Editors behind a mutex still satisfy the seam; tests use this to keep a
/// probe handle on an editor owned by a running agent.
impl<E: Editor> Editor for std::sync::Arc<std::sync::Mutex<E>> {
    fn replace_all(&mut self, text: &str) {
        self.lock().unwrap().replace_all(text);
    }

    fn set_text(
        &mut self,
        start_row: usize,
        start_col: usize,
        end_row: usize,
        end_col: usize,
        lines: &[String],
    ) {
        self.lock()
            .unwrap()
            .set_text(start_row, start_col, end_row, end_col, lines);
    }

    fn get_text(
        &self,
        start_row: usize,
        start_col: usize,
        end_row: usize,
        end_col: usize,
    ) -> Vec<String> {
        self.lock()
            .unwrap()
            .get_text(start_row, start_col, end_row, end_col)
    }

    fn error(&mut self, msg: &str) {
        self.lock().unwrap().error(msg);
    }
}

/// In-memory editor: a plain string buffer plus the machinery to emit
/// [`ByteEdit`] reports for simulated user edits.
#[derive(Debug, Default)]
pub struct MemoryEditor {
    text: String,
    tick: u64,
    /// Messages surfaced through the error channel, newest last.
    pub errors: Vec<String>,
}

impl MemoryEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        MemoryEditor {
            text: text.into(),
            tick: 0,
            errors: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Byte offset of `(row, col)`.
    fn offset(&self, row: usize, col: usize) -> usize {
        let mut start = 0;
        for _ in 0..row {
            match self.text[start..].find('\n') {
                Some(nl) => start += nl + 1,
                None => {
                    start = self.text.len();
                    break;
                }
            }
        }
        (start + col).min(self.text.len())
    }

    fn position(&self, byte: usize) -> (usize, usize) {
        let before = &self.text[..byte];
        let row = before.matches('\n').count();
        let col = byte - before.rfind('\n').map_or(0, |nl| nl + 1);
        (row, col)
    }

    /// Perform a user edit (replace `old_len` bytes at `idx` with
    /// `insert`) and produce the byte-edit report a host editor would.
    pub fn edit(&mut self, idx: usize, old_len: usize, insert: &str) -> ByteEdit {
        let (start_row, start_col) = self.position(idx);
        let (oer, oec) = self.position(idx + old_len);
        self.text.replace_range(idx..idx + old_len, insert);
        let (ner, nec) = self.position(idx + insert.len());
        self.tick += 1;
        ByteEdit {
            tick: self.tick,
            start_row,
            start_col,
            start_byte: idx,
            old_end_row: oer - start_row,
            old_end_col: if oer == start_row { oec - start_col } else { oec },
            old_len,
            new_end_row: ner - start_row,
            new_end_col: if ner == start_row { nec - start_col } else { nec },
            new_len: insert.len(),
        }
    }
}

impl Editor for MemoryEditor {
    fn replace_all(&mut self, text: &str) {
        self.text = text.to_string();
        self.tick += 1;
    }

    fn set_text(
        &mut self,
        start_row: usize,
        start_col: usize,
        end_row: usize,
        end_col: usize,
        lines: &[String],
    ) {
        let start = self.offset(start_row, start_col);
        let end = self.offset(end_row, end_col);
        self.text.replace_range(start..end, &lines.join("\n"));
        self.tick += 1;
    }

    fn get_text(
        &self,
        start_row: usize,
        start_col: usize,
        end_row: usize,
        end_col: usize,
    ) -> Vec<String> {
        let start = self.offset(start_row, start_col);
        let end = self.offset(end_row, end_col);
        self.text[start..end].split('\n').map(str::to_string).collect()
    }

    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }
}
