//! The agent: ties editor, client, and transport together.
//!
//! Two execution contexts meet here. The transport task owns the socket
//! and its timers; the agent task owns the editor buffer, the client
//! state, and the document model. They share nothing — every hand-off is
//! a channel message:
//!
//! ```text
//!   editor callbacks ──ByteEdit──►┌─────────┐
//!                                 │  agent  │──Submission──► transport task
//!   editor buffer    ◄─mutations──│  task   │◄──TransportEvent──┘
//! ```
//!
//! Byte edits that arrive before the first snapshot are held and replayed
//! once the document is seeded. Any protocol-invariant violation funnels
//! into a single give-up path that surfaces one message and stops; later
//! failures during shutdown are logged and swallowed.

use tokio::sync::mpsc;

use crate::client::{BufferEdit, Client, ClientError};
use crate::editor::{ByteEdit, Editor};
use crate::protocol::ServerMessage;
use crate::transport::{
    AddrSpec, ConnectionState, Transport, TransportEvent, TransportHandle, TransportError,
};

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Server address spec: a decimal port, `host:port`, or a socket path.
    pub address: String,
    /// Name presented to the server on a fresh session.
    pub display_name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            address: "7777".to_string(),
            display_name: "anonymous".to_string(),
        }
    }
}

/// Handle the host editor keeps: reports edits, observes the connection.
#[derive(Clone)]
pub struct AgentHandle {
    edits_tx: mpsc::UnboundedSender<ByteEdit>,
    transport: TransportHandle,
}

impl AgentHandle {
    /// Report a user edit. Returns false once the agent has stopped.
    pub fn report_edit(&self, edit: ByteEdit) -> bool {
        self.edits_tx.send(edit).is_ok()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.transport.connection_state().await
    }
}

/// A local edit that arrived before the first snapshot. The inserted text
/// is captured at arrival time, while the buffer still shows it; the
/// snapshot replacement will wipe it from the buffer until replay.
#[derive(Debug)]
struct HeldEdit {
    start_byte: usize,
    old_len: usize,
    inserted: Option<String>,
}

/// The document-sync agent for one buffer.
pub struct Agent<E: Editor> {
    editor: E,
    client: Option<Client>,
    transport: TransportHandle,
    conn: Option<Transport>,
    events: mpsc::Receiver<TransportEvent>,
    edits_rx: mpsc::UnboundedReceiver<ByteEdit>,
    held: Vec<HeldEdit>,
    gave_up: bool,
}

impl<E: Editor> Agent<E> {
    /// Build an agent around a host editor. The connection is not opened
    /// until [`Agent::run`].
    pub fn new(config: AgentConfig, editor: E) -> Result<(Self, AgentHandle), TransportError> {
        let addr = AddrSpec::parse(&config.address)?;
        let (conn, transport, events) = Transport::new(addr, config.display_name);
        let (edits_tx, edits_rx) = mpsc::unbounded_channel();
        let handle = AgentHandle {
            edits_tx,
            transport: transport.clone(),
        };
        Ok((
            Agent {
                editor,
                client: None,
                transport,
                conn: Some(conn),
                events,
                edits_rx,
                held: Vec::new(),
                gave_up: false,
            },
            handle,
        ))
    }

    /// Drive the agent until the session dies or every handle is dropped.
    pub async fn run(mut self) {
        if let Some(conn) = self.conn.take() {
            tokio::spawn(conn.run());
        }
        loop {
            tokio::select! {
                ev = self.events.recv() => {
                    let Some(ev) = ev else { break };
                    if !self.on_transport_event(ev) {
                        break;
                    }
                }
                edit = self.edits_rx.recv() => {
                    let Some(edit) = edit else { break };
                    if !self.on_byte_edit(edit) {
                        break;
                    }
                }
            }
        }
        log::info!("agent stopped");
    }

    /// Returns false when the agent should stop.
    fn on_transport_event(&mut self, ev: TransportEvent) -> bool {
        match ev {
            TransportEvent::Connected {
                author_id,
                latest_seq,
                text,
                resumed,
            } => self.on_connected(author_id, latest_seq, text, resumed),
            TransportEvent::Message(ServerMessage::External { seq, op }) => {
                let Some(client) = self.client.as_mut() else {
                    self.give_up("external edit before initial sync");
                    return false;
                };
                match client.apply_external(seq, op) {
                    Ok(Some(edit)) => {
                        apply_buffer_edit(&mut self.editor, edit);
                        true
                    }
                    Ok(None) => true,
                    Err(err) => {
                        self.give_up(&err.to_string());
                        false
                    }
                }
            }
            TransportEvent::Message(ServerMessage::Accept { seq }) => {
                let Some(client) = self.client.as_mut() else {
                    self.give_up("accept before initial sync");
                    return false;
                };
                if let Err(err) = client.apply_accept(seq) {
                    self.give_up(&err.to_string());
                    return false;
                }
                true
            }
            TransportEvent::Reconnecting { delay } => {
                log::info!("reconnecting in {delay:?}");
                self.editor.error("reconnecting...");
                true
            }
            TransportEvent::Fatal(msg) => {
                self.give_up(&msg);
                false
            }
        }
    }

    fn on_connected(
        &mut self,
        author_id: u64,
        latest_seq: u64,
        text: String,
        resumed: bool,
    ) -> bool {
        if self.client.is_none() {
            log::info!("synced as author {author_id} ({} bytes)", text.len());
            self.client = Some(Client::new(author_id, latest_seq, &text));
            self.editor.replace_all(&text);
            self.replay_held();
            return true;
        }

        // A resume snapshot reflects the server's state without our
        // unacknowledged edits; those stay queued and visible.
        debug_assert!(resumed);
        let Some(client) = self.client.as_mut() else {
            return true;
        };
        client.reseed(latest_seq, &text);
        let replayed = client.replay_inflight();
        let synced = client.text();
        if let Err(err) = replayed {
            self.give_up(&err.to_string());
            return false;
        }
        self.editor.replace_all(&synced);
        log::info!("resynced at seq {latest_seq}");
        true
    }

    /// Returns false when the agent should stop.
    fn on_byte_edit(&mut self, edit: ByteEdit) -> bool {
        if self.gave_up {
            return false;
        }
        log::trace!(
            "byte edit at tick {}: byte {} -{} +{}",
            edit.tick,
            edit.start_byte,
            edit.old_len,
            edit.new_len
        );
        // Recover the replacement text from the editor's view before
        // anything else touches the buffer.
        let inserted = if edit.new_len > 0 {
            let end_row = edit.start_row + edit.new_end_row;
            let end_col = if edit.new_end_row == 0 {
                edit.start_col + edit.new_end_col
            } else {
                edit.new_end_col
            };
            let lines = self
                .editor
                .get_text(edit.start_row, edit.start_col, end_row, end_col);
            Some(lines.join("\n"))
        } else {
            None
        };
        if self.client.is_none() {
            self.held.push(HeldEdit {
                start_byte: edit.start_byte,
                old_len: edit.old_len,
                inserted,
            });
            return true;
        }
        match self.process_edit(edit.start_byte, edit.old_len, inserted, false) {
            Ok(()) => true,
            Err(err) => {
                self.give_up(&err.to_string());
                false
            }
        }
    }

    /// Feed one local edit into the model and the submission pipeline.
    /// With `mirror` set, the change is also pushed into the buffer —
    /// used when replaying edits the snapshot replacement wiped.
    fn process_edit(
        &mut self,
        start_byte: usize,
        old_len: usize,
        inserted: Option<String>,
        mirror: bool,
    ) -> Result<(), ClientError> {
        let Some(client) = self.client.as_mut() else {
            return Ok(());
        };
        if old_len > 0 {
            let (sub, range) = client.local_delete(start_byte, old_len)?;
            if mirror {
                apply_buffer_edit(&mut self.editor, range);
            }
            self.transport.submit(sub);
        }
        if let Some(text) = inserted {
            let (sub, range) = client.local_insert(start_byte, &text)?;
            if mirror {
                apply_buffer_edit(&mut self.editor, range);
            }
            self.transport.submit(sub);
        }
        Ok(())
    }

    /// Replay edits held from before the first snapshot, restoring them in
    /// the buffer as well. A held edit that no longer fits the document is
    /// dropped with the rest of the queue; the buffer already reflects the
    /// snapshot, so state stays consistent.
    fn replay_held(&mut self) {
        let held = std::mem::take(&mut self.held);
        for edit in held {
            if let Err(err) = self.process_edit(edit.start_byte, edit.old_len, edit.inserted, true)
            {
                log::warn!("dropping edits made before sync: {err}");
                break;
            }
        }
    }

    /// The single failure funnel: one message out, everything after is
    /// swallowed with a log line.
    fn give_up(&mut self, msg: &str) {
        if self.gave_up {
            log::warn!("ignoring failure during shutdown: {msg}");
            return;
        }
        self.gave_up = true;
        log::error!("giving up on doc sync: {msg}");
        self.editor.error(&format!("giving up on doc sync: {msg}"));
    }
}

/// Mirror a model-side change into the buffer.
fn apply_buffer_edit<E: Editor>(editor: &mut E, edit: BufferEdit) {
    match edit {
        BufferEdit::Insert { line, col, text } => {
            let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
            editor.set_text(line, col, line, col, &lines);
        }
        BufferEdit::Delete {
            start_line,
            start_col,
            end_line,
            end_col,
        } => {
            editor.set_text(start_line, start_col, end_line, end_col, &[String::new()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::MemoryEditor;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout, Duration};

    #[test]
    fn test_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.address, "7777");
        assert_eq!(config.display_name, "anonymous");
    }

    #[test]
    fn test_bad_address_is_rejected_up_front() {
        let config = AgentConfig {
            address: "not an address".to_string(),
            ..AgentConfig::default()
        };
        assert!(Agent::new(config, MemoryEditor::new()).is_err());
    }

    #[tokio::test]
    async fn test_reconnecting_message_reaches_editor() {
        // A port with nothing listening: the agent should keep retrying
        // and surface the reconnect notice.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let editor = Arc::new(Mutex::new(MemoryEditor::new()));
        let probe = editor.clone();
        let config = AgentConfig {
            address: format!("127.0.0.1:{port}"),
            ..AgentConfig::default()
        };
        let (agent, _handle) = Agent::new(config, editor).unwrap();
        tokio::spawn(agent.run());

        timeout(Duration::from_secs(2), async {
            loop {
                if probe
                    .lock()
                    .unwrap()
                    .errors
                    .iter()
                    .any(|e| e == "reconnecting...")
                {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no reconnect notice surfaced");
    }
}
