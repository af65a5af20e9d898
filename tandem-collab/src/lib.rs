//! # tandem-collab — the Tandem sync agent
//!
//! Connects a host editor to a central sequencing server for multiplayer
//! plain-text editing.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  ByteEdit   ┌───────────┐  Submission  ┌───────────┐
//! │ host       │ ──────────► │   Agent   │ ───────────► │ Transport │ ⇄ server
//! │ editor     │ ◄────────── │  (Client, │ ◄─────────── │ (backoff, │
//! └────────────┘  buffer     │ BreakTree)│   events     │  resend)  │
//!                 mutations  └───────────┘              └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — escape codec, field splitting, and the line-framed
//!   wire messages.
//! - [`transport`] — address parsing, the reconnecting connection task,
//!   and the persistent write queue.
//! - [`client`] — sequence numbers, parent references, the in-flight
//!   queue, and transform of external edits into the local frame.
//! - [`editor`] — the host-editor seam and the in-memory editor.
//! - [`agent`] — the entry point owning the editor-side loop.
//! - [`logging`] — the `log`-facade file sink.

pub mod agent;
pub mod client;
pub mod editor;
pub mod logging;
pub mod protocol;
pub mod transport;

pub use agent::{Agent, AgentConfig, AgentHandle};
pub use client::{BufferEdit, Client, ClientError};
pub use editor::{ByteEdit, Editor, MemoryEditor};
pub use protocol::{ProtocolError, ServerMessage, SessionGrant, Submission, SERVER_AUTHOR};
pub use transport::{
    AddrSpec, ConnectionState, Transport, TransportError, TransportEvent, TransportHandle,
};
