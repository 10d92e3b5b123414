//! Event chunking (C4) and the parsed `Event` record (part of C3's output).
//!
//! Chunking is a pure, allocation-light sweep over a connection's valid
//! blocks — no I/O, directly unit-testable for idempotency.

use bytes::Bytes;

use crate::wire::{Command, Frame};

/// A fully parsed Galaxy SIA event. All fields but `account` are optional —
/// a chunk with no `NEW_EVENT` block still produces an `Event`, just one
/// with `event_code: None`, which downstream treats as "nothing to notify".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub account: String,
    pub site_name: Option<String>,

    pub time: Option<String>,
    pub user_id: Option<String>,
    pub partition: Option<String>,
    pub group: Option<String>,
    pub value: Option<String>,
    pub event_code: Option<String>,
    pub event_description: Option<String>,
    pub zone: Option<String>,

    pub action_text: Option<String>,

    // Raw payloads, kept around for diagnostics.
    pub account_payload: Option<Bytes>,
    pub data_payload: Option<Bytes>,
    pub ascii_payload: Option<Bytes>,
}

/// Group a connection's valid blocks (END_OF_DATA already excluded by the
/// caller) into event chunks.
///
/// Rule: a new chunk starts at each ACCOUNT_ID block, except the very
/// first one, which opens the first chunk. Every other block — including
/// unrecognized command bytes — is appended to the chunk currently open.
pub fn assemble(blocks: &[Frame]) -> Vec<Vec<Frame>> {
    let mut chunks: Vec<Vec<Frame>> = Vec::new();
    let mut current: Vec<Frame> = Vec::new();

    for block in blocks {
        if block.command == Command::AccountId && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(block.clone());
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
