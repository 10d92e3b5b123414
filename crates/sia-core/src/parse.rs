//! Payload parsers (C3) — turn validated block payloads into event fields.
//!
//! Each parser here is pure and total: malformed input degrades gracefully
//! to `None`/empty fields rather than erroring — a panel sending a
//! slightly odd payload should still produce a best-guess event, not drop
//! the whole chunk.

use crate::codes;
use crate::event::Event;
use crate::text::{decode_text, CharMap};
use crate::wire::{Command, Frame};

/// ACCOUNT_ID payload is the account number, verbatim.
pub fn parse_account_id(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).trim().to_string()
}

/// ASCII payload is free text, subject to the configured transliteration.
pub fn parse_ascii(payload: &[u8], map: &CharMap) -> String {
    decode_text(payload, map)
}

/// Fields extracted from a NEW_EVENT payload.
///
/// NEW_EVENT payloads are `/`-delimited sections. Every section but the
/// last carries a two-letter prefix (`ti`, `id`, `pi`, `ri`, `va`); the
/// last section is the event code, optionally followed by a zone number
/// (`BA1012` -> code `BA`, zone `1012`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewEventFields {
    pub time: Option<String>,
    pub user_id: Option<String>,
    pub partition: Option<String>,
    pub group: Option<String>,
    pub value: Option<String>,
    pub event_code: Option<String>,
    pub zone: Option<String>,
}

/// Matches `([A-Z]{2})(\d{3,4})?` unanchored at the end, same as
/// `re.match` against a regex with no trailing `$`: the first two
/// uppercase letters are always taken as the code, then up to 4 leading
/// digits of whatever follows are taken as the zone (greedily, stopping
/// at 4), and anything left over after that is ignored. A section that
/// doesn't even start with two uppercase letters has no code at all —
/// caller logs a warning and leaves the code unset.
fn split_event_code(section: &str) -> (Option<String>, Option<String>) {
    let chars: Vec<char> = section.chars().collect();
    if chars.len() < 2 || !chars[0].is_ascii_uppercase() || !chars[1].is_ascii_uppercase() {
        return (None, None);
    }
    let code: String = chars[..2].iter().collect();
    let digits: String = chars[2..]
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .take(4)
        .collect();
    if digits.len() >= 3 {
        (Some(code), Some(digits))
    } else {
        (Some(code), None)
    }
}

pub fn parse_new_event(payload: &[u8]) -> NewEventFields {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim().trim_start_matches('N');
    let mut fields = NewEventFields::default();

    let sections: Vec<&str> = text.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, prefixed)) = sections.split_last() else {
        return fields;
    };

    for section in prefixed {
        if let Some(rest) = section.strip_prefix("ti") {
            fields.time = Some(rest.to_string());
        } else if let Some(rest) = section.strip_prefix("id") {
            fields.user_id = Some(rest.to_string());
        } else if let Some(rest) = section.strip_prefix("pi") {
            fields.partition = Some(rest.to_string());
        } else if let Some(rest) = section.strip_prefix("ri") {
            fields.group = Some(rest.to_string());
        } else if let Some(rest) = section.strip_prefix("va") {
            fields.value = Some(rest.to_string());
        } else {
            tracing::debug!(section = %section, "unrecognized NEW_EVENT section prefix");
        }
    }

    let (code, zone) = split_event_code(last);
    if code.is_none() {
        tracing::warn!(section = %last, "NEW_EVENT last section has no recognizable event code");
    }
    fields.event_code = code;
    fields.zone = zone;
    fields
}

/// Build a complete `Event` from one assembled chunk of blocks.
///
/// The chunk's ACCOUNT_ID block (if present) seeds `account`; a NEW_EVENT
/// block supplies the structured fields and its description lookup; an
/// ASCII block supplies free-text `action_text`. A chunk missing any of
/// these simply leaves the corresponding `Event` fields unset.
pub fn build_event(chunk: &[Frame], map: &CharMap) -> Event {
    let mut event = Event::default();

    for block in chunk {
        match block.command {
            Command::AccountId => {
                event.account = parse_account_id(&block.payload);
                event.account_payload = Some(block.payload.clone());
            }
            Command::NewEvent => {
                let fields = parse_new_event(&block.payload);
                event.event_description = fields
                    .event_code
                    .as_deref()
                    .map(|code| codes::describe(code).to_string());
                event.time = fields.time;
                event.user_id = fields.user_id;
                event.partition = fields.partition;
                event.group = fields.group;
                event.value = fields.value;
                event.event_code = fields.event_code;
                event.zone = fields.zone;
                event.data_payload = Some(block.payload.clone());
            }
            Command::Ascii => {
                event.action_text = Some(parse_ascii(&block.payload, map));
                event.ascii_payload = Some(block.payload.clone());
            }
            _ => {}
        }
    }

    event
}
