//! Notification formatting (C6) — turn a parsed `Event` plus its routing
//! target into a ready-to-send `NotificationJob`.

use sia_core::config::{AuthMethod, TopicConfig};
use sia_core::Event;

/// Credentials to attach to the outbound push, resolved from `TopicConfig`
/// at format time so the dispatch worker never touches config directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Bearer(String),
    Basic { user: String, pass: String },
}

/// One outbound ntfy.sh-compatible push, queued for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationJob {
    pub account: String,
    pub topic_url: String,
    pub auth: Auth,
    pub title: String,
    pub body: String,
    pub priority: u8,
    /// Number of delivery attempts already made. 0 for a freshly formatted job.
    pub attempt: u32,
    /// Earliest time this job may be sent. `None` for a freshly formatted
    /// job (ready immediately); set by the dispatch worker when a delivery
    /// fails and the job is re-queued to wait out its backoff.
    pub not_before: Option<std::time::Instant>,
}

/// Format a notification for `event`, routed per `topic` and prioritized
/// per `priority`.
///
/// Title is `"<ntfy_title>: <site_name or account>"`. Body prefers the
/// ASCII block's free text (`action_text`), suffixed with `(Zone N)` only
/// when the zone's digits don't already appear in that text; otherwise it
/// falls back to a structured `Event: ... User: ... Zone: ... Partition: ...`
/// line built from whatever NEW_EVENT fields are present.
pub fn format_notification(event: &Event, topic: &TopicConfig, priority: u8) -> NotificationJob {
    let site = event
        .site_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(event.account.as_str());
    let title = format!("{}: {}", topic.ntfy_title, site);
    let body = format_body(event);
    let auth = match topic.ntfy_auth {
        AuthMethod::None => Auth::None,
        AuthMethod::Token => Auth::Bearer(topic.ntfy_token.clone()),
        AuthMethod::Userpass => Auth::Basic {
            user: topic.ntfy_user.clone(),
            pass: topic.ntfy_pass.clone(),
        },
    };

    NotificationJob {
        account: event.account.clone(),
        topic_url: topic.ntfy_topic_url.clone(),
        auth,
        title,
        body,
        priority,
        attempt: 0,
        not_before: None,
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

fn format_body(event: &Event) -> String {
    let time = event.time.as_deref().unwrap_or("??");

    let body = match non_empty(&event.action_text) {
        Some(action_text) => {
            let mut body = format!("{time} {action_text}");
            if let Some(zone) = non_empty(&event.zone) {
                if !action_text.contains(zone) {
                    body.push_str(&format!(" (Zone {zone})"));
                }
            }
            body
        }
        None => {
            let mut body = time.to_string();
            if let Some(code) = non_empty(&event.event_code) {
                let description = event.event_description.as_deref().unwrap_or("Unknown");
                body.push_str(&format!(" Event: {code} ({description})"));
            }
            if let Some(user_id) = non_empty(&event.user_id) {
                body.push_str(&format!(" User: {user_id}"));
            }
            if let Some(zone) = non_empty(&event.zone) {
                body.push_str(&format!(" Zone: {zone}"));
            }
            if let Some(partition) = non_empty(&event.partition) {
                body.push_str(&format!(" Partition: {partition}"));
            }
            body
        }
    };

    body.trim().to_string()
}
