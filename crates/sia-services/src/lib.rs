//! sia-services — notification formatting and reliable HTTP dispatch for
//! the Galaxy SIA receiver. Depends on `sia-core` for events and config.

pub mod dispatch;
pub mod notify;

pub use dispatch::{DispatchQueue, DispatchWorker};
pub use notify::{format_notification, NotificationJob};
