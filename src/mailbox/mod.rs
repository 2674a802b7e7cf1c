//! Per-strategy mailboxes, routing and subscriptions

mod manager;
mod queue;
mod subscriptions;

pub use manager::{MailboxManager, MailboxStats};
pub use queue::{Mailbox, MailboxSnapshot};
pub use subscriptions::SubscriptionBook;
