//! Change notification for leadership releases and settings updates

mod notifier;

pub use notifier::*;
