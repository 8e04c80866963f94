//! Telegram front end for the bunnydrop relay.
//!
//! Receives updates by long polling or webhook, reduces each message to an
//! [`bunnydrop_relay::InboundEvent`], runs it through the relay and replies
//! with the public URL or the failure.

pub mod bot;
pub mod error;
pub mod handlers;
pub mod locator;
pub mod outbound;
pub mod reply;
pub mod state;

pub use {
    bot::{connect, register_commands, remove_webhook, setup_webhook, start_polling},
    error::{Error, Result},
    handlers::{extract_event, handle_message, handle_update, spawn_update},
    locator::TelegramFileLocator,
    state::{BotState, SharedState},
};
