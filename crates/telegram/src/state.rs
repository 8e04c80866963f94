use std::sync::Arc;

use {bunnydrop_relay::RelayService, tokio_util::task::TaskTracker};

use crate::locator::TelegramFileLocator;

/// Handler state, shared by the polling loop and the webhook route.
pub type SharedState = Arc<BotState>;

/// Everything needed to answer one message. Immutable after startup.
pub struct BotState {
    pub bot: teloxide::Bot,
    /// Used to recognize `/help@<username>` in group chats.
    pub bot_username: Option<String>,
    pub relay: RelayService,
    pub locator: TelegramFileLocator,
    /// In-flight message handlers, drained on shutdown.
    pub tasks: TaskTracker,
}

impl BotState {
    #[must_use]
    pub fn new(bot: teloxide::Bot, bot_username: Option<String>, relay: RelayService) -> Self {
        let locator = TelegramFileLocator::new(bot.clone());
        Self {
            bot,
            bot_username,
            relay,
            locator,
            tasks: TaskTracker::new(),
        }
    }
}
