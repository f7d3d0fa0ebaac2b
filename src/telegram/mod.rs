//! Telegram source: bot dispatcher, message conversion, media download,
//! and the normalizer that turns posts into canonical payloads.

use std::sync::Arc;

use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use tracing::{debug, info};

use crate::forward::{Forwarder, HandleOutcome};

pub mod format;
pub mod inbound;
pub mod media;
pub mod normalize;

/// Run the Telegram bot until Ctrl+C.
///
/// Channel posts and group messages are both converted and handed to the
/// forwarder. teloxide serialises updates per chat, so posts from one
/// channel reach the forwarder in order.
pub async fn run_telegram(bot: Bot, forwarder: Arc<Forwarder>) -> anyhow::Result<()> {
    let handler = dptree::entry()
        .branch(Update::filter_channel_post().endpoint(handle_post))
        .branch(Update::filter_message().endpoint(handle_post));

    info!("telegram dispatcher starting");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![forwarder])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_post(msg: Message, forwarder: Arc<Forwarder>) -> ResponseResult<()> {
    let raw = inbound::raw_from_message(&msg);
    let sequence_id = raw.sequence_id;
    let outcome = forwarder.handle(raw).await;
    debug!(chat_id = msg.chat.id.0, sequence_id, ?outcome, "telegram post handled");
    if outcome == HandleOutcome::Filtered {
        debug!(chat_id = msg.chat.id.0, "add this chat id to telegram.allowed_channels to forward it");
    }
    Ok(())
}
