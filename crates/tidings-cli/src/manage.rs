//! One-shot history commands: `list`, `delete`, `delete-all`

use std::sync::Arc;
use tidings_core::events::format_message;
use tidings_core::{
    FeedConfig, HistoryApi, Reconciler, RestClient, Result, SessionProvider, StreamTarget,
};
use tracing::info;

pub async fn list(
    config: &FeedConfig,
    provider: &SessionProvider,
    target: StreamTarget,
    since: Option<i64>,
    json_output: bool,
) -> Result<()> {
    let api = RestClient::new(provider.subscribe(), target);
    let reconciler = Reconciler::new(Arc::new(api));

    let load = reconciler
        .load_page(config.history.page_limit, since)
        .await?;
    for message in reconciler.snapshot().await {
        println!("{}", format_message(&message, json_output));
    }
    info!(
        "{} message(s) (limit {}, since {})",
        load.paging.size, load.paging.limit, load.paging.since
    );
    Ok(())
}

pub async fn delete(provider: &SessionProvider, target: StreamTarget, id: i64) -> Result<()> {
    RestClient::new(provider.subscribe(), target)
        .delete_message(id)
        .await?;
    info!("Deleted message {}", id);
    Ok(())
}

pub async fn delete_all(provider: &SessionProvider, target: StreamTarget) -> Result<()> {
    RestClient::new(provider.subscribe(), target)
        .delete_all_messages()
        .await?;
    info!("Deleted all messages");
    Ok(())
}
