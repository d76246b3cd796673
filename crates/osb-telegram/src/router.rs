use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::Mutex;

use osb_core::{
    config::Config,
    messaging::port::MessagingPort,
    pipeline::QueryPipeline,
    policy::AccessPolicy,
    ratelimit::RateLimiter,
    search::SearchClient,
    usage::{UsageRecorder, UsageStore},
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub pipeline: Arc<QueryPipeline>,
    pub policy: Arc<AccessPolicy>,
    pub limiter: Arc<Mutex<RateLimiter>>,
    pub usage: UsageStore,
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    // Basic startup info.
    if let Ok(me) = bot.get_me().await {
        println!("osb started: @{}", me.username());
    }
    println!("Upstream endpoint: {}", cfg.search_api_url);
    println!("Admins: {}", cfg.admin_ids.len());

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));

    let search = SearchClient::new(&cfg.search_api_url, cfg.search_timeout)?;
    let limiter = Arc::new(Mutex::new(RateLimiter::new(cfg.rate_limit_window)));
    let policy = Arc::new(AccessPolicy::new(
        cfg.admin_ids.clone(),
        cfg.authorized_groups.clone(),
    ));

    let usage = UsageStore::open(&cfg.usage_db_path).await?;
    let recorder = UsageRecorder::spawn(usage.clone(), cfg.usage_queue_depth);

    let pipeline = Arc::new(QueryPipeline::new(
        cfg.clone(),
        search,
        limiter.clone(),
        policy.clone(),
        recorder,
    ));

    let state = Arc::new(AppState {
        cfg,
        messenger,
        pipeline,
        policy,
        limiter,
        usage,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
