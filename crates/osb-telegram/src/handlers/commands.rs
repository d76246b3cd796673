use std::sync::Arc;

use teloxide::prelude::*;

use osb_core::{
    domain::{ChatId, Tier, UserId},
    pipeline::{PipelineOutcome, SearchRequest},
    policy::AddGroupOutcome,
};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let (cmd, args) = parse_command(text);
    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let is_private = msg.chat.is_private();

    let result = match cmd.as_str() {
        "start" => cmd_start(&state, user_id, chat_id, is_private).await,
        "help" => cmd_help(&state, chat_id).await,
        "free" => run_search(&state, user_id, chat_id, Tier::Free, args).await,
        "paid" => run_search(&state, user_id, chat_id, Tier::Paid, args).await,
        "addgroup" => cmd_add_group(&state, user_id, chat_id, &args).await,
        "stats" => cmd_stats(&state, user_id, chat_id).await,
        "mystats" => cmd_my_stats(&state, user_id, chat_id).await,
        _ => Ok(()),
    };

    // Outermost boundary: an unexpected failure never takes the dispatcher
    // down, and the user gets a generic apology instead of the raw error.
    if let Err(e) = result {
        eprintln!("[BOT] /{cmd} failed: {e}");
        let _ = state
            .messenger
            .send_text(chat_id, "An error occurred. Please try again.")
            .await;
    }

    Ok(())
}

async fn run_search(
    state: &AppState,
    user_id: UserId,
    chat_id: ChatId,
    tier: Tier,
    args: String,
) -> osb_core::Result<()> {
    if args.trim().is_empty() {
        let example = match tier {
            Tier::Free => "/free wehostbd.com",
            Tier::Paid => "/paid wehostbd.com",
        };
        state
            .messenger
            .send_text(
                chat_id,
                &format!("Please provide a keyword or URL.\nExample: {example}"),
            )
            .await?;
        return Ok(());
    }

    let req = SearchRequest {
        user_id,
        chat_id,
        tier,
        raw_query: args,
    };

    match state.pipeline.run(&req, state.messenger.as_ref()).await? {
        PipelineOutcome::Delivered { shown, total } => {
            println!(
                "[BOT] delivered {shown}/{total} {} results to user {}",
                tier.label(),
                user_id.0
            );
        }
        PipelineOutcome::Rejected(reason) => {
            println!("[BOT] rejected {} search for user {}: {reason}", tier.label(), user_id.0);
        }
        PipelineOutcome::Failed(_) => {
            eprintln!("[BOT] {} search failed upstream for user {}", tier.label(), user_id.0);
        }
    }

    Ok(())
}

async fn cmd_start(
    state: &AppState,
    user_id: UserId,
    chat_id: ChatId,
    is_private: bool,
) -> osb_core::Result<()> {
    let text = if is_private {
        let mut welcome = "OSINT Bot\n\n\
            Commands:\n\
            /free <keyword or url> - Get 12 results (group only)\n\
            /paid <keyword or url> - Get all results (private)\n\n\
            For paid services, contact admin."
            .to_string();
        if state.policy.authorize_admin_command(user_id) {
            welcome.push_str("\n\nAdmin access granted.");
        }
        welcome
    } else {
        "OSINT Bot is active in this group.\nUse /free <keyword or url> to search.".to_string()
    };

    state.messenger.send_text(chat_id, &text).await?;
    Ok(())
}

async fn cmd_help(state: &AppState, chat_id: ChatId) -> osb_core::Result<()> {
    let text = "OSINT Bot Help\n\n\
        Available Commands:\n\
        /free <query> - Free search (12 results max)\n\
        /paid <query> - Paid search (full results)\n\
        /mystats - Your search statistics\n\
        /help - This help message\n\n\
        Query Examples:\n\
        /free wehostbd.com\n\
        /free target.com\n\
        /paid https://example.com\n\n\
        Note: 1 request per minute limit applies.";

    state.messenger.send_text(chat_id, text).await?;
    Ok(())
}

async fn cmd_add_group(
    state: &AppState,
    user_id: UserId,
    chat_id: ChatId,
    args: &str,
) -> osb_core::Result<()> {
    if !state.policy.authorize_admin_command(user_id) {
        state.messenger.send_text(chat_id, "Admin only command.").await?;
        return Ok(());
    }

    if args.trim().is_empty() {
        state
            .messenger
            .send_text(
                chat_id,
                "Please provide group ID.\nExample: /addgroup -1001234567890",
            )
            .await?;
        return Ok(());
    }

    let first = args.split_whitespace().next().unwrap_or("");
    let Ok(group_id) = first.parse::<i64>() else {
        state.messenger.send_text(chat_id, "Invalid group ID.").await?;
        return Ok(());
    };

    let text = match state.policy.add_group(group_id) {
        AddGroupOutcome::Added => format!("Group {group_id} added successfully."),
        AddGroupOutcome::AlreadyAdded => "Group already added.".to_string(),
    };
    state.messenger.send_text(chat_id, &text).await?;
    Ok(())
}

async fn cmd_stats(state: &AppState, user_id: UserId, chat_id: ChatId) -> osb_core::Result<()> {
    if !state.policy.authorize_admin_command(user_id) {
        state.messenger.send_text(chat_id, "Admin only command.").await?;
        return Ok(());
    }

    let tracked = state.limiter.lock().await.tracked_users();
    let text = format!(
        "Bot Statistics\n\
         Total groups: {}\n\
         Active sessions: {}\n\
         Rate limit: 1 request per {} seconds",
        state.policy.group_count(),
        tracked,
        state.cfg.rate_limit_window.as_secs(),
    );

    state.messenger.send_text(chat_id, &text).await?;
    Ok(())
}

async fn cmd_my_stats(state: &AppState, user_id: UserId, chat_id: ChatId) -> osb_core::Result<()> {
    let stats = state.usage.stats_for(user_id.0).await?;
    let text = format!(
        "Your Statistics\n\
         Total searches: {}\n\
         Free searches: {}\n\
         Paid searches: {}",
        stats.total, stats.free_count, stats.paid_count,
    );

    state.messenger.send_text(chat_id, &text).await?;
    Ok(())
}
