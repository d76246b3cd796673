use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration, loaded once at startup from env vars (plus an
/// optional `.env` file). No runtime reload.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub search_api_url: String,
    pub admin_ids: Vec<i64>,
    pub authorized_groups: Vec<i64>,

    // Query validation
    pub query_min_len: usize,
    pub query_max_len: usize,
    pub blocked_terms: Vec<String>,

    // Search behavior
    pub search_timeout: Duration,
    pub free_result_limit: usize,

    // Rate limiting
    pub rate_limit_window: Duration,

    // Runtime paths
    pub temp_dir: PathBuf,
    pub usage_db_path: PathBuf,

    // Usage recording
    pub usage_queue_depth: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let bot_token = env_str("BOT_TOKEN").unwrap_or_default();
        let search_api_url = env_str("SEARCH_API_URL").unwrap_or_default();
        let admin_ids = parse_csv_i64(env_str("ADMIN_IDS"));

        if bot_token.trim().is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if search_api_url.trim().is_empty() {
            return Err(Error::Config(
                "SEARCH_API_URL environment variable is required".to_string(),
            ));
        }
        if admin_ids.is_empty() {
            return Err(Error::Config(
                "ADMIN_IDS environment variable is required".to_string(),
            ));
        }

        // Optional group allow-list seed. Empty means "no restriction".
        let authorized_groups = parse_csv_i64(env_str("GROUP_IDS"));

        // Query validation bounds + blacklist.
        let query_min_len = env_usize("QUERY_MIN_LEN").unwrap_or(3);
        let query_max_len = env_usize("QUERY_MAX_LEN").unwrap_or(100);
        let blocked_terms = parse_csv_lower(
            env_str("BLOCKED_TERMS").or_else(|| Some("admin,password,login,wp-login".to_string())),
        );

        // Upstream call behavior.
        let search_timeout = Duration::from_secs(env_u64("SEARCH_TIMEOUT_SECS").unwrap_or(30));
        let free_result_limit = env_usize("FREE_RESULT_LIMIT").unwrap_or(12).max(1);

        // Rate limiting: one request per window per user, across all commands.
        let rate_limit_window = Duration::from_secs(env_u64("RATE_LIMIT_WINDOW").unwrap_or(60));

        // Export artifacts are written here and deleted after delivery.
        let temp_dir = PathBuf::from(env_str("TEMP_DIR").unwrap_or("/tmp/osb".to_string()));
        fs::create_dir_all(&temp_dir)?;

        let usage_db_path = env_str("USAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| temp_dir.join("usage.db"));

        let usage_queue_depth = env_usize("USAGE_QUEUE_DEPTH").unwrap_or(64).max(1);

        Ok(Self {
            bot_token,
            search_api_url,
            admin_ids,
            authorized_groups,
            query_min_len,
            query_max_len,
            blocked_terms,
            search_timeout,
            free_result_limit,
            rate_limit_window,
            temp_dir,
            usage_db_path,
            usage_queue_depth,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn parse_csv_lower(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_parsing_skips_junk() {
        let ids = parse_csv_i64(Some(" 1, 2,,x, -100 ".to_string()));
        assert_eq!(ids, vec![1, 2, -100]);
    }

    #[test]
    fn csv_lower_normalizes() {
        let terms = parse_csv_lower(Some("Admin, WP-Login ,".to_string()));
        assert_eq!(terms, vec!["admin".to_string(), "wp-login".to_string()]);
    }
}
