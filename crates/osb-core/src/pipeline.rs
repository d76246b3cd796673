//! Per-request query pipeline.
//!
//! One invocation per inbound search command:
//! validate → rate-limit → authorize → upstream search → format/export →
//! deliver. Every early exit sends its user-facing reason through the
//! messaging port and reports a tagged outcome; a delivered result also
//! enqueues a best-effort usage event.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    config::Config,
    domain::{ChatId, Tier, UserId},
    export::ExportArtifact,
    formatting,
    messaging::port::MessagingPort,
    policy::AccessPolicy,
    query::{Query, QueryRules},
    ratelimit::{RateDecision, RateLimiter},
    search::{SearchClient, SearchHits, SearchOutcome},
    usage::{UsageEvent, UsageRecorder},
    Result,
};

const UPSTREAM_FAILURE_TEXT: &str = "Search failed. Please try again later.";
const NO_RESULTS_QUERY_TEXT: &str = "No results found for your query.";
const GROUP_ONLY_TEXT: &str = "This command only works in authorized groups.";
const PAID_DENIED_TEXT: &str =
    "Paid search is only available for admins.\nContact admin for access.";

/// One inbound search command, as supplied by the transport layer.
#[derive(Clone, Debug)]
pub struct SearchRequest {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub tier: Tier,
    pub raw_query: String,
}

/// Terminal state of a pipeline run. The user-facing message has already
/// been sent by the time this is returned; callers only log/inspect it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    Delivered { shown: usize, total: usize },
    Rejected(String),
    Failed(String),
}

pub struct QueryPipeline {
    cfg: Arc<Config>,
    rules: QueryRules,
    search: SearchClient,
    limiter: Arc<Mutex<RateLimiter>>,
    policy: Arc<AccessPolicy>,
    usage: UsageRecorder,
}

impl QueryPipeline {
    pub fn new(
        cfg: Arc<Config>,
        search: SearchClient,
        limiter: Arc<Mutex<RateLimiter>>,
        policy: Arc<AccessPolicy>,
        usage: UsageRecorder,
    ) -> Self {
        let rules = QueryRules {
            min_len: cfg.query_min_len,
            max_len: cfg.query_max_len,
            blocked_terms: cfg.blocked_terms.clone(),
        };
        Self {
            cfg,
            rules,
            search,
            limiter,
            policy,
            usage,
        }
    }

    pub async fn run(
        &self,
        req: &SearchRequest,
        messenger: &dyn MessagingPort,
    ) -> Result<PipelineOutcome> {
        // Received → Validated. An invalid query never reaches the client.
        let query = match Query::parse(&req.raw_query, &self.rules) {
            Ok(q) => q,
            Err(invalid) => {
                let reason = invalid.user_message();
                messenger.send_text(req.chat_id, &reason).await?;
                return Ok(PipelineOutcome::Rejected(reason));
            }
        };

        // Validated → RateChecked. One global limiter across tiers; the
        // lock covers only the check-and-update, never the network call.
        let decision = self.limiter.lock().await.check(req.user_id);
        if let RateDecision::Deny { wait_secs } = decision {
            let reason = format!("Rate limit exceeded. Please wait {wait_secs} seconds.");
            messenger.send_text(req.chat_id, &reason).await?;
            return Ok(PipelineOutcome::Rejected(reason));
        }

        // RateChecked → Authorized.
        if let Some(reason) = self.authorization_rejection(req) {
            messenger.send_text(req.chat_id, reason).await?;
            return Ok(PipelineOutcome::Rejected(reason.to_string()));
        }

        // Authorized → Searching.
        let processing = messenger
            .send_text(
                req.chat_id,
                &format!("Processing {} search...", req.tier.label()),
            )
            .await?;

        match self.search.search(&query).await {
            SearchOutcome::UpstreamFailure => {
                // Cause already logged by the client; the user gets the
                // generic text, never the upstream body.
                messenger.edit_text(processing, UPSTREAM_FAILURE_TEXT).await?;
                Ok(PipelineOutcome::Failed(UPSTREAM_FAILURE_TEXT.to_string()))
            }
            SearchOutcome::NoResults => {
                messenger.edit_text(processing, NO_RESULTS_QUERY_TEXT).await?;
                Ok(PipelineOutcome::Rejected(NO_RESULTS_QUERY_TEXT.to_string()))
            }
            SearchOutcome::Success(hits) => {
                let outcome = self.deliver(req, &query, hits, messenger).await?;
                let _ = messenger.delete_message(processing).await;
                Ok(outcome)
            }
        }
    }

    fn authorization_rejection(&self, req: &SearchRequest) -> Option<&'static str> {
        match req.tier {
            Tier::Free => (!self.policy.authorize_group(req.chat_id)).then_some(GROUP_ONLY_TEXT),
            Tier::Paid => (!self.policy.authorize_paid(req.user_id, req.chat_id))
                .then_some(PAID_DENIED_TEXT),
        }
    }

    // Formatted → Delivered.
    async fn deliver(
        &self,
        req: &SearchRequest,
        query: &Query,
        hits: SearchHits,
        messenger: &dyn MessagingPort,
    ) -> Result<PipelineOutcome> {
        let total = hits.records.len();

        // Paid tier with an upstream download link: direct link message,
        // no local export artifact.
        if req.tier == Tier::Paid {
            if let Some(rel) = &hits.download {
                let text = format!(
                    "Full dataset available at:\n{}\n\nResults found: {}\nTime taken: {:.2}s\nSession: {}",
                    self.search.download_url(rel),
                    total,
                    hits.elapsed_seconds,
                    hits.session.as_ref().map(|s| s.0.as_str()).unwrap_or("N/A"),
                );
                messenger.send_text(req.chat_id, &text).await?;
                self.record_usage(req, query, total);
                return Ok(PipelineOutcome::Delivered {
                    shown: total,
                    total,
                });
            }
        }

        let limit = match req.tier {
            Tier::Free => Some(self.cfg.free_result_limit),
            Tier::Paid => None,
        };
        let shown = formatting::effective_count(total, limit);

        let mut summary = formatting::render_summary(&hits.records, limit);
        if shown < total {
            summary.push_str(&format!(
                "\nShowing {shown} out of {total} results. Use /paid for full results."
            ));
        }
        messenger.send_text(req.chat_id, &summary).await?;

        let content = formatting::render_export(&hits.records, limit);
        let artifact = ExportArtifact::write(&self.cfg.temp_dir, req.tier, &content)?;
        let caption = format!(
            "{} Search Results\nQuery: {}\nTotal results found: {}\nResults in file: {}\nTime taken: {:.2}s",
            req.tier.title(),
            query.text(),
            total,
            shown,
            hits.elapsed_seconds,
        );

        let sent = messenger
            .send_document(req.chat_id, artifact.path(), artifact.filename(), &caption)
            .await;
        // The export is transient either way: removed after delivery, and
        // not left behind on a failed send.
        artifact.remove();
        sent?;

        self.record_usage(req, query, total);
        Ok(PipelineOutcome::Delivered { shown, total })
    }

    fn record_usage(&self, req: &SearchRequest, query: &Query, total: usize) {
        self.usage.record(UsageEvent {
            user_id: req.user_id.0,
            query: query.text().to_string(),
            tier: req.tier,
            result_count: total,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::Mutex as StdMutex,
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::{
        domain::{MessageId, MessageRef},
        messaging::types::MessagingCapabilities,
        usage::UsageStore,
    };

    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Sent {
        Text(String),
        Edit(String),
        Document {
            path: PathBuf,
            filename: String,
            caption: String,
            content: String,
        },
        Deleted,
    }

    #[derive(Default)]
    struct RecordingMessenger {
        sent: StdMutex<Vec<Sent>>,
    }

    impl RecordingMessenger {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn texts(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Text(t) => Some(t),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl MessagingPort for RecordingMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_edit: true,
                supports_documents: true,
                max_message_len: 4096,
            }
        }

        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(Sent::Text(text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(sent.len() as i32),
            })
        }

        async fn edit_text(&self, _msg: MessageRef, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Edit(text.to_string()));
            Ok(())
        }

        async fn delete_message(&self, _msg: MessageRef) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Deleted);
            Ok(())
        }

        async fn send_document(
            &self,
            chat_id: ChatId,
            path: &Path,
            filename: &str,
            caption: &str,
        ) -> Result<MessageRef> {
            // Read at send time: the artifact must exist while delivering.
            let content = std::fs::read_to_string(path)?;
            let mut sent = self.sent.lock().unwrap();
            sent.push(Sent::Document {
                path: path.to_path_buf(),
                filename: filename.to_string(),
                caption: caption.to_string(),
                content,
            });
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(sent.len() as i32),
            })
        }
    }

    /// Minimal canned-response HTTP server for exercising the full client path.
    async fn serve_json(body: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{addr}/search")
    }

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let pid = std::process::id();
        let dir = PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_config(temp_dir: PathBuf) -> Arc<Config> {
        Arc::new(Config {
            bot_token: "test".to_string(),
            search_api_url: "http://127.0.0.1:9/search".to_string(),
            admin_ids: vec![7],
            authorized_groups: vec![],
            query_min_len: 3,
            query_max_len: 100,
            blocked_terms: vec![
                "admin".to_string(),
                "password".to_string(),
                "login".to_string(),
                "wp-login".to_string(),
            ],
            search_timeout: Duration::from_secs(5),
            free_result_limit: 12,
            rate_limit_window: Duration::from_secs(60),
            usage_db_path: temp_dir.join("usage.db"),
            temp_dir,
            usage_queue_depth: 8,
        })
    }

    struct Fixture {
        pipeline: QueryPipeline,
        store: UsageStore,
        temp_dir: PathBuf,
    }

    async fn fixture(endpoint: &str, groups: Vec<i64>) -> Fixture {
        let temp_dir = tmp_dir("osb-pipeline-test");
        let cfg = test_config(temp_dir.clone());
        let store = UsageStore::open_in_memory().await.unwrap();
        let pipeline = QueryPipeline::new(
            cfg.clone(),
            SearchClient::new(endpoint, cfg.search_timeout).unwrap(),
            Arc::new(Mutex::new(RateLimiter::new(cfg.rate_limit_window))),
            Arc::new(AccessPolicy::new(cfg.admin_ids.clone(), groups)),
            UsageRecorder::spawn(store.clone(), cfg.usage_queue_depth),
        );
        Fixture {
            pipeline,
            store,
            temp_dir,
        }
    }

    fn request(tier: Tier, raw: &str) -> SearchRequest {
        SearchRequest {
            user_id: UserId(100),
            chat_id: ChatId(-100500),
            tier,
            raw_query: raw.to_string(),
        }
    }

    // No server is listening at the fixture's default endpoint: if the
    // pipeline ever reached the search client, the run would come back as
    // Failed instead of Rejected.
    const DEAD_ENDPOINT: &str = "http://127.0.0.1:9/search";

    #[tokio::test]
    async fn invalid_queries_are_rejected_before_the_search_call() {
        let fx = fixture(DEAD_ENDPOINT, vec![]).await;
        let messenger = RecordingMessenger::default();

        let out = fx
            .pipeline
            .run(&request(Tier::Free, "ab"), &messenger)
            .await
            .unwrap();
        assert_eq!(
            out,
            PipelineOutcome::Rejected("Query too short (minimum 3 characters)".to_string())
        );

        let out = fx
            .pipeline
            .run(&request(Tier::Free, &"a".repeat(200)), &messenger)
            .await
            .unwrap();
        assert_eq!(
            out,
            PipelineOutcome::Rejected("Query too long (maximum 100 characters)".to_string())
        );

        let out = fx
            .pipeline
            .run(&request(Tier::Free, "wp-login.php"), &messenger)
            .await
            .unwrap();
        assert_eq!(
            out,
            PipelineOutcome::Rejected("Query contains restricted terms".to_string())
        );
    }

    #[tokio::test]
    async fn rate_limit_is_global_across_tiers() {
        let fx = fixture(DEAD_ENDPOINT, vec![]).await;
        let messenger = RecordingMessenger::default();

        // First admitted request fails at the upstream (nothing listening),
        // which still consumes the rate-limit permit.
        let first = fx
            .pipeline
            .run(&request(Tier::Free, "example.com"), &messenger)
            .await
            .unwrap();
        assert!(matches!(first, PipelineOutcome::Failed(_)));

        let second = fx
            .pipeline
            .run(&request(Tier::Paid, "example.com"), &messenger)
            .await
            .unwrap();
        match second {
            PipelineOutcome::Rejected(reason) => {
                assert!(reason.starts_with("Rate limit exceeded."), "{reason}")
            }
            other => panic!("expected rate-limit rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn free_tier_requires_an_authorized_group() {
        let fx = fixture(DEAD_ENDPOINT, vec![-100123]).await;
        let messenger = RecordingMessenger::default();

        let out = fx
            .pipeline
            .run(&request(Tier::Free, "example.com"), &messenger)
            .await
            .unwrap();
        assert_eq!(out, PipelineOutcome::Rejected(GROUP_ONLY_TEXT.to_string()));
        assert_eq!(messenger.texts(), vec![GROUP_ONLY_TEXT.to_string()]);
    }

    #[tokio::test]
    async fn paid_tier_is_denied_to_non_admins_in_private_chats() {
        let fx = fixture(DEAD_ENDPOINT, vec![]).await;
        let messenger = RecordingMessenger::default();

        let req = SearchRequest {
            user_id: UserId(100),
            chat_id: ChatId(100), // private chat
            tier: Tier::Paid,
            raw_query: "example.com".to_string(),
        };
        let out = fx.pipeline.run(&req, &messenger).await.unwrap();
        assert_eq!(out, PipelineOutcome::Rejected(PAID_DENIED_TEXT.to_string()));
    }

    #[tokio::test]
    async fn admin_can_run_paid_in_private_chat() {
        let endpoint = serve_json(
            r#"{"status":"success","data":[{"URL":"a.com","Username":"u","Password":"p"}],"time_taken_seconds":1.5}"#.to_string(),
        )
        .await;
        let fx = fixture(&endpoint, vec![]).await;
        let messenger = RecordingMessenger::default();

        let req = SearchRequest {
            user_id: UserId(7), // admin
            chat_id: ChatId(7),
            tier: Tier::Paid,
            raw_query: "example.com".to_string(),
        };
        let out = fx.pipeline.run(&req, &messenger).await.unwrap();
        assert_eq!(out, PipelineOutcome::Delivered { shown: 1, total: 1 });

        let _ = std::fs::remove_dir_all(&fx.temp_dir);
    }

    #[tokio::test]
    async fn upstream_fail_status_becomes_generic_failure_text() {
        let endpoint = serve_json(r#"{"status":"fail"}"#.to_string()).await;
        let fx = fixture(&endpoint, vec![]).await;
        let messenger = RecordingMessenger::default();

        let out = fx
            .pipeline
            .run(&request(Tier::Free, "example.com"), &messenger)
            .await
            .unwrap();
        assert_eq!(out, PipelineOutcome::Failed(UPSTREAM_FAILURE_TEXT.to_string()));

        // The raw upstream body never reaches the user.
        let edits: Vec<_> = messenger
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Edit(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(edits, vec![UPSTREAM_FAILURE_TEXT.to_string()]);
    }

    #[tokio::test]
    async fn empty_data_is_reported_as_no_results() {
        let endpoint =
            serve_json(r#"{"status":"success","data":[],"time_taken_seconds":0.1}"#.to_string())
                .await;
        let fx = fixture(&endpoint, vec![]).await;
        let messenger = RecordingMessenger::default();

        let out = fx
            .pipeline
            .run(&request(Tier::Free, "example.com"), &messenger)
            .await
            .unwrap();
        assert_eq!(out, PipelineOutcome::Rejected(NO_RESULTS_QUERY_TEXT.to_string()));

        // No export is produced for an empty result set.
        assert!(!messenger
            .sent()
            .iter()
            .any(|s| matches!(s, Sent::Document { .. })));
    }

    #[tokio::test]
    async fn free_delivery_sends_summary_and_export_then_deletes_the_file() {
        let endpoint = serve_json(
            r#"{"status":"success","data":[{"URL":"a.com","Username":"u","Password":"p"}],"time_taken_seconds":1.5}"#.to_string(),
        )
        .await;
        let fx = fixture(&endpoint, vec![]).await;
        let messenger = RecordingMessenger::default();

        let out = fx
            .pipeline
            .run(&request(Tier::Free, "example.com"), &messenger)
            .await
            .unwrap();
        assert_eq!(out, PipelineOutcome::Delivered { shown: 1, total: 1 });

        let sent = messenger.sent();
        let summary = messenger.texts()[1].clone(); // after the processing message
        assert!(summary.contains("a.com"));
        assert!(summary.contains("u"));
        assert!(summary.contains("p"));

        let doc = sent
            .iter()
            .find_map(|s| match s {
                Sent::Document {
                    path,
                    filename,
                    caption,
                    content,
                } => Some((path.clone(), filename.clone(), caption.clone(), content.clone())),
                _ => None,
            })
            .expect("export document sent");
        assert!(doc.1.starts_with("free_results_"));
        assert!(doc.2.contains("Free Search Results"));
        assert!(doc.2.contains("Query: example.com"));
        assert!(doc.2.contains("Time taken: 1.50s"));
        assert!(doc.3.contains("URL: a.com"));
        assert!(doc.3.contains("Username: u"));
        assert!(doc.3.contains("Password: p"));

        // Deleted after delivery.
        assert!(!doc.0.exists());

        // Usage row recorded through the background queue.
        for _ in 0..50 {
            if fx.store.stats_for(100).await.unwrap().free_count == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fx.store.stats_for(100).await.unwrap().free_count, 1);

        let _ = std::fs::remove_dir_all(&fx.temp_dir);
    }

    #[tokio::test]
    async fn free_tier_truncates_summary_and_export_identically() {
        let records: Vec<String> = (0..20)
            .map(|i| format!(r#"{{"URL":"site{i}.com","Username":"u{i}","Password":"p{i}"}}"#))
            .collect();
        let body = format!(
            r#"{{"status":"success","data":[{}],"time_taken_seconds":2.0}}"#,
            records.join(",")
        );
        let endpoint = serve_json(body).await;
        let fx = fixture(&endpoint, vec![]).await;
        let messenger = RecordingMessenger::default();

        let out = fx
            .pipeline
            .run(&request(Tier::Free, "example.com"), &messenger)
            .await
            .unwrap();
        assert_eq!(out, PipelineOutcome::Delivered { shown: 12, total: 20 });

        let summary = messenger.texts()[1].clone();
        assert!(summary.contains("Showing 12 out of 20 results. Use /paid for full results."));
        assert_eq!(summary.matches("Result ").count(), 12);

        let content = messenger
            .sent()
            .into_iter()
            .find_map(|s| match s {
                Sent::Document { content, .. } => Some(content),
                _ => None,
            })
            .unwrap();
        assert_eq!(content.matches("URL: ").count(), 12);

        let _ = std::fs::remove_dir_all(&fx.temp_dir);
    }

    #[tokio::test]
    async fn paid_download_link_replaces_the_export() {
        let endpoint = serve_json(
            r#"{"status":"success","data":[{"URL":"a.com"}],"time_taken_seconds":0.7,"download":"/files/x.zip","used_session":"s-9"}"#.to_string(),
        )
        .await;
        let fx = fixture(&endpoint, vec![]).await;
        let messenger = RecordingMessenger::default();

        let req = SearchRequest {
            user_id: UserId(100),
            chat_id: ChatId(-100500),
            tier: Tier::Paid,
            raw_query: "example.com".to_string(),
        };
        let out = fx.pipeline.run(&req, &messenger).await.unwrap();
        assert_eq!(out, PipelineOutcome::Delivered { shown: 1, total: 1 });

        let link_msg = messenger.texts()[1].clone();
        assert!(link_msg.contains("/files/x.zip"));
        assert!(link_msg.starts_with("Full dataset available at:\nhttp://"));
        assert!(link_msg.contains("Session: s-9"));

        // No local export artifact for a download-link delivery.
        assert!(!messenger
            .sent()
            .iter()
            .any(|s| matches!(s, Sent::Document { .. })));
        assert_eq!(std::fs::read_dir(&fx.temp_dir).unwrap().count(), 0);

        let _ = std::fs::remove_dir_all(&fx.temp_dir);
    }
}
