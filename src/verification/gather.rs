//! Context gatherer - executes a corrective action.
//!
//! # Cascade (first non-empty result wins)
//! 1. Specialist shard matching the action's hint or technology
//! 2. Per action kind:
//!    - Research: specialist by query alone, then the research shard
//!    - Docs: specialist by query alone, then documentation lookup, then the
//!      research shard
//!    - Tool: tool-synthesis engine
//!    - Decompose: fixed instruction, no external call
//!
//! A missing collaborator or a failing one is "no context", never an error.
//! Only cancellation propagates.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::types::{ActionKind, CorrectiveAction, VerifyError};
use crate::config::DEFAULT_CONTEXT_CHAR_BUDGET;
use crate::docs::DocsLookup;
use crate::shards::{ShardClass, ShardExecutor, ShardRoster, RESEARCHER};
use crate::synthesis::{ToolRequest, ToolSynthesizer, SYNTHESIS_CONFIDENCE};
use crate::util::truncate_chars;

const HINT_MATCH_SCORE: u32 = 100;
const NAME_MATCH_SCORE: u32 = 50;
const KEYWORD_MATCH_SCORE: u32 = 10;

/// Technology stem (found in a specialist's name) -> query keywords.
const TECH_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "browser",
        &[
            "browser", "devtools", "scraping", "scrape", "puppeteer", "playwright", "selenium",
            "headless", "dom",
        ],
    ),
    (
        "database",
        &[
            "sql", "postgres", "postgresql", "mysql", "sqlite", "migration", "schema", "orm",
        ],
    ),
    (
        "kubernetes",
        &["kubernetes", "k8s", "helm", "kubectl", "pod", "ingress"],
    ),
    (
        "frontend",
        &["react", "jsx", "tsx", "component", "css", "vue", "svelte"],
    ),
    (
        "security",
        &["cve", "vulnerability", "xss", "injection", "owasp", "csrf", "auth"],
    ),
    (
        "rust",
        &["cargo", "tokio", "crate", "lifetime", "borrow checker", "trait"],
    ),
    (
        "golang",
        &["goroutine", "go.mod", "gofmt", "golang", "channel"],
    ),
    (
        "cloud",
        &["aws", "s3", "lambda", "iam", "terraform", "gcp", "azure"],
    ),
];

/// Executes corrective actions against the available collaborators.
pub struct ContextGatherer {
    executor: Option<Arc<dyn ShardExecutor>>,
    roster: Option<Arc<dyn ShardRoster>>,
    synthesizer: Option<Arc<dyn ToolSynthesizer>>,
    docs: Option<Arc<dyn DocsLookup>>,
    char_budget: usize,
}

impl Default for ContextGatherer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextGatherer {
    /// A gatherer with no collaborators; only `Decompose` produces context.
    pub fn new() -> Self {
        Self {
            executor: None,
            roster: None,
            synthesizer: None,
            docs: None,
            char_budget: DEFAULT_CONTEXT_CHAR_BUDGET,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ShardExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_roster(mut self, roster: Arc<dyn ShardRoster>) -> Self {
        self.roster = Some(roster);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn ToolSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_docs(mut self, docs: Arc<dyn DocsLookup>) -> Self {
        self.docs = Some(docs);
        self
    }

    pub fn with_char_budget(mut self, char_budget: usize) -> Self {
        self.char_budget = char_budget;
        self
    }

    /// Execute `action` and return bounded context, possibly empty.
    pub async fn gather(
        &self,
        cancel: &CancellationToken,
        action: &CorrectiveAction,
    ) -> Result<String, VerifyError> {
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }

        let hinted = self.match_specialist(&action.query, action.hint());
        if let Some(specialist) = &hinted {
            if let Some(context) = self.run_shard(cancel, specialist, &action.query).await? {
                tracing::info!(specialist = %specialist, "Context from specialist");
                return Ok(context);
            }
        }

        let context = match action.kind {
            ActionKind::Research => {
                match self.retry_specialist(cancel, action, hinted.as_deref()).await? {
                    Some(context) => Some(context),
                    None => {
                        self.run_shard(cancel, RESEARCHER, &format!("research: {}", action.query))
                            .await?
                    }
                }
            }
            ActionKind::Docs => {
                match self.retry_specialist(cancel, action, hinted.as_deref()).await? {
                    Some(context) => Some(context),
                    None => match self.lookup_docs(cancel, &action.query).await? {
                        Some(context) => Some(context),
                        None => {
                            self.run_shard(
                                cancel,
                                RESEARCHER,
                                &format!("research docs: {}", action.query),
                            )
                            .await?
                        }
                    },
                }
            }
            ActionKind::Tool => self.synthesize(action).await,
            ActionKind::Decompose => Some(format!(
                "This task is too large to complete in one pass. Break it into smaller \
                 steps, implement each step completely, and verify it before moving on. \
                 Start with: {}",
                action.query
            )),
        };

        Ok(context
            .map(|c| truncate_chars(&c, self.char_budget))
            .unwrap_or_default())
    }

    /// Best-scoring executable specialist for `query`/`hint`.
    pub fn match_specialist(&self, query: &str, hint: Option<&str>) -> Option<String> {
        let roster = self.roster.as_ref()?;
        let executor = self.executor.as_ref()?;

        let query = query.to_lowercase();
        let hint = hint.map(str::to_lowercase);

        let mut best: Option<(u32, String)> = None;
        for shard in roster.list_shards() {
            if shard.class != ShardClass::Specialist || !executor.can_execute(&shard.name) {
                continue;
            }
            let score = score_specialist(&shard.name, &query, hint.as_deref());
            if score > 0 && best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, shard.name));
            }
        }

        best.map(|(_, name)| name)
    }

    /// Specialist match on the query alone, skipping one already tried.
    async fn retry_specialist(
        &self,
        cancel: &CancellationToken,
        action: &CorrectiveAction,
        already_tried: Option<&str>,
    ) -> Result<Option<String>, VerifyError> {
        match self.match_specialist(&action.query, None) {
            Some(name) if Some(name.as_str()) != already_tried => {
                self.run_shard(cancel, &name, &action.query).await
            }
            _ => Ok(None),
        }
    }

    async fn run_shard(
        &self,
        cancel: &CancellationToken,
        shard: &str,
        task: &str,
    ) -> Result<Option<String>, VerifyError> {
        let Some(executor) = &self.executor else {
            return Ok(None);
        };
        if !executor.can_execute(shard) {
            tracing::debug!(shard, "Shard not available for context gathering");
            return Ok(None);
        }
        match executor.execute(cancel, shard, task).await {
            Ok(output) if !output.trim().is_empty() => Ok(Some(output)),
            Ok(_) => Ok(None),
            Err(_) if cancel.is_cancelled() => Err(VerifyError::Cancelled),
            Err(e) => {
                tracing::warn!(shard, "Context shard failed: {:#}", e);
                Ok(None)
            }
        }
    }

    async fn lookup_docs(
        &self,
        cancel: &CancellationToken,
        query: &str,
    ) -> Result<Option<String>, VerifyError> {
        let Some(docs) = &self.docs else {
            return Ok(None);
        };
        match docs.lookup(cancel, query).await {
            Ok(found) => Ok(found.filter(|d| !d.trim().is_empty())),
            Err(_) if cancel.is_cancelled() => Err(VerifyError::Cancelled),
            Err(e) => {
                tracing::warn!("Documentation lookup failed: {:#}", e);
                Ok(None)
            }
        }
    }

    async fn synthesize(&self, action: &CorrectiveAction) -> Option<String> {
        let synthesizer = self.synthesizer.as_ref()?;
        let request = ToolRequest {
            name: action.query.clone(),
            purpose: action.reason.clone(),
            confidence: SYNTHESIS_CONFIDENCE,
        };
        match synthesizer.generate_tool(request).await {
            Ok(tool) => Some(format!(
                "A tool was generated for this task and is available to you.\nTool: {}\nDescription: {}",
                tool.name, tool.description
            )),
            Err(e) => {
                tracing::warn!("Tool synthesis failed: {:#}", e);
                None
            }
        }
    }
}

/// Score a specialist against a lowercased query and hint.
fn score_specialist(name: &str, query: &str, hint: Option<&str>) -> u32 {
    let name = name.to_lowercase();
    let stem = specialist_stem(&name);
    let mut score = 0;

    if let Some(hint) = hint {
        if hint == name || hint == stem {
            score += HINT_MATCH_SCORE;
        } else if hint.contains(&name) || hint.contains(stem) {
            score += NAME_MATCH_SCORE;
        }
    }
    if query.contains(&name) || (stem.len() > 2 && query.contains(stem)) {
        score += NAME_MATCH_SCORE;
    }

    let words = words(query);
    for (tech, keywords) in TECH_KEYWORDS {
        if !name.contains(tech) {
            continue;
        }
        let hits = keywords
            .iter()
            .filter(|k| {
                if k.contains(' ') {
                    query.contains(*k)
                } else {
                    words.iter().any(|w| w == *k)
                }
            })
            .count() as u32;
        score += hits * KEYWORD_MATCH_SCORE;
    }

    score
}

/// `browser_specialist` -> `browser`.
fn specialist_stem(name: &str) -> &str {
    ["_specialist", "-specialist", "_expert", "-expert"]
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(name)
}

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '_'))
        .map(|w| w.trim_matches('.'))
        .filter(|w| !w.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shards::{ShardHandler, ShardRegistry};
    use crate::synthesis::SynthesizedTool;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Shard that records the task it was given and replies with a fixed text.
    struct Recorder {
        reply: String,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ShardHandler for Recorder {
        async fn run(&self, _cancel: &CancellationToken, task: &str) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push(task.to_string());
            Ok(self.reply.clone())
        }
    }

    fn registry(
        calls: &Arc<Mutex<Vec<String>>>,
        specialists: &[&str],
    ) -> Arc<ShardRegistry> {
        let mut registry = ShardRegistry::new();
        registry.register(
            RESEARCHER,
            ShardClass::BuiltIn,
            Arc::new(Recorder {
                reply: "research notes".to_string(),
                calls: Arc::clone(calls),
            }),
        );
        for name in specialists {
            registry.register(
                *name,
                ShardClass::Specialist,
                Arc::new(Recorder {
                    reply: format!("{} knowledge", name),
                    calls: Arc::clone(calls),
                }),
            );
        }
        Arc::new(registry)
    }

    fn gatherer(registry: Arc<ShardRegistry>) -> ContextGatherer {
        ContextGatherer::new()
            .with_executor(registry.clone())
            .with_roster(registry)
    }

    struct StaticDocs(Option<String>);

    #[async_trait]
    impl DocsLookup for StaticDocs {
        async fn lookup(
            &self,
            _cancel: &CancellationToken,
            _query: &str,
        ) -> anyhow::Result<Option<String>> {
            Ok(self.0.clone())
        }
    }

    struct Synth;

    #[async_trait]
    impl ToolSynthesizer for Synth {
        async fn generate_tool(&self, request: ToolRequest) -> anyhow::Result<SynthesizedTool> {
            assert_eq!(request.confidence, SYNTHESIS_CONFIDENCE);
            Ok(SynthesizedTool {
                name: request.name,
                description: format!("does {}", request.purpose),
            })
        }
    }

    #[tokio::test]
    async fn docs_without_credential_falls_through_to_research_docs() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gatherer = gatherer(registry(&calls, &[]));
        let action = CorrectiveAction::new(ActionKind::Docs, "serde flatten attribute", "api");

        let context = gatherer
            .gather(&CancellationToken::new(), &action)
            .await
            .unwrap();

        assert_eq!(context, "research notes");
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &["research docs: serde flatten attribute".to_string()]
        );
    }

    #[tokio::test]
    async fn docs_lookup_used_before_research() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gatherer = gatherer(registry(&calls, &[]))
            .with_docs(Arc::new(StaticDocs(Some("serde docs".to_string()))));
        let action = CorrectiveAction::new(ActionKind::Docs, "serde flatten", "api");

        let context = gatherer
            .gather(&CancellationToken::new(), &action)
            .await
            .unwrap();

        assert_eq!(context, "serde docs");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn research_prefixes_query() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gatherer = gatherer(registry(&calls, &["database_specialist"]));
        let action = CorrectiveAction::new(ActionKind::Research, "retry semantics", "");

        gatherer
            .gather(&CancellationToken::new(), &action)
            .await
            .unwrap();

        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &["research: retry semantics".to_string()]
        );
    }

    #[tokio::test]
    async fn technology_keywords_pick_specialist() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gatherer = gatherer(registry(
            &calls,
            &["browser_specialist", "database_specialist"],
        ));
        let action = CorrectiveAction::new(
            ActionKind::Research,
            "headless scraping with devtools protocol",
            "",
        );

        let context = gatherer
            .gather(&CancellationToken::new(), &action)
            .await
            .unwrap();

        assert_eq!(context, "browser_specialist knowledge");
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &["headless scraping with devtools protocol".to_string()]
        );
    }

    #[tokio::test]
    async fn hint_equality_beats_keywords() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gatherer = gatherer(registry(
            &calls,
            &["browser_specialist", "database_specialist"],
        ));
        let action = CorrectiveAction::new(ActionKind::Docs, "scraping results into sqlite", "")
            .with_hint("database_specialist");

        let context = gatherer
            .gather(&CancellationToken::new(), &action)
            .await
            .unwrap();

        assert_eq!(context, "database_specialist knowledge");
    }

    #[test]
    fn keywords_match_whole_words() {
        assert_eq!(score_specialist("browser_specialist", "random numbers", None), 0);
        assert!(score_specialist("browser_specialist", "parse the dom tree", None) > 0);
    }

    #[tokio::test]
    async fn tool_action_surfaces_synthesized_tool() {
        let gatherer = ContextGatherer::new().with_synthesizer(Arc::new(Synth));
        let action = CorrectiveAction::new(ActionKind::Tool, "json_schema_validator", "validate payloads");

        let context = gatherer
            .gather(&CancellationToken::new(), &action)
            .await
            .unwrap();

        assert!(context.contains("json_schema_validator"));
        assert!(context.contains("does validate payloads"));
    }

    #[tokio::test]
    async fn missing_collaborators_mean_no_context() {
        let gatherer = ContextGatherer::new();
        for kind in [ActionKind::Research, ActionKind::Docs, ActionKind::Tool] {
            let action = CorrectiveAction::new(kind, "anything", "");
            let context = gatherer
                .gather(&CancellationToken::new(), &action)
                .await
                .unwrap();
            assert!(context.is_empty());
        }
    }

    #[tokio::test]
    async fn decompose_embeds_query_without_calls() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gatherer = gatherer(registry(&calls, &[]));
        let action = CorrectiveAction::new(ActionKind::Decompose, "build the scheduler", "");

        let context = gatherer
            .gather(&CancellationToken::new(), &action)
            .await
            .unwrap();

        assert!(context.contains("smaller"));
        assert!(context.contains("build the scheduler"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_is_capped() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let gatherer = gatherer(registry(&calls, &[])).with_char_budget(8);
        let action = CorrectiveAction::new(ActionKind::Research, "x", "");

        let context = gatherer
            .gather(&CancellationToken::new(), &action)
            .await
            .unwrap();

        assert!(context.starts_with("research"));
        assert!(context.ends_with(crate::util::TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn cancelled_scope_stops_gathering() {
        let gatherer = ContextGatherer::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let action = CorrectiveAction::new(ActionKind::Decompose, "x", "");
        assert!(matches!(
            gatherer.gather(&cancel, &action).await,
            Err(VerifyError::Cancelled)
        ));
    }
}
