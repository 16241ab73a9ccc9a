//! The context assembler.
//!
//! `Unassembled → Assembling → Assembled | PartiallyAssembled`
//!
//! Entries are resolved one at a time in manifest order. Each run gets its
//! own connection manager, shut down exactly once when the loop ends, even
//! if resolution panicked. If the run future is dropped instead, the manager
//! closes its sessions as it goes away.

use avs_config::AppConfig;
use avs_core::error::{AssetError, Error, ToolError};
use avs_core::event::{AssemblyEvent, EventBus};
use avs_core::manifest::{ContextManifestItem, Resolution, Strategy};
use avs_core::{ValueStory, load_story};
use avs_research::ResearchDispatcher;
use avs_tools::{ConnectionManager, LocalAssetResolver, SessionLauncher, StdioLauncher, ToolRouter};
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a single manifest entry ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum EntryOutcome {
    Resolved,
    /// The error text that was written into the entry.
    Failed(String),
    /// Left untouched, with the reason.
    Skipped(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub index: usize,
    pub label: String,
    pub strategy: Strategy,
    pub outcome: EntryOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyState {
    /// Every resolvable entry succeeded.
    Assembled,
    /// At least one entry carries error or warning text.
    PartiallyAssembled,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub run_id: Uuid,
    pub story_id: String,
    pub entries: Vec<EntryReport>,
    pub sessions_closed: usize,
    pub state: AssemblyState,
}

impl AssemblyReport {
    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, EntryOutcome::Failed(_)))
            .count()
    }

    pub fn resolved(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome == EntryOutcome::Resolved)
            .count()
    }
}

/// The briefcase plus what happened while building it.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub story: ValueStory,
    pub report: AssemblyReport,
}

/// Owned copy of an entry's strategy, so the entry can be written afterwards.
enum Work {
    Tool { name: String, arguments: Value },
    Search(String),
    File(String),
    Nothing,
}

impl Work {
    fn of(item: &ContextManifestItem) -> Self {
        let resolution = item.resolution();
        match &resolution {
            Resolution::ToolCall { tool_name, .. } => Self::Tool {
                name: tool_name.to_string(),
                arguments: resolution.tool_arguments(),
            },
            Resolution::SearchQuery(query) => Self::Search(query.to_string()),
            Resolution::LocalFile(path) => Self::File(path.to_string()),
            Resolution::Unresolvable => Self::Nothing,
        }
    }
}

pub struct ContextAssembler {
    research: Arc<ResearchDispatcher>,
    launcher: Arc<dyn SessionLauncher>,
    assets: LocalAssetResolver,
    call_timeout: Duration,
    events: Arc<EventBus>,
}

impl ContextAssembler {
    pub fn new(
        research: Arc<ResearchDispatcher>,
        launcher: Arc<dyn SessionLauncher>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            research,
            launcher,
            assets: LocalAssetResolver::default(),
            call_timeout: Duration::from_secs(120),
            events,
        }
    }

    /// Wire up the production components from configuration.
    pub fn from_config(config: &AppConfig, events: Arc<EventBus>) -> Self {
        let research = Arc::new(ResearchDispatcher::from_config(&config.research));
        let launcher = Arc::new(StdioLauncher::new(config.tools.handshake_timeout()));
        Self::new(research, launcher, events)
            .with_assets(LocalAssetResolver::new(config.assembly.file_read_timeout()))
            .with_call_timeout(config.tools.call_timeout())
    }

    pub fn with_assets(mut self, assets: LocalAssetResolver) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Load a task document and assemble it, resolving relative file paths
    /// against the document's directory.
    pub async fn assemble_file(&self, path: &Path) -> Result<Assembly, Error> {
        let story = load_story(path).await?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        self.assemble(story, base_dir).await
    }

    /// Resolve every manifest entry and stamp the completion metadata.
    ///
    /// Only an invalid document or a panic during resolution is an error;
    /// per-entry failures are recorded in the entry and the report.
    pub async fn assemble(&self, mut story: ValueStory, base_dir: &Path) -> Result<Assembly, Error> {
        story.validate_tool_servers()?;

        let run_id = Uuid::new_v4();
        let story_id = story.metadata.story_id.clone();
        info!(
            run_id = %run_id,
            story_id = %story_id,
            entries = story.context_manifest.len(),
            servers = story.mcp_servers.len(),
            "Assembling value story"
        );
        self.events.publish(AssemblyEvent::Started {
            run_id,
            story_id: story_id.clone(),
            entries: story.context_manifest.len(),
            timestamp: Utc::now(),
        });

        let router = (!story.mcp_servers.is_empty()).then(|| {
            let manager = ConnectionManager::new(story.mcp_servers.clone(), self.launcher.clone());
            ToolRouter::new(Arc::new(manager), self.call_timeout)
        });

        let outcome = AssertUnwindSafe(self.resolve_entries(
            run_id,
            &mut story.context_manifest,
            router.as_ref(),
            base_dir,
        ))
        .catch_unwind()
        .await;

        let sessions_closed = match &router {
            Some(router) => router.manager().shutdown().await,
            None => 0,
        };
        self.events.publish(AssemblyEvent::SessionsClosed {
            run_id,
            count: sessions_closed,
            timestamp: Utc::now(),
        });

        let entries = outcome.map_err(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(run_id = %run_id, reason = %reason, "Assembly aborted by panic");
            Error::Internal(format!("assembly of {story_id} panicked: {reason}"))
        })?;

        story.mark_assembled(Utc::now());

        let report = AssemblyReport {
            run_id,
            story_id: story_id.clone(),
            state: if entries.iter().any(|e| matches!(e.outcome, EntryOutcome::Failed(_))) {
                AssemblyState::PartiallyAssembled
            } else {
                AssemblyState::Assembled
            },
            entries,
            sessions_closed,
        };

        info!(
            run_id = %run_id,
            story_id = %story_id,
            resolved = report.resolved(),
            failures = report.failures(),
            state = ?report.state,
            "Assembly complete"
        );
        self.events.publish(AssemblyEvent::Completed {
            run_id,
            story_id,
            failures: report.failures(),
            timestamp: Utc::now(),
        });

        Ok(Assembly { story, report })
    }

    async fn resolve_entries(
        &self,
        run_id: Uuid,
        manifest: &mut [ContextManifestItem],
        router: Option<&ToolRouter>,
        base_dir: &Path,
    ) -> Vec<EntryReport> {
        let mut reports = Vec::with_capacity(manifest.len());

        for (index, item) in manifest.iter_mut().enumerate() {
            let label = item.label();
            let strategy = item.resolution().strategy();
            let started = Instant::now();

            let outcome = if item.is_populated() {
                debug!(index, label = %label, "Entry already has content, skipping");
                EntryOutcome::Skipped("already populated".to_string())
            } else {
                match self.resolve(Work::of(item), router, base_dir).await {
                    Some(Ok(text)) => {
                        item.record_content(text);
                        EntryOutcome::Resolved
                    }
                    Some(Err(text)) => {
                        item.record_failure(text.clone());
                        EntryOutcome::Failed(text)
                    }
                    None => EntryOutcome::Skipped("no resolution strategy".to_string()),
                }
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                EntryOutcome::Resolved => {
                    info!(index, label = %label, strategy = %strategy, duration_ms, "Entry resolved")
                }
                EntryOutcome::Failed(text) => {
                    warn!(index, label = %label, strategy = %strategy, detail = %text, "Entry failed")
                }
                EntryOutcome::Skipped(reason) => {
                    info!(index, label = %label, reason = %reason, "Entry skipped")
                }
            }

            self.events.publish(AssemblyEvent::EntryResolved {
                run_id,
                index,
                label: label.clone(),
                strategy,
                success: !matches!(outcome, EntryOutcome::Failed(_)),
                detail: match &outcome {
                    EntryOutcome::Resolved => None,
                    EntryOutcome::Failed(text) | EntryOutcome::Skipped(text) => Some(text.clone()),
                },
                duration_ms,
                timestamp: Utc::now(),
            });

            reports.push(EntryReport {
                index,
                label,
                strategy,
                outcome,
                duration_ms,
            });
        }

        reports
    }

    /// Resolve one entry to `Ok(content)` or `Err(error text)`; `None` when
    /// the entry names no strategy.
    async fn resolve(
        &self,
        work: Work,
        router: Option<&ToolRouter>,
        base_dir: &Path,
    ) -> Option<Result<String, String>> {
        let result = match work {
            Work::Tool { name, arguments } => {
                let outcome = match router {
                    Some(router) => router.execute(&name, arguments).await,
                    None => Err(ToolError::NoServer(name)),
                };
                outcome.map_err(|e| match e {
                    ToolError::NoServer(_) => format!("Error: {e}"),
                    other => other.to_string(),
                })
            }
            Work::Search(query) => self
                .research
                .try_research(&query)
                .await
                .map_err(|e| format!("Error: {e}")),
            Work::File(path) => self.assets.resolve(&path, base_dir).await.map_err(|e| match e {
                AssetError::NotFound(_) => format!("Warning: {e}"),
                other => format!("Error: {other}"),
            }),
            Work::Nothing => return None,
        };
        Some(result)
    }
}
