//! tower-lsp based Language Server implementation.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};
use tracing::{info, warn};

use super::position::{call_context_at, word_prefix_at};

use crate::analyzer::{Analyzer, AssignmentAnalyzer, ModuleSummary};
use crate::config::Config;
use crate::coordinator::{AnalysisCoordinator, SharedResult};
use crate::error::{CoordinatorError, Result as CoordinatorResult};
use crate::events::{ChannelSink, EventSink, TracingSink};
use crate::model::{AnalysisResult, DocumentId, Severity};

type Coordinator = AnalysisCoordinator<AssignmentAnalyzer>;

/// Shared state that can be cloned into spawned tasks via Arc.
struct State {
    client: Client,
    config: RwLock<Config>,
    coordinator: OnceLock<Arc<Coordinator>>,
}

impl State {
    fn new(client: Client, config: Config) -> Self {
        Self {
            client,
            config: RwLock::new(config),
            coordinator: OnceLock::new(),
        }
    }

    /// Start the coordinator once; events are mirrored to tracing and the client log.
    fn start_coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(self.coordinator.get_or_init(|| {
            let (sink, mut events) = ChannelSink::new();
            let client = self.client.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    TracingSink.emit(event.clone());
                    client
                        .log_message(message_type(event.severity), event.message)
                        .await;
                }
            });
            let config = self.config.read().clone();
            Arc::new(AnalysisCoordinator::start(
                AssignmentAnalyzer,
                Arc::new(sink),
                config,
            ))
        }))
    }

    fn coordinator(&self) -> Option<&Arc<Coordinator>> {
        self.coordinator.get()
    }

    /// Wait for an analysis of the document's current version.
    ///
    /// Returns the result together with the text it was computed from, or
    /// `None` when the document is unknown or no fresh analysis arrives in time.
    async fn fresh_analysis(
        &self,
        uri: &Url,
    ) -> Option<(Arc<AnalysisResult<ModuleSummary>>, Arc<str>)> {
        let coordinator = self.coordinator()?;
        let id = DocumentId::from(uri.clone());
        let timeout = self.config.read().default_timeout();
        match analysis_with_text(coordinator, &id, timeout).await {
            Ok(Some(found)) => Some(found),
            Ok(None) => {
                warn!(document = %id, "document kept changing while waiting for analysis");
                None
            }
            Err(CoordinatorError::NotOpen(_)) => None,
            Err(e) => {
                warn!(document = %id, "no fresh analysis: {e}");
                None
            }
        }
    }
}

/// Rounds of waiting before giving up on a document that keeps changing
const FRESH_ATTEMPTS: usize = 3;

/// Wait for an analysis of the current version and pair it with the exact
/// text that version had.
async fn analysis_with_text<A: Analyzer>(
    coordinator: &AnalysisCoordinator<A>,
    id: &DocumentId,
    timeout: Duration,
) -> CoordinatorResult<Option<(SharedResult<A>, Arc<str>)>> {
    let (mut text, mut version) = coordinator.document(id)?;
    for _ in 0..FRESH_ATTEMPTS {
        let result = coordinator
            .wait_for_analysis(id, Some(version), timeout, &CancellationToken::new())
            .await?;
        if result.version != version {
            // Edited while waiting; the newer result only fits the newer text.
            (text, version) = coordinator.document(id)?;
        }
        if result.version == version {
            return Ok(Some((result, text)));
        }
    }
    Ok(None)
}

fn message_type(severity: Severity) -> MessageType {
    match severity {
        Severity::Error => MessageType::ERROR,
        Severity::Warning => MessageType::WARNING,
        Severity::Info => MessageType::INFO,
        Severity::Log => MessageType::LOG,
    }
}

fn completion_items(summary: &ModuleSummary, prefix: &str) -> Vec<CompletionItem> {
    summary
        .completions(prefix)
        .into_iter()
        .map(|name| match summary.signature(&name) {
            Some(signature) => CompletionItem {
                detail: Some(signature.label()),
                kind: Some(CompletionItemKind::FUNCTION),
                label: name,
                ..Default::default()
            },
            None => CompletionItem {
                kind: Some(CompletionItemKind::VARIABLE),
                label: name,
                ..Default::default()
            },
        })
        .collect()
}

fn signature_help(summary: &ModuleSummary, callee: &str, active: u32) -> Option<SignatureHelp> {
    let signature = summary.signature(callee)?;
    let parameters = signature
        .parameters
        .iter()
        .map(|p| ParameterInformation {
            label: ParameterLabel::Simple(p.clone()),
            documentation: None,
        })
        .collect();
    Some(SignatureHelp {
        signatures: vec![SignatureInformation {
            label: signature.label(),
            documentation: None,
            parameters: Some(parameters),
            active_parameter: Some(active),
        }],
        active_signature: Some(0),
        active_parameter: Some(active),
    })
}

fn hover_content(summary: &ModuleSummary, position: Position) -> Option<Hover> {
    let target = summary.occurrence_at(position.line as usize, position.character as usize)?;
    let value = if let Some(signature) = summary.signature(&target.name) {
        format!(
            "```python\ndef {}\n```\nDefined on line {}",
            signature.label(),
            signature.line + 1
        )
    } else {
        let lines: Vec<String> = summary
            .bindings
            .iter()
            .filter(|b| b.name == target.name)
            .map(|b| (b.line + 1).to_string())
            .collect();
        if lines.is_empty() {
            return None;
        }
        format!("`{}` bound on line {}", target.name, lines.join(", "))
    };
    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value,
        }),
        range: Some(Range {
            start: Position::new(target.line as u32, target.column as u32),
            end: Position::new(target.line as u32, target.end_column() as u32),
        }),
    })
}

fn reference_locations(
    uri: &Url,
    summary: &ModuleSummary,
    position: Position,
    include_declaration: bool,
) -> Vec<Location> {
    let Some(target) = summary.occurrence_at(position.line as usize, position.character as usize)
    else {
        return vec![];
    };
    summary
        .references(&target.name, include_declaration)
        .into_iter()
        .map(|o| Location {
            uri: uri.clone(),
            range: Range {
                start: Position {
                    line: o.line as u32,
                    character: o.column as u32,
                },
                end: Position {
                    line: o.line as u32,
                    character: o.end_column() as u32,
                },
            },
        })
        .collect()
}

pub struct Backend {
    state: Arc<State>,
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        if let Some(opts) = params.initialization_options {
            let mut config = self.state.config.write();
            config.merge_json(&opts);
            // Environment overrides still win over client options.
            config.apply_env(|key| std::env::var(key).ok());
        }
        self.state.start_coordinator();

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                completion_provider: Some(CompletionOptions::default()),
                signature_help_provider: Some(SignatureHelpOptions {
                    trigger_characters: Some(vec!["(".to_string(), ",".to_string()]),
                    ..Default::default()
                }),
                references_provider: Some(OneOf::Left(true)),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        info!("language server initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(coordinator) = self.state.coordinator() {
            coordinator.shutdown().await;
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let Some(coordinator) = self.state.coordinator() else {
            return;
        };
        let id = DocumentId::from(params.text_document.uri);
        if let Err(e) = coordinator.notify_opened(&id, &params.text_document.text) {
            warn!("didOpen rejected: {e}");
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(coordinator) = self.state.coordinator() else {
            return;
        };
        let id = DocumentId::from(params.text_document.uri);
        // Full sync: the last change carries the whole text.
        if let Some(change) = params.content_changes.into_iter().last() {
            if let Err(e) = coordinator.notify_changed(&id, &change.text) {
                warn!("didChange rejected: {e}");
            }
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let Some(coordinator) = self.state.coordinator() else {
            return;
        };
        let id = DocumentId::from(params.text_document.uri);
        if let Err(e) = coordinator.notify_closed(&id) {
            warn!("didClose rejected: {e}");
        }
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let pos = params.text_document_position.position;

        let Some((result, text)) = self.state.fresh_analysis(&uri).await else {
            return Ok(None);
        };
        let prefix = word_prefix_at(&text, pos.line as usize, pos.character as usize);
        let items = completion_items(&result.payload, &prefix);
        Ok(if items.is_empty() {
            None
        } else {
            Some(CompletionResponse::Array(items))
        })
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> Result<Option<SignatureHelp>> {
        let uri = params.text_document_position_params.text_document.uri;
        let pos = params.text_document_position_params.position;

        let Some((result, text)) = self.state.fresh_analysis(&uri).await else {
            return Ok(None);
        };
        let Some((callee, active)) =
            call_context_at(&text, pos.line as usize, pos.character as usize)
        else {
            return Ok(None);
        };
        Ok(signature_help(&result.payload, &callee, active))
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let pos = params.text_document_position_params.position;

        let Some((result, _)) = self.state.fresh_analysis(&uri).await else {
            return Ok(None);
        };
        Ok(hover_content(&result.payload, pos))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let pos = params.text_document_position.position;

        let Some((result, _)) = self.state.fresh_analysis(&uri).await else {
            return Ok(None);
        };
        let locations =
            reference_locations(&uri, &result.payload, pos, params.context.include_declaration);
        Ok(if locations.is_empty() {
            None
        } else {
            Some(locations)
        })
    }
}

/// Start the LSP server on stdio.
pub async fn serve_stdio(config: Config) {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(|client| Backend {
        state: Arc::new(State::new(client, config)),
    });
    Server::new(stdin, stdout, socket).serve(service).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::summarize;
    use crate::events::NullSink;
    use crate::model::Version;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    /// Echoes `content@version` once a permit is released
    struct Gated {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Analyzer for Gated {
        type Payload = String;

        async fn analyze(&self, content: &str, version: Version) -> anyhow::Result<String> {
            self.gate.acquire().await?.forget();
            Ok(format!("{content}@{version}"))
        }
    }

    fn uri() -> Url {
        Url::parse("file:///work/d1.py").unwrap()
    }

    #[test]
    fn maps_severities() {
        assert_eq!(message_type(Severity::Error), MessageType::ERROR);
        assert_eq!(message_type(Severity::Warning), MessageType::WARNING);
        assert_eq!(message_type(Severity::Info), MessageType::INFO);
        assert_eq!(message_type(Severity::Log), MessageType::LOG);
    }

    #[test]
    fn completion_marks_functions() {
        let summary = summarize("def area(w, h):\n    return w\narea_total = 1\n").unwrap();
        let items = completion_items(&summary, "ar");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, "area");
        assert_eq!(items[0].kind, Some(CompletionItemKind::FUNCTION));
        assert_eq!(items[0].detail.as_deref(), Some("area(w, h)"));
        assert_eq!(items[1].label, "area_total");
        assert_eq!(items[1].kind, Some(CompletionItemKind::VARIABLE));
    }

    #[test]
    fn signature_help_for_known_function() {
        let summary = summarize("def area(w, h):\n    return w\n").unwrap();
        let help = signature_help(&summary, "area", 1).unwrap();
        assert_eq!(help.signatures[0].label, "area(w, h)");
        assert_eq!(help.active_parameter, Some(1));
        assert!(signature_help(&summary, "print", 0).is_none());
    }

    #[test]
    fn hover_describes_functions_and_bindings() {
        let summary = summarize("x = 1\ndef f(a):\n    return a\nx = f(x)\n").unwrap();

        let on_call = hover_content(&summary, Position::new(3, 4)).unwrap();
        let HoverContents::Markup(markup) = on_call.contents else {
            panic!("expected markup");
        };
        assert_eq!(markup.value, "```python\ndef f(a)\n```\nDefined on line 2");
        assert_eq!(on_call.range.unwrap().start, Position::new(3, 4));

        let on_x = hover_content(&summary, Position::new(0, 0)).unwrap();
        let HoverContents::Markup(markup) = on_x.contents else {
            panic!("expected markup");
        };
        assert_eq!(markup.value, "`x` bound on line 1, 4");

        // Parameters are not module bindings.
        assert!(hover_content(&summary, Position::new(2, 11)).is_none());
    }

    #[test]
    fn references_at_position() {
        let summary = summarize("x = 1\ny = x + x\n").unwrap();
        let all = reference_locations(&uri(), &summary, Position::new(1, 4), true);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].range.start, Position::new(0, 0));
        assert_eq!(all[0].range.end, Position::new(0, 1));
        let uses = reference_locations(&uri(), &summary, Position::new(0, 0), false);
        assert_eq!(uses.len(), 2);
        assert!(reference_locations(&uri(), &summary, Position::new(0, 3), true).is_empty());
    }

    #[tokio::test]
    async fn analysis_text_matches_result_when_edited_during_wait() {
        let gate = Arc::new(Semaphore::new(0));
        let coordinator = Arc::new(AnalysisCoordinator::start(
            Gated {
                gate: Arc::clone(&gate),
            },
            Arc::new(NullSink),
            Config::default(),
        ));
        let id = DocumentId::from(uri());
        coordinator.notify_opened(&id, "a").unwrap();

        let query = {
            let coordinator = Arc::clone(&coordinator);
            let id = id.clone();
            tokio::spawn(async move {
                analysis_with_text(&coordinator, &id, Duration::from_secs(5)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.notify_changed(&id, "b").unwrap();
        gate.add_permits(1_000);

        let (result, text) = query.await.unwrap().unwrap().unwrap();
        assert_eq!(result.payload, format!("{text}@{}", result.version));
    }

    #[tokio::test]
    async fn analysis_text_for_unknown_document() {
        let coordinator =
            AnalysisCoordinator::start(AssignmentAnalyzer, Arc::new(NullSink), Config::default());
        let id = DocumentId::from(uri());
        let err = analysis_with_text(&coordinator, &id, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::NotOpen(id));
    }
}
