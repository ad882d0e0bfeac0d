//! `write` tool orchestration (§4.2): restore handling, context assembly,
//! router invocation, atomic file write, and validation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::provider::GenerationRequest;
use crate::router::Router;
use crate::validator::{detect_language, SyntaxValidator, ValidationOutcome};
use crate::{Error, Result};

/// `write` tool arguments, per the `tools/call` JSON schema
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WriteArgs {
    /// Absolute destination path
    pub file_path: String,
    /// Natural-language instruction; required unless `restore_previous`
    pub prompt: Option<String>,
    /// Paths whose contents are concatenated into the request context
    pub context_files: Vec<String>,
    /// Skip the diff body and return a minimal success message
    pub write_only: bool,
    /// Run the syntax validator after writing
    pub validate: bool,
    /// Restore the pre-write backup for `file_path` instead of generating
    pub restore_previous: bool,
    /// Optional language hint, otherwise detected from the file extension
    pub language_hint: Option<String>,
}

impl Default for WriteArgs {
    fn default() -> Self {
        Self {
            file_path: String::new(),
            prompt: None,
            context_files: Vec::new(),
            write_only: false,
            validate: false,
            restore_previous: false,
            language_hint: None,
        }
    }
}

/// Outcome returned to the JSON-RPC layer as tool-call content
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// Human-readable summary
    pub message: String,
    /// Unified-style diff body, omitted when `write_only` was set
    pub diff: Option<String>,
}

/// Orchestrates `write` tool calls against a [`Router`]
pub struct Dispatcher {
    router: Arc<Router>,
    validator: Arc<dyn SyntaxValidator>,
    backups: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl Dispatcher {
    /// Build a dispatcher around `router` and `validator`
    #[must_use]
    pub fn new(router: Arc<Router>, validator: Arc<dyn SyntaxValidator>) -> Self {
        Self {
            router,
            validator,
            backups: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one `write` call
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`] for missing required arguments, or whatever
    /// the router/filesystem produced.
    pub async fn handle_write(&self, args: WriteArgs, cancel: CancellationToken) -> Result<WriteOutcome> {
        if args.file_path.is_empty() {
            return Err(Error::Client("file_path is required".to_string()));
        }
        let path = PathBuf::from(&args.file_path);

        if args.restore_previous {
            return self.restore(&path).await;
        }

        let Some(prompt) = args.prompt.filter(|p| !p.is_empty()) else {
            return Err(Error::Client("prompt is required unless restore_previous is set".to_string()));
        };

        let context = self.assemble_context(&args.context_files).await;
        let language_hint = args
            .language_hint
            .clone()
            .unwrap_or_else(|| detect_language(&path));

        let request = GenerationRequest {
            prompt,
            context,
            language_hint: Some(language_hint.clone()),
            model: String::new(),
        };

        let route_result = self.router.generate(&request, cancel).await?;

        let pre_image = tokio::fs::read(&path).await.ok();
        if let Some(bytes) = pre_image.clone() {
            self.backups.lock().insert(path.clone(), bytes);
        }

        self.write_atomic(&path, route_result.code.as_bytes()).await?;

        let mut code = route_result.code;
        if args.validate || args.write_only {
            match self.validator.validate(&language_hint, &code) {
                ValidationOutcome::Ok => {}
                ValidationOutcome::Fixable(fixed) => {
                    code = fixed;
                    self.write_atomic(&path, code.as_bytes()).await?;
                }
                ValidationOutcome::Failed(reason) => {
                    return Err(Error::Validation(format!(
                        "{} generated content for {} failed validation: {reason}",
                        route_result.provider_model,
                        path.display()
                    )));
                }
            }
        }

        if args.write_only {
            return Ok(WriteOutcome {
                message: format!(
                    "Wrote {} bytes to {} via {}",
                    code.len(),
                    path.display(),
                    route_result.provider_model
                ),
                diff: None,
            });
        }

        let pre_text = pre_image
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        let diff = render_diff(&pre_text, &code);

        Ok(WriteOutcome {
            message: format!(
                "Updated {} via {} ({} bytes)",
                path.display(),
                route_result.provider_model,
                code.len()
            ),
            diff: Some(diff),
        })
    }

    async fn restore(&self, path: &Path) -> Result<WriteOutcome> {
        let bytes = {
            let mut backups = self.backups.lock();
            backups.remove(path)
        };
        let Some(bytes) = bytes else {
            return Err(Error::Client(format!("no previous version for {}", path.display())));
        };

        tokio::fs::write(path, &bytes).await?;
        Ok(WriteOutcome {
            message: format!("Restored {} from backup ({} bytes)", path.display(), bytes.len()),
            diff: None,
        })
    }

    async fn assemble_context(&self, context_files: &[String]) -> Option<String> {
        if context_files.is_empty() {
            return None;
        }
        let mut combined = String::new();
        for file in context_files {
            match tokio::fs::read_to_string(file).await {
                Ok(contents) => {
                    combined.push_str(&format!("# {file}\n{contents}\n\n"));
                }
                Err(e) => {
                    tracing::warn!(file = %file, error = %e, "context file unreadable, continuing");
                }
            }
        }
        if combined.is_empty() { None } else { Some(combined) }
    }

    async fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = dir.join(format!(
            ".{}.tmp-{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("write"),
            std::process::id()
        ));
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

/// Minimal unified-style diff: a full before/after block when content differs,
/// or a no-op note when it doesn't.
fn render_diff(before: &str, after: &str) -> String {
    if before == after {
        return "(no change)".to_string();
    }
    let mut out = String::new();
    for line in before.lines() {
        out.push_str("-");
        out.push_str(line);
        out.push('\n');
    }
    for line in after.lines() {
        out.push('+');
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::health::HealthMonitor;
    use crate::metrics::MetricsTracker;
    use crate::provider::stub::StubProvider;
    use crate::random::FixedRandomSource;
    use crate::validator::NoopValidator;
    use std::collections::HashMap as StdHashMap;

    fn dispatcher_with(content: &str) -> Dispatcher {
        let provider: Arc<dyn crate::provider::Provider> = Arc::new(StubProvider::succeeding("stub", content));
        let mut providers: StdHashMap<String, Arc<dyn crate::provider::Provider>> = StdHashMap::new();
        providers.insert("stub".to_string(), provider);

        let mut config = AppConfig::default();
        config.providers.insert(
            "stub".to_string(),
            crate::config::ProviderConfig {
                api_keys: vec!["k".to_string()],
                default_model: "stub-model".to_string(),
                ..crate::config::ProviderConfig::default()
            },
        );
        config.router.order = vec!["stub".to_string()];

        let router = Arc::new(Router::new(
            &config,
            providers,
            Arc::new(MetricsTracker::new()),
            Arc::new(HealthMonitor::new(3)),
            Arc::new(FixedRandomSource(0)),
        ));

        Dispatcher::new(router, Arc::new(NoopValidator))
    }

    #[tokio::test]
    async fn write_only_skips_the_diff_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        let dispatcher = dispatcher_with("print('ok')\n");

        let outcome = dispatcher
            .handle_write(
                WriteArgs {
                    file_path: path.to_string_lossy().into_owned(),
                    prompt: Some("hello".to_string()),
                    write_only: true,
                    ..WriteArgs::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.diff.is_none());
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "print('ok')\n");
    }

    #[tokio::test]
    async fn restore_roundtrips_and_then_fails_a_second_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.py");
        std::fs::write(&path, "v1").unwrap();

        let dispatcher = dispatcher_with("v2");
        dispatcher
            .handle_write(
                WriteArgs {
                    file_path: path.to_string_lossy().into_owned(),
                    prompt: Some("update".to_string()),
                    write_only: true,
                    ..WriteArgs::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v2");

        dispatcher
            .handle_write(
                WriteArgs {
                    file_path: path.to_string_lossy().into_owned(),
                    restore_previous: true,
                    ..WriteArgs::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v1");

        let second = dispatcher
            .handle_write(
                WriteArgs {
                    file_path: path.to_string_lossy().into_owned(),
                    restore_previous: true,
                    ..WriteArgs::default()
                },
                CancellationToken::new(),
            )
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn missing_prompt_is_a_client_error() {
        let dispatcher = dispatcher_with("x");
        let err = dispatcher
            .handle_write(
                WriteArgs {
                    file_path: "/tmp/whatever.py".to_string(),
                    ..WriteArgs::default()
                },
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Client(_)));
    }
}
