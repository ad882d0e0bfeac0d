//! Racing engine (§4.5): launches one task per `provider:model` entry, the
//! first successful non-cancelled result wins, and a grace-period timer
//! drains late completions before cancelling the remaining racers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::metrics::MetricsTracker;
use crate::provider::{collect_chat_completion, CodeGenerationResult, GenerationRequest, Provider};
use crate::{Error, Result};

/// One racer's outcome: which provider/model produced it, how long it took
#[derive(Debug, Clone)]
pub struct RacerResult {
    /// Provider name
    pub provider: String,
    /// Model used
    pub model: String,
    /// Generated artifact
    pub result: CodeGenerationResult,
    /// Wall-clock duration of the call
    pub latency: Duration,
}

/// Result of a completed race
#[derive(Debug)]
pub struct RaceOutcome {
    /// The winning racer
    pub winner: RacerResult,
    /// Results that arrived during the grace period after the winner
    pub late_completions: Vec<RacerResult>,
}

enum RacerMsg {
    Success(RacerResult),
    Failure { provider: String, model: String, error: String },
}

/// Parse a `provider:model` entry; both sides must be non-empty
///
/// # Errors
///
/// Returns [`Error::Client`] when the entry is malformed.
pub fn parse_racer_entry(entry: &str) -> Result<(String, String)> {
    let Some((provider, model)) = entry.split_once(':') else {
        return Err(Error::Client(format!("malformed race entry: {entry}")));
    };
    if provider.is_empty() || model.is_empty() {
        return Err(Error::Client(format!("malformed race entry: {entry}")));
    }
    Ok((provider.to_string(), model.to_string()))
}

/// Run the race. `entries` is truncated to `num_racers`.
///
/// # Errors
///
/// Returns an aggregated error if every racer fails, or [`Error::Cancelled`]
/// if the parent token is cancelled before a winner is decided.
pub async fn race(
    entries: &[String],
    num_racers: usize,
    grace_period: Duration,
    request: &GenerationRequest,
    providers: &HashMap<String, Arc<dyn Provider>>,
    metrics: &MetricsTracker,
    parent: CancellationToken,
) -> Result<RaceOutcome> {
    let entries: Vec<&String> = entries.iter().take(num_racers.max(1)).collect();
    if entries.is_empty() {
        return Err(Error::Client("racing strategy configured with no entries".to_string()));
    }

    let child = parent.child_token();
    let (result_tx, mut result_rx) = mpsc::channel::<RacerMsg>(1);

    for entry in &entries {
        let entry = (*entry).clone();
        let tx = result_tx.clone();
        let child = child.clone();
        let request = request.clone();
        let providers = providers.clone();

        tokio::spawn(async move {
            let outcome = match parse_racer_entry(&entry) {
                Ok((provider_name, model)) => {
                    run_one_racer(&provider_name, &model, &request, &providers, &child).await
                }
                Err(e) => Err((String::new(), String::new(), e)),
            };

            match outcome {
                Ok(success) => {
                    let _ = tx.send(RacerMsg::Success(success)).await;
                }
                Err((provider, model, error)) => {
                    if !child.is_cancelled() {
                        let _ = tx
                            .send(RacerMsg::Failure {
                                provider,
                                model,
                                error: error.to_string(),
                            })
                            .await;
                    }
                }
            }
        });
    }
    drop(result_tx);

    let total = entries.len();
    let mut failures = Vec::new();
    let mut winner = None;

    while winner.is_none() {
        tokio::select! {
            () = parent.cancelled() => {
                child.cancel();
                return Err(Error::Cancelled);
            }
            msg = result_rx.recv() => {
                match msg {
                    Some(RacerMsg::Success(r)) => winner = Some(r),
                    Some(RacerMsg::Failure { provider, model, error }) => {
                        failures.push(format!("{provider}:{model}: {error}"));
                        if failures.len() == total {
                            return Err(Error::AllProvidersFailed(failures.join("; ")));
                        }
                    }
                    None => {
                        return Err(Error::AllProvidersFailed(failures.join("; ")));
                    }
                }
            }
        }
    }
    let winner = winner.expect("loop only exits with a winner or an early return");
    if !failures.is_empty() {
        metrics.record_fallback_attempt();
    }

    let mut late_completions = Vec::new();
    let grace_timer = tokio::time::sleep(grace_period);
    tokio::pin!(grace_timer);

    loop {
        tokio::select! {
            () = &mut grace_timer => {
                child.cancel();
                break;
            }
            () = parent.cancelled() => {
                child.cancel();
                break;
            }
            msg = result_rx.recv() => {
                match msg {
                    Some(RacerMsg::Success(r)) => late_completions.push(r),
                    Some(RacerMsg::Failure { .. }) | None => {}
                }
            }
        }
    }

    Ok(RaceOutcome { winner, late_completions })
}

async fn run_one_racer(
    provider_name: &str,
    model: &str,
    request: &GenerationRequest,
    providers: &HashMap<String, Arc<dyn Provider>>,
    cancel: &CancellationToken,
) -> std::result::Result<RacerResult, (String, String, Error)> {
    let Some(provider) = providers.get(provider_name) else {
        return Err((
            provider_name.to_string(),
            model.to_string(),
            Error::UnknownProviderType(provider_name.to_string()),
        ));
    };

    let mut racer_request = request.clone();
    racer_request.model = model.to_string();

    let start = Instant::now();
    let call = provider.generate_chat_completion(&racer_request);

    let stream = tokio::select! {
        () = cancel.cancelled() => return Err((provider_name.to_string(), model.to_string(), Error::Cancelled)),
        outcome = call => outcome.map_err(|e| (provider_name.to_string(), model.to_string(), e))?,
    };

    let collected = tokio::select! {
        () = cancel.cancelled() => return Err((provider_name.to_string(), model.to_string(), Error::Cancelled)),
        outcome = collect_chat_completion(stream) => outcome.map_err(|e| (provider_name.to_string(), model.to_string(), e))?,
    };

    Ok(RacerResult {
        provider: provider_name.to_string(),
        model: model.to_string(),
        result: collected,
        latency: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::stub::StubProvider;

    fn provider_map(providers: Vec<Arc<dyn Provider>>) -> HashMap<String, Arc<dyn Provider>> {
        providers.into_iter().map(|p| (p.name().to_string(), p)).collect()
    }

    #[test]
    fn parses_valid_entries() {
        assert_eq!(
            parse_racer_entry("cerebras:llama-3").unwrap(),
            ("cerebras".to_string(), "llama-3".to_string())
        );
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_racer_entry("no-colon").is_err());
        assert!(parse_racer_entry(":model").is_err());
        assert!(parse_racer_entry("provider:").is_err());
    }

    #[tokio::test]
    async fn fastest_racer_wins() {
        let a: Arc<dyn Provider> = Arc::new(StubProvider::succeeding("a", "A"));
        let b: Arc<dyn Provider> = Arc::new(StubProvider::succeeding("b", "B"));
        let providers = provider_map(vec![a, b]);
        let metrics = MetricsTracker::new();

        let entries = vec!["a:m".to_string(), "b:m".to_string()];
        let outcome = race(
            &entries,
            2,
            Duration::from_millis(50),
            &GenerationRequest::default(),
            &providers,
            &metrics,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcome.winner.result.code == "A" || outcome.winner.result.code == "B");
    }

    #[tokio::test]
    async fn all_failing_racers_produce_an_aggregated_error() {
        let a: Arc<dyn Provider> = Arc::new(StubProvider::failing("a", "boom-a"));
        let b: Arc<dyn Provider> = Arc::new(StubProvider::failing("b", "boom-b"));
        let providers = provider_map(vec![a, b]);
        let metrics = MetricsTracker::new();

        let entries = vec!["a:m".to_string(), "b:m".to_string()];
        let err = race(
            &entries,
            2,
            Duration::from_millis(50),
            &GenerationRequest::default(),
            &providers,
            &metrics,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            Error::AllProvidersFailed(msg) => {
                assert!(msg.contains("boom-a"));
                assert!(msg.contains("boom-b"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
