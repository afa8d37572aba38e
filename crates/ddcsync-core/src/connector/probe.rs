// ── Method-name probing ──
//
// One resolver per verb. Candidates are tried in order until one answers;
// the winner is remembered for the rest of the session and never
// re-probed, even if it later fails.

use std::future::Future;
use std::sync::OnceLock;

use ddcsync_api::MethodCandidate;
use tracing::{debug, info};

use crate::error::CoreError;

pub(crate) struct MethodResolver<M: MethodCandidate> {
    resolved: OnceLock<M>,
}

impl<M: MethodCandidate> MethodResolver<M> {
    pub(crate) fn new() -> Self {
        Self {
            resolved: OnceLock::new(),
        }
    }

    pub(crate) fn resolved(&self) -> Option<M> {
        self.resolved.get().copied()
    }

    /// Run `call` with the resolved method, probing first if needed.
    ///
    /// Success, a remote rejection and an undecodable reply all count as
    /// "answered". Only failures where nobody was there to answer move on to
    /// the next candidate.
    pub(crate) async fn call<T, F, Fut>(&self, mut call: F) -> Result<T, CoreError>
    where
        F: FnMut(M) -> Fut,
        Fut: Future<Output = Result<T, ddcsync_api::Error>>,
    {
        if let Some(method) = self.resolved() {
            return call(method).await.map_err(CoreError::from);
        }

        let mut last_error = None;
        for candidate in M::candidates() {
            match call(candidate).await {
                Err(e) if e.is_unanswered() => {
                    debug!(
                        verb = M::VERB,
                        method = candidate.method_name(),
                        error = %e,
                        "method candidate did not answer"
                    );
                    last_error = Some(e);
                }
                outcome => {
                    // A concurrent probe may have won already; keep the first.
                    let winner = *self.resolved.get_or_init(|| candidate);
                    info!(verb = M::VERB, method = winner.method_name(), "resolved backend method");
                    return outcome.map_err(CoreError::from);
                }
            }
        }

        Err(CoreError::BackendUnavailable {
            reason: match last_error {
                Some(e) => format!("no {} method answered (last error: {e})", M::VERB),
                None => format!("no {} method candidates", M::VERB),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ddcsync_api::{Error, ReadMethod, WriteMethod};

    use super::*;

    #[tokio::test]
    async fn first_answering_candidate_wins_and_sticks() {
        let resolver = MethodResolver::<ReadMethod>::new();
        let tried = Mutex::new(Vec::new());

        let result = resolver
            .call(|m| {
                tried.lock().unwrap().push(m);
                async move {
                    match m {
                        ReadMethod::GetVcpValue => Ok(42),
                        _ => Err(Error::UnsupportedOperation("missing")),
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(resolver.resolved(), Some(ReadMethod::GetVcpValue));
        assert_eq!(tried.lock().unwrap().len(), 3);

        tried.lock().unwrap().clear();
        resolver
            .call(|m| {
                tried.lock().unwrap().push(m);
                async move { Ok::<_, Error>(1) }
            })
            .await
            .unwrap();
        assert_eq!(*tried.lock().unwrap(), [ReadMethod::GetVcpValue]);
    }

    #[tokio::test]
    async fn remote_rejection_counts_as_answered() {
        let resolver = MethodResolver::<WriteMethod>::new();
        let err = resolver
            .call(|_| async {
                Err::<(), _>(Error::Remote {
                    status: -3,
                    message: "no".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RemoteRejected { status: -3, .. }));
        assert_eq!(resolver.resolved(), Some(WriteMethod::SetVcpWithContext));
    }

    #[tokio::test]
    async fn all_candidates_failing_is_backend_unavailable() {
        let resolver = MethodResolver::<ReadMethod>::new();
        let err = resolver
            .call(|_| async { Err::<(), _>(Error::UnsupportedOperation("missing")) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BackendUnavailable { .. }));
        assert_eq!(resolver.resolved(), None);
    }
}
