//! Loading a review
//!
//! A `ReviewSession` holds everything derived from one pull request: the
//! rendered diff, its line index, the call facts and their organized form.
//! Loading reports its progress stage by stage and can be cancelled between
//! stages and while waiting for the backend.

use crate::align::{organize, Organized, OrganizedFile};
use crate::annotate::{FileSidebars, LabelWidths};
use crate::calls::MethodCall;
use crate::client::{DiffProvider, PullRequest, ReviewBackend, ReviewId};
use crate::diff::RenderedDiff;
use crate::index::{FileDisplayIndex, FileIndex};
use crate::poll::{wait_until_ready, CancelToken, RetryPolicy};
use crate::storage::Storage;
use anyhow::{Context, Result};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    FetchingDiff,
    DiffRendered { files: usize },
    WaitingForReview { attempt: u32 },
    UsingCache { review: ReviewId },
    FetchingCalls { review: ReviewId },
    Organized { files: usize },
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchingDiff => write!(f, "Fetching pull request diff"),
            Self::DiffRendered { files } => write!(f, "Diff loaded: {} file(s)", files),
            Self::WaitingForReview { attempt } => {
                write!(f, "Waiting for the review backend (attempt {})", attempt)
            }
            Self::UsingCache { review } => write!(f, "Using cached calls of review {}", review),
            Self::FetchingCalls { review } => write!(f, "Fetching method calls of review {}", review),
            Self::Organized { files } => write!(f, "Annotated {} file(s)", files),
        }
    }
}

/// Collaborators a load talks to
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub backend: &'a dyn ReviewBackend,
    pub diffs: &'a dyn DiffProvider,
    pub cache: Option<&'a Storage>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub policy: RetryPolicy,
    /// Ignore cached calls and ask the backend again
    pub refresh: bool,
}

pub struct ReviewSession {
    /// None for reviews built from local files
    pub pr: Option<PullRequest>,
    /// Title of reviews without a pull request
    pub label: Option<String>,
    pub review_id: Option<ReviewId>,
    pub rendered: RenderedDiff,
    pub index: FileIndex,
    pub calls: Vec<MethodCall>,
    pub organized: Organized,
}

impl ReviewSession {
    /// Fetch, index and annotate a pull request
    pub fn load(
        pr_url: &str,
        services: Services<'_>,
        options: LoadOptions,
        token: &CancelToken,
        mut progress: impl FnMut(LoadStage),
    ) -> Result<Self> {
        let pr = PullRequest::parse(pr_url)?;
        info!(pr = %pr, "loading review");

        token.check()?;
        progress(LoadStage::FetchingDiff);
        let diff_text = services
            .diffs
            .pull_request_diff(&pr)
            .with_context(|| format!("Failed to fetch the diff of {}", pr))?;

        let rendered = RenderedDiff::from_text(&diff_text);
        let index = FileIndex::build(&rendered);
        progress(LoadStage::DiffRendered {
            files: rendered.files.len(),
        });

        token.check()?;
        let cached = match services.cache {
            Some(cache) if !options.refresh => match cache.cached_calls(&pr.url) {
                Ok(hit) => hit,
                Err(e) => {
                    warn!(error = %e, "could not read cached method calls");
                    None
                }
            },
            _ => None,
        };

        let (review_id, calls) = match cached {
            Some(hit) => {
                progress(LoadStage::UsingCache {
                    review: hit.review_id,
                });
                (hit.review_id, hit.calls)
            }
            None => {
                let review = wait_until_ready(services.backend, &pr.url, options.policy, token, |attempt| {
                    progress(LoadStage::WaitingForReview { attempt })
                })?;

                token.check()?;
                progress(LoadStage::FetchingCalls { review });
                let calls = services
                    .backend
                    .method_calls(review)
                    .context("Failed to fetch method calls")?;

                if let Some(cache) = services.cache {
                    if let Err(e) = cache.store_calls(&pr.url, review, &calls) {
                        warn!(error = %e, "could not cache method calls");
                    }
                }
                (review, calls)
            }
        };

        token.check()?;
        let organized = organize(&calls, &index);
        info!(
            calls = calls.len(),
            files = organized.len(),
            "review annotated"
        );
        progress(LoadStage::Organized {
            files: organized.len(),
        });

        Ok(Self {
            pr: Some(pr),
            label: None,
            review_id: Some(review_id),
            rendered,
            index,
            calls,
            organized,
        })
    }

    /// Build a session from a diff and call facts already at hand
    pub fn from_parts(diff_text: &str, calls: Vec<MethodCall>) -> Self {
        let rendered = RenderedDiff::from_text(diff_text);
        let index = FileIndex::build(&rendered);
        let organized = organize(&calls, &index);

        Self {
            pr: None,
            label: None,
            review_id: None,
            rendered,
            index,
            calls,
            organized,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn file_index(&self, path: &str) -> Option<&FileDisplayIndex> {
        self.index.get(path)
    }

    /// Sidebars of an indexed file; empty sidebars when it has no calls
    pub fn sidebars(&self, path: &str, widths: LabelWidths) -> Option<FileSidebars> {
        let file = self.index.get(path)?;
        let sidebars = match self.organized.get(path) {
            Some(organized) => FileSidebars::build(organized, file, &self.index, widths),
            None => FileSidebars::build(
                &OrganizedFile {
                    path: path.to_string(),
                    region: file.region,
                    callees: Vec::new(),
                    callers: Vec::new(),
                },
                file,
                &self.index,
                widths,
            ),
        };
        Some(sidebars)
    }

    /// Title line for reports and the viewer
    pub fn title(&self) -> String {
        match &self.pr {
            Some(pr) => pr.to_string(),
            None => self.label.clone().unwrap_or_else(|| "local diff".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::tests::call;
    use crate::client::{ClientError, ReviewState};
    use crate::poll::tests::ScriptedBackend;
    use std::time::Duration;
    use tempfile::tempdir;

    const PR: &str = "https://github.com/acme/widgets/pull/7";

    const DIFF: &str = "\
diff --git a/src/A.java b/src/A.java
--- a/src/A.java
+++ b/src/A.java
@@ -1,3 +1,3 @@
 class A {
-  void f() {}
+  void f() { b.g(); }
 }
";

    struct FixedDiff;

    impl DiffProvider for FixedDiff {
        fn pull_request_diff(&self, pr: &PullRequest) -> Result<String, ClientError> {
            assert_eq!(pr.number, 7);
            Ok(DIFF.to_string())
        }
    }

    fn sample_calls() -> Vec<MethodCall> {
        vec![
            call("src/A.java", 2, "src/B.java", (10, 12)),
            call("src/C.java", 5, "src/A.java", (1, 3)),
        ]
    }

    fn options(max_attempts: u32, refresh: bool) -> LoadOptions {
        LoadOptions {
            policy: RetryPolicy {
                interval: Duration::ZERO,
                max_attempts,
            },
            refresh,
        }
    }

    fn backend() -> ScriptedBackend {
        let mut backend =
            ScriptedBackend::new(vec![Ok(ReviewState::Processing), Ok(ReviewState::Ready)]);
        backend.calls = sample_calls();
        backend
    }

    #[test]
    fn test_load_reports_every_stage() {
        let backend = backend();
        let services = Services {
            backend: &backend,
            diffs: &FixedDiff,
            cache: None,
        };
        let mut stages = Vec::new();
        let session = ReviewSession::load(PR, services, options(5, false), &CancelToken::new(), |s| {
            stages.push(s)
        })
        .unwrap();

        assert_eq!(
            stages,
            vec![
                LoadStage::FetchingDiff,
                LoadStage::DiffRendered { files: 1 },
                LoadStage::WaitingForReview { attempt: 1 },
                LoadStage::WaitingForReview { attempt: 2 },
                LoadStage::FetchingCalls { review: ReviewId(9) },
                LoadStage::Organized { files: 1 },
            ]
        );

        let a = &session.organized["src/A.java"];
        assert_eq!(a.callees.len(), 1);
        assert_eq!(a.callees[0].new_line, 2);
        assert_eq!(a.callers.len(), 1);
        assert_eq!((a.callers[0].start_index, a.callers[0].end_index), (1, 4));
        assert_eq!(session.title(), "acme/widgets#7");
    }

    #[test]
    fn test_cache_is_filled_then_used() {
        let dir = tempdir().unwrap();
        let cache = Storage::open(&dir.path().join("cache.db")).unwrap();

        let first = backend();
        let services = Services {
            backend: &first,
            diffs: &FixedDiff,
            cache: Some(&cache),
        };
        ReviewSession::load(PR, services, options(5, false), &CancelToken::new(), |_| {}).unwrap();
        assert_eq!(cache.cached_calls(PR).unwrap().unwrap().calls, sample_calls());

        // A backend that never becomes ready would exhaust the single attempt
        let idle = ScriptedBackend::new(Vec::new());
        let services = Services {
            backend: &idle,
            diffs: &FixedDiff,
            cache: Some(&cache),
        };
        let mut stages = Vec::new();
        let session = ReviewSession::load(PR, services, options(1, false), &CancelToken::new(), |s| {
            stages.push(s)
        })
        .unwrap();

        assert_eq!(*idle.requests.lock().unwrap(), 0);
        assert!(stages.contains(&LoadStage::UsingCache { review: ReviewId(9) }));
        assert_eq!(session.calls, sample_calls());

        let err = ReviewSession::load(PR, services, options(1, true), &CancelToken::new(), |_| {})
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ClientError>(),
            Some(ClientError::PollExhausted { attempts: 1 })
        ));
    }

    #[test]
    fn test_unreadable_cache_entry_falls_back_to_backend() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("cache.db");
        let cache = Storage::open(&db).unwrap();
        cache.store_calls(PR, ReviewId(1), &sample_calls()).unwrap();
        rusqlite::Connection::open(&db)
            .unwrap()
            .execute("UPDATE reviews SET calls_json = 'not json'", [])
            .unwrap();
        assert!(cache.cached_calls(PR).is_err());

        let backend = backend();
        let services = Services {
            backend: &backend,
            diffs: &FixedDiff,
            cache: Some(&cache),
        };
        let session =
            ReviewSession::load(PR, services, options(5, false), &CancelToken::new(), |_| {}).unwrap();

        assert_eq!(session.review_id, Some(ReviewId(9)));
        assert_eq!(session.calls, sample_calls());
        // the fresh calls replace the broken entry
        assert_eq!(cache.cached_calls(PR).unwrap().unwrap().review_id, ReviewId(9));
    }

    #[test]
    fn test_cancelled_load_fetches_nothing() {
        let backend = backend();
        let services = Services {
            backend: &backend,
            diffs: &FixedDiff,
            cache: None,
        };
        let token = CancelToken::new();
        token.cancel();
        let mut stages = Vec::new();
        let err = ReviewSession::load(PR, services, options(5, false), &token, |s| stages.push(s))
            .err()
            .unwrap();

        assert!(matches!(err.downcast_ref::<ClientError>(), Some(ClientError::Cancelled)));
        assert!(stages.is_empty());
        assert_eq!(*backend.requests.lock().unwrap(), 0);
    }

    #[test]
    fn test_invalid_url_is_rejected_before_fetching() {
        let backend = backend();
        let services = Services {
            backend: &backend,
            diffs: &FixedDiff,
            cache: None,
        };
        let err = ReviewSession::load("https://example.com/x", services, options(5, false), &CancelToken::new(), |_| {})
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<ClientError>(), Some(ClientError::InvalidUrl(_))));
    }

    #[test]
    fn test_from_parts_and_sidebars() {
        let session = ReviewSession::from_parts(DIFF, sample_calls());

        assert!(session.pr.is_none());
        assert_eq!(session.title(), "local diff");
        let session = session.with_label("HEAD~1..HEAD");
        assert_eq!(session.title(), "HEAD~1..HEAD");
        let sidebars = session.sidebars("src/A.java", LabelWidths::default()).unwrap();
        assert_eq!(sidebars.header.lines, Some((1, 3)));
        assert_eq!(sidebars.callers[0].entries[0].upper, "C.java:L5");
        assert!(session.sidebars("src/B.java", LabelWidths::default()).is_none());

        let empty = ReviewSession::from_parts(DIFF, Vec::new());
        let sidebars = empty.sidebars("src/A.java", LabelWidths::default()).unwrap();
        assert!(sidebars.callers.is_empty() && sidebars.callees.is_empty());
    }
}
