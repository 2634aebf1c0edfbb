use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::ExtractError;

/// One open browser page (or tab). The viewer platform may expose the
/// scan token in any of them, attached asynchronously by page scripting.
#[async_trait]
pub trait PageContext: Clone + Send + Sync {
    fn same_page(&self, other: &Self) -> bool;
    async fn current_url(&self) -> Option<String>;
    /// First non-blank token value exposed by this page, if any.
    async fn probe_token(&self) -> Option<String>;
}

/// The authenticated browsing session's view of its open pages.
#[async_trait]
pub trait ViewerSession: Send + Sync {
    type Page: PageContext;
    async fn open_pages(&self) -> anyhow::Result<Vec<Self::Page>>;
}

/// Outcome of a successful discovery: the token and the URL of the page
/// that exposed it (which carries the viewer-scoped book id).
#[derive(Debug, Clone)]
pub struct Discovery {
    pub token: String,
    pub viewer_url: String,
}

enum Phase<P> {
    /// The click was dispatched; the navigation may land in the original
    /// page or spawn a new one.
    WatchingForNewTab,
    /// New pages appeared; poll a fixed candidate list in priority order.
    PollingCandidates(Vec<P>),
}

/// Polls the session's pages for the scan token under one shared
/// wall-clock deadline. While watching for a new tab, the original page
/// is probed directly; once new pages appear, the candidate list becomes
/// [newest new page, original page, remaining new pages], deduplicated
/// preserving that order. The first page to yield a non-blank token wins.
/// On expiry every distinct URL observed is reported for diagnosis.
pub async fn wait_for_scan_token<S>(
    session: &S,
    origin: &S::Page,
    before_click: &[S::Page],
    deadline: Duration,
    poll_interval: Duration,
) -> Result<Discovery, ExtractError>
where
    S: ViewerSession,
{
    let started = Instant::now();
    let mut seen_urls: BTreeSet<String> = BTreeSet::new();
    let mut phase: Phase<S::Page> = Phase::WatchingForNewTab;

    loop {
        if started.elapsed() >= deadline {
            return Err(ExtractError::ScanIdNotFound {
                timeout_secs: deadline.as_secs(),
                seen_urls: seen_urls.into_iter().collect(),
            });
        }

        match &phase {
            Phase::WatchingForNewTab => {
                let pages = match session.open_pages().await {
                    Ok(pages) => pages,
                    Err(err) => {
                        tracing::debug!(?err, "listing open pages failed; retrying");
                        Vec::new()
                    }
                };
                let new_pages: Vec<S::Page> = pages
                    .into_iter()
                    .filter(|page| !before_click.iter().any(|known| known.same_page(page)))
                    .collect();

                if let Some(newest) = new_pages.last().cloned() {
                    let mut candidates: Vec<S::Page> = Vec::new();
                    let push = |page: S::Page, candidates: &mut Vec<S::Page>| {
                        if !candidates.iter().any(|c| c.same_page(&page)) {
                            candidates.push(page);
                        }
                    };
                    push(newest, &mut candidates);
                    push(origin.clone(), &mut candidates);
                    for page in new_pages {
                        push(page, &mut candidates);
                    }
                    tracing::debug!(candidates = candidates.len(), "new pages appeared");
                    phase = Phase::PollingCandidates(candidates);
                    // poll the candidates right away
                    continue;
                }

                if let Some(url) = origin.current_url().await
                    && !url.is_empty()
                {
                    seen_urls.insert(url);
                }
                if let Some(token) = origin.probe_token().await {
                    let viewer_url = origin.current_url().await.unwrap_or_default();
                    return Ok(Discovery { token, viewer_url });
                }
            }
            Phase::PollingCandidates(candidates) => {
                for page in candidates {
                    let url = page.current_url().await;
                    if let Some(url) = &url
                        && !url.is_empty()
                    {
                        seen_urls.insert(url.clone());
                    }
                    if let Some(token) = page.probe_token().await {
                        return Ok(Discovery {
                            token,
                            viewer_url: url.unwrap_or_default(),
                        });
                    }
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone)]
    struct FakePage {
        id: u32,
        url: Option<String>,
        token: Option<String>,
    }

    impl FakePage {
        fn new(id: u32, url: &str, token: Option<&str>) -> Self {
            Self {
                id,
                url: Some(url.to_owned()),
                token: token.map(str::to_owned),
            }
        }
    }

    #[async_trait]
    impl PageContext for FakePage {
        fn same_page(&self, other: &Self) -> bool {
            self.id == other.id
        }

        async fn current_url(&self) -> Option<String> {
            self.url.clone()
        }

        async fn probe_token(&self) -> Option<String> {
            self.token.clone()
        }
    }

    struct FakeSession {
        pages: Arc<Mutex<Vec<FakePage>>>,
    }

    #[async_trait]
    impl ViewerSession for FakeSession {
        type Page = FakePage;

        async fn open_pages(&self) -> anyhow::Result<Vec<FakePage>> {
            Ok(self.pages.lock().expect("pages lock").clone())
        }
    }

    fn session(pages: Vec<FakePage>) -> FakeSession {
        FakeSession {
            pages: Arc::new(Mutex::new(pages)),
        }
    }

    const POLL: Duration = Duration::from_millis(5);
    const DEADLINE: Duration = Duration::from_millis(250);

    #[tokio::test]
    async fn token_on_the_original_page_wins_without_new_tabs() {
        let origin = FakePage::new(0, "https://x/detail/1", Some("tok-origin"));
        let session = session(vec![origin.clone()]);

        let discovery =
            wait_for_scan_token(&session, &origin, &[origin.clone()], DEADLINE, POLL)
                .await
                .expect("discovery");
        assert_eq!(discovery.token, "tok-origin");
        assert_eq!(discovery.viewer_url, "https://x/detail/1");
    }

    #[tokio::test]
    async fn newest_new_tab_takes_priority_over_the_original() {
        let origin = FakePage::new(0, "https://x/detail/1", Some("tok-origin"));
        let tab1 = FakePage::new(1, "https://x/viewer/A", Some("tok-a"));
        let tab2 = FakePage::new(2, "https://x/viewer/B", Some("tok-b"));
        let session = session(vec![origin.clone(), tab1, tab2]);

        let discovery =
            wait_for_scan_token(&session, &origin, &[origin.clone()], DEADLINE, POLL)
                .await
                .expect("discovery");
        assert_eq!(discovery.token, "tok-b");
        assert_eq!(discovery.viewer_url, "https://x/viewer/B");
    }

    #[tokio::test]
    async fn original_page_outranks_older_new_tabs() {
        let origin = FakePage::new(0, "https://x/detail/1", Some("tok-origin"));
        // tab2 is the newest but exposes nothing; tab1 has a token but the
        // original page is probed before it.
        let tab1 = FakePage::new(1, "https://x/viewer/A", Some("tok-a"));
        let tab2 = FakePage::new(2, "https://x/viewer/B", None);
        let session = session(vec![origin.clone(), tab1, tab2]);

        let discovery =
            wait_for_scan_token(&session, &origin, &[origin.clone()], DEADLINE, POLL)
                .await
                .expect("discovery");
        assert_eq!(discovery.token, "tok-origin");
    }

    #[tokio::test]
    async fn deadline_expiry_reports_every_distinct_url() {
        let origin = FakePage::new(0, "https://x/detail/1", None);
        let tab = FakePage::new(1, "https://x/viewer/A", None);
        let session = session(vec![origin.clone(), tab]);

        let err = wait_for_scan_token(
            &session,
            &origin,
            &[origin.clone()],
            Duration::from_millis(60),
            POLL,
        )
        .await
        .expect_err("timeout");

        match err {
            ExtractError::ScanIdNotFound { seen_urls, .. } => {
                assert_eq!(
                    seen_urls,
                    vec![
                        "https://x/detail/1".to_owned(),
                        "https://x/viewer/A".to_owned()
                    ]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn token_attached_late_is_still_found() {
        let origin = FakePage::new(0, "https://x/detail/1", None);
        let pages = Arc::new(Mutex::new(vec![origin.clone()]));
        let session = FakeSession {
            pages: Arc::clone(&pages),
        };

        let injector = {
            let pages = Arc::clone(&pages);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                pages
                    .lock()
                    .expect("pages lock")
                    .push(FakePage::new(1, "https://x/viewer/A", Some("tok-late")));
            })
        };

        let discovery =
            wait_for_scan_token(&session, &origin, &[origin.clone()], DEADLINE, POLL)
                .await
                .expect("discovery");
        assert_eq!(discovery.token, "tok-late");
        injector.await.expect("injector task");
    }
}
