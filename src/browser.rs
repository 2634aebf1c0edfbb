use std::path::Path;

use anyhow::Context as _;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::GetCookiesParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt as _;
use tokio::time::Instant;

use crate::bridge::BridgedCookie;
use crate::discover::{PageContext, ViewerSession};
use crate::site::SiteConfig;

/// The authenticated browsing context. Owns the Chrome process for the
/// run; the login happens interactively in its (headful) window, so the
/// browser is never launched headless.
pub struct BrowserSession {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    page: Page,
    site: SiteConfig,
}

impl BrowserSession {
    /// Launches Chrome with a visible window and opens the entry page.
    pub async fn launch(site: &SiteConfig, chrome: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = BrowserConfig::builder().with_head();
        if let Some(path) = chrome {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|err| anyhow::anyhow!("build browser config: {err}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("launch chrome")?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page(site.entry_url.as_str())
            .await
            .with_context(|| format!("open entry page: {}", site.entry_url))?;

        Ok(Self {
            browser,
            handler_task,
            page,
            site: site.clone(),
        })
    }

    /// Navigates the original page to the book detail page and waits for
    /// the "open viewer" control to materialize.
    pub async fn open_detail(&self, detail_url: &str) -> anyhow::Result<ViewerPage> {
        self.page
            .goto(detail_url)
            .await
            .with_context(|| format!("navigate detail page: {detail_url}"))?;
        self.wait_for_read_button().await?;
        Ok(self.viewer_page(self.page.clone()))
    }

    async fn wait_for_read_button(&self) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.site.nav_timeout;
        loop {
            match self
                .page
                .find_element(self.site.read_button_selector.as_str())
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(anyhow::anyhow!(
                            "read button did not appear within {}s: {err}",
                            self.site.nav_timeout.as_secs()
                        ));
                    }
                }
            }
            tokio::time::sleep(self.site.poll_interval).await;
        }
    }

    /// Dispatches the click that opens the viewer. Fire-and-forget: the
    /// triggered navigation may detach the element mid-click, which is
    /// not a failure of the dispatch itself.
    pub async fn click_read_button(&self) -> anyhow::Result<()> {
        let button = self
            .page
            .find_element(self.site.read_button_selector.as_str())
            .await
            .context("locate read button")?;
        if let Err(err) = button.click().await {
            tracing::debug!(?err, "click completion not observed");
        }
        Ok(())
    }

    pub async fn open_pages(&self) -> anyhow::Result<Vec<ViewerPage>> {
        let pages = self.browser.pages().await.context("list open pages")?;
        Ok(pages.into_iter().map(|page| self.viewer_page(page)).collect())
    }

    fn viewer_page(&self, page: Page) -> ViewerPage {
        ViewerPage {
            page,
            token_element_id: self.site.token_element_id.clone(),
        }
    }

    /// Cookies visible to the session scoped to one URL.
    pub async fn cookies_for(&self, url: &str) -> anyhow::Result<Vec<BridgedCookie>> {
        let params = GetCookiesParams::builder().urls(vec![url.to_owned()]).build();
        let response = self
            .page
            .execute(params)
            .await
            .with_context(|| format!("read cookies for {url}"))?;
        Ok(response.result.cookies.iter().map(to_bridged).collect())
    }

    /// Snapshot of every cookie in the browsing session, taken once for
    /// the bridged download client.
    pub async fn all_cookies(&self) -> anyhow::Result<Vec<BridgedCookie>> {
        let cookies = self
            .browser
            .get_cookies()
            .await
            .context("read session cookies")?;
        Ok(cookies.iter().map(to_bridged).collect())
    }

    /// Closes viewer tabs spawned by the click-through, then the browser.
    pub async fn shutdown(mut self) {
        if let Ok(pages) = self.browser.pages().await {
            for page in pages {
                if page.target_id() != self.page.target_id() {
                    let _ = page.close().await;
                }
            }
        }
        if let Err(err) = self.browser.close().await {
            tracing::debug!(?err, "browser close failed");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

#[async_trait]
impl ViewerSession for BrowserSession {
    type Page = ViewerPage;

    async fn open_pages(&self) -> anyhow::Result<Vec<ViewerPage>> {
        BrowserSession::open_pages(self).await
    }
}

fn to_bridged(cookie: &chromiumoxide::cdp::browser_protocol::network::Cookie) -> BridgedCookie {
    BridgedCookie {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: cookie.domain.clone(),
        path: cookie.path.clone(),
    }
}

/// One open page as seen by scan-token discovery.
#[derive(Clone)]
pub struct ViewerPage {
    page: Page,
    token_element_id: String,
}

#[async_trait]
impl PageContext for ViewerPage {
    fn same_page(&self, other: &Self) -> bool {
        self.page.target_id() == other.page.target_id()
    }

    async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    async fn probe_token(&self) -> Option<String> {
        let script = token_probe_script(&self.token_element_id);
        let result = match self.page.evaluate(script).await {
            Ok(result) => result,
            Err(err) => {
                tracing::trace!(?err, "token probe evaluation failed");
                return None;
            }
        };
        let value: Option<String> = result.into_value().ok()?;
        let value = value?.trim().to_owned();
        if value.is_empty() { None } else { Some(value) }
    }
}

/// Probe script walking every same-origin frame of the page. Per frame it
/// tries the selector priority list (exact id, case-insensitive id, name
/// attribute) and per element the attribute value before the live
/// property value, returning the first non-blank string.
fn token_probe_script(element_id: &str) -> String {
    let id_literal = serde_json::Value::String(element_id.to_owned()).to_string();
    format!(
        r#"(() => {{
  const id = {id_literal};
  const read = (el) => {{
    if (!el) return null;
    const getters = [() => el.getAttribute('value'), () => el.value];
    for (const getter of getters) {{
      try {{
        const v = getter();
        if (v != null && String(v).trim() !== '') return String(v).trim();
      }} catch (e) {{}}
    }}
    return null;
  }};
  const docs = [];
  const visit = (win) => {{
    try {{
      if (win.document) docs.push(win.document);
      for (let i = 0; i < win.frames.length; i++) visit(win.frames[i]);
    }} catch (e) {{}}
  }};
  visit(window);
  const selectors = [
    'input#' + id,
    'input[id="' + id + '" i]',
    '#' + id,
    '[id="' + id + '" i]',
    'input[name="' + id + '" i]',
  ];
  for (const doc of docs) {{
    for (const sel of selectors) {{
      let el = null;
      try {{ el = doc.querySelector(sel); }} catch (e) {{}}
      const v = read(el);
      if (v) return v;
    }}
  }}
  return null;
}})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_probe_script_embeds_the_element_id_once_quoted() {
        let script = token_probe_script("scanid");
        assert!(script.contains(r#"const id = "scanid";"#));
        assert!(script.contains("querySelector"));
    }

    #[test]
    fn token_probe_script_escapes_hostile_ids() {
        let script = token_probe_script(r#"sc"an'id"#);
        assert!(script.contains(r#"const id = "sc\"an'id";"#));
    }
}
