use std::time::Duration;

use url::Url;

/// Endpoints, selectors and timeouts of the e-reserve platform. The
/// defaults describe the production site; tests and the CLI override the
/// pieces they need.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Landing page opened for the interactive login.
    pub entry_url: String,
    /// Detail-page URL template with a `{book_id}` placeholder.
    pub detail_url_template: String,
    /// CSS selector of the "open viewer" control on the detail page.
    pub read_button_selector: String,
    /// Chapter-list API endpoint.
    pub chapters_api: String,
    /// Per-chapter page-manifest API endpoint.
    pub chapter_api: String,
    /// Page-image download endpoint.
    pub image_api: String,
    /// Name of the session cookie bridged into API headers.
    pub session_cookie: String,
    /// DOM id of the element exposing the scan token on the viewer page.
    pub token_element_id: String,
    pub accept_language: String,
    /// Deadline for navigations and element waits.
    pub nav_timeout: Duration,
    /// Global deadline for the whole scan-token discovery phase.
    pub scan_timeout: Duration,
    /// Sleep between polls of the browser contexts.
    pub poll_interval: Duration,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            entry_url: "https://ereserves.lib.tsinghua.edu.cn/".to_owned(),
            detail_url_template: "https://ereserves.lib.tsinghua.edu.cn/bookDetail/{book_id}"
                .to_owned(),
            read_button_selector: "#app > div > div.main-body > div > div.booksDetail_lft > \
                 div.flex_cc_row > div.booksDetail_right > div.booksBtn > div:nth-child(1) > button"
                .to_owned(),
            chapters_api: "https://ereserves.lib.tsinghua.edu.cn/readkernel/KernelAPI/BookInfo/selectJgpBookChapters"
                .to_owned(),
            chapter_api: "https://ereserves.lib.tsinghua.edu.cn/readkernel/KernelAPI/BookInfo/selectJgpBookChapter"
                .to_owned(),
            image_api: "https://ereserves.lib.tsinghua.edu.cn/readkernel/JPGFile/DownJPGJsNetPage"
                .to_owned(),
            session_cookie: "BotuReadKernel".to_owned(),
            token_element_id: "scanid".to_owned(),
            accept_language: "zh-CN,zh;q=0.9".to_owned(),
            nav_timeout: Duration::from_secs(45),
            scan_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl SiteConfig {
    pub fn detail_url(&self, book_id: &str) -> String {
        self.detail_url_template
            .replace("{book_id}", &urlencoding::encode(book_id))
    }
}

/// Trailing path segment of a URL, ignoring a trailing slash. The viewer
/// page encodes its session-scoped book id there.
pub fn last_path_segment(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let path = url.path().trim_end_matches('/');
    let segment = path.rsplit('/').next().unwrap_or_default();
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_owned())
    }
}
