use std::fs::OpenOptions;
use std::io::{BufWriter, Write as _};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use tokio::io::AsyncBufReadExt as _;

use crate::assemble::{BookAssembler, write_acquisition_record};
use crate::bridge;
use crate::browser::BrowserSession;
use crate::cli::FetchArgs;
use crate::discover;
use crate::error::ExtractError;
use crate::formats::AcquisitionRecord;
use crate::site::{SiteConfig, last_path_segment};
use crate::{acquire, api};

/// The whole extraction run: login pause, scan-token discovery, session
/// bridging, then one forward pass walking chapters and acquiring pages
/// into the assembler, per-chapter interleaved.
pub async fn run(args: FetchArgs) -> anyhow::Result<()> {
    let site = SiteConfig {
        scan_timeout: Duration::from_secs(args.scan_timeout_secs),
        nav_timeout: Duration::from_secs(args.nav_timeout_secs),
        ..SiteConfig::default()
    };

    let escaped_book_id = urlencoding::encode(&args.book_id).into_owned();
    let out_pdf = PathBuf::from(&args.output).join(format!("{escaped_book_id}.pdf"));
    if out_pdf.exists() {
        anyhow::bail!("output document already exists: {}", out_pdf.display());
    }

    let book_dir = PathBuf::from(&args.downloads).join(acquire::chapter_dir_name(&args.book_id));
    let log_path = book_dir.join("manifest.jsonl");
    if log_path.exists() {
        anyhow::bail!("acquisition log already exists: {}", log_path.display());
    }

    let session = BrowserSession::launch(&site, args.chrome.as_deref())
        .await
        .context("launch browser session")?;

    wait_for_login().await?;

    let detail_url = site.detail_url(&args.book_id);
    tracing::info!(url = %detail_url, "opening book detail page");
    let origin_page = session
        .open_detail(&detail_url)
        .await
        .context("open detail page")?;

    let before_click = session.open_pages().await.context("snapshot open pages")?;
    session.click_read_button().await.context("click read button")?;

    let discovery = discover::wait_for_scan_token(
        &session,
        &origin_page,
        &before_click,
        site.scan_timeout,
        site.poll_interval,
    )
    .await?;
    tracing::info!(viewer_url = %discovery.viewer_url, "scan token discovered");

    let viewer_book_id = last_path_segment(&discovery.viewer_url).ok_or_else(|| {
        ExtractError::MissingViewerContext {
            url: discovery.viewer_url.clone(),
        }
    })?;

    let referer = if discovery.viewer_url.is_empty() {
        detail_url.clone()
    } else {
        discovery.viewer_url.clone()
    };

    // Bridge the session: the cookie becomes a request header, and the
    // download client takes its one-shot snapshot of the cookie jar.
    let scoped_cookies = session
        .cookies_for(&site.chapters_api)
        .await
        .context("read cookies for the chapter api")?;
    let kernel_cookie = bridge::bridge_cookie(&scoped_cookies, &site.session_cookie)?;

    let all_cookies = session.all_cookies().await.context("snapshot session cookies")?;
    let client = bridge::bridged_client(&all_cookies)?;

    let headers = bridge::api_headers(
        &site.session_cookie,
        &kernel_cookie,
        &referer,
        &site.accept_language,
    )?;
    let chapters = api::fetch_chapter_list(&client, &site.chapters_api, headers, &discovery.token)
        .await
        .context("fetch chapter list")?;
    tracing::info!(chapters = chapters.len(), "chapter list retrieved");

    std::fs::create_dir_all(&book_dir)
        .with_context(|| format!("create book dir: {}", book_dir.display()))?;
    let log_file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&log_path)
        .with_context(|| format!("create acquisition log: {}", log_path.display()))?;
    let mut log = BufWriter::new(log_file);

    let mut assembler = BookAssembler::new(args.book_id.clone());
    let mut sequence: u32 = 0;

    for chapter in &chapters {
        let headers = bridge::api_headers(
            &site.session_cookie,
            &kernel_cookie,
            &referer,
            &site.accept_language,
        )?;
        let manifest = api::fetch_page_manifest(
            &client,
            &site.chapter_api,
            headers,
            &chapter.id,
            &viewer_book_id,
        )
        .await
        .with_context(|| format!("fetch page manifest: {}", chapter.name))?;
        tracing::info!(chapter = %chapter.name, pages = manifest.len(), "walking chapter");

        let chapter_dir = book_dir.join(acquire::chapter_dir_name(&chapter.name));
        for entry in &manifest {
            sequence += 1;
            let page = acquire::acquire_page(
                &client,
                &site.image_api,
                entry,
                &referer,
                &chapter_dir,
                chapter,
                sequence,
            )
            .await
            .with_context(|| format!("acquire page {sequence}"))?;

            assembler.append_page(&page)?;
            write_acquisition_record(
                &mut log,
                &AcquisitionRecord {
                    sequence: page.sequence,
                    chapter_id: page.chapter.id.clone(),
                    chapter_name: page.chapter.name.clone(),
                    chapter_ordinal: page.chapter.ordinal,
                    image_path: page.image_path.to_string_lossy().to_string(),
                    width_px: page.width_px,
                    height_px: page.height_px,
                    retrieved_at: chrono::Utc::now().to_rfc3339(),
                },
            )?;
            tracing::debug!(sequence, key = %entry.key, "page acquired");
        }
    }

    log.flush().context("flush acquisition log")?;
    session.shutdown().await;

    let toc = assembler.finish(&out_pdf)?;
    tracing::info!(
        pages = sequence,
        toc_entries = toc.len(),
        out = %out_pdf.display(),
        "book assembled"
    );
    Ok(())
}

/// The one human-in-the-loop step: the operator logs in inside the
/// browser window and confirms here. An awaited signal, not a timed
/// sleep.
async fn wait_for_login() -> anyhow::Result<()> {
    println!("A browser window is open on the library login page.");
    println!("Complete the login there, then press Enter here to continue...");

    let mut line = String::new();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    stdin
        .read_line(&mut line)
        .await
        .context("read login confirmation from stdin")?;
    Ok(())
}
