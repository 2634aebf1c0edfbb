use anyhow::Context as _;
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::error::ExtractError;
use crate::formats::{ChapterRecord, PageManifestEntry};

/// Form field carrying the scan token on the chapter-list call.
const TOKEN_FIELD: &str = "SCANID";
/// Form fields of the page-manifest call.
const CHAPTER_FIELD: &str = "EMID";
const BOOK_FIELD: &str = "BOOKID";
/// Nested field of the page-manifest response holding the image list.
const MANIFEST_LIST_FIELD: &str = "JGPS";
const STORAGE_KEY_FIELD: &str = "hfsKey";

const SNIPPET_LIMIT: usize = 500;

/// One authenticated form-encoded POST expected to return JSON. Non-2xx
/// statuses and non-JSON bodies are surfaced immediately with a bounded
/// body snippet; there are no retries.
pub async fn post_form_json(
    client: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
    headers: HeaderMap,
) -> anyhow::Result<Value> {
    let mut body = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in form {
        body.append_pair(name, value);
    }
    let body = body.finish();

    let response = client
        .post(url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .with_context(|| format!("POST {url}"))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("read response body: {url}"))?;

    if !status.is_success() {
        return Err(ExtractError::MalformedApiResponse {
            url: url.to_owned(),
            reason: format!("http {}", status.as_u16()),
            snippet: snippet(&text),
        }
        .into());
    }

    serde_json::from_str(&text).map_err(|_| {
        ExtractError::MalformedApiResponse {
            url: url.to_owned(),
            reason: "body is not json".to_owned(),
            snippet: snippet(&text),
        }
        .into()
    })
}

/// Chapter-list call: the scan token is the sole payload field. A
/// response without a list-typed `data` field aborts the run.
pub async fn fetch_chapter_list(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    scan_token: &str,
) -> anyhow::Result<Vec<ChapterRecord>> {
    let value = post_form_json(client, url, &[(TOKEN_FIELD, scan_token)], headers).await?;
    chapter_list_from_response(url, &value)
}

fn chapter_list_from_response(url: &str, value: &Value) -> anyhow::Result<Vec<ChapterRecord>> {
    let Some(data) = value.get("data").and_then(Value::as_array) else {
        return Err(ExtractError::MalformedApiResponse {
            url: url.to_owned(),
            reason: "missing list field `data`".to_owned(),
            snippet: snippet(&value.to_string()),
        }
        .into());
    };

    let mut chapters = Vec::new();
    for item in data {
        let Some(id) = item
            .get("EMID")
            .or_else(|| item.get("emid"))
            .and_then(json_string)
        else {
            tracing::debug!("chapter entry without a usable id; skipping");
            continue;
        };
        let name = item
            .get("EFRAGMENTNAME")
            .and_then(json_string)
            .unwrap_or_else(|| id.clone());
        chapters.push(ChapterRecord {
            id,
            name,
            ordinal: chapters.len(),
        });
    }
    Ok(chapters)
}

/// Page-manifest call for one chapter. Call-level failures are fatal like
/// the chapter list's, but a response without the nested image list only
/// skips this chapter: partial extraction beats total failure here.
pub async fn fetch_page_manifest(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    chapter_id: &str,
    viewer_book_id: &str,
) -> anyhow::Result<Vec<PageManifestEntry>> {
    let value = post_form_json(
        client,
        url,
        &[(CHAPTER_FIELD, chapter_id), (BOOK_FIELD, viewer_book_id)],
        headers,
    )
    .await?;
    Ok(page_manifest_from_response(chapter_id, &value))
}

fn page_manifest_from_response(chapter_id: &str, value: &Value) -> Vec<PageManifestEntry> {
    let Some(entries) = value
        .get("data")
        .and_then(|data| data.get(MANIFEST_LIST_FIELD))
        .and_then(Value::as_array)
    else {
        tracing::warn!(chapter_id, "page manifest has no image list; skipping chapter");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| entry.get(STORAGE_KEY_FIELD).and_then(json_string))
        .map(|key| PageManifestEntry { key })
        .collect()
}

fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn snippet(body: &str) -> String {
    body.trim()
        .replace(['\n', '\r'], " ")
        .chars()
        .take(SNIPPET_LIMIT)
        .collect()
}
