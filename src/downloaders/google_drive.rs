//! Google Drive downloader
//!
//! Resolves share links to a file id, then walks Drive's confirmation page
//! for large files before streaming the payload.

use anyhow::{bail, Context, Result};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

use super::http::filename_from_disposition;

/// File id from a Drive share link (`uc?id=`, `open?id=`, `file/d/<id>`)
pub fn file_id_from_url(url: &str) -> Option<String> {
    static PATH_ID_RE: OnceLock<Regex> = OnceLock::new();
    static QUERY_ID_RE: OnceLock<Regex> = OnceLock::new();

    let path_re = PATH_ID_RE.get_or_init(|| Regex::new(r"/file/d/([A-Za-z0-9_-]+)").unwrap());
    let query_re = QUERY_ID_RE.get_or_init(|| Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").unwrap());

    path_re
        .captures(url)
        .or_else(|| query_re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Google Drive downloader
pub struct GoogleDriveDownloader {
    client: Client,
}

impl GoogleDriveDownloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .cookie_store(true) // Needed for Google's confirmation flow
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Direct download URL for a Drive file id
    pub fn get_download_url(&self, file_id: &str) -> Result<String> {
        let initial_url = format!(
            "https://drive.usercontent.google.com/download?id={}&export=download&confirm=t",
            file_id
        );

        debug!("Fetching Google Drive page: {}", initial_url);

        let response = self
            .client
            .get(&initial_url)
            .send()
            .context("Failed to connect to Google Drive")?;

        let final_url = response.url().to_string();

        // Anything that isn't HTML is the file itself
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"));
        if !is_html {
            return Ok(final_url);
        }

        let html = response.text().context("Failed to read response")?;
        parse_confirmation_page(&html, file_id)
    }

    /// Download a Drive file into `dst`.
    ///
    /// The file is named `filename` if given, otherwise after the server's
    /// `Content-Disposition`, falling back to the file id.
    pub fn download_to_dir(&self, file_id: &str, dst: &Path, filename: Option<&str>) -> Result<PathBuf> {
        let url = self.get_download_url(file_id)?;
        debug!("Downloading from: {}", url);

        let mut response = self
            .client
            .get(&url)
            .send()
            .context("Failed to connect to Google Drive")?
            .error_for_status()
            .context("Google Drive download failed")?;

        let name = match filename {
            Some(name) => name.to_string(),
            None => response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .and_then(filename_from_disposition)
                .unwrap_or_else(|| file_id.to_string()),
        };

        std::fs::create_dir_all(dst)
            .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
        let output_path = dst.join(&name);

        let file = File::create(&output_path)
            .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
        let mut writer = BufWriter::new(file);
        let bytes = response
            .copy_to(&mut writer)
            .context("Error reading response")?;
        writer.flush()?;

        info!("Downloaded {} ({} bytes) from Google Drive", name, bytes);
        Ok(output_path)
    }
}

/// Parse Google Drive confirmation page to extract download URL
fn parse_confirmation_page(html: &str, file_id: &str) -> Result<String> {
    static UUID_RE: OnceLock<Regex> = OnceLock::new();
    static DOWNLOAD_RE: OnceLock<Regex> = OnceLock::new();
    static JSON_RE: OnceLock<Regex> = OnceLock::new();
    static CONFIRM_RE: OnceLock<Regex> = OnceLock::new();
    static ERROR_RE: OnceLock<Regex> = OnceLock::new();

    let usercontent = |extra: &str| {
        format!(
            "https://drive.usercontent.google.com/download?id={}&export=download&{}",
            file_id, extra
        )
    };

    // Error pages first so a quota message is not mistaken for a link
    let error_re =
        ERROR_RE.get_or_init(|| Regex::new(r#"<p class="uc-error-subcaption">(.*?)</p>"#).unwrap());
    if let Some(caps) = error_re.captures(html) {
        bail!("Google Drive error: {}", &caps[1]);
    }

    let uuid_re = UUID_RE.get_or_init(|| Regex::new(r#"uuid[&=]([a-f0-9-]+)"#).unwrap());
    if let Some(caps) = uuid_re.captures(html) {
        debug!("Found UUID token: {}", &caps[1]);
        return Ok(usercontent(&format!("confirm=t&uuid={}", &caps[1])));
    }

    let download_re =
        DOWNLOAD_RE.get_or_init(|| Regex::new(r#"href="(/uc\?export=download[^"]+)"#).unwrap());
    if let Some(caps) = download_re.captures(html) {
        return Ok(format!("https://docs.google.com{}", caps[1].replace("&amp;", "&")));
    }

    if let Some(url) = form_download_url(html) {
        debug!("Found download URL via form parsing: {}", url);
        return Ok(url);
    }

    let json_re = JSON_RE.get_or_init(|| Regex::new(r#""downloadUrl":"([^"]+)""#).unwrap());
    if let Some(caps) = json_re.captures(html) {
        return Ok(caps[1]
            .replace(r"\u003d", "=")
            .replace(r"\u003f", "?")
            .replace(r"\u0026", "&"));
    }

    let confirm_re = CONFIRM_RE.get_or_init(|| Regex::new(r#"confirm=([a-zA-Z0-9_-]+)"#).unwrap());
    if let Some(caps) = confirm_re.captures(html) {
        return Ok(usercontent(&format!("confirm={}", &caps[1])));
    }

    if html.contains("Virus scan warning") || html.contains("can't scan this file for viruses") {
        return Ok(usercontent("confirm=t"));
    }

    debug!(
        "Unrecognised Drive page (first 500 chars): {}",
        html.chars().take(500).collect::<String>()
    );
    bail!("Could not extract download URL from Google Drive confirmation page")
}

/// Download form action plus its hidden inputs as a query string
fn form_download_url(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let form_selector = Selector::parse("form").ok()?;
    let input_selector = Selector::parse(r#"input[type="hidden"]"#).ok()?;

    document.select(&form_selector).find_map(|form| {
        let action = form.value().attr("action")?;
        if !(action.contains("download") || action.contains("uc?")) {
            return None;
        }

        let mut url = action.replace("&amp;", "&");
        let params: BTreeMap<&str, &str> = form
            .select(&input_selector)
            .filter_map(|input| Some((input.value().attr("name")?, input.value().attr("value")?)))
            .collect();

        if !params.is_empty() {
            let query = serde_urlencoded::to_string(&params).unwrap_or_default();
            let sep = if url.contains('?') { '&' } else { '?' };
            url = format!("{}{}{}", url, sep, query);
        }
        Some(url)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_from_url() {
        assert_eq!(
            file_id_from_url("https://drive.google.com/file/d/1AbC-xyz_9/view?usp=sharing").as_deref(),
            Some("1AbC-xyz_9")
        );
        assert_eq!(
            file_id_from_url("https://drive.google.com/uc?id=XYZ123&export=download").as_deref(),
            Some("XYZ123")
        );
        assert_eq!(
            file_id_from_url("https://drive.google.com/open?id=OPEN_1").as_deref(),
            Some("OPEN_1")
        );
        assert_eq!(file_id_from_url("https://drive.google.com/"), None);
    }

    #[test]
    fn test_parse_href_pattern() {
        let html = r#"<a href="/uc?export=download&amp;id=ABC123&amp;confirm=t">Download</a>"#;
        let url = parse_confirmation_page(html, "ABC123").unwrap();
        assert_eq!(url, "https://docs.google.com/uc?export=download&id=ABC123&confirm=t");
    }

    #[test]
    fn test_parse_json_pattern() {
        let html = r#"{"downloadUrl":"https://example.com/download\u003fid\u003dABC"}"#;
        let url = parse_confirmation_page(html, "ABC").unwrap();
        assert_eq!(url, "https://example.com/download?id=ABC");
    }

    #[test]
    fn test_parse_form_with_hidden_inputs() {
        let html = r#"<html><body>
            <form id="download-form" action="https://drive.usercontent.google.com/download" method="get">
              <input type="hidden" name="id" value="FILE1">
              <input type="hidden" name="export" value="download">
            </form></body></html>"#;
        let url = parse_confirmation_page(html, "FILE1").unwrap();
        assert_eq!(
            url,
            "https://drive.usercontent.google.com/download?export=download&id=FILE1"
        );
    }

    #[test]
    fn test_parse_uuid_pattern() {
        let html = r#"<input type="hidden" name="uuid" value="x"> uuid=abc-123-def"#;
        let url = parse_confirmation_page(html, "FILE123").unwrap();
        assert!(url.contains("id=FILE123"));
        assert!(url.ends_with("uuid=abc-123-def"));
    }

    #[test]
    fn test_parse_error_message() {
        let html = r#"<p class="uc-error-subcaption">File not found</p>"#;
        let result = parse_confirmation_page(html, "test123");
        assert!(result.unwrap_err().to_string().contains("File not found"));
    }

    #[test]
    fn test_parse_unrecognised_page() {
        assert!(parse_confirmation_page("<html>nothing here</html>", "id").is_err());
    }
}
