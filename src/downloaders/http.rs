//! Blocking HTTP helpers: client construction, filename probing and
//! streaming a response body to disk.

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_DISPOSITION};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Connection timeout: time to establish TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall request timeout. Model checkpoints are several GB.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// Build the shared blocking client
pub fn client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("exnavy/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

fn with_auth(request: RequestBuilder, header: Option<&str>) -> RequestBuilder {
    match header {
        Some(value) => request.header(AUTHORIZATION, value),
        None => request,
    }
}

/// Reduce a remote-supplied name to a bare file name.
///
/// Only the last path component is kept (either separator). Empty names
/// and `.`/`..` yield `None`, so the result can be joined onto a directory
/// without leaving it.
pub fn safe_filename(name: &str) -> Option<String> {
    let last = name.trim().rsplit(['/', '\\']).next()?.trim();
    // Drive-relative names such as `C:evil.ckpt`
    if last.is_empty() || last.contains(':') {
        return None;
    }
    Path::new(last)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Filename from a `Content-Disposition` header value
pub fn filename_from_disposition(value: &str) -> Option<String> {
    static FILENAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = FILENAME_RE.get_or_init(|| Regex::new(r#"filename="?([^";]+)"?"#).unwrap());

    re.captures(value)
        .and_then(|caps| caps.get(1))
        .and_then(|m| safe_filename(m.as_str()))
}

/// Percent-decoded last path segment of a URL, ignoring query and fragment.
///
/// Empty when the segment decodes to something that is not a plain file
/// name.
pub fn filename_from_url(url: &str) -> String {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let raw = path.rsplit('/').next().unwrap_or_default();

    let decoded = urlencoding::decode(raw)
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    safe_filename(&decoded).unwrap_or_default()
}

/// Ask the server what the file at `url` is called.
///
/// Sends a HEAD request; uses `Content-Disposition` when present, otherwise
/// the decoded URL basename.
pub fn remote_filename(url: &str, header: Option<&str>) -> Result<String> {
    let client = client()?;
    let response = with_auth(client.head(url), header)
        .send()
        .with_context(|| format!("HEAD request failed: {}", url))?
        .error_for_status()
        .with_context(|| format!("HEAD request rejected: {}", url))?;

    let from_header = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition);

    Ok(match from_header {
        Some(name) => {
            debug!("Content-Disposition filename for {}: {}", url, name);
            name
        }
        None => filename_from_url(response.url().as_str()),
    })
}

/// Stream `url` into `output_path`, creating parent directories.
///
/// Returns the number of bytes written.
pub fn download_to_file(url: &str, output_path: &Path, header: Option<&str>) -> Result<u64> {
    let client = client()?;
    let mut response = with_auth(client.get(url), header)
        .send()
        .with_context(|| format!("Failed to connect to {}", url))?
        .error_for_status()
        .with_context(|| format!("Download failed: {}", url))?;

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let file = File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);
    let bytes = response
        .copy_to(&mut writer)
        .with_context(|| format!("Error reading response from {}", url))?;
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    debug!("Downloaded {} bytes to {}", bytes, output_path.display());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="model.safetensors""#).as_deref(),
            Some("model.safetensors")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=vae.pt; size=10").as_deref(),
            Some("vae.pt")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn test_disposition_cannot_escape_destination() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="../../escape.ckpt""#).as_deref(),
            Some("escape.ckpt")
        );
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="/etc/cron.d/job""#).as_deref(),
            Some("job")
        );
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="..\..\win.pt""#).as_deref(),
            Some("win.pt")
        );
        assert_eq!(filename_from_disposition(r#"attachment; filename="..""#), None);
        assert_eq!(filename_from_disposition(r#"attachment; filename="dir/""#), None);

        let dst = Path::new("/content/models");
        let name = filename_from_disposition(r#"attachment; filename="../../escape.ckpt""#).unwrap();
        assert_eq!(dst.join(name), Path::new("/content/models/escape.ckpt"));
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("model.safetensors").as_deref(), Some("model.safetensors"));
        assert_eq!(safe_filename(" a/b/vae.pt ").as_deref(), Some("vae.pt"));
        assert_eq!(safe_filename(""), None);
        assert_eq!(safe_filename("."), None);
        assert_eq!(safe_filename("a/.."), None);
        assert_eq!(safe_filename("C:evil.ckpt"), None);
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/files/my%20model.ckpt?download=true"),
            "my model.ckpt"
        );
        assert_eq!(filename_from_url("https://example.com/a/b.pth#frag"), "b.pth");
        assert_eq!(filename_from_url("https://example.com/dir/"), "dir");
        assert_eq!(
            filename_from_url("https://example.com/x/..%2F..%2Fetc%2Fpasswd"),
            "passwd"
        );
        assert_eq!(filename_from_url("https://example.com/%2E%2E"), "");
    }
}
