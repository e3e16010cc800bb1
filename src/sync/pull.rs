/*!
pull.rs - remote snapshot puller.

Asks the service to archive the user's remote workspace, downloads the
archive to a scratch file, validates every entry path, and extracts into
the working directory (overwriting). Unsafe entry paths (absolute, or
containing `..`) abort extraction of the whole archive, fail closed.

Failure policy: every failure mode here is logged and contained; nothing
escapes this module as an error. The primary command already succeeded (or
is independent of this step) by the time a pull runs.

The scratch file is a `tempfile::TempPath`, removed on drop, so cleanup
holds on every exit path including panics mid-extraction.
*/

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use url::Url;

use crate::api::{ApiClient, ZipReply};
use crate::utils::output::{Color, color};
use crate::{log_debug, log_error, log_warn};

/// Classified archive extraction failure.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Absolute or traversal entry path; the whole archive is rejected.
    #[error("archive contains unsafe path: {name}")]
    UnsafePath { name: String },
    #[error("not a valid zip archive: {0}")]
    BadArchive(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Ephemeral descriptor for one pull: signed URL, scratch file, target.
struct RemoteArchiveHandle {
    url: Url,
    scratch: tempfile::TempPath,
    target: PathBuf,
}

impl RemoteArchiveHandle {
    fn new(url: Url, target: &Path) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("agint-snapshot-")
            .suffix(".zip")
            .tempfile()
            .context("Failed to create scratch file for archive download")?
            .into_temp_path();
        Ok(Self {
            url,
            scratch,
            target: target.to_path_buf(),
        })
    }

    async fn fetch(&self, api: &ApiClient) -> Result<()> {
        let written = api.download_to_file(self.url.as_str(), &self.scratch).await?;
        log_debug!("Download complete. Size: {written} bytes");
        if written == 0 {
            log_warn!("Downloaded snapshot archive is empty.");
        }
        Ok(())
    }

    fn extract(&self) -> Result<usize, ExtractError> {
        extract_archive(&self.scratch, &self.target)
    }
}

/// Pull the server-side snapshot of the remote workspace into `target_dir`.
///
/// Infallible at the boundary: all failures are downgraded to logged
/// warnings (unsafe archive paths log as errors, but still do not
/// propagate).
pub async fn pull(api: &ApiClient, target_dir: &Path) {
    let reply = match api.zip_directory().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", color(Color::Red, format!("Error initiating sync: {e}")));
            log_warn!("Sync initiation failed: {e:#}");
            return;
        }
    };

    let stdout = match reply {
        ZipReply::Refused { diagnostic } => {
            let msg = format!("Sync failed (zip step - 400): {diagnostic}");
            eprintln!("{}", color(Color::Red, &msg));
            log_warn!("{msg}");
            return;
        }
        ZipReply::Accepted { stdout } => stdout,
    };

    let url = match stdout.as_deref().filter(|s| s.starts_with("http")) {
        Some(raw) => match Url::parse(raw) {
            Ok(u) => u,
            Err(e) => {
                log_warn!("Sync failed: zip URL does not parse ({e}): {raw}");
                return;
            }
        },
        None => {
            let msg = "Sync failed - could not get a valid zip URL from response.";
            eprintln!("{}", color(Color::Red, msg));
            log_warn!("Zip response missing or invalid stdout URL: {stdout:?}");
            return;
        }
    };
    log_debug!("Zip URL obtained: {url}");

    let handle = match RemoteArchiveHandle::new(url, target_dir) {
        Ok(h) => h,
        Err(e) => {
            log_warn!("Sync failed: {e:#}");
            return;
        }
    };

    if let Err(e) = handle.fetch(api).await {
        log_warn!("Sync download failed: {e:#}");
        return;
    }

    match handle.extract() {
        Ok(count) => log_debug!("Snapshot extraction complete: {count} entries."),
        Err(e @ ExtractError::UnsafePath { .. }) => {
            log_error!("Sync extraction aborted: {e}");
        }
        Err(e) => log_warn!("Sync extraction failed: {e}"),
    }
    // handle drops here; the scratch file is removed on every path above.
}

/// Reject any entry path that is absolute or contains `..`.
/// The whole archive fails on the first offender, before any extraction.
fn validate_entry_names<'a, I>(names: I) -> Result<(), ExtractError>
where
    I: IntoIterator<Item = &'a str>,
{
    for name in names {
        if name.starts_with('/') || name.contains("..") {
            return Err(ExtractError::UnsafePath {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Validate then extract all entries of `archive_path` into `target_dir`,
/// overwriting existing files. Returns the number of extracted entries.
fn extract_archive(archive_path: &Path, target_dir: &Path) -> Result<usize, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    validate_entry_names(names.iter().map(String::as_str))?;

    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        // The server emits a placeholder ".zip" member; not real content.
        if name == ".zip" {
            log_debug!("Skipping extraction of placeholder '.zip' entry.");
            continue;
        }

        let dest = target_dir.join(&name);
        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&dest)?;
        std::io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(mode))?;
        }
        extracted += 1;
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testutil::serve_once;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn api_at(base: &str) -> ApiClient {
        let cfg = Config {
            api_url: base.to_string(),
            api_key: "test-key".into(),
            debug: false,
            spec_path: None,
            background_sync: false,
        };
        ApiClient::new(&cfg).unwrap()
    }

    fn dir_is_empty(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn refused_archive_request_extracts_nothing() {
        let stderr = BASE64.encode("workspace is locked\n");
        let base = serve_once(
            "400 Bad Request",
            "application/json",
            format!(r#"{{"stderr": "{stderr}"}}"#),
        );
        let target = tempdir().unwrap();

        pull(&api_at(&base), target.path()).await;
        assert!(dir_is_empty(target.path()), "a refused zip request writes nothing");
    }

    #[tokio::test]
    async fn missing_or_malformed_download_url_aborts() {
        let base = serve_once(
            "200 OK",
            "application/json",
            r#"{"stdout": "see server log"}"#.into(),
        );
        let target = tempdir().unwrap();
        pull(&api_at(&base), target.path()).await;
        assert!(dir_is_empty(target.path()), "non-http stdout aborts the pull");

        let base = serve_once("200 OK", "application/json", r#"{}"#.into());
        let target = tempdir().unwrap();
        pull(&api_at(&base), target.path()).await;
        assert!(dir_is_empty(target.path()), "absent stdout aborts the pull");
    }

    fn build_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let opts = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            match content {
                Some(bytes) => {
                    writer.start_file(*name, opts).unwrap();
                    writer.write_all(bytes).unwrap();
                }
                None => {
                    writer.add_directory(*name, opts).unwrap();
                }
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn write_zip_file(bytes: &[u8]) -> tempfile::TempPath {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.into_temp_path()
    }

    #[test]
    fn validate_rejects_traversal_and_absolute() {
        assert!(validate_entry_names(["ok.txt", "sub/ok.txt"]).is_ok());
        assert!(validate_entry_names(["../evil.txt"]).is_err());
        assert!(validate_entry_names(["sub/../../evil.txt"]).is_err());
        assert!(validate_entry_names(["/etc/passwd"]).is_err());
    }

    #[test]
    fn extracts_files_and_directories_overwriting() {
        let zip = build_zip(&[
            ("dir/", None),
            ("dir/inner.txt", Some(b"fresh")),
            ("top.txt", Some(b"hello")),
        ]);
        let archive = write_zip_file(&zip);
        let target = tempdir().unwrap();
        std::fs::write(target.path().join("top.txt"), b"stale").unwrap();

        let count = extract_archive(&archive, target.path()).unwrap();
        assert_eq!(count, 2);
        assert_eq!(std::fs::read(target.path().join("top.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(target.path().join("dir/inner.txt")).unwrap(), b"fresh");
    }

    #[test]
    fn one_unsafe_entry_aborts_whole_archive() {
        let zip = build_zip(&[
            ("good.txt", Some(b"fine")),
            ("../evil.txt", Some(b"bad")),
            ("also-good.txt", Some(b"fine")),
        ]);
        let archive = write_zip_file(&zip);
        let target = tempdir().unwrap();

        let err = extract_archive(&archive, target.path()).unwrap_err();
        assert!(matches!(err, ExtractError::UnsafePath { .. }));
        assert!(
            std::fs::read_dir(target.path()).unwrap().next().is_none(),
            "fail closed: zero files extracted"
        );
    }

    #[test]
    fn placeholder_zip_entry_skipped() {
        let zip = build_zip(&[(".zip", Some(b"")), ("real.txt", Some(b"data"))]);
        let archive = write_zip_file(&zip);
        let target = tempdir().unwrap();

        let count = extract_archive(&archive, target.path()).unwrap();
        assert_eq!(count, 1);
        assert!(!target.path().join(".zip").exists());
        assert!(target.path().join("real.txt").exists());
    }

    #[test]
    fn corrupt_archive_is_classified() {
        let archive = write_zip_file(b"definitely not a zip");
        let target = tempdir().unwrap();
        let err = extract_archive(&archive, target.path()).unwrap_err();
        assert!(matches!(err, ExtractError::BadArchive(_)));
    }
}
