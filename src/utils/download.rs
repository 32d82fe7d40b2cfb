//! Artifact downloads and in-process archive handling

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::time::Duration;

/// Fetches release artifacts over HTTP(S)
pub trait Downloader {
    /// Download the full body of `url`
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Check that `url` is reachable without downloading it
    fn probe(&self, url: &str) -> Result<()>;
}

/// Blocking reqwest client
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(15))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("kubestrap/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!("GET {}", url);
        let bytes = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to download {}", url))?
            .error_for_status()
            .with_context(|| format!("HTTP error downloading {}", url))?
            .bytes()
            .with_context(|| format!("Failed to read response body from {}", url))?;
        Ok(bytes.to_vec())
    }

    fn probe(&self, url: &str) -> Result<()> {
        self.client
            .head(url)
            .timeout(Duration::from_secs(10))
            .send()
            .with_context(|| format!("Cannot reach {}", url))?
            .error_for_status()
            .with_context(|| format!("HTTP error from {}", url))?;
        Ok(())
    }
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Check `data` against a `sha256sum`-style line (`<hex>  <file>`) or a bare digest
pub fn verify_sha256(data: &[u8], checksum: &str) -> Result<()> {
    let expected = checksum
        .split_whitespace()
        .next()
        .context("Checksum file is empty")?
        .to_ascii_lowercase();
    let actual = sha256_hex(data);
    if actual != expected {
        anyhow::bail!("Checksum mismatch: expected {}, got {}", expected, actual);
    }
    Ok(())
}

/// Digest for `file_name` in a multi-line `sha256sum` listing
pub fn checksum_for<'a>(listing: &'a str, file_name: &str) -> Option<&'a str> {
    listing.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        (name == file_name).then_some(digest)
    })
}

/// A regular file taken out of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Path inside the archive, without a leading `./`
    pub path: String,
    pub mode: u32,
    pub contents: Vec<u8>,
}

impl ArchiveFile {
    /// Last path component
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Unpack every regular file from a `.tar.gz` held in memory
pub fn unpack_tar_gz(data: &[u8]) -> Result<Vec<ArchiveFile>> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let mut files = Vec::new();

    for entry in archive.entries().context("Failed to read archive")? {
        let mut entry = entry.context("Corrupt archive entry")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .context("Archive entry has an invalid path")?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        if path.split('/').any(|c| c == "..") {
            anyhow::bail!("Archive entry escapes the target directory: {}", path);
        }
        let mode = entry.header().mode().unwrap_or(0o644);
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .with_context(|| format!("Failed to read {} from archive", path))?;
        files.push(ArchiveFile {
            path,
            mode,
            contents,
        });
    }

    Ok(files)
}

#[cfg(test)]
pub(crate) fn build_tar_gz(files: &[(&str, &[u8], u32)]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}
