// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::paths::PathProvider;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client, Response};
use std::fs;
use std::io::{Cursor, IsTerminal, Read};
use std::path::Path;
use tar::Archive;
use tracing::debug;
use zip::ZipArchive;

pub(crate) const CACHE_MIN_AGE_SECS: i64 = 900; // 15 minutes

/// A file taken out of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub filename: String,
    pub content: Vec<u8>,
}

impl SourceFile {
    pub fn is_rules(&self) -> bool {
        has_extension(&self.filename, "rules")
    }
}

fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    TarGz,
    Zip,
    Rules,
}

impl Format {
    fn detect(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Format::TarGz)
        } else if lower.ends_with(".zip") {
            Some(Format::Zip)
        } else if lower.ends_with(".rules") {
            Some(Format::Rules)
        } else {
            None
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Format::TarGz => "tar.gz",
            Format::Zip => "zip",
            Format::Rules => "rules",
        }
    }
}

/// Unpack a fetched source. `name` is only used to pick the format.
pub fn extract(name: &str, data: &[u8]) -> Result<Vec<SourceFile>> {
    let format = Format::detect(name)
        .ok_or_else(|| anyhow::anyhow!("Unsupported source format: {}", name))?;
    let mut files = Vec::new();

    match format {
        Format::TarGz => {
            let mut archive = Archive::new(GzDecoder::new(Cursor::new(data)));
            for entry in archive.entries().context("Failed to read tar archive")? {
                let mut entry = entry?;
                if entry.header().entry_type().is_dir() {
                    continue;
                }
                let filename = entry.path()?.to_string_lossy().to_string();
                let mut content = Vec::new();
                entry.read_to_end(&mut content)?;
                files.push(SourceFile { filename, content });
            }
        }
        Format::Zip => {
            let mut archive =
                ZipArchive::new(Cursor::new(data)).context("Failed to read zip archive")?;
            for i in 0..archive.len() {
                let mut file = archive.by_index(i)?;
                if file.is_dir() {
                    continue;
                }
                let filename = file.name().to_string();
                let mut content = Vec::new();
                file.read_to_end(&mut content)?;
                files.push(SourceFile { filename, content });
            }
        }
        Format::Rules => {
            let filename = Path::new(name)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| name.to_string());
            files.push(SourceFile {
                filename,
                content: data.to_vec(),
            });
        }
    }

    debug!("Extracted {} files from {}", files.len(), name);
    Ok(files)
}

/// Where the files of a source come from.
pub trait SourceFetcher {
    fn fetch(&self, uri: &str, force: bool) -> Result<Vec<SourceFile>>;
}

/// Reads a local archive, rules file, or directory of rules files.
pub struct LocalFetcher;

impl SourceFetcher for LocalFetcher {
    fn fetch(&self, uri: &str, _force: bool) -> Result<Vec<SourceFile>> {
        let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        if path.is_dir() {
            let mut files = Vec::new();
            for entry in fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {}", path.display()))?
            {
                let entry_path = entry?.path();
                let name = entry_path.to_string_lossy().to_string();
                if Format::detect(&name) == Some(Format::Rules) {
                    let data = fs::read(&entry_path)
                        .with_context(|| format!("Failed to read {}", entry_path.display()))?;
                    files.extend(extract(&name, &data)?);
                }
            }
            files.sort_by(|a, b| a.filename.cmp(&b.filename));
            return Ok(files);
        }
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        extract(&path.to_string_lossy(), &data)
    }
}

/// Downloads over HTTP(S), caching the download by the md5 of its URL.
pub struct HttpFetcher<'a> {
    path_provider: &'a dyn PathProvider,
    quiet: bool,
}

impl<'a> HttpFetcher<'a> {
    pub fn new(path_provider: &'a dyn PathProvider, quiet: bool) -> Self {
        Self {
            path_provider,
            quiet,
        }
    }

    fn download(&self, url: &str, cache_path: &Path, force: bool) -> Result<Vec<u8>> {
        if let Some(age) = cache_age(cache_path).filter(|age| !force && *age < CACHE_MIN_AGE_SECS) {
            if !self.quiet {
                println!(
                    "  Fetched {} seconds ago, using the cached copy",
                    age.to_string().bright_black()
                );
            }
            return fs::read(cache_path)
                .with_context(|| format!("Failed to read cached {}", cache_path.display()));
        }

        if !self.quiet {
            println!("  Fetching {}", url.bright_black());
        }
        let response = http_get(url)?;
        let show_progress = !self.quiet && std::io::stdout().is_terminal();
        let data = read_body(response, show_progress)?;
        write_cache(cache_path, &data)?;
        if !self.quiet {
            println!("  Received {} bytes", data.len().to_string().green());
        }
        Ok(data)
    }
}

impl SourceFetcher for HttpFetcher<'_> {
    fn fetch(&self, url: &str, force: bool) -> Result<Vec<SourceFile>> {
        // Query strings would hide the extension.
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let format = Format::detect(path).unwrap_or(Format::TarGz);
        let cache_path = cache_path(self.path_provider, url, format);
        let data = self.download(url, &cache_path, force)?;
        extract(&cache_path.to_string_lossy(), &data)
    }
}

fn user_agent() -> String {
    format!(
        "suricasta-console/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// GET `url` with our user agent. Anything but a 2xx is an error.
pub(crate) fn http_get(url: &str) -> Result<Response> {
    let user_agent = user_agent();
    debug!("GET {} as {}", url, user_agent);
    let response = Client::builder()
        .user_agent(user_agent)
        .build()?
        .get(url)
        .send()
        .with_context(|| format!("Request to {url} failed"))?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("{url} answered with HTTP {status}");
    }
    Ok(response)
}

/// Seconds since `path` was last written, `None` if it cannot be told.
pub(crate) fn cache_age(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(
        Utc::now()
            .signed_duration_since(DateTime::<Utc>::from(modified))
            .num_seconds(),
    )
}

pub(crate) fn write_cache(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        crate::paths::ensure_dir_exists(dir)
            .with_context(|| format!("Cannot create cache directory {}", dir.display()))?;
    }
    fs::write(path, data).with_context(|| format!("Cannot write cache file {}", path.display()))
}

/// The whole body, with a progress bar when the size is known.
fn read_body(mut response: Response, show_progress: bool) -> Result<Vec<u8>> {
    let progress = match response.content_length() {
        Some(length) if show_progress => {
            let bar = ProgressBar::new(length).with_style(
                ProgressStyle::with_template("  {bar:40.cyan/blue} {bytes}/{total_bytes} {eta}")?
                    .progress_chars("=> "),
            );
            Some(bar)
        }
        _ => None,
    };

    let mut data = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
    let mut chunk = [0; 16 * 1024];
    loop {
        let n = response.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
        if let Some(bar) = &progress {
            bar.inc(n as u64);
        }
    }
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    Ok(data)
}

fn cache_path(path_provider: &dyn PathProvider, url: &str, format: Format) -> std::path::PathBuf {
    let url_hash = format!("{:x}", md5::compute(url.as_bytes()));
    path_provider
        .cache_dir()
        .join(format!("{}.{}", url_hash, format.suffix()))
}

/// Pick a fetcher by URI scheme.
pub fn fetcher_for<'a>(
    uri: &str,
    path_provider: &'a dyn PathProvider,
    quiet: bool,
) -> Box<dyn SourceFetcher + 'a> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        Box::new(HttpFetcher::new(path_provider, quiet))
    } else {
        Box::new(LocalFetcher)
    }
}
