//! Password-protected zip archives

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use vault_journal::Archiver;
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipWriter};

/// Deflate + AES-256 zip archiver
///
/// Entries are flattened to their file names.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiver;

#[async_trait]
impl Archiver for ZipArchiver {
    async fn create_archive(
        &self,
        source_files: &[PathBuf],
        password: &str,
        destination: &Path,
    ) -> Result<PathBuf> {
        if password.is_empty() {
            bail!("archive password must not be empty");
        }
        let sources = source_files.to_vec();
        let password = password.to_string();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || write_archive(&sources, &password, &destination))
            .await
            .context("Archive task panicked")?
    }
}

fn write_archive(sources: &[PathBuf], password: &str, destination: &Path) -> Result<PathBuf> {
    let file = File::create(destination)
        .with_context(|| format!("Failed to create {}", destination.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .with_aes_encryption(AesMode::Aes256, password);

    for source in sources {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Unusable file name: {}", source.display()))?;
        zip.start_file(name, options)
            .with_context(|| format!("Failed to add {} to archive", name))?;
        let mut input = File::open(source)
            .with_context(|| format!("Failed to open {}", source.display()))?;
        std::io::copy(&mut input, &mut zip)
            .with_context(|| format!("Failed to compress {}", source.display()))?;
        tracing::debug!("Archived {}", name);
    }

    let writer = zip.finish().context("Failed to finalize archive")?;
    let file = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush archive: {}", e.error()))?;
    file.sync_all()?;

    tracing::info!(
        "Created archive {} ({} files)",
        destination.display(),
        sources.len()
    );
    Ok(destination.to_path_buf())
}
