//! # Vote export
//!
//! Dumps the words a user classified as difficult or non-existent to a JSON file, used to build
//! the game's word lists.
//!
//! ## Output
//! ```json
//! { "words": ["zigurat", "xilofago"] }
//! ```
//!
//! ## Notes
//! - Pages until the backend returns an empty page, the total is not known up front.
//! - Words keep the order the votes were cast in.
use std::path::PathBuf;

use anyhow::{Context, bail};
use indicatif::{ProgressBar, ProgressStyle};
use remote::{
    Backend,
    RemoteError,
    models::{Classification, PollId, Scope},
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub user_id: String,
    pub poll_id: PollId,
    pub filters: Vec<Classification>,
    pub page_size: u32,
    pub output: PathBuf,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Exported {
    pub words: Vec<String>,
}

pub fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} palabras {msg}")
    {
        pb.set_style(style);
    }
    pb
}

pub async fn collect_words(
    backend: &dyn Backend,
    scope: &Scope,
    filters: &[Classification],
    page_size: u32,
    pb: &ProgressBar,
) -> Result<Vec<String>, RemoteError> {
    let mut words = Vec::new();
    let mut page = 1;

    loop {
        pb.set_message(format!("página {page}"));

        let batch = backend.voted_words(scope, filters, page, page_size).await?;
        if batch.is_empty() {
            break;
        }

        pb.inc(batch.len() as u64);
        words.extend(batch);
        page += 1;
    }

    Ok(words)
}

/// Writes the export and returns how many words it holds.
pub async fn export_votes(
    backend: &dyn Backend,
    options: &ExportOptions,
    pb: &ProgressBar,
) -> anyhow::Result<usize> {
    if options.page_size == 0 {
        bail!("page size must be positive");
    }

    let scope = Scope::new(options.user_id.clone(), options.poll_id);
    let words = collect_words(backend, &scope, &options.filters, options.page_size, pb)
        .await
        .context("Error al obtener votos")?;
    pb.finish_with_message("listo");

    let count = words.len();
    let json = serde_json::to_string_pretty(&Exported { words })?;
    tokio::fs::write(&options.output, json)
        .await
        .with_context(|| format!("writing {}", options.output.display()))?;

    info!("Exported {count} words to {}", options.output.display());
    Ok(count)
}
