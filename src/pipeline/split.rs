//! Document splitting: break large PDFs into page-bounded parts.
//!
//! ## Why split at all?
//!
//! A single generation request has a bounded input and, more importantly, a
//! bounded output. A 200-page scan sent in one request comes back truncated.
//! Splitting along page boundaries into groups of at most `max_pages` keeps
//! every request well inside the model's budget while preserving reading
//! order, because the parts are transcribed and concatenated in sequence.
//!
//! ## How
//!
//! `lopdf` edits the PDF structurally: for each group the parsed document is
//! cloned, every page outside the group is deleted, unreferenced objects are
//! pruned and the result is serialised. Nothing is rendered or re-encoded, so
//! text layers and embedded images survive unchanged.
//!
//! ## Failure policy
//!
//! Splitting is an optimisation. If the PDF cannot be parsed, a part
//! cannot be written, or the parser panics on a malformed file, the original
//! unit is returned unchanged with a warning and the job continues.
//!
//! Parsing is CPU-bound; async callers run [`split_unit`] on
//! `tokio::task::spawn_blocking`.

use crate::pipeline::input::UploadUnit;
use lopdf::Document;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Number of pages in a PDF, or None if it cannot be parsed.
pub fn page_count(bytes: &[u8]) -> Option<usize> {
    panic::catch_unwind(|| Document::load_mem(bytes).ok().map(|doc| doc.get_pages().len()))
        .ok()
        .flatten()
}

/// Split `unit` into parts of at most `max_pages` pages.
///
/// Non-PDF units, PDFs within the limit, and PDFs that fail to split are
/// returned as a single unchanged unit. Parts are named
/// `<stem>_part<N>.pdf` with N starting at 1.
pub fn split_unit(unit: &UploadUnit, max_pages: usize) -> Vec<UploadUnit> {
    if !unit.is_pdf() || max_pages == 0 {
        return vec![unit.clone()];
    }
    whole_on_panic(unit, || split_pdf(unit, max_pages))
}

/// Run `split`, returning `unit` unchanged if it panics.
fn whole_on_panic(unit: &UploadUnit, split: impl FnOnce() -> Vec<UploadUnit>) -> Vec<UploadUnit> {
    match panic::catch_unwind(AssertUnwindSafe(split)) {
        Ok(parts) => parts,
        Err(_) => {
            warn!("PDF parser panicked on '{}', sending it whole", unit.name());
            vec![unit.clone()]
        }
    }
}

fn split_pdf(unit: &UploadUnit, max_pages: usize) -> Vec<UploadUnit> {

    let doc = match Document::load_mem(unit.data()) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Could not parse '{}' for splitting, sending it whole: {}", unit.name(), e);
            return vec![unit.clone()];
        }
    };

    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    if pages.len() <= max_pages {
        debug!("'{}': {} pages, no split needed", unit.name(), pages.len());
        return vec![unit.clone()];
    }

    let stem = file_stem(unit.name());
    let mut parts = Vec::with_capacity(pages.len().div_ceil(max_pages));

    for (idx, group) in pages.chunks(max_pages).enumerate() {
        let part_num = idx + 1;
        match extract_pages(&doc, &pages, group) {
            Ok(bytes) => {
                let name = format!("{}_part{}.pdf", stem, part_num);
                debug!("'{}': {} pages, {} bytes", name, group.len(), bytes.len());
                parts.push(unit.derive_part(part_num, name, bytes));
            }
            Err(e) => {
                warn!(
                    "Could not write part {} of '{}', sending it whole: {}",
                    part_num,
                    unit.name(),
                    e
                );
                return vec![unit.clone()];
            }
        }
    }

    debug!(
        "Split '{}' ({} pages) into {} parts of ≤{} pages",
        unit.name(),
        pages.len(),
        parts.len(),
        max_pages
    );
    parts
}

/// Serialise a copy of `doc` that keeps only the pages in `keep`.
fn extract_pages(doc: &Document, all_pages: &[u32], keep: &[u32]) -> Result<Vec<u8>, String> {
    let mut part = doc.clone();
    let drop: Vec<u32> = all_pages
        .iter()
        .copied()
        .filter(|p| !keep.contains(p))
        .collect();
    part.delete_pages(&drop);
    part.prune_objects();

    let mut out = Vec::new();
    part.save_to(&mut out).map_err(|e| e.to_string())?;
    Ok(out)
}

fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}
