//! Scraper output combiner.
//!
//! Gathers the JSON files the scrapers produced and merges them into a
//! single top-level array, written atomically next to the sources. Each
//! source file is classified once by the shape of its top-level value and
//! handled by that shape for the rest of the pass:
//!
//! - an object contributes one single-key record per entry, in the
//!   object's own key order;
//! - an array contributes its elements verbatim, provided every element
//!   is already a single-key object;
//! - anything else rejects the whole file.
//!
//! Unreadable or malformed files are logged and skipped; the only hard
//! failure is being unable to write the combined output. Records are never
//! deduplicated here — the indexer owns that decision.

use anyhow::{Context, Result};
use globset::{Glob, GlobSetBuilder};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::ScraperConfig;

/// Top-level shape of one source file, decided once at parse time.
enum SourceShape {
    /// `{key: value, ...}` — each entry becomes a `{key: value}` record.
    Mapping(serde_json::Map<String, Value>),
    /// `[{key: value}, ...]` — every element checked to be a single-key
    /// object, then appended as-is.
    Records(Vec<Value>),
    /// Scalar top level, or an array with a non-conforming element; the
    /// file contributes nothing.
    Rejected,
}

fn classify(value: Value) -> SourceShape {
    match value {
        Value::Object(map) => SourceShape::Mapping(map),
        Value::Array(items) => {
            // One bad element rejects the whole file; no partial acceptance.
            let all_single_key = items
                .iter()
                .all(|item| item.as_object().is_some_and(|obj| obj.len() == 1));
            if all_single_key {
                SourceShape::Records(items)
            } else {
                SourceShape::Rejected
            }
        }
        _ => SourceShape::Rejected,
    }
}

/// Outcome of a combine pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CombineSummary {
    pub files_read: usize,
    pub files_skipped: usize,
    pub records: usize,
    pub output: PathBuf,
}

/// List the candidate source files in `dir`: regular files matching any of
/// the source globs, excluding the combined output itself so a re-run never
/// feeds its own previous result back in. Sorted by name so the combined
/// order is stable across runs.
pub fn discover_sources(dir: &Path, source_globs: &[String], output_name: &str) -> Result<Vec<PathBuf>> {
    let mut builder = GlobSetBuilder::new();
    for g in source_globs {
        builder.add(Glob::new(g).with_context(|| format!("Invalid source glob: {}", g))?);
    }
    let set = builder.build()?;

    let mut sources = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list scraper directory: {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy() == output_name {
            continue;
        }
        if set.is_match(Path::new(&name)) {
            sources.push(entry.path());
        }
    }

    sources.sort();
    Ok(sources)
}

/// Merge every source file into `dir/combined_output` and report the tally.
/// An empty result is still a valid run: the output becomes `[]` so the
/// indexer downstream always finds a well-formed file.
pub fn combine(cfg: &ScraperConfig) -> Result<CombineSummary> {
    let sources = discover_sources(&cfg.dir, &cfg.source_globs, &cfg.combined_output)?;
    let output = cfg.dir.join(&cfg.combined_output);

    let mut summary = CombineSummary {
        output: output.clone(),
        ..Default::default()
    };
    let mut combined: Vec<Value> = Vec::new();

    for path in &sources {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!(file = %name, error = %e, "failed to read source file; skipping");
                summary.files_skipped += 1;
                continue;
            }
        };

        let value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!(file = %name, error = %e, "malformed JSON; skipping file");
                summary.files_skipped += 1;
                continue;
            }
        };

        match classify(value) {
            SourceShape::Mapping(map) => {
                for (key, val) in map {
                    let mut record = serde_json::Map::new();
                    record.insert(key, val);
                    combined.push(Value::Object(record));
                }
                summary.files_read += 1;
            }
            SourceShape::Records(items) => {
                combined.extend(items);
                summary.files_read += 1;
            }
            SourceShape::Rejected => {
                warn!(file = %name, "not an object or an array of single-key objects; skipping file");
                summary.files_skipped += 1;
            }
        }
    }

    if combined.is_empty() {
        warn!("no records gathered; writing empty array");
    }

    summary.records = combined.len();
    write_atomic(&output, &Value::Array(combined))?;
    info!(records = summary.records, output = %output.display(), "wrote combined output");

    Ok(summary)
}

/// Serialize pretty-printed (4-space indent, UTF-8 kept verbatim) to a
/// sibling temp file, then rename into place. Readers never observe a
/// half-written output.
fn write_atomic(output: &Path, value: &Value) -> Result<()> {
    let mut buf = Vec::new();
    let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
    serde::Serialize::serialize(value, &mut ser)?;
    buf.push(b'\n');

    let tmp = output.with_extension("json.tmp");
    std::fs::write(&tmp, &buf)
        .with_context(|| format!("Failed to write combined output: {}", tmp.display()))?;
    std::fs::rename(&tmp, output)
        .with_context(|| format!("Failed to move combined output into place: {}", output.display()))?;
    Ok(())
}
