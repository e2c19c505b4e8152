//! Paragraph-boundary text chunker.
//!
//! Splits notification body text into [`Chunk`]s no larger than
//! `chunk_chars`, preferring paragraph boundaries (`\n\n`) so each chunk
//! stays semantically coherent. Consecutive chunks share an
//! `overlap_chars`-sized tail so retrieval never loses context that
//! straddles a cut. A paragraph that alone exceeds the budget is
//! hard-split, backing up to whitespace when possible and always landing
//! on a UTF-8 character boundary.
//!
//! Each chunk carries a SHA-256 hash of its text for staleness detection.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Split text into chunks with contiguous indices starting at 0. Always
/// returns at least one chunk, even for empty input.
pub fn chunk_text(notification_id: &str, text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return vec![make_chunk(notification_id, 0, text.trim())];
    }

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut index: i64 = 0;

    let flush = |buf: &mut String, index: &mut i64, chunks: &mut Vec<Chunk>| {
        if buf.is_empty() {
            return;
        }
        chunks.push(make_chunk(notification_id, *index, buf));
        *index += 1;
        let tail = overlap_tail(buf, overlap_chars).to_string();
        buf.clear();
        buf.push_str(&tail);
    };

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };

        if would_be > chunk_chars && !buf.is_empty() {
            flush(&mut buf, &mut index, &mut chunks);
        }

        if buf.len() + trimmed.len() + 2 > chunk_chars && trimmed.len() > chunk_chars {
            // Oversize paragraph: hard split into overlapping windows.
            if !buf.is_empty() {
                buf.clear();
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let cut = split_point(remaining, chunk_chars);
                let piece = remaining[..cut].trim_end();
                chunks.push(make_chunk(notification_id, index, piece));
                index += 1;
                if cut >= remaining.len() {
                    break;
                }
                // Step must stay positive or the window stalls.
                let mut step = cut - overlap_tail(&remaining[..cut], overlap_chars).len();
                if step == 0 {
                    step = cut;
                }
                remaining = remaining[step..].trim_start();
            }
        } else {
            if !buf.is_empty() && buf.len() + 2 + trimmed.len() > chunk_chars {
                // The overlap tail alone cannot host this paragraph.
                buf.clear();
            }
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.is_empty() {
        chunks.push(make_chunk(notification_id, index, &buf));
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(notification_id, 0, text.trim()));
    }

    chunks
}

/// Where to cut `text` so the piece stays within `max` bytes: prefer the
/// last newline or space inside the window, otherwise the nearest char
/// boundary at or below `max`.
fn split_point(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    let mut limit = floor_char_boundary(text, max);
    if limit == 0 {
        // Budget smaller than the first character; take it whole.
        limit = text.chars().next().map(char::len_utf8).unwrap_or(0);
        return limit;
    }
    text[..limit]
        .rfind('\n')
        .or_else(|| text[..limit].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(limit)
}

/// The trailing slice of `text` at most `overlap` bytes long, starting on
/// a char boundary.
fn overlap_tail(text: &str, overlap: usize) -> &str {
    if overlap == 0 || text.len() <= overlap {
        return if overlap == 0 { "" } else { text };
    }
    let mut start = text.len() - overlap;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

fn floor_char_boundary(text: &str, mut at: usize) -> usize {
    while at > 0 && !text.is_char_boundary(at) {
        at -= 1;
    }
    at
}

fn make_chunk(notification_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        notification_id: notification_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("n1", "RBI raises repo rate.", 1000, 150);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "RBI raises repo rate.");
    }

    #[test]
    fn empty_text_still_yields_one_chunk() {
        let chunks = chunk_text("n1", "", 1000, 150);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn paragraphs_under_limit_stay_together() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("n1", text, 1000, 150);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn indices_contiguous_from_zero() {
        let text = (0..50)
            .map(|i| format!("Circular number {} concerning scheduled banks.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("n1", &text, 120, 20);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "index mismatch at {}", i);
        }
    }

    #[test]
    fn every_chunk_respects_the_budget() {
        let text = "word ".repeat(500);
        let chunks = chunk_text("n1", &text, 100, 20);
        for c in &chunks {
            assert!(c.text.len() <= 100, "chunk of {} bytes", c.text.len());
        }
    }

    #[test]
    fn consecutive_chunks_share_a_tail() {
        let text = "word ".repeat(500);
        let chunks = chunk_text("n1", &text, 100, 20);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail = &pair[0].text[pair[0].text.len().saturating_sub(9)..];
            let head = &pair[1].text[..pair[1].text.len().min(40)];
            assert!(
                head.contains(tail),
                "no shared tail between {:?} and {:?}",
                pair[0].text,
                pair[1].text
            );
        }
    }

    #[test]
    fn hard_split_lands_on_char_boundaries() {
        let text = "सूचना ".repeat(200);
        let chunks = chunk_text("n1", &text, 100, 20);
        for c in &chunks {
            // Would have panicked on slicing if a boundary was violated;
            // also confirm no replacement characters crept in.
            assert!(!c.text.contains('\u{fffd}'));
        }
    }

    #[test]
    fn deterministic_text_and_hash() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let a = chunk_text("n1", text, 12, 4);
        let b = chunk_text("n1", text, 12, 4);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.hash, y.hash);
        }
    }
}
