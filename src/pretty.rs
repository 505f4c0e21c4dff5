//! # Pretty Printing
//!
//! Terminal rendering for retrieval results, using crossterm for color and
//! attributes. Row indices are shown so they can be fed to `rag delete`.
//!
//! ```text
//! #0  98.04%  cat                       <- bold cyan rank, green score
//!     source=notes.md type=.md           <- dim metadata
//! ```

use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
};
use std::error::Error;
use std::io::{Write, stdout};

use crate::metadata::Metadata;
use crate::retrieval::RetrievedDocument;

/// Single-line preview cap for printed hits.
const PREVIEW_CHARS: usize = 160;

/// Flatten whitespace and cut `text` to `max` characters.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let mut cut: String = flat.chars().take(max).collect();
        cut.push('…');
        cut
    }
}

/// `key=value` pairs in key order.
pub fn format_metadata(metadata: &Metadata) -> String {
    metadata
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print ranked documents, nearest first.
pub fn print_hits(hits: &[RetrievedDocument]) -> Result<(), Box<dyn Error>> {
    let mut out = stdout();
    if hits.is_empty() {
        out.execute(SetAttribute(Attribute::Dim))?;
        out.execute(Print("no matching documents\n"))?;
        out.execute(SetAttribute(Attribute::Reset))?;
        return Ok(());
    }

    for hit in hits {
        out.execute(SetForegroundColor(Color::Cyan))?;
        out.execute(SetAttribute(Attribute::Bold))?;
        out.execute(Print(format!("#{:<4}", hit.row_index)))?;
        out.execute(SetAttribute(Attribute::Reset))?;
        out.execute(SetForegroundColor(Color::Green))?;
        out.execute(Print(format!("{:>7.2}%  ", hit.similarity() * 100.0)))?;
        out.execute(ResetColor)?;
        out.execute(Print(preview(&hit.text, PREVIEW_CHARS)))?;
        out.execute(Print("\n"))?;

        if !hit.metadata.is_empty() {
            out.execute(SetAttribute(Attribute::Dim))?;
            out.execute(Print(format!("      {}\n", format_metadata(&hit.metadata))))?;
            out.execute(SetAttribute(Attribute::Reset))?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Print a rendered context block, or a dim note when it is empty.
pub fn print_context(context: &str) -> Result<(), Box<dyn Error>> {
    let mut out = stdout();
    if context.is_empty() {
        out.execute(SetAttribute(Attribute::Dim))?;
        out.execute(Print("no relevant knowledge\n"))?;
        out.execute(SetAttribute(Attribute::Reset))?;
    } else {
        out.execute(SetForegroundColor(Color::Blue))?;
        out.execute(Print(context))?;
        out.execute(Print("\n"))?;
        out.execute(ResetColor)?;
    }
    out.flush()?;
    Ok(())
}
