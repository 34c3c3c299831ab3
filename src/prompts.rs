//! Prompts for the vision transcription backend.
//!
//! Filings are dominated by financial statements, so the prompt spends most
//! of its words on tables and numbers.

/// System prompt sent with every page image.
pub const PAGE_TRANSCRIPTION_PROMPT: &str = r#"You transcribe one page of a corporate filing or financial report into Markdown.

Content
- Reproduce every word and number exactly as printed, in reading order.
- Keep currency symbols, parentheses around negative amounts, footnote markers and percent signs.
- Never round, total, or restate figures.

Structure
- Headings: ## for Part/Item titles, ### for section titles, #### below that.
- Lists keep their numbering and nesting.
- Bold and italic only where the page shows emphasis.

Tables
- Use GitHub pipe tables with a header row and a separator row.
- One table row per printed row; keep empty cells as empty cells.
- Right-align numeric columns with ---:
- If merged cells make a pipe table impossible, emit an HTML <table>.

Skip
- Running headers and footers, page numbers, decorative rules.

Output
- Markdown only. No code fences around the page, no commentary, no page markers."#;

/// User-turn text accompanying the image.
pub fn page_instruction(page: usize) -> String {
    format!("Transcribe page {page}.")
}
