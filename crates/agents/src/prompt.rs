//! Prompt assembly for the assistant CLI.
//!
//! The backend is stateless between calls, so every prompt carries the
//! system instructions, file-generation instructions, a condensed tail of
//! the chat history, and the current message.

use std::{fmt::Write as _, path::PathBuf};

use murmur_sessions::HistoryEntry;

/// Number of most recent history entries included in a prompt.
pub const HISTORY_WINDOW: usize = 10;

/// Per-side character limit for history entries in a prompt.
pub const HISTORY_TRUNCATE_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    pub system_prompt: String,
    /// Directory the backend must write generated files into.
    pub files_dir: PathBuf,
    /// Headless browser used for HTML-to-PDF conversion.
    pub chrome_path: PathBuf,
}

impl PromptBuilder {
    #[must_use]
    pub fn build(&self, message: &str, history: &[HistoryEntry]) -> String {
        let files = self.files_dir.display();
        let chrome = self.chrome_path.display();

        let mut prompt = String::with_capacity(1024 + message.len());
        prompt.push_str(&self.system_prompt);
        prompt.push_str("\n\n");

        let _ = write!(
            prompt,
            "If asked to create a file (PDF, proposal, quote, etc.):\n\
             1. Create a professional HTML file in {files}/\n\
             2. Convert to PDF: \"{chrome}\" --headless --disable-gpu \
             --print-to-pdf={files}/name.pdf --no-pdf-header-footer {files}/name.html\n\
             3. Include the path at the end: [FILE:{files}/name.pdf]\n\
             4. The file will be sent automatically via WhatsApp.\n\n"
        );

        if !history.is_empty() {
            prompt.push_str("Recent conversation history:\n");
            let start = history.len().saturating_sub(HISTORY_WINDOW);
            for entry in &history[start..] {
                let _ = writeln!(prompt, "User: {}", condense(&entry.user_text));
                if !entry.assistant_reply.is_empty() {
                    let _ = writeln!(prompt, "Assistant: {}", condense(&entry.assistant_reply));
                }
            }
            prompt.push('\n');
        }

        let _ = write!(prompt, "Current message: {message}\n\nRespond:");
        prompt
    }
}

/// Truncate to [`HISTORY_TRUNCATE_CHARS`] characters, marking the cut with `...`.
fn condense(text: &str) -> String {
    match text.char_indices().nth(HISTORY_TRUNCATE_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
