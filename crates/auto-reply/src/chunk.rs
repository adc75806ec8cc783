/// WhatsApp renders messages up to 4096 characters; stay below that.
pub const MAX_CHUNK_CHARS: usize = 4000;

/// Split `text` into messages of at most `max_chars` characters.
///
/// A chunk ends at the last newline within the limit, unless that newline
/// sits in the first 30% of the window, in which case the chunk is cut at
/// the hard limit. Leading whitespace of each following chunk is dropped.
#[must_use]
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return vec![text.to_string()];
    }

    let min_split = max_chars * 3 / 10;
    let mut chunks = Vec::new();
    let mut rest = &chars[..];

    while !rest.is_empty() {
        if rest.len() <= max_chars {
            chunks.push(rest.iter().collect());
            break;
        }

        // A newline exactly at the limit still ends the chunk there.
        let window = &rest[..=max_chars];
        let split_at = match window.iter().rposition(|&c| c == '\n') {
            Some(i) if i >= min_split && i > 0 => i,
            _ => max_chars,
        };

        chunks.push(rest[..split_at].iter().collect());
        rest = &rest[split_at..];
        let skip = rest.iter().take_while(|c| c.is_whitespace()).count();
        rest = &rest[skip..];
    }

    chunks
}
