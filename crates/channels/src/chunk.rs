//! Splitting long replies for platforms with a per-message length cap.
//!
//! Lengths are counted in characters, which is how chat platforms count them.

/// Default per-message cap, a little under the common 2000-character limit.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1950;
pub const DEFAULT_CONTINUATION_PREFIX: &str = "(continued)\n";

const ELLIPSIS: &str = "...";

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// First `n` characters of `s`.
fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Split `line` into pieces of at most `width` characters.
fn hard_split(line: &str, width: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = line;
    while char_len(rest) > width {
        let head = take_chars(rest, width);
        pieces.push(head);
        rest = &rest[head.len()..];
    }
    pieces.push(rest);
    pieces
}

/// Split `text` into chunks of at most `max_len` characters.
///
/// Lines are packed greedily; a line longer than the budget is split
/// mid-line. Every chunk after the first starts with `continuation_prefix`
/// and still fits in `max_len`.
pub fn chunk_reply(text: &str, max_len: usize, continuation_prefix: &str) -> Vec<String> {
    if max_len == 0 || text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max_len {
        return vec![text.to_string()];
    }

    // A prefix that leaves no room for content is dropped.
    let prefix = if char_len(continuation_prefix) < max_len {
        continuation_prefix
    } else {
        ""
    };
    let body_budget = max_len - char_len(prefix);

    let mut bodies: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        for (k, piece) in hard_split(line, body_budget).into_iter().enumerate() {
            let piece_len = char_len(piece);
            let budget = if bodies.is_empty() {
                max_len
            } else {
                body_budget
            };
            // Pieces of one split line never share a chunk.
            let overflow = k > 0 || current_len + 1 + piece_len > budget;
            if !current.is_empty() && overflow {
                bodies.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(piece);
            current_len += piece_len;
        }
    }
    if !current.trim().is_empty() || bodies.is_empty() {
        bodies.push(current);
    }

    bodies
        .into_iter()
        .enumerate()
        .map(|(i, body)| {
            if i == 0 {
                return body;
            }
            let chunk = format!("{prefix}{body}");
            if char_len(&chunk) <= max_len {
                chunk
            } else {
                let keep = max_len.saturating_sub(char_len(prefix) + ELLIPSIS.len());
                format!("{prefix}{}{ELLIPSIS}", take_chars(&body, keep))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case::short("hello", 10, vec!["hello"])]
    #[case::exact("0123456789", 10, vec!["0123456789"])]
    #[case::empty("", 10, vec![])]
    #[case::zero_limit("hello", 0, vec![])]
    fn trivial_inputs(#[case] text: &str, #[case] max_len: usize, #[case] expected: Vec<&str>) {
        assert_eq!(chunk_reply(text, max_len, "> "), expected);
    }

    #[test]
    fn packs_lines_greedily() {
        let text = "aaa\nbbb\nccc\nddd";
        let chunks = chunk_reply(text, 9, "> ");
        assert_eq!(chunks, vec!["aaa\nbbb", "> ccc\nddd"]);
    }

    #[test]
    fn long_line_is_hard_split_with_prefix() {
        let text = "x".repeat(25);
        let chunks = chunk_reply(&text, 10, "> ");
        assert!(chunks.iter().all(|c| char_len(c) <= 10));
        assert!(chunks[1..].iter().all(|c| c.starts_with("> ")));
        let rejoined: String = chunks
            .iter()
            .map(|c| c.trim_start_matches("> "))
            .collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(12);
        let chunks = chunk_reply(&text, 10, "");
        assert_eq!(chunks, vec!["é".repeat(10), "é".repeat(2)]);
    }

    #[test]
    fn default_limits_hold_for_large_replies() {
        let text = (0..400)
            .map(|i| format!("line {i} {}", "z".repeat(i % 40)))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_reply(&text, DEFAULT_MAX_MESSAGE_LEN, DEFAULT_CONTINUATION_PREFIX);
        assert!(chunks.len() > 1);
        for chunk in &chunks[1..] {
            assert!(chunk.starts_with(DEFAULT_CONTINUATION_PREFIX));
        }
        assert!(
            chunks
                .iter()
                .all(|c| char_len(c) <= DEFAULT_MAX_MESSAGE_LEN)
        );
        assert!(!chunks.iter().any(|c| c.ends_with(ELLIPSIS)));
    }

    #[test]
    fn oversized_prefix_is_dropped() {
        let chunks = chunk_reply("abcdef", 3, "long prefix");
        assert_eq!(chunks, vec!["abc", "def"]);
    }
}
