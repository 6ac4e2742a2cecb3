/// Longest message Telegram accepts, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const MARKER: &str = "...";

/// Shorten `text` to at most [`MAX_MESSAGE_CHARS`] characters.
///
/// Cuts after the last `". "` when that boundary lies past the midpoint,
/// otherwise hard-cuts. The cut never splits a tag or an entity, and tags
/// left open by it are closed after the `"..."` marker. Marker and closing
/// tags are counted in the limit.
pub fn shorten(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }

    let mut budget = MAX_MESSAGE_CHARS - MARKER.len();
    loop {
        let head = cut_head(text, budget);
        let closers = closing_tags(head);
        let total = head.chars().count() + MARKER.len() + closers.chars().count();
        if total <= MAX_MESSAGE_CHARS || budget == 0 {
            return format!("{head}{MARKER}{closers}");
        }
        budget = budget.saturating_sub(total - MAX_MESSAGE_CHARS);
    }
}

fn cut_head(text: &str, budget: usize) -> &str {
    let cut = text
        .char_indices()
        .nth(budget)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let mut head = &text[..cut];

    if let Some(idx) = head
        .rfind(". ")
        .filter(|&idx| head[..idx].chars().count() > MAX_MESSAGE_CHARS / 2)
    {
        head = &head[..=idx];
    }
    if let Some(lt) = head.rfind('<').filter(|&lt| !head[lt..].contains('>')) {
        head = &head[..lt];
    }
    let partial_entity = |amp: &usize| {
        let tail = &head[amp + 1..];
        tail.len() < 10 && tail.chars().all(|c| c.is_ascii_alphanumeric() || c == '#')
    };
    if let Some(amp) = head.rfind('&').filter(partial_entity) {
        head = &head[..amp];
    }
    head
}

/// Closing tags for every tag still open at the end of `html`, innermost first.
fn closing_tags(html: &str) -> String {
    let mut open: Vec<&str> = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };
        let tag = &after[..end];
        rest = &after[end + 1..];

        if let Some(name) = tag.strip_prefix('/') {
            if let Some(pos) = open.iter().rposition(|t| *t == name.trim()) {
                open.truncate(pos);
            }
        } else if !tag.ends_with('/') {
            let name = tag.split_whitespace().next().unwrap_or_default();
            if !name.is_empty() {
                open.push(name);
            }
        }
    }
    open.iter().rev().map(|t| format!("</{t}>")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(shorten("hello. world"), "hello. world");
        let exact = "x".repeat(MAX_MESSAGE_CHARS);
        assert_eq!(shorten(&exact), exact);
    }

    #[test]
    fn test_hard_cut_without_late_sentence() {
        let text = "a".repeat(MAX_MESSAGE_CHARS + 10);
        let out = shorten(&text);
        assert_eq!(out.chars().count(), MAX_MESSAGE_CHARS);
        assert!(out.ends_with("aaa..."));
    }

    #[test]
    fn test_cuts_at_late_sentence_boundary() {
        let text = format!("{}. {}", "a".repeat(3000), "b".repeat(2000));
        let out = shorten(&text);
        assert_eq!(out, format!("{}....", "a".repeat(3000)));
    }

    #[test]
    fn test_ignores_early_sentence_boundary() {
        let text = format!("{}. {}", "a".repeat(100), "b".repeat(5000));
        let out = shorten(&text);
        assert_eq!(out.chars().count(), MAX_MESSAGE_CHARS);
        assert!(out.ends_with("b..."));
    }

    #[test]
    fn test_never_splits_a_tag() {
        let text = format!("{}<a href=\"https://x.test/\">{}</a>", "a".repeat(4090), "b".repeat(50));
        let out = shorten(&text);
        assert_eq!(out, format!("{}...", "a".repeat(4090)));
    }

    #[test]
    fn test_never_splits_an_entity() {
        let text = format!("{}&amp;{}", "a".repeat(4091), "b".repeat(50));
        let out = shorten(&text);
        assert_eq!(out, format!("{}...", "a".repeat(4091)));
    }

    #[test]
    fn test_closes_tags_left_open_by_the_cut() {
        let text = format!("<b>{}</b>", "a".repeat(5000));
        let out = shorten(&text);
        assert!(out.starts_with("<b>aaa"));
        assert!(out.ends_with("a...</b>"));
        assert_eq!(out.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "é".repeat(MAX_MESSAGE_CHARS);
        assert_eq!(shorten(&text), text);

        let longer = "é".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(shorten(&longer).chars().count(), MAX_MESSAGE_CHARS);
    }
}
