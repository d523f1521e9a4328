//! Cursor-relative text lookups used by the LSP queries.
//!
//! Columns are counted in chars. Clients negotiate UTF-16 by default, which
//! only differs for characters outside the BMP.

fn is_ident_char(ch: char) -> bool {
    ch == '_' || ch.is_alphanumeric()
}

/// Text of `line` before `character` (clamped to the line length)
fn line_before(text: &str, line: usize, character: usize) -> Option<Vec<char>> {
    let line_text = text.lines().nth(line)?;
    Some(line_text.chars().take(character).collect())
}

/// Identifier fragment ending at the cursor, empty when there is none.
pub fn word_prefix_at(text: &str, line: usize, character: usize) -> String {
    let Some(before) = line_before(text, line, character) else {
        return String::new();
    };
    let start = before
        .iter()
        .rposition(|ch| !is_ident_char(*ch))
        .map_or(0, |i| i + 1);
    before[start..].iter().collect()
}

/// Innermost open call around the cursor: (callee name, active parameter index)
pub fn call_context_at(text: &str, line: usize, character: usize) -> Option<(String, u32)> {
    let before = line_before(text, line, character)?;
    let mut depth = 0usize;
    let mut commas = 0u32;

    for i in (0..before.len()).rev() {
        match before[i] {
            ')' | ']' | '}' => depth += 1,
            '[' | '{' if depth > 0 => depth -= 1,
            '(' if depth > 0 => depth -= 1,
            '(' => {
                let name_end = before[..i]
                    .iter()
                    .rposition(|ch| !ch.is_whitespace())
                    .map_or(0, |j| j + 1);
                let name_start = before[..name_end]
                    .iter()
                    .rposition(|ch| !is_ident_char(*ch))
                    .map_or(0, |j| j + 1);
                if name_start == name_end {
                    return None;
                }
                let name: String = before[name_start..name_end].iter().collect();
                return Some((name, commas));
            }
            '[' | '{' => return None,
            ',' if depth == 0 => commas += 1,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_at_cursor() {
        let text = "alpha = 1\nprint(al";
        assert_eq!(word_prefix_at(text, 1, 8), "al");
        assert_eq!(word_prefix_at(text, 1, 6), "");
        assert_eq!(word_prefix_at(text, 0, 3), "alp");
        assert_eq!(word_prefix_at(text, 5, 0), "");
    }

    #[test]
    fn prefix_clamps_past_line_end() {
        assert_eq!(word_prefix_at("value", 0, 99), "value");
    }

    #[test]
    fn call_context_counts_parameters() {
        let text = "area(width, ";
        assert_eq!(call_context_at(text, 0, 12), Some(("area".to_string(), 1)));
        assert_eq!(call_context_at(text, 0, 5), Some(("area".to_string(), 0)));
    }

    #[test]
    fn call_context_skips_nested_calls() {
        let text = "f(g(1, 2), [3, 4], ";
        assert_eq!(call_context_at(text, 0, 19), Some(("f".to_string(), 2)));
        assert_eq!(call_context_at(text, 0, 6), Some(("g".to_string(), 1)));
    }

    #[test]
    fn call_context_outside_call() {
        assert_eq!(call_context_at("x = 1", 0, 5), None);
        assert_eq!(call_context_at("(1, ", 0, 4), None);
        assert_eq!(call_context_at("[f, ", 0, 4), None);
    }
}
