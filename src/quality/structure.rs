use serde::Serialize;

/// Line-level shape of a chapter text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LineStats {
    pub total_lines: usize,
    pub empty_lines: usize,
    pub content_lines: usize,
    /// Lines made only of dashes (scene separators).
    pub dash_lines: usize,
    /// Content lines that stop without terminal punctuation while the next
    /// line continues in lowercase.
    pub broken_lines: usize,
}

impl LineStats {
    pub fn of(text: &str) -> Self {
        if text.is_empty() {
            return Self::default();
        }
        let lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
        let mut stats = Self {
            total_lines: lines.len(),
            ..Self::default()
        };
        for (i, line) in lines.iter().enumerate() {
            let t = line.trim();
            if t.is_empty() {
                stats.empty_lines += 1;
                continue;
            }
            stats.content_lines += 1;
            if t.chars().all(|c| matches!(c, '-' | '—' | '–' | ' ')) {
                stats.dash_lines += 1;
                continue;
            }
            let continues_lower = lines
                .get(i + 1)
                .and_then(|next| next.trim_start().chars().next())
                .is_some_and(char::is_lowercase);
            if continues_lower && !ends_sentence(t) {
                stats.broken_lines += 1;
            }
        }
        stats
    }
}

fn ends_sentence(line: &str) -> bool {
    line.ends_with(['.', '!', '?', '…', '»', '"', '”', ':', ';', '—', ')'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_line_shapes() {
        let text = "Глава 1\n\n---\nОн шёл по дороге\nи думал.\n\r\nКонец.";
        let s = LineStats::of(text);
        assert_eq!(s.total_lines, 7);
        assert_eq!(s.empty_lines, 2);
        assert_eq!(s.content_lines, 5);
        assert_eq!(s.dash_lines, 1);
        assert_eq!(s.broken_lines, 1);
    }

    #[test]
    fn empty_text_has_no_lines() {
        assert_eq!(LineStats::of(""), LineStats::default());
    }
}
