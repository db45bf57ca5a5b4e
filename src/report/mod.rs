//! Console and CSV reporting shared by the commands.

pub mod orgs;
pub mod tokens;
pub mod users;

use std::collections::HashMap;

pub const DISPLAY_WIDTH: usize = 80;
pub const TAB_WIDTH: usize = 4;

pub fn border() -> String {
    "-".repeat(DISPLAY_WIDTH)
}

pub fn separator() -> String {
    "-".repeat(DISPLAY_WIDTH / 2)
}

/// `text` indented by `indent_level` tab stops.
pub fn report_line(text: &str, indent_level: usize) -> String {
    format!("{}{}", " ".repeat(indent_level * TAB_WIDTH), text)
}

/// Greedy word wrap to the display width, every line indented three tab stops.
pub fn wrap_report_text(text: &str) -> String {
    let indent = " ".repeat(3 * TAB_WIDTH);
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && indent.len() + line.len() + 1 + word.len() > DISPLAY_WIDTH {
            lines.push(format!("{}{}", indent, line));
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(format!("{}{}", indent, line));
    }
    lines.join("\n")
}

/// Counts per key, ranked on demand.
#[derive(Debug, Default, Clone)]
pub struct Counter {
    counts: HashMap<String, usize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, key: &str, by: usize) {
        *self.counts.entry(key.to_string()).or_insert(0) += by;
    }

    pub fn get(&self, key: &str) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Highest counts first; ties broken by key. `None` or 0 keeps everything.
    pub fn most_common(&self, top_n: Option<usize>) -> Vec<(String, usize)> {
        let mut ranked: Vec<(String, usize)> =
            self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(n) = top_n.filter(|n| *n > 0) {
            ranked.truncate(n);
        }
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_common_ranks_descending() {
        let mut counter = Counter::new();
        counter.increment("b", 2);
        counter.increment("a", 2);
        counter.increment("c", 5);
        counter.increment("d", 1);
        let ranked = counter.most_common(None);
        assert_eq!(
            ranked,
            vec![
                ("c".to_string(), 5),
                ("a".to_string(), 2),
                ("b".to_string(), 2),
                ("d".to_string(), 1)
            ]
        );
        assert_eq!(counter.most_common(Some(2)).len(), 2);
        assert_eq!(counter.most_common(Some(0)).len(), 4);
    }

    #[test]
    fn wrapped_text_stays_in_width() {
        let text = "alice@altostrat.com bob@altostrat.com carol@altostrat.com dave@altostrat.com \
                    erin@altostrat.com frank@altostrat.com";
        let wrapped = wrap_report_text(text);
        assert!(wrapped.lines().count() > 1);
        for line in wrapped.lines() {
            assert!(line.len() <= DISPLAY_WIDTH);
            assert!(line.starts_with("            "));
        }
    }

    #[test]
    fn report_line_uses_tab_stops() {
        assert_eq!(report_line("x", 2), "        x");
        assert_eq!(border().len(), 80);
    }
}
