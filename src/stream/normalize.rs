//! Cleanup applied to a captured code block body before it is rendered.

/// Trim surrounding blank lines and strip the indentation shared by every
/// non-blank line.
///
/// Whitespace-only input normalizes to an empty string.
pub fn normalize(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();

    let Some(start) = lines.iter().position(|l| !is_blank(l)) else {
        return String::new();
    };
    let end = lines.iter().rposition(|l| !is_blank(l)).unwrap_or(start);
    let body = &lines[start..=end];

    let indent = body
        .iter()
        .filter(|l| !is_blank(l))
        .map(|l| indent_width(l))
        .min()
        .unwrap_or(0);

    body.iter()
        .map(|l| strip_chars(l, indent))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

// Blank interior lines may be shorter than the common indent.
fn strip_chars(line: &str, n: usize) -> &str {
    match line.char_indices().nth(n) {
        Some((i, _)) => &line[i..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::normalize;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_common_indent() {
        assert_eq!(normalize("    line1\n    line2\n"), "line1\nline2");
    }

    #[test]
    fn keeps_relative_indent() {
        let raw = "\n\n  fn main() {\n      body();\n  }\n\n";
        assert_eq!(normalize(raw), "fn main() {\n    body();\n}");
    }

    #[test]
    fn blank_interior_lines_survive() {
        let raw = "    a\n\n  \n    b";
        assert_eq!(normalize(raw), "a\n\n\nb");
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("\n \n\t\n"), "");
    }

    #[test]
    fn handles_crlf() {
        assert_eq!(normalize("\r\n  x = 1\r\n  y = 2\r\n"), "x = 1\ny = 2");
    }

    #[test]
    fn tabs_count_as_one_column() {
        assert_eq!(normalize("\tif x:\n\t\tpass"), "if x:\n\tpass");
    }

    #[test]
    fn idempotent() {
        let bodies = [
            "",
            "plain",
            "  a\n    b\n  c\n",
            "\n\n   \n\tx\n\t  y\n\n",
            "    \u{3000}中文\n    x",
            "  trailing   \n  \n",
        ];
        for body in bodies {
            let once = normalize(body);
            assert_eq!(normalize(&once), once, "body: {body:?}");
        }
    }
}
