use super::normalize::normalize;

const FENCE: &str = "```";

/// Where the classifier is within the response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    Plain,
    /// Inside a fenced block. An empty language means none was declared.
    InCodeBlock { language: String },
}

/// A fenced block, closed and normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: String,
    pub content: String,
}

/// One render-ready piece of output, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Code(CodeBlock),
}

/// What a single `process` or `finalize` call produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    pub segments: Vec<Segment>,
}

impl Update {
    /// True if any prose was emitted and the live text should be redrawn.
    pub fn needs_render_update(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Text(_)))
    }

    pub fn completed_blocks(&self) -> impl Iterator<Item = &CodeBlock> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Code(block) => Some(block),
            Segment::Text(_) => None,
        })
    }
}

/// Splits a stream of text fragments into prose and fenced code blocks.
///
/// Prose is released as soon as it cannot be part of a fence marker. Code is
/// held until its closing marker arrives and then released as one block.
/// One classifier serves one response; [`finalize`](Self::finalize) consumes
/// it so trailing state is always flushed exactly once.
#[derive(Debug, Default)]
pub struct StreamTextClassifier {
    state: ParserState,
    /// Unresolved input. Holds the raw block body while in a code block.
    pending: String,
    /// Offset in `pending` before which no closing marker can start.
    scan_from: usize,
    plain: String,
}

impl StreamTextClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// All prose emitted so far.
    pub fn plain_text(&self) -> &str {
        &self.plain
    }

    pub fn process(&mut self, fragment: &str) -> Update {
        self.pending.push_str(fragment);
        self.drain(false)
    }

    /// Flush whatever is still buffered once the stream has ended.
    ///
    /// An unterminated code block is closed implicitly and returned as a
    /// final block, so a response cut off mid-block still shows its code.
    pub fn finalize(mut self) -> Update {
        let update = self.drain(true);
        tracing::trace!(plain_len = self.plain.len(), "classifier finalized");
        update
    }

    fn drain(&mut self, at_end: bool) -> Update {
        let mut update = Update::default();
        loop {
            let state = std::mem::take(&mut self.state);
            let step = step(state, &self.pending, self.scan_from, at_end);
            self.state = step.next;

            if step.consumed > 0 {
                self.pending.drain(..step.consumed);
                self.scan_from = 0;
            }

            match step.output {
                Some(Segment::Text(text)) => {
                    self.plain.push_str(&text);
                    update.segments.push(Segment::Text(text));
                }
                Some(code) => update.segments.push(code),
                None => {}
            }

            if step.stalled {
                if matches!(self.state, ParserState::InCodeBlock { .. }) {
                    // A marker split across fragments may start in the last two bytes.
                    self.scan_from = self.pending.len().saturating_sub(FENCE.len() - 1);
                }
                return update;
            }
        }
    }
}

/// One transition of the classifier.
#[derive(Debug, PartialEq, Eq)]
struct Step {
    next: ParserState,
    output: Option<Segment>,
    /// Leading bytes of the pending buffer resolved by this transition.
    consumed: usize,
    /// Nothing more can be resolved until more input arrives.
    stalled: bool,
}

/// Resolve as much of the front of `pending` as `state` allows.
///
/// Every step that does not stall consumes at least one byte.
fn step(state: ParserState, pending: &str, scan_from: usize, at_end: bool) -> Step {
    match state {
        ParserState::Plain => step_plain(pending, at_end),
        ParserState::InCodeBlock { language } => step_code(language, pending, scan_from, at_end),
    }
}

fn step_plain(pending: &str, at_end: bool) -> Step {
    match find_fence(pending, 0) {
        Some(0) => {
            let header = &pending[FENCE.len()..];
            let (language, len) = match parse_header(header) {
                Some(parsed) => parsed,
                None if at_end => (word_run(header).to_string(), header.len()),
                None => {
                    return Step {
                        next: ParserState::Plain,
                        output: None,
                        consumed: 0,
                        stalled: true,
                    };
                }
            };
            Step {
                next: ParserState::InCodeBlock { language },
                output: None,
                consumed: FENCE.len() + len,
                stalled: false,
            }
        }
        Some(i) => Step {
            next: ParserState::Plain,
            output: Some(Segment::Text(pending[..i].to_string())),
            consumed: i,
            stalled: false,
        },
        None => {
            let held = if at_end { 0 } else { trailing_backticks(pending) };
            let ready = pending.len() - held;
            Step {
                next: ParserState::Plain,
                output: (ready > 0).then(|| Segment::Text(pending[..ready].to_string())),
                consumed: ready,
                stalled: true,
            }
        }
    }
}

fn step_code(language: String, pending: &str, scan_from: usize, at_end: bool) -> Step {
    match find_fence(pending, scan_from) {
        Some(i) => Step {
            next: ParserState::Plain,
            output: Some(Segment::Code(CodeBlock {
                language,
                content: normalize(&pending[..i]),
            })),
            consumed: i + FENCE.len(),
            stalled: false,
        },
        None if at_end => Step {
            next: ParserState::Plain,
            output: Some(Segment::Code(CodeBlock {
                language,
                content: normalize(pending),
            })),
            consumed: pending.len(),
            stalled: true,
        },
        None => Step {
            next: ParserState::InCodeBlock { language },
            output: None,
            consumed: 0,
            stalled: true,
        },
    }
}

fn find_fence(haystack: &str, from: usize) -> Option<usize> {
    let mut from = from.min(haystack.len());
    while !haystack.is_char_boundary(from) {
        from -= 1;
    }
    haystack[from..].find(FENCE).map(|i| from + i)
}

/// Parse the text following an opening marker.
///
/// Returns the language tag and the number of header bytes to skip, or
/// `None` while the tag might still be growing.
fn parse_header(header: &str) -> Option<(String, usize)> {
    let tag = word_run(header);
    let rest = &header[tag.len()..];
    let pad = rest.len() - rest.trim_start_matches([' ', '\t']).len();
    let after = &rest[pad..];

    let newline = if after.starts_with("\r\n") {
        2
    } else if after.starts_with('\n') {
        1
    } else if after.is_empty() || after == "\r" {
        return None;
    } else {
        0
    };
    Some((tag.to_string(), tag.len() + pad + newline))
}

fn word_run(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    &s[..end]
}

// At most one short of a full marker can be waiting for its next fragment.
fn trailing_backticks(s: &str) -> usize {
    let run = s.bytes().rev().take_while(|&b| b == b'`').count();
    run.min(FENCE.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> Segment {
        Segment::Text(s.to_string())
    }

    fn code(language: &str, content: &str) -> Segment {
        Segment::Code(CodeBlock {
            language: language.to_string(),
            content: content.to_string(),
        })
    }

    /// Feed fragments, finalize, and merge adjacent prose so results are
    /// comparable regardless of how the input was split.
    fn classify(fragments: &[&str]) -> Vec<Segment> {
        let mut c = StreamTextClassifier::new();
        let mut segments = Vec::new();
        for f in fragments {
            segments.extend(c.process(f).segments);
        }
        segments.extend(c.finalize().segments);
        merge_text(segments)
    }

    fn merge_text(segments: Vec<Segment>) -> Vec<Segment> {
        let mut out: Vec<Segment> = Vec::new();
        for seg in segments {
            match (out.last_mut(), seg) {
                (Some(Segment::Text(prev)), Segment::Text(next)) => prev.push_str(&next),
                (_, seg) => out.push(seg),
            }
        }
        out
    }

    #[test]
    fn plain_text_passes_through() {
        let mut c = StreamTextClassifier::new();
        let update = c.process("Hello, world");
        assert!(update.needs_render_update());
        assert_eq!(update.segments, vec![text("Hello, world")]);
        assert_eq!(c.plain_text(), "Hello, world");
        assert_eq!(c.finalize(), Update::default());
    }

    #[test]
    fn empty_fragment_is_a_no_op() {
        let mut c = StreamTextClassifier::new();
        let update = c.process("");
        assert!(!update.needs_render_update());
        assert_eq!(update.completed_blocks().count(), 0);
        assert_eq!(c.state(), &ParserState::Plain);
    }

    #[test]
    fn single_fragment_block() {
        assert_eq!(
            classify(&["Hello ```py\ncode\n```world"]),
            vec![text("Hello "), code("py", "code"), text("world")]
        );
    }

    #[test]
    fn split_marker_matches_unsplit() {
        assert_eq!(
            classify(&["Hello ``", "`py\nco", "de\n``", "`world"]),
            classify(&["Hello ```py\ncode\n```world"])
        );
    }

    #[test]
    fn every_two_way_split_matches_unsplit() {
        let input = "Hello ```py\ncode\n```world";
        let expected = classify(&[input]);
        for i in 0..=input.len() {
            let (a, b) = input.split_at(i);
            assert_eq!(classify(&[a, b]), expected, "split at {i}");
        }
    }

    #[test]
    fn char_by_char_matches_unsplit() {
        let input = "intro\n```rust\nfn main() {}\n```\nouter `inline` text";
        let chars: Vec<String> = input.chars().map(String::from).collect();
        let fragments: Vec<&str> = chars.iter().map(String::as_str).collect();
        assert_eq!(classify(&fragments), classify(&[input]));
    }

    #[test]
    fn several_blocks_in_one_fragment() {
        let mut c = StreamTextClassifier::new();
        let update = c.process("a```x\n1\n```b```y\n2\n```c");
        assert_eq!(
            update.segments,
            vec![text("a"), code("x", "1"), text("b"), code("y", "2"), text("c")]
        );
        assert_eq!(update.completed_blocks().count(), 2);
        assert_eq!(c.plain_text(), "abc");
    }

    #[test]
    fn code_is_withheld_until_closed() {
        let mut c = StreamTextClassifier::new();
        c.process("```sh\n");
        let update = c.process("echo hi\n");
        assert!(!update.needs_render_update());
        assert_eq!(update.completed_blocks().count(), 0);
        assert_eq!(
            c.state(),
            &ParserState::InCodeBlock {
                language: "sh".to_string()
            }
        );

        let update = c.process("```\n");
        assert_eq!(update.segments, vec![code("sh", "echo hi"), text("\n")]);
        assert_eq!(c.state(), &ParserState::Plain);
    }

    #[test]
    fn unterminated_block_is_closed_on_finalize() {
        let mut c = StreamTextClassifier::new();
        assert!(c.process("```go\nfunc").segments.is_empty());
        assert_eq!(c.finalize().segments, vec![code("go", "func")]);
    }

    #[test]
    fn trailing_header_becomes_empty_block() {
        assert_eq!(classify(&["see below ```py"]), vec![text("see below "), code("py", "")]);
    }

    #[test]
    fn trailing_backticks_are_flushed() {
        let mut c = StreamTextClassifier::new();
        assert_eq!(c.process("a ``").segments, vec![text("a ")]);
        assert_eq!(c.finalize().segments, vec![text("``")]);
    }

    #[test]
    fn language_tag_split_across_fragments() {
        assert_eq!(
            classify(&["```ja", "vasc", "ript\nlet x;\n```"]),
            vec![code("javascript", "let x;")]
        );
    }

    #[test]
    fn missing_language_is_empty() {
        assert_eq!(classify(&["```\nraw\n```"]), vec![code("", "raw")]);
    }

    #[test]
    fn header_without_newline_starts_body() {
        assert_eq!(classify(&["```py print(1)```"]), vec![code("py", "print(1)")]);
    }

    #[test]
    fn crlf_header() {
        assert_eq!(classify(&["```c\r", "\nint x;\r\n```"]), vec![code("c", "int x;")]);
    }

    #[test]
    fn inline_backticks_stay_prose() {
        assert_eq!(
            classify(&["use `", "cargo` or ``x``"]),
            vec![text("use `cargo` or ``x``")]
        );
    }

    #[test]
    fn indented_block_is_normalized() {
        assert_eq!(
            classify(&["```python\n\n    def f():\n        return 1\n\n```"]),
            vec![code("python", "def f():\n    return 1")]
        );
    }

    #[test]
    fn multibyte_text_around_markers() {
        assert_eq!(
            classify(&["代码：``", "`rs\n让 x = 1;\n`", "``结束"]),
            vec![text("代码："), code("rs", "让 x = 1;"), text("结束")]
        );
    }

    #[test]
    fn balanced_input_reconstructs() {
        let input = "Intro\n```rust\nfn a() {}\n```\nmiddle ```\nplain\n``` end";
        for size in 1..=input.len() {
            let fragments: Vec<&str> = input
                .as_bytes()
                .chunks(size)
                .map(|c| std::str::from_utf8(c).unwrap())
                .collect();

            let mut rebuilt = String::new();
            for seg in classify(&fragments) {
                match seg {
                    Segment::Text(t) => rebuilt.push_str(&t),
                    Segment::Code(b) if b.language.is_empty() => {
                        rebuilt.push_str(&format!("```\n{}\n```", b.content));
                    }
                    Segment::Code(b) => {
                        rebuilt.push_str(&format!("```{}\n{}\n```", b.language, b.content));
                    }
                }
            }
            assert_eq!(rebuilt, input, "chunk size {size}");
        }
    }

    #[test]
    fn step_is_pure_over_state() {
        let s = step(ParserState::Plain, "```js\nx", 0, false);
        assert_eq!(
            s,
            Step {
                next: ParserState::InCodeBlock {
                    language: "js".to_string()
                },
                output: None,
                consumed: 6,
                stalled: false,
            }
        );

        let lang = ParserState::InCodeBlock {
            language: "js".to_string(),
        };
        let s = step(lang.clone(), "x", 0, false);
        assert_eq!(s.next, lang);
        assert!(s.stalled);
        assert_eq!(s.consumed, 0);
    }

    #[test]
    fn scan_cursor_still_finds_split_close() {
        let mut c = StreamTextClassifier::new();
        c.process("```\n");
        c.process("line one\nline two\n`");
        c.process("`");
        let update = c.process("`tail");
        assert_eq!(update.segments, vec![code("", "line one\nline two"), text("tail")]);
    }
}
