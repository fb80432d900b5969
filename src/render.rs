//! Console output for streamed replies.

use crate::history::History;
use crate::provider::Role;
use crate::stream::CodeBlock;
use crossterm::style::{Attribute, Color, ContentStyle};
use std::io::Write;
use std::time::{Duration, Instant};

/// Minimum time between prose redraws (about 15 per second).
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(66);

const PANEL_MIN_WIDTH: usize = 10;

fn fg(color: Color) -> ContentStyle {
    ContentStyle {
        foreground_color: Some(color),
        ..ContentStyle::default()
    }
}

fn bold(color: Color) -> ContentStyle {
    ContentStyle {
        attributes: Attribute::Bold.into(),
        ..fg(color)
    }
}

/// Where classified output goes.
pub trait RenderSink {
    /// Prose, in arrival order. May be buffered.
    fn plain_text(&mut self, text: &str) -> anyhow::Result<()>;

    /// A complete code block. Buffered prose is written first.
    fn code_block(&mut self, block: &CodeBlock) -> anyhow::Result<()>;

    /// Called periodically while a reply streams so buffered prose is not
    /// held back past the throttle interval.
    fn tick(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// The reply is over; flush everything.
    fn finish(&mut self) -> anyhow::Result<()>;
}

/// Writes to any `Write`, usually stdout.
pub struct ConsoleRenderer<W: Write> {
    out: W,
    color: bool,
    interval: Duration,
    buffered: String,
    last_flush: Option<Instant>,
    at_line_start: bool,
}

impl ConsoleRenderer<std::io::Stdout> {
    /// Stdout, colored only when it is a terminal.
    pub fn stdout() -> Self {
        use std::io::IsTerminal;
        let out = std::io::stdout();
        let color = out.is_terminal();
        Self::new(out, color)
    }
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            interval: DEFAULT_RENDER_INTERVAL,
            buffered: String::new(),
            last_flush: None,
            at_line_start: true,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn flush_due(&self) -> bool {
        self.last_flush.map_or(true, |t| t.elapsed() >= self.interval)
    }

    fn paint(&self, text: &str, style: ContentStyle) -> String {
        if self.color {
            style.apply(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn write_raw(&mut self, text: &str) -> anyhow::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.out.write_all(text.as_bytes())?;
        self.at_line_start = text.ends_with('\n');
        Ok(())
    }

    fn flush_text(&mut self) -> anyhow::Result<()> {
        let text = std::mem::take(&mut self.buffered);
        self.write_raw(&text)?;
        self.out.flush()?;
        self.last_flush = Some(Instant::now());
        Ok(())
    }

    fn start_line(&mut self) -> anyhow::Result<()> {
        if !self.at_line_start {
            self.write_raw("\n")?;
        }
        Ok(())
    }

    /// Boxed panel around the user's question.
    pub fn question(&mut self, question: &str) -> anyhow::Result<()> {
        const TITLE: &str = "─ Question ";
        let lines: Vec<&str> = question.lines().collect();
        let width = lines
            .iter()
            .map(|l| l.chars().count())
            .max()
            .unwrap_or(0)
            .max(PANEL_MIN_WIDTH);

        let border = fg(Color::Blue);
        let top = format!("╭{TITLE}{}╮", "─".repeat(width + 2 - TITLE.chars().count()));
        let mut panel = format!("{}\n", self.paint(&top, border));
        for line in &lines {
            let pad = " ".repeat(width - line.chars().count());
            panel.push_str(&format!(
                "{} {}{pad} {}\n",
                self.paint("│", border),
                self.paint(line, bold(Color::Cyan)),
                self.paint("│", border),
            ));
        }
        let bottom = format!("╰{}╯", "─".repeat(width + 2));
        panel.push_str(&format!("{}\n", self.paint(&bottom, border)));

        self.start_line()?;
        self.write_raw(&panel)?;
        self.write_raw(&format!("\n{}\n", self.paint("Answer:", bold(Color::Green))))?;
        self.out.flush()?;
        Ok(())
    }

    pub fn info(&mut self, message: &str) -> anyhow::Result<()> {
        self.start_line()?;
        let line = format!("{}\n", self.paint(message, fg(Color::Yellow)));
        self.write_raw(&line)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn error(&mut self, message: &str) -> anyhow::Result<()> {
        self.start_line()?;
        let line = format!("{}\n", self.paint(&format!("error: {message}"), fg(Color::Red)));
        self.write_raw(&line)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn interrupted(&mut self) -> anyhow::Result<()> {
        self.info("[interrupted]")
    }

    pub fn history(&mut self, history: &History) -> anyhow::Result<()> {
        self.start_line()?;
        let title = format!("{}\n", self.paint("History:", bold(Color::Yellow)));
        self.write_raw(&title)?;
        if history.is_empty() {
            self.write_raw("  (empty)\n")?;
        }
        for (n, role, preview) in history.previews() {
            let who = match role {
                Role::User => "you",
                Role::Assistant => "ai",
                Role::System => "system",
            };
            self.write_raw(&format!("  {n}. {who}: {preview}\n"))?;
        }
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> RenderSink for ConsoleRenderer<W> {
    fn plain_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.buffered.push_str(text);
        if self.flush_due() {
            self.flush_text()?;
        }
        Ok(())
    }

    fn tick(&mut self) -> anyhow::Result<()> {
        if !self.buffered.is_empty() && self.flush_due() {
            self.flush_text()?;
        }
        Ok(())
    }

    fn code_block(&mut self, block: &CodeBlock) -> anyhow::Result<()> {
        self.flush_text()?;
        if block.content.is_empty() {
            return Ok(());
        }

        let language = if block.language.is_empty() { "text" } else { &block.language };
        let rule = fg(Color::DarkGrey);
        let lines: Vec<&str> = block.content.lines().collect();
        let gutter = lines.len().to_string().len();

        let mut rendered = format!("{}\n", self.paint(&format!("── {language} ──"), rule));
        for (i, line) in lines.iter().enumerate() {
            let number = format!("{:>gutter$} │", i + 1);
            rendered.push_str(&format!(
                "{} {}\n",
                self.paint(&number, rule),
                self.paint(line, fg(Color::Green))
            ));
        }
        rendered.push_str(&format!("{}\n\n", self.paint("──", rule)));

        self.start_line()?;
        self.write_raw(&rendered)?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.flush_text()?;
        self.start_line()?;
        self.out.flush()?;
        Ok(())
    }
}
