//! Terminal rendering of reply text.
//!
//! Replies are parsed with `pulldown-cmark`, the same parser the HTML export
//! uses, and flattened into lines of styled spans. Headings, lists, code
//! blocks, emphasis, inline code, links and rules get terminal styling;
//! raw HTML prints as text. Styling goes through `console`, which drops
//! colors when stdout is not a terminal.

use console::Style;
use pulldown_cmark::{Event, HeadingLevel, LinkType, Parser, Tag};

const RULE_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStyle {
    Plain,
    Bold,
    Italic,
    InlineCode,
    Code,
    H1,
    H2,
    H3,
    List,
    Rule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub style: SpanStyle,
}

impl Span {
    fn new(text: impl Into<String>, style: SpanStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

pub type Line = Vec<Span>;

/// Split `markdown` into styled lines. Top-level blocks are separated by
/// one empty line.
pub fn parse(markdown: &str) -> Vec<Line> {
    let mut builder = LineBuilder::default();
    for event in Parser::new(markdown) {
        builder.event(event);
    }
    builder.finish()
}

#[derive(Default)]
struct LineBuilder {
    lines: Vec<Line>,
    current: Line,
    strong: usize,
    emphasis: usize,
    heading: Option<SpanStyle>,
    code_block: bool,
    /// One entry per open list: the next number, or `None` for bullets.
    lists: Vec<Option<u64>>,
}

impl LineBuilder {
    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) if self.code_block => self.push_lines(&text, SpanStyle::Code),
            Event::Text(text) => self.push(&text, self.style()),
            Event::Code(code) => self.push(&code, SpanStyle::InlineCode),
            Event::Html(raw) => self.push_lines(&raw, self.style()),
            Event::SoftBreak | Event::HardBreak => self.flush(),
            Event::Rule => {
                self.flush();
                self.lines
                    .push(vec![Span::new("─".repeat(RULE_WIDTH), SpanStyle::Rule)]);
                self.block_gap();
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading(level, _, _) => {
                self.flush();
                self.heading = Some(match level {
                    HeadingLevel::H1 => SpanStyle::H1,
                    HeadingLevel::H2 => SpanStyle::H2,
                    _ => SpanStyle::H3,
                });
            }
            Tag::CodeBlock(_) => {
                self.flush();
                self.code_block = true;
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush();
                let indent = "  ".repeat(self.lists.len());
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{}{}. ", indent, n);
                        *n += 1;
                        marker
                    }
                    _ => format!("{}• ", indent),
                };
                self.push(&marker, SpanStyle::List);
            }
            Tag::Strong => self.strong += 1,
            Tag::Emphasis => self.emphasis += 1,
            _ => {}
        }
    }

    fn end(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph if self.lists.is_empty() => self.block_gap(),
            Tag::Paragraph | Tag::Item => self.flush(),
            Tag::Heading(..) => {
                self.heading = None;
                self.block_gap();
            }
            Tag::CodeBlock(_) => {
                self.code_block = false;
                self.flush();
                if self.lists.is_empty() {
                    self.block_gap();
                }
            }
            Tag::List(_) => {
                self.lists.pop();
                self.flush();
                if self.lists.is_empty() {
                    self.block_gap();
                }
            }
            Tag::BlockQuote => self.block_gap(),
            Tag::Strong => self.strong = self.strong.saturating_sub(1),
            Tag::Emphasis => self.emphasis = self.emphasis.saturating_sub(1),
            Tag::Link(kind, dest, _) if kind != LinkType::Autolink && !dest.is_empty() => {
                self.push(&format!(" ({})", dest), SpanStyle::Plain);
            }
            _ => {}
        }
    }

    fn style(&self) -> SpanStyle {
        if let Some(heading) = self.heading {
            heading
        } else if self.strong > 0 {
            SpanStyle::Bold
        } else if self.emphasis > 0 {
            SpanStyle::Italic
        } else {
            SpanStyle::Plain
        }
    }

    /// Append to the current line, merging with a preceding span of the
    /// same style. The parser splits text at marker characters.
    fn push(&mut self, text: &str, style: SpanStyle) {
        if text.is_empty() {
            return;
        }
        match self.current.last_mut() {
            Some(last) if last.style == style => last.text.push_str(text),
            _ => self.current.push(Span::new(text, style)),
        }
    }

    /// Text that carries its own line breaks (code blocks, raw HTML).
    fn push_lines(&mut self, text: &str, style: SpanStyle) {
        for piece in text.split_inclusive('\n') {
            match piece.strip_suffix('\n') {
                Some(body) => {
                    self.push(body.strip_suffix('\r').unwrap_or(body), style);
                    self.lines.push(std::mem::take(&mut self.current));
                }
                None => self.push(piece, style),
            }
        }
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.lines.push(std::mem::take(&mut self.current));
        }
    }

    fn block_gap(&mut self) {
        self.flush();
        if matches!(self.lines.last(), Some(line) if !line.is_empty()) {
            self.lines.push(Vec::new());
        }
    }

    fn finish(mut self) -> Vec<Line> {
        self.flush();
        while matches!(self.lines.last(), Some(line) if line.is_empty()) {
            self.lines.pop();
        }
        self.lines
    }
}

fn style_for(style: SpanStyle) -> Style {
    match style {
        SpanStyle::Plain => Style::new(),
        SpanStyle::Bold => Style::new().bold(),
        SpanStyle::Italic => Style::new().italic(),
        SpanStyle::InlineCode => Style::new().yellow(),
        SpanStyle::Code => Style::new().yellow().dim(),
        SpanStyle::H1 => Style::new().bold().underlined().cyan(),
        SpanStyle::H2 => Style::new().bold().cyan(),
        SpanStyle::H3 => Style::new().bold(),
        SpanStyle::List => Style::new().cyan(),
        SpanStyle::Rule => Style::new().dim(),
    }
}

/// Render `markdown` for the terminal.
pub fn to_terminal(markdown: &str) -> String {
    parse(markdown)
        .iter()
        .map(|line| {
            line.iter()
                .map(|span| style_for(span.style).apply_to(&span.text).to_string())
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
