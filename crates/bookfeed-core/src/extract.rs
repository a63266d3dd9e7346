//! Text pattern extraction.
//!
//! The [`Extractor`] runs an ordered list of [`ExtractionStrategy`] objects
//! over a page and returns the candidates of the first strategy that finds
//! anything. Strategies are never merged.
//!
//! ```text
//!   page ──► CompactLayoutStrategy ──(empty)──► CardScanStrategy ──(empty)──► DocumentScanStrategy
//!                  │                                 │                              │
//!                  └──────────────► Vec<RawMatch> ◄──┴──────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::patterns::{ClockTime, Meridiem, TimeMatch, find_all_dates, find_date, find_last_time, find_time};

/// Longest title kept from the page.
pub const MAX_TITLE_CHARS: usize = 50;

/// Characters searched before a date in the whole-document scan.
pub const WINDOW_BEFORE: usize = 100;

/// Characters searched after a date in the whole-document scan.
pub const WINDOW_AFTER: usize = 200;

const SKIPPED_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "head"];

const BLOCK_SELECTOR: &str = "li, tr, article, [role='row'], [role='listitem'], \
    [class*='card'], [class*='row'], [class*='item'], [class*='appointment'], \
    [class*='booking'], [class*='session'], [class*='event']";

const HEADING_SELECTOR: &str = "h1, h2, h3, h4, h5, h6, [class*='title']";

static COMPACT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(mon|tue|wed|thu|fri|sat|sun)\s*\|\s*(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\s+(\d{1,2}),\s*(\d{2})\s*(confirmed|booked|scheduled|reserved|pending|upcoming|completed|cancell?ed)\s*(\d{1,2}):(\d{2})\s*(am|pm)\b",
    )
    .expect("Invalid compact layout regex")
});

static TITLE_PHRASE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:session|class|lesson|tutoring)\s*:\s*([^\n|]+)")
        .expect("Invalid title phrase regex")
});

/// An unvalidated date/time candidate located on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMatch {
    /// The date substring as found.
    pub date_text: String,
    /// The located start (and optional end) time.
    pub time: TimeMatch,
    /// Text surrounding the match.
    pub context: String,
    /// Title inferred from a heading or labelled phrase, if any.
    pub title: Option<String>,
}

/// A page prepared once for every strategy.
pub struct Page {
    document: Html,
    text: String,
}

impl Page {
    /// Parses raw HTML (or plain text) into a page.
    pub fn parse(source: &str) -> Self {
        let document = Html::parse_document(source);
        let text = visible_text(document.root_element());
        Self { document, text }
    }

    /// Visible text with one line per text node.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The parsed document.
    pub fn document(&self) -> &Html {
        &self.document
    }
}

/// A single way of locating appointments on a page.
pub trait ExtractionStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns every candidate this strategy can find, in page order.
    fn extract(&self, page: &Page) -> Vec<RawMatch>;
}

/// Ordered set of strategies; first non-empty result wins.
pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(CompactLayoutStrategy),
            Box::new(CardScanStrategy),
            Box::new(DocumentScanStrategy),
        ])
    }
}

impl Extractor {
    /// Creates an extractor trying `strategies` in the given order.
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names of the configured strategies, in priority order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Extracts candidates from raw page source.
    pub fn extract(&self, source: &str) -> Vec<RawMatch> {
        if source.trim().is_empty() {
            return Vec::new();
        }

        let page = Page::parse(source);
        for strategy in &self.strategies {
            let matches = strategy.extract(&page);
            if !matches.is_empty() {
                debug!(
                    strategy = strategy.name(),
                    count = matches.len(),
                    "Extracted appointment candidates"
                );
                return matches;
            }
            trace!(strategy = strategy.name(), "Strategy found nothing");
        }

        debug!("No appointment candidates found");
        Vec::new()
    }
}

/// Matches the portal's compact `Tue | Jan 13, 26 Confirmed 4:00pm` layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactLayoutStrategy;

impl ExtractionStrategy for CompactLayoutStrategy {
    fn name(&self) -> &'static str {
        "compact"
    }

    fn extract(&self, page: &Page) -> Vec<RawMatch> {
        let text = page.text();
        COMPACT_REGEX
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let date_text = format!("{} {}, {}", &caps[2], &caps[3], &caps[4]);
                let start = ClockTime::new(
                    caps[6].parse().ok()?,
                    caps[7].parse().ok()?,
                    Meridiem::parse(&caps[8]),
                );
                let context_end = chars_forward(text, whole.end(), WINDOW_AFTER);
                let context = text[whole.start()..context_end].to_string();
                let title = infer_title(None, &text[whole.end()..context_end]);
                Some(RawMatch {
                    date_text,
                    time: TimeMatch::single(start),
                    context,
                    title,
                })
            })
            .collect()
    }
}

/// Looks for one booking per repeating block (card, row, list item).
#[derive(Debug, Default, Clone, Copy)]
pub struct CardScanStrategy;

impl ExtractionStrategy for CardScanStrategy {
    fn name(&self) -> &'static str {
        "card"
    }

    fn extract(&self, page: &Page) -> Vec<RawMatch> {
        let (Ok(blocks), Ok(headings)) = (
            Selector::parse(BLOCK_SELECTOR),
            Selector::parse(HEADING_SELECTOR),
        ) else {
            return Vec::new();
        };

        let mut hits = Vec::new();
        for block in page.document().select(&blocks) {
            let text = visible_text(block);
            let Some(date) = find_date(&text) else {
                continue;
            };
            let Some((time, _)) = find_time(&text[date.span.end..]).or_else(|| find_time(&text))
            else {
                continue;
            };

            let heading = block
                .select(&headings)
                .map(|h| collapse_whitespace(&h.text().collect::<Vec<_>>().join(" ")))
                .find(|h| !h.is_empty() && find_date(h).is_none());

            let ancestors: HashSet<_> = block.ancestors().map(|a| a.id()).collect();
            hits.push((
                block.id(),
                ancestors,
                RawMatch {
                    date_text: date.text,
                    time,
                    title: infer_title(heading.as_deref(), &text),
                    context: text,
                },
            ));
        }

        // A block that contains another matching block is a container, not a booking.
        let nested: HashSet<_> = hits
            .iter()
            .flat_map(|(_, ancestors, _)| ancestors.iter().copied())
            .collect();

        hits.into_iter()
            .filter(|(id, _, _)| !nested.contains(id))
            .map(|(_, _, m)| m)
            .collect()
    }
}

/// Scans the whole text for dates and looks for a time near each one.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentScanStrategy;

impl ExtractionStrategy for DocumentScanStrategy {
    fn name(&self) -> &'static str {
        "document"
    }

    fn extract(&self, page: &Page) -> Vec<RawMatch> {
        let text = page.text();
        find_all_dates(text)
            .into_iter()
            .filter_map(|date| {
                let window_start = chars_back(text, date.span.start, WINDOW_BEFORE);
                let window_end = chars_forward(text, date.span.end, WINDOW_AFTER);
                let after = &text[date.span.end..window_end];
                let before = &text[window_start..date.span.start];

                let (time, _) = find_time(after).or_else(|| find_last_time(before))?;
                let context = &text[window_start..window_end];
                let title = infer_title(None, after).or_else(|| infer_title(None, context));

                Some(RawMatch {
                    date_text: date.text,
                    time,
                    context: context.to_string(),
                    title,
                })
            })
            .collect()
    }
}

/// Picks a title from a heading, then from a labelled phrase in `context`.
///
/// Returns `None` when neither is present; callers apply their default.
pub fn infer_title(heading: Option<&str>, context: &str) -> Option<String> {
    let from_heading = heading
        .map(collapse_whitespace)
        .filter(|h| !h.is_empty());

    let candidate = from_heading.or_else(|| {
        TITLE_PHRASE_REGEX
            .captures(context)
            .and_then(|caps| caps.get(1))
            .map(|m| collapse_whitespace(m.as_str()))
    })?;

    let truncated: String = candidate.chars().take(MAX_TITLE_CHARS).collect();
    let truncated = truncated.trim().to_string();
    (!truncated.is_empty()).then_some(truncated)
}

/// Collects visible text below `root`, one trimmed text node per line.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut lines = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        let line = collapse_whitespace(text);
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte offset `n` characters before `from`, clamped to the start.
fn chars_back(s: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    s[..from]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map_or(0, |(i, _)| i)
}

/// Byte offset `n` characters after `from`, clamped to the end.
fn chars_forward(s: &str, from: usize, n: usize) -> usize {
    s[from..]
        .char_indices()
        .nth(n)
        .map_or(s.len(), |(i, _)| from + i)
}
