//! Free-text parsing of the `list` command output.
//!
//! Parsing runs in two independent passes over the cleaned response:
//!
//! 1. **Counts.** An ordered cascade of [`CountStrategy`] patterns is tried
//!    until one matches. Each strategy recognises one server/locale phrasing.
//! 2. **Names.** Everything after the first `:` separator is split into
//!    player names, tolerating commas, runs of whitespace and categorised
//!    sub-lists (`admins: Alice, Bob` on separate lines).
//!
//! When both passes succeed but disagree, the name list wins: it is read
//! directly from the output, whereas a count can be picked up from an
//! unrelated number by the looser strategies.

use std::sync::LazyLock;

use craftlink_protocol::PlayerListInfo;
use regex::{Captures, Regex};
use tracing::debug;

/// A single (pattern, extractor) pair in the count cascade.
pub struct CountStrategy {
    pub name: &'static str,
    pattern: Regex,
    extract: fn(&Captures<'_>) -> Option<(u32, u32)>,
}

impl CountStrategy {
    fn new(
        name: &'static str,
        pattern: &str,
        extract: fn(&Captures<'_>) -> Option<(u32, u32)>,
    ) -> Self {
        Self {
            name,
            // Patterns are literals below; a failure here is a programming error.
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("bad pattern {name}: {e}")),
            extract,
        }
    }

    /// Returns `(current, max)` if this strategy recognises `text`.
    pub fn apply(&self, text: &str) -> Option<(u32, u32)> {
        self.pattern.captures(text).and_then(|c| (self.extract)(&c))
    }
}

/// Both numbers in capture order: current first, max second.
fn current_then_max(caps: &Captures<'_>) -> Option<(u32, u32)> {
    let current = caps.get(1)?.as_str().parse().ok()?;
    let max = caps.get(2)?.as_str().parse().ok()?;
    Some((current, max))
}

/// The count cascade, most specific first.
pub static COUNT_STRATEGIES: LazyLock<Vec<CountStrategy>> = LazyLock::new(|| {
    vec![
        CountStrategy::new(
            "vanilla",
            r"(?i)There are (\d+) of a max(?:imum)? of (\d+) players online",
            current_then_max,
        ),
        CountStrategy::new(
            "slash",
            r"(?i)There are (\d+)/(\d+) players online",
            current_then_max,
        ),
        CountStrategy::new(
            "essentials",
            r"(?i)There are (\d+) out of (?:a )?maximum (?:of )?(\d+) players online",
            current_then_max,
        ),
        CountStrategy::new(
            "zh-cn",
            r"当前有\s*(\d+)\s*个玩家在线.*?最多\s*(\d+)\s*人",
            current_then_max,
        ),
        CountStrategy::new("zh-cn-short", r"(\d+)\s*/\s*(\d+)\s*玩家在线", current_then_max),
        CountStrategy::new(
            "de-de",
            r"(?i)Es sind (\d+) von maximal (\d+) Spielern online",
            current_then_max,
        ),
        CountStrategy::new("generic", r"(?i)(\d+)\s*(?:of|/)\s*(\d+)", current_then_max),
    ]
});

static FORMATTING_CODES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"§[0-9a-fk-orA-FK-OR]").unwrap_or_else(|e| panic!("{e}")));

/// Removes `§x` formatting codes and surrounding whitespace.
pub fn strip_formatting(text: &str) -> String {
    FORMATTING_CODES.replace_all(text, "").trim().to_string()
}

/// Runs the count cascade. Returns `(current, max, strategy name)`.
pub fn parse_counts(text: &str) -> Option<(u32, u32, &'static str)> {
    COUNT_STRATEGIES
        .iter()
        .find_map(|s| s.apply(text).map(|(current, max)| (current, max, s.name)))
}

/// Rank or status tags such as `[AFK]` or `[Admin]`.
static BRACKET_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").unwrap_or_else(|e| panic!("bad tag pattern: {e}")));

/// Splits the text after the first separator into player names.
///
/// Bracketed tags are removed before the name is read, so `[AFK]Alice`
/// yields `Alice` and a standalone `[Admin]` yields nothing.
pub fn parse_names(text: &str) -> Vec<String> {
    let Some(idx) = text.find([':', '：']) else {
        return Vec::new();
    };
    let sep_len = text[idx..].chars().next().map_or(1, char::len_utf8);
    let trailing = &text[idx + sep_len..];

    let mut names = Vec::new();
    for line in trailing.lines() {
        // Categorised sub-lists put a group label in front of each line.
        let line = match line.find([':', '：']) {
            Some(i) => &line[i + line[i..].chars().next().map_or(1, char::len_utf8)..],
            None => line,
        };

        let line = BRACKET_TAG.replace_all(line, " ");
        for token in line.split(|c: char| c == ',' || c == '，' || c.is_whitespace()) {
            let name: String = token
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .collect();
            if !name.is_empty() {
                names.push(name);
            }
        }
    }
    names
}

/// Parses a full `list` response.
pub fn parse_list_response(response: &str) -> PlayerListInfo {
    let cleaned = strip_formatting(response);
    let mut info = PlayerListInfo::default();

    if let Some((current, max, strategy)) = parse_counts(&cleaned) {
        debug!(strategy, current, max, "player counts parsed");
        info.current = current;
        info.max = max;
    }

    info.names = parse_names(&cleaned);

    if !info.names.is_empty() && info.names.len() as u32 != info.current {
        debug!(
            numeric = info.current,
            names = info.names.len(),
            "player count mismatch, trusting name list"
        );
        info.current = info.names.len() as u32;
    }

    info
}
