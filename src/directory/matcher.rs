//! Keyword heuristics for finding a reusable tool.

use crate::types::{ToolCategory, ToolSpec};
use std::collections::HashSet;

/// Decides which stored tool, if any, answers a subtask.
pub trait ToolMatcher: Send + Sync {
    /// Category to search, or `None` to skip lookup entirely.
    fn category_for(&self, query: &str, declared: ToolCategory) -> Option<ToolCategory>;

    /// Choose among same-category candidates (registration order).
    fn pick<'a>(&self, query: &str, candidates: &'a [ToolSpec]) -> Option<&'a ToolSpec>;
}

/// Fixed keyword sets per category, checked in order.
///
/// The declared category is ignored: reuse only happens when the request
/// text itself names the capability.
pub struct KeywordMatcher {
    sets: Vec<(ToolCategory, &'static [&'static str])>,
}

const DATETIME_KEYWORDS: &[&str] = &[
    "time", "clock", "hour", "minute", "now", "date", "today", "timestamp", "时间", "几点",
    "日期",
];
const CALENDAR_KEYWORDS: &[&str] = &["calendar", "weekday", "leap", "month", "日历", "星期"];
const MATH_KEYWORDS: &[&str] = &[
    "calculate", "compute", "math", "sum", "multiply", "divide", "add", "subtract", "计算",
    "加", "减", "乘", "除", "求和",
];
const TEXT_KEYWORDS: &[&str] = &["uppercase", "lowercase", "reverse", "words", "characters", "text"];

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self {
            sets: vec![
                (ToolCategory::Datetime, DATETIME_KEYWORDS),
                (ToolCategory::Calendar, CALENDAR_KEYWORDS),
                (ToolCategory::Math, MATH_KEYWORDS),
                (ToolCategory::Text, TEXT_KEYWORDS),
            ],
        }
    }
}

/// Lowercased ASCII words of `text`.
fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

impl KeywordMatcher {
    fn mentions(query: &str, tokens: &HashSet<String>, keyword: &str) -> bool {
        if keyword.is_ascii() {
            tokens.contains(keyword)
        } else {
            // CJK text has no spaces to split on.
            query.contains(keyword)
        }
    }
}

impl ToolMatcher for KeywordMatcher {
    fn category_for(&self, query: &str, _declared: ToolCategory) -> Option<ToolCategory> {
        let tokens = words(query);
        self.sets
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| Self::mentions(query, &tokens, k)))
            .map(|(category, _)| *category)
    }

    fn pick<'a>(&self, query: &str, candidates: &'a [ToolSpec]) -> Option<&'a ToolSpec> {
        let query_words = words(query);
        let score = |tool: &ToolSpec| {
            let tool_words = words(&format!("{} {}", tool.name.replace('_', " "), tool.description));
            query_words.intersection(&tool_words).count()
        };
        // max_by_key keeps the last maximum; reverse so ties keep the first.
        candidates.iter().rev().max_by_key(|t| score(*t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, description: &str) -> ToolSpec {
        ToolSpec {
            name: name.into(),
            description: description.into(),
            parameters: Default::default(),
            return_kind: "string".into(),
            category: ToolCategory::Datetime,
            code: String::new(),
            version: 1,
        }
    }

    #[test]
    fn detects_categories_from_keywords() {
        let m = KeywordMatcher::default();
        let other = ToolCategory::Other;
        assert_eq!(m.category_for("What time is it?", other), Some(ToolCategory::Datetime));
        assert_eq!(m.category_for("现在几点了", other), Some(ToolCategory::Datetime));
        assert_eq!(m.category_for("is 2024 a leap year", other), Some(ToolCategory::Calendar));
        assert_eq!(m.category_for("please calculate 3 * 4", other), Some(ToolCategory::Math));
        assert_eq!(m.category_for("reverse this text", other), Some(ToolCategory::Text));
        assert_eq!(m.category_for("roll two dice", ToolCategory::Math), None);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let m = KeywordMatcher::default();
        assert_eq!(m.category_for("sometimes nowhere", ToolCategory::Other), None);
    }

    #[test]
    fn picks_best_overlap_then_first_registered() {
        let m = KeywordMatcher::default();
        let tools = vec![
            tool("get_current_time", "Return the current clock time"),
            tool("get_current_date", "Return today's date"),
        ];
        assert_eq!(m.pick("what is the date today", &tools).unwrap().name, "get_current_date");
        assert_eq!(m.pick("what hour is it", &tools).unwrap().name, "get_current_time");
        assert!(m.pick("anything", &[]).is_none());
    }
}
