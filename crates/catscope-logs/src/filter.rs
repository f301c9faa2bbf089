use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use crate::buffer::{BatchChange, RetentionBuffer};
use catscope_types::{ArcLogRecord, LogRecord, Priority};

/// Compiled form of the text query
#[derive(Clone, Debug, Default)]
enum TextMatcher {
    /// Empty query
    #[default]
    Any,
    /// Lowered query for case-insensitive substring search
    Substring(String),
    /// Case-insensitive regex
    Pattern(Regex),
    /// Regex that failed to compile; matches nothing
    Invalid(String),
}

/// One immutable set of filter criteria.
///
/// Setters on [`FilterEngine`] build a new value and swap it in whole, so an
/// evaluator holding a snapshot never sees a partially updated filter.
#[derive(Clone, Debug, Default)]
pub struct FilterCriteria {
    text_query: String,
    text_is_regex: bool,
    matcher: TextMatcher,
    tag_set: HashSet<String>,
    min_priority: Priority,
    pid_filter: String,
}

impl FilterCriteria {
    /// Criteria that accept every record
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the text query
    pub fn with_text(mut self, query: &str, is_regex: bool) -> Self {
        self.text_query = query.to_string();
        self.text_is_regex = is_regex;
        self.matcher = if query.is_empty() {
            TextMatcher::Any
        } else if is_regex {
            match RegexBuilder::new(query).case_insensitive(true).build() {
                Ok(re) => TextMatcher::Pattern(re),
                Err(e) => TextMatcher::Invalid(e.to_string()),
            }
        } else {
            TextMatcher::Substring(fold_case(query))
        };
        self
    }

    /// Replace the tag set (empty = all tags)
    pub fn with_tags(mut self, tags: HashSet<String>) -> Self {
        self.tag_set = tags;
        self
    }

    /// Replace the priority threshold
    pub fn with_min_priority(mut self, priority: Priority) -> Self {
        self.min_priority = priority;
        self
    }

    /// Replace the PID filter (trimmed, empty = all)
    pub fn with_pid(mut self, pid: &str) -> Self {
        self.pid_filter = pid.trim().to_string();
        self
    }

    /// Check if a record passes every criterion.
    ///
    /// Checks run cheapest first; the result does not depend on the order.
    pub fn accepts(&self, record: &LogRecord) -> bool {
        if record.priority.ordinal() < self.min_priority.ordinal() {
            return false;
        }

        if !self.pid_filter.is_empty() && record.pid != self.pid_filter {
            return false;
        }

        if !self.tag_set.is_empty() && !self.tag_set.contains(&record.tag) {
            return false;
        }

        self.text_matches(record)
    }

    fn text_matches(&self, record: &LogRecord) -> bool {
        match &self.matcher {
            TextMatcher::Any => true,
            TextMatcher::Invalid(_) => false,
            TextMatcher::Pattern(re) => re.is_match(&format!("{} {}", record.tag, record.message)),
            TextMatcher::Substring(needle) => {
                fold_case(&format!("{} {}", record.tag, record.message)).contains(needle.as_str())
            }
        }
    }

    pub fn text_query(&self) -> &str {
        &self.text_query
    }

    pub fn text_is_regex(&self) -> bool {
        self.text_is_regex
    }

    pub fn tags(&self) -> &HashSet<String> {
        &self.tag_set
    }

    pub fn min_priority(&self) -> Priority {
        self.min_priority
    }

    pub fn pid(&self) -> &str {
        &self.pid_filter
    }

    /// Compile error of the current regex query, if any
    pub fn text_error(&self) -> Option<&str> {
        match &self.matcher {
            TextMatcher::Invalid(e) => Some(e.as_str()),
            _ => None,
        }
    }

    /// Check if the criteria accept everything
    pub fn is_empty(&self) -> bool {
        matches!(self.matcher, TextMatcher::Any)
            && self.tag_set.is_empty()
            && self.min_priority == Priority::Verbose
            && self.pid_filter.is_empty()
    }
}

/// Holds the active criteria and the visible row count.
///
/// Rows are evaluated lazily against the buffer; no filtered copy is kept.
#[derive(Debug, Default)]
pub struct FilterEngine {
    criteria: Arc<FilterCriteria>,
    visible: usize,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current criteria
    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    /// Shared handle on the current criteria
    pub fn snapshot(&self) -> Arc<FilterCriteria> {
        Arc::clone(&self.criteria)
    }

    fn replace(&mut self, update: impl FnOnce(FilterCriteria) -> FilterCriteria) {
        let next = update(FilterCriteria::clone(&self.criteria));
        self.criteria = Arc::new(next);
    }

    /// Set the search text. An invalid regex matches nothing until replaced.
    pub fn set_text_filter(&mut self, query: &str, is_regex: bool) {
        self.replace(|c| c.with_text(query, is_regex));
    }

    pub fn set_tag_filter(&mut self, tags: HashSet<String>) {
        self.replace(|c| c.with_tags(tags));
    }

    pub fn set_min_priority(&mut self, priority: Priority) {
        self.replace(|c| c.with_min_priority(priority));
    }

    pub fn set_pid_filter(&mut self, pid: &str) {
        self.replace(|c| c.with_pid(pid));
    }

    /// Reset every criterion
    pub fn clear_filters(&mut self) {
        self.criteria = Arc::new(FilterCriteria::new());
    }

    pub fn accepts(&self, record: &LogRecord) -> bool {
        self.criteria.accepts(record)
    }

    /// Evaluate one buffer row; out-of-range rows are rejected
    pub fn accepts_row(&self, buffer: &RetentionBuffer, index: usize) -> bool {
        buffer.get(index).is_some_and(|r| self.criteria.accepts(r))
    }

    /// Recompute the visible count from scratch
    pub fn refilter(&mut self, buffer: &RetentionBuffer) -> usize {
        self.visible = buffer.iter().filter(|r| self.criteria.accepts(r)).count();
        self.visible
    }

    /// Update the visible count for one applied batch, criteria unchanged
    pub fn apply_batch(&mut self, buffer: &RetentionBuffer, change: &BatchChange) -> usize {
        let evicted = change.evicted.iter().filter(|r| self.criteria.accepts(r)).count();
        let inserted = change
            .inserted
            .clone()
            .map_or(0, |rows| self.count_in(buffer, rows));
        self.visible = self.visible.saturating_sub(evicted) + inserted;
        self.visible
    }

    /// Forget the visible count after the buffer was cleared
    pub fn reset(&mut self) {
        self.visible = 0;
    }

    /// Rows passing the filter as of the last refresh
    pub fn visible_count(&self) -> usize {
        self.visible
    }

    fn count_in(&self, buffer: &RetentionBuffer, rows: Range<usize>) -> usize {
        rows.filter(|&i| self.accepts_row(buffer, i)).count()
    }
}

/// Read-only filtered view over the buffer
#[derive(Clone, Copy)]
pub struct FilteredView<'a> {
    buffer: &'a RetentionBuffer,
    filter: &'a FilterEngine,
}

impl<'a> FilteredView<'a> {
    pub fn new(buffer: &'a RetentionBuffer, filter: &'a FilterEngine) -> Self {
        Self { buffer, filter }
    }

    /// Visible records, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &'a ArcLogRecord> + 'a {
        let criteria = self.filter.criteria();
        self.buffer.iter().filter(move |r| criteria.accepts(r))
    }

    /// Visible records among the given source rows
    pub fn rows(&self, rows: Range<usize>) -> impl Iterator<Item = &'a ArcLogRecord> + 'a {
        let buffer = self.buffer;
        let criteria = self.filter.criteria();
        rows.filter_map(move |i| buffer.get(i))
            .filter(move |r| criteria.accepts(r))
    }

    /// The n-th visible record
    pub fn nth(&self, n: usize) -> Option<&'a ArcLogRecord> {
        self.iter().nth(n)
    }

    pub fn visible_count(&self) -> usize {
        self.filter.visible_count()
    }

    pub fn total_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn fill_percent(&self) -> f64 {
        self.buffer.fill_percent()
    }

    pub fn criteria(&self) -> &'a FilterCriteria {
        self.filter.criteria()
    }
}

/// Lowercase each char on its own, so the result does not depend on context
/// (`str::to_lowercase` turns a word-final sigma into `ς`)
fn fold_case(s: &str) -> String {
    s.chars().flat_map(char::to_lowercase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(pid: &str, priority: Priority, tag: &str, message: &str) -> LogRecord {
        LogRecord::new("01-15 10:22:33.123", pid, "1", priority, tag, message)
    }

    fn sample() -> Vec<LogRecord> {
        vec![
            record("100", Priority::Verbose, "Net", "socket opened"),
            record("100", Priority::Debug, "Net", "Sending 42 bytes"),
            record("200", Priority::Info, "ActivityManager", "Start proc com.example"),
            record("200", Priority::Warn, "ActivityManager", "Slow operation: 120ms"),
            record("300", Priority::Error, "AndroidRuntime", "FATAL EXCEPTION: main"),
            record("300", Priority::Fatal, "libc", "Fatal signal 11 (SIGSEGV)"),
            record("400", Priority::Silent, "Net", "silent marker"),
        ]
    }

    fn buffer_of(records: Vec<LogRecord>) -> RetentionBuffer {
        let mut buffer = RetentionBuffer::new(100);
        buffer.append_batch(records.into_iter().map(Arc::new).collect());
        buffer
    }

    #[test]
    fn test_empty_criteria_accept_all() {
        let criteria = FilterCriteria::new();
        assert!(criteria.is_empty());
        assert!(sample().iter().all(|r| criteria.accepts(r)));
    }

    #[test]
    fn test_priority_threshold() {
        let criteria = FilterCriteria::new().with_min_priority(Priority::Warn);
        let accepted: Vec<Priority> = sample()
            .iter()
            .filter(|r| criteria.accepts(r))
            .map(|r| r.priority)
            .collect();
        assert_eq!(
            accepted,
            vec![Priority::Warn, Priority::Error, Priority::Fatal, Priority::Silent]
        );
    }

    #[test]
    fn test_pid_filter_exact_and_trimmed() {
        let criteria = FilterCriteria::new().with_pid(" 200 ");
        assert_eq!(criteria.pid(), "200");
        let count = sample().iter().filter(|r| criteria.accepts(r)).count();
        assert_eq!(count, 2);
        let criteria = FilterCriteria::new().with_pid("20");
        assert_eq!(sample().iter().filter(|r| criteria.accepts(r)).count(), 0);
    }

    #[test]
    fn test_tag_filter_is_exact() {
        let tags: HashSet<String> = ["Net".to_string()].into_iter().collect();
        let criteria = FilterCriteria::new().with_tags(tags);
        assert_eq!(sample().iter().filter(|r| criteria.accepts(r)).count(), 3);

        let tags: HashSet<String> = ["net".to_string()].into_iter().collect();
        let criteria = FilterCriteria::new().with_tags(tags);
        assert_eq!(sample().iter().filter(|r| criteria.accepts(r)).count(), 0);
    }

    #[test]
    fn test_plain_text_is_case_insensitive_over_tag_and_message() {
        let criteria = FilterCriteria::new().with_text("FATAL", false);
        let tags: Vec<_> = sample()
            .iter()
            .filter(|r| criteria.accepts(r))
            .map(|r| r.tag.clone())
            .collect();
        assert_eq!(tags, vec!["AndroidRuntime", "libc"]);

        // The haystack is "tag message", so the joining space is searchable
        let criteria = FilterCriteria::new().with_text("net sending", false);
        assert_eq!(sample().iter().filter(|r| criteria.accepts(r)).count(), 1);
    }

    #[test]
    fn test_regex_text_filter() {
        let criteria = FilterCriteria::new().with_text(r"^activitymanager slow", true);
        assert_eq!(sample().iter().filter(|r| criteria.accepts(r)).count(), 1);

        let criteria = FilterCriteria::new().with_text(r"\d+ bytes", true);
        assert_eq!(sample().iter().filter(|r| criteria.accepts(r)).count(), 1);
    }

    #[test]
    fn test_invalid_regex_matches_nothing() {
        let criteria = FilterCriteria::new().with_text("(unclosed", true);
        assert!(criteria.text_error().is_some());
        assert_eq!(sample().iter().filter(|r| criteria.accepts(r)).count(), 0);

        let criteria = criteria.with_text("(closed)", true);
        assert!(criteria.text_error().is_none());
    }

    #[test]
    fn test_empty_regex_query_passes() {
        let criteria = FilterCriteria::new().with_text("", true);
        assert!(sample().iter().all(|r| criteria.accepts(r)));
    }

    #[test]
    fn test_plain_and_escaped_regex_agree_on_literals() {
        for query in ["net", "Slow operation", "com.example", "(SIGSEGV)", "42 bytes", "zzz"] {
            let plain = FilterCriteria::new().with_text(query, false);
            let regex = FilterCriteria::new().with_text(&regex::escape(query), true);
            for r in sample() {
                assert_eq!(plain.accepts(&r), regex.accepts(&r), "query {:?} on {:?}", query, r);
            }
        }
    }

    #[test]
    fn test_plain_text_ignores_final_sigma_form() {
        let r = record("100", Priority::Info, "Greek", "ΟΔΟΣ");
        let plain = FilterCriteria::new().with_text("Σ", false);
        let regex = FilterCriteria::new().with_text(&regex::escape("Σ"), true);
        assert!(plain.accepts(&r));
        assert!(regex.accepts(&r));
        assert!(FilterCriteria::new().with_text("οδοσ", false).accepts(&r));
    }

    #[test]
    fn test_predicates_are_conjunctive() {
        let tags: HashSet<String> = ["ActivityManager".to_string(), "Net".to_string()]
            .into_iter()
            .collect();
        let combined = FilterCriteria::new()
            .with_min_priority(Priority::Debug)
            .with_pid("200")
            .with_tags(tags.clone())
            .with_text("slow", false);
        let parts = [
            FilterCriteria::new().with_min_priority(Priority::Debug),
            FilterCriteria::new().with_pid("200"),
            FilterCriteria::new().with_tags(tags),
            FilterCriteria::new().with_text("slow", false),
        ];
        for r in sample() {
            let expected = parts.iter().all(|c| c.accepts(&r));
            assert_eq!(combined.accepts(&r), expected);
        }
    }

    #[test]
    fn test_setters_swap_snapshots() {
        let mut engine = FilterEngine::new();
        let before = engine.snapshot();
        engine.set_min_priority(Priority::Error);
        engine.set_pid_filter("300");

        assert_eq!(before.min_priority(), Priority::Verbose);
        assert_eq!(engine.criteria().min_priority(), Priority::Error);
        assert_eq!(engine.criteria().pid(), "300");

        engine.clear_filters();
        assert!(engine.criteria().is_empty());
    }

    #[test]
    fn test_refilter_and_incremental_batch_agree() {
        let mut buffer = RetentionBuffer::new(4);
        let mut engine = FilterEngine::new();
        engine.set_min_priority(Priority::Warn);

        let records: Vec<ArcLogRecord> = sample().into_iter().map(Arc::new).collect();
        for chunk in records.chunks(3) {
            let change = buffer.append_batch(chunk.to_vec());
            let incremental = engine.apply_batch(&buffer, &change);
            let mut fresh = FilterEngine::new();
            fresh.set_min_priority(Priority::Warn);
            assert_eq!(incremental, fresh.refilter(&buffer));
        }
        // W, E, F, S survive in a buffer of four
        assert_eq!(engine.visible_count(), 4);
    }

    #[test]
    fn test_filtered_view() {
        let buffer = buffer_of(sample());
        let mut engine = FilterEngine::new();
        engine.set_tag_filter(["Net".to_string()].into_iter().collect());
        engine.refilter(&buffer);

        let view = FilteredView::new(&buffer, &engine);
        assert_eq!(view.visible_count(), 3);
        assert_eq!(view.total_count(), 7);
        let messages: Vec<_> = view.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["socket opened", "Sending 42 bytes", "silent marker"]);
        let tail: Vec<_> = view.rows(2..7).map(|r| r.message.as_str()).collect();
        assert_eq!(tail, vec!["silent marker"]);
        assert_eq!(view.nth(1).map(|r| r.message.as_str()), Some("Sending 42 bytes"));
        assert!(!engine.accepts_row(&buffer, 99));
    }
}
