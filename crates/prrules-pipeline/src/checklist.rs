//! Markdown checklist parsing.
//!
//! `- [x] text` is a mandatory rule, `- [ ] text` an advisory one. Every other
//! line is ignored.

use std::sync::OnceLock;

use regex::Regex;

use prrules_types::{ChecklistItem, PrRulesError, Result, Severity};

fn item_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*-\s+\[([ xX])\]\s+(.+?)\s*$").expect("checklist pattern is valid")
    })
}

/// Parse checklist items in document order.
pub fn parse_checklist(markdown: &str) -> Vec<ChecklistItem> {
    markdown
        .lines()
        .filter_map(|line| {
            let caps = item_pattern().captures(line)?;
            let severity = match &caps[1] {
                " " => Severity::Advisory,
                _ => Severity::Mandatory,
            };
            Some(ChecklistItem {
                text: caps[2].to_string(),
                severity,
            })
        })
        .collect()
}

/// Like [`parse_checklist`] but fails when nothing parses.
pub fn parse_checklist_strict(markdown: &str) -> Result<Vec<ChecklistItem>> {
    let items = parse_checklist(markdown);
    if items.is_empty() {
        return Err(PrRulesError::MalformedChecklist(
            "no `- [x]` or `- [ ]` items found".into(),
        ));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mandatory_and_advisory_ignoring_other_lines() {
        let items = parse_checklist(
            "- [x] Title must be present\n- [ ] Use semantic commit messages\nnot a checklist line",
        );
        assert_eq!(
            items,
            vec![
                ChecklistItem::mandatory("Title must be present"),
                ChecklistItem::advisory("Use semantic commit messages"),
            ]
        );
    }

    #[test]
    fn preserves_document_order_and_duplicates() {
        let md = "# Rules\n\n- [ ] b\n- [x] a\n- [ ] b\n";
        let texts: Vec<_> = parse_checklist(md).into_iter().map(|i| i.text).collect();
        assert_eq!(texts, vec!["b", "a", "b"]);
    }

    #[test]
    fn uppercase_x_and_indentation() {
        let items = parse_checklist("  - [X]   No secrets in diffs   \n");
        assert_eq!(items, vec![ChecklistItem::mandatory("No secrets in diffs")]);
    }

    #[test]
    fn rejects_near_misses() {
        let md = "-[x] no space\n- [] empty box\n* [x] star bullet\n- [x]\n- [y] other mark";
        assert!(parse_checklist(md).is_empty());
    }

    #[test]
    fn strict_parse_fails_on_empty() {
        let err = parse_checklist_strict("just prose\n").unwrap_err();
        assert!(matches!(err, PrRulesError::MalformedChecklist(_)));
    }
}
