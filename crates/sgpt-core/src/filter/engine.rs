use super::store::RuleSet;

/// Why a message was blocked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockReason {
    Keyword(String),
    Pattern(String),
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::Keyword(k) => write!(f, "keyword {k:?}"),
            BlockReason::Pattern(p) => write!(f, "pattern {p:?}"),
        }
    }
}

/// First rule that matches `text`, keywords before patterns.
pub fn first_match(text: &str, rules: &RuleSet) -> Option<BlockReason> {
    let lower = text.to_lowercase();

    if let Some(k) = rules.keywords().iter().find(|k| lower.contains(k.as_str())) {
        return Some(BlockReason::Keyword(k.clone()));
    }

    rules
        .patterns()
        .iter()
        .find(|re| re.is_match(&lower))
        .map(|re| BlockReason::Pattern(re.as_str().to_string()))
}

/// `true` when `text` must not be forwarded to the completion boundary.
pub fn classify(text: &str, rules: &RuleSet) -> bool {
    first_match(text, rules).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::store::ConfigDocument;

    fn rules(keywords: &[&str], patterns: &[&str]) -> RuleSet {
        RuleSet::compile(&ConfigDocument {
            blocked_keywords: keywords.iter().map(|s| s.to_string()).collect(),
            regex_patterns: patterns.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn blocklist_scenario() {
        let r = rules(&["secret"], &[r"\d{3}-\d{2}-\d{4}"]);
        assert!(classify("my SECRET token", &r));
        assert!(classify("ssn 123-45-6789", &r));
        assert!(!classify("hello world", &r));
    }

    #[test]
    fn empty_rules_never_block() {
        let r = RuleSet::default();
        for text in ["", "secret", "123-45-6789", "anything at all"] {
            assert!(!classify(text, &r));
        }
    }

    #[test]
    fn keywords_match_case_insensitive_substrings() {
        let r = rules(&["PassWord"], &[]);
        assert!(classify("my password is", &r));
        assert!(classify("MYPASSWORDIS", &r));
        assert!(!classify("pass word", &r));
    }

    #[test]
    fn patterns_match_case_insensitively() {
        let r = rules(&[], &["ACCT-[A-Z]{2}\\d+"]);
        assert!(classify("see acct-ab42", &r));
        assert!(classify("see ACCT-AB42", &r));
        assert!(!classify("see acct-42", &r));
    }

    #[test]
    fn keywords_are_checked_before_patterns() {
        let r = rules(&["token"], &["tok.n"]);
        assert_eq!(
            first_match("a token here", &r),
            Some(BlockReason::Keyword("token".to_string()))
        );
        assert_eq!(
            first_match("a tokyn here", &r),
            Some(BlockReason::Pattern("tok.n".to_string()))
        );
    }

    #[test]
    fn first_rule_in_order_wins() {
        let r = rules(&["b", "a"], &[]);
        assert_eq!(
            first_match("a b", &r),
            Some(BlockReason::Keyword("b".to_string()))
        );
    }

    #[test]
    fn classification_is_repeatable() {
        let r = rules(&["secret"], &["x{3}"]);
        for text in ["secret", "xxx", "nope"] {
            let first = classify(text, &r);
            for _ in 0..3 {
                assert_eq!(classify(text, &r), first);
            }
        }
    }
}
