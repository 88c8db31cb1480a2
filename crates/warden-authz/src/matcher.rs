use serde::{Deserialize, Serialize};

/// Glob match where `*` spans any run of characters, including none.
///
/// The pattern is split at each `*` into literals: the first anchors the
/// start of `value`, the last anchors its end, and the ones between must
/// appear in order. Leftmost placement of each middle literal is always safe.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let mut literals = pattern.split('*');
    let head = literals.next().unwrap_or_default();
    let Some(mut rest) = value.strip_prefix(head) else {
        return false;
    };
    let mut middle: Vec<&str> = literals.collect();
    let Some(tail) = middle.pop() else {
        return rest.is_empty();
    };
    for literal in middle {
        match rest.find(literal) {
            Some(at) => rest = &rest[at + literal.len()..],
            None => return false,
        }
    }
    rest.ends_with(tail)
}

/// A list of workload name patterns; matches when any entry matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadPatterns(Vec<String>);

impl WorkloadPatterns {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(patterns.into_iter().map(Into::into).collect())
    }

    pub fn any() -> Self {
        Self(vec!["*".to_string()])
    }

    pub fn matches(&self, workload: &str) -> bool {
        self.0
            .iter()
            .any(|pattern| wildcard_match(pattern, workload))
    }

    pub fn patterns(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
