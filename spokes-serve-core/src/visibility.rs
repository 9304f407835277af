//! Hide/unhide rules applied to reference advertisement and push targets.
//!
//! A rule is a refname prefix; a leading `!` negates it. A refname is hidden
//! iff the last rule whose stripped form is a prefix of the name is a hide
//! rule. The rule list is assumed to be flat, i.e. there is at most one
//! level of unhiding taking place. So we will honor something like:
//!
//! ```text
//! [transfer]
//!     hideRefs = refs/heads/
//!     hideRefs = !refs/heads/unhide
//! ```
//!
//! but not a further `refs/heads/unhide/rehide` on top of the unhide.

use bstr::ByteSlice;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    unhide: bool,
    prefix: String,
}

/// An ordered set of hide/unhide rules, partitioned once per session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HideRules {
    rules: Vec<Rule>,
}

impl HideRules {
    /// Build the rule set from raw config values, in order. Empty strings
    /// are skipped.
    pub fn new<I>(raw: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let rules = raw
            .into_iter()
            .map(Into::into)
            .filter(|r| !r.is_empty())
            .map(|r| match r.strip_prefix('!') {
                Some(stripped) => Rule {
                    unhide: true,
                    prefix: stripped.to_owned(),
                },
                None => Rule {
                    unhide: false,
                    prefix: r,
                },
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `refname` must be withheld from advertisement and refused as
    /// a push target. The last matching rule wins.
    pub fn is_hidden(&self, refname: &[u8]) -> bool {
        let mut hidden = false;
        for rule in &self.rules {
            if refname.starts_with_str(&rule.prefix) {
                hidden = !rule.unhide;
            }
        }
        hidden
    }

    /// Prefixes to exclude from the main reference enumeration.
    pub fn exclude_patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter(|r| !r.unhide).map(|r| r.prefix.as_str())
    }

    /// Prefixes to enumerate separately so one level of unhiding is honored.
    pub fn unhide_patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter(|r| r.unhide).map(|r| r.prefix.as_str())
    }
}
