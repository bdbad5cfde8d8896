//! Exclusion predicates consulted by the walker.
//!
//! All predicates are pure: they look at names and paths only, never at
//! the filesystem. The walker calls the cheap name-based ones before
//! statting anything, so an excluded subtree is never touched.
//!
//! Rule syntax is deliberately small: an anchored rule (leading '/')
//! matches a sub-path prefix on component boundaries, an unanchored rule
//! matches the final name (with an optional leading '*' for suffix
//! matches), and a trailing '/' marks a directory rule. First matching
//! rule wins; the default is "not excluded".

use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
pub struct FilterRule {
    action: RuleAction,
    /// Anchored rules match from the tree root.
    anchored: bool,
    /// Directory rules only apply to the dir predicate.
    dir_only: bool,
    pattern: Vec<u8>,
}

impl FilterRule {
    /// Parse one rule body (the part after `exclude`/`include` in the
    /// config file).
    pub fn parse(action: RuleAction, text: &str) -> Self {
        let mut pattern = text.as_bytes();
        let anchored = pattern.starts_with(b"/");
        if anchored {
            pattern = &pattern[1..];
        }
        let dir_only = pattern.ends_with(b"/");
        if dir_only {
            pattern = &pattern[..pattern.len() - 1];
        }
        FilterRule {
            action,
            anchored,
            dir_only,
            pattern: pattern.to_vec(),
        }
    }

    fn matches(&self, sub: &Path) -> bool {
        let sub = sub.as_os_str().as_bytes();
        if self.anchored {
            // prefix on a component boundary
            sub == self.pattern
                || (sub.len() > self.pattern.len()
                    && sub.starts_with(&self.pattern)
                    && sub[self.pattern.len()] == b'/')
        } else {
            let name = match sub.iter().rposition(|&c| c == b'/') {
                Some(i) => &sub[i + 1..],
                None => sub,
            };
            match self.pattern.split_first() {
                Some((&b'*', suffix)) => name.ends_with(suffix),
                _ => name == &self.pattern[..],
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Filters {
    /// Skip dot-names without statting them.
    pub filter_hidden: bool,
    rules: Vec<FilterRule>,
    /// Absolute paths of content files living inside protected trees.
    content: Vec<PathBuf>,
}

impl Filters {
    pub fn new() -> Self {
        Filters::default()
    }

    pub fn add_rule(&mut self, rule: FilterRule) {
        self.rules.push(rule);
    }

    pub fn add_content(&mut self, path: impl Into<PathBuf>) {
        self.content.push(path.into());
    }

    /// Name-only check, safe to call straight off the dirent.
    pub fn is_hidden(&self, name: &[u8]) -> bool {
        self.filter_hidden && name.first() == Some(&b'.')
    }

    /// Is this full path one of our own content files?
    pub fn is_content(&self, path: &Path) -> bool {
        self.content
            .iter()
            .any(|c| c.as_os_str().as_bytes() == path.as_os_str().as_bytes())
    }

    /// Should this file or symlink be excluded from the scan?
    pub fn excludes_path(&self, _disk: &str, sub: &Path) -> bool {
        self.first_match(sub, false) == Some(RuleAction::Exclude)
    }

    /// Should this directory be excluded (not descended into)?
    pub fn excludes_dir(&self, _disk: &str, sub: &Path) -> bool {
        self.first_match(sub, true) == Some(RuleAction::Exclude)
    }

    fn first_match(&self, sub: &Path, is_dir: bool) -> Option<RuleAction> {
        self.rules
            .iter()
            .find(|r| (is_dir || !r.dir_only) && r.matches(sub))
            .map(|r| r.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exclude(text: &str) -> FilterRule {
        FilterRule::parse(RuleAction::Exclude, text)
    }

    #[test]
    fn hidden_names() {
        let mut f = Filters::new();
        assert!(!f.is_hidden(b".git"));
        f.filter_hidden = true;
        assert!(f.is_hidden(b".git"));
        assert!(!f.is_hidden(b"git"));
    }

    #[test]
    fn anchored_rule_matches_component_prefix() {
        let mut f = Filters::new();
        f.add_rule(exclude("/tmp/cache"));
        assert!(f.excludes_path("d", Path::new("tmp/cache")));
        assert!(f.excludes_path("d", Path::new("tmp/cache/a.bin")));
        assert!(!f.excludes_path("d", Path::new("tmp/cachette")));
        assert!(!f.excludes_path("d", Path::new("other/tmp/cache")));
    }

    #[test]
    fn name_rule_matches_basename() {
        let mut f = Filters::new();
        f.add_rule(exclude("Thumbs.db"));
        assert!(f.excludes_path("d", Path::new("a/b/Thumbs.db")));
        assert!(f.excludes_path("d", Path::new("Thumbs.db")));
        assert!(!f.excludes_path("d", Path::new("a/Thumbs.db.bak")));
    }

    #[test]
    fn star_rule_matches_suffix() {
        let mut f = Filters::new();
        f.add_rule(exclude("*.tmp"));
        assert!(f.excludes_path("d", Path::new("x/y/z.tmp")));
        assert!(!f.excludes_path("d", Path::new("x/y/z.tmp2")));
    }

    #[test]
    fn dir_rule_only_hits_dir_predicate() {
        let mut f = Filters::new();
        f.add_rule(exclude("/lost+found/"));
        assert!(f.excludes_dir("d", Path::new("lost+found")));
        assert!(!f.excludes_path("d", Path::new("lost+found")));
    }

    #[test]
    fn first_match_wins() {
        let mut f = Filters::new();
        f.add_rule(FilterRule::parse(RuleAction::Include, "/keep/me.tmp"));
        f.add_rule(exclude("*.tmp"));
        assert!(!f.excludes_path("d", Path::new("keep/me.tmp")));
        assert!(f.excludes_path("d", Path::new("keep/other.tmp")));
    }

    #[test]
    fn content_paths_match_exactly() {
        let mut f = Filters::new();
        f.add_content("/mnt/d1/snapraid.content");
        assert!(f.is_content(Path::new("/mnt/d1/snapraid.content")));
        assert!(!f.is_content(Path::new("/mnt/d1/snapraid.content.lock")));
    }
}
