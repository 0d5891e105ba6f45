//! Name pattern matching for policy targets
//!
//! A policy name is either an exact variable name or a pattern in which each
//! `#` stands for exactly one hexadecimal digit, e.g. `Boot####` matches
//! `Boot0001` and `Boot00AF` but not `Boot1` or `BootNext`.

/// Pattern matcher for policy names
pub struct PatternMatcher;

impl PatternMatcher {
    /// Character matching one hexadecimal digit
    pub const WILDCARD: char = '#';

    /// Check if a variable name matches a pattern
    ///
    /// # Examples
    /// ```
    /// use varstore::policy::PatternMatcher;
    ///
    /// assert!(PatternMatcher::matches("Boot####", "Boot000A"));
    /// assert!(!PatternMatcher::matches("Boot####", "BootOrder"));
    /// assert!(PatternMatcher::matches("Lang", "Lang"));
    /// ```
    pub fn matches(pattern: &str, name: &str) -> bool {
        if !pattern.contains(Self::WILDCARD) {
            return pattern == name;
        }

        let mut pattern_chars = pattern.chars();
        let mut name_chars = name.chars();
        loop {
            match (pattern_chars.next(), name_chars.next()) {
                (None, None) => return true,
                (Some(Self::WILDCARD), Some(c)) if c.is_ascii_hexdigit() => {}
                (Some(p), Some(c)) if p != Self::WILDCARD && p == c => {}
                _ => return false,
            }
        }
    }

    /// Number of wildcard characters in a pattern
    pub fn wildcard_count(pattern: &str) -> usize {
        pattern.chars().filter(|&c| c == Self::WILDCARD).count()
    }

    pub fn is_exact(pattern: &str) -> bool {
        !pattern.contains(Self::WILDCARD)
    }
}
