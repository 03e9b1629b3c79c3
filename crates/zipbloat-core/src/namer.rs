//! Entry name generation.
//!
//! Index 0 names the template entry; indices `1..files_amount` name the
//! synthesized directory records. Some unzip tools drop entries with repeated
//! names, so generators should return a distinct name for every index.

/// Maps an entry index to its name
///
/// Implemented for every `Fn(usize) -> String` closure:
///
/// ```
/// use zipbloat_core::EntryNamer;
///
/// let namer = |index: usize| format!("T-{}.class", index);
/// assert_eq!(namer.name(3), "T-3.class");
/// ```
pub trait EntryNamer: Send + Sync {
    /// Name of the entry at `index`
    fn name(&self, index: usize) -> String;
}

impl<F> EntryNamer for F
where
    F: Fn(usize) -> String + Send + Sync,
{
    fn name(&self, index: usize) -> String {
        self(index)
    }
}

/// Placeholder replaced by the index in a [`PatternNamer`] pattern
pub const INDEX_PLACEHOLDER: &str = "{}";

/// Names entries by substituting the index into a pattern such as `T-{}.class`.
///
/// A pattern without a placeholder gets the index appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternNamer {
    prefix: String,
    suffix: String,
}

impl PatternNamer {
    /// Creates a namer from a pattern; the first `{}` marks the index
    pub fn new(pattern: &str) -> Self {
        match pattern.split_once(INDEX_PLACEHOLDER) {
            Some((prefix, suffix)) => Self {
                prefix: prefix.to_owned(),
                suffix: suffix.to_owned(),
            },
            None => Self {
                prefix: pattern.to_owned(),
                suffix: String::new(),
            },
        }
    }
}

impl Default for PatternNamer {
    fn default() -> Self {
        Self::new(INDEX_PLACEHOLDER)
    }
}

impl EntryNamer for PatternNamer {
    fn name(&self, index: usize) -> String {
        format!("{}{}{}", self.prefix, index, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_namer() {
        let namer = |i: usize| format!("T-{}", i);
        assert_eq!(namer.name(0), "T-0");
        assert_eq!(namer.name(41), "T-41");
    }

    #[test]
    fn test_pattern_namer() {
        let namer = PatternNamer::new("T-{}.class");
        assert_eq!(namer.name(0), "T-0.class");
        assert_eq!(namer.name(65533), "T-65533.class");
    }

    #[test]
    fn test_pattern_without_placeholder() {
        assert_eq!(PatternNamer::new("entry-").name(7), "entry-7");
        assert_eq!(PatternNamer::default().name(12), "12");
    }

    #[test]
    fn test_only_first_placeholder_is_replaced() {
        assert_eq!(PatternNamer::new("{}/{}").name(5), "5/{}");
    }

    #[test]
    fn test_namer_as_trait_object() {
        let namers: Vec<Box<dyn EntryNamer>> = vec![
            Box::new(PatternNamer::new("a{}")),
            Box::new(|i: usize| format!("b{}", i)),
        ];
        let names: Vec<String> = namers.iter().map(|n| n.name(1)).collect();
        assert_eq!(names, vec!["a1", "b1"]);
    }
}
