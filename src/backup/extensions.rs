use std::collections::BTreeSet;
use std::path::Path;

/// Normalized set of file extensions in `.ext` form, matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    extensions: BTreeSet<String>,
}

impl ExtensionSet {
    /// Parses a comma or semicolon separated list. `txt`, `.TXT` and ` .txt `
    /// all normalize to `.txt`.
    pub fn parse(list: &str) -> Self {
        Self::from_iter(list.split([',', ';']))
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return false;
        }
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_lowercase(),
            None => return false,
        };
        self.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    fn normalize(raw: &str) -> Option<String> {
        let trimmed = raw.trim().trim_start_matches('*').trim();
        if trimmed.is_empty() || trimmed == "." {
            return None;
        }
        let lower = trimmed.to_lowercase();
        Some(if lower.starts_with('.') { lower } else { format!(".{}", lower) })
    }
}

impl<S: AsRef<str>> FromIterator<S> for ExtensionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            extensions: iter
                .into_iter()
                .filter_map(|raw| Self::normalize(raw.as_ref()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let set = ExtensionSet::parse(" txt; .PDF,*.Docx ,, ");
        let normalized: Vec<&str> = set.iter().collect();
        assert_eq!(normalized, vec![".docx", ".pdf", ".txt"]);
    }

    #[test]
    fn test_case_insensitive_suffix_match() {
        let set = ExtensionSet::parse(".txt");
        assert!(set.matches(Path::new("/a/B/report.TXT")));
        assert!(!set.matches(Path::new("/a/b/report.bin")));
        assert!(!set.matches(Path::new("/a/b/txt")));
    }

    #[test]
    fn test_empty_set_never_matches() {
        let set = ExtensionSet::parse("");
        assert!(set.is_empty());
        assert!(!set.matches(Path::new("file.txt")));
    }
}
