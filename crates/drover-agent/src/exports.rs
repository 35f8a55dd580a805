//! Duplicate top-level export detection
//!
//! A line-anchored heuristic: it only looks at declarations starting in
//! column zero, so nested items and re-exports are ignored.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

const SCRIPT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

fn script_export_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^export\s+(?:default\s+)?(?:declare\s+)?(?:async\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
        )
        .expect("export regex is valid")
    })
}

fn rust_export_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^pub(?:\([^)]*\))?\s+(?:async\s+)?(?:const\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|type|const|static|mod|union)\s+([A-Za-z_]\w*)",
        )
        .expect("export regex is valid")
    })
}

/// Whether edits to this file get the duplicate-export check
pub fn is_checked_source(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => true,
        Some(ext) => SCRIPT_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Exported names declared more than once, with their count
pub fn duplicate_exports(path: &Path, content: &str) -> BTreeMap<String, usize> {
    let re = match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => rust_export_re(),
        Some(ext) if SCRIPT_EXTENSIONS.contains(&ext) => script_export_re(),
        _ => return BTreeMap::new(),
    };

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for line in content.lines() {
        if let Some(name) = re.captures(line).and_then(|c| c.get(1)) {
            *counts.entry(name.as_str().to_string()).or_default() += 1;
        }
    }
    counts.retain(|_, n| *n > 1);
    counts
}

/// Names duplicated in `after` that were not already duplicated (as often) in `before`
pub fn introduced_duplicates(path: &Path, before: &str, after: &str) -> Vec<String> {
    let before = duplicate_exports(path, before);
    duplicate_exports(path, after)
        .into_iter()
        .filter(|(name, count)| before.get(name).map_or(true, |prev| count > prev))
        .map(|(name, _)| name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_extensions() {
        assert!(is_checked_source(Path::new("src/lib.rs")));
        assert!(is_checked_source(Path::new("web/app.tsx")));
        assert!(is_checked_source(Path::new("index.mjs")));
        assert!(!is_checked_source(Path::new("README.md")));
        assert!(!is_checked_source(Path::new("Makefile")));
    }

    #[test]
    fn test_typescript_duplicates() {
        let content = "export function load() {}\nexport const load = 1;\nexport class Other {}\n";
        let dups = duplicate_exports(Path::new("a.ts"), content);
        assert_eq!(dups.get("load"), Some(&2));
        assert!(!dups.contains_key("Other"));
    }

    #[test]
    fn test_rust_duplicates_ignore_nested() {
        let content = "pub fn run() {}\nimpl X {\n    pub fn run(&self) {}\n}\npub(crate) struct Run;\n";
        assert!(duplicate_exports(Path::new("lib.rs"), content).is_empty());

        let content = "pub fn run() {}\npub async fn run() {}\n";
        assert_eq!(duplicate_exports(Path::new("lib.rs"), content).len(), 1);
    }

    #[test]
    fn test_only_new_duplicates_reported() {
        let path = Path::new("mod.js");
        let before = "export const a = 1;\nexport const a = 2;\n";
        let after = "export const a = 1;\nexport const a = 2;\nexport const b = 3;\n";
        assert!(introduced_duplicates(path, before, after).is_empty());

        let after = format!("{}export function b() {{}}\nexport const b = 3;\n", before);
        assert_eq!(introduced_duplicates(path, before, &after), vec!["b".to_string()]);
    }
}
