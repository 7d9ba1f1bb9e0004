//! Runtime languages and their container conventions
//!
//! The mapping from language to image, entry file and command is fixed and
//! deterministic. Picking the language is the caller's job; when the caller
//! does not say, [`Language::detect`] counts file extensions.

use serde::{Deserialize, Serialize};

use super::bundle::ToolBundle;

/// Supported runtime languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// JavaScript (Node.js)
    JavaScript,
    /// TypeScript (Deno)
    TypeScript,
    /// Python 3
    Python,
    /// POSIX shell
    Shell,
    /// Ruby
    Ruby,
}

impl std::str::FromStr for Language {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "javascript" | "js" | "node" | "nodejs" => Ok(Language::JavaScript),
            "typescript" | "ts" | "deno" => Ok(Language::TypeScript),
            "python" | "py" | "python3" => Ok(Language::Python),
            "shell" | "bash" | "sh" => Ok(Language::Shell),
            "ruby" | "rb" => Ok(Language::Ruby),
            _ => Err(crate::error::Error::InvalidInput(format!(
                "Unknown language: {}. Supported: javascript, typescript, python, shell, ruby",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::JavaScript => write!(f, "javascript"),
            Language::TypeScript => write!(f, "typescript"),
            Language::Python => write!(f, "python"),
            Language::Shell => write!(f, "shell"),
            Language::Ruby => write!(f, "ruby"),
        }
    }
}

/// Detection order, also used to break extension-count ties
const ALL: [Language; 5] = [
    Language::JavaScript,
    Language::TypeScript,
    Language::Python,
    Language::Shell,
    Language::Ruby,
];

impl Language {
    /// All supported languages
    pub fn all() -> &'static [Language] {
        &ALL
    }

    /// File extensions owned by this language
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::JavaScript => &["js", "mjs", "cjs"],
            Language::TypeScript => &["ts", "mts"],
            Language::Python => &["py"],
            Language::Shell => &["sh", "bash"],
            Language::Ruby => &["rb"],
        }
    }

    /// Base runtime image
    pub fn default_image(&self) -> &'static str {
        match self {
            Language::JavaScript => "node:20-alpine",
            Language::TypeScript => "denoland/deno:alpine",
            Language::Python => "python:3.12-alpine",
            Language::Shell => "alpine:3.20",
            Language::Ruby => "ruby:3.3-alpine",
        }
    }

    /// Canonical entry filenames, in priority order
    pub fn entry_candidates(&self) -> &'static [&'static str] {
        match self {
            Language::JavaScript => &["index.js", "main.js", "app.js", "server.js"],
            Language::TypeScript => &["index.ts", "main.ts", "mod.ts", "app.ts"],
            Language::Python => &["main.py", "app.py", "__main__.py", "run.py"],
            Language::Shell => &["main.sh", "run.sh", "start.sh", "entrypoint.sh"],
            Language::Ruby => &["main.rb", "app.rb", "run.rb"],
        }
    }

    /// Entry filename used when nothing in the bundle matches
    pub fn default_entry(&self) -> &'static str {
        self.entry_candidates()[0]
    }

    /// Command that runs `entry` inside the container
    pub fn command(&self, entry: &str) -> Vec<String> {
        let parts: Vec<&str> = match self {
            Language::JavaScript => vec!["node", entry],
            Language::TypeScript => vec!["deno", "run", "--no-prompt", entry],
            Language::Python => vec!["python3", "-u", entry],
            Language::Shell => vec!["sh", entry],
            Language::Ruby => vec!["ruby", entry],
        };
        parts.into_iter().map(String::from).collect()
    }

    /// Runtime defaults added to the sandbox environment
    pub fn runtime_env(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Language::JavaScript => &[("NODE_ENV", "production")],
            Language::TypeScript => &[("DENO_DIR", "/tmp/deno"), ("NO_COLOR", "1")],
            Language::Python => &[("PYTHONUNBUFFERED", "1"), ("PYTHONDONTWRITEBYTECODE", "1")],
            Language::Shell => &[],
            Language::Ruby => &[("RUBYOPT", "-W0")],
        }
    }

    /// Language owning a file extension
    pub fn from_extension(ext: &str) -> Option<Language> {
        let ext = ext.to_ascii_lowercase();
        ALL.iter()
            .copied()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }

    /// Pick the language with the most files in the bundle.
    ///
    /// Ties go to the language whose first file appears earliest.
    pub fn detect(bundle: &ToolBundle) -> Option<Language> {
        let mut counts: Vec<(Language, usize, usize)> = Vec::new();
        for (index, file) in bundle.files.iter().enumerate() {
            let Some(lang) = file.extension().and_then(|e| Language::from_extension(&e)) else {
                continue;
            };
            match counts.iter_mut().find(|(l, _, _)| *l == lang) {
                Some(entry) => entry.1 += 1,
                None => counts.push((lang, 1, index)),
            }
        }
        counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
            .map(|(lang, _, _)| lang)
    }

    /// Resolve the entry file for a bundle.
    ///
    /// First canonical candidate present, then the first bundle file with one
    /// of this language's extensions, then the language default.
    pub fn resolve_entry(&self, bundle: &ToolBundle) -> String {
        if let Some(found) = self
            .entry_candidates()
            .iter()
            .find(|candidate| bundle.get(candidate).is_some())
        {
            return found.to_string();
        }
        bundle
            .files
            .iter()
            .find(|f| {
                f.extension()
                    .map(|e| self.extensions().contains(&e.as_str()))
                    .unwrap_or(false)
            })
            .map(|f| f.filename.clone())
            .unwrap_or_else(|| self.default_entry().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::bundle::BundleFile;

    #[test]
    fn test_language_parsing() {
        assert_eq!("js".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("bash".parse::<Language>().unwrap(), Language::Shell);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_detect_by_majority() {
        let bundle = ToolBundle::new(vec![
            BundleFile::new("README.md", ""),
            BundleFile::new("run.sh", ""),
            BundleFile::new("a.py", ""),
            BundleFile::new("b.py", ""),
        ]);
        assert_eq!(Language::detect(&bundle), Some(Language::Python));
    }

    #[test]
    fn test_detect_tie_goes_to_first_seen() {
        let bundle = ToolBundle::new(vec![
            BundleFile::new("tool.rb", ""),
            BundleFile::new("index.js", ""),
        ]);
        assert_eq!(Language::detect(&bundle), Some(Language::Ruby));
        assert_eq!(Language::detect(&ToolBundle::single("notes.txt", "")), None);
    }

    #[test]
    fn test_resolve_entry() {
        let bundle = ToolBundle::new(vec![
            BundleFile::new("helper.js", ""),
            BundleFile::new("main.js", ""),
            BundleFile::new("index.js", ""),
        ]);
        assert_eq!(Language::JavaScript.resolve_entry(&bundle), "index.js");

        let bundle = ToolBundle::single("hack.sh", "eval x");
        assert_eq!(Language::Shell.resolve_entry(&bundle), "hack.sh");

        let bundle = ToolBundle::single("data.txt", "");
        assert_eq!(Language::Python.resolve_entry(&bundle), "main.py");
    }

    #[test]
    fn test_command() {
        assert_eq!(
            Language::Python.command("main.py"),
            vec!["python3", "-u", "main.py"]
        );
        assert_eq!(Language::JavaScript.command("index.js"), vec!["node", "index.js"]);
    }
}
