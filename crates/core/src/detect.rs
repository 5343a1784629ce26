//! Language detection for requests that do not name one.

use std::collections::HashMap;
use std::path::Path;

use glob::Pattern;

/// Infers a language from a filename and the file's content.
pub trait LanguageDetector: Send + Sync {
	fn detect(&self, filename: &str, content: &[u8]) -> Option<String>;
}

const FILENAMES: &[(&str, &str)] = &[
	("Makefile", "makefile"),
	("GNUmakefile", "makefile"),
	("*.mk", "makefile"),
	("Dockerfile", "dockerfile"),
	("Dockerfile.*", "dockerfile"),
	("*.dockerfile", "dockerfile"),
	("*.d.ts", "typescript"),
	("Rakefile", "ruby"),
	("Gemfile", "ruby"),
	("CMakeLists.txt", "cmake"),
	("BUILD", "starlark"),
	("BUILD.bazel", "starlark"),
];

const EXTENSIONS: &[(&str, &str)] = &[
	("go", "go"),
	("py", "python"),
	("pyw", "python"),
	("pyi", "python"),
	("js", "javascript"),
	("mjs", "javascript"),
	("cjs", "javascript"),
	("jsx", "javascript"),
	("ts", "typescript"),
	("tsx", "typescript"),
	("rb", "ruby"),
	("java", "java"),
	("rs", "rust"),
	("c", "c"),
	("h", "c"),
	("cc", "cpp"),
	("cpp", "cpp"),
	("cxx", "cpp"),
	("hpp", "cpp"),
	("cs", "csharp"),
	("php", "php"),
	("sh", "bash"),
	("bash", "bash"),
	("pl", "perl"),
	("pm", "perl"),
	("kt", "kotlin"),
	("scala", "scala"),
	("swift", "swift"),
	("hs", "haskell"),
	("lua", "lua"),
	("cmake", "cmake"),
	("bzl", "starlark"),
];

const INTERPRETERS: &[(&str, &str)] = &[
	("python", "python"),
	("node", "javascript"),
	("nodejs", "javascript"),
	("deno", "typescript"),
	("ruby", "ruby"),
	("sh", "bash"),
	("bash", "bash"),
	("zsh", "bash"),
	("perl", "perl"),
	("php", "php"),
	("lua", "lua"),
];

/// Detects by exact filename, then extension, then `#!` line.
pub struct DefaultDetector {
	filenames: Vec<(Pattern, String)>,
	extensions: HashMap<String, String>,
	interpreters: HashMap<String, String>,
}

impl Default for DefaultDetector {
	fn default() -> Self {
		let filenames = FILENAMES
			.iter()
			.filter_map(|(pattern, language)| {
				Pattern::new(pattern)
					.ok()
					.map(|p| (p, (*language).to_string()))
			})
			.collect();
		Self {
			filenames,
			extensions: table(EXTENSIONS),
			interpreters: table(INTERPRETERS),
		}
	}
}

fn table(entries: &[(&str, &str)]) -> HashMap<String, String> {
	entries
		.iter()
		.map(|(k, v)| ((*k).to_string(), (*v).to_string()))
		.collect()
}

impl DefaultDetector {
	/// Maps `extension` (without the dot) to `language`, replacing any
	/// existing mapping.
	pub fn with_extension(mut self, extension: &str, language: &str) -> Self {
		self.extensions
			.insert(extension.trim_start_matches('.').to_ascii_lowercase(), language.to_string());
		self
	}

	/// Adds a filename glob checked before the built-in ones.
	pub fn with_filename(mut self, pattern: &str, language: &str) -> Result<Self, glob::PatternError> {
		self.filenames
			.insert(0, (Pattern::new(pattern)?, language.to_string()));
		Ok(self)
	}

	fn by_filename(&self, name: &str) -> Option<&str> {
		self.filenames
			.iter()
			.find(|(pattern, _)| pattern.matches(name))
			.map(|(_, language)| language.as_str())
	}

	fn by_extension(&self, name: &str) -> Option<&str> {
		let extension = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
		self.extensions.get(&extension).map(String::as_str)
	}

	fn by_shebang(&self, content: &[u8]) -> Option<&str> {
		let line = content.split(|&b| b == b'\n').next()?;
		let line = std::str::from_utf8(line).ok()?.strip_prefix("#!")?;

		let mut words = line.split_whitespace();
		let mut program = Path::new(words.next()?).file_name()?.to_str()?;
		if program == "env" {
			program = words.find(|w| !w.starts_with('-') && !w.contains('='))?;
		}

		let name = program.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
		self.interpreters.get(name).map(String::as_str)
	}
}

impl LanguageDetector for DefaultDetector {
	fn detect(&self, filename: &str, content: &[u8]) -> Option<String> {
		let name = Path::new(filename)
			.file_name()
			.and_then(|n| n.to_str())
			.unwrap_or(filename);

		self.by_filename(name)
			.or_else(|| self.by_extension(name))
			.or_else(|| self.by_shebang(content))
			.map(str::to_string)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn detect(filename: &str, content: &str) -> Option<String> {
		DefaultDetector::default().detect(filename, content.as_bytes())
	}

	#[test]
	fn detects_by_extension() {
		assert_eq!(detect("a.go", "").as_deref(), Some("go"));
		assert_eq!(detect("src/lib/app.PY", "").as_deref(), Some("python"));
		assert_eq!(detect("index.tsx", "").as_deref(), Some("typescript"));
	}

	#[test]
	fn filename_patterns_win_over_extension() {
		assert_eq!(detect("types/index.d.ts", "").as_deref(), Some("typescript"));
		assert_eq!(detect("Dockerfile.dev", "").as_deref(), Some("dockerfile"));
		assert_eq!(detect("build/Makefile", "").as_deref(), Some("makefile"));
		assert_eq!(detect("CMakeLists.txt", "").as_deref(), Some("cmake"));
	}

	#[test]
	fn falls_back_to_shebang() {
		assert_eq!(detect("run", "#!/usr/bin/env python3\nprint(1)\n").as_deref(), Some("python"));
		assert_eq!(detect("tool", "#!/bin/bash -e\necho hi\n").as_deref(), Some("bash"));
		assert_eq!(detect("serve", "#!/usr/bin/env -S node --harmony\n").as_deref(), Some("javascript"));
		assert_eq!(detect("script", "#!/usr/local/bin/ruby2.7\n").as_deref(), Some("ruby"));
	}

	#[test]
	fn unknown_input_is_none() {
		assert_eq!(detect("notes", "hello"), None);
		assert_eq!(detect("data.xyz", ""), None);
		assert_eq!(detect("", ""), None);
		assert_eq!(detect("run", "#!/opt/custom-interpreter\n"), None);
	}

	#[test]
	fn custom_mappings_take_effect() {
		let detector = DefaultDetector::default()
			.with_extension(".star", "starlark")
			.with_filename("Jenkinsfile", "groovy")
			.unwrap();
		assert_eq!(detector.detect("x.star", b"").as_deref(), Some("starlark"));
		assert_eq!(detector.detect("ci/Jenkinsfile", b"").as_deref(), Some("groovy"));
	}
}
