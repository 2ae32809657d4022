use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::ResourceLimits;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Default PATH for sandboxed children
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Fallback class name when a source with `derive_class_name` has no
/// detectable public class
pub const FALLBACK_CLASS_NAME: &str = "Main";

/// Toolchain descriptor for a programming language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name (e.g. "C++ 17 (GCC)")
    pub name: String,

    /// File extension
    pub extension: FileExtension,

    /// Compilation step (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileStep>,

    /// Execution step
    pub run: RunStep,

    /// Derive the source file name from a `public class X` declaration
    /// (JVM-style languages)
    #[serde(default)]
    pub derive_class_name: bool,

    /// Whether the compile step needs network access (e.g. dependency fetch)
    #[serde(default)]
    pub requires_network_for_build: bool,
}

impl Language {
    /// Check if the language is compiled
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Compute the run target class name for this source, if the language
    /// derives it from the source text
    pub fn class_name(&self, source: &[u8]) -> Option<String> {
        if !self.derive_class_name {
            return None;
        }
        let text = String::from_utf8_lossy(source);
        Some(detect_public_class(&text).unwrap_or_else(|| FALLBACK_CLASS_NAME.to_owned()))
    }

    /// The file name the source is staged under for this submission
    pub fn source_name(&self, source: &[u8]) -> String {
        if let Some(class) = self.class_name(source) {
            return format!("{}.{}", class, self.extension);
        }
        if let Some(ref compile) = self.compile {
            compile.source_name.clone()
        } else {
            format!("main.{}", self.extension)
        }
    }

    /// Expand placeholders in the given command template.
    ///
    /// `{source}`, `{output}`/`{binary}` and `{classname}` replace in place;
    /// an element that is exactly `{args}` or `{compiler_options}` splices
    /// the corresponding word list into the argv (possibly zero words).
    /// No shell is involved at any point.
    pub fn expand_command(command: &[String], ctx: &CommandContext<'_>) -> Vec<String> {
        let mut argv = Vec::with_capacity(command.len());
        for arg in command {
            match arg.as_str() {
                "{args}" => argv.extend(ctx.args.iter().map(|s| s.to_string())),
                "{compiler_options}" => {
                    argv.extend(ctx.compiler_options.iter().map(|s| s.to_string()))
                }
                _ => argv.push(
                    arg.replace("{source}", ctx.source)
                        .replace("{output}", ctx.binary)
                        .replace("{binary}", ctx.binary)
                        .replace("{classname}", ctx.classname),
                ),
            }
        }
        argv
    }
}

/// Values substituted into command templates right before invocation
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandContext<'a> {
    pub source: &'a str,
    pub binary: &'a str,
    pub classname: &'a str,
    pub args: &'a [&'a str],
    pub compiler_options: &'a [&'a str],
}

/// Scan source text for `public class <Identifier>`.
///
/// Token-based, so `public final class X` also matches. Returns None when
/// no declaration is found; callers fall back to [`FALLBACK_CLASS_NAME`].
pub fn detect_public_class(source: &str) -> Option<String> {
    let mut tokens = source.split_whitespace();
    let mut saw_public = false;
    while let Some(token) = tokens.next() {
        match token {
            "public" => saw_public = true,
            "class" if saw_public => {
                let candidate = tokens.next()?;
                let ident: String = candidate
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
                    .collect();
                let mut chars = ident.chars();
                match chars.next() {
                    Some(c) if c.is_alphabetic() || c == '_' || c == '$' => return Some(ident),
                    _ => return None,
                }
            }
            "final" | "abstract" | "sealed" | "strictfp" => {}
            _ => saw_public = false,
        }
    }
    None
}

/// File extension without dot (e.g. "cpp")
#[derive(Debug, Clone, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The compilation step of a toolchain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileStep {
    /// Command template; see [`Language::expand_command`] for placeholders
    pub command: Vec<String>,

    /// Source file name in the workspace (e.g. "main.cpp"); overridden by
    /// the class-name rule when `derive_class_name` is set
    pub source_name: String,

    /// Output binary name (e.g. "main")
    pub output_name: String,

    /// Artifacts the compile step must leave behind for the run step.
    /// Templates are expanded; defaults to the output name when empty.
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Environment variables set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Resource limits for compilation (overrides the compile profile)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

impl CompileStep {
    /// Artifact names after template expansion, falling back to the output name
    pub fn artifact_names(&self, ctx: &CommandContext<'_>) -> Vec<String> {
        if self.artifacts.is_empty() {
            vec![self.output_name.replace("{classname}", ctx.classname)]
        } else {
            Language::expand_command(&self.artifacts, ctx)
        }
    }
}

/// The execution step of a toolchain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    /// Command template; see [`Language::expand_command`] for placeholders
    pub command: Vec<String>,

    /// Environment variables set for the program
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// PATH environment variable inside the sandbox
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Per-language default resource limits (overrides the global defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

fn default_sandbox_path() -> String {
    DEFAULT_SANDBOX_PATH.to_owned()
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn file_extension_rejects_all_strings_with_slash(s in ".*/.*.") {
            prop_assert!(FileExtension::new(&s).is_err());
        }

        #[test]
        fn file_extension_rejects_all_strings_with_dot(s in ".*\\..*.") {
            prop_assert!(FileExtension::new(&s).is_err());
        }

        #[test]
        fn file_extension_accepts_alphanumeric(s in "[a-zA-Z0-9_-]+") {
            prop_assert!(FileExtension::new(&s).is_ok());
        }

        #[test]
        fn detect_public_class_never_panics(s in ".*") {
            let _ = detect_public_class(&s);
        }

        #[test]
        fn detect_public_class_finds_valid_idents(name in "[A-Za-z][A-Za-z0-9_]{0,20}") {
            let src = format!("public class {name} {{}}");
            prop_assert_eq!(detect_public_class(&src), Some(name));
        }

        #[test]
        fn expand_command_preserves_plain_args(
            arg1 in "[a-z]+",
            arg2 in "[a-z]+",
        ) {
            let cmd = vec![arg1.clone(), arg2.clone()];
            let ctx = CommandContext::default();
            let result = Language::expand_command(&cmd, &ctx);
            prop_assert_eq!(&result[0], &arg1);
            prop_assert_eq!(&result[1], &arg2);
        }
    }
}
