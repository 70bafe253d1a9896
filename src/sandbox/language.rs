use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Languages the sandbox can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    #[value(name = "javascript")]
    JavaScript,
    Ruby,
    Shell,
    Perl,
}

/// How to invoke one language: interpreter, fixed arguments, source extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageSpec {
    pub interpreter: &'static str,
    pub args: &'static [&'static str],
    pub extension: &'static str,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::JavaScript,
        Language::Ruby,
        Language::Shell,
        Language::Perl,
    ];

    /// Descriptor table. Adding a language only touches this match.
    pub fn spec(&self) -> LanguageSpec {
        match self {
            Self::Python => LanguageSpec {
                interpreter: "python3",
                args: &["-u"],
                extension: "py",
            },
            Self::JavaScript => LanguageSpec {
                interpreter: "node",
                args: &[],
                extension: "js",
            },
            Self::Ruby => LanguageSpec {
                interpreter: "ruby",
                args: &[],
                extension: "rb",
            },
            Self::Shell => LanguageSpec {
                interpreter: "bash",
                args: &[],
                extension: "sh",
            },
            Self::Perl => LanguageSpec {
                interpreter: "perl",
                args: &[],
                extension: "pl",
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Ruby => "ruby",
            Self::Shell => "shell",
            Self::Perl => "perl",
        }
    }

    /// Look a language up by its config name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "python" | "py" => Some(Self::Python),
            "javascript" | "js" | "node" => Some(Self::JavaScript),
            "ruby" | "rb" => Some(Self::Ruby),
            "shell" | "sh" | "bash" => Some(Self::Shell),
            "perl" | "pl" => Some(Self::Perl),
            _ => None,
        }
    }

    /// Source file name used inside the working directory
    pub fn source_file_name(&self) -> String {
        format!("main.{}", self.spec().extension)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve an interpreter to an executable file.
///
/// Paths with more than one component must exist as given; bare names are
/// searched on `PATH`.
pub fn resolve_interpreter(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
