mod language;
mod runner;
mod workdir;

pub use language::{resolve_interpreter, Language, LanguageSpec};
pub use runner::{ExecutionResult, ProcessRunner};
pub use workdir::WorkDir;
