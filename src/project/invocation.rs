//! Normalized compiler invocations
//!
//! A `CompileInvocation` is the unit of work handed to the indexer: one input
//! file plus the flags it is compiled with. Invocations come either from a
//! compilation database or are synthesized for a bare source file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::project::ProjectError;

/// Flags whose value may be passed as the following argument
const VALUE_FLAGS: &[&str] = &[
    "-D",
    "-U",
    "-I",
    "-include",
    "-imacros",
    "-isystem",
    "-iquote",
    "-idirafter",
    "-isysroot",
    "-target",
    "-arch",
    "-x",
    "-o",
];

/// Dependency-file generation flags dropped from indexing invocations
const DEPFILE_FLAGS_WITH_VALUE: &[&str] = &["-MF", "-MT", "-MQ"];
const DEPFILE_FLAGS: &[&str] = &["-M", "-MM", "-MD", "-MMD", "-MP", "-MG"];

/// Source language of a translation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Language {
    C,
    CPlusPlus,
    CHeader,
    CPlusPlusHeader,
    ObjectiveC,
    ObjectiveCPlusPlus,
    Undefined,
}

impl Language {
    /// Guess the language from a file extension
    pub fn guess(path: &Path) -> Self {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "c" => Language::C,
            "cpp" | "cc" | "cxx" | "c++" | "C" => Language::CPlusPlus,
            "h" => Language::CHeader,
            "hpp" | "hh" | "hxx" | "h++" | "H" | "tcc" => Language::CPlusPlusHeader,
            "m" => Language::ObjectiveC,
            "mm" => Language::ObjectiveCPlusPlus,
            _ => Language::Undefined,
        }
    }

    /// Parse the value of a `-x` flag
    pub fn from_x_flag(value: &str) -> Self {
        match value {
            "c" => Language::C,
            "c++" => Language::CPlusPlus,
            "c-header" => Language::CHeader,
            "c++-header" => Language::CPlusPlusHeader,
            "objective-c" => Language::ObjectiveC,
            "objective-c++" => Language::ObjectiveCPlusPlus,
            _ => Language::Undefined,
        }
    }

    /// The `-x` spelling of this language
    pub fn x_flag(&self) -> Option<&'static str> {
        match self {
            Language::C => Some("c"),
            Language::CPlusPlus => Some("c++"),
            Language::CHeader => Some("c-header"),
            Language::CPlusPlusHeader => Some("c++-header"),
            Language::ObjectiveC => Some("objective-c"),
            Language::ObjectiveCPlusPlus => Some("objective-c++"),
            Language::Undefined => None,
        }
    }

    /// Header languages are compiled into precompiled headers, not indexed as units
    pub fn is_header(&self) -> bool {
        matches!(self, Language::CHeader | Language::CPlusPlusHeader)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.x_flag().unwrap_or("undefined"))
    }
}

/// Identity used to drop duplicate invocations of the same unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationSignature {
    pub input: PathBuf,
    pub language: Language,
    pub defines: BTreeSet<String>,
}

/// A normalized compiler invocation for one translation unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileInvocation {
    /// Working directory the compiler runs in
    pub directory: PathBuf,
    /// Compiler executable as spelled in the build
    pub compiler: String,
    /// Absolute path of the input file
    pub input: PathBuf,
    /// Absolute path of the compiler output, when known
    pub output: Option<PathBuf>,
    pub language: Language,
    /// Remaining flags (input, output and `-c` removed)
    pub arguments: Vec<String>,
}

impl CompileInvocation {
    /// Build an invocation from a full compiler command line
    ///
    /// `file` overrides input detection (compilation databases name the file
    /// explicitly); `output` overrides `-o`.
    pub fn from_arguments(
        directory: &Path,
        command: &[String],
        file: Option<&Path>,
        output: Option<&Path>,
    ) -> Result<Self, ProjectError> {
        let (compiler, rest) = command
            .split_first()
            .ok_or_else(|| ProjectError::invalid_invocation("empty command line"))?;

        let explicit_input = file.map(|f| resolve(directory, f));
        let mut arguments = Vec::with_capacity(rest.len());
        let mut positional: Option<PathBuf> = None;
        let mut parsed_output: Option<PathBuf> = None;
        let mut x_language: Option<Language> = None;

        let mut iter = rest.iter().peekable();
        while let Some(arg) = iter.next() {
            let arg = arg.as_str();
            if arg == "-c" || DEPFILE_FLAGS.contains(&arg) {
                continue;
            }
            if DEPFILE_FLAGS_WITH_VALUE.contains(&arg) {
                iter.next();
                continue;
            }
            if arg == "-o" {
                parsed_output = iter.next().map(|v| resolve(directory, Path::new(v)));
                continue;
            }
            if let Some(value) = arg.strip_prefix("-o")
                && !value.is_empty()
            {
                parsed_output = Some(resolve(directory, Path::new(value)));
                continue;
            }
            if arg == "-x" {
                if let Some(value) = iter.next() {
                    x_language = Some(Language::from_x_flag(value));
                    arguments.push("-x".to_string());
                    arguments.push(value.clone());
                }
                continue;
            }
            if VALUE_FLAGS.contains(&arg) {
                arguments.push(arg.to_string());
                if let Some(value) = iter.next() {
                    arguments.push(value.clone());
                }
                continue;
            }
            if arg.starts_with('-') {
                if let Some(value) = arg.strip_prefix("-x") {
                    x_language = Some(Language::from_x_flag(value));
                }
                arguments.push(arg.to_string());
                continue;
            }

            let candidate = resolve(directory, Path::new(arg));
            if explicit_input.as_ref() == Some(&candidate) {
                continue;
            }
            if explicit_input.is_none() {
                if let Some(previous) = positional.replace(candidate) {
                    // Only the last positional argument is the input
                    arguments.push(previous.to_string_lossy().into_owned());
                }
            } else {
                arguments.push(arg.to_string());
            }
        }

        let input = explicit_input
            .or(positional)
            .ok_or_else(|| ProjectError::invalid_invocation("no input file"))?;
        let language = x_language
            .filter(|l| *l != Language::Undefined)
            .unwrap_or_else(|| Language::guess(&input));

        Ok(Self {
            directory: directory.to_path_buf(),
            compiler: compiler.clone(),
            input,
            output: output.map(|o| resolve(directory, o)).or(parsed_output),
            language,
            arguments,
        })
    }

    /// Synthesize `gcc -x <lang> <source>` for a bare source file
    pub fn for_source(source: &Path) -> Self {
        let language = Language::guess(source);
        let mut arguments = Vec::new();
        if let Some(x) = language.x_flag() {
            arguments.push("-x".to_string());
            arguments.push(x.to_string());
        }
        let directory = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            directory,
            compiler: "gcc".to_string(),
            input: source.to_path_buf(),
            output: None,
            language,
            arguments,
        }
    }

    /// Values of a flag, accepting both `-Dvalue` and `-D value` for short flags
    pub fn flag_values(&self, flag: &str) -> Vec<String> {
        let joinable = flag.len() == 2;
        let mut values = Vec::new();
        let mut iter = self.arguments.iter();
        while let Some(arg) = iter.next() {
            if arg == flag {
                if let Some(value) = iter.next() {
                    values.push(value.clone());
                }
            } else if joinable && let Some(value) = arg.strip_prefix(flag) {
                values.push(value.to_string());
            }
        }
        values
    }

    /// Macro definitions (`-D`) as a set
    pub fn defines(&self) -> BTreeSet<String> {
        self.flag_values("-D").into_iter().collect()
    }

    /// Headers force-included with `-include`
    pub fn includes(&self) -> Vec<String> {
        self.flag_values("-include")
    }

    pub fn signature(&self) -> InvocationSignature {
        InvocationSignature {
            input: self.input.clone(),
            language: self.language,
            defines: self.defines(),
        }
    }

    /// Cache key of a header precompilation: the output path cut at `.gch`
    ///
    /// Returns `None` when the invocation does not produce a `.gch` artifact.
    pub fn pch_output_key(&self) -> Option<String> {
        let output = self.output.as_ref()?.to_string_lossy().into_owned();
        let idx = output.find(".gch")?;
        Some(output[..idx].to_string())
    }
}

impl fmt::Display for CompileInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.compiler)?;
        for arg in &self.arguments {
            write!(f, " {arg}")?;
        }
        write!(f, " {}", self.input.display())
    }
}

fn resolve(directory: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        directory.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_basic_command() {
        let inv = CompileInvocation::from_arguments(
            Path::new("/proj"),
            &args("clang++ -DFOO -D BAR=1 -Iinclude -c src/main.cpp -o build/main.o"),
            None,
            None,
        )
        .unwrap();

        assert_eq!(inv.compiler, "clang++");
        assert_eq!(inv.input, PathBuf::from("/proj/src/main.cpp"));
        assert_eq!(inv.output, Some(PathBuf::from("/proj/build/main.o")));
        assert_eq!(inv.language, Language::CPlusPlus);
        assert_eq!(
            inv.defines(),
            ["BAR=1".to_string(), "FOO".to_string()].into_iter().collect()
        );
        assert_eq!(inv.flag_values("-I"), vec!["include".to_string()]);
        assert!(!inv.arguments.contains(&"-c".to_string()));
    }

    #[test]
    fn test_explicit_file_and_x_flag() {
        let inv = CompileInvocation::from_arguments(
            Path::new("/proj"),
            &args("gcc -x c++-header -include pre.h stdafx.h -o stdafx.h.gch"),
            Some(Path::new("stdafx.h")),
            None,
        )
        .unwrap();

        assert_eq!(inv.language, Language::CPlusPlusHeader);
        assert!(inv.language.is_header());
        assert_eq!(inv.input, PathBuf::from("/proj/stdafx.h"));
        assert_eq!(inv.includes(), vec!["pre.h".to_string()]);
        assert_eq!(inv.pch_output_key().as_deref(), Some("/proj/stdafx.h"));
    }

    #[test]
    fn test_depfile_flags_are_dropped() {
        let inv = CompileInvocation::from_arguments(
            Path::new("/p"),
            &args("cc -MD -MF dep.d -MT x.o -O2 x.c"),
            None,
            None,
        )
        .unwrap();
        assert_eq!(inv.arguments, vec!["-O2".to_string()]);
        assert_eq!(inv.language, Language::C);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let err = CompileInvocation::from_arguments(Path::new("/p"), &args("cc -c"), None, None)
            .unwrap_err();
        assert!(matches!(err, ProjectError::InvalidInvocation { .. }));

        let err = CompileInvocation::from_arguments(Path::new("/p"), &[], None, None).unwrap_err();
        assert!(matches!(err, ProjectError::InvalidInvocation { .. }));
    }

    #[test]
    fn test_for_source_guesses_language() {
        let inv = CompileInvocation::for_source(Path::new("/src/a.cc"));
        assert_eq!(inv.language, Language::CPlusPlus);
        assert_eq!(inv.arguments, args("-x c++"));
        assert_eq!(inv.to_string(), "gcc -x c++ /src/a.cc");

        let unknown = CompileInvocation::for_source(Path::new("/src/README"));
        assert_eq!(unknown.language, Language::Undefined);
        assert!(unknown.arguments.is_empty());
    }

    #[test]
    fn test_signature_ignores_non_define_flags() {
        let a = CompileInvocation::from_arguments(
            Path::new("/p"),
            &args("cc -O2 -DX a.c"),
            None,
            None,
        )
        .unwrap();
        let b = CompileInvocation::from_arguments(
            Path::new("/p"),
            &args("cc -O0 -g -DX a.c"),
            None,
            None,
        )
        .unwrap();
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_no_pch_key_without_gch_output() {
        let inv = CompileInvocation::for_source(Path::new("/src/a.h"));
        assert_eq!(inv.pch_output_key(), None);
    }
}
