//! Build-system introspection
//!
//! Turns project descriptions into normalized compiler invocations: entries of
//! a `compile_commands.json`, or bare source files given on the command line.
//! Also enumerates the files of a configured source root.

pub mod compilation_database;
pub mod error;
pub mod invocation;
pub mod source_tree;

pub use compilation_database::{CompilationDatabase, CompilationDatabaseError};
pub use error::ProjectError;
pub use invocation::{CompileInvocation, InvocationSignature, Language};
pub use source_tree::list_source_tree;
