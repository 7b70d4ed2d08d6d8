//! Script text handling: lexing and the spliceable line buffer.

pub mod buffer;
pub mod lexer;

pub use buffer::{LineNumber, ScriptBuffer, ScriptLine};
pub use lexer::{tokenize, Directive, SNIPPET_MARKER};
