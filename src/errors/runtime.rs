// src/errors/runtime.rs
//! Errors produced by the bytecode loader and the interpreter.

use thiserror::Error;

/// Format a chunk name the way runtime messages reference it.
pub fn chunk_id(chunkname: &str) -> String {
    format!("[string \"{chunkname}\"]")
}

/// A failed `vm::load` call. Fatal to the single load; the heap is left
/// consistent (the GC pause guard restores thresholds on unwind).
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    #[error("{chunk}: bytecode version mismatch")]
    VersionMismatch { chunk: String, found: u8 },

    /// Version byte 0: the payload is an error message from the compiler.
    #[error("{chunk}: {message}")]
    CompilerError { chunk: String, message: String },

    #[error("{chunk}: malformed bytecode ({what} at offset {offset})")]
    Malformed {
        chunk: String,
        what: &'static str,
        offset: usize,
    },
}

/// A runtime error raised by the interpreter or a runtime helper.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
