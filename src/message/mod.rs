//! Agent output decoding
//!
//! - `scanner` - brace-depth object boundary detection
//! - `parser` - JSON object classification into typed payloads
//! - `extractor` - pure line-oriented decoder over [`ParserState`]
//! - `codec` - byte-level `Decoder` adapter for process pipes
//! - `ansi` - terminal escape stripping for stderr

pub mod ansi;
pub mod codec;
pub mod extractor;
pub mod parser;
pub mod scanner;

pub use ansi::strip_ansi;
pub use codec::StreamEventCodec;
pub use extractor::{DEFAULT_MAX_BUFFER_SIZE, ParserState, StreamEventExtractor, feed, finish};
pub use parser::classify;
