mod loader;

pub use loader::{write_wav, DecodeError, MediaDecoder, SourceDecoder};
