pub mod cleanup;
pub mod decompress;
pub mod export;
pub mod snapshot;
