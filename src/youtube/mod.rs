//! YouTube resource resolution: watch page, adaptive format selection, and
//! the signature cipher.

pub mod cipher;
pub mod format;
pub mod source;
pub mod track;

pub use cipher::CipherResolver;
pub use format::Format;
pub use source::Source;
pub use track::Track;
