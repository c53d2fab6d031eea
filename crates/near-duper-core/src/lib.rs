pub mod cancel;
pub mod classify;
pub mod codecs;
pub mod config;
pub mod consolidate;
pub mod decode;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod index;
pub mod linker;
pub mod model;
pub mod progress;
pub mod scanner;
pub mod signature;
pub mod storage;
pub mod store;

pub use cancel::CancelToken;
pub use config::{AppConfig, EngineConfig, ScanFilters};
pub use engine::{DuplicateEngine, SearchReport};
pub use error::{Error, FileError};
pub use index::{IndexProvider, MemoryIndex, SqliteIndex};
pub use model::{ContentId, DuplicateCluster, ImageAlgorithm, SearchType};
pub use progress::{ProgressReporter, SilentReporter};
