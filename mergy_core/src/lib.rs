pub mod hasher;
pub mod matcher;
pub mod merge_engine;
pub mod scanner;

pub use hasher::{CacheStats, ContentHasher};
pub use matcher::FolderMatcher;
pub use merge_engine::MergeEngine;
pub use scanner::FolderScanner;
