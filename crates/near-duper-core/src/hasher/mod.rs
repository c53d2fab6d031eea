mod content;
mod exact;

pub use content::{content_id, hash_range, partial_len, RangeHasher};
pub use exact::{ExactMatcher, ExactOutcome, PartialKey};
