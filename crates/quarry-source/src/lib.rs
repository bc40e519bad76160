mod span;

pub use span::{HasSpan, Span, Spanned, SpannedItem};
