//! Core types for the `Echolog` coordination library.
//!
//! All types use smart constructors to ensure validity at construction time,
//! following the "parse, don't validate" principle.

use nutype::nutype;

/// An identity addressing one append-only log within an event source.
///
/// A log identity is an opaque, comparable token (a topic-partition pair
/// rendered as a string, an aggregate identifier, and so on). The core never
/// inspects its structure; it only uses it to address a source.
///
/// `LogId` values are guaranteed to be non-empty and at most 255 characters.
/// Once constructed, a `LogId` is always valid - no further validation needed.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct LogId(String);
