//! Debug formatting helpers for [`custom_debug_derive`].

use std::fmt;

/// Prints the inner value of an `Option<T>` without the `Some(...)` wrapper.
///
/// Pair with `#[debug(skip_if = Option::is_none, with = crate::fmt::opt)]`,
/// as on [`PartitionStatus::error`](crate::fetch::PartitionStatus::error).
pub fn opt<T: fmt::Debug>(value: &Option<T>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Some(inner) => fmt::Debug::fmt(inner, f),
        None => f.write_str("None"),
    }
}
