/// Trigger expression rewriting
///
/// Phoscon schedule times look like `W127/T15:30:00`: an opaque prefix
/// (weekday bitmask, interval code, ...) followed by `/T` and the time of day.
use crate::errors::{SyncError, SyncResult};
use chrono::{NaiveTime, Timelike};

const TIME_SEPARATOR: &str = "/T";

/// Result of rewriting a trigger expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedExpr {
    pub expr: String,
    pub changed: bool,
}

/// Replace the time-of-day component of `expr`, keeping its prefix verbatim
pub fn patch_time(expr: &str, new_time: NaiveTime) -> SyncResult<PatchedExpr> {
    let idx = expr
        .find(TIME_SEPARATOR)
        .ok_or_else(|| SyncError::MalformedExpression(expr.to_string()))?;

    let patched = format!(
        "{}{}{:02}:{:02}:{:02}",
        &expr[..idx],
        TIME_SEPARATOR,
        new_time.hour(),
        new_time.minute(),
        new_time.second()
    );

    let changed = patched != expr;
    Ok(PatchedExpr {
        expr: patched,
        changed,
    })
}
