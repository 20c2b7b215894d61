pub const DEFAULT_DATABASE_ID: &str = "(default)";

/// The single target id used by every watch subscription.
pub const WATCH_TARGET_ID: i32 = 0x1;
