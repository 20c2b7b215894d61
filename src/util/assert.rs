/// Panics with an internal assertion message when the condition is false.
pub fn assert(condition: bool, message: impl AsRef<str>) {
    if !condition {
        panic!("{}", assertion_error(message));
    }
}

pub fn assertion_error(message: impl AsRef<str>) -> String {
    format!(
        "firestore-watch ({}) INTERNAL ASSERT FAILED: {}",
        env!("CARGO_PKG_VERSION"),
        message.as_ref()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "INTERNAL ASSERT FAILED")]
    fn assert_panics_on_false() {
        assert(false, "should panic");
    }

    #[test]
    fn assertion_error_formats_message() {
        let err = assertion_error("boom");
        assert!(err.contains("firestore-watch"));
        assert!(err.contains("boom"));
    }
}
