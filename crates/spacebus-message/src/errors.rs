//! Standard error numbers carried in error bodies.

pub const DELIVERY_FAILED: u32 = 65536;
pub const DELIVERY_TIMEDOUT: u32 = 65537;
pub const DELIVERY_DELAYED: u32 = 65538;
pub const DESTINATION_UNKNOWN: u32 = 65539;
pub const DESTINATION_TRANSIENT: u32 = 65540;
pub const DESTINATION_LOST: u32 = 65541;
pub const AUTHENTICATION_FAIL: u32 = 65542;
pub const AUTHORISATION_FAIL: u32 = 65543;
pub const ENCRYPTION_FAIL: u32 = 65544;
pub const UNSUPPORTED_AREA: u32 = 65545;
pub const UNSUPPORTED_AREA_VERSION: u32 = 65546;
pub const UNSUPPORTED_SERVICE: u32 = 65547;
pub const UNSUPPORTED_OPERATION: u32 = 65548;
pub const BAD_ENCODING: u32 = 65549;
pub const INTERNAL: u32 = 65550;
pub const UNKNOWN: u32 = 65551;
pub const INCORRECT_STATE: u32 = 65552;
pub const TOO_MANY: u32 = 65553;
pub const SHUTDOWN: u32 = 65554;

const NAMES: [&str; 19] = [
    "DELIVERY_FAILED",
    "DELIVERY_TIMEDOUT",
    "DELIVERY_DELAYED",
    "DESTINATION_UNKNOWN",
    "DESTINATION_TRANSIENT",
    "DESTINATION_LOST",
    "AUTHENTICATION_FAIL",
    "AUTHORISATION_FAIL",
    "ENCRYPTION_FAIL",
    "UNSUPPORTED_AREA",
    "UNSUPPORTED_AREA_VERSION",
    "UNSUPPORTED_SERVICE",
    "UNSUPPORTED_OPERATION",
    "BAD_ENCODING",
    "INTERNAL",
    "UNKNOWN",
    "INCORRECT_STATE",
    "TOO_MANY",
    "SHUTDOWN",
];

/// Symbolic name of a standard error number, if it is one.
pub fn error_name(number: u32) -> Option<&'static str> {
    let index = number.checked_sub(DELIVERY_FAILED)? as usize;
    NAMES.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cover_the_standard_range() {
        assert_eq!(error_name(DELIVERY_FAILED), Some("DELIVERY_FAILED"));
        assert_eq!(error_name(UNSUPPORTED_OPERATION), Some("UNSUPPORTED_OPERATION"));
        assert_eq!(error_name(SHUTDOWN), Some("SHUTDOWN"));
        assert_eq!(error_name(SHUTDOWN + 1), None);
        assert_eq!(error_name(7), None);
    }
}
