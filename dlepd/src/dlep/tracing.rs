/// DLEP-specific tracing macros that automatically include the proto="dlep"
/// field for log categorization and filtering.

/// Log an info-level message with proto="dlep" field
#[macro_export]
macro_rules! dlep_info {
    ($($arg:tt)*) => {
        tracing::info!(proto = "dlep", $($arg)*)
    };
}

/// Log a warning-level message with proto="dlep" field
#[macro_export]
macro_rules! dlep_warn {
    ($($arg:tt)*) => {
        tracing::warn!(proto = "dlep", $($arg)*)
    };
}

/// Log an error-level message with proto="dlep" field
#[macro_export]
macro_rules! dlep_error {
    ($($arg:tt)*) => {
        tracing::error!(proto = "dlep", $($arg)*)
    };
}

/// Log a debug-level message with proto="dlep" field
#[macro_export]
macro_rules! dlep_debug {
    ($($arg:tt)*) => {
        tracing::debug!(proto = "dlep", $($arg)*)
    };
}
