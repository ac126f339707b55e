//! Logging macros.
//!
//! With the `esp32-log` feature they print through `esp-println`; otherwise
//! they compile to nothing, but the arguments are still type checked.

macro_rules! log_event {
    ($level:literal, $($arg:tt)+) => {{
        #[cfg(feature = "esp32-log")]
        esp_println::println!("[{}] {}", $level, format_args!($($arg)+));
        #[cfg(not(feature = "esp32-log"))]
        {
            let _ = format_args!($($arg)+);
        }
    }};
}

macro_rules! debug {
    ($($arg:tt)+) => ($crate::log::log_event!("DEBUG", $($arg)+));
}

macro_rules! info {
    ($($arg:tt)+) => ($crate::log::log_event!("INFO", $($arg)+));
}

macro_rules! warning {
    ($($arg:tt)+) => ($crate::log::log_event!("WARN", $($arg)+));
}

pub(crate) use {debug, info, log_event, warning};
