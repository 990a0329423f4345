//! Console logging.
//!
//! Forwards to `esp_println` when the `esp32-log` feature is enabled and
//! compiles to nothing otherwise.

#[cfg(feature = "esp32-log")]
macro_rules! output_log {
    ($($arg:tt)*) => {
        esp_println::println!($($arg)*)
    };
}

#[cfg(not(feature = "esp32-log"))]
macro_rules! output_log {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}
