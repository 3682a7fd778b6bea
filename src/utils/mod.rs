pub mod path_validator;
pub mod pattern;

/// Environment variable that turns on `[VERBOSE]` diagnostics.
pub const VERBOSE_ENV: &str = "MSIVER_VERBOSE";

/// Whether verbose diagnostics were requested.
pub fn verbose() -> bool {
    std::env::var_os(VERBOSE_ENV).is_some()
}
