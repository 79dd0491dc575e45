//! Process-wide logging setup shared by the worker binaries.

pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize JSON logging with `RUST_LOG` filtering (default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Like [`init`], with an explicit output format.
pub fn init_with(format: LogFormat) {
    tracing::init(format);
}
