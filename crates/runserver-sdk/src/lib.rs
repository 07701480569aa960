// runserver-sdk: Foundation layer for the runserver harness.
// This crate has ZERO dependencies on other workspace crates and provides
// the trace abstraction plus small file-system, URL and string helpers.

pub mod build_constants;
pub mod io_util;
pub mod string_util;
pub mod trace;
pub mod url_util;

// Re-export commonly used items at crate root
pub use build_constants::HarnessPackage;
pub use io_util::IOUtil;
pub use string_util::StringUtil;
pub use trace::{NullTraceWriter, TraceWriter, TracingTraceWriter};
pub use url_util::UrlUtil;
