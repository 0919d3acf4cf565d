//! Error reporter installed on every interpreter
//!
//! The runtime hands over a printf-style format and its argument list;
//! the message is formatted with the C library's `vsnprintf` and written to
//! stderr and the `log` facade.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};

/// Longest message kept; the rest is truncated
const MESSAGE_CAPACITY: usize = 1024;

extern "C" {
    fn vsnprintf(buf: *mut c_char, size: usize, format: *const c_char, args: *mut c_void) -> c_int;
}

/// # Safety
/// Called by the runtime with a valid format string and matching arguments.
pub(crate) unsafe extern "C" fn report(
    _user_data: *mut c_void,
    format: *const c_char,
    args: *mut c_void,
) {
    if format.is_null() {
        return;
    }
    let mut buf = [0 as c_char; MESSAGE_CAPACITY];
    let written = vsnprintf(buf.as_mut_ptr(), buf.len(), format, args);
    if written < 0 {
        emit(&CStr::from_ptr(format).to_string_lossy());
        return;
    }
    emit(&CStr::from_ptr(buf.as_ptr()).to_string_lossy());
}

fn emit(message: &str) {
    let line = format_line(message);
    eprintln!("{}", line);
    log::error!("{}", line);
}

/// Runtime messages usually end in a newline; drop it and tag the source
fn format_line(message: &str) -> String {
    format!("TFLite: {}", message.trim_end())
}
