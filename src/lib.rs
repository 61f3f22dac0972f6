//! V8 interface for Vim.
//!
//! The editor loads this library with `libcall()` and calls two entry points,
//! both taking and returning C strings:
//!
//! - `init(args)` boots the runtime; `args` is `library[,flags]` or a JSON
//!   configuration object;
//! - `execute(expr)` runs a script.
//!
//! Both return NULL on success and an error message otherwise. Script
//! failures are not errors at this boundary: they are rendered into
//! `v:['%v8_errmsg%']`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

pub mod runtime;

use runtime::{BridgeResult, PluginHandle};

thread_local! {
    static PLUGIN: RefCell<PluginHandle> = RefCell::new(PluginHandle::new());
    // Keeps the last message alive until the next call.
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

fn report(message: String) -> *const c_char {
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|last| {
        let mut last = last.borrow_mut();
        *last = message;
        last.as_ptr()
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `f` against the plugin state with the argument decoded, turning
/// errors and panics into a message for the editor.
unsafe fn boundary(
    arg: *const c_char,
    f: impl FnOnce(&mut PluginHandle, &str) -> BridgeResult<()>,
) -> *const c_char {
    let arg = if arg.is_null() {
        String::new()
    } else {
        CStr::from_ptr(arg).to_string_lossy().into_owned()
    };

    let outcome = PLUGIN.with(|plugin| {
        let Ok(mut plugin) = plugin.try_borrow_mut() else {
            return Err("execute is not re-entrant".to_string());
        };
        panic::catch_unwind(AssertUnwindSafe(|| f(&mut plugin, &arg)))
            .map_err(|payload| format!("panic: {}", panic_message(payload.as_ref())))?
            .map_err(|err| err.to_string())
    });

    match outcome {
        Ok(()) => ptr::null(),
        Err(message) => report(message),
    }
}

/// Initialize the plugin. Returns NULL on success.
///
/// # Safety
/// `args` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn init(args: *const c_char) -> *const c_char {
    boundary(args, |plugin, args| plugin.init(args))
}

/// Run a script. Returns NULL unless the plugin is not initialized.
///
/// # Safety
/// `expr` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn execute(expr: *const c_char) -> *const c_char {
    boundary(expr, |plugin, expr| plugin.execute(expr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(ptr: *const c_char) -> Option<String> {
        (!ptr.is_null()).then(|| unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    #[test]
    fn test_execute_before_init() {
        let result = unsafe { execute(c"vim.g.x = 1".as_ptr()) };
        assert_eq!(message(result).as_deref(), Some("not initialized"));
    }

    #[test]
    fn test_failed_init_reports_message() {
        let result = unsafe { init(c"/nonexistent/vim-v8/if_v8.so".as_ptr()) };
        assert!(message(result).unwrap().starts_with("library error:"));
        let result = unsafe { execute(ptr::null()) };
        assert_eq!(message(result).as_deref(), Some("not initialized"));
    }

    #[test]
    fn test_panics_become_messages() {
        let result = unsafe { boundary(c"".as_ptr(), |_, _| panic!("kaboom")) };
        assert_eq!(message(result).as_deref(), Some("panic: kaboom"));

        // The handle is usable again afterwards.
        let result = unsafe { execute(c"1".as_ptr()) };
        assert_eq!(message(result).as_deref(), Some("not initialized"));
    }

    #[test]
    fn test_reentrant_call_is_rejected() {
        let result = unsafe {
            boundary(c"".as_ptr(), |_, _| {
                let inner = execute(c"1".as_ptr());
                assert_eq!(message(inner).as_deref(), Some("execute is not re-entrant"));
                Ok(())
            })
        };
        assert!(result.is_null());
    }
}
