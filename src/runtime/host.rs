//! The host services port.
//!
//! The bridge never touches the editor's memory directly; everything it needs
//! from the host goes through [`HostServices`]. [`VimHost`](super::vim_host::VimHost)
//! implements it over symbols resolved from the running editor, and
//! [`MemoryHost`](super::memory_host::MemoryHost) implements it in-process.
//!
//! # Ownership
//!
//! A `HostValue` that refers to a container either *owns* one reference on it
//! or merely *borrows* it:
//!
//! - values returned by [`eval`](HostServices::eval),
//!   [`call_function`](HostServices::call_function) and the `*_alloc` methods
//!   are owned and must eventually be passed to [`release`](HostServices::release)
//!   or moved into a container;
//! - values returned by [`list_get`](HostServices::list_get) and
//!   [`dict_get`](HostServices::dict_get) are borrowed; call
//!   [`retain`](HostServices::retain) before keeping them;
//! - values passed to `list_set`, `list_append`, `dict_set` and `let_var` are
//!   moved into the host, on success and on failure alike.

use super::error::BridgeResult;
use super::host_value::{DictId, HostValue, ListId};

/// Reserved keys in the special-variable dictionary (`v:`).
pub mod reserved {
    /// Anchor dictionary holding one strong reference per live wrapper.
    pub const WEAK_ANCHOR: &str = "%v8_weak%";
    /// Payload of the last `print()` / `echo()` call.
    pub const PRINT: &str = "%v8_print%";
    /// Rendered diagnostic of the last uncaught script error.
    pub const ERRMSG: &str = "%v8_errmsg%";
    /// Argument relay for host commands and calls.
    pub const ARGS: &str = "%v8_args%";
    /// Result relay for host calls.
    pub const RESULT: &str = "%v8_result%";
    /// Exception relay for host commands and calls.
    pub const EXCEPTION: &str = "%v8_exception%";
}

/// Capabilities the bridge consumes from its host.
///
/// All methods are called from the single thread that owns the engine.
pub trait HostServices {
    /// Evaluate a host expression. The result is owned.
    fn eval(&self, expr: &str) -> BridgeResult<HostValue>;

    /// Execute a host command line. Host exceptions become errors.
    fn exec(&self, command: &str) -> BridgeResult<()>;

    /// Call the host function `name` with the items of `args` as arguments and
    /// `selfdict` as its dictionary receiver. The result is owned; `args` and
    /// `selfdict` are borrowed.
    fn call_function(
        &self,
        name: &str,
        args: ListId,
        selfdict: Option<DictId>,
    ) -> BridgeResult<HostValue>;

    /// Assign `value` to the host variable `name` (`g:foo`, `&tw`, `b:x`, ...).
    fn let_var(&self, name: &str, value: HostValue) -> BridgeResult<()>;

    /// Report an error through the host's error-message channel.
    fn report_error(&self, message: &str);

    /// The global variable dictionary (`g:`), borrowed.
    fn global_vars(&self) -> DictId;

    /// The special variable dictionary (`v:`), borrowed.
    fn special_vars(&self) -> DictId;

    /// Take one additional reference on the container or function in `value`.
    fn retain(&self, value: &HostValue);

    /// Drop one owned reference; frees containers whose count reaches zero.
    fn release(&self, value: HostValue);

    /// Current reference count of a container, `None` for non-containers and
    /// freed containers.
    fn refcount(&self, value: &HostValue) -> Option<usize>;

    /// Allocate an empty list, owned by the caller.
    fn list_alloc(&self) -> BridgeResult<ListId>;

    /// Number of items in `list`.
    fn list_len(&self, list: ListId) -> usize;

    /// Borrow the item at `index`.
    fn list_get(&self, list: ListId, index: usize) -> Option<HostValue>;

    /// Replace the item at `index`, releasing the previous one. `index` equal
    /// to the length appends.
    fn list_set(&self, list: ListId, index: usize, value: HostValue) -> BridgeResult<()>;

    /// Append `value` to `list`.
    fn list_append(&self, list: ListId, value: HostValue) -> BridgeResult<()>;

    /// Remove and release the item at `index`. Returns whether it existed.
    fn list_remove(&self, list: ListId, index: usize) -> bool;

    /// Allocate an empty dictionary, owned by the caller.
    fn dict_alloc(&self) -> BridgeResult<DictId>;

    /// Number of entries in `dict`.
    fn dict_len(&self, dict: DictId) -> usize;

    /// Borrow the value stored under `key`.
    fn dict_get(&self, dict: DictId, key: &str) -> Option<HostValue>;

    /// Insert or replace the value under `key`, releasing any previous one.
    fn dict_set(&self, dict: DictId, key: &str, value: HostValue) -> BridgeResult<()>;

    /// Remove and release the entry under `key`. Returns whether it existed.
    fn dict_remove(&self, dict: DictId, key: &str) -> bool;

    /// Keys of `dict` in the host's iteration order.
    fn dict_keys(&self, dict: DictId) -> Vec<String>;

    /// Remove and return the value under `key` without releasing it.
    fn dict_take(&self, dict: DictId, key: &str) -> Option<HostValue> {
        let value = self.dict_get(dict, key)?;
        self.retain(&value);
        self.dict_remove(dict, key);
        Some(value)
    }

    /// Remove every item of `list`.
    fn list_clear(&self, list: ListId) {
        while let Some(last) = self.list_len(list).checked_sub(1) {
            if !self.list_remove(list, last) {
                break;
            }
        }
    }

    /// Remove every entry of `dict`.
    fn dict_clear(&self, dict: DictId) {
        for key in self.dict_keys(dict) {
            self.dict_remove(dict, &key);
        }
    }

    /// Store `value` in the special-variable dictionary under `key`.
    fn set_special(&self, key: &str, value: HostValue) -> BridgeResult<()> {
        self.dict_set(self.special_vars(), key, value)
    }

    /// Read a string stored in the special-variable dictionary.
    fn special_string(&self, key: &str) -> Option<String> {
        match self.dict_get(self.special_vars(), key)? {
            HostValue::String(s) => Some(s.unwrap_or_default()),
            other => other.display_scalar(),
        }
    }
}
