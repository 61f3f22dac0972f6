//! The host port over the running editor.
//!
//! The plugin is loaded into the editor's own process, so every service is a
//! symbol of the process image. Lists and dictionaries are manipulated in
//! place through the layouts in [`vim_sys`](super::vim_sys); commands, calls
//! and assignments are relayed through reserved `v:` keys so the editor's
//! exceptions can be caught and reported back to scripts.

use super::error::{BridgeError, BridgeResult};
use super::host::{reserved, HostServices};
use super::host_value::{DictId, HostValue, ListId};
use super::vim_sys::*;
use libloading::Library;
use std::ffi::CStr;
use std::mem::size_of;
use std::os::raw::{c_int, c_uint};
use std::ptr::{self, addr_of_mut};
use tracing::{debug, trace, warn};

/// Entry points resolved from the editor.
#[derive(Clone, Copy)]
pub struct VimSymbols {
    pub eval_expr: eval_expr_fn,
    pub do_cmdline_cmd: do_cmdline_cmd_fn,
    pub free_tv: free_tv_fn,
    pub clear_tv: clear_tv_fn,
    pub emsg: emsg_fn,
    pub alloc: alloc_fn,
    pub vim_free: vim_free_fn,
    pub vim_strsave: vim_strsave_fn,
    pub list_alloc: list_alloc_fn,
    pub dict_alloc: dict_alloc_fn,
    pub hash_add: hash_add_fn,
    pub hash_find: hash_find_fn,
    pub hash_remove: hash_remove_fn,
    /// Address of the editor's `hash_removed` marker.
    pub hash_removed: *mut char_u,
}

macro_rules! resolve {
    ($lib:expr, $name:ident : $ty:ty) => {
        *$lib
            .get::<$ty>(concat!(stringify!($name), "\0").as_bytes())
            .map_err(|_| BridgeError::MissingSymbol {
                name: stringify!($name),
            })?
    };
}

impl VimSymbols {
    /// Resolve every entry point from `lib`.
    ///
    /// # Safety
    /// `lib` must be the editor's process image; the symbols are trusted to
    /// have the declared signatures.
    pub unsafe fn resolve(lib: &Library) -> BridgeResult<Self> {
        Ok(Self {
            eval_expr: resolve!(lib, eval_expr: eval_expr_fn),
            do_cmdline_cmd: resolve!(lib, do_cmdline_cmd: do_cmdline_cmd_fn),
            free_tv: resolve!(lib, free_tv: free_tv_fn),
            clear_tv: resolve!(lib, clear_tv: clear_tv_fn),
            emsg: resolve!(lib, emsg: emsg_fn),
            alloc: resolve!(lib, alloc: alloc_fn),
            vim_free: resolve!(lib, vim_free: vim_free_fn),
            vim_strsave: resolve!(lib, vim_strsave: vim_strsave_fn),
            list_alloc: resolve!(lib, list_alloc: list_alloc_fn),
            dict_alloc: resolve!(lib, dict_alloc: dict_alloc_fn),
            hash_add: resolve!(lib, hash_add: hash_add_fn),
            hash_find: resolve!(lib, hash_find: hash_find_fn),
            hash_remove: resolve!(lib, hash_remove: hash_remove_fn),
            hash_removed: resolve!(lib, hash_removed: *mut char_u),
        })
    }
}

/// Open the image of the current process.
fn this_process() -> BridgeResult<Library> {
    #[cfg(unix)]
    let lib = libloading::os::unix::Library::this();
    #[cfg(windows)]
    let lib = libloading::os::windows::Library::this()
        .map_err(|err| BridgeError::Library(err.to_string()))?;
    Ok(lib.into())
}

/// A NUL-terminated, mutable copy of `s`. The editor's strings cannot hold
/// NUL, so anything past the first one is dropped.
fn c_buffer(s: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = s.bytes().take_while(|b| *b != 0).collect();
    buffer.push(0);
    buffer
}

unsafe fn c_string_lossy(s: *const char_u) -> String {
    if s.is_null() {
        return String::new();
    }
    CStr::from_ptr(s.cast()).to_string_lossy().into_owned()
}

fn list_ptr(list: ListId) -> *mut list_T {
    list.as_raw() as *mut list_T
}

fn dict_ptr(dict: DictId) -> *mut dict_T {
    dict.as_raw() as *mut dict_T
}

fn clamp_number(n: i64) -> varnumber_T {
    n.clamp(varnumber_T::MIN as i64, varnumber_T::MAX as i64) as varnumber_T
}

/// Host services backed by the editor process.
pub struct VimHost {
    sym: VimSymbols,
    globals: DictId,
    specials: DictId,
    _process: Option<Library>,
}

impl VimHost {
    /// Resolve the editor's symbols from the current process.
    pub fn load() -> BridgeResult<Self> {
        let process = this_process()?;
        let sym = unsafe { VimSymbols::resolve(&process)? };
        debug!("resolved editor symbols");
        Self::with_symbols(sym, Some(process))
    }

    /// Build a host over already resolved symbols.
    pub fn with_symbols(sym: VimSymbols, process: Option<Library>) -> BridgeResult<Self> {
        let globals = unsafe { scope_dict(&sym, "g:")? };
        let specials = unsafe { scope_dict(&sym, "v:")? };
        Ok(Self {
            sym,
            globals,
            specials,
            _process: process,
        })
    }

    fn command(&self, command: &str) {
        trace!(target: "vim_v8::host", command, "do_cmdline_cmd");
        let mut buffer = c_buffer(command);
        unsafe {
            (self.sym.do_cmdline_cmd)(buffer.as_mut_ptr());
        }
    }

    fn strsave(&self, s: &str) -> *mut char_u {
        let mut buffer = c_buffer(s);
        unsafe { (self.sym.vim_strsave)(buffer.as_mut_ptr()) }
    }

    fn clear(&self, mut tv: typval_T) {
        unsafe { (self.sym.clear_tv)(&mut tv) }
    }

    /// Free the string buffer of `tv` without touching function references.
    fn forget(&self, tv: typval_T) {
        if matches!(tv.v_type, VAR_STRING | VAR_FUNC) {
            unsafe { (self.sym.vim_free)(tv.vval.v_string.cast()) }
        }
    }

    /// Read `tv` without taking references.
    unsafe fn read(&self, tv: &typval_T) -> HostValue {
        match tv.v_type {
            VAR_NUMBER => HostValue::Number(tv.vval.v_number as i64),
            VAR_FLOAT => HostValue::Float(tv.vval.v_float),
            VAR_STRING => {
                let s = tv.vval.v_string;
                HostValue::String((!s.is_null()).then(|| c_string_lossy(s)))
            }
            VAR_FUNC => HostValue::FuncRef(c_string_lossy(tv.vval.v_string)),
            VAR_LIST if !tv.vval.v_list.is_null() => {
                HostValue::List(ListId::from_raw(tv.vval.v_list as usize))
            }
            VAR_DICT if !tv.vval.v_dict.is_null() => {
                HostValue::Dict(DictId::from_raw(tv.vval.v_dict as usize))
            }
            _ => HostValue::Unknown,
        }
    }

    /// Read `tv` and keep the reference it holds.
    unsafe fn take(&self, tv: typval_T) -> HostValue {
        let value = self.read(&tv);
        self.forget(tv);
        value
    }

    /// Build a typval that carries the reference owned by `value`.
    fn typval(&self, value: HostValue) -> typval_T {
        let mut tv = typval_T::number(0);
        match value {
            HostValue::Unknown => {}
            HostValue::Number(n) => tv.vval.v_number = clamp_number(n),
            HostValue::Float(f) => {
                tv.v_type = VAR_FLOAT;
                tv.vval.v_float = f;
            }
            HostValue::String(s) => {
                tv.v_type = VAR_STRING;
                tv.vval.v_string = s.map_or(ptr::null_mut(), |s| self.strsave(&s));
            }
            HostValue::FuncRef(name) => {
                tv.v_type = VAR_FUNC;
                tv.vval.v_string = self.strsave(&name);
            }
            HostValue::List(list) => {
                tv.v_type = VAR_LIST;
                tv.vval.v_list = list_ptr(list);
            }
            HostValue::Dict(dict) => {
                tv.v_type = VAR_DICT;
                tv.vval.v_dict = dict_ptr(dict);
            }
        }
        tv
    }

    unsafe fn find_item(&self, dict: DictId, key: &str) -> Option<*mut dictitem_T> {
        let mut key = c_buffer(key);
        let hi = (self.sym.hash_find)(addr_of_mut!((*dict_ptr(dict)).dv_hashtab), key.as_mut_ptr());
        if hashitem_empty(hi, self.sym.hash_removed) {
            None
        } else {
            Some(hi2di(hi))
        }
    }

    /// Store `tv` under `key`; the typval is handed back when it could not be
    /// stored.
    fn store(&self, dict: DictId, key: &str, tv: typval_T) -> Result<(), typval_T> {
        unsafe {
            if let Some(di) = self.find_item(dict, key) {
                let previous = std::mem::replace(&mut (*di).di_tv, tv);
                self.clear(previous);
                return Ok(());
            }

            let key = c_buffer(key);
            let size = size_of::<dictitem_T>() + key.len() - 1;
            let di = (self.sym.alloc)(size as c_uint) as *mut dictitem_T;
            if di.is_null() {
                return Err(tv);
            }
            let key_ptr = addr_of_mut!((*di).di_key) as *mut char_u;
            ptr::copy_nonoverlapping(key.as_ptr(), key_ptr, key.len());
            addr_of_mut!((*di).di_flags).write(0);
            if (self.sym.hash_add)(addr_of_mut!((*dict_ptr(dict)).dv_hashtab), key_ptr) == FAIL {
                (self.sym.vim_free)(di.cast());
                return Err(tv);
            }
            addr_of_mut!((*di).di_tv).write(tv);
        }
        Ok(())
    }

    /// Unlink the entry under `key` and return its value unreleased.
    fn detach(&self, dict: DictId, key: &str) -> Option<typval_T> {
        unsafe {
            let mut key = c_buffer(key);
            let ht = addr_of_mut!((*dict_ptr(dict)).dv_hashtab);
            let hi = (self.sym.hash_find)(ht, key.as_mut_ptr());
            if hashitem_empty(hi, self.sym.hash_removed) {
                return None;
            }
            let di = hi2di(hi);
            (self.sym.hash_remove)(ht, hi);
            let tv = (*di).di_tv;
            (self.sym.vim_free)(di.cast());
            Some(tv)
        }
    }

    /// Locate item `n`, starting from whichever of the ends or the cached
    /// index is closest.
    unsafe fn list_find(&self, l: *mut list_T, n: usize) -> Option<*mut listitem_T> {
        let len = (*l).lv_len;
        let n = c_int::try_from(n).ok().filter(|n| *n < len)?;

        let (mut item, mut idx) = if !(*l).lv_idx_item.is_null() {
            if n < (*l).lv_idx / 2 {
                ((*l).lv_first, 0)
            } else if n > ((*l).lv_idx + len) / 2 {
                ((*l).lv_last, len - 1)
            } else {
                ((*l).lv_idx_item, (*l).lv_idx)
            }
        } else if n < len / 2 {
            ((*l).lv_first, 0)
        } else {
            ((*l).lv_last, len - 1)
        };

        while n > idx {
            item = (*item).li_next;
            idx += 1;
        }
        while n < idx {
            item = (*item).li_prev;
            idx -= 1;
        }

        (*l).lv_idx = idx;
        (*l).lv_idx_item = item;
        Some(item)
    }

    /// Unlink `item`, moving any watcher on it to the next item.
    unsafe fn list_unlink(&self, l: *mut list_T, item: *mut listitem_T) {
        let mut watch = (*l).lv_watch;
        while !watch.is_null() {
            if (*watch).lw_item == item {
                (*watch).lw_item = (*item).li_next;
            }
            watch = (*watch).lw_next;
        }

        let next = (*item).li_next;
        let prev = (*item).li_prev;
        if next.is_null() {
            (*l).lv_last = prev;
        } else {
            (*next).li_prev = prev;
        }
        if prev.is_null() {
            (*l).lv_first = next;
        } else {
            (*prev).li_next = next;
        }
        (*l).lv_len -= 1;
        (*l).lv_idx_item = ptr::null_mut();
    }

    /// Count one reference to the function `name`.
    ///
    /// The editor does not export its function refcounting, so the name is
    /// copied between two reserved variables with `:let`, which counts a
    /// reference, and both variables are then unlinked without releasing.
    fn func_ref(&self, name: &str) {
        const FROM: &str = "%v8_func1%";
        const TO: &str = "%v8_func2%";
        let mut tv = typval_T::number(0);
        tv.v_type = VAR_FUNC;
        tv.vval.v_string = self.strsave(name);
        if let Err(tv) = self.store(self.specials, FROM, tv) {
            warn!(target: "vim_v8::host", name, "cannot reference function");
            self.forget(tv);
            return;
        }
        self.command(&format!("let v:['{}'] = v:['{}']", TO, FROM));
        for key in [FROM, TO] {
            if let Some(tv) = self.detach(self.specials, key) {
                self.forget(tv);
            }
        }
    }

    /// Run `body` inside `try`, with `args` available as `v:['%v8_args%']`.
    /// A caught exception becomes an error carrying `v:exception`.
    fn relay(&self, body: &str, args: Vec<HostValue>) -> BridgeResult<()> {
        let list = match self.list_alloc() {
            Ok(list) => list,
            Err(err) => {
                args.into_iter().for_each(|arg| self.release(arg));
                return Err(err);
            }
        };
        let mut pending = args.into_iter();
        while let Some(arg) = pending.next() {
            if let Err(err) = self.list_append(list, arg) {
                pending.for_each(|rest| self.release(rest));
                self.release(HostValue::List(list));
                return Err(err);
            }
        }
        self.set_special(reserved::ARGS, HostValue::List(list))?;

        self.command(&format!(
            "try | {body} | let v:['{exc}'] = '' | catch | let v:['{exc}'] = v:exception | endtry",
            body = body,
            exc = reserved::EXCEPTION,
        ));

        self.dict_remove(self.specials, reserved::ARGS);
        match self.dict_take(self.specials, reserved::EXCEPTION) {
            Some(HostValue::String(Some(message))) if !message.is_empty() => {
                debug!(target: "vim_v8::host", %message, "host exception");
                Err(BridgeError::Host(message))
            }
            Some(other) => {
                self.release(other);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Borrow the scope dictionary `name` (`g:` or `v:`); it lives as long as the
/// editor does.
unsafe fn scope_dict(sym: &VimSymbols, name: &str) -> BridgeResult<DictId> {
    let mut expr = c_buffer(name);
    let tv = (sym.eval_expr)(expr.as_mut_ptr(), ptr::null_mut());
    if tv.is_null() {
        return Err(BridgeError::host(format!("cannot get {}", name)));
    }
    let dict = if (*tv).v_type == VAR_DICT {
        (*tv).vval.v_dict
    } else {
        ptr::null_mut()
    };
    (sym.free_tv)(tv);
    if dict.is_null() {
        return Err(BridgeError::host(format!("{} is not a dictionary", name)));
    }
    Ok(DictId::from_raw(dict as usize))
}

impl HostServices for VimHost {
    fn eval(&self, expr: &str) -> BridgeResult<HostValue> {
        let mut buffer = c_buffer(expr);
        unsafe {
            let tv = (self.sym.eval_expr)(buffer.as_mut_ptr(), ptr::null_mut());
            if tv.is_null() {
                return Err(BridgeError::host(format!("E15: Invalid expression: {}", expr)));
            }
            let value = self.take(*tv);
            (self.sym.vim_free)(tv.cast());
            Ok(value)
        }
    }

    fn exec(&self, command: &str) -> BridgeResult<()> {
        self.relay(
            &format!("execute v:['{}'][0]", reserved::ARGS),
            vec![HostValue::string(command)],
        )
    }

    fn call_function(
        &self,
        name: &str,
        args: ListId,
        selfdict: Option<DictId>,
    ) -> BridgeResult<HostValue> {
        let args = HostValue::List(args);
        self.retain(&args);
        let mut relayed = vec![HostValue::string(name), args];
        let call = match selfdict {
            Some(dict) => {
                let dict = HostValue::Dict(dict);
                self.retain(&dict);
                relayed.push(dict);
                format!("call(v:['{a}'][0], v:['{a}'][1], v:['{a}'][2])", a = reserved::ARGS)
            }
            None => format!("call(v:['{a}'][0], v:['{a}'][1])", a = reserved::ARGS),
        };

        self.dict_remove(self.specials, reserved::RESULT);
        self.relay(&format!("let v:['{}'] = {}", reserved::RESULT, call), relayed)?;
        Ok(self
            .dict_take(self.specials, reserved::RESULT)
            .unwrap_or(HostValue::Number(0)))
    }

    fn let_var(&self, name: &str, value: HostValue) -> BridgeResult<()> {
        self.relay(
            &format!(
                "execute 'let ' . v:['{a}'][0] . ' = v:[''{a}''][1]'",
                a = reserved::ARGS
            ),
            vec![HostValue::string(name), value],
        )
    }

    fn report_error(&self, message: &str) {
        let mut buffer = c_buffer(message);
        unsafe {
            (self.sym.emsg)(buffer.as_mut_ptr());
        }
    }

    fn global_vars(&self) -> DictId {
        self.globals
    }

    fn special_vars(&self) -> DictId {
        self.specials
    }

    fn retain(&self, value: &HostValue) {
        unsafe {
            match value {
                HostValue::List(list) => (*list_ptr(*list)).lv_refcount += 1,
                HostValue::Dict(dict) => (*dict_ptr(*dict)).dv_refcount += 1,
                HostValue::FuncRef(name) => self.func_ref(name),
                _ => {}
            }
        }
    }

    fn release(&self, value: HostValue) {
        if matches!(
            value,
            HostValue::List(_) | HostValue::Dict(_) | HostValue::FuncRef(_)
        ) {
            self.clear(self.typval(value));
        }
    }

    fn refcount(&self, value: &HostValue) -> Option<usize> {
        unsafe {
            match value {
                HostValue::List(list) => Some((*list_ptr(*list)).lv_refcount.max(0) as usize),
                HostValue::Dict(dict) => Some((*dict_ptr(*dict)).dv_refcount.max(0) as usize),
                _ => None,
            }
        }
    }

    fn list_alloc(&self) -> BridgeResult<ListId> {
        unsafe {
            let list = (self.sym.list_alloc)();
            if list.is_null() {
                return Err(BridgeError::Allocation("list"));
            }
            (*list).lv_refcount = 1;
            Ok(ListId::from_raw(list as usize))
        }
    }

    fn list_len(&self, list: ListId) -> usize {
        unsafe { (*list_ptr(list)).lv_len.max(0) as usize }
    }

    fn list_get(&self, list: ListId, index: usize) -> Option<HostValue> {
        unsafe {
            let item = self.list_find(list_ptr(list), index)?;
            Some(self.read(&(*item).li_tv))
        }
    }

    fn list_set(&self, list: ListId, index: usize, value: HostValue) -> BridgeResult<()> {
        let len = self.list_len(list);
        if index == len {
            return self.list_append(list, value);
        }
        unsafe {
            match self.list_find(list_ptr(list), index) {
                Some(item) => {
                    let previous = std::mem::replace(&mut (*item).li_tv, self.typval(value));
                    self.clear(previous);
                    Ok(())
                }
                None => {
                    self.release(value);
                    Err(BridgeError::IndexOutOfRange { index, len })
                }
            }
        }
    }

    fn list_append(&self, list: ListId, value: HostValue) -> BridgeResult<()> {
        unsafe {
            let item = (self.sym.alloc)(size_of::<listitem_T>() as c_uint) as *mut listitem_T;
            if item.is_null() {
                self.release(value);
                return Err(BridgeError::Allocation("list item"));
            }
            let l = list_ptr(list);
            item.write(listitem_T {
                li_next: ptr::null_mut(),
                li_prev: (*l).lv_last,
                li_tv: self.typval(value),
            });
            if (*l).lv_last.is_null() {
                (*l).lv_first = item;
            } else {
                (*(*l).lv_last).li_next = item;
            }
            (*l).lv_last = item;
            (*l).lv_len += 1;
        }
        Ok(())
    }

    fn list_remove(&self, list: ListId, index: usize) -> bool {
        unsafe {
            let l = list_ptr(list);
            let Some(item) = self.list_find(l, index) else {
                return false;
            };
            self.list_unlink(l, item);
            self.clear((*item).li_tv);
            (self.sym.vim_free)(item.cast());
        }
        true
    }

    fn dict_alloc(&self) -> BridgeResult<DictId> {
        unsafe {
            let dict = (self.sym.dict_alloc)();
            if dict.is_null() {
                return Err(BridgeError::Allocation("dictionary"));
            }
            (*dict).dv_refcount = 1;
            Ok(DictId::from_raw(dict as usize))
        }
    }

    fn dict_len(&self, dict: DictId) -> usize {
        unsafe { (*dict_ptr(dict)).dv_hashtab.ht_used }
    }

    fn dict_get(&self, dict: DictId, key: &str) -> Option<HostValue> {
        unsafe {
            let di = self.find_item(dict, key)?;
            Some(self.read(&(*di).di_tv))
        }
    }

    fn dict_set(&self, dict: DictId, key: &str, value: HostValue) -> BridgeResult<()> {
        if key.is_empty() {
            self.release(value);
            return Err(BridgeError::EmptyKey);
        }
        let tv = self.typval(value);
        self.store(dict, key, tv).map_err(|tv| {
            self.clear(tv);
            BridgeError::Allocation("dictionary item")
        })
    }

    fn dict_remove(&self, dict: DictId, key: &str) -> bool {
        match self.detach(dict, key) {
            Some(tv) => {
                self.clear(tv);
                true
            }
            None => false,
        }
    }

    fn dict_keys(&self, dict: DictId) -> Vec<String> {
        let mut keys = Vec::new();
        unsafe {
            let ht = &(*dict_ptr(dict)).dv_hashtab;
            let mut todo = ht.ht_used;
            let mut hi = ht.ht_array;
            while todo > 0 {
                if !hashitem_empty(hi, self.sym.hash_removed) {
                    todo -= 1;
                    keys.push(c_string_lossy((*hi).hi_key));
                }
                hi = hi.add(1);
            }
        }
        keys
    }

    fn dict_take(&self, dict: DictId, key: &str) -> Option<HostValue> {
        let tv = self.detach(dict, key)?;
        Some(unsafe { self.take(tv) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A miniature editor: allocator, refcounted containers, a fixed-size
    /// hashtable and a command recorder.
    mod fake {
        use super::super::*;
        use std::alloc::{self, Layout};
        use std::ffi::c_void;
        use std::cell::{Cell, RefCell};
        use std::os::raw::c_char;

        const HEADER: usize = 16;

        thread_local! {
            pub static COMMANDS: RefCell<Vec<String>> = RefCell::new(Vec::new());
            pub static ERRORS: RefCell<Vec<String>> = RefCell::new(Vec::new());
            pub static LIVE: Cell<isize> = Cell::new(0);
            static SCOPES: RefCell<Option<(*mut dict_T, *mut dict_T)>> = RefCell::new(None);
        }

        pub static HASH_REMOVED: u8 = 0;

        pub fn removed() -> *mut char_u {
            &HASH_REMOVED as *const u8 as *mut u8
        }

        pub unsafe extern "C" fn alloc(size: c_uint) -> *mut char_u {
            let size = size as usize + HEADER;
            let Ok(layout) = Layout::from_size_align(size, HEADER) else {
                return ptr::null_mut();
            };
            let base = alloc::alloc_zeroed(layout);
            if base.is_null() {
                return base;
            }
            (base as *mut usize).write(size);
            LIVE.with(|live| live.set(live.get() + 1));
            base.add(HEADER)
        }

        pub unsafe extern "C" fn vim_free(p: *mut c_void) {
            if p.is_null() {
                return;
            }
            let base = (p as *mut u8).sub(HEADER);
            let size = (base as *mut usize).read();
            LIVE.with(|live| live.set(live.get() - 1));
            alloc::dealloc(base, Layout::from_size_align_unchecked(size, HEADER));
        }

        pub unsafe extern "C" fn vim_strsave(s: *mut char_u) -> *mut char_u {
            let bytes = CStr::from_ptr(s as *const c_char).to_bytes_with_nul();
            let copy = alloc(bytes.len() as c_uint);
            ptr::copy_nonoverlapping(bytes.as_ptr(), copy, bytes.len());
            copy
        }

        pub unsafe extern "C" fn list_alloc() -> *mut list_T {
            alloc(size_of::<list_T>() as c_uint) as *mut list_T
        }

        pub unsafe extern "C" fn dict_alloc() -> *mut dict_T {
            let d = alloc(size_of::<dict_T>() as c_uint) as *mut dict_T;
            (*d).dv_hashtab.ht_mask = (HT_INIT_SIZE - 1) as long_u;
            (*d).dv_hashtab.ht_array = (*d).dv_hashtab.ht_smallarray.as_mut_ptr();
            d
        }

        unsafe fn slots(ht: *mut hashtab_T) -> &'static mut [hashitem_T] {
            std::slice::from_raw_parts_mut((*ht).ht_array, HT_INIT_SIZE)
        }

        unsafe fn key_eq(a: *mut char_u, b: *mut char_u) -> bool {
            CStr::from_ptr(a as *const c_char) == CStr::from_ptr(b as *const c_char)
        }

        pub unsafe extern "C" fn hash_find(ht: *mut hashtab_T, key: *mut char_u) -> *mut hashitem_T {
            let mut free: *mut hashitem_T = ptr::null_mut();
            for hi in slots(ht).iter_mut() {
                if hi.hi_key.is_null() || hi.hi_key == removed() {
                    if free.is_null() {
                        free = hi as *mut hashitem_T;
                    }
                } else if key_eq(hi.hi_key, key) {
                    return hi;
                }
            }
            free
        }

        pub unsafe extern "C" fn hash_add(ht: *mut hashtab_T, key: *mut char_u) -> c_int {
            let hi = hash_find(ht, key);
            if hi.is_null() || !((*hi).hi_key.is_null() || (*hi).hi_key == removed()) {
                return FAIL;
            }
            (*hi).hi_key = key;
            (*ht).ht_used += 1;
            1
        }

        pub unsafe extern "C" fn hash_remove(ht: *mut hashtab_T, hi: *mut hashitem_T) {
            (*hi).hi_key = removed();
            (*ht).ht_used -= 1;
        }

        pub unsafe extern "C" fn clear_tv(tv: *mut typval_T) {
            match (*tv).v_type {
                VAR_STRING | VAR_FUNC => vim_free((*tv).vval.v_string.cast()),
                VAR_LIST => {
                    let l = (*tv).vval.v_list;
                    (*l).lv_refcount -= 1;
                    if (*l).lv_refcount <= 0 {
                        let mut item = (*l).lv_first;
                        while !item.is_null() {
                            let next = (*item).li_next;
                            clear_tv(&mut (*item).li_tv);
                            vim_free(item.cast());
                            item = next;
                        }
                        vim_free(l.cast());
                    }
                }
                VAR_DICT => {
                    let d = (*tv).vval.v_dict;
                    (*d).dv_refcount -= 1;
                    if (*d).dv_refcount <= 0 {
                        for hi in slots(&mut (*d).dv_hashtab).iter_mut() {
                            if !(hi.hi_key.is_null() || hi.hi_key == removed()) {
                                let di = hi2di(hi);
                                clear_tv(&mut (*di).di_tv);
                                vim_free(di.cast());
                            }
                        }
                        vim_free(d.cast());
                    }
                }
                _ => {}
            }
            (*tv).v_type = VAR_UNKNOWN;
        }

        pub unsafe extern "C" fn free_tv(tv: *mut typval_T) {
            clear_tv(tv);
            vim_free(tv.cast());
        }

        pub unsafe extern "C" fn eval_expr(arg: *mut char_u, _next: *mut *mut char_u) -> *mut typval_T {
            let expr = CStr::from_ptr(arg as *const c_char).to_string_lossy().into_owned();
            let (g, v) = SCOPES.with(|scopes| {
                *scopes.borrow_mut().get_or_insert_with(|| {
                    let g = dict_alloc();
                    let v = dict_alloc();
                    (*g).dv_refcount = 1;
                    (*v).dv_refcount = 1;
                    (g, v)
                })
            });
            let dict = match expr.as_str() {
                "g:" => g,
                "v:" => v,
                _ => return ptr::null_mut(),
            };
            (*dict).dv_refcount += 1;
            let tv = alloc(size_of::<typval_T>() as c_uint) as *mut typval_T;
            (*tv).v_type = VAR_DICT;
            (*tv).vval.v_dict = dict;
            tv
        }

        pub unsafe extern "C" fn do_cmdline_cmd(cmd: *mut char_u) -> c_int {
            let cmd = CStr::from_ptr(cmd as *const c_char).to_string_lossy().into_owned();
            COMMANDS.with(|commands| commands.borrow_mut().push(cmd));
            1
        }

        pub unsafe extern "C" fn emsg(s: *mut char_u) -> c_int {
            let s = CStr::from_ptr(s as *const c_char).to_string_lossy().into_owned();
            ERRORS.with(|errors| errors.borrow_mut().push(s));
            1
        }

        pub fn symbols() -> VimSymbols {
            VimSymbols {
                eval_expr,
                do_cmdline_cmd,
                free_tv,
                clear_tv,
                emsg,
                alloc,
                vim_free,
                vim_strsave,
                list_alloc,
                dict_alloc,
                hash_add,
                hash_find,
                hash_remove,
                hash_removed: removed(),
            }
        }

        pub fn live() -> isize {
            LIVE.with(Cell::get)
        }
    }

    fn host() -> VimHost {
        VimHost::with_symbols(fake::symbols(), None).unwrap()
    }

    fn commands() -> Vec<String> {
        fake::COMMANDS.with(|c| c.take())
    }

    #[test]
    fn test_scopes_are_distinct() {
        let host = host();
        assert_ne!(host.global_vars(), host.special_vars());
        assert!(host.eval("1 +").is_err());
    }

    #[test]
    fn test_list_operations() {
        let host = host();
        let baseline = fake::live();
        let list = host.list_alloc().unwrap();
        for n in 1..=3 {
            host.list_append(list, HostValue::Number(n)).unwrap();
        }
        host.list_set(list, 1, HostValue::string("two")).unwrap();
        host.list_set(list, 3, HostValue::Float(4.5)).unwrap();
        assert_eq!(host.list_len(list), 4);
        assert_eq!(host.list_get(list, 1), Some(HostValue::string("two")));
        assert_eq!(host.list_get(list, 3), Some(HostValue::Float(4.5)));
        assert_eq!(host.list_get(list, 4), None);

        let err = host.list_set(list, 9, HostValue::Number(0)).unwrap_err();
        assert!(matches!(err, BridgeError::IndexOutOfRange { index: 9, len: 4 }));

        assert!(host.list_remove(list, 1));
        assert!(!host.list_remove(list, 7));
        assert_eq!(host.list_get(list, 1), Some(HostValue::Number(3)));
        assert_eq!(host.list_get(list, 0), Some(HostValue::Number(1)));

        host.release(HostValue::List(list));
        assert_eq!(fake::live(), baseline);
    }

    #[test]
    fn test_removal_advances_watchers() {
        let host = host();
        let list = host.list_alloc().unwrap();
        for n in 0..3 {
            host.list_append(list, HostValue::Number(n)).unwrap();
        }
        unsafe {
            let l = list_ptr(list);
            let second = (*(*l).lv_first).li_next;
            let mut watch = listwatch_T {
                lw_item: second,
                lw_next: ptr::null_mut(),
            };
            (*l).lv_watch = &mut watch;
            assert!(host.list_remove(list, 1));
            assert_eq!(watch.lw_item, (*(*l).lv_first).li_next);
            assert_eq!(host.read(&(*watch.lw_item).li_tv), HostValue::Number(2));
            (*l).lv_watch = ptr::null_mut();
        }
        host.release(HostValue::List(list));
    }

    #[test]
    fn test_dict_operations() {
        let host = host();
        let baseline = fake::live();
        let dict = host.dict_alloc().unwrap();
        host.dict_set(dict, "name", HostValue::string("vim")).unwrap();
        host.dict_set(dict, "count", HostValue::Number(1)).unwrap();
        host.dict_set(dict, "count", HostValue::Number(2)).unwrap();
        assert_eq!(host.dict_len(dict), 2);
        assert_eq!(host.dict_get(dict, "count"), Some(HostValue::Number(2)));
        assert_eq!(host.dict_get(dict, "missing"), None);

        let mut keys = host.dict_keys(dict);
        keys.sort();
        assert_eq!(keys, vec!["count", "name"]);

        assert!(matches!(
            host.dict_set(dict, "", HostValue::Number(0)),
            Err(BridgeError::EmptyKey)
        ));
        assert_eq!(host.dict_take(dict, "name"), Some(HostValue::string("vim")));
        assert!(host.dict_remove(dict, "count"));
        assert!(!host.dict_remove(dict, "count"));
        assert_eq!(host.dict_len(dict), 0);

        host.release(HostValue::Dict(dict));
        assert_eq!(fake::live(), baseline);
    }

    #[test]
    fn test_nested_containers_share_references() {
        let host = host();
        let baseline = fake::live();
        let outer = host.list_alloc().unwrap();
        let inner = host.dict_alloc().unwrap();
        host.retain(&HostValue::Dict(inner));
        host.list_append(outer, HostValue::Dict(inner)).unwrap();
        assert_eq!(host.refcount(&HostValue::Dict(inner)), Some(2));

        host.release(HostValue::List(outer));
        assert_eq!(host.refcount(&HostValue::Dict(inner)), Some(1));
        host.release(HostValue::Dict(inner));
        assert_eq!(fake::live(), baseline);
    }

    #[test]
    fn test_strings_and_numbers() {
        let host = host();
        let list = host.list_alloc().unwrap();
        host.list_append(list, HostValue::String(None)).unwrap();
        host.list_append(list, HostValue::string("a\0b")).unwrap();
        host.list_append(list, HostValue::Number(1 << 40)).unwrap();
        assert_eq!(host.list_get(list, 0), Some(HostValue::String(None)));
        assert_eq!(host.list_get(list, 1), Some(HostValue::string("a")));
        assert_eq!(
            host.list_get(list, 2),
            Some(HostValue::Number(varnumber_T::MAX as i64))
        );
        host.release(HostValue::List(list));
    }

    #[test]
    fn test_exec_relays_through_reserved_keys() {
        let host = host();
        commands();
        host.exec("echo 'hi'").unwrap();
        let recorded = commands();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].starts_with("try | execute v:['%v8_args%'][0] |"));
        assert!(recorded[0].contains("v:exception"));
        assert_eq!(host.dict_get(host.special_vars(), reserved::ARGS), None);
    }

    #[test]
    fn test_relay_reports_exception() {
        let host = host();
        host.set_special(reserved::EXCEPTION, HostValue::string("E492: Not an editor command"))
            .unwrap();
        // The fake editor runs nothing, so the preset exception is what the
        // relay finds afterwards.
        let err = host.exec("bogus").unwrap_err();
        assert_eq!(err.to_string(), "E492: Not an editor command");
        assert_eq!(host.dict_get(host.special_vars(), reserved::EXCEPTION), None);
    }

    #[test]
    fn test_funcref_retain_leaves_no_keys() {
        let host = host();
        commands();
        host.retain(&HostValue::FuncRef("Greet".to_string()));
        let recorded = commands();
        assert_eq!(recorded, vec!["let v:['%v8_func2%'] = v:['%v8_func1%']"]);
        assert!(host.dict_keys(host.special_vars()).is_empty());
    }

    #[test]
    fn test_report_error() {
        let host = host();
        host.report_error("E117: Unknown function: Nope");
        let errors = fake::ERRORS.with(|e| e.take());
        assert_eq!(errors, vec!["E117: Unknown function: Nope"]);
    }
}
