//! Raw layouts and entry points of the editor's value system.
//!
//! These mirror the editor's own `typval_T`, `list_T`, `dict_T` and
//! `hashtab_T` definitions and the functions it exports to plugins. Use the
//! safe wrapper in [`vim_host`](super::vim_host) instead of touching them.

#![allow(non_camel_case_types)]

use std::ffi::c_void;
use std::mem::offset_of;
use std::os::raw::{c_char, c_int, c_uint};

pub type char_u = u8;
/// Big enough to hold a pointer on every platform the editor supports.
pub type long_u = usize;
pub type varnumber_T = c_int;
pub type float_T = f64;

// Values for `v_type`.
pub const VAR_UNKNOWN: c_char = 0;
pub const VAR_NUMBER: c_char = 1;
pub const VAR_STRING: c_char = 2;
pub const VAR_FUNC: c_char = 3;
pub const VAR_LIST: c_char = 4;
pub const VAR_DICT: c_char = 5;
pub const VAR_FLOAT: c_char = 6;

pub const FAIL: c_int = 0;

/// Initial size of a hashtable's inline array.
pub const HT_INIT_SIZE: usize = 16;

#[repr(C)]
#[derive(Clone, Copy)]
pub union vval_T {
    pub v_number: varnumber_T,
    pub v_float: float_T,
    pub v_string: *mut char_u,
    pub v_list: *mut list_T,
    pub v_dict: *mut dict_T,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct typval_T {
    pub v_type: c_char,
    pub v_lock: c_char,
    pub vval: vval_T,
}

impl typval_T {
    pub fn number(n: varnumber_T) -> Self {
        Self {
            v_type: VAR_NUMBER,
            v_lock: 0,
            vval: vval_T { v_number: n },
        }
    }
}

#[repr(C)]
pub struct listitem_T {
    pub li_next: *mut listitem_T,
    pub li_prev: *mut listitem_T,
    pub li_tv: typval_T,
}

#[repr(C)]
pub struct listwatch_T {
    pub lw_item: *mut listitem_T,
    pub lw_next: *mut listwatch_T,
}

#[repr(C)]
pub struct list_T {
    pub lv_first: *mut listitem_T,
    pub lv_last: *mut listitem_T,
    pub lv_refcount: c_int,
    pub lv_len: c_int,
    pub lv_watch: *mut listwatch_T,
    pub lv_idx: c_int,
    pub lv_idx_item: *mut listitem_T,
    pub lv_copyID: c_int,
    pub lv_copylist: *mut list_T,
    pub lv_lock: c_char,
    pub lv_used_next: *mut list_T,
    pub lv_used_prev: *mut list_T,
}

/// A dictionary entry. The key is stored inline past the end of the struct.
#[repr(C)]
pub struct dictitem_T {
    pub di_tv: typval_T,
    pub di_flags: char_u,
    pub di_key: [char_u; 1],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct hashitem_T {
    pub hi_hash: long_u,
    pub hi_key: *mut char_u,
}

#[repr(C)]
pub struct hashtab_T {
    pub ht_mask: long_u,
    pub ht_used: long_u,
    pub ht_filled: long_u,
    pub ht_locked: c_int,
    pub ht_error: c_int,
    pub ht_array: *mut hashitem_T,
    pub ht_smallarray: [hashitem_T; HT_INIT_SIZE],
}

#[repr(C)]
pub struct dict_T {
    pub dv_refcount: c_int,
    pub dv_hashtab: hashtab_T,
    pub dv_copyID: c_int,
    pub dv_copydict: *mut dict_T,
    pub dv_lock: c_char,
    pub dv_used_next: *mut dict_T,
    pub dv_used_prev: *mut dict_T,
}

/// Offset of the inline key inside a [`dictitem_T`].
pub const DI_KEY_OFFSET: usize = offset_of!(dictitem_T, di_key);

/// The dictionary item a used hashtable item points into.
///
/// # Safety
/// `hi` must be a used item of a dictionary's hashtable.
pub unsafe fn hi2di(hi: *const hashitem_T) -> *mut dictitem_T {
    (*hi).hi_key.sub(DI_KEY_OFFSET) as *mut dictitem_T
}

/// Whether a hashtable item is unused or removed.
///
/// # Safety
/// `hi` must point into a live hashtable.
pub unsafe fn hashitem_empty(hi: *const hashitem_T, hash_removed: *mut char_u) -> bool {
    hi.is_null() || (*hi).hi_key.is_null() || (*hi).hi_key == hash_removed
}

pub type eval_expr_fn = unsafe extern "C" fn(*mut char_u, *mut *mut char_u) -> *mut typval_T;
pub type do_cmdline_cmd_fn = unsafe extern "C" fn(*mut char_u) -> c_int;
pub type free_tv_fn = unsafe extern "C" fn(*mut typval_T);
pub type clear_tv_fn = unsafe extern "C" fn(*mut typval_T);
pub type emsg_fn = unsafe extern "C" fn(*mut char_u) -> c_int;
pub type alloc_fn = unsafe extern "C" fn(c_uint) -> *mut char_u;
pub type vim_free_fn = unsafe extern "C" fn(*mut c_void);
pub type vim_strsave_fn = unsafe extern "C" fn(*mut char_u) -> *mut char_u;
pub type list_alloc_fn = unsafe extern "C" fn() -> *mut list_T;
pub type dict_alloc_fn = unsafe extern "C" fn() -> *mut dict_T;
pub type hash_add_fn = unsafe extern "C" fn(*mut hashtab_T, *mut char_u) -> c_int;
pub type hash_find_fn = unsafe extern "C" fn(*mut hashtab_T, *mut char_u) -> *mut hashitem_T;
pub type hash_remove_fn = unsafe extern "C" fn(*mut hashtab_T, *mut hashitem_T);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_layouts() {
        assert_eq!(size_of::<vval_T>(), 8);
        assert_eq!(size_of::<typval_T>(), 16);
        assert_eq!(size_of::<hashitem_T>(), 2 * size_of::<usize>());
        assert_eq!(DI_KEY_OFFSET, size_of::<typval_T>() + 1);
        assert_eq!(offset_of!(listitem_T, li_tv), 2 * size_of::<usize>());
    }

    #[test]
    fn test_hi2di_inverts_key_pointer() {
        let mut item = dictitem_T {
            di_tv: typval_T::number(7),
            di_flags: 0,
            di_key: [0],
        };
        let hi = hashitem_T {
            hi_hash: 0,
            hi_key: item.di_key.as_mut_ptr(),
        };
        let di = unsafe { hi2di(&hi) };
        assert_eq!(di, &mut item as *mut dictitem_T);
        assert!(unsafe { !hashitem_empty(&hi, std::ptr::null_mut()) });
    }
}
