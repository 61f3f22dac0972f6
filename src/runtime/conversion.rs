//! Conversion between host values and script values.
//!
//! host→script maps scalars to primitives and containers to live proxies;
//! the same container always comes back as the same wrapper while that
//! wrapper is alive. script→host copies plain script data into fresh host
//! containers and passes proxies through by reference.
//!
//! One script→host conversion owns a [`ConversionLookup`] that maps every
//! script object converted so far to the container produced for it. It holds
//! one reference on each produced container until the conversion ends, so a
//! failure anywhere can clear and release them all without leaving a partial
//! structure behind, cycles included.

use super::bridge::Bridge;
use super::cache::ConversionLookup;
use super::error::{BridgeError, BridgeResult};
use super::host_value::HostValue;
use super::proxy;
use deno_core::v8;
use std::rc::Rc;
use tracing::trace;

/// Convert a host value to a script value. `value` is borrowed.
///
/// `receiver` is the dictionary wrapper a function reference was read from;
/// it becomes the function's bound dictionary.
pub(crate) fn host_to_script<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Rc<Bridge>,
    value: &HostValue,
    receiver: Option<v8::Local<'s, v8::Object>>,
) -> BridgeResult<v8::Local<'s, v8::Value>> {
    let _depth = bridge.enter_depth()?;
    match value {
        HostValue::Unknown => Ok(v8::undefined(scope).into()),
        HostValue::Number(n) => Ok(number_to_script(scope, *n)),
        HostValue::Float(f) => Ok(float_to_script(scope, *f)),
        HostValue::String(s) => v8::String::new(scope, s.as_deref().unwrap_or(""))
            .map(Into::into)
            .ok_or(BridgeError::Allocation("string")),
        HostValue::FuncRef(name) => {
            proxy::funcref_wrapper(scope, bridge, name, receiver).map(Into::into)
        }
        HostValue::List(_) | HostValue::Dict(_) => {
            proxy::container_wrapper(scope, bridge, value).map(Into::into)
        }
    }
}

fn number_to_script<'s>(scope: &mut v8::HandleScope<'s>, n: i64) -> v8::Local<'s, v8::Value> {
    match i32::try_from(n) {
        Ok(small) => v8::Integer::new(scope, small).into(),
        Err(_) => v8::Number::new(scope, n as f64).into(),
    }
}

#[cfg(feature = "float")]
fn float_to_script<'s>(scope: &mut v8::HandleScope<'s>, f: f64) -> v8::Local<'s, v8::Value> {
    v8::Number::new(scope, f).into()
}

#[cfg(not(feature = "float"))]
fn float_to_script<'s>(scope: &mut v8::HandleScope<'s>, f: f64) -> v8::Local<'s, v8::Value> {
    number_to_script(scope, f.trunc() as i64)
}

/// Convert a script value to a host value. The result is owned.
///
/// On failure no container produced by this conversion survives.
pub(crate) fn script_to_host<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Rc<Bridge>,
    value: v8::Local<'s, v8::Value>,
) -> BridgeResult<HostValue> {
    let mut lookup = ConversionLookup::new();
    let result = to_host(scope, bridge, value, &mut lookup);
    let host = bridge.host();

    if result.is_err() {
        // Children hold references on each other; unlink them all before
        // dropping the conversion's own references.
        let produced: Vec<HostValue> = lookup.into_values().collect();
        trace!(containers = produced.len(), "abandoning conversion");
        for container in &produced {
            match container {
                HostValue::List(list) => host.list_clear(*list),
                HostValue::Dict(dict) => host.dict_clear(*dict),
                _ => {}
            }
        }
        for container in produced {
            host.release(container);
        }
        return result;
    }

    for container in lookup.into_values() {
        host.release(container);
    }
    result
}

/// Recursive step. Every value returned carries one reference for the caller.
fn to_host<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Rc<Bridge>,
    value: v8::Local<'s, v8::Value>,
    lookup: &mut ConversionLookup<v8::Local<'s, v8::Object>>,
) -> BridgeResult<HostValue> {
    let _depth = bridge.enter_depth()?;

    if let Some(shared) = proxy::unwrap(scope, bridge, value) {
        bridge.host().retain(&shared);
        return Ok(shared);
    }

    if value.is_null_or_undefined() {
        Ok(HostValue::Number(0))
    } else if value.is_boolean() {
        Ok(HostValue::Number(i64::from(value.is_true())))
    } else if value.is_int32() {
        let n = value
            .int32_value(scope)
            .ok_or_else(|| BridgeError::internal("int32 value lost its type"))?;
        Ok(HostValue::Number(i64::from(n)))
    } else if value.is_number() {
        let f = value
            .number_value(scope)
            .ok_or_else(|| BridgeError::internal("number value lost its type"))?;
        Ok(float_to_host(f))
    } else if value.is_big_int() {
        let bigint = v8::Local::<v8::BigInt>::try_from(value)
            .map_err(|_| BridgeError::internal("failed to cast to BigInt"))?;
        match bigint.i64_value() {
            (n, true) => Ok(HostValue::Number(n)),
            (_, false) => Err(BridgeError::Unsupported("a BigInt outside the 64-bit range")),
        }
    } else if value.is_string() || value.is_date() {
        let string = value
            .to_string(scope)
            .ok_or_else(|| BridgeError::host("failed to convert value to string"))?;
        Ok(HostValue::string(string.to_rust_string_lossy(scope)))
    } else if value.is_symbol() {
        Err(BridgeError::Unsupported("a Symbol"))
    } else if value.is_array() {
        let array = v8::Local::<v8::Array>::try_from(value)
            .map_err(|_| BridgeError::internal("failed to cast to array"))?;
        array_to_list(scope, bridge, array, lookup)
    } else if value.is_function() {
        Err(BridgeError::Unsupported("a function"))
    } else if value.is_external() {
        Err(BridgeError::Unsupported("an external value"))
    } else if value.is_object() {
        let object = v8::Local::<v8::Object>::try_from(value)
            .map_err(|_| BridgeError::internal("failed to cast to object"))?;
        object_to_dict(scope, bridge, object, lookup)
    } else {
        Err(BridgeError::Unsupported("this value"))
    }
}

#[cfg(feature = "float")]
fn float_to_host(f: f64) -> HostValue {
    HostValue::Float(f)
}

#[cfg(not(feature = "float"))]
fn float_to_host(f: f64) -> HostValue {
    HostValue::Number(f.trunc() as i64)
}

/// A container already produced for `object` in this conversion, retained
/// for the caller.
fn already_converted<'s>(
    bridge: &Bridge,
    object: v8::Local<'s, v8::Object>,
    lookup: &ConversionLookup<v8::Local<'s, v8::Object>>,
) -> (i32, Option<HostValue>) {
    let hash = object.get_identity_hash().get();
    let found = lookup
        .get(hash, |seen| seen.strict_equals(object.into()))
        .cloned();
    if let Some(value) = &found {
        bridge.host().retain(value);
    }
    (hash, found)
}

fn array_to_list<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Rc<Bridge>,
    array: v8::Local<'s, v8::Array>,
    lookup: &mut ConversionLookup<v8::Local<'s, v8::Object>>,
) -> BridgeResult<HostValue> {
    let object: v8::Local<v8::Object> = array.into();
    let (hash, found) = already_converted(bridge, object, lookup);
    if let Some(value) = found {
        return Ok(value);
    }

    let host = bridge.host();
    let list = host.list_alloc()?;
    lookup.insert(hash, object, HostValue::List(list));

    for index in 0..array.length() {
        let item = array
            .get_index(scope, index)
            .ok_or_else(|| BridgeError::host(format!("failed to read array index {}", index)))?;
        let converted = to_host(scope, bridge, item, lookup)?;
        host.list_append(list, converted)?;
    }

    let result = HostValue::List(list);
    host.retain(&result);
    Ok(result)
}

fn object_to_dict<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Rc<Bridge>,
    object: v8::Local<'s, v8::Object>,
    lookup: &mut ConversionLookup<v8::Local<'s, v8::Object>>,
) -> BridgeResult<HostValue> {
    let (hash, found) = already_converted(bridge, object, lookup);
    if let Some(value) = found {
        return Ok(value);
    }

    let host = bridge.host();
    let dict = host.dict_alloc()?;
    lookup.insert(hash, object, HostValue::Dict(dict));

    let names = object
        .get_own_property_names(scope, v8::GetPropertyNamesArgs::default())
        .ok_or_else(|| BridgeError::host("failed to get property names"))?;

    for i in 0..names.length() {
        let key = names
            .get_index(scope, i)
            .ok_or_else(|| BridgeError::host("failed to get property name"))?;
        let key_str = key
            .to_string(scope)
            .ok_or_else(|| BridgeError::host("failed to convert key to string"))?
            .to_rust_string_lossy(scope);
        if key_str.is_empty() {
            return Err(BridgeError::EmptyKey);
        }

        let val = object
            .get(scope, key)
            .ok_or_else(|| BridgeError::host(format!("failed to get property '{}'", key_str)))?;
        let converted = to_host(scope, bridge, val, lookup)?;
        host.dict_set(dict, &key_str, converted)?;
    }

    let result = HostValue::Dict(dict);
    host.retain(&result);
    Ok(result)
}
