//! Live script views of host containers and functions.
//!
//! List and Dict wrappers are instances of two native constructors whose
//! instance templates intercept property access and forward it to the host
//! container recorded in the wrapper's internal fields. Reads, writes and
//! deletes go straight through; nothing is copied.
//!
//! Function references are real script functions. The referenced name and
//! the optionally bound dictionary live in the function's callback data and
//! in a private property, which is how a function reference is recognized
//! when it travels back to the host.

use super::bridge::{Bridge, ContainerKind};
use super::conversion::{host_to_script, script_to_host};
use super::error::{BridgeError, BridgeResult};
use super::host_value::{DictId, HostValue, IdentityKey, ListId};
use deno_core::v8;
use std::ffi::c_void;
use std::rc::Rc;

const CONTAINER_FIELD: usize = 0;
const KIND_FIELD: usize = 1;
const FIELD_COUNT: usize = 2;

/// Property attributes reported by query interceptors: writable, enumerable
/// and configurable.
const NO_ATTRIBUTES: i32 = 0;

const LIST_TAG: i32 = 0x564c_5354;
const DICT_TAG: i32 = 0x5644_4354;

impl ContainerKind {
    fn tag(self) -> i32 {
        match self {
            Self::List => LIST_TAG,
            Self::Dict => DICT_TAG,
        }
    }
}

/// Native constructors created by [`install`].
pub(crate) struct Constructors<'s> {
    pub list: v8::Local<'s, v8::Function>,
    pub dict: v8::Local<'s, v8::Function>,
    pub function: v8::Local<'s, v8::Function>,
}

/// Build the wrapper constructors and hand their persistent handles to the
/// bridge.
pub(crate) fn install<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Bridge,
) -> BridgeResult<Constructors<'s>> {
    let list = container_constructor(scope, ContainerKind::List)?;
    let dict = container_constructor(scope, ContainerKind::Dict)?;
    let function = v8::Function::new(scope, function_constructor)
        .ok_or(BridgeError::Allocation("function"))?;

    let key_name =
        v8::String::new(scope, "vim-v8.funcref").ok_or(BridgeError::Allocation("string"))?;
    let funcref_key = v8::Private::for_api(scope, Some(key_name));

    bridge.set_templates(super::bridge::Templates {
        list: v8::Global::new(scope, list),
        dict: v8::Global::new(scope, dict),
        funcref_key: v8::Global::new(scope, funcref_key),
    });

    Ok(Constructors {
        list,
        dict,
        function,
    })
}

fn container_constructor<'s>(
    scope: &mut v8::HandleScope<'s>,
    kind: ContainerKind,
) -> BridgeResult<v8::Local<'s, v8::Function>> {
    let (class_name, template) = match kind {
        ContainerKind::List => ("List", v8::FunctionTemplate::new(scope, list_constructor)),
        ContainerKind::Dict => ("Dict", v8::FunctionTemplate::new(scope, dict_constructor)),
    };
    let name = v8::String::new(scope, class_name).ok_or(BridgeError::Allocation("string"))?;
    template.set_class_name(name);

    let instance = template.instance_template(scope);
    instance.set_internal_field_count(FIELD_COUNT);
    match kind {
        ContainerKind::List => {
            instance.set_named_property_handler(
                v8::NamedPropertyHandlerConfiguration::new().getter(list_named_get),
            );
            instance.set_indexed_property_handler(
                v8::IndexedPropertyHandlerConfiguration::new()
                    .getter(list_index_get)
                    .setter(list_index_set)
                    .query(list_index_query)
                    .deleter(list_index_delete)
                    .enumerator(list_enumerate),
            );
        }
        ContainerKind::Dict => {
            instance.set_named_property_handler(
                v8::NamedPropertyHandlerConfiguration::new()
                    .getter(dict_named_get)
                    .setter(dict_named_set)
                    .query(dict_named_query)
                    .deleter(dict_named_delete)
                    .enumerator(dict_enumerate),
            );
            instance.set_indexed_property_handler(
                v8::IndexedPropertyHandlerConfiguration::new()
                    .getter(dict_index_get)
                    .setter(dict_index_set)
                    .query(dict_index_query)
                    .deleter(dict_index_delete),
            );
        }
    }

    template
        .get_function(scope)
        .ok_or(BridgeError::Allocation("constructor"))
}

/// The canonical wrapper for a host container, created on first use.
pub(crate) fn container_wrapper<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Rc<Bridge>,
    value: &HostValue,
) -> BridgeResult<v8::Local<'s, v8::Object>> {
    let (Some(kind), Some(identity)) = (ContainerKind::of(value), value.identity()) else {
        return Err(BridgeError::internal(format!(
            "cannot wrap a {} as a container",
            value.type_name()
        )));
    };
    if let Some(cached) = bridge.cached(scope, &identity) {
        return Ok(cached);
    }

    let constructor = bridge.constructor(scope, kind)?;
    bridge.set_adopt(value.clone());
    let object = constructor.new_instance(scope, &[]);
    // Left over only when the constructor failed before taking it.
    bridge.take_adopt();
    object.ok_or_else(|| BridgeError::host(format!("failed to wrap {}", value.type_name())))
}

/// A script function that calls the host function `name`.
///
/// Unbound references are canonical per name. A reference read from a
/// dictionary is bound to that dictionary's wrapper and is canonical per
/// dictionary and name.
pub(crate) fn funcref_wrapper<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Rc<Bridge>,
    name: &str,
    receiver: Option<v8::Local<'s, v8::Object>>,
) -> BridgeResult<v8::Local<'s, v8::Object>> {
    let receiver = receiver.and_then(|object| Some((object, dict_of(scope, object.into())?)));
    let identity = match receiver {
        Some((_, dict)) => IdentityKey::Method(dict, name.to_owned()),
        None => IdentityKey::Func(name.to_owned()),
    };
    if let Some(cached) = bridge.cached(scope, &identity) {
        return Ok(cached);
    }

    let name_str = v8::String::new(scope, name).ok_or(BridgeError::Allocation("string"))?;
    let bound: v8::Local<v8::Value> = match receiver {
        Some((receiver, _)) => receiver.into(),
        None => v8::undefined(scope).into(),
    };
    let record = v8::Array::new_with_elements(scope, &[name_str.into(), bound]);
    let function = v8::Function::builder(funcref_call)
        .data(record.into())
        .build(scope)
        .ok_or(BridgeError::Allocation("function"))?;
    function.set_name(name_str);
    let key = bridge.funcref_key(scope)?;
    function.set_private(scope, key, record.into());

    let value = HostValue::FuncRef(name.to_owned());
    bridge.host().retain(&value);
    let wrapper = bridge.register(value)?;
    let object: v8::Local<v8::Object> = function.into();
    bridge.track(scope, object, wrapper, Some(identity));
    Ok(object)
}

/// The host value behind a wrapper, borrowed. `None` for every other value.
pub(crate) fn unwrap<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Bridge,
    value: v8::Local<'s, v8::Value>,
) -> Option<HostValue> {
    let object = v8::Local::<v8::Object>::try_from(value).ok()?;
    if value.is_function() {
        return funcref_record(scope, bridge, object)
            .and_then(|record| record_name(scope, record))
            .map(HostValue::FuncRef);
    }
    container_of(scope, object)
}

/// The host container recorded in a wrapper's internal fields.
fn container_of<'s>(
    scope: &mut v8::HandleScope<'s>,
    object: v8::Local<'s, v8::Object>,
) -> Option<HostValue> {
    if object.internal_field_count() < FIELD_COUNT {
        return None;
    }
    let tag = object.get_internal_field(scope, KIND_FIELD)?;
    let tag = v8::Local::<v8::Value>::try_from(tag).ok()?;
    if !tag.is_int32() {
        return None;
    }
    let tag = tag.int32_value(scope)?;

    let field = object.get_internal_field(scope, CONTAINER_FIELD)?;
    let field = v8::Local::<v8::Value>::try_from(field).ok()?;
    let raw = v8::Local::<v8::External>::try_from(field).ok()?.value() as usize;
    match tag {
        LIST_TAG => Some(HostValue::List(ListId::from_raw(raw))),
        DICT_TAG => Some(HostValue::Dict(DictId::from_raw(raw))),
        _ => None,
    }
}

fn funcref_record<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Bridge,
    function: v8::Local<'s, v8::Object>,
) -> Option<v8::Local<'s, v8::Array>> {
    let key = bridge.funcref_key(scope).ok()?;
    let record = function.get_private(scope, key)?;
    v8::Local::<v8::Array>::try_from(record).ok()
}

fn record_name<'s>(
    scope: &mut v8::HandleScope<'s>,
    record: v8::Local<'s, v8::Array>,
) -> Option<String> {
    let name = record.get_index(scope, 0)?;
    name.is_string().then(|| name.to_rust_string_lossy(scope))
}

/// The dictionary behind a Dict wrapper.
pub(crate) fn dict_of<'s>(
    scope: &mut v8::HandleScope<'s>,
    value: v8::Local<'s, v8::Value>,
) -> Option<DictId> {
    let object = v8::Local::<v8::Object>::try_from(value).ok()?;
    match container_of(scope, object)? {
        HostValue::Dict(dict) => Some(dict),
        _ => None,
    }
}

/// The name of the host function a script value designates: a string or a
/// function reference wrapper.
pub(crate) fn function_name<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Bridge,
    value: v8::Local<'s, v8::Value>,
) -> Option<String> {
    if value.is_string() {
        return Some(value.to_rust_string_lossy(scope));
    }
    match unwrap(scope, bridge, value)? {
        HostValue::FuncRef(name) => Some(name),
        _ => None,
    }
}

/// Throw `err` into the running script.
pub(crate) fn throw_error(scope: &mut v8::HandleScope<'_>, err: &BridgeError) {
    let Some(message) = v8::String::new(scope, &err.to_string()) else {
        return;
    };
    let exception = match err {
        BridgeError::IndexOutOfRange { .. } | BridgeError::TooDeep { .. } => {
            v8::Exception::range_error(scope, message)
        }
        BridgeError::Unsupported(_) | BridgeError::EmptyKey | BridgeError::InvalidArgument(_) => {
            v8::Exception::type_error(scope, message)
        }
        _ => v8::Exception::error(scope, message),
    };
    scope.throw_exception(exception);
}

/// Call the host function `name` with script arguments.
pub(crate) fn call_host<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Rc<Bridge>,
    name: &str,
    args: &[v8::Local<'s, v8::Value>],
    selfdict: Option<DictId>,
) -> BridgeResult<v8::Local<'s, v8::Value>> {
    let host = bridge.host();
    let list = host.list_alloc()?;
    for arg in args {
        if let Err(err) =
            script_to_host(scope, bridge, *arg).and_then(|value| host.list_append(list, value))
        {
            host.release(HostValue::List(list));
            return Err(err);
        }
    }

    let result = host.call_function(name, list, selfdict);
    host.release(HostValue::List(list));
    let result = result?;
    let converted = host_to_script(scope, bridge, &result, None);
    host.release(result);
    converted
}

fn funcref_call<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
) {
    let Some(bridge) = Bridge::from_isolate(scope) else {
        return;
    };
    match invoke_funcref(scope, &bridge, &args) {
        Ok(value) => rv.set(value),
        Err(err) => throw_error(scope, &err),
    }
}

fn invoke_funcref<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Rc<Bridge>,
    args: &v8::FunctionCallbackArguments<'s>,
) -> BridgeResult<v8::Local<'s, v8::Value>> {
    let record = v8::Local::<v8::Array>::try_from(args.data())
        .map_err(|_| BridgeError::internal("function reference lost its record"))?;
    let name = record_name(scope, record)
        .ok_or_else(|| BridgeError::internal("function reference lost its name"))?;

    let bound = match record.get_index(scope, 1) {
        Some(bound) => dict_of(scope, bound),
        None => None,
    };
    let selfdict = match bound {
        Some(dict) => Some(dict),
        None => dict_of(scope, args.this().into()),
    };

    let values: Vec<v8::Local<v8::Value>> = (0..args.length()).map(|i| args.get(i)).collect();
    call_host(scope, bridge, &name, &values, selfdict)
}

fn function_constructor<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
) {
    let Some(bridge) = Bridge::from_isolate(scope) else {
        return;
    };
    let name = args.get(0);
    let result = if name.is_string() {
        let name = name.to_rust_string_lossy(scope);
        if name.is_empty() {
            Err(BridgeError::InvalidArgument(
                "vim.Function expects a function name".into(),
            ))
        } else {
            funcref_wrapper(scope, &bridge, &name, None)
        }
    } else {
        Err(BridgeError::InvalidArgument(
            "vim.Function expects a function name".into(),
        ))
    };
    match result {
        Ok(function) => rv.set(function.into()),
        Err(err) => throw_error(scope, &err),
    }
}

fn list_constructor<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    rv: v8::ReturnValue,
) {
    construct(scope, args, rv, ContainerKind::List);
}

fn dict_constructor<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    rv: v8::ReturnValue,
) {
    construct(scope, args, rv, ContainerKind::Dict);
}

fn construct<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
    kind: ContainerKind,
) {
    let Some(bridge) = Bridge::from_isolate(scope) else {
        return;
    };

    // `vim.List()` without `new` behaves like `new vim.List()`.
    if args.new_target().is_undefined() {
        let object = bridge
            .constructor(scope, kind)
            .map(|constructor| constructor.new_instance(scope, &[]));
        match object {
            Ok(Some(object)) => rv.set(object.into()),
            Ok(None) => {}
            Err(err) => throw_error(scope, &err),
        }
        return;
    }

    let this = args.this();
    match attach(scope, &bridge, this, kind) {
        Ok(()) => rv.set(this.into()),
        Err(err) => throw_error(scope, &err),
    }
}

/// Bind a freshly constructed wrapper to its host container.
///
/// The container is either the one handed over through the adopt slot or a
/// new empty one. Either way the wrapper's registry entry owns one reference.
fn attach<'s>(
    scope: &mut v8::HandleScope<'s>,
    bridge: &Rc<Bridge>,
    this: v8::Local<'s, v8::Object>,
    kind: ContainerKind,
) -> BridgeResult<()> {
    if this.internal_field_count() < FIELD_COUNT {
        return Err(BridgeError::internal("wrapper has no internal fields"));
    }
    bridge.collect_pending();

    let host = bridge.host();
    let value = match bridge.take_adopt() {
        Some(value) if ContainerKind::of(&value) == Some(kind) => {
            host.retain(&value);
            value
        }
        Some(value) => {
            return Err(BridgeError::internal(format!(
                "cannot adopt a {} into a {:?} wrapper",
                value.type_name(),
                kind
            )));
        }
        None => match kind {
            ContainerKind::List => HostValue::List(host.list_alloc()?),
            ContainerKind::Dict => HostValue::Dict(host.dict_alloc()?),
        },
    };

    let raw = match &value {
        HostValue::List(list) => list.as_raw(),
        HostValue::Dict(dict) => dict.as_raw(),
        _ => return Err(BridgeError::internal("container wrapper without a container")),
    };
    let identity = value.identity();
    let wrapper = bridge.register(value)?;

    let external = v8::External::new(scope, raw as *mut c_void);
    this.set_internal_field(CONTAINER_FIELD, external.into());
    let tag = v8::Integer::new(scope, kind.tag());
    this.set_internal_field(KIND_FIELD, tag.into());
    bridge.track(scope, this, wrapper, identity);
    Ok(())
}

/// Bridge and container behind the wrapper an interceptor fired on.
fn target<'s>(
    scope: &mut v8::HandleScope<'s>,
    this: v8::Local<'s, v8::Object>,
) -> Option<(Rc<Bridge>, HostValue)> {
    let bridge = Bridge::from_isolate(scope)?;
    let container = container_of(scope, this)?;
    Some((bridge, container))
}

fn property_key<'s>(
    scope: &mut v8::HandleScope<'s>,
    key: v8::Local<'s, v8::Name>,
) -> Option<String> {
    if key.is_symbol() {
        return None;
    }
    Some(key.to_rust_string_lossy(scope))
}

fn list_named_get<'s>(
    scope: &mut v8::HandleScope<'s>,
    key: v8::Local<'s, v8::Name>,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
) -> v8::Intercepted {
    if property_key(scope, key).as_deref() != Some("length") {
        return v8::Intercepted::No;
    }
    let Some((bridge, HostValue::List(list))) = target(scope, args.this()) else {
        return v8::Intercepted::No;
    };
    let len = bridge.host().list_len(list);
    rv.set(v8::Number::new(scope, len as f64).into());
    v8::Intercepted::Yes
}

fn list_index_get<'s>(
    scope: &mut v8::HandleScope<'s>,
    index: u32,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
) -> v8::Intercepted {
    let Some((bridge, HostValue::List(list))) = target(scope, args.this()) else {
        return v8::Intercepted::No;
    };
    let Some(item) = bridge.host().list_get(list, index as usize) else {
        return v8::Intercepted::No;
    };
    match host_to_script(scope, &bridge, &item, None) {
        Ok(value) => rv.set(value),
        Err(err) => throw_error(scope, &err),
    }
    v8::Intercepted::Yes
}

fn list_index_set<'s>(
    scope: &mut v8::HandleScope<'s>,
    index: u32,
    value: v8::Local<'s, v8::Value>,
    args: v8::PropertyCallbackArguments<'s>,
    _rv: v8::ReturnValue<()>,
) -> v8::Intercepted {
    let Some((bridge, HostValue::List(list))) = target(scope, args.this()) else {
        return v8::Intercepted::No;
    };
    let stored = script_to_host(scope, &bridge, value)
        .and_then(|value| bridge.host().list_set(list, index as usize, value));
    if let Err(err) = stored {
        throw_error(scope, &err);
    }
    v8::Intercepted::Yes
}

fn list_index_query<'s>(
    scope: &mut v8::HandleScope<'s>,
    index: u32,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue<v8::Integer>,
) -> v8::Intercepted {
    let Some((bridge, HostValue::List(list))) = target(scope, args.this()) else {
        return v8::Intercepted::No;
    };
    if (index as usize) < bridge.host().list_len(list) {
        rv.set_int32(NO_ATTRIBUTES);
        return v8::Intercepted::Yes;
    }
    v8::Intercepted::No
}

fn list_index_delete<'s>(
    scope: &mut v8::HandleScope<'s>,
    index: u32,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue<v8::Boolean>,
) -> v8::Intercepted {
    let Some((bridge, HostValue::List(list))) = target(scope, args.this()) else {
        return v8::Intercepted::No;
    };
    let removed = bridge.host().list_remove(list, index as usize);
    rv.set_bool(removed);
    v8::Intercepted::Yes
}

fn list_enumerate<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue<v8::Array>,
) {
    let Some((bridge, HostValue::List(list))) = target(scope, args.this()) else {
        return;
    };
    let len = bridge.host().list_len(list);
    let indices: Vec<v8::Local<v8::Value>> = (0..len)
        .map(|i| v8::Integer::new_from_unsigned(scope, i as u32).into())
        .collect();
    rv.set(v8::Array::new_with_elements(scope, &indices));
}

fn dict_get<'s>(
    scope: &mut v8::HandleScope<'s>,
    key: &str,
    this: v8::Local<'s, v8::Object>,
    rv: &mut v8::ReturnValue,
) -> v8::Intercepted {
    let Some((bridge, HostValue::Dict(dict))) = target(scope, this) else {
        return v8::Intercepted::No;
    };
    if key.is_empty() {
        throw_error(scope, &BridgeError::EmptyKey);
        return v8::Intercepted::Yes;
    }
    let Some(item) = bridge.host().dict_get(dict, key) else {
        return v8::Intercepted::No;
    };
    let receiver = matches!(item, HostValue::FuncRef(_)).then_some(this);
    match host_to_script(scope, &bridge, &item, receiver) {
        Ok(value) => rv.set(value),
        Err(err) => throw_error(scope, &err),
    }
    v8::Intercepted::Yes
}

fn dict_set<'s>(
    scope: &mut v8::HandleScope<'s>,
    key: &str,
    value: v8::Local<'s, v8::Value>,
    this: v8::Local<'s, v8::Object>,
) -> v8::Intercepted {
    let Some((bridge, HostValue::Dict(dict))) = target(scope, this) else {
        return v8::Intercepted::No;
    };
    let stored = if key.is_empty() {
        Err(BridgeError::EmptyKey)
    } else {
        script_to_host(scope, &bridge, value)
            .and_then(|value| bridge.host().dict_set(dict, key, value))
    };
    if let Err(err) = stored {
        throw_error(scope, &err);
    }
    v8::Intercepted::Yes
}

fn dict_query<'s>(
    scope: &mut v8::HandleScope<'s>,
    key: &str,
    this: v8::Local<'s, v8::Object>,
    rv: &mut v8::ReturnValue<v8::Integer>,
) -> v8::Intercepted {
    let Some((bridge, HostValue::Dict(dict))) = target(scope, this) else {
        return v8::Intercepted::No;
    };
    if key.is_empty() {
        throw_error(scope, &BridgeError::EmptyKey);
        return v8::Intercepted::Yes;
    }
    if bridge.host().dict_get(dict, key).is_none() {
        return v8::Intercepted::No;
    }
    rv.set_int32(NO_ATTRIBUTES);
    v8::Intercepted::Yes
}

fn dict_delete<'s>(
    scope: &mut v8::HandleScope<'s>,
    key: &str,
    this: v8::Local<'s, v8::Object>,
    rv: &mut v8::ReturnValue<v8::Boolean>,
) -> v8::Intercepted {
    let Some((bridge, HostValue::Dict(dict))) = target(scope, this) else {
        return v8::Intercepted::No;
    };
    if key.is_empty() {
        throw_error(scope, &BridgeError::EmptyKey);
        return v8::Intercepted::Yes;
    }
    if !bridge.host().dict_remove(dict, key) {
        return v8::Intercepted::No;
    }
    rv.set_bool(true);
    v8::Intercepted::Yes
}

fn dict_named_get<'s>(
    scope: &mut v8::HandleScope<'s>,
    key: v8::Local<'s, v8::Name>,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
) -> v8::Intercepted {
    let Some(key) = property_key(scope, key) else {
        return v8::Intercepted::No;
    };
    dict_get(scope, &key, args.this(), &mut rv)
}

fn dict_named_set<'s>(
    scope: &mut v8::HandleScope<'s>,
    key: v8::Local<'s, v8::Name>,
    value: v8::Local<'s, v8::Value>,
    args: v8::PropertyCallbackArguments<'s>,
    _rv: v8::ReturnValue<()>,
) -> v8::Intercepted {
    let Some(key) = property_key(scope, key) else {
        return v8::Intercepted::No;
    };
    dict_set(scope, &key, value, args.this())
}

fn dict_named_query<'s>(
    scope: &mut v8::HandleScope<'s>,
    key: v8::Local<'s, v8::Name>,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue<v8::Integer>,
) -> v8::Intercepted {
    let Some(key) = property_key(scope, key) else {
        return v8::Intercepted::No;
    };
    dict_query(scope, &key, args.this(), &mut rv)
}

fn dict_named_delete<'s>(
    scope: &mut v8::HandleScope<'s>,
    key: v8::Local<'s, v8::Name>,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue<v8::Boolean>,
) -> v8::Intercepted {
    let Some(key) = property_key(scope, key) else {
        return v8::Intercepted::No;
    };
    dict_delete(scope, &key, args.this(), &mut rv)
}

fn dict_enumerate<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue<v8::Array>,
) {
    let Some((bridge, HostValue::Dict(dict))) = target(scope, args.this()) else {
        return;
    };
    let keys = bridge.host().dict_keys(dict);
    let mut names: Vec<v8::Local<v8::Value>> = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(name) = v8::String::new(scope, &key) {
            names.push(name.into());
        }
    }
    rv.set(v8::Array::new_with_elements(scope, &names));
}

fn dict_index_get<'s>(
    scope: &mut v8::HandleScope<'s>,
    index: u32,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
) -> v8::Intercepted {
    dict_get(scope, &index.to_string(), args.this(), &mut rv)
}

fn dict_index_set<'s>(
    scope: &mut v8::HandleScope<'s>,
    index: u32,
    value: v8::Local<'s, v8::Value>,
    args: v8::PropertyCallbackArguments<'s>,
    _rv: v8::ReturnValue<()>,
) -> v8::Intercepted {
    dict_set(scope, &index.to_string(), value, args.this())
}

fn dict_index_query<'s>(
    scope: &mut v8::HandleScope<'s>,
    index: u32,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue<v8::Integer>,
) -> v8::Intercepted {
    dict_query(scope, &index.to_string(), args.this(), &mut rv)
}

fn dict_index_delete<'s>(
    scope: &mut v8::HandleScope<'s>,
    index: u32,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue<v8::Boolean>,
) -> v8::Intercepted {
    dict_delete(scope, &index.to_string(), args.this(), &mut rv)
}
