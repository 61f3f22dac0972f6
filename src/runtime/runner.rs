//! The script host: one V8 runtime bound to one editor.
//!
//! [`ScriptHost`] boots a `JsRuntime`, installs the bridge into its isolate,
//! publishes the `vim` object and the global `load()` function, runs the
//! prelude and the optional bootstrap script, and then executes editor
//! supplied scripts one at a time.

use crate::runtime::bridge::Bridge;
use crate::runtime::config::BridgeConfig;
use crate::runtime::conversion::{host_to_script, script_to_host};
use crate::runtime::diagnostics::Diagnostic;
use crate::runtime::error::{BridgeError, BridgeResult};
use crate::runtime::host::{reserved, HostServices};
use crate::runtime::host_value::HostValue;
use crate::runtime::proxy;
use deno_core::v8;
use deno_core::{JsRuntime, RuntimeOptions};
use std::rc::Rc;
use tracing::{debug, trace};

const PRELUDE: &str = include_str!("prelude.js");

pub struct ScriptHost {
    js_runtime: JsRuntime,
    bridge: Rc<Bridge>,
}

impl ScriptHost {
    pub fn new(host: Rc<dyn HostServices>, config: &BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        super::initialize_flags_once(&config.flag_list());

        let create_params = match (config.max_heap_size, config.initial_heap_size) {
            (Some(max), initial) => {
                let initial_bytes = initial.unwrap_or(0);
                Some(v8::CreateParams::default().heap_limits(initial_bytes, max))
            }
            (None, _) => None,
        };

        let mut js_runtime = JsRuntime::new(RuntimeOptions {
            create_params,
            ..Default::default()
        });

        let bridge = Bridge::new(host, config.max_depth)?;
        js_runtime.v8_isolate().set_slot(Rc::clone(&bridge));

        let mut script_host = Self { js_runtime, bridge };
        {
            let scope = &mut script_host.js_runtime.handle_scope();
            install_globals(scope, &script_host.bridge)?;
            if let Some(diagnostic) = run_script(scope, "<prelude>", PRELUDE) {
                return Err(BridgeError::internal(diagnostic.render()));
            }
        }

        if let Some(script) = &config.bootstrap {
            script_host
                .js_runtime
                .execute_script("<bootstrap>", script.clone())
                .map_err(|err| BridgeError::host(err.to_string()))?;
        }

        debug!("script host ready");
        Ok(script_host)
    }

    pub fn bridge(&self) -> &Rc<Bridge> {
        &self.bridge
    }

    /// Run `source`. An uncaught exception is rendered into
    /// `v:['%v8_errmsg%']` and returned; the variable is cleared otherwise.
    pub fn execute(&mut self, source: &str) -> BridgeResult<Option<Diagnostic>> {
        self.bridge.collect_pending();
        let outcome = {
            let scope = &mut self.js_runtime.handle_scope();
            run_script(scope, "<execute>", source)
        };
        self.js_runtime.v8_isolate().perform_microtask_checkpoint();
        self.bridge.collect_pending();

        if let Some(diagnostic) = &outcome {
            debug!(error = %diagnostic.message, "script failed");
        }
        let errmsg = outcome.as_ref().map(Diagnostic::render).unwrap_or_default();
        self.bridge
            .host()
            .set_special(reserved::ERRMSG, HostValue::string(errmsg))?;
        Ok(outcome)
    }

    /// Evaluate `source` and bridge its completion value to the host. The
    /// result is owned.
    pub fn evaluate(&mut self, source: &str) -> BridgeResult<HostValue> {
        self.bridge.collect_pending();
        let scope = &mut self.js_runtime.handle_scope();
        let tc = &mut v8::TryCatch::new(scope);
        let value = compile_and_run(tc, "<evaluate>", source);
        match value {
            Some(value) => script_to_host(tc, &self.bridge, value),
            None => Err(BridgeError::host(
                Diagnostic::capture(tc)
                    .map(|d| d.render())
                    .unwrap_or_else(|| "script execution failed".to_string()),
            )),
        }
    }

    /// Force a full collection and release the host references of every
    /// wrapper that was collected. Returns how many were released.
    pub fn collect_garbage(&mut self) -> usize {
        self.js_runtime.v8_isolate().low_memory_notification();
        self.bridge.collect_pending()
    }
}

impl Drop for ScriptHost {
    fn drop(&mut self) {
        self.bridge.shutdown();
    }
}

/// Compile and run `source` inside a `TryCatch`, returning the caught
/// exception.
fn run_script(scope: &mut v8::HandleScope, name: &str, source: &str) -> Option<Diagnostic> {
    let tc = &mut v8::TryCatch::new(scope);
    match compile_and_run(tc, name, source) {
        Some(_) => None,
        None => Some(
            Diagnostic::capture(tc).unwrap_or_else(|| Diagnostic::bare("script execution failed")),
        ),
    }
}

fn compile_and_run<'s>(
    scope: &mut v8::HandleScope<'s>,
    name: &str,
    source: &str,
) -> Option<v8::Local<'s, v8::Value>> {
    trace!(resource = name, bytes = source.len(), "running script");
    let code = v8::String::new(scope, source)?;
    let resource = v8::String::new(scope, name)?;
    let origin = script_origin(scope, resource);
    let script = v8::Script::compile(scope, code, Some(&origin))?;
    script.run(scope)
}

fn script_origin<'s>(
    scope: &mut v8::HandleScope<'s>,
    resource: v8::Local<'s, v8::String>,
) -> v8::ScriptOrigin<'s> {
    v8::ScriptOrigin::new(
        scope,
        resource.into(),
        0,
        0,
        false,
        0,
        None,
        false,
        false,
        false,
        None,
    )
}

fn install_globals<'s>(scope: &mut v8::HandleScope<'s>, bridge: &Rc<Bridge>) -> BridgeResult<()> {
    let constructors = proxy::install(scope, bridge)?;
    let context = scope.get_current_context();
    let global = context.global(scope);
    let vim = v8::Object::new(scope);

    let host = bridge.host();
    let g = host_to_script(scope, bridge, &HostValue::Dict(host.global_vars()), None)?;
    let v = host_to_script(scope, bridge, &HostValue::Dict(host.special_vars()), None)?;
    set_property(scope, vim, "g", g)?;
    set_property(scope, vim, "v", v)?;
    set_property(scope, vim, "List", constructors.list.into())?;
    set_property(scope, vim, "Dict", constructors.dict.into())?;
    set_property(scope, vim, "Function", constructors.function.into())?;

    let eval = v8::Function::new(scope, vim_eval).ok_or(BridgeError::Allocation("function"))?;
    set_property(scope, vim, "eval", eval.into())?;
    let execute =
        v8::Function::new(scope, vim_execute).ok_or(BridgeError::Allocation("function"))?;
    set_property(scope, vim, "execute", execute.into())?;
    let call = v8::Function::new(scope, vim_call).ok_or(BridgeError::Allocation("function"))?;
    set_property(scope, vim, "call", call.into())?;
    let let_fn = v8::Function::new(scope, vim_let).ok_or(BridgeError::Allocation("function"))?;
    set_property(scope, vim, "let", let_fn.into())?;
    let echo = v8::Function::new(scope, vim_echo).ok_or(BridgeError::Allocation("function"))?;
    set_property(scope, vim, "echo", echo.into())?;

    set_property(scope, global, "vim", vim.into())?;
    let load = v8::Function::new(scope, load).ok_or(BridgeError::Allocation("function"))?;
    set_property(scope, global, "load", load.into())?;
    Ok(())
}

fn set_property<'s>(
    scope: &mut v8::HandleScope<'s>,
    target: v8::Local<'s, v8::Object>,
    name: &str,
    value: v8::Local<'s, v8::Value>,
) -> BridgeResult<()> {
    let key = v8::String::new(scope, name).ok_or(BridgeError::Allocation("string"))?;
    target
        .set(scope, key.into(), value)
        .filter(|done| *done)
        .map(|_| ())
        .ok_or_else(|| BridgeError::internal(format!("failed to define '{}'", name)))
}

/// Run a native binding and hand its result or error back to script code.
fn respond<'s>(
    scope: &mut v8::HandleScope<'s>,
    mut rv: v8::ReturnValue,
    body: impl FnOnce(&mut v8::HandleScope<'s>, &Rc<Bridge>) -> BridgeResult<v8::Local<'s, v8::Value>>,
) {
    let Some(bridge) = Bridge::from_isolate(scope) else {
        return;
    };
    match body(scope, &bridge) {
        Ok(value) => rv.set(value),
        Err(err) => proxy::throw_error(scope, &err),
    }
}

fn string_arg<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: &v8::FunctionCallbackArguments<'s>,
    index: i32,
    what: &str,
) -> BridgeResult<String> {
    let value = args.get(index);
    if !value.is_string() {
        return Err(BridgeError::InvalidArgument(format!("{} expects a string", what)));
    }
    Ok(value.to_rust_string_lossy(scope))
}

fn vim_eval<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    rv: v8::ReturnValue,
) {
    respond(scope, rv, |scope, bridge| {
        let expr = string_arg(scope, &args, 0, "vim.eval")?;
        let value = bridge.host().eval(&expr)?;
        let converted = host_to_script(scope, bridge, &value, None);
        bridge.host().release(value);
        converted
    });
}

fn vim_execute<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    rv: v8::ReturnValue,
) {
    respond(scope, rv, |scope, bridge| {
        let command = string_arg(scope, &args, 0, "vim.execute")?;
        bridge.host().exec(&command)?;
        Ok(v8::undefined(scope).into())
    });
}

fn vim_let<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    rv: v8::ReturnValue,
) {
    respond(scope, rv, |scope, bridge| {
        let name = string_arg(scope, &args, 0, "vim.let")?;
        let value = script_to_host(scope, bridge, args.get(1))?;
        bridge.host().let_var(&name, value)?;
        Ok(v8::undefined(scope).into())
    });
}

fn vim_echo<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    rv: v8::ReturnValue,
) {
    respond(scope, rv, |scope, bridge| {
        let value = script_to_host(scope, bridge, args.get(0))?;
        let host = bridge.host();
        host.set_special(reserved::PRINT, value)?;
        host.exec(&format!("echo v:['{}']", reserved::PRINT))?;
        Ok(v8::undefined(scope).into())
    });
}

/// `vim.call(func, args, self)`: `func` is a name or a function reference,
/// `args` an array or List, `self` an optional dictionary.
fn vim_call<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    rv: v8::ReturnValue,
) {
    respond(scope, rv, |scope, bridge| {
        let host = bridge.host();
        let name = proxy::function_name(scope, bridge, args.get(0)).ok_or_else(|| {
            BridgeError::InvalidArgument(
                "vim.call expects a function name or reference".to_string(),
            )
        })?;

        let arguments = args.get(1);
        let list = if arguments.is_null_or_undefined() {
            host.list_alloc()?
        } else {
            match script_to_host(scope, bridge, arguments)? {
                HostValue::List(list) => list,
                other => {
                    host.release(other);
                    return Err(BridgeError::InvalidArgument(
                        "vim.call expects a List of arguments".to_string(),
                    ));
                }
            }
        };

        let receiver = args.get(2);
        let selfdict = if receiver.is_undefined() {
            None
        } else {
            match script_to_host(scope, bridge, receiver) {
                Ok(HostValue::Dict(dict)) => Some(dict),
                Ok(other) => {
                    host.release(other);
                    host.release(HostValue::List(list));
                    return Err(BridgeError::InvalidArgument(
                        "vim.call expects a Dictionary as self".to_string(),
                    ));
                }
                Err(err) => {
                    host.release(HostValue::List(list));
                    return Err(err);
                }
            }
        };

        let result = host.call_function(&name, list, selfdict);
        host.release(HostValue::List(list));
        if let Some(dict) = selfdict {
            host.release(HostValue::Dict(dict));
        }
        let result = result?;
        let converted = host_to_script(scope, bridge, &result, None);
        host.release(result);
        converted
    });
}

/// `load(path...)`: run each file in order. Exceptions propagate to the
/// caller with the file's name attached.
fn load<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
) {
    for i in 0..args.length() {
        let path = args.get(i).to_rust_string_lossy(scope);
        let source = match std::fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                debug!(path = %path, error = %err, "load failed");
                let err = BridgeError::host(format!("Error loading file: {}", path));
                proxy::throw_error(scope, &err);
                return;
            }
        };
        if compile_and_run(scope, &path, &source).is_none() {
            return;
        }
    }
    rv.set_undefined();
}
