//! In-process implementation of the host port.
//!
//! `MemoryHost` keeps lists and dictionaries in a refcounted arena with the
//! same ownership rules as the editor: a container is freed, and its children
//! released, when its last reference is dropped. Reference cycles that are no
//! longer reachable leak, exactly as they do in the editor until its own cycle
//! collector runs.

use super::error::{BridgeError, BridgeResult};
use super::host::HostServices;
use super::host_expr;
use super::host_value::{DepthGuard, DictId, HostValue, ListId};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{info, warn};

/// A host function: receives borrowed arguments and the optional dictionary
/// receiver, returns an owned result.
pub type HostFunction = dyn Fn(&MemoryHost, &[HostValue], Option<DictId>) -> BridgeResult<HostValue>;

struct ListSlot {
    refcount: usize,
    items: Vec<HostValue>,
}

struct DictSlot {
    refcount: usize,
    entries: IndexMap<String, HostValue>,
}

#[derive(Default)]
struct Arena {
    next_id: usize,
    lists: HashMap<usize, ListSlot>,
    dicts: HashMap<usize, DictSlot>,
}

impl Arena {
    fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }
}

/// Host services backed by process memory.
pub struct MemoryHost {
    arena: RefCell<Arena>,
    functions: RefCell<HashMap<String, Rc<HostFunction>>>,
    messages: RefCell<Vec<String>>,
    errors: RefCell<Vec<String>>,
    globals: DictId,
    specials: DictId,
}

impl MemoryHost {
    pub fn new() -> Self {
        let mut arena = Arena::default();
        let mut scope = || {
            let id = arena.next_id();
            arena.dicts.insert(
                id,
                DictSlot {
                    refcount: 1,
                    entries: IndexMap::new(),
                },
            );
            DictId::from_raw(id)
        };
        let globals = scope();
        let specials = scope();
        Self {
            arena: RefCell::new(arena),
            functions: RefCell::new(HashMap::new()),
            messages: RefCell::new(Vec::new()),
            errors: RefCell::new(Vec::new()),
            globals,
            specials,
        }
    }

    /// Register a function callable from expressions and through
    /// [`call_function`](HostServices::call_function).
    pub fn define_function<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&MemoryHost, &[HostValue], Option<DictId>) -> BridgeResult<HostValue> + 'static,
    {
        self.functions
            .borrow_mut()
            .insert(name.into(), Rc::new(function));
    }

    /// Lines written by `echo`, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    /// Messages passed to [`report_error`](HostServices::report_error).
    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }

    /// Number of live lists and dictionaries, the two scope dictionaries
    /// included.
    pub fn live_containers(&self) -> usize {
        let arena = self.arena.borrow();
        arena.lists.len() + arena.dicts.len()
    }

    /// Evaluate `expr` and render the result as JSON.
    pub fn eval_json(&self, expr: &str) -> BridgeResult<serde_json::Value> {
        let value = self.eval(expr)?;
        let json = self.to_json(&value);
        self.release(value);
        json
    }

    pub(crate) fn echo(&self, line: String) {
        info!(target: "vim_v8::host", "{}", line);
        self.messages.borrow_mut().push(line);
    }

    /// Render a value the way `echo` prints it.
    pub(crate) fn render(&self, value: &HostValue) -> String {
        match value.display_scalar() {
            Some(text) => text,
            None => match self.to_json(value) {
                Ok(json) => json.to_string(),
                Err(_) => "[...]".to_string(),
            },
        }
    }

    /// Snapshot a value as JSON. Function references render as
    /// `function('name')`; unknown values as `null`.
    pub fn to_json(&self, value: &HostValue) -> BridgeResult<serde_json::Value> {
        let mut guard = DepthGuard::default();
        self.to_json_inner(value, &mut guard)
    }

    fn to_json_inner(
        &self,
        value: &HostValue,
        guard: &mut DepthGuard,
    ) -> BridgeResult<serde_json::Value> {
        use serde_json::Value;

        guard.enter().map_err(|limit| BridgeError::TooDeep { limit })?;
        let result = match value {
            HostValue::Unknown => Ok(Value::Null),
            HostValue::Number(n) => Ok(Value::from(*n)),
            HostValue::Float(f) => Ok(serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null)),
            HostValue::String(s) => Ok(Value::String(s.clone().unwrap_or_default())),
            HostValue::FuncRef(name) => Ok(Value::String(format!("function('{}')", name))),
            HostValue::List(list) => {
                let items = self.list_items(*list)?;
                items
                    .iter()
                    .map(|item| self.to_json_inner(item, guard))
                    .collect::<BridgeResult<Vec<_>>>()
                    .map(Value::Array)
            }
            HostValue::Dict(dict) => {
                let entries = self.dict_entries(*dict)?;
                let mut map = serde_json::Map::new();
                for (key, item) in entries {
                    map.insert(key, self.to_json_inner(&item, guard)?);
                }
                Ok(Value::Object(map))
            }
        };
        guard.exit();
        result
    }

    /// Build an owned host value from JSON. `null` becomes `0` and booleans
    /// become `0`/`1`, matching how script values are bridged.
    pub fn from_json(&self, json: &serde_json::Value) -> BridgeResult<HostValue> {
        let mut guard = DepthGuard::default();
        self.from_json_inner(json, &mut guard)
    }

    fn from_json_inner(
        &self,
        json: &serde_json::Value,
        guard: &mut DepthGuard,
    ) -> BridgeResult<HostValue> {
        use serde_json::Value;

        guard.enter().map_err(|limit| BridgeError::TooDeep { limit })?;
        let result = match json {
            Value::Null => Ok(HostValue::Number(0)),
            Value::Bool(b) => Ok(HostValue::Number(i64::from(*b))),
            Value::Number(n) => Ok(match n.as_i64() {
                Some(i) => HostValue::Number(i),
                None => HostValue::Float(n.as_f64().unwrap_or(0.0)),
            }),
            Value::String(s) => Ok(HostValue::string(s.clone())),
            Value::Array(items) => {
                let list = self.list_alloc()?;
                let filled = items.iter().try_for_each(|item| {
                    let value = self.from_json_inner(item, guard)?;
                    self.list_append(list, value)
                });
                match filled {
                    Ok(()) => Ok(HostValue::List(list)),
                    Err(err) => {
                        self.release(HostValue::List(list));
                        Err(err)
                    }
                }
            }
            Value::Object(map) => {
                let dict = self.dict_alloc()?;
                let filled = map.iter().try_for_each(|(key, item)| {
                    if key.is_empty() {
                        return Err(BridgeError::EmptyKey);
                    }
                    let value = self.from_json_inner(item, guard)?;
                    self.dict_set(dict, key, value)
                });
                match filled {
                    Ok(()) => Ok(HostValue::Dict(dict)),
                    Err(err) => {
                        self.release(HostValue::Dict(dict));
                        Err(err)
                    }
                }
            }
        };
        guard.exit();
        result
    }

    /// Assign a JSON value to a variable, e.g. `set_json("g:conf", json!({..}))`.
    pub fn set_json(&self, name: &str, json: serde_json::Value) -> BridgeResult<()> {
        let value = self.from_json(&json)?;
        self.let_var(name, value)
    }

    fn list_items(&self, list: ListId) -> BridgeResult<Vec<HostValue>> {
        let arena = self.arena.borrow();
        arena
            .lists
            .get(&list.as_raw())
            .map(|slot| slot.items.clone())
            .ok_or(BridgeError::HostUnavailable)
    }

    fn dict_entries(&self, dict: DictId) -> BridgeResult<Vec<(String, HostValue)>> {
        let arena = self.arena.borrow();
        arena
            .dicts
            .get(&dict.as_raw())
            .map(|slot| {
                slot.entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .ok_or(BridgeError::HostUnavailable)
    }

    fn builtin(
        &self,
        name: &str,
        args: &[HostValue],
        selfdict: Option<DictId>,
    ) -> BridgeResult<HostValue> {
        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(BridgeError::host(format!(
                    "E118: Wrong number of arguments for function: {}",
                    name
                )))
            }
        };
        match name {
            "len" => {
                arity(1)?;
                let len = match &args[0] {
                    HostValue::List(list) => self.list_len(*list),
                    HostValue::Dict(dict) => self.dict_len(*dict),
                    other => other.display_scalar().map(|s| s.len()).unwrap_or(0),
                };
                Ok(HostValue::Number(len as i64))
            }
            "has_key" => {
                arity(2)?;
                let HostValue::Dict(dict) = &args[0] else {
                    return Err(BridgeError::host("E715: Dictionary required"));
                };
                let key = args[1].display_scalar().unwrap_or_default();
                Ok(HostValue::Number(i64::from(
                    self.dict_get(*dict, &key).is_some(),
                )))
            }
            "keys" => {
                arity(1)?;
                let HostValue::Dict(dict) = &args[0] else {
                    return Err(BridgeError::host("E715: Dictionary required"));
                };
                let list = self.list_alloc()?;
                for key in self.dict_keys(*dict) {
                    self.list_append(list, HostValue::string(key))?;
                }
                Ok(HostValue::List(list))
            }
            "function" => {
                arity(1)?;
                match &args[0] {
                    HostValue::String(Some(fname)) if !fname.is_empty() => {
                        Ok(HostValue::FuncRef(fname.clone()))
                    }
                    HostValue::FuncRef(fname) => Ok(HostValue::FuncRef(fname.clone())),
                    _ => Err(BridgeError::host("E129: Function name required")),
                }
            }
            "string" => {
                arity(1)?;
                Ok(HostValue::string(self.render(&args[0])))
            }
            "call" => {
                if !(2..=3).contains(&args.len()) {
                    return arity(2).map(|_| HostValue::Unknown);
                }
                let fname = match &args[0] {
                    HostValue::FuncRef(fname) => fname.clone(),
                    other => other.display_scalar().unwrap_or_default(),
                };
                let HostValue::List(list) = &args[1] else {
                    return Err(BridgeError::host("E714: List required"));
                };
                let receiver = match args.get(2) {
                    Some(HostValue::Dict(dict)) => Some(*dict),
                    Some(_) => return Err(BridgeError::host("E715: Dictionary required")),
                    None => selfdict,
                };
                self.call_function(&fname, *list, receiver)
            }
            _ => Err(BridgeError::host(format!(
                "E117: Unknown function: {}",
                name
            ))),
        }
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostServices for MemoryHost {
    fn eval(&self, expr: &str) -> BridgeResult<HostValue> {
        let parsed = host_expr::parse_expr(expr)?;
        host_expr::eval(self, &parsed)
    }

    fn exec(&self, command: &str) -> BridgeResult<()> {
        let parsed = host_expr::parse_command(command)?;
        host_expr::run(self, &parsed)
    }

    fn call_function(
        &self,
        name: &str,
        args: ListId,
        selfdict: Option<DictId>,
    ) -> BridgeResult<HostValue> {
        let args = self.list_items(args)?;
        let function = self.functions.borrow().get(name).cloned();
        match function {
            Some(function) => function(self, &args, selfdict),
            None => self.builtin(name, &args, selfdict),
        }
    }

    fn let_var(&self, name: &str, value: HostValue) -> BridgeResult<()> {
        let target = match host_expr::parse_expr(name) {
            Ok(target) => target,
            Err(err) => {
                self.release(value);
                return Err(err);
            }
        };
        host_expr::assign(self, &target, value)
    }

    fn report_error(&self, message: &str) {
        warn!(target: "vim_v8::host", "{}", message);
        self.errors.borrow_mut().push(message.to_string());
    }

    fn global_vars(&self) -> DictId {
        self.globals
    }

    fn special_vars(&self) -> DictId {
        self.specials
    }

    fn retain(&self, value: &HostValue) {
        let mut arena = self.arena.borrow_mut();
        match value {
            HostValue::List(list) => {
                if let Some(slot) = arena.lists.get_mut(&list.as_raw()) {
                    slot.refcount += 1;
                }
            }
            HostValue::Dict(dict) => {
                if let Some(slot) = arena.dicts.get_mut(&dict.as_raw()) {
                    slot.refcount += 1;
                }
            }
            _ => {}
        }
    }

    fn release(&self, value: HostValue) {
        // Children are released after the borrow ends; freeing recurses.
        let orphans = {
            let mut arena = self.arena.borrow_mut();
            match value {
                HostValue::List(list) => {
                    let raw = list.as_raw();
                    match arena.lists.get_mut(&raw) {
                        Some(slot) if slot.refcount > 1 => {
                            slot.refcount -= 1;
                            Vec::new()
                        }
                        Some(_) => arena
                            .lists
                            .remove(&raw)
                            .map(|slot| slot.items)
                            .unwrap_or_default(),
                        None => Vec::new(),
                    }
                }
                HostValue::Dict(dict) => {
                    let raw = dict.as_raw();
                    match arena.dicts.get_mut(&raw) {
                        Some(slot) if slot.refcount > 1 => {
                            slot.refcount -= 1;
                            Vec::new()
                        }
                        Some(_) => arena
                            .dicts
                            .remove(&raw)
                            .map(|slot| slot.entries.into_values().collect())
                            .unwrap_or_default(),
                        None => Vec::new(),
                    }
                }
                _ => Vec::new(),
            }
        };
        for orphan in orphans {
            self.release(orphan);
        }
    }

    fn refcount(&self, value: &HostValue) -> Option<usize> {
        let arena = self.arena.borrow();
        match value {
            HostValue::List(list) => arena.lists.get(&list.as_raw()).map(|s| s.refcount),
            HostValue::Dict(dict) => arena.dicts.get(&dict.as_raw()).map(|s| s.refcount),
            _ => None,
        }
    }

    fn list_alloc(&self) -> BridgeResult<ListId> {
        let mut arena = self.arena.borrow_mut();
        let id = arena.next_id();
        arena.lists.insert(
            id,
            ListSlot {
                refcount: 1,
                items: Vec::new(),
            },
        );
        Ok(ListId::from_raw(id))
    }

    fn list_len(&self, list: ListId) -> usize {
        self.arena
            .borrow()
            .lists
            .get(&list.as_raw())
            .map_or(0, |slot| slot.items.len())
    }

    fn list_get(&self, list: ListId, index: usize) -> Option<HostValue> {
        self.arena
            .borrow()
            .lists
            .get(&list.as_raw())
            .and_then(|slot| slot.items.get(index).cloned())
    }

    fn list_set(&self, list: ListId, index: usize, value: HostValue) -> BridgeResult<()> {
        let outcome = {
            let mut arena = self.arena.borrow_mut();
            match arena.lists.get_mut(&list.as_raw()) {
                None => Err((BridgeError::HostUnavailable, value)),
                Some(slot) if index < slot.items.len() => {
                    Ok(Some(std::mem::replace(&mut slot.items[index], value)))
                }
                Some(slot) if index == slot.items.len() => {
                    slot.items.push(value);
                    Ok(None)
                }
                Some(slot) => {
                    let len = slot.items.len();
                    Err((BridgeError::IndexOutOfRange { index, len }, value))
                }
            }
        };
        match outcome {
            Ok(previous) => {
                if let Some(previous) = previous {
                    self.release(previous);
                }
                Ok(())
            }
            Err((err, value)) => {
                self.release(value);
                Err(err)
            }
        }
    }

    fn list_append(&self, list: ListId, value: HostValue) -> BridgeResult<()> {
        let len = self.list_len(list);
        self.list_set(list, len, value)
    }

    fn list_remove(&self, list: ListId, index: usize) -> bool {
        let removed = {
            let mut arena = self.arena.borrow_mut();
            arena
                .lists
                .get_mut(&list.as_raw())
                .filter(|slot| index < slot.items.len())
                .map(|slot| slot.items.remove(index))
        };
        match removed {
            Some(value) => {
                self.release(value);
                true
            }
            None => false,
        }
    }

    fn dict_alloc(&self) -> BridgeResult<DictId> {
        let mut arena = self.arena.borrow_mut();
        let id = arena.next_id();
        arena.dicts.insert(
            id,
            DictSlot {
                refcount: 1,
                entries: IndexMap::new(),
            },
        );
        Ok(DictId::from_raw(id))
    }

    fn dict_len(&self, dict: DictId) -> usize {
        self.arena
            .borrow()
            .dicts
            .get(&dict.as_raw())
            .map_or(0, |slot| slot.entries.len())
    }

    fn dict_get(&self, dict: DictId, key: &str) -> Option<HostValue> {
        self.arena
            .borrow()
            .dicts
            .get(&dict.as_raw())
            .and_then(|slot| slot.entries.get(key).cloned())
    }

    fn dict_set(&self, dict: DictId, key: &str, value: HostValue) -> BridgeResult<()> {
        if key.is_empty() {
            self.release(value);
            return Err(BridgeError::EmptyKey);
        }
        let outcome = {
            let mut arena = self.arena.borrow_mut();
            match arena.dicts.get_mut(&dict.as_raw()) {
                Some(slot) => Ok(slot.entries.insert(key.to_string(), value)),
                None => Err(value),
            }
        };
        match outcome {
            Ok(previous) => {
                if let Some(previous) = previous {
                    self.release(previous);
                }
                Ok(())
            }
            Err(value) => {
                self.release(value);
                Err(BridgeError::HostUnavailable)
            }
        }
    }

    fn dict_remove(&self, dict: DictId, key: &str) -> bool {
        let removed = {
            let mut arena = self.arena.borrow_mut();
            arena
                .dicts
                .get_mut(&dict.as_raw())
                .and_then(|slot| slot.entries.shift_remove(key))
        };
        match removed {
            Some(value) => {
                self.release(value);
                true
            }
            None => false,
        }
    }

    fn dict_keys(&self, dict: DictId) -> Vec<String> {
        self.arena
            .borrow()
            .dicts
            .get(&dict.as_raw())
            .map(|slot| slot.entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_let_and_eval() {
        let host = MemoryHost::new();
        host.exec("let g:x = 42").unwrap();
        assert_eq!(host.eval("g:x").unwrap(), HostValue::Number(42));
        assert_eq!(host.eval("x").unwrap(), HostValue::Number(42));

        let err = host.eval("g:missing").unwrap_err();
        assert_eq!(err.to_string(), "E121: Undefined variable: g:missing");
    }

    #[test]
    fn test_nested_assignment_and_json() {
        let host = MemoryHost::new();
        host.exec("let g:d = {'a': [1, 2.5, 'three'], 'b': {}}").unwrap();
        host.exec("let g:d.b.k = 'v'").unwrap();
        host.exec("let g:d['a'][0] = -1").unwrap();

        assert_eq!(
            host.eval_json("g:d").unwrap(),
            json!({"a": [-1, 2.5, "three"], "b": {"k": "v"}})
        );
        assert_eq!(host.eval("len(g:d.a)").unwrap(), HostValue::Number(3));
        assert_eq!(host.eval("has_key(g:d, 'b')").unwrap(), HostValue::Number(1));
    }

    #[test]
    fn test_refcounts_follow_ownership() {
        let host = MemoryHost::new();
        let baseline = host.live_containers();

        let list = host.list_alloc().unwrap();
        let inner = host.dict_alloc().unwrap();
        host.list_append(list, HostValue::Dict(inner)).unwrap();
        assert_eq!(host.refcount(&HostValue::List(list)), Some(1));

        host.let_var("g:l", HostValue::List(list)).unwrap();
        assert_eq!(host.refcount(&HostValue::List(list)), Some(1));

        let owned = host.eval("g:l").unwrap();
        assert_eq!(host.refcount(&owned), Some(2));
        host.release(owned);

        host.exec("unlet g:l").unwrap();
        assert_eq!(host.refcount(&HostValue::List(list)), None);
        assert_eq!(host.refcount(&HostValue::Dict(inner)), None);
        assert_eq!(host.live_containers(), baseline);
    }

    #[test]
    fn test_list_store_bounds() {
        let host = MemoryHost::new();
        let list = host.list_alloc().unwrap();
        host.list_set(list, 0, HostValue::string("a")).unwrap();
        host.list_set(list, 1, HostValue::string("b")).unwrap();
        host.list_set(list, 0, HostValue::string("x")).unwrap();

        let err = host.list_set(list, 5, HostValue::Number(1)).unwrap_err();
        assert!(matches!(err, BridgeError::IndexOutOfRange { index: 5, len: 2 }));

        assert!(host.list_remove(list, 1));
        assert!(!host.list_remove(list, 1));
        assert_eq!(host.list_get(list, 0), Some(HostValue::string("x")));
        assert_eq!(host.list_len(list), 1);
        host.release(HostValue::List(list));
    }

    #[test]
    fn test_failed_store_releases_value() {
        let host = MemoryHost::new();
        let dict = host.dict_alloc().unwrap();
        let child = host.list_alloc().unwrap();

        assert!(matches!(
            host.dict_set(dict, "", HostValue::List(child)),
            Err(BridgeError::EmptyKey)
        ));
        assert_eq!(host.refcount(&HostValue::List(child)), None);
        host.release(HostValue::Dict(dict));
    }

    #[test]
    fn test_dict_order_survives_removal() {
        let host = MemoryHost::new();
        host.set_json("g:d", json!({"a": 1, "b": 2, "c": 3})).unwrap();
        host.exec("unlet g:d.b").unwrap();
        host.exec("let g:d.b = 4").unwrap();
        let HostValue::Dict(dict) = host.dict_get(host.global_vars(), "d").unwrap() else {
            panic!("expected dict");
        };
        assert_eq!(host.dict_keys(dict), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_cycle_release_terminates() {
        let host = MemoryHost::new();
        let baseline = host.live_containers();
        host.exec("let g:a = []").unwrap();
        host.exec("let g:b = {'self': g:a}").unwrap();
        let HostValue::List(a) = host.dict_get(host.global_vars(), "a").unwrap() else {
            panic!("expected list");
        };
        host.list_append(a, host.eval("g:b").unwrap()).unwrap();

        host.exec("unlet g:a").unwrap();
        host.exec("unlet g:b").unwrap();
        // Unreachable cycles leak until collected, like the editor.
        assert_eq!(host.live_containers(), baseline + 2);
        assert!(matches!(host.to_json(&HostValue::List(a)), Err(BridgeError::TooDeep { .. })));
    }

    #[test]
    fn test_functions_and_echo() {
        let host = MemoryHost::new();
        host.define_function("Add", |_, args, _| match args {
            [HostValue::Number(a), HostValue::Number(b)] => Ok(HostValue::Number(a + b)),
            _ => Err(BridgeError::host("E118: Add")),
        });
        host.exec("let g:sum = Add(2, 40)").unwrap();
        host.exec("echo g:sum 'done'").unwrap();
        host.exec("call Add(1, 1)").unwrap();
        assert_eq!(host.messages(), vec!["42 done"]);

        assert!(host.exec("call Missing()").is_err());
        assert!(host.exec("bogus").is_err());
    }

    #[test]
    fn test_execute_and_relay_names() {
        let host = MemoryHost::new();
        host.exec("let v:['%v8_args%'] = ['let g:y = ''relayed''']").unwrap();
        host.exec("execute v:['%v8_args%'][0]").unwrap();
        assert_eq!(host.eval("g:y").unwrap(), HostValue::string("relayed"));
    }

    #[test]
    fn test_json_roundtrip_conventions() {
        let host = MemoryHost::new();
        let value = host.from_json(&json!([null, true, 1.5, "s"])).unwrap();
        assert_eq!(host.to_json(&value).unwrap(), json!([0, 1, 1.5, "s"]));
        host.release(value);

        assert!(matches!(
            host.from_json(&json!({"": 1})),
            Err(BridgeError::EmptyKey)
        ));
        assert_eq!(host.live_containers(), 2);
    }
}
