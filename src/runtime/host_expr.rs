//! Expression and command language understood by [`MemoryHost`].
//!
//! A deliberately small subset of the editor's own language: enough to read
//! and assign variables, index containers, call registered functions and echo
//! values, so bridge behaviour can be driven and observed from tests.
//!
//! ```text
//! expr    := postfix
//! postfix := primary ( "[" expr "]" | "." ident )*
//! primary := number | float | 'str' | "str" | "[" exprs "]"
//!          | "{" (expr ":" expr),* "}" | "(" expr ")"
//!          | "g:" | "v:" | scope:name | name | name "(" exprs ")"
//! command := "let" postfix "=" expr | "unlet" postfix | "echo" exprs
//!          | "call" expr | "execute" expr | ""
//! ```

use super::error::{BridgeError, BridgeResult};
use super::host::HostServices;
use super::host_value::{DictId, HostValue};
use super::memory_host::MemoryHost;

/// Variable scope prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Scope {
    Global,
    Special,
}

impl Scope {
    fn prefix(self) -> &'static str {
        match self {
            Scope::Global => "g:",
            Scope::Special => "v:",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Expr {
    Number(i64),
    Float(f64),
    Str(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    ScopeDict(Scope),
    Var(Scope, String),
    Index(Box<Expr>, Box<Expr>),
    Field(Box<Expr>, String),
    Call(String, Vec<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Command {
    Let(Expr, Expr),
    Unlet(Expr),
    Echo(Vec<Expr>),
    Call(Expr),
    Execute(Expr),
    Nop,
}

fn syntax_error(src: &str) -> BridgeError {
    BridgeError::host(format!("E15: Invalid expression: {}", src))
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> BridgeResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(syntax_error(self.src))
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.chars.len()
    }

    fn rest(&self) -> String {
        self.chars[self.pos.min(self.chars.len())..].iter().collect()
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '#') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn expr(&mut self) -> BridgeResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('[') => {
                    self.pos += 1;
                    let index = self.expr()?;
                    self.expect(']')?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Some('.') => {
                    self.pos += 1;
                    let key = self.word();
                    if key.is_empty() {
                        return Err(syntax_error(self.src));
                    }
                    expr = Expr::Field(Box::new(expr), key);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn exprs_until(&mut self, close: char) -> BridgeResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(',')?;
        }
    }

    fn primary(&mut self) -> BridgeResult<Expr> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == '-' => self.number(),
            Some('\'') => self.single_quoted().map(Expr::Str),
            Some('"') => self.double_quoted().map(Expr::Str),
            Some('[') => {
                self.pos += 1;
                self.exprs_until(']').map(Expr::List)
            }
            Some('{') => {
                self.pos += 1;
                let mut entries = Vec::new();
                if self.eat('}') {
                    return Ok(Expr::Dict(entries));
                }
                loop {
                    let key = self.expr()?;
                    self.expect(':')?;
                    let value = self.expr()?;
                    entries.push((key, value));
                    if self.eat('}') {
                        return Ok(Expr::Dict(entries));
                    }
                    self.expect(',')?;
                }
            }
            Some('(') => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(')')?;
                Ok(inner)
            }
            Some(c) if c.is_alphabetic() || c == '_' => self.name(),
            _ => Err(syntax_error(self.src)),
        }
    }

    fn name(&mut self) -> BridgeResult<Expr> {
        let word = self.word();
        let scope = match word.as_str() {
            "g" => Some(Scope::Global),
            "v" => Some(Scope::Special),
            _ => None,
        };
        if let Some(scope) = scope {
            if self.peek() == Some(':') {
                self.pos += 1;
                let name = self.word();
                return Ok(if name.is_empty() {
                    Expr::ScopeDict(scope)
                } else {
                    Expr::Var(scope, name)
                });
            }
        }
        self.skip_ws();
        if self.peek() == Some('(') {
            self.pos += 1;
            let args = self.exprs_until(')')?;
            return Ok(Expr::Call(word, args));
        }
        Ok(Expr::Var(Scope::Global, word))
    }

    fn number(&mut self) -> BridgeResult<Expr> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some('.')
            && matches!(self.chars.get(self.pos + 1), Some(c) if c.is_ascii_digit())
        {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            text.parse().map(Expr::Float).map_err(|_| syntax_error(self.src))
        } else {
            text.parse().map(Expr::Number).map_err(|_| syntax_error(self.src))
        }
    }

    fn single_quoted(&mut self) -> BridgeResult<String> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(syntax_error(self.src)),
                Some('\'') => {
                    self.pos += 1;
                    if self.peek() == Some('\'') {
                        out.push('\'');
                        self.pos += 1;
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn double_quoted(&mut self) -> BridgeResult<String> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(syntax_error(self.src)),
                Some('"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| syntax_error(self.src))?;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    self.pos += 1;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }
}

/// Parse a complete expression.
pub(crate) fn parse_expr(src: &str) -> BridgeResult<Expr> {
    let mut parser = Parser::new(src);
    let expr = parser.expr()?;
    if !parser.at_end() {
        return Err(BridgeError::host(format!(
            "E488: Trailing characters: {}",
            parser.rest()
        )));
    }
    Ok(expr)
}

/// Parse a command line.
pub(crate) fn parse_command(src: &str) -> BridgeResult<Command> {
    let mut parser = Parser::new(src);
    if parser.at_end() {
        return Ok(Command::Nop);
    }
    let keyword = parser.word();
    let command = match keyword.as_str() {
        "let" => {
            let target = parser.expr()?;
            parser.expect('=')?;
            Command::Let(target, parser.expr()?)
        }
        "unlet" => Command::Unlet(parser.expr()?),
        "echo" => {
            let mut exprs = Vec::new();
            while !parser.at_end() {
                exprs.push(parser.expr()?);
            }
            Command::Echo(exprs)
        }
        "call" => Command::Call(parser.expr()?),
        "execute" | "exe" => Command::Execute(parser.expr()?),
        _ => {
            return Err(BridgeError::host(format!(
                "E492: Not an editor command: {}",
                src.trim()
            )))
        }
    };
    if !parser.at_end() {
        return Err(BridgeError::host(format!(
            "E488: Trailing characters: {}",
            parser.rest()
        )));
    }
    Ok(command)
}

/// Where an assignment or `unlet` lands.
enum Place {
    Dict(DictId, String),
    List(HostValue, i64),
}

fn scope_dict(host: &MemoryHost, scope: Scope) -> DictId {
    match scope {
        Scope::Global => host.global_vars(),
        Scope::Special => host.special_vars(),
    }
}

/// Evaluate `expr` to an owned value.
pub(crate) fn eval(host: &MemoryHost, expr: &Expr) -> BridgeResult<HostValue> {
    match expr {
        Expr::Number(n) => Ok(HostValue::Number(*n)),
        Expr::Float(f) => Ok(HostValue::Float(*f)),
        Expr::Str(s) => Ok(HostValue::string(s.clone())),
        Expr::List(items) => {
            let list = host.list_alloc()?;
            for item in items {
                if let Err(err) = eval(host, item).and_then(|value| host.list_append(list, value)) {
                    host.release(HostValue::List(list));
                    return Err(err);
                }
            }
            Ok(HostValue::List(list))
        }
        Expr::Dict(entries) => {
            let dict = host.dict_alloc()?;
            for (key, value) in entries {
                let entry = eval_key(host, key).and_then(|key| Ok((key, eval(host, value)?)));
                match entry {
                    Ok((key, value)) => {
                        if let Err(err) = host.dict_set(dict, &key, value) {
                            host.release(HostValue::Dict(dict));
                            return Err(err);
                        }
                    }
                    Err(err) => {
                        host.release(HostValue::Dict(dict));
                        return Err(err);
                    }
                }
            }
            Ok(HostValue::Dict(dict))
        }
        Expr::ScopeDict(scope) => {
            let value = HostValue::Dict(scope_dict(host, *scope));
            host.retain(&value);
            Ok(value)
        }
        Expr::Var(scope, name) => {
            let value = host
                .dict_get(scope_dict(host, *scope), name)
                .ok_or_else(|| {
                    BridgeError::host(format!(
                        "E121: Undefined variable: {}{}",
                        scope.prefix(),
                        name
                    ))
                })?;
            host.retain(&value);
            Ok(value)
        }
        Expr::Index(base, index) => {
            let base = eval(host, base)?;
            let result = eval(host, index).and_then(|index| subscript(host, &base, &index));
            host.release(base);
            result
        }
        Expr::Field(base, key) => {
            let base = eval(host, base)?;
            let result = subscript(host, &base, &HostValue::string(key.clone()));
            host.release(base);
            result
        }
        Expr::Call(name, args) => {
            let list = host.list_alloc()?;
            for arg in args {
                if let Err(err) = eval(host, arg).and_then(|value| host.list_append(list, value)) {
                    host.release(HostValue::List(list));
                    return Err(err);
                }
            }
            let result = host.call_function(name, list, None);
            host.release(HostValue::List(list));
            result
        }
    }
}

fn eval_key(host: &MemoryHost, expr: &Expr) -> BridgeResult<String> {
    let key = eval(host, expr)?;
    let text = key.display_scalar();
    host.release(key);
    text.ok_or_else(|| BridgeError::host("E731: using Dictionary as a String"))
}

fn list_index(len: usize, index: i64) -> Option<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

/// Read `base[index]` as an owned value.
fn subscript(host: &MemoryHost, base: &HostValue, index: &HostValue) -> BridgeResult<HostValue> {
    let value = match base {
        HostValue::List(list) => {
            let HostValue::Number(n) = index else {
                return Err(BridgeError::host("E745: Using a List as a Number"));
            };
            list_index(host.list_len(*list), *n)
                .and_then(|i| host.list_get(*list, i))
                .ok_or_else(|| BridgeError::host(format!("E684: list index out of range: {}", n)))?
        }
        HostValue::Dict(dict) => {
            let key = index
                .display_scalar()
                .ok_or_else(|| BridgeError::host("E731: using Dictionary as a String"))?;
            host.dict_get(*dict, &key).ok_or_else(|| {
                BridgeError::host(format!("E716: Key not present in Dictionary: {}", key))
            })?
        }
        _ => return Err(BridgeError::host("E689: Can only index a List or Dictionary")),
    };
    host.retain(&value);
    Ok(value)
}

/// Resolve an assignment target. The returned place may own a container
/// reference that [`release_place`] gives back.
fn resolve_place(host: &MemoryHost, target: &Expr) -> BridgeResult<Place> {
    match target {
        Expr::Var(scope, name) => Ok(Place::Dict(scope_dict(host, *scope), name.clone())),
        Expr::Index(base, index) => {
            let base = eval(host, base)?;
            let index = match eval(host, index) {
                Ok(index) => index,
                Err(err) => {
                    host.release(base);
                    return Err(err);
                }
            };
            place_in(host, base, index)
        }
        Expr::Field(base, key) => {
            let base = eval(host, base)?;
            place_in(host, base, HostValue::string(key.clone()))
        }
        _ => Err(BridgeError::host("E461: Illegal variable name")),
    }
}

fn place_in(host: &MemoryHost, base: HostValue, index: HostValue) -> BridgeResult<Place> {
    match (&base, &index) {
        (HostValue::Dict(dict), key) => {
            let dict = *dict;
            let key = key.display_scalar();
            host.release(base);
            host.release(index);
            key.map(|key| Place::Dict(dict, key))
                .ok_or_else(|| BridgeError::host("E731: using Dictionary as a String"))
        }
        (HostValue::List(_), HostValue::Number(n)) => Ok(Place::List(base, *n)),
        _ => {
            host.release(base);
            host.release(index);
            Err(BridgeError::host("E689: Can only index a List or Dictionary"))
        }
    }
}

fn release_place(host: &MemoryHost, place: Place) {
    if let Place::List(base, _) = place {
        host.release(base);
    }
}

/// Move `value` into the variable or container slot named by `target`.
pub(crate) fn assign(host: &MemoryHost, target: &Expr, value: HostValue) -> BridgeResult<()> {
    let place = match resolve_place(host, target) {
        Ok(place) => place,
        Err(err) => {
            host.release(value);
            return Err(err);
        }
    };
    let result = match &place {
        Place::Dict(dict, key) => host.dict_set(*dict, key, value),
        Place::List(HostValue::List(list), n) => match list_index(host.list_len(*list), *n) {
            Some(i) => host.list_set(*list, i, value),
            None => {
                host.release(value);
                Err(BridgeError::host(format!("E684: list index out of range: {}", n)))
            }
        },
        Place::List(..) => {
            host.release(value);
            Err(BridgeError::host("E689: Can only index a List or Dictionary"))
        }
    };
    release_place(host, place);
    result
}

fn unlet(host: &MemoryHost, target: &Expr) -> BridgeResult<()> {
    let place = resolve_place(host, target)?;
    let removed = match &place {
        Place::Dict(dict, key) => host.dict_remove(*dict, key),
        Place::List(HostValue::List(list), n) => list_index(host.list_len(*list), *n)
            .map(|i| host.list_remove(*list, i))
            .unwrap_or(false),
        Place::List(..) => false,
    };
    release_place(host, place);
    if removed {
        Ok(())
    } else {
        Err(BridgeError::host("E108: No such variable"))
    }
}

/// Execute a parsed command line.
pub(crate) fn run(host: &MemoryHost, command: &Command) -> BridgeResult<()> {
    match command {
        Command::Nop => Ok(()),
        Command::Let(target, expr) => {
            let value = eval(host, expr)?;
            assign(host, target, value)
        }
        Command::Unlet(target) => unlet(host, target),
        Command::Echo(exprs) => {
            let mut parts = Vec::with_capacity(exprs.len());
            for expr in exprs {
                let value = eval(host, expr)?;
                parts.push(host.render(&value));
                host.release(value);
            }
            host.echo(parts.join(" "));
            Ok(())
        }
        Command::Call(expr) => {
            let value = eval(host, expr)?;
            host.release(value);
            Ok(())
        }
        Command::Execute(expr) => {
            let value = eval(host, expr)?;
            let line = value.display_scalar();
            host.release(value);
            match line {
                Some(line) => host.exec(&line),
                None => Err(BridgeError::host("E730: using List as a String")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variables_and_scopes() {
        assert_eq!(parse_expr("g:foo").unwrap(), Expr::Var(Scope::Global, "foo".into()));
        assert_eq!(parse_expr("foo").unwrap(), Expr::Var(Scope::Global, "foo".into()));
        assert_eq!(parse_expr("v:").unwrap(), Expr::ScopeDict(Scope::Special));
        assert_eq!(
            parse_expr("v:['%v8_args%'][0]").unwrap(),
            Expr::Index(
                Box::new(Expr::Index(
                    Box::new(Expr::ScopeDict(Scope::Special)),
                    Box::new(Expr::Str("%v8_args%".into()))
                )),
                Box::new(Expr::Number(0))
            )
        );
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse_expr("-12").unwrap(), Expr::Number(-12));
        assert_eq!(parse_expr("1.5").unwrap(), Expr::Float(1.5));
        assert_eq!(parse_expr("'it''s'").unwrap(), Expr::Str("it's".into()));
        assert_eq!(parse_expr(r#""a\"b""#).unwrap(), Expr::Str("a\"b".into()));
        assert_eq!(
            parse_expr("[1, 'x']").unwrap(),
            Expr::List(vec![Expr::Number(1), Expr::Str("x".into())])
        );
        assert_eq!(
            parse_expr("{'k': 2}").unwrap(),
            Expr::Dict(vec![(Expr::Str("k".into()), Expr::Number(2))])
        );
    }

    #[test]
    fn test_parse_calls_and_fields() {
        assert_eq!(
            parse_expr("len(g:l)").unwrap(),
            Expr::Call("len".into(), vec![Expr::Var(Scope::Global, "l".into())])
        );
        assert_eq!(
            parse_expr("g:d.key").unwrap(),
            Expr::Field(Box::new(Expr::Var(Scope::Global, "d".into())), "key".into())
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_expr("'open").is_err());
        assert!(parse_expr("1 2").is_err());
        assert!(parse_command("frobnicate").is_err());
        assert_eq!(parse_command("   ").unwrap(), Command::Nop);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("let g:x = 1").unwrap(),
            Command::Let(Expr::Var(Scope::Global, "x".into()), Expr::Number(1))
        );
        assert_eq!(
            parse_command("unlet g:x").unwrap(),
            Command::Unlet(Expr::Var(Scope::Global, "x".into()))
        );
        assert_eq!(
            parse_command("echo 1 'a'").unwrap(),
            Command::Echo(vec![Expr::Number(1), Expr::Str("a".into())])
        );
    }
}
