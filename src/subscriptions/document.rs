//! Parsing of subscription documents.
//!
//! Accepts the subset of GraphQL a subscription request uses:
//!
//! ```text
//! subscription onMessageAdded($groupIds: [Int]) {
//!   messageAdded(groupIds: $groupIds) { id text }
//! }
//! ```
//!
//! Only the root field and its arguments matter; nested selections are
//! checked for well-formedness and then ignored.

use crate::bus::Topic;
use crate::error::{Result, SyncError};
use crate::schema::{self, ArgType};
use serde_json::Value;
use std::collections::BTreeMap;

/// A parsed and coerced subscription request.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionRequest {
    pub topic: Topic,
    /// Coerced argument values, keyed by argument name. Absent arguments
    /// are `Value::Null`.
    pub arguments: BTreeMap<String, Value>,
}

/// Parse `document`, resolve `$variables` from `variables`, and coerce the
/// root field's arguments against the fixed subscription schema.
pub fn parse_subscription(document: &str, variables: &Value) -> Result<SubscriptionRequest> {
    let tokens = lex(document)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: document.len(),
    };
    let operation = parser.operation()?;

    let variables = match variables {
        Value::Null => serde_json::Map::new(),
        Value::Object(map) => map.clone(),
        _ => return Err(SyncError::parse(0, "variables must be an object")),
    };

    let topic: Topic = operation.field.name.parse().map_err(|_| {
        SyncError::parse(
            operation.field.offset,
            format!("unknown subscription field `{}`", operation.field.name),
        )
    })?;
    let declared = schema::subscription_arguments(topic);

    let mut arguments = BTreeMap::new();
    for (name, value, offset) in operation.field.arguments {
        let arg_type = declared
            .iter()
            .find(|(declared_name, _)| *declared_name == name)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| {
                SyncError::parse(offset, format!("unknown argument `{}` on `{}`", name, topic))
            })?;
        if arguments.contains_key(&name) {
            return Err(SyncError::parse(offset, format!("duplicate argument `{}`", name)));
        }
        let resolved = resolve(value, &operation.variables, &variables, offset)?;
        let coerced = coerce(arg_type, resolved, offset)?;
        arguments.insert(name, coerced);
    }

    for (name, _) in declared {
        arguments.entry(name.to_string()).or_insert(Value::Null);
    }

    Ok(SubscriptionRequest { topic, arguments })
}

// --- Coercion ---

fn resolve(
    value: Literal,
    definitions: &[VariableDefinition],
    supplied: &serde_json::Map<String, Value>,
    offset: usize,
) -> Result<Value> {
    match value {
        Literal::Variable(name) => {
            let definition = definitions
                .iter()
                .find(|d| d.name == name)
                .ok_or_else(|| SyncError::parse(offset, format!("undeclared variable `${}`", name)))?;
            match supplied.get(&name) {
                Some(v) => Ok(v.clone()),
                None => match &definition.default {
                    Some(default) => resolve(default.clone(), &[], supplied, offset),
                    None => Ok(Value::Null),
                },
            }
        }
        Literal::Json(v) => Ok(v),
        Literal::List(items) => items
            .into_iter()
            .map(|item| resolve(item, definitions, supplied, offset))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
    }
}

fn coerce(ty: ArgType, value: Value, offset: usize) -> Result<Value> {
    match (ty, value) {
        (_, Value::Null) => Ok(Value::Null),
        (ArgType::Int, v) => coerce_int(&v, offset).map(Value::from),
        (ArgType::IntList, Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                if !item.is_null() {
                    out.push(Value::from(coerce_int(item, offset)?));
                }
            }
            Ok(Value::Array(out))
        }
        // A single value is coerced to a list of one.
        (ArgType::IntList, v) => Ok(Value::Array(vec![Value::from(coerce_int(&v, offset)?)])),
    }
}

fn coerce_int(value: &Value, offset: usize) -> Result<u64> {
    value
        .as_i64()
        .filter(|n| (0..=i64::from(i32::MAX)).contains(n))
        .map(|n| n as u64)
        .ok_or_else(|| SyncError::parse(offset, format!("expected a non-negative Int, got {}", value)))
}

// --- Lexer ---

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Name(String),
    Variable(String),
    Int(i64),
    Float(f64),
    Str(String),
    Punct(char),
}

#[derive(Clone, Debug)]
struct Token {
    tok: Tok,
    offset: usize,
}

fn lex(src: &str) -> Result<Vec<Token>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' | ',' => i += 1,
            '#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '{' | '}' | '(' | ')' | '[' | ']' | ':' | '!' | '=' | '@' => {
                tokens.push(Token { tok: Tok::Punct(c), offset: i });
                i += 1;
            }
            '$' => {
                let start = i;
                i += 1;
                let name = take_name(bytes, &mut i);
                if name.is_empty() {
                    return Err(SyncError::parse(start, "expected variable name after `$`"));
                }
                tokens.push(Token { tok: Tok::Variable(name), offset: start });
            }
            '"' => {
                let start = i;
                i += 1;
                let mut text = String::new();
                loop {
                    match bytes.get(i) {
                        None | Some(b'\n') => {
                            return Err(SyncError::parse(start, "unterminated string"));
                        }
                        Some(b'"') => {
                            i += 1;
                            break;
                        }
                        Some(b'\\') => {
                            let escaped = bytes
                                .get(i + 1)
                                .ok_or_else(|| SyncError::parse(i, "unterminated escape"))?;
                            text.push(match escaped {
                                b'n' => '\n',
                                b't' => '\t',
                                b'"' | b'\\' | b'/' => *escaped as char,
                                _ => return Err(SyncError::parse(i, "invalid escape sequence")),
                            });
                            i += 2;
                        }
                        Some(_) => {
                            // Copy a whole UTF-8 scalar.
                            let ch = src[i..].chars().next().unwrap_or_default();
                            text.push(ch);
                            i += ch.len_utf8().max(1);
                        }
                    }
                }
                tokens.push(Token { tok: Tok::Str(text), offset: start });
            }
            '-' | '0'..='9' => {
                let start = i;
                i += 1;
                let mut is_float = false;
                while i < bytes.len() {
                    match bytes[i] {
                        b'0'..=b'9' => i += 1,
                        b'.' | b'e' | b'E' | b'+' => {
                            is_float = true;
                            i += 1;
                        }
                        b'-' if is_float => i += 1,
                        _ => break,
                    }
                }
                let text = &src[start..i];
                let tok = if is_float {
                    text.parse().map(Tok::Float).ok()
                } else {
                    text.parse().map(Tok::Int).ok()
                };
                let tok = tok.ok_or_else(|| SyncError::parse(start, format!("invalid number `{}`", text)))?;
                tokens.push(Token { tok, offset: start });
            }
            c if c == '_' || c.is_ascii_alphabetic() => {
                let start = i;
                let name = take_name(bytes, &mut i);
                tokens.push(Token { tok: Tok::Name(name), offset: start });
            }
            other => {
                return Err(SyncError::parse(i, format!("unexpected character `{}`", other)));
            }
        }
    }

    Ok(tokens)
}

fn take_name(bytes: &[u8], i: &mut usize) -> String {
    let start = *i;
    while *i < bytes.len() && (bytes[*i] == b'_' || bytes[*i].is_ascii_alphanumeric()) {
        *i += 1;
    }
    String::from_utf8_lossy(&bytes[start..*i]).into_owned()
}

// --- Parser ---

#[derive(Clone, Debug)]
enum Literal {
    Variable(String),
    Json(Value),
    List(Vec<Literal>),
}

struct VariableDefinition {
    name: String,
    default: Option<Literal>,
}

struct RootField {
    name: String,
    offset: usize,
    arguments: Vec<(String, Literal, usize)>,
}

struct Operation {
    variables: Vec<VariableDefinition>,
    field: RootField,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|t| t.offset).unwrap_or(self.end)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| SyncError::parse(self.end, "unexpected end of document"))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(&Tok::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        let offset = self.offset();
        if self.eat(c) {
            Ok(())
        } else {
            Err(SyncError::parse(offset, format!("expected `{}`", c)))
        }
    }

    fn name(&mut self) -> Result<(String, usize)> {
        let token = self.next()?;
        match token.tok {
            Tok::Name(name) => Ok((name, token.offset)),
            _ => Err(SyncError::parse(token.offset, "expected a name")),
        }
    }

    fn operation(&mut self) -> Result<Operation> {
        let (keyword, offset) = self.name()?;
        if keyword != "subscription" {
            return Err(SyncError::parse(offset, "expected a subscription operation"));
        }
        if matches!(self.peek(), Some(Tok::Name(_))) {
            self.name()?;
        }

        let mut variables = Vec::new();
        if self.eat('(') {
            while !self.eat(')') {
                variables.push(self.variable_definition()?);
            }
        }
        self.directives()?;

        self.expect('{')?;
        let field = self.root_field()?;
        if !self.eat('}') {
            return Err(SyncError::parse(
                self.offset(),
                "a subscription must select exactly one root field",
            ));
        }

        if self.pos != self.tokens.len() {
            return Err(SyncError::parse(self.offset(), "unexpected content after operation"));
        }

        Ok(Operation { variables, field })
    }

    fn variable_definition(&mut self) -> Result<VariableDefinition> {
        let token = self.next()?;
        let name = match token.tok {
            Tok::Variable(name) => name,
            _ => return Err(SyncError::parse(token.offset, "expected a variable definition")),
        };
        self.expect(':')?;
        self.type_ref()?;
        let default = if self.eat('=') { Some(self.value()?) } else { None };
        Ok(VariableDefinition { name, default })
    }

    fn type_ref(&mut self) -> Result<()> {
        if self.eat('[') {
            self.type_ref()?;
            self.expect(']')?;
        } else {
            self.name()?;
        }
        self.eat('!');
        Ok(())
    }

    fn directives(&mut self) -> Result<()> {
        while self.eat('@') {
            self.name()?;
            if self.peek() == Some(&Tok::Punct('(')) {
                self.arguments()?;
            }
        }
        Ok(())
    }

    fn root_field(&mut self) -> Result<RootField> {
        let (mut name, mut offset) = self.name()?;
        if self.eat(':') {
            (name, offset) = self.name()?;
        }
        let arguments = if self.peek() == Some(&Tok::Punct('(')) {
            self.arguments()?
        } else {
            Vec::new()
        };
        self.directives()?;
        self.expect('{')?;
        self.selection_set_body()?;
        Ok(RootField { name, offset, arguments })
    }

    /// Skips a selection set whose opening brace was consumed.
    fn selection_set_body(&mut self) -> Result<()> {
        let mut selected = false;
        while !self.eat('}') {
            self.name()?;
            if self.eat(':') {
                self.name()?;
            }
            if self.peek() == Some(&Tok::Punct('(')) {
                self.arguments()?;
            }
            self.directives()?;
            if self.eat('{') {
                self.selection_set_body()?;
            }
            selected = true;
        }
        if !selected {
            return Err(SyncError::parse(self.offset(), "empty selection set"));
        }
        Ok(())
    }

    fn arguments(&mut self) -> Result<Vec<(String, Literal, usize)>> {
        self.expect('(')?;
        let mut args = Vec::new();
        while !self.eat(')') {
            let (name, offset) = self.name()?;
            self.expect(':')?;
            args.push((name, self.value()?, offset));
        }
        Ok(args)
    }

    fn value(&mut self) -> Result<Literal> {
        let token = self.next()?;
        Ok(match token.tok {
            Tok::Variable(name) => Literal::Variable(name),
            Tok::Int(n) => Literal::Json(Value::from(n)),
            Tok::Float(f) => Literal::Json(Value::from(f)),
            Tok::Str(s) => Literal::Json(Value::String(s)),
            Tok::Name(name) => Literal::Json(match name.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                _ => Value::String(name),
            }),
            Tok::Punct('[') => {
                let mut items = Vec::new();
                while !self.eat(']') {
                    items.push(self.value()?);
                }
                Literal::List(items)
            }
            Tok::Punct('{') => {
                // Input objects are not used by any subscription argument.
                while !self.eat('}') {
                    self.name()?;
                    self.expect(':')?;
                    self.value()?;
                }
                Literal::Json(Value::Object(serde_json::Map::new()))
            }
            _ => return Err(SyncError::parse(token.offset, "expected a value")),
        })
    }
}
