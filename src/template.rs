//! Template engine
//!
//! Expands `{{ ... }}` actions in a template body. An action is a pipeline
//! of commands separated by `|`; the result of each command is passed as
//! the last argument of the next one.
//!
//! ```text
//! image: {{ .Values.image.repo }}:{{ .Values.image.tag | default "latest" }}
//! token: {{ vault "api" "token" | b64enc }}
//! ```
//!
//! The data root has three fields: `.Values` (effective step values),
//! `.Get` (values passed by earlier actions) and `.Env` (process
//! environment). `{{-` and `-}}` trim whitespace before and after the
//! action, `{{/* ... */}}` is a comment.

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use jobkit::{Expander, Expansion, FuncMap};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::sync::LazyLock;

static RE_ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{(-\s)?(.*?)(\s-)?\}\}").unwrap());
static RE_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Functions implemented by the engine itself
const BUILTINS: &[&str] = &[
    "b64dec", "b64enc", "default", "indent", "lower", "nindent", "quote", "required", "toJson",
    "toYaml", "trim", "upper",
];

/// [`Expander`] for `{{ }}` templates
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateEngine;

impl Expander for TemplateEngine {
    fn expand(&self, input: &Expansion<'_>) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(input.body)
            .with_context(|| format!("{}: template is not UTF-8", input.path.display()))?;
        let scope = Scope::new(input);

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut trim_next = false;
        for caps in RE_ACTION.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let mut literal = &text[last..whole.start()];
            if trim_next {
                literal = literal.trim_start();
            }
            if caps.get(1).is_some() {
                literal = literal.trim_end();
            }
            out.push_str(literal);
            trim_next = caps.get(3).is_some();
            last = whole.end();

            let expr = caps.get(2).map_or("", |m| m.as_str()).trim();
            if expr.starts_with("/*") && expr.ends_with("*/") {
                continue;
            }
            let rendered = scope.eval(expr).with_context(|| {
                let line = text[..whole.start()].matches('\n').count() + 1;
                format!("{}:{line}: {{{{ {expr} }}}}", input.path.display())
            })?;
            out.push_str(&rendered);
        }

        let mut rest = &text[last..];
        if trim_next {
            rest = rest.trim_start();
        }
        out.push_str(rest);
        Ok(out.into_bytes())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Pipe,
}

/// Data and functions of one expansion
struct Scope<'a> {
    root: Value,
    functions: &'a FuncMap<'a>,
}

impl<'a> Scope<'a> {
    fn new(input: &Expansion<'a>) -> Self {
        let env: Mapping = input
            .environ
            .iter()
            .map(|(k, v)| (Value::String(k.clone()), Value::String(v.clone())))
            .collect();
        let mut root = Mapping::new();
        root.insert("Values".into(), Value::Mapping(input.values.as_mapping().clone()));
        root.insert("Get".into(), Value::Mapping(input.passed.as_mapping().clone()));
        root.insert("Env".into(), Value::Mapping(env));
        Self {
            root: Value::Mapping(root),
            functions: input.functions,
        }
    }

    /// Evaluate an action and render its result
    fn eval(&self, expr: &str) -> Result<String> {
        let tokens = tokenize(expr)?;
        let mut acc = None;
        for command in tokens.split(|t| *t == Token::Pipe) {
            if command.is_empty() {
                anyhow::bail!("missing command in pipeline");
            }
            acc = Some(self.command(command, acc)?);
        }
        match acc {
            None => anyhow::bail!("empty action"),
            Some(Value::Null) => anyhow::bail!("no value"),
            Some(value) => render(&value),
        }
    }

    fn command(&self, command: &[Token], piped: Option<Value>) -> Result<Value> {
        let (head, args) = command.split_first().context("missing command")?;
        if let Token::Word(name) = head
            && is_function(name)
        {
            let mut values = args.iter().map(|t| self.term(t)).collect::<Result<Vec<_>>>()?;
            values.extend(piped);
            return self.call(name, &values);
        }

        if !args.is_empty() {
            anyhow::bail!("unexpected argument after {}", describe(head));
        }
        if piped.is_some() {
            anyhow::bail!("cannot pipe into {}", describe(head));
        }
        self.term(head)
    }

    fn term(&self, token: &Token) -> Result<Value> {
        match token {
            Token::Str(s) => Ok(Value::String(s.clone())),
            Token::Word(w) if w.starts_with('.') => Ok(self.path(w)),
            Token::Word(w) => match w.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "nil" => Ok(Value::Null),
                _ => {
                    if let Ok(n) = w.parse::<i64>() {
                        Ok(Value::from(n))
                    } else if let Ok(f) = w.parse::<f64>() {
                        Ok(Value::from(f))
                    } else if is_function(w) {
                        anyhow::bail!("function {w} used as an argument")
                    } else {
                        anyhow::bail!("unexpected {w:?}")
                    }
                }
            },
            Token::Pipe => anyhow::bail!("unexpected |"),
        }
    }

    /// Resolve a dotted path; missing segments give null
    fn path(&self, path: &str) -> Value {
        let mut current = &self.root;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let next = match current {
                Value::Mapping(m) => m.get(segment),
                Value::Sequence(s) => segment.parse::<usize>().ok().and_then(|i| s.get(i)),
                _ => None,
            };
            match next {
                Some(v) => current = v,
                None => return Value::Null,
            }
        }
        current.clone()
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let value = match (name, args) {
            ("default", [fallback, value]) => {
                if is_empty(value) {
                    fallback.clone()
                } else {
                    value.clone()
                }
            }
            ("required", [message, value]) => {
                if is_empty(value) {
                    anyhow::bail!("{}", render(message)?);
                }
                value.clone()
            }
            ("quote", [value]) => Value::String(serde_json::to_string(&render(value)?)?),
            ("indent", [n, value]) => Value::String(indent(count(n)?, &render(value)?)),
            ("nindent", [n, value]) => {
                Value::String(format!("\n{}", indent(count(n)?, &render(value)?)))
            }
            ("b64enc", [value]) => Value::String(STANDARD.encode(render(value)?)),
            ("b64dec", [value]) => {
                let bytes = STANDARD
                    .decode(render(value)?.trim())
                    .context("b64dec: invalid base64")?;
                Value::String(String::from_utf8(bytes).context("b64dec: not UTF-8")?)
            }
            ("upper", [value]) => Value::String(render(value)?.to_uppercase()),
            ("lower", [value]) => Value::String(render(value)?.to_lowercase()),
            ("trim", [value]) => Value::String(render(value)?.trim().to_string()),
            ("toYaml", [value]) => {
                Value::String(serde_yaml::to_string(value)?.trim_end().to_string())
            }
            ("toJson", [value]) => Value::String(serde_json::to_string(value)?),
            (name, args) if BUILTINS.contains(&name) => {
                anyhow::bail!("{name}: wrong number of arguments: {}", args.len())
            }
            (name, args) => {
                let args = args.iter().map(render).collect::<Result<Vec<_>>>()?;
                Value::String(self.functions.call(name, &args)?)
            }
        };
        Ok(value)
    }
}

fn is_function(word: &str) -> bool {
    RE_IDENT.is_match(word) && !matches!(word, "true" | "false" | "nil")
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(w) => w.clone(),
        Token::Str(s) => format!("{s:?}"),
        Token::Pipe => "|".to_string(),
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => anyhow::bail!("unterminated string"),
                        },
                        Some(ch) => s.push(ch),
                        None => anyhow::bail!("unterminated string"),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '`' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('`') => break,
                        Some(ch) => s.push(ch),
                        None => anyhow::bail!("unterminated raw string"),
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '|' | '"' | '`') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

/// Text form of a value; collections render as flow style
fn render(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(_) | Value::Mapping(_) => serde_json::to_string(value)?,
        Value::Tagged(tagged) => render(&tagged.value)?,
    })
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Sequence(s) => s.is_empty(),
        Value::Mapping(m) => m.is_empty(),
        Value::Tagged(tagged) => is_empty(&tagged.value),
    }
}

fn count(value: &Value) -> Result<usize> {
    let n = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.and_then(|n| usize::try_from(n).ok())
        .with_context(|| format!("expected a count, got {}", render(value).unwrap_or_default()))
}

fn indent(n: usize, text: &str) -> String {
    let pad = " ".repeat(n);
    text.lines()
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
