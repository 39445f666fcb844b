//! IG-020: Rule template language.
//!
//! Text with `{{ expr }}` actions. An expression is a literal, a data field
//! (`.Self`, `.Source`, `.Target`, optionally with `.Name` and friends), a
//! parenthesised expression, or a call `fn arg...`. A template that is a
//! single action evaluates to a typed JSON value; anything else renders to a
//! string.
//!
//! Graph and property functions are provided through [`TemplateFunctions`]
//! so the same template runs against the live graph and against the
//! dependency capturer.

use crate::core::types::{ResourceId, SimpleEdge};
use serde_json::Value;

/// Functions a template may call that need the solution graph.
pub trait TemplateFunctions {
    fn field_value(&mut self, field: &str, resource: &ResourceId) -> Result<Value, String>;
    fn has_field(&mut self, field: &str, resource: &ResourceId) -> Result<bool, String>;
    fn upstream(&mut self, selector: &ResourceId, resource: &ResourceId) -> Result<ResourceId, String>;
    fn downstream(&mut self, selector: &ResourceId, resource: &ResourceId)
        -> Result<ResourceId, String>;
    fn has_upstream(&mut self, selector: &ResourceId, resource: &ResourceId) -> Result<bool, String>;
    fn has_downstream(&mut self, selector: &ResourceId, resource: &ResourceId)
        -> Result<bool, String>;
    fn all_upstream(&mut self, selector: &ResourceId, resource: &ResourceId)
        -> Result<Vec<ResourceId>, String>;
    fn all_downstream(
        &mut self,
        selector: &ResourceId,
        resource: &ResourceId,
    ) -> Result<Vec<ResourceId>, String>;
    fn closest_downstream(
        &mut self,
        selector: &ResourceId,
        resource: &ResourceId,
    ) -> Result<ResourceId, String>;
}

/// Data visible to a template as `.Self`, `.Source` and `.Target`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateData {
    pub resource: Option<ResourceId>,
    pub edge: Option<SimpleEdge>,
}

impl TemplateData {
    pub fn for_resource(id: &ResourceId) -> Self {
        TemplateData {
            resource: Some(id.clone()),
            edge: None,
        }
    }

    pub fn for_edge(edge: &SimpleEdge) -> Self {
        TemplateData {
            resource: None,
            edge: Some(edge.clone()),
        }
    }

    pub fn with_edge(mut self, edge: &SimpleEdge) -> Self {
        self.edge = Some(edge.clone());
        self
    }

    fn field(&self, path: &[String]) -> Result<Value, String> {
        let (head, rest) = path
            .split_first()
            .ok_or_else(|| "empty data field".to_string())?;
        let id = match head.as_str() {
            "Self" => self.resource.as_ref().ok_or("no .Self is set")?,
            "Source" => &self.edge.as_ref().ok_or("no .Source is set")?.source,
            "Target" => &self.edge.as_ref().ok_or("no .Target is set")?.target,
            other => return Err(format!("unknown data field .{}", other)),
        };
        match rest {
            [] => Ok(Value::String(id.to_string())),
            [sub] => match sub.as_str() {
                "Name" => Ok(Value::String(id.name.clone())),
                "Type" => Ok(Value::String(id.type_name.clone())),
                "Provider" => Ok(Value::String(id.provider.clone())),
                "Namespace" => Ok(Value::String(id.namespace.clone())),
                other => Err(format!("unknown id field .{}.{}", head, other)),
            },
            _ => Err(format!("data field .{} is too deep", path.join("."))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Field(Vec<String>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Action(Expr),
}

/// Parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(src: &str) -> Result<Template, String> {
        let mut parts = Vec::new();
        let mut rest = src;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(Part::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| format!("unclosed action in template '{}'", src))?;
            let tokens = tokenize(after[..end].trim_matches('-'))?;
            let mut pos = 0;
            let expr = parse_pipeline(&tokens, &mut pos)
                .map_err(|e| format!("template '{}': {}", src, e))?;
            if pos != tokens.len() {
                return Err(format!("template '{}': unexpected '{}'", src, tokens[pos]));
            }
            parts.push(Part::Action(expr));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }
        Ok(Template { parts })
    }

    /// Whether the template contains any action.
    pub fn is_dynamic(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Action(_)))
    }

    pub fn execute(
        &self,
        funcs: &mut dyn TemplateFunctions,
        data: &TemplateData,
    ) -> Result<Value, String> {
        if let [Part::Action(expr)] = self.parts.as_slice() {
            return eval(expr, funcs, data);
        }
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::Action(expr) => out.push_str(&render(&eval(expr, funcs, data)?)),
            }
        }
        Ok(Value::String(out))
    }
}

pub fn render(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn tokenize(s: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' => {
                tokens.push(c.to_string());
                chars.next();
            }
            '"' => {
                chars.next();
                let mut lit = String::from("\"");
                loop {
                    match chars.next() {
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                lit.push(escaped);
                            }
                        }
                        Some('"') => break,
                        Some(ch) => lit.push(ch),
                        None => return Err(format!("unterminated string in '{}'", s)),
                    }
                }
                tokens.push(lit);
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || ch == '(' || ch == ')' {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(word);
            }
        }
    }
    Ok(tokens)
}

fn parse_pipeline(tokens: &[String], pos: &mut usize) -> Result<Expr, String> {
    let first = tokens.get(*pos).ok_or("empty expression")?;
    if is_ident(first) {
        let name = first.clone();
        *pos += 1;
        let mut args = Vec::new();
        while *pos < tokens.len() && tokens[*pos] != ")" {
            args.push(parse_term(tokens, pos)?);
        }
        return Ok(Expr::Call(name, args));
    }
    let term = parse_term(tokens, pos)?;
    Ok(term)
}

fn parse_term(tokens: &[String], pos: &mut usize) -> Result<Expr, String> {
    let tok = tokens.get(*pos).ok_or("unexpected end of expression")?;
    *pos += 1;
    if tok == "(" {
        let inner = parse_pipeline(tokens, pos)?;
        if tokens.get(*pos).map(String::as_str) != Some(")") {
            return Err("missing ')'".to_string());
        }
        *pos += 1;
        return Ok(inner);
    }
    if let Some(lit) = tok.strip_prefix('"') {
        return Ok(Expr::Literal(Value::String(lit.to_string())));
    }
    if let Some(field) = tok.strip_prefix('.') {
        return Ok(Expr::Field(field.split('.').map(str::to_string).collect()));
    }
    match tok.as_str() {
        "true" => return Ok(Expr::Literal(Value::Bool(true))),
        "false" => return Ok(Expr::Literal(Value::Bool(false))),
        "nil" => return Ok(Expr::Literal(Value::Null)),
        _ => {}
    }
    if let Ok(n) = tok.parse::<serde_json::Number>() {
        return Ok(Expr::Literal(Value::Number(n)));
    }
    if is_ident(tok) {
        return Ok(Expr::Call(tok.clone(), Vec::new()));
    }
    Err(format!("unexpected token '{}'", tok))
}

fn is_ident(tok: &str) -> bool {
    tok.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && tok.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !matches!(tok, "true" | "false" | "nil")
}

fn arg_id(v: &Value) -> Result<ResourceId, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("expected resource id argument, got {}", v))?;
    ResourceId::parse(s)
}

fn arg_str(v: &Value) -> Result<String, String> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("expected string argument, got {}", v))
}

fn ids_value(ids: Vec<ResourceId>) -> Value {
    Value::Array(ids.into_iter().map(|i| Value::String(i.to_string())).collect())
}

fn eval(expr: &Expr, funcs: &mut dyn TemplateFunctions, data: &TemplateData) -> Result<Value, String> {
    let (name, args) = match expr {
        Expr::Literal(v) => return Ok(v.clone()),
        Expr::Field(path) => return data.field(path),
        Expr::Call(name, args) => (name, args),
    };
    let mut vals = Vec::with_capacity(args.len());
    for a in args {
        vals.push(eval(a, funcs, data)?);
    }
    let want = |n: usize| -> Result<(), String> {
        if vals.len() != n {
            return Err(format!("{} expects {} arguments, got {}", name, n, vals.len()));
        }
        Ok(())
    };
    match name.as_str() {
        "not" => {
            want(1)?;
            Ok(Value::Bool(!truthy(&vals[0])))
        }
        "eq" => {
            want(2)?;
            Ok(Value::Bool(render(&vals[0]) == render(&vals[1])))
        }
        "fieldValue" => {
            want(2)?;
            funcs.field_value(&arg_str(&vals[0])?, &arg_id(&vals[1])?)
        }
        "hasField" => {
            want(2)?;
            funcs
                .has_field(&arg_str(&vals[0])?, &arg_id(&vals[1])?)
                .map(Value::Bool)
        }
        "upstream" | "downstream" | "closestDownstream" => {
            want(2)?;
            let (sel, res) = (arg_id(&vals[0])?, arg_id(&vals[1])?);
            let found = match name.as_str() {
                "upstream" => funcs.upstream(&sel, &res)?,
                "downstream" => funcs.downstream(&sel, &res)?,
                _ => funcs.closest_downstream(&sel, &res)?,
            };
            if found.is_zero() {
                return Ok(Value::Null);
            }
            Ok(Value::String(found.to_string()))
        }
        "hasUpstream" | "hasDownstream" => {
            want(2)?;
            let (sel, res) = (arg_id(&vals[0])?, arg_id(&vals[1])?);
            let found = if name == "hasUpstream" {
                funcs.has_upstream(&sel, &res)?
            } else {
                funcs.has_downstream(&sel, &res)?
            };
            Ok(Value::Bool(found))
        }
        "allUpstream" | "allDownstream" => {
            want(2)?;
            let (sel, res) = (arg_id(&vals[0])?, arg_id(&vals[1])?);
            let ids = if name == "allUpstream" {
                funcs.all_upstream(&sel, &res)?
            } else {
                funcs.all_downstream(&sel, &res)?
            };
            Ok(ids_value(ids))
        }
        other => Err(format!("unknown template function '{}'", other)),
    }
}

/// Parse and execute in one go.
pub fn execute(
    funcs: &mut dyn TemplateFunctions,
    src: &str,
    data: &TemplateData,
) -> Result<Value, String> {
    Template::parse(src)?.execute(funcs, data)
}

/// Execute a template that must produce a non-empty resource id.
pub fn execute_decode_id(
    funcs: &mut dyn TemplateFunctions,
    src: &str,
    data: &TemplateData,
) -> Result<ResourceId, String> {
    let v = execute(funcs, src, data)?;
    let s = render(&v);
    if s.is_empty() {
        return Err(format!("selector '{}' is zero", src));
    }
    ResourceId::parse(&s)
}

/// Execute a condition. An absent condition is true.
pub fn execute_condition(
    funcs: &mut dyn TemplateFunctions,
    cond: Option<&str>,
    data: &TemplateData,
) -> Result<bool, String> {
    match cond {
        None => Ok(true),
        Some(src) => execute(funcs, src, data).map(|v| truthy(&v)),
    }
}

/// Resolve every templated string inside a value.
pub fn resolve_value(
    funcs: &mut dyn TemplateFunctions,
    value: &Value,
    data: &TemplateData,
) -> Result<Value, String> {
    match value {
        Value::String(s) if s.contains("{{") => execute(funcs, s, data),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for i in items {
                out.push(resolve_value(funcs, i, data)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(funcs, v, data)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Static function table for template tests.
    #[derive(Default)]
    pub(crate) struct StaticFuncs {
        pub fields: BTreeMap<(String, String), Value>,
        pub downstream: Vec<ResourceId>,
        pub calls: Vec<String>,
    }

    impl TemplateFunctions for StaticFuncs {
        fn field_value(&mut self, field: &str, resource: &ResourceId) -> Result<Value, String> {
            self.calls.push(format!("fieldValue {} {}", field, resource));
            self.fields
                .get(&(resource.to_string(), field.to_string()))
                .cloned()
                .ok_or_else(|| format!("field '{}' not found", field))
        }
        fn has_field(&mut self, field: &str, resource: &ResourceId) -> Result<bool, String> {
            Ok(self.fields.contains_key(&(resource.to_string(), field.to_string())))
        }
        fn upstream(&mut self, _: &ResourceId, _: &ResourceId) -> Result<ResourceId, String> {
            Err("no upstream".into())
        }
        fn downstream(&mut self, sel: &ResourceId, _: &ResourceId) -> Result<ResourceId, String> {
            self.downstream
                .iter()
                .find(|d| sel.matches(d))
                .cloned()
                .ok_or_else(|| "no downstream".to_string())
        }
        fn has_upstream(&mut self, _: &ResourceId, _: &ResourceId) -> Result<bool, String> {
            Ok(false)
        }
        fn has_downstream(&mut self, sel: &ResourceId, _: &ResourceId) -> Result<bool, String> {
            Ok(self.downstream.iter().any(|d| sel.matches(d)))
        }
        fn all_upstream(&mut self, _: &ResourceId, _: &ResourceId) -> Result<Vec<ResourceId>, String> {
            Ok(Vec::new())
        }
        fn all_downstream(
            &mut self,
            sel: &ResourceId,
            _: &ResourceId,
        ) -> Result<Vec<ResourceId>, String> {
            Ok(self.downstream.iter().filter(|d| sel.matches(d)).cloned().collect())
        }
        fn closest_downstream(
            &mut self,
            sel: &ResourceId,
            res: &ResourceId,
        ) -> Result<ResourceId, String> {
            self.downstream(sel, res)
        }
    }

    fn data() -> TemplateData {
        TemplateData::for_resource(&ResourceId::parse("p:a:me").unwrap())
    }

    #[test]
    fn test_ig020_plain_text() {
        let mut f = StaticFuncs::default();
        let v = execute(&mut f, "hello", &data()).unwrap();
        assert_eq!(v, Value::from("hello"));
        assert!(!Template::parse("hello").unwrap().is_dynamic());
    }

    #[test]
    fn test_ig020_self_and_subfields() {
        let mut f = StaticFuncs::default();
        assert_eq!(execute(&mut f, "{{ .Self }}", &data()).unwrap(), Value::from("p:a:me"));
        assert_eq!(
            execute(&mut f, "{{ .Self.Name }}-sg", &data()).unwrap(),
            Value::from("me-sg")
        );
        assert!(execute(&mut f, "{{ .Source }}", &data()).is_err());
    }

    #[test]
    fn test_ig020_literals_typed() {
        let mut f = StaticFuncs::default();
        assert_eq!(execute(&mut f, "{{ 42 }}", &data()).unwrap(), Value::from(42));
        assert_eq!(execute(&mut f, "{{ true }}", &data()).unwrap(), Value::Bool(true));
        assert_eq!(execute(&mut f, "{{ \"a b\" }}", &data()).unwrap(), Value::from("a b"));
    }

    #[test]
    fn test_ig020_nested_calls() {
        let mut f = StaticFuncs::default();
        f.downstream.push(ResourceId::parse("p:vpc:main").unwrap());
        f.fields.insert(("p:vpc:main".into(), "Cidr".into()), Value::from("10.0.0.0/16"));
        let v = execute(
            &mut f,
            "{{ fieldValue \"Cidr\" (downstream \"p:vpc\" .Self) }}",
            &data(),
        )
        .unwrap();
        assert_eq!(v, Value::from("10.0.0.0/16"));
        assert_eq!(f.calls, vec!["fieldValue Cidr p:vpc:main"]);
    }

    #[test]
    fn test_ig020_conditions() {
        let mut f = StaticFuncs::default();
        f.downstream.push(ResourceId::parse("p:vpc:main").unwrap());
        let d = data();
        assert!(execute_condition(&mut f, None, &d).unwrap());
        assert!(execute_condition(&mut f, Some("{{ hasDownstream \"p:vpc\" .Self }}"), &d).unwrap());
        assert!(!execute_condition(&mut f, Some("{{ not (hasDownstream \"p:vpc\" .Self) }}"), &d).unwrap());
        assert!(execute_condition(&mut f, Some("{{ eq .Self.Type \"a\" }}"), &d).unwrap());
    }

    #[test]
    fn test_ig020_decode_id() {
        let mut f = StaticFuncs::default();
        let id = execute_decode_id(&mut f, "p:sg:{{ .Self.Name }}-sg", &data()).unwrap();
        assert_eq!(id.to_string(), "p:sg:me-sg");
        assert!(execute_decode_id(&mut f, "{{ nil }}", &data()).is_err());
    }

    #[test]
    fn test_ig020_resolve_value_nested() {
        let mut f = StaticFuncs::default();
        let v = serde_json::json!({"Name": "{{ .Self.Name }}", "List": ["{{ .Self }}", 3]});
        let out = resolve_value(&mut f, &v, &data()).unwrap();
        assert_eq!(out, serde_json::json!({"Name": "me", "List": ["p:a:me", 3]}));
    }

    #[test]
    fn test_ig020_parse_errors() {
        assert!(Template::parse("{{ .Self").is_err());
        assert!(Template::parse("{{ (not true }}").is_err());
        assert!(Template::parse("{{ \"open }}").is_err());
        let mut f = StaticFuncs::default();
        assert!(execute(&mut f, "{{ bogus 1 }}", &data()).is_err());
        assert!(execute(&mut f, "{{ not }}", &data()).is_err());
    }
}
