//! Represents command templates with embedded named references, e.g.
//! `{compiler} {compile_flags} -o {output} -c {input}`, and mechanisms for
//! expanding those into plain command lines.

use crate::error::{config, Result};
use crate::smallmap::SmallMap;
use std::borrow::Cow;

/// An environment providing a mapping of variable name to variable value.
/// A template may need several environments to be fully expanded; the
/// earliest one that knows a name wins.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

impl Env for SmallMap<String, String> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.get(var).map(|v| Cow::Borrowed(v.as_str()))
    }
}

impl<'a, 'b> Env for &'b [(&'a str, String)] {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.iter()
            .find(|(k, _)| *k == var)
            .map(|(_, v)| Cow::Borrowed(v.as_str()))
    }
}

/// One token within a template, either literal text or a variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<'a> {
    Literal(&'a str),
    VarRef(&'a str),
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Split a template into parts.  `{{` and `}}` are escapes for literal
/// braces; any other unbalanced brace is a configuration error.
pub fn parse(template: &str) -> Result<Vec<EvalPart>> {
    let bytes = template.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                if start < i {
                    parts.push(EvalPart::Literal(&template[start..i]));
                }
                parts.push(EvalPart::Literal("{"));
                i += 2;
                start = i;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                if start < i {
                    parts.push(EvalPart::Literal(&template[start..i]));
                }
                parts.push(EvalPart::Literal("}"));
                i += 2;
                start = i;
            }
            b'{' => {
                let name_start = i + 1;
                let mut end = name_start;
                while end < bytes.len() && is_ident_byte(bytes[end]) {
                    end += 1;
                }
                if end == name_start || bytes.get(end) != Some(&b'}') {
                    return config(format!("malformed template at byte {}: {:?}", i, template));
                }
                if start < i {
                    parts.push(EvalPart::Literal(&template[start..i]));
                }
                parts.push(EvalPart::VarRef(&template[name_start..end]));
                i = end + 1;
                start = i;
            }
            b'}' => {
                return config(format!("unmatched '}}' at byte {}: {:?}", i, template));
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        parts.push(EvalPart::Literal(&template[start..]));
    }
    Ok(parts)
}

/// Expand a template, looking variables up in `envs` in order.
pub fn evaluate(template: &str, envs: &[&dyn Env]) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    for part in parse(template)? {
        match part {
            EvalPart::Literal(s) => result.push_str(s),
            EvalPart::VarRef(var) => match envs.iter().find_map(|env| env.get_var(var)) {
                Some(value) => result.push_str(&value),
                None => {
                    return config(format!("no value for {{{}}} in {:?}", var, template));
                }
            },
        }
    }
    Ok(result)
}

/// Builds command lines from templates, with a set of default arguments
/// shared by every command of one target or generator.
#[derive(Debug, Clone, Default)]
pub struct Command {
    defaults: SmallMap<String, String>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_default_argument(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.defaults.insert(key.into(), value.into());
    }

    pub fn add_default_arguments<K, V>(&mut self, arguments: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in arguments {
            self.add_default_argument(k, v);
        }
    }

    pub fn get_default_value_by_key(&self, key: &str) -> Result<&str> {
        match self.defaults.get(key) {
            Some(v) => Ok(v),
            None => config(format!("could not find value for {:?}", key)),
        }
    }

    /// Expand `pattern`; `arguments` take priority over the defaults.
    pub fn construct(&self, pattern: &str, arguments: &[(&str, String)]) -> Result<String> {
        evaluate(pattern, &[&arguments, &self.defaults])
    }
}
