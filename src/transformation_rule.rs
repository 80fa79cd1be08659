use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Declarative mapping document: page layouts and web-part rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingDocument {
    #[serde(default)]
    pub layouts: Vec<LayoutMapping>,
    #[serde(default)]
    pub web_parts: Vec<WebPartMapping>,
}

/// Associates a source page layout with a target template and the directives
/// that move its fields onto the target page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutMapping {
    pub id: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub default: bool,
    pub target_template: String,
    #[serde(default)]
    pub fields: Vec<FieldDirective>,
}

/// Moves one source field to a target placement, optionally through a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDirective {
    pub field: String,
    pub placement: Placement,
    #[serde(default)]
    pub function: Option<FunctionCall>,
}

/// Where a directive's output lands on the target page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Placement {
    Metadata {
        field: String,
    },
    Component {
        component: String,
        #[serde(default = "default_property")]
        property: String,
        #[serde(default = "default_position")]
        section: u32,
        #[serde(default = "default_position")]
        column: u32,
        #[serde(default)]
        order: u32,
    },
}

fn default_property() -> String {
    "text".to_string()
}

fn default_position() -> u32 {
    1
}

/// Maps a legacy web part type onto a target component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebPartMapping {
    pub web_part_type: String,
    #[serde(default)]
    pub selector: Option<FunctionCall>,
    pub variants: Vec<WebPartVariant>,
}

/// One candidate target for a web part; `key: None` is the fallback variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebPartVariant {
    #[serde(default)]
    pub key: Option<String>,
    pub component: String,
    #[serde(default)]
    pub properties: Vec<PropertyDirective>,
}

/// Fills one target component property, either by copying a source web part
/// property or by invoking a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDirective {
    pub property: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionCall>,
}

impl MappingDocument {
    /// Resolve the layout for a page: layout id, then content type, then the
    /// default layout. Ids and content types match case-insensitively.
    pub fn find_layout(&self, layout: Option<&str>, content_type: Option<&str>) -> Option<&LayoutMapping> {
        if let Some(layout) = layout {
            if let Some(found) = self.layouts.iter().find(|l| l.id.eq_ignore_ascii_case(layout)) {
                return Some(found);
            }
        }

        if let Some(content_type) = content_type {
            let found = self.layouts.iter().find(|l| {
                l.content_type
                    .as_deref()
                    .is_some_and(|ct| ct.eq_ignore_ascii_case(content_type))
            });
            if found.is_some() {
                return found;
            }
        }

        self.layouts.iter().find(|l| l.default)
    }

    pub fn find_web_part(&self, web_part_type: &str) -> Option<&WebPartMapping> {
        self.web_parts
            .iter()
            .find(|w| w.web_part_type.eq_ignore_ascii_case(web_part_type))
    }
}

impl WebPartMapping {
    /// Pick the variant for a selector result. An empty key selects nothing.
    pub fn variant(&self, key: Option<&str>) -> Option<&WebPartVariant> {
        match key {
            None => self.variants.first(),
            Some("") => None,
            Some(key) => self
                .variants
                .iter()
                .find(|v| v.key.as_deref().is_some_and(|k| k.eq_ignore_ascii_case(key)))
                .or_else(|| self.variants.iter().find(|v| v.key.is_none())),
        }
    }
}

/// A function reference as written in a mapping document: `Name(arg, ...)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Argument>,
}

/// A function argument: `{Field}` placeholder or a literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Field(String),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FunctionCallError {
    #[error("Malformed function call '{0}': expected Name(arg, ...)")]
    Malformed(String),

    #[error("Unterminated quoted argument in '{0}'")]
    UnterminatedQuote(String),
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: Vec<Argument>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl FromStr for FunctionCall {
    type Err = FunctionCallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let open = text
            .find('(')
            .ok_or_else(|| FunctionCallError::Malformed(s.to_string()))?;
        if !text.ends_with(')') {
            return Err(FunctionCallError::Malformed(s.to_string()));
        }

        let name = text[..open].trim();
        let valid_name = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !valid_name {
            return Err(FunctionCallError::Malformed(s.to_string()));
        }

        let inner = &text[open + 1..text.len() - 1];
        let args = split_arguments(inner)
            .ok_or_else(|| FunctionCallError::UnterminatedQuote(s.to_string()))?
            .into_iter()
            .map(parse_argument)
            .collect();

        Ok(FunctionCall::new(name, args))
    }
}

impl TryFrom<String> for FunctionCall {
    type Error = FunctionCallError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FunctionCall> for String {
    fn from(call: FunctionCall) -> Self {
        call.to_string()
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match arg {
                Argument::Field(field) => write!(f, "{{{}}}", field)?,
                Argument::Literal(text) => write!(f, "'{}'", text)?,
            }
        }
        f.write_str(")")
    }
}

/// Split on top-level commas; commas inside quotes belong to the argument.
/// Returns `None` when a quote is left open.
fn split_arguments(inner: &str) -> Option<Vec<String>> {
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in inner.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, ',') => args.push(std::mem::take(&mut current)),
            (None, c) => current.push(c),
        }
    }

    if quote.is_some() {
        return None;
    }
    args.push(current);
    Some(args)
}

fn parse_argument(raw: String) -> Argument {
    let arg = raw.trim();
    if arg.len() >= 2 && arg.starts_with('{') && arg.ends_with('}') {
        return Argument::Field(arg[1..arg.len() - 1].trim().to_string());
    }
    for quote in ['\'', '"'] {
        if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
            return Argument::Literal(arg[1..arg.len() - 1].to_string());
        }
    }
    Argument::Literal(arg.to_string())
}
