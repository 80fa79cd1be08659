use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use thiserror::Error;
use crate::{
    function_registry::BuiltInFunction,
    mapping_table::{MappingTables, UrlMapping},
    observer::{LogEvent, ObserverBus},
    platform::{ContentPlatform, PlatformError},
    request::MappingProperties,
    transformation_rule::Argument,
};

static LINK_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(href|src)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

/// What a transformation function hands back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionOutput {
    Text(String),
    /// A structured fragment: several named properties at once
    Properties(BTreeMap<String, String>),
}

impl FunctionOutput {
    pub fn text(value: impl Into<String>) -> Self {
        FunctionOutput::Text(value.into())
    }
}

#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("Function {function} failed: {message}")]
    Failed { function: String, message: String },

    #[error("Function {function} returned a fragment where text was required")]
    ExpectedText { function: String },

    #[error("Lookup in {function} failed: {source}")]
    Platform {
        function: String,
        #[source]
        source: PlatformError,
    },
}

impl FunctionError {
    pub fn failed(function: impl Into<String>, message: impl Into<String>) -> Self {
        FunctionError::Failed {
            function: function.into(),
            message: message.into(),
        }
    }
}

/// Everything a function may consult while it runs for one page
pub struct FunctionContext<'a> {
    pub page: &'a str,
    pub platform: &'a dyn ContentPlatform,
    pub mappings: &'a MappingTables,
    pub properties: &'a MappingProperties,
    pub bus: &'a ObserverBus,
}

impl<'a> FunctionContext<'a> {
    pub fn log(&self, event: LogEvent) {
        self.bus.log(event.with_page(self.page));
    }
}

/// Resolve placeholders against the current field values. A placeholder naming
/// an absent field binds to the empty string.
pub fn bind_arguments(args: &[Argument], values: &BTreeMap<String, String>) -> Vec<String> {
    args.iter()
        .map(|arg| match arg {
            Argument::Literal(text) => text.clone(),
            Argument::Field(name) => values
                .get(name)
                .or_else(|| {
                    values
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(name))
                        .map(|(_, value)| value)
                })
                .cloned()
                .unwrap_or_default(),
        })
        .collect()
}

fn arg(args: &[String], index: usize) -> &str {
    args.get(index).map(String::as_str).unwrap_or("")
}

/// Run a built-in against already bound arguments. Arity was checked when the
/// mapping was bound.
pub fn execute_builtin(
    function: BuiltInFunction,
    args: &[String],
    ctx: &FunctionContext<'_>,
) -> Result<FunctionOutput, FunctionError> {
    let output = match function {
        BuiltInFunction::StaticString => FunctionOutput::text(arg(args, 0)),
        BuiltInFunction::Prefix => {
            let value = arg(args, 0);
            if value.is_empty() {
                FunctionOutput::text("")
            } else {
                FunctionOutput::text(format!("{}{}", arg(args, 1), value))
            }
        }
        BuiltInFunction::Suffix => {
            let value = arg(args, 0);
            if value.is_empty() {
                FunctionOutput::text("")
            } else {
                FunctionOutput::text(format!("{}{}", value, arg(args, 1)))
            }
        }
        BuiltInFunction::HtmlEncode => FunctionOutput::text(html_encode(arg(args, 0))),
        BuiltInFunction::ReturnTrue => FunctionOutput::text("true"),
        BuiltInFunction::ReturnFalse => FunctionOutput::text("false"),
        BuiltInFunction::ReturnFileName => FunctionOutput::text(file_name(arg(args, 0))),
        BuiltInFunction::Concatenate => {
            let delimiter = arg(args, 0);
            let joined = args
                .iter()
                .skip(1)
                .filter(|value| !value.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join(delimiter);
            FunctionOutput::text(joined)
        }
        BuiltInFunction::RewriteUrl => {
            let url = arg(args, 0);
            FunctionOutput::text(ctx.mappings.urls.rewrite_url(url).unwrap_or_else(|| url.to_string()))
        }
        BuiltInFunction::RewriteUser => FunctionOutput::text(rewrite_users(arg(args, 0), ctx)),
        BuiltInFunction::RewriteTerm => {
            let term = arg(args, 0);
            match ctx.mappings.terms.lookup_ignore_case(term) {
                Some(mapped) => FunctionOutput::text(mapped),
                None => {
                    if !term.is_empty() {
                        ctx.log(LogEvent::debug(format!("No term mapping for '{}'", term)).with_heading("RewriteTerm"));
                    }
                    FunctionOutput::text(term)
                }
            }
        }
        BuiltInFunction::RewriteHtml => FunctionOutput::text(rewrite_links(arg(args, 0), &ctx.mappings.urls)),
        BuiltInFunction::ListRootPath => FunctionOutput::text(list_root_path(arg(args, 0), ctx)?),
        BuiltInFunction::ImageProperties => {
            let url = arg(args, 0);
            let source = ctx.mappings.urls.rewrite_url(url).unwrap_or_else(|| url.to_string());
            let mut properties = BTreeMap::new();
            properties.insert("imageSource".to_string(), source);
            properties.insert("altText".to_string(), arg(args, 1).to_string());
            FunctionOutput::Properties(properties)
        }
        BuiltInFunction::SummaryLinksSelector => {
            if ctx.properties.summary_links_to_quick_links() {
                FunctionOutput::text("QuickLinks")
            } else {
                FunctionOutput::text("Text")
            }
        }
        BuiltInFunction::ScriptEditorSelector => {
            if ctx.properties.use_community_script_editor() {
                FunctionOutput::text("CommunityScriptEditor")
            } else {
                FunctionOutput::text("")
            }
        }
    };
    Ok(output)
}

fn list_root_path(list_id: &str, ctx: &FunctionContext<'_>) -> Result<String, FunctionError> {
    let list_id = list_id.trim();
    if list_id.is_empty() {
        return Ok(String::new());
    }

    let found = ctx
        .platform
        .list_root_path(list_id)
        .map_err(|source| FunctionError::Platform {
            function: BuiltInFunction::ListRootPath.name().to_string(),
            source,
        })?;

    match found {
        Some(path) => Ok(path),
        None => {
            ctx.log(LogEvent::warning(format!("List '{}' was not found", list_id)).with_heading("ListRootPath"));
            Ok(String::new())
        }
    }
}

fn rewrite_users(logins: &str, ctx: &FunctionContext<'_>) -> String {
    logins
        .split(';')
        .map(str::trim)
        .filter(|login| !login.is_empty())
        .map(|login| match ctx.mappings.users.lookup_ignore_case(login) {
            Some(mapped) => mapped.to_string(),
            None => login.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Rewrite `href`/`src` attribute values through the URL mapping, keeping the
/// original quote style
pub fn rewrite_links(html: &str, urls: &UrlMapping) -> String {
    if urls.is_empty() {
        return html.to_string();
    }

    LINK_ATTRIBUTE
        .replace_all(html, |caps: &Captures<'_>| {
            let attribute = &caps[1];
            let (quote, url) = match (caps.get(2), caps.get(3)) {
                (Some(url), _) => ('"', url.as_str()),
                (None, Some(url)) => ('\'', url.as_str()),
                (None, None) => return caps[0].to_string(),
            };
            match urls.rewrite_url(url) {
                Some(rewritten) => format!("{}={}{}{}", attribute, quote, rewritten, quote),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

pub fn html_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => encoded.push_str("&amp;"),
            '<' => encoded.push_str("&lt;"),
            '>' => encoded.push_str("&gt;"),
            '"' => encoded.push_str("&quot;"),
            '\'' => encoded.push_str("&#39;"),
            c => encoded.push(c),
        }
    }
    encoded
}

fn file_name(url: &str) -> String {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or("");
    path.rsplit('/').next().unwrap_or("").to_string()
}
