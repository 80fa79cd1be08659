use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use crate::{
    function_executor::{bind_arguments, execute_builtin, FunctionContext, FunctionError, FunctionOutput},
    mapping_loader::MappingError,
    transformation_rule::{Argument, FunctionCall, MappingDocument, Placement},
};

/// Functions shipped with the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltInFunction {
    StaticString,
    Prefix,
    Suffix,
    HtmlEncode,
    ReturnTrue,
    ReturnFalse,
    ReturnFileName,
    Concatenate,
    RewriteUrl,
    RewriteUser,
    RewriteTerm,
    RewriteHtml,
    ListRootPath,
    ImageProperties,
    SummaryLinksSelector,
    ScriptEditorSelector,
}

/// Number of arguments a function accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

impl BuiltInFunction {
    pub const ALL: [BuiltInFunction; 16] = [
        BuiltInFunction::StaticString,
        BuiltInFunction::Prefix,
        BuiltInFunction::Suffix,
        BuiltInFunction::HtmlEncode,
        BuiltInFunction::ReturnTrue,
        BuiltInFunction::ReturnFalse,
        BuiltInFunction::ReturnFileName,
        BuiltInFunction::Concatenate,
        BuiltInFunction::RewriteUrl,
        BuiltInFunction::RewriteUser,
        BuiltInFunction::RewriteTerm,
        BuiltInFunction::RewriteHtml,
        BuiltInFunction::ListRootPath,
        BuiltInFunction::ImageProperties,
        BuiltInFunction::SummaryLinksSelector,
        BuiltInFunction::ScriptEditorSelector,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltInFunction::StaticString => "StaticString",
            BuiltInFunction::Prefix => "Prefix",
            BuiltInFunction::Suffix => "Suffix",
            BuiltInFunction::HtmlEncode => "HtmlEncode",
            BuiltInFunction::ReturnTrue => "ReturnTrue",
            BuiltInFunction::ReturnFalse => "ReturnFalse",
            BuiltInFunction::ReturnFileName => "ReturnFileName",
            BuiltInFunction::Concatenate => "Concatenate",
            BuiltInFunction::RewriteUrl => "RewriteUrl",
            BuiltInFunction::RewriteUser => "RewriteUser",
            BuiltInFunction::RewriteTerm => "RewriteTerm",
            BuiltInFunction::RewriteHtml => "RewriteHtml",
            BuiltInFunction::ListRootPath => "ListRootPath",
            BuiltInFunction::ImageProperties => "ImageProperties",
            BuiltInFunction::SummaryLinksSelector => "SummaryLinksSelector",
            BuiltInFunction::ScriptEditorSelector => "ScriptEditorSelector",
        }
    }

    /// Exact, case-sensitive name match
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn arity(self) -> Arity {
        match self {
            BuiltInFunction::ReturnTrue
            | BuiltInFunction::ReturnFalse
            | BuiltInFunction::SummaryLinksSelector
            | BuiltInFunction::ScriptEditorSelector => Arity::Exact(0),
            BuiltInFunction::Prefix | BuiltInFunction::Suffix | BuiltInFunction::ImageProperties => Arity::Exact(2),
            BuiltInFunction::Concatenate => Arity::AtLeast(1),
            _ => Arity::Exact(1),
        }
    }
}

/// A user-supplied transformation function
pub trait TransformFunction: Send + Sync {
    fn invoke(&self, args: &[String], ctx: &FunctionContext<'_>) -> Result<FunctionOutput, FunctionError>;
}

impl<F> TransformFunction for F
where
    F: Fn(&[String], &FunctionContext<'_>) -> Result<FunctionOutput, FunctionError> + Send + Sync,
{
    fn invoke(&self, args: &[String], ctx: &FunctionContext<'_>) -> Result<FunctionOutput, FunctionError> {
        self(args, ctx)
    }
}

/// A named group of extension functions registered together
pub trait FunctionSet {
    fn functions(&self) -> Vec<(String, Arc<dyn TransformFunction>)>;
}

/// A function reference after resolution
#[derive(Clone)]
pub enum ResolvedFunction {
    BuiltIn(BuiltInFunction),
    Extension {
        name: String,
        function: Arc<dyn TransformFunction>,
    },
}

impl ResolvedFunction {
    pub fn name(&self) -> &str {
        match self {
            ResolvedFunction::BuiltIn(builtin) => builtin.name(),
            ResolvedFunction::Extension { name, .. } => name,
        }
    }
}

impl fmt::Debug for ResolvedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedFunction::BuiltIn(builtin) => f.debug_tuple("BuiltIn").field(builtin).finish(),
            ResolvedFunction::Extension { name, .. } => {
                f.debug_struct("Extension").field("name", name).finish_non_exhaustive()
            }
        }
    }
}

/// A resolved function plus its unbound arguments, ready to run
#[derive(Debug, Clone)]
pub struct BoundCall {
    pub function: ResolvedFunction,
    pub args: Vec<Argument>,
}

impl BoundCall {
    pub fn name(&self) -> &str {
        self.function.name()
    }

    /// Bind placeholders against `values` and run the function
    pub fn invoke(
        &self,
        values: &BTreeMap<String, String>,
        ctx: &FunctionContext<'_>,
    ) -> Result<FunctionOutput, FunctionError> {
        let args = bind_arguments(&self.args, values);
        match &self.function {
            ResolvedFunction::BuiltIn(builtin) => execute_builtin(*builtin, &args, ctx),
            ResolvedFunction::Extension { function, .. } => function.invoke(&args, ctx),
        }
    }

    /// Run and require a plain text result
    pub fn invoke_text(
        &self,
        values: &BTreeMap<String, String>,
        ctx: &FunctionContext<'_>,
    ) -> Result<String, FunctionError> {
        match self.invoke(values, ctx)? {
            FunctionOutput::Text(text) => Ok(text),
            FunctionOutput::Properties(_) => Err(FunctionError::ExpectedText {
                function: self.name().to_string(),
            }),
        }
    }
}

/// Built-ins plus registered extensions. Extensions shadow built-ins of the same name.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    extensions: HashMap<String, Arc<dyn TransformFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn TransformFunction>) {
        self.extensions.insert(name.into(), function);
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[String], &FunctionContext<'_>) -> Result<FunctionOutput, FunctionError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(function));
    }

    pub fn register_set(&mut self, set: &dyn FunctionSet) {
        for (name, function) in set.functions() {
            self.register(name, function);
        }
    }

    pub fn with_set(mut self, set: &dyn FunctionSet) -> Self {
        self.register_set(set);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<ResolvedFunction> {
        if let Some(function) = self.extensions.get(name) {
            return Some(ResolvedFunction::Extension {
                name: name.to_string(),
                function: function.clone(),
            });
        }
        BuiltInFunction::from_name(name).map(ResolvedFunction::BuiltIn)
    }

    /// Resolve a call written in a mapping document. Unknown names and wrong
    /// built-in arity are mapping errors.
    pub fn bind(&self, call: &FunctionCall, location: &str) -> Result<BoundCall, MappingError> {
        let function = self.resolve(&call.name).ok_or_else(|| MappingError::UnknownFunction {
            name: call.name.clone(),
            location: location.to_string(),
        })?;

        if let ResolvedFunction::BuiltIn(builtin) = &function {
            let arity = builtin.arity();
            if !arity.accepts(call.args.len()) {
                return Err(MappingError::InvalidArguments {
                    name: call.name.clone(),
                    location: location.to_string(),
                    message: format!("takes {} argument(s), got {}", arity, call.args.len()),
                });
            }
        }

        Ok(BoundCall {
            function,
            args: call.args.clone(),
        })
    }

    fn bind_optional(&self, call: Option<&FunctionCall>, location: &str) -> Result<Option<BoundCall>, MappingError> {
        call.map(|call| self.bind(call, location)).transpose()
    }

    /// Resolve every function reference in the document up front
    pub fn bind_document(&self, document: MappingDocument) -> Result<BoundMappings, MappingError> {
        let mut layouts = Vec::with_capacity(document.layouts.len());
        for (index, layout) in document.layouts.iter().enumerate() {
            let mut directives = Vec::with_capacity(layout.fields.len());
            for directive in &layout.fields {
                let location = format!("layout '{}' field '{}'", layout.id, directive.field);
                directives.push(BoundDirective {
                    field: directive.field.clone(),
                    placement: directive.placement.clone(),
                    call: self.bind_optional(directive.function.as_ref(), &location)?,
                });
            }
            layouts.push(BoundLayout {
                index,
                id: layout.id.clone(),
                target_template: layout.target_template.clone(),
                directives,
            });
        }

        let mut web_parts = Vec::with_capacity(document.web_parts.len());
        for (index, web_part) in document.web_parts.iter().enumerate() {
            let selector_location = format!("web part '{}' selector", web_part.web_part_type);
            let selector = self.bind_optional(web_part.selector.as_ref(), &selector_location)?;

            let mut variants = Vec::with_capacity(web_part.variants.len());
            for variant in &web_part.variants {
                let mut properties = Vec::with_capacity(variant.properties.len());
                for property in &variant.properties {
                    let location = format!(
                        "web part '{}' property '{}'",
                        web_part.web_part_type, property.property
                    );
                    properties.push(BoundProperty {
                        property: property.property.clone(),
                        source: property.source.clone(),
                        call: self.bind_optional(property.function.as_ref(), &location)?,
                    });
                }
                variants.push(BoundVariant {
                    key: variant.key.clone(),
                    component: variant.component.clone(),
                    properties,
                });
            }

            web_parts.push(BoundWebPart {
                index,
                web_part_type: web_part.web_part_type.clone(),
                selector,
                variants,
            });
        }

        Ok(BoundMappings {
            document,
            layouts,
            web_parts,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BoundDirective {
    pub field: String,
    pub placement: Placement,
    pub call: Option<BoundCall>,
}

#[derive(Debug, Clone)]
pub struct BoundLayout {
    index: usize,
    pub id: String,
    pub target_template: String,
    pub directives: Vec<BoundDirective>,
}

#[derive(Debug, Clone)]
pub struct BoundProperty {
    pub property: String,
    pub source: Option<String>,
    pub call: Option<BoundCall>,
}

#[derive(Debug, Clone)]
pub struct BoundVariant {
    pub key: Option<String>,
    pub component: String,
    pub properties: Vec<BoundProperty>,
}

#[derive(Debug, Clone)]
pub struct BoundWebPart {
    index: usize,
    pub web_part_type: String,
    pub selector: Option<BoundCall>,
    pub variants: Vec<BoundVariant>,
}

/// The mapping document with every function reference resolved. Lookups
/// follow the document's own selection rules.
#[derive(Debug, Clone)]
pub struct BoundMappings {
    document: MappingDocument,
    layouts: Vec<BoundLayout>,
    web_parts: Vec<BoundWebPart>,
}

impl BoundMappings {
    pub fn find_layout(&self, layout: Option<&str>, content_type: Option<&str>) -> Option<&BoundLayout> {
        let found = self.document.find_layout(layout, content_type)?;
        let index = self.document.layouts.iter().position(|l| std::ptr::eq(l, found))?;
        self.layouts.iter().find(|bound| bound.index == index)
    }

    pub fn find_web_part(&self, web_part_type: &str) -> Option<&BoundWebPart> {
        let found = self.document.find_web_part(web_part_type)?;
        let index = self.document.web_parts.iter().position(|w| std::ptr::eq(w, found))?;
        self.web_parts.iter().find(|bound| bound.index == index)
    }

    pub fn select_variant<'m>(&self, web_part: &'m BoundWebPart, key: Option<&str>) -> Option<&'m BoundVariant> {
        let mapping = self.document.web_parts.get(web_part.index)?;
        let chosen = mapping.variant(key)?;
        let position = mapping.variants.iter().position(|v| std::ptr::eq(v, chosen))?;
        web_part.variants.get(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping_table::MappingTables;
    use crate::observer::ObserverBus;
    use crate::platform::MemoryPlatform;
    use crate::request::MappingProperties;

    struct UpperCaseSet;

    fn upper(args: &[String], _ctx: &FunctionContext<'_>) -> Result<FunctionOutput, FunctionError> {
        Ok(FunctionOutput::text(args.concat().to_uppercase()))
    }

    impl FunctionSet for UpperCaseSet {
        fn functions(&self) -> Vec<(String, Arc<dyn TransformFunction>)> {
            vec![("Upper".to_string(), Arc::new(upper) as Arc<dyn TransformFunction>)]
        }
    }

    fn document(text: &str) -> MappingDocument {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_builtin_names_round_trip() {
        for builtin in BuiltInFunction::ALL {
            assert_eq!(BuiltInFunction::from_name(builtin.name()), Some(builtin));
        }
        assert_eq!(BuiltInFunction::from_name("prefix"), None);
    }

    #[test]
    fn test_unknown_function_rejected_at_bind_time() {
        let registry = FunctionRegistry::new();
        let doc = document(
            r#"
            layouts:
              - id: A
                target_template: T
                fields:
                  - field: Title
                    placement: { kind: metadata, field: Title }
                    function: "DoesNotExist({Title})"
            "#,
        );

        match registry.bind_document(doc) {
            Err(MappingError::UnknownFunction { name, location }) => {
                assert_eq!(name, "DoesNotExist");
                assert!(location.contains("layout 'A'"));
            }
            other => panic!("expected UnknownFunction, got {:?}", other),
        }
    }

    #[test]
    fn test_builtin_arity_checked() {
        let registry = FunctionRegistry::new();
        let call: FunctionCall = "Prefix({Title})".parse().unwrap();
        assert!(matches!(
            registry.bind(&call, "test"),
            Err(MappingError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_extension_shadows_builtin_and_runs() {
        let mut registry = FunctionRegistry::new().with_set(&UpperCaseSet);
        registry.register_fn("HtmlEncode", |_args: &[String], _ctx: &FunctionContext<'_>| {
            Ok(FunctionOutput::text("custom"))
        });

        let platform = MemoryPlatform::new("site");
        let mappings = MappingTables::default();
        let properties = MappingProperties::new();
        let bus = ObserverBus::new();
        let ctx = FunctionContext {
            page: "p",
            platform: &platform,
            mappings: &mappings,
            properties: &properties,
            bus: &bus,
        };
        let mut values = BTreeMap::new();
        values.insert("Title".to_string(), "news".to_string());

        let upper = registry.bind(&"Upper({Title})".parse().unwrap(), "test").unwrap();
        assert_eq!(upper.invoke_text(&values, &ctx).unwrap(), "NEWS");

        let shadowed = registry.bind(&"HtmlEncode({Title}, 'extra')".parse().unwrap(), "test").unwrap();
        assert!(matches!(shadowed.function, ResolvedFunction::Extension { .. }));
        assert_eq!(shadowed.invoke_text(&values, &ctx).unwrap(), "custom");
    }

    #[test]
    fn test_bound_lookups_follow_document_rules() {
        let registry = FunctionRegistry::new();
        let bound = registry
            .bind_document(document(
                r#"
                layouts:
                  - { id: ArticleLeft, target_template: Article }
                  - { id: Fallback, target_template: Blank, default: true }
                web_parts:
                  - web_part_type: SummaryLinkWebPart
                    selector: "SummaryLinksSelector()"
                    variants:
                      - key: QuickLinks
                        component: QuickLinks
                      - component: Text
                "#,
            ))
            .unwrap();

        assert_eq!(bound.find_layout(Some("ARTICLELEFT"), None).unwrap().target_template, "Article");
        assert_eq!(bound.find_layout(Some("other"), None).unwrap().id, "Fallback");

        let web_part = bound.find_web_part("SummaryLinkWebPart").unwrap();
        assert_eq!(web_part.selector.as_ref().unwrap().name(), "SummaryLinksSelector");
        assert_eq!(bound.select_variant(web_part, Some("QuickLinks")).unwrap().component, "QuickLinks");
        assert_eq!(bound.select_variant(web_part, Some("Text")).unwrap().component, "Text");
        assert!(bound.select_variant(web_part, Some("")).is_none());
    }
}
