use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use crate::{
    cache::{CacheError, ComponentCache},
    function_executor::{rewrite_links, FunctionContext, FunctionError, FunctionOutput},
    function_registry::{BoundLayout, BoundMappings},
    mapping_table::MappingTables,
    model::{SourcePage, TargetComponent, TargetPage},
    observer::{LogEvent, ObserverBus},
    platform::{ContentPlatform, PlatformError},
    reporter::{BatchReport, PageOutcome, PageStatus},
    request::{MappingProperties, TransformationRequest},
    telemetry::{best_effort, TelemetryEvent, TelemetrySink},
    transformation_rule::Placement,
};

pub const DEFAULT_SOURCE_CONTAINER: &str = "Pages";
pub const DEFAULT_TARGET_CONTAINER: &str = "SitePages";

/// Component property that carries rich text and gets automatic link rewriting
const TEXT_PROPERTY: &str = "text";

/// The non-terminal states a page moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Init,
    LoadSource,
    ResolveMapping,
    Transform,
    Persist,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineStage::Init => "Init",
            PipelineStage::LoadSource => "LoadSource",
            PipelineStage::ResolveMapping => "ResolveMapping",
            PipelineStage::Transform => "Transform",
            PipelineStage::Persist => "Persist",
        };
        f.write_str(label)
    }
}

/// A failure confined to one page. The batch continues past it.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("Platform call failed during {stage}: {source}")]
    Platform {
        stage: PipelineStage,
        #[source]
        source: PlatformError,
    },

    #[error("{source}")]
    Function {
        stage: PipelineStage,
        #[source]
        source: FunctionError,
    },

    #[error("No layout mapping for layout {layout:?} or content type {content_type:?}, and no default layout")]
    NoLayoutMapping {
        layout: Option<String>,
        content_type: Option<String>,
    },

    #[error("Component cache failure: {0}")]
    Cache(#[from] CacheError),
}

impl PageError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PageError::Platform { stage, .. } | PageError::Function { stage, .. } => *stage,
            PageError::NoLayoutMapping { .. } => PipelineStage::ResolveMapping,
            PageError::Cache(_) => PipelineStage::Transform,
        }
    }

    fn platform(stage: PipelineStage) -> impl FnOnce(PlatformError) -> PageError {
        move |source| PageError::Platform { stage, source }
    }

    fn function(source: FunctionError) -> PageError {
        PageError::Function {
            stage: PipelineStage::Transform,
            source,
        }
    }
}

enum Terminal {
    Done { target: String },
    Skipped { target: Option<String>, reason: String },
}

/// Transforms pages one at a time against a single content platform session.
///
/// Everything a run needs is passed in explicitly: the bound mappings, the
/// flat tables, the observer bus and the component cache, which may be shared
/// with other runs.
pub struct TransformationPipeline<'a> {
    platform: &'a dyn ContentPlatform,
    mappings: &'a BoundMappings,
    tables: &'a MappingTables,
    bus: &'a ObserverBus,
    cache: Arc<ComponentCache>,
    telemetry: Option<&'a dyn TelemetrySink>,
    source_container: String,
    target_container: String,
    default_properties: MappingProperties,
}

impl<'a> TransformationPipeline<'a> {
    pub fn new(
        platform: &'a dyn ContentPlatform,
        mappings: &'a BoundMappings,
        tables: &'a MappingTables,
        bus: &'a ObserverBus,
    ) -> Self {
        Self {
            platform,
            mappings,
            tables,
            bus,
            cache: Arc::new(ComponentCache::new()),
            telemetry: None,
            source_container: DEFAULT_SOURCE_CONTAINER.to_string(),
            target_container: DEFAULT_TARGET_CONTAINER.to_string(),
            default_properties: MappingProperties::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ComponentCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_telemetry(mut self, sink: &'a dyn TelemetrySink) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn with_containers(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_container = source.into();
        self.target_container = target.into();
        self
    }

    /// Toggles applied to every request; request values win
    pub fn with_default_properties(mut self, properties: MappingProperties) -> Self {
        self.default_properties = properties;
        self
    }

    pub fn cache(&self) -> &Arc<ComponentCache> {
        &self.cache
    }

    /// Source page names, optionally filtered by a case-insensitive prefix
    pub fn source_pages(&self, prefix: Option<&str>) -> Result<Vec<String>, PlatformError> {
        self.platform.list_pages(&self.source_container, prefix)
    }

    /// Run every request in order. A failed page is recorded and the next
    /// page proceeds.
    pub fn run_batch(&self, requests: &[TransformationRequest]) -> BatchReport {
        self.bus.log(
            LogEvent::info(format!("Transforming {} page(s)", requests.len())).with_heading("Batch"),
        );

        let outcomes: Vec<PageOutcome> = requests.iter().map(|request| self.transform(request)).collect();
        let report = BatchReport::from_outcomes(outcomes);

        let stats = self.cache.stats();
        self.bus.log(
            LogEvent::info(format!(
                "Batch finished: {} done, {} skipped, {} failed",
                report.summary.succeeded, report.summary.skipped, report.summary.failed
            ))
            .with_heading("Batch"),
        );
        self.bus.log(
            LogEvent::debug(format!(
                "Component cache: {} hit(s), {} miss(es), {} entr(ies)",
                stats.hits.load(std::sync::atomic::Ordering::Relaxed),
                stats.misses.load(std::sync::atomic::Ordering::Relaxed),
                self.cache.entry_count()
            ))
            .with_heading("Cache"),
        );
        report
    }

    /// Drive one page to a terminal state
    pub fn transform(&self, request: &TransformationRequest) -> PageOutcome {
        let started = Instant::now();
        let properties = self.default_properties.merged_with(&request.mapping_properties);
        let target_name = request.target_name();

        self.track(
            request,
            TelemetryEvent::new("PageTransformStarted").with_property("page", &request.page),
        );
        self.bus.log(
            LogEvent::debug(format!("Transforming into '{}'", target_name))
                .with_heading("Init")
                .with_page(&request.page),
        );

        let result = self.run_stages(request, &properties, &target_name);
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Terminal::Done { target }) => {
                self.bus.log(
                    LogEvent::info(format!("Saved as '{}'", target))
                        .with_heading("Done")
                        .with_page(&request.page),
                );
                self.track(
                    request,
                    TelemetryEvent::new("PageTransformDone")
                        .with_property("page", &request.page)
                        .with_metric("duration_ms", duration_ms as f64),
                );
                PageOutcome {
                    page: request.page.clone(),
                    target: Some(target),
                    status: PageStatus::Done,
                    stage: None,
                    reason: None,
                    duration_ms,
                }
            }
            Ok(Terminal::Skipped { target, reason }) => {
                self.bus.log(
                    LogEvent::info(reason.clone())
                        .with_heading("Skipped")
                        .with_page(&request.page),
                );
                self.track(
                    request,
                    TelemetryEvent::new("PageTransformSkipped")
                        .with_property("page", &request.page)
                        .with_property("reason", &reason),
                );
                PageOutcome {
                    page: request.page.clone(),
                    target,
                    status: PageStatus::Skipped,
                    stage: None,
                    reason: Some(reason),
                    duration_ms,
                }
            }
            Err(err) => {
                let stage = err.stage();
                self.bus.log(
                    LogEvent::error(format!("Transformation failed during {}", stage))
                        .with_heading("Failed")
                        .with_page(&request.page)
                        .with_error(&err),
                );
                self.track(
                    request,
                    TelemetryEvent::new("PageTransformFailed")
                        .with_property("page", &request.page)
                        .with_property("stage", stage.to_string())
                        .with_property("error", err.to_string()),
                );
                PageOutcome {
                    page: request.page.clone(),
                    target: Some(target_name),
                    status: PageStatus::Failed,
                    stage: Some(stage),
                    reason: Some(err.to_string()),
                    duration_ms,
                }
            }
        }
    }

    fn run_stages(
        &self,
        request: &TransformationRequest,
        properties: &MappingProperties,
        target_name: &str,
    ) -> Result<Terminal, PageError> {
        let source = self
            .platform
            .load_page(&self.source_container, &request.page)
            .map_err(PageError::platform(PipelineStage::LoadSource))?;
        if source.is_modern() {
            return Ok(Terminal::Skipped {
                target: None,
                reason: "Page is already a modern page".to_string(),
            });
        }

        let layout = self
            .mappings
            .find_layout(source.layout.as_deref(), source.content_type.as_deref())
            .ok_or_else(|| PageError::NoLayoutMapping {
                layout: source.layout.clone(),
                content_type: source.content_type.clone(),
            })?;
        let exists = self
            .platform
            .page_exists(&self.target_container, target_name)
            .map_err(PageError::platform(PipelineStage::ResolveMapping))?;
        if exists && !request.overwrite {
            return Ok(Terminal::Skipped {
                target: Some(target_name.to_string()),
                reason: format!("Target page '{}' already exists", target_name),
            });
        }

        let target = self.assemble(&source, layout, properties, target_name)?;

        self.platform
            .save_page(&self.target_container, &target, request.overwrite)
            .map_err(PageError::platform(PipelineStage::Persist))?;
        Ok(Terminal::Done {
            target: target.name,
        })
    }

    fn assemble(
        &self,
        source: &SourcePage,
        layout: &BoundLayout,
        properties: &MappingProperties,
        target_name: &str,
    ) -> Result<TargetPage, PageError> {
        let ctx = FunctionContext {
            page: &source.name,
            platform: self.platform,
            mappings: self.tables,
            properties,
            bus: self.bus,
        };
        let mut target = TargetPage::new(target_name, &layout.target_template);

        for directive in &layout.directives {
            let output = match &directive.call {
                Some(call) => call.invoke(&source.fields, &ctx).map_err(PageError::function)?,
                None => match source
                    .field(&directive.field)
                    .or_else(|| lookup_ignore_case(&source.fields, &directive.field))
                {
                    Some(value) => FunctionOutput::text(value),
                    None => continue,
                },
            };
            place(&mut target, &directive.placement, output);
        }

        for web_part in &source.web_parts {
            let Some(mapping) = self.mappings.find_web_part(&web_part.web_part_type) else {
                ctx.log(
                    LogEvent::warning(format!("No mapping for web part type '{}'", web_part.web_part_type))
                        .with_heading("WebPart"),
                );
                continue;
            };

            let key = match &mapping.selector {
                Some(selector) => Some(
                    selector
                        .invoke_text(&web_part.properties, &ctx)
                        .map_err(PageError::function)?,
                ),
                None => None,
            };
            let Some(variant) = self.mappings.select_variant(mapping, key.as_deref()) else {
                ctx.log(
                    LogEvent::debug(format!("Web part '{}' dropped by its selector", web_part.web_part_type))
                        .with_heading("WebPart"),
                );
                continue;
            };

            let component = target.component_at(&variant.component, web_part.row, web_part.column, web_part.order);
            for property in &variant.properties {
                let output = match (&property.call, &property.source) {
                    (Some(call), _) => call.invoke(&web_part.properties, &ctx).map_err(PageError::function)?,
                    (None, Some(name)) => match lookup_ignore_case(&web_part.properties, name) {
                        Some(value) => FunctionOutput::text(value),
                        None => continue,
                    },
                    (None, None) => continue,
                };
                apply(component, &property.property, output);
            }
        }

        self.drop_unavailable(&mut target, &ctx)?;

        if !properties.skip_url_rewrite() {
            for component in &mut target.components {
                if let Some(text) = component.properties.get_mut(TEXT_PROPERTY) {
                    *text = rewrite_links(text, &self.tables.urls);
                }
            }
        }

        target.sort_components();
        Ok(target)
    }

    fn drop_unavailable(&self, target: &mut TargetPage, ctx: &FunctionContext<'_>) -> Result<(), PageError> {
        if target.components.is_empty() {
            return Ok(());
        }

        let available = self.cache.get_or_compute(self.platform.site_id(), || {
            self.platform
                .available_components()
                .map_err(PageError::platform(PipelineStage::Transform))
        })?;

        target.components.retain(|component| {
            let known = available
                .iter()
                .any(|descriptor| descriptor.name.eq_ignore_ascii_case(&component.component));
            if !known {
                ctx.log(
                    LogEvent::warning(format!(
                        "Component '{}' is not available on site '{}'",
                        component.component,
                        self.platform.site_id()
                    ))
                    .with_heading("Components"),
                );
            }
            known
        });
        Ok(())
    }

    fn track(&self, request: &TransformationRequest, event: TelemetryEvent) {
        if request.skip_telemetry {
            return;
        }
        if let Some(sink) = self.telemetry {
            best_effort(self.bus, || sink.track(&event));
        }
    }
}

fn place(target: &mut TargetPage, placement: &Placement, output: FunctionOutput) {
    match placement {
        Placement::Metadata { field } => match output {
            FunctionOutput::Text(text) => {
                target.metadata.insert(field.clone(), text);
            }
            FunctionOutput::Properties(properties) => target.metadata.extend(properties),
        },
        Placement::Component {
            component,
            property,
            section,
            column,
            order,
        } => {
            let slot = target.component_at(component, *section, *column, *order);
            apply(slot, property, output);
        }
    }
}

fn apply(component: &mut TargetComponent, property: &str, output: FunctionOutput) {
    match output {
        FunctionOutput::Text(text) => {
            component.properties.insert(property.to_string(), text);
        }
        FunctionOutput::Properties(properties) => component.properties.extend(properties),
    }
}

fn lookup_ignore_case<'v>(values: &'v std::collections::BTreeMap<String, String>, name: &str) -> Option<&'v str> {
    values
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function_registry::FunctionRegistry;
    use crate::mapping_loader::parse_mapping_document;
    use crate::mapping_table::{MappingEntry, MappingTable};
    use crate::model::{ComponentDescriptor, SourceWebPart, MODERN_MARKER_FIELD, MODERN_PAGE_MARKER};
    use crate::observer::{CountingObserver, Severity};
    use crate::platform::MemoryPlatform;
    use crate::request::{SKIP_URL_REWRITE, SUMMARY_LINKS_TO_QUICK_LINKS};
    use crate::telemetry::TelemetryError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MAPPING: &str = r#"
layouts:
  - id: ArticleLeft
    default: true
    target_template: Article
    fields:
      - field: Title
        placement: { kind: metadata, field: Title }
      - field: PublishingPageContent
        placement: { kind: component, component: Text, order: 1 }
      - field: PublishingRollupImage
        placement: { kind: component, component: Image, order: 2 }
        function: "ImageProperties({PublishingRollupImage}, 'Rollup')"
  - id: Track
    target_template: Article
    fields:
      - field: Title
        placement: { kind: metadata, field: Title }
        function: "Track({Title})"
web_parts:
  - web_part_type: SummaryLinks
    selector: "SummaryLinksSelector()"
    variants:
      - key: QuickLinks
        component: QuickLinks
        properties:
          - property: items
            source: Links
      - key: Text
        component: Text
        properties:
          - property: text
            source: Links
  - web_part_type: ScriptEditor
    selector: "ScriptEditorSelector()"
    variants:
      - key: CommunityScriptEditor
        component: ScriptEditor
        properties:
          - property: script
            source: Content
"#;

    struct Fixture {
        mappings: BoundMappings,
        tables: MappingTables,
        counter: CountingObserver,
        bus: ObserverBus,
        tracked_calls: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let tracked_calls = Arc::new(AtomicUsize::new(0));
            let calls = tracked_calls.clone();
            let mut registry = FunctionRegistry::new();
            registry.register_fn("Track", move |args: &[String], _ctx: &FunctionContext<'_>| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(FunctionOutput::text(args.concat()))
            });

            let (document, _) = parse_mapping_document(MAPPING, "inline").unwrap();
            let mappings = registry.bind_document(document).unwrap();

            let tables = MappingTables {
                urls: MappingTable::new(vec![MappingEntry {
                    source: "/sites/old".to_string(),
                    target: "/sites/new".to_string(),
                }]),
                ..MappingTables::default()
            };
            let counter = CountingObserver::new();
            let bus = ObserverBus::new().with_observer(counter.clone());

            Self {
                mappings,
                tables,
                counter,
                bus,
                tracked_calls,
            }
        }

        fn pipeline<'a>(&'a self, platform: &'a MemoryPlatform) -> TransformationPipeline<'a> {
            TransformationPipeline::new(platform, &self.mappings, &self.tables, &self.bus)
        }
    }

    fn catalogue(platform: MemoryPlatform) -> MemoryPlatform {
        platform
            .with_component(ComponentDescriptor::new("Text", "c-text"))
            .with_component(ComponentDescriptor::new("Image", "c-image"))
            .with_component(ComponentDescriptor::new("QuickLinks", "c-links"))
    }

    fn article(name: &str) -> SourcePage {
        SourcePage::new(name)
            .with_layout("ArticleLeft")
            .with_field("Title", "Quarterly news")
            .with_field("PublishingPageContent", r#"<a href="/sites/old/doc.pdf">doc</a>"#)
            .with_field("PublishingRollupImage", "/sites/old/img/banner.png")
    }

    #[test]
    fn test_transform_assembles_and_saves_target() {
        let fixture = Fixture::new();
        let platform = catalogue(MemoryPlatform::new("site-1")).with_page(
            "Pages",
            article("news.aspx").with_web_part(
                SourceWebPart::new("SummaryLinks")
                    .at(2, 1, 0)
                    .with_property("Links", "<a href='/sites/old/a'>a</a>"),
            ),
        );
        let pipeline = fixture.pipeline(&platform);

        let outcome = pipeline.transform(&TransformationRequest::new("news.aspx").with_target_prefix("Migrated_"));

        assert!(outcome.is_done(), "{:?}", outcome);
        let saved = platform.saved_page("SitePages", "Migrated_news.aspx").unwrap();
        assert_eq!(saved.layout_template, "Article");
        assert_eq!(saved.metadata.get("Title").map(String::as_str), Some("Quarterly news"));

        let names: Vec<&str> = saved.components.iter().map(|c| c.component.as_str()).collect();
        assert_eq!(names, vec!["Text", "Image", "QuickLinks"]);
        assert_eq!(
            saved.components[0].properties.get("text").map(String::as_str),
            Some(r#"<a href="/sites/new/doc.pdf">doc</a>"#)
        );
        assert_eq!(
            saved.components[1].properties.get("imageSource").map(String::as_str),
            Some("/sites/new/img/banner.png")
        );
        assert_eq!(saved.components[1].properties.get("altText").map(String::as_str), Some("Rollup"));
        assert_eq!(
            saved.components[2].properties.get("items").map(String::as_str),
            Some("<a href='/sites/old/a'>a</a>")
        );
    }

    #[test]
    fn test_skip_on_exists_runs_no_functions() {
        let fixture = Fixture::new();
        let platform = catalogue(MemoryPlatform::new("site-1"))
            .with_page("Pages", SourcePage::new("tracked.aspx").with_layout("Track").with_field("Title", "x"))
            .with_existing_target("SitePages", TargetPage::new("tracked.aspx", "Article"));
        let pipeline = fixture.pipeline(&platform);

        let outcome = pipeline.transform(&TransformationRequest::new("tracked.aspx"));

        assert!(outcome.is_skipped());
        assert_eq!(fixture.tracked_calls.load(Ordering::SeqCst), 0);
        assert_eq!(platform.component_requests(), 0);

        let outcome = pipeline.transform(&TransformationRequest::new("tracked.aspx").with_overwrite(true));
        assert!(outcome.is_done());
        assert_eq!(fixture.tracked_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_plain_field_directive_matches_case_insensitively() {
        let fixture = Fixture::new();
        let platform = catalogue(MemoryPlatform::new("site-1")).with_page(
            "Pages",
            SourcePage::new("lower.aspx")
                .with_layout("ArticleLeft")
                .with_field("title", "Lower-cased title")
                .with_field("publishingpagecontent", "<p>body</p>"),
        );

        let outcome = fixture.pipeline(&platform).transform(&TransformationRequest::new("lower.aspx"));

        assert!(outcome.is_done(), "{:?}", outcome);
        let saved = platform.saved_page("SitePages", "lower.aspx").unwrap();
        assert_eq!(saved.metadata.get("Title").map(String::as_str), Some("Lower-cased title"));
        assert_eq!(
            saved.components[0].properties.get("text").map(String::as_str),
            Some("<p>body</p>")
        );
    }

    #[test]
    fn test_modern_page_is_skipped() {
        let fixture = Fixture::new();
        let platform = MemoryPlatform::new("site-1").with_page(
            "Pages",
            article("modern.aspx").with_field(MODERN_MARKER_FIELD, MODERN_PAGE_MARKER),
        );

        let outcome = fixture.pipeline(&platform).transform(&TransformationRequest::new("modern.aspx"));

        assert!(outcome.is_skipped());
        assert_eq!(outcome.reason.as_deref(), Some("Page is already a modern page"));
        assert_eq!(platform.saved_count("SitePages"), 0);
    }

    #[test]
    fn test_missing_source_fails_in_load_stage() {
        let fixture = Fixture::new();
        let platform = MemoryPlatform::new("site-1");

        let outcome = fixture.pipeline(&platform).transform(&TransformationRequest::new("ghost.aspx"));

        assert!(outcome.is_failed());
        assert_eq!(outcome.stage, Some(PipelineStage::LoadSource));
        assert_eq!(
            fixture
                .counter
                .count_matching(|e| e.severity == Severity::Error && e.page.as_deref() == Some("ghost.aspx")),
            1
        );
    }

    #[test]
    fn test_unavailable_component_dropped_and_catalogue_cached() {
        let fixture = Fixture::new();
        let platform = MemoryPlatform::new("site-1")
            .with_component(ComponentDescriptor::new("Text", "c-text"))
            .with_page("Pages", article("a.aspx"))
            .with_page("Pages", article("b.aspx"));
        let pipeline = fixture.pipeline(&platform);

        let report = pipeline.run_batch(&[
            TransformationRequest::new("a.aspx"),
            TransformationRequest::new("b.aspx"),
        ]);

        assert_eq!(report.summary.succeeded, 2);
        let saved = platform.saved_page("SitePages", "a.aspx").unwrap();
        assert_eq!(saved.components.len(), 1);
        assert_eq!(saved.components[0].component, "Text");
        assert_eq!(platform.component_requests(), 1);
        assert_eq!(
            fixture
                .counter
                .count_matching(|e| e.heading.as_deref() == Some("Components")),
            2
        );
    }

    #[test]
    fn test_selector_follows_mapping_properties() {
        let fixture = Fixture::new();
        let page = SourcePage::new("links.aspx")
            .with_layout("ArticleLeft")
            .with_web_part(SourceWebPart::new("SummaryLinks").with_property("Links", "L"))
            .with_web_part(SourceWebPart::new("ScriptEditor").with_property("Content", "<script/>"))
            .with_web_part(SourceWebPart::new("UnknownPart"));
        let platform = catalogue(MemoryPlatform::new("site-1")).with_page("Pages", page);
        let pipeline = fixture
            .pipeline(&platform)
            .with_default_properties(MappingProperties::new().with(SUMMARY_LINKS_TO_QUICK_LINKS, "false"));

        let outcome = pipeline.transform(&TransformationRequest::new("links.aspx"));

        assert!(outcome.is_done());
        let saved = platform.saved_page("SitePages", "links.aspx").unwrap();
        let names: Vec<&str> = saved.components.iter().map(|c| c.component.as_str()).collect();
        assert_eq!(names, vec!["Text", "Image"]);
        assert_eq!(saved.components[0].properties.get("text").map(String::as_str), Some("L"));
        assert_eq!(
            fixture
                .counter
                .count_matching(|e| e.severity == Severity::Warning && e.message.contains("UnknownPart")),
            1
        );
    }

    #[test]
    fn test_skip_url_rewrite_leaves_links() {
        let fixture = Fixture::new();
        let platform = catalogue(MemoryPlatform::new("site-1")).with_page("Pages", article("raw.aspx"));

        let request = TransformationRequest::new("raw.aspx")
            .with_mapping_properties(&MappingProperties::new().with(SKIP_URL_REWRITE, "true"));
        fixture.pipeline(&platform).transform(&request);

        let saved = platform.saved_page("SitePages", "raw.aspx").unwrap();
        assert_eq!(
            saved.components[0].properties.get("text").map(String::as_str),
            Some(r#"<a href="/sites/old/doc.pdf">doc</a>"#)
        );
    }

    struct RecordingSink {
        events: Mutex<Vec<String>>,
        fail: bool,
    }

    impl TelemetrySink for RecordingSink {
        fn track(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
            self.events.lock().push(event.name.clone());
            if self.fail {
                Err(TelemetryError::Unavailable("offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_telemetry_is_best_effort_and_skippable() {
        let fixture = Fixture::new();
        let platform = catalogue(MemoryPlatform::new("site-1"))
            .with_page("Pages", article("a.aspx"))
            .with_page("Pages", article("b.aspx"));
        let sink = RecordingSink {
            events: Mutex::new(Vec::new()),
            fail: true,
        };
        let pipeline = fixture.pipeline(&platform).with_telemetry(&sink);

        let outcome = pipeline.transform(&TransformationRequest::new("a.aspx"));
        assert!(outcome.is_done());
        assert_eq!(*sink.events.lock(), vec!["PageTransformStarted", "PageTransformDone"]);

        pipeline.transform(&TransformationRequest::new("b.aspx").with_skip_telemetry(true));
        assert_eq!(sink.events.lock().len(), 2);
    }
}
