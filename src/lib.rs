// Mapping-driven page transformation engine
pub mod cache;
pub mod config;
pub mod function_executor;
pub mod function_registry;
pub mod mapping_loader;
pub mod mapping_table;
pub mod model;
pub mod observer;
pub mod pipeline;
pub mod platform;
pub mod reporter;
pub mod request;
pub mod telemetry;
pub mod transformation_rule;
pub mod validation;

// Re-export core types for convenience
pub use cache::{CacheError, CacheManager, ComponentCache, Fingerprint};
pub use config::{ConfigError, MappingSource, TransformConfig};
pub use function_executor::{FunctionContext, FunctionError, FunctionOutput};
pub use function_registry::{BoundMappings, BuiltInFunction, FunctionRegistry, FunctionSet, TransformFunction};
pub use mapping_loader::{MappingError, MappingLoader};
pub use mapping_table::{MappingEntry, MappingTable, MappingTables, TermMapping, UrlMapping, UserMapping};
pub use model::{ComponentDescriptor, SourcePage, SourceWebPart, TargetComponent, TargetPage};
pub use observer::{CountingObserver, LogEvent, Observer, ObserverBus, Severity, TracingObserver};
pub use pipeline::{PageError, PipelineStage, TransformationPipeline};
pub use platform::{ContentPlatform, FileSystemPlatform, MemoryPlatform, PlatformError};
pub use reporter::{BatchReport, PageOutcome, PageStatus, ReportFormat, ReportObserver, TransformationReporter};
pub use request::{MappingProperties, TransformationRequest};
pub use telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetry};
pub use transformation_rule::{FunctionCall, LayoutMapping, MappingDocument, WebPartMapping};
pub use validation::{ValidationError, ValidationReport, ValidationWarning};
