use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use crate::transformation_rule::MappingDocument;

/// Outcome of validating a layout/web-part mapping document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// One line per error, for inclusion in a fatal mapping error
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub error_type: ValidationErrorType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationErrorType {
    SchemaViolation,
    DuplicateLayout,
    MultipleDefaultLayouts,
    DuplicateWebPart,
    EmptyVariants,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub path: String,
    pub warning_type: ValidationWarningType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationWarningType {
    NoDefaultLayout,
    NoFallbackVariant,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, error_type: ValidationErrorType, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            error_type,
            message: message.into(),
        }
    }
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, warning_type: ValidationWarningType, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            warning_type,
            message: message.into(),
        }
    }
}

fn document_schema() -> serde_json::Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "layouts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "target_template"],
                    "properties": {
                        "id": { "type": "string", "minLength": 1 },
                        "content_type": { "type": ["string", "null"] },
                        "default": { "type": "boolean" },
                        "target_template": { "type": "string", "minLength": 1 },
                        "fields": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["field", "placement"],
                                "properties": {
                                    "field": { "type": "string", "minLength": 1 },
                                    "function": { "type": ["string", "null"] },
                                    "placement": {
                                        "type": "object",
                                        "required": ["kind"],
                                        "properties": {
                                            "kind": { "enum": ["metadata", "component"] }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "web_parts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["web_part_type", "variants"],
                    "properties": {
                        "web_part_type": { "type": "string", "minLength": 1 },
                        "selector": { "type": ["string", "null"] },
                        "variants": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["component"],
                                "properties": {
                                    "key": { "type": ["string", "null"] },
                                    "component": { "type": "string", "minLength": 1 },
                                    "properties": {
                                        "type": "array",
                                        "items": {
                                            "type": "object",
                                            "required": ["property"],
                                            "properties": {
                                                "property": { "type": "string", "minLength": 1 },
                                                "source": { "type": ["string", "null"] },
                                                "function": { "type": ["string", "null"] }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

/// Check the raw document shape against the mapping document schema
pub fn validate_document_shape(instance: &serde_json::Value) -> ValidationReport {
    let mut report = ValidationReport::new();
    let schema = document_schema();

    let compiled = match jsonschema::JSONSchema::compile(&schema) {
        Ok(compiled) => compiled,
        Err(err) => {
            report.add_error(ValidationError::new(
                "$",
                ValidationErrorType::SchemaViolation,
                format!("Mapping schema failed to compile: {}", err),
            ));
            return report;
        }
    };

    if let Err(errors) = compiled.validate(instance) {
        for error in errors {
            let path = error.instance_path.to_string();
            report.add_error(ValidationError::new(
                if path.is_empty() { "$".to_string() } else { path },
                ValidationErrorType::SchemaViolation,
                error.to_string(),
            ));
        }
    }

    report
}

/// Cross-entry checks the schema cannot express
pub fn validate_document(doc: &MappingDocument) -> ValidationReport {
    let mut report = ValidationReport::new();

    let mut ids = HashSet::new();
    for (i, layout) in doc.layouts.iter().enumerate() {
        if !ids.insert(layout.id.to_ascii_lowercase()) {
            report.add_error(ValidationError::new(
                format!("/layouts/{}/id", i),
                ValidationErrorType::DuplicateLayout,
                format!("Layout '{}' is defined more than once", layout.id),
            ));
        }
    }

    let defaults = doc.layouts.iter().filter(|l| l.default).count();
    if defaults > 1 {
        report.add_error(ValidationError::new(
            "/layouts",
            ValidationErrorType::MultipleDefaultLayouts,
            format!("{} layouts are marked default; at most one is allowed", defaults),
        ));
    } else if defaults == 0 && !doc.layouts.is_empty() {
        report.add_warning(ValidationWarning::new(
            "/layouts",
            ValidationWarningType::NoDefaultLayout,
            "No default layout; pages with an unmapped layout will fail",
        ));
    }

    let mut types = HashSet::new();
    for (i, web_part) in doc.web_parts.iter().enumerate() {
        if !types.insert(web_part.web_part_type.to_ascii_lowercase()) {
            report.add_error(ValidationError::new(
                format!("/web_parts/{}/web_part_type", i),
                ValidationErrorType::DuplicateWebPart,
                format!("Web part type '{}' is mapped more than once", web_part.web_part_type),
            ));
        }
        if web_part.variants.is_empty() {
            report.add_error(ValidationError::new(
                format!("/web_parts/{}/variants", i),
                ValidationErrorType::EmptyVariants,
                format!("Web part type '{}' has no variants", web_part.web_part_type),
            ));
        } else if web_part.selector.is_some() && web_part.variants.iter().all(|v| v.key.is_some()) {
            report.add_warning(ValidationWarning::new(
                format!("/web_parts/{}/variants", i),
                ValidationWarningType::NoFallbackVariant,
                format!(
                    "Web part type '{}' has no fallback variant; unmatched selector results drop the web part",
                    web_part.web_part_type
                ),
            ));
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml_to_json(text: &str) -> serde_json::Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_valid_shape() {
        let instance = yaml_to_json(
            r#"
            layouts:
              - id: ArticleLeft
                target_template: Article
                fields:
                  - field: Title
                    placement: { kind: metadata, field: Title }
            "#,
        );

        let report = validate_document_shape(&instance);
        assert!(report.is_valid, "{}", report.error_summary());
    }

    #[test]
    fn test_shape_violation_reports_path() {
        let instance = yaml_to_json(
            r#"
            layouts:
              - id: ArticleLeft
                fields: []
            "#,
        );

        let report = validate_document_shape(&instance);
        assert!(!report.is_valid);
        assert_eq!(report.errors[0].error_type, ValidationErrorType::SchemaViolation);
        assert!(report.errors[0].path.starts_with("/layouts/0"));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let instance = yaml_to_json("pagelayouts: []");
        assert!(validate_document_shape(&instance).has_errors());
    }

    #[test]
    fn test_semantic_checks() {
        let doc: MappingDocument = serde_yaml::from_str(
            r#"
            layouts:
              - { id: A, target_template: T, default: true }
              - { id: a, target_template: T, default: true }
            web_parts:
              - web_part_type: ContentEditorWebPart
                variants: []
            "#,
        )
        .unwrap();

        let report = validate_document(&doc);
        let kinds: Vec<_> = report.errors.iter().map(|e| e.error_type.clone()).collect();
        assert!(kinds.contains(&ValidationErrorType::DuplicateLayout));
        assert!(kinds.contains(&ValidationErrorType::MultipleDefaultLayouts));
        assert!(kinds.contains(&ValidationErrorType::EmptyVariants));
    }

    #[test]
    fn test_missing_default_is_warning() {
        let doc: MappingDocument =
            serde_yaml::from_str("layouts:\n  - { id: A, target_template: T }\n").unwrap();

        let report = validate_document(&doc);
        assert!(report.is_valid);
        assert_eq!(report.warnings[0].warning_type, ValidationWarningType::NoDefaultLayout);
    }
}
