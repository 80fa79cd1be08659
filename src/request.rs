use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Convert summary link web parts into quick links instead of text. Default `true`.
pub const SUMMARY_LINKS_TO_QUICK_LINKS: &str = "SummaryLinksToQuickLinks";

/// Map script editor web parts onto the community script editor. Default `false`.
pub const USE_COMMUNITY_SCRIPT_EDITOR: &str = "UseCommunityScriptEditor";

/// Leave embedded links untouched instead of rewriting them via the URL mapping. Default `false`.
pub const SKIP_URL_REWRITE: &str = "SkipUrlRewrite";

/// Open string-to-string bag of feature toggles. Unknown keys are carried
/// but never consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingProperties(BTreeMap<String, String>);

impl MappingProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Interpret a toggle; anything other than `true`/`false` falls back to the default
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            _ => default,
        }
    }

    /// Overlay `other` on top of these properties; `other` wins on conflicts
    pub fn merged_with(&self, other: &MappingProperties) -> MappingProperties {
        let mut merged = self.0.clone();
        for (key, value) in &other.0 {
            merged.retain(|existing, _| !existing.eq_ignore_ascii_case(key));
            merged.insert(key.clone(), value.clone());
        }
        MappingProperties(merged)
    }

    pub fn summary_links_to_quick_links(&self) -> bool {
        self.flag(SUMMARY_LINKS_TO_QUICK_LINKS, true)
    }

    pub fn use_community_script_editor(&self) -> bool {
        self.flag(USE_COMMUNITY_SCRIPT_EDITOR, false)
    }

    pub fn skip_url_rewrite(&self) -> bool {
        self.flag(SKIP_URL_REWRITE, false)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MappingProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(MappingProperties::new(), |props, (k, v)| props.with(k, v))
    }
}

/// One page to transform plus its options. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationRequest {
    pub page: String,
    pub overwrite: bool,
    pub skip_telemetry: bool,
    pub target_page_name: Option<String>,
    pub target_page_prefix: Option<String>,
    pub mapping_properties: MappingProperties,
}

impl TransformationRequest {
    pub fn new(page: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            overwrite: false,
            skip_telemetry: false,
            target_page_name: None,
            target_page_prefix: None,
            mapping_properties: MappingProperties::new(),
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_skip_telemetry(mut self, skip: bool) -> Self {
        self.skip_telemetry = skip;
        self
    }

    pub fn with_target_name(mut self, name: impl Into<String>) -> Self {
        self.target_page_name = Some(name.into());
        self
    }

    pub fn with_target_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.target_page_prefix = Some(prefix.into());
        self
    }

    /// Merge feature toggles; values given here override existing ones
    pub fn with_mapping_properties(mut self, properties: &MappingProperties) -> Self {
        self.mapping_properties = self.mapping_properties.merged_with(properties);
        self
    }

    /// Override name, else prefix plus source name, else the source name
    pub fn target_name(&self) -> String {
        if let Some(name) = self.target_page_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        match self.target_page_prefix.as_deref() {
            Some(prefix) => format!("{}{}", prefix, self.page),
            None => self.page.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_defaults_and_parsing() {
        let props = MappingProperties::new()
            .with("summarylinkstoquicklinks", "False")
            .with(USE_COMMUNITY_SCRIPT_EDITOR, "yes");

        assert!(!props.summary_links_to_quick_links());
        assert!(!props.use_community_script_editor());
        assert!(!props.skip_url_rewrite());
        assert!(MappingProperties::new().summary_links_to_quick_links());
    }

    #[test]
    fn test_merge_overrides_case_insensitively() {
        let base = MappingProperties::new().with("SkipUrlRewrite", "false").with("Other", "x");
        let overlay = MappingProperties::new().with("skipurlrewrite", "true");

        let merged = base.merged_with(&overlay);
        assert!(merged.skip_url_rewrite());
        assert_eq!(merged.get("other"), Some("x"));
    }

    #[test]
    fn test_target_name_resolution() {
        let request = TransformationRequest::new("home.aspx");
        assert_eq!(request.target_name(), "home.aspx");

        let prefixed = request.clone().with_target_prefix("Migrated_");
        assert_eq!(prefixed.target_name(), "Migrated_home.aspx");

        let named = prefixed.with_target_name("welcome.aspx");
        assert_eq!(named.target_name(), "welcome.aspx");
    }

    #[test]
    fn test_collect_properties() {
        let props: MappingProperties = vec![("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(props.get("b"), Some("2"));
    }
}
