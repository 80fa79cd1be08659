use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value of the marker field on pages that are already in the target model
pub const MODERN_PAGE_MARKER: &str = "b6917cb1-93a0-4b97-a84d-7cf49975d4ec";

/// Name of the marker field inspected to tell modern pages from classic ones
pub const MODERN_MARKER_FIELD: &str = "ClientSideApplicationId";

/// A legacy page as read from the content platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePage {
    pub name: String,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub web_parts: Vec<SourceWebPart>,
}

impl SourcePage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_web_part(mut self, web_part: SourceWebPart) -> Self {
        self.web_parts.push(web_part);
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn is_modern(&self) -> bool {
        self.field(MODERN_MARKER_FIELD)
            .is_some_and(|marker| marker.eq_ignore_ascii_case(MODERN_PAGE_MARKER))
    }
}

/// A legacy content fragment hosted on a source page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceWebPart {
    pub web_part_type: String,
    #[serde(default = "first_position")]
    pub row: u32,
    #[serde(default = "first_position")]
    pub column: u32,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn first_position() -> u32 {
    1
}

impl SourceWebPart {
    pub fn new(web_part_type: impl Into<String>) -> Self {
        Self {
            web_part_type: web_part_type.into(),
            row: 1,
            column: 1,
            order: 0,
            properties: BTreeMap::new(),
        }
    }

    pub fn at(mut self, row: u32, column: u32, order: u32) -> Self {
        self.row = row;
        self.column = column;
        self.order = order;
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// The assembled page written back to the platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetPage {
    pub name: String,
    pub layout_template: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub components: Vec<TargetComponent>,
}

impl TargetPage {
    pub fn new(name: impl Into<String>, layout_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout_template: layout_template.into(),
            metadata: BTreeMap::new(),
            components: Vec::new(),
        }
    }

    /// Find the component occupying a slot, creating it if needed
    pub fn component_at(&mut self, component: &str, section: u32, column: u32, order: u32) -> &mut TargetComponent {
        let position = self.components.iter().position(|c| {
            c.component == component && c.section == section && c.column == column && c.order == order
        });
        let index = match position {
            Some(index) => index,
            None => {
                self.components.push(TargetComponent {
                    component: component.to_string(),
                    section,
                    column,
                    order,
                    properties: BTreeMap::new(),
                });
                self.components.len() - 1
            }
        };
        &mut self.components[index]
    }

    /// Order components by section, column, then order
    pub fn sort_components(&mut self) {
        self.components
            .sort_by_key(|c| (c.section, c.column, c.order));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetComponent {
    pub component: String,
    pub section: u32,
    pub column: u32,
    pub order: u32,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// A component available on the target site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub schema: Vec<String>,
}

impl ComponentDescriptor {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            schema: Vec::new(),
        }
    }
}
