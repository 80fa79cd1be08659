use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use crate::model::{ComponentDescriptor, SourcePage, TargetPage};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Page '{name}' not found in {container}")]
    PageNotFound { container: String, name: String },

    #[error("Page '{name}' already exists in {container}")]
    PageExists { container: String, name: String },

    #[error("Content platform I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Content platform returned malformed data for {item}: {message}")]
    Malformed { item: String, message: String },
}

/// The remote content platform, seen only through the operations the
/// pipeline needs. Implementations are used from one thread at a time.
pub trait ContentPlatform {
    /// Stable identifier of the site, used as the outer cache key
    fn site_id(&self) -> &str;

    fn load_page(&self, container: &str, name: &str) -> Result<SourcePage, PlatformError>;

    /// Page names in a container, optionally restricted to a case-insensitive prefix
    fn list_pages(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>, PlatformError>;

    fn page_exists(&self, container: &str, name: &str) -> Result<bool, PlatformError>;

    fn save_page(&self, container: &str, page: &TargetPage, overwrite: bool) -> Result<(), PlatformError>;

    /// Components available on the target side of this site
    fn available_components(&self) -> Result<Vec<ComponentDescriptor>, PlatformError>;

    /// Server-relative root path of a list, `None` when no such list exists
    fn list_root_path(&self, list_id: &str) -> Result<Option<String>, PlatformError>;
}

fn matches_prefix(name: &str, prefix: Option<&str>) -> bool {
    match prefix {
        None => true,
        Some(prefix) => name
            .to_ascii_lowercase()
            .starts_with(&prefix.to_ascii_lowercase()),
    }
}

/// In-memory platform for tests and dry runs
#[derive(Default)]
pub struct MemoryPlatform {
    site_id: String,
    pages: Mutex<HashMap<String, BTreeMap<String, SourcePage>>>,
    saved: Mutex<HashMap<String, BTreeMap<String, TargetPage>>>,
    components: Vec<ComponentDescriptor>,
    lists: HashMap<String, String>,
    component_requests: Mutex<usize>,
}

impl MemoryPlatform {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            ..Self::default()
        }
    }

    pub fn with_page(self, container: &str, page: SourcePage) -> Self {
        self.pages
            .lock()
            .entry(container.to_string())
            .or_default()
            .insert(page.name.clone(), page);
        self
    }

    pub fn with_existing_target(self, container: &str, page: TargetPage) -> Self {
        self.saved
            .lock()
            .entry(container.to_string())
            .or_default()
            .insert(page.name.clone(), page);
        self
    }

    pub fn with_component(mut self, component: ComponentDescriptor) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_list(mut self, list_id: impl Into<String>, root_path: impl Into<String>) -> Self {
        self.lists.insert(list_id.into().to_ascii_lowercase(), root_path.into());
        self
    }

    pub fn saved_page(&self, container: &str, name: &str) -> Option<TargetPage> {
        self.saved
            .lock()
            .get(container)
            .and_then(|pages| pages.get(name))
            .cloned()
    }

    pub fn saved_count(&self, container: &str) -> usize {
        self.saved.lock().get(container).map_or(0, BTreeMap::len)
    }

    /// How many times the component catalogue was requested
    pub fn component_requests(&self) -> usize {
        *self.component_requests.lock()
    }
}

impl ContentPlatform for MemoryPlatform {
    fn site_id(&self) -> &str {
        &self.site_id
    }

    fn load_page(&self, container: &str, name: &str) -> Result<SourcePage, PlatformError> {
        self.pages
            .lock()
            .get(container)
            .and_then(|pages| pages.get(name))
            .cloned()
            .ok_or_else(|| PlatformError::PageNotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }

    fn list_pages(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>, PlatformError> {
        Ok(self
            .pages
            .lock()
            .get(container)
            .map(|pages| {
                pages
                    .keys()
                    .filter(|name| matches_prefix(name, prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn page_exists(&self, container: &str, name: &str) -> Result<bool, PlatformError> {
        let in_saved = self
            .saved
            .lock()
            .get(container)
            .is_some_and(|pages| pages.contains_key(name));
        let in_pages = self
            .pages
            .lock()
            .get(container)
            .is_some_and(|pages| pages.contains_key(name));
        Ok(in_saved || in_pages)
    }

    fn save_page(&self, container: &str, page: &TargetPage, overwrite: bool) -> Result<(), PlatformError> {
        let mut saved = self.saved.lock();
        let pages = saved.entry(container.to_string()).or_default();
        if !overwrite && pages.contains_key(&page.name) {
            return Err(PlatformError::PageExists {
                container: container.to_string(),
                name: page.name.clone(),
            });
        }
        pages.insert(page.name.clone(), page.clone());
        Ok(())
    }

    fn available_components(&self) -> Result<Vec<ComponentDescriptor>, PlatformError> {
        *self.component_requests.lock() += 1;
        Ok(self.components.clone())
    }

    fn list_root_path(&self, list_id: &str) -> Result<Option<String>, PlatformError> {
        Ok(self.lists.get(&list_id.to_ascii_lowercase()).cloned())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ListCatalogue {
    #[serde(default)]
    lists: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ComponentCatalogue {
    #[serde(default)]
    components: Vec<ComponentDescriptor>,
}

/// Platform backed by a directory tree: `<root>/<container>/<name>.yaml`
/// pages, `<root>/components.yaml` and `<root>/lists.yaml` catalogues.
pub struct FileSystemPlatform {
    root: PathBuf,
    site_id: String,
}

impl FileSystemPlatform {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let site_id = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Self { root, site_id }
    }

    pub fn with_site_id(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = site_id.into();
        self
    }

    fn page_path(&self, container: &str, name: &str) -> PathBuf {
        self.root.join(container).join(format!("{}.yaml", name))
    }

    fn read_yaml<T: serde::de::DeserializeOwned>(&self, path: &Path, item: &str) -> Result<T, PlatformError> {
        let text = fs::read_to_string(path).map_err(|source| PlatformError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|e| PlatformError::Malformed {
            item: item.to_string(),
            message: e.to_string(),
        })
    }
}

impl ContentPlatform for FileSystemPlatform {
    fn site_id(&self) -> &str {
        &self.site_id
    }

    fn load_page(&self, container: &str, name: &str) -> Result<SourcePage, PlatformError> {
        let path = self.page_path(container, name);
        if !path.is_file() {
            return Err(PlatformError::PageNotFound {
                container: container.to_string(),
                name: name.to_string(),
            });
        }
        let mut page: SourcePage = self.read_yaml(&path, name)?;
        if page.name.is_empty() {
            page.name = name.to_string();
        }
        Ok(page)
    }

    fn list_pages(&self, container: &str, prefix: Option<&str>) -> Result<Vec<String>, PlatformError> {
        let dir = self.root.join(container);
        let entries = fs::read_dir(&dir).map_err(|source| PlatformError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PlatformError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if matches_prefix(stem, prefix) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn page_exists(&self, container: &str, name: &str) -> Result<bool, PlatformError> {
        Ok(self.page_path(container, name).is_file())
    }

    fn save_page(&self, container: &str, page: &TargetPage, overwrite: bool) -> Result<(), PlatformError> {
        let path = self.page_path(container, &page.name);
        if !overwrite && path.is_file() {
            return Err(PlatformError::PageExists {
                container: container.to_string(),
                name: page.name.clone(),
            });
        }

        let dir = self.root.join(container);
        fs::create_dir_all(&dir).map_err(|source| PlatformError::Io { path: dir, source })?;

        let yaml = serde_yaml::to_string(page).map_err(|e| PlatformError::Malformed {
            item: page.name.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, yaml).map_err(|source| PlatformError::Io { path, source })
    }

    fn available_components(&self) -> Result<Vec<ComponentDescriptor>, PlatformError> {
        let path = self.root.join("components.yaml");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let catalogue: ComponentCatalogue = self.read_yaml(&path, "components.yaml")?;
        Ok(catalogue.components)
    }

    fn list_root_path(&self, list_id: &str) -> Result<Option<String>, PlatformError> {
        let path = self.root.join("lists.yaml");
        if !path.is_file() {
            return Ok(None);
        }
        let catalogue: ListCatalogue = self.read_yaml(&path, "lists.yaml")?;
        Ok(catalogue
            .lists
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(list_id))
            .map(|(_, root)| root.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceWebPart;

    #[test]
    fn test_memory_platform_save_respects_overwrite() {
        let platform = MemoryPlatform::new("site");
        let page = TargetPage::new("home.aspx", "Article");

        platform.save_page("SitePages", &page, false).unwrap();
        assert!(matches!(
            platform.save_page("SitePages", &page, false),
            Err(PlatformError::PageExists { .. })
        ));
        platform.save_page("SitePages", &page, true).unwrap();
        assert_eq!(platform.saved_count("SitePages"), 1);
    }

    #[test]
    fn test_memory_platform_prefix_filter() {
        let platform = MemoryPlatform::new("site")
            .with_page("Pages", SourcePage::new("news-1.aspx"))
            .with_page("Pages", SourcePage::new("News-2.aspx"))
            .with_page("Pages", SourcePage::new("home.aspx"));

        let names = platform.list_pages("Pages", Some("news")).unwrap();
        assert_eq!(names, vec!["News-2.aspx", "news-1.aspx"]);
    }

    #[test]
    fn test_file_system_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pages = dir.path().join("Pages");
        fs::create_dir_all(&pages).unwrap();
        let source = SourcePage::new("home")
            .with_layout("ArticleLeft")
            .with_field("Title", "Welcome")
            .with_web_part(SourceWebPart::new("ContentEditorWebPart").with_property("Content", "<p>hi</p>"));
        fs::write(pages.join("home.yaml"), serde_yaml::to_string(&source).unwrap()).unwrap();
        fs::write(
            dir.path().join("lists.yaml"),
            "lists:\n  ABC-123: /sites/news/Lists/Events\n",
        )
        .unwrap();

        let platform = FileSystemPlatform::new(dir.path()).with_site_id("news");
        assert_eq!(platform.load_page("Pages", "home").unwrap(), source);
        assert_eq!(platform.list_pages("Pages", None).unwrap(), vec!["home"]);
        assert_eq!(
            platform.list_root_path("abc-123").unwrap().as_deref(),
            Some("/sites/news/Lists/Events")
        );
        assert!(platform.available_components().unwrap().is_empty());

        let target = TargetPage::new("home", "Article");
        assert!(!platform.page_exists("SitePages", "home").unwrap());
        platform.save_page("SitePages", &target, false).unwrap();
        assert!(platform.page_exists("SitePages", "home").unwrap());
    }

    #[test]
    fn test_file_system_missing_page() {
        let dir = tempfile::tempdir().unwrap();
        let platform = FileSystemPlatform::new(dir.path());
        assert!(matches!(
            platform.load_page("Pages", "nope"),
            Err(PlatformError::PageNotFound { .. })
        ));
    }
}
