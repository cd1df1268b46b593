use std::{collections::BTreeMap, path::Path};

use tracing::info;

use super::types::{ContainerPort, Template, TemplateError, TemplateFile};

/// Immutable lookup of templates by id. Built once at startup.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: Vec<Template>,
}

fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl TemplateRegistry {
    pub fn new(templates: Vec<Template>) -> Self {
        TemplateRegistry { templates }
    }

    /// The presets every deployment starts with.
    pub fn builtin() -> Self {
        Self::new(vec![
            Template {
                id: "minecraft".to_string(),
                name: "Minecraft (Java)".to_string(),
                image: "itzg/minecraft-server".to_string(),
                ports: vec![ContainerPort::tcp(25565)],
                env: env(&[("EULA", "TRUE"), ("MEMORY", "1G")]),
                data_path: "/data".to_string(),
            },
            Template {
                id: "valheim".to_string(),
                name: "Valheim".to_string(),
                image: "lloesche/valheim-server".to_string(),
                ports: vec![ContainerPort::udp(2456), ContainerPort::udp(2457)],
                env: env(&[("SERVER_NAME", "Valheim"), ("SERVER_PUBLIC", "false")]),
                data_path: "/config".to_string(),
            },
            Template {
                id: "factorio".to_string(),
                name: "Factorio".to_string(),
                image: "factoriotools/factorio".to_string(),
                ports: vec![ContainerPort::udp(34197), ContainerPort::tcp(27015)],
                env: BTreeMap::new(),
                data_path: "/factorio".to_string(),
            },
        ])
    }

    /// Built-ins plus the templates of a TOML document. A document entry
    /// replaces a built-in with the same id.
    pub fn with_overrides(document: &str) -> Result<Self, TemplateError> {
        let file: TemplateFile = toml::from_str(document)?;
        let mut registry = Self::builtin();
        for template in file.templates {
            match registry.templates.iter_mut().find(|t| t.id == template.id) {
                Some(existing) => *existing = template,
                None => registry.templates.push(template),
            }
        }
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let document = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::with_overrides(&document)?;
        info!(path = %path.display(), count = registry.templates.len(), "templates loaded");
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn list(&self) -> &[Template] {
        &self.templates
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
