//! Text-template dialect
//!
//! A small subset of Go's `text/template`: field and method access on the
//! data source (`.Name`, `.GetValue "path"`), `if`/`else if`/`else`, `range`,
//! pipelines, parenthesized sub-expressions, the comparison and logic
//! builtins (`eq ne lt le gt ge not and or len join print`), trim markers and
//! comments. Used for adapter compose files, per-service compose files and
//! dynamic metadata properties.

pub mod eval;
pub mod lexer;
pub mod parser;
pub mod sources;
pub mod value;

use std::path::Path;

use crate::module::traits::ModuleError;
use crate::utils::fs::{write_file, FILE_MODE};

pub use eval::{NoData, TemplateData};
pub use sources::{
    AdapterDataSource, AdapterMode, BaseDataSource, ProjectAdapterPaths, PropertyDataSource,
    ServiceDataSource,
};
pub use value::TemplateValue;

/// Maximum nesting of blocks, sub-expressions and evaluation
pub const MAX_TEMPLATE_DEPTH: usize = 32;

/// A parsed template
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<parser::Node>,
}

impl Template {
    /// Parse template source; `name` is used in error messages
    pub fn parse(name: &str, source: &str) -> Result<Self, ModuleError> {
        let nodes = lexer::scan(source)
            .and_then(parser::parse)
            .map_err(|reason| ModuleError::TemplateRenderError {
                template: name.to_string(),
                reason,
            })?;
        Ok(Self {
            name: name.to_string(),
            nodes,
        })
    }

    /// Read and parse a template file
    pub fn from_file(path: &Path) -> Result<Self, ModuleError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ModuleError::io(path, "Failed to read template", e))?;
        Self::parse(&path.display().to_string(), &source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render against a data source
    pub fn render(&self, data: &dyn TemplateData) -> Result<String, ModuleError> {
        eval::render_nodes(&self.nodes, data).map_err(|reason| ModuleError::TemplateRenderError {
            template: self.name.clone(),
            reason,
        })
    }

    /// Render and write the result with the default file mode
    pub fn render_to_file(&self, data: &dyn TemplateData, dest: &Path) -> Result<(), ModuleError> {
        let rendered = self.render(data)?;
        write_file(dest, rendered.as_bytes(), FILE_MODE)
    }
}

/// Parse and render in one step
pub fn render_str(name: &str, source: &str, data: &dyn TemplateData) -> Result<String, ModuleError> {
    Template::parse(name, source)?.render(data)
}
