//! TypeScript generation from the backend's Go sources.
//!
//! A [`SourceAnalyzer`] turns the project tree into an [`Analysis`]: the
//! routes the backend registers and the struct types it exchanges. Three
//! independent generators then render it:
//!
//! - `types.ts` under `frontend.types_dir`
//! - `api.ts` (typed fetch client) under `frontend.lib_dir`
//! - `internal/static/routes.json` (route manifest)

mod analyzer;
mod generate;

pub use analyzer::GoSourceAnalyzer;
pub use generate::{
    render_api_client, render_route_manifest, render_types, relative_import, ts_type,
};

use crate::config::ProjectConfig;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

pub const TYPES_FILE: &str = "types.ts";
pub const API_CLIENT_FILE: &str = "api.ts";
pub const ROUTE_MANIFEST: &str = "internal/static/routes.json";

/// An HTTP endpoint registered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub method: String,
    pub path: String,
    pub operation_id: String,
    pub handler: String,
    /// Go type of the handler's input struct.
    pub input: Option<String>,
    /// Go type of the handler's output struct.
    pub output: Option<String>,
}

/// A field of a Go struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub go_type: String,
    /// Struct tag key/value pairs, e.g. `json` → `id,omitempty`.
    pub tags: BTreeMap<String, String>,
}

impl Field {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Name in JSON, or `None` when the field is excluded with `json:"-"`.
    pub fn json_name(&self) -> Option<String> {
        match self.tag("json").map(|t| t.split(',').next().unwrap_or("")) {
            Some("-") => None,
            Some(name) if !name.is_empty() => Some(name.to_string()),
            _ => Some(self.name.clone()),
        }
    }

    pub fn is_optional(&self) -> bool {
        self.go_type.starts_with('*')
            || self
                .tag("json")
                .is_some_and(|t| t.split(',').skip(1).any(|opt| opt == "omitempty"))
    }
}

/// An exported Go struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<Field>,
    /// Embedded struct names.
    pub embedded: Vec<String>,
}

impl TypeDef {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Everything the generators need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub routes: Vec<Route>,
    /// Keyed by type name.
    pub types: BTreeMap<String, TypeDef>,
}

/// Extracts routes and types from a project tree.
pub trait SourceAnalyzer: Send + Sync {
    fn analyze(&self, root: &Path) -> Result<Analysis>;
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub routes: usize,
    pub types: usize,
    pub files: Vec<PathBuf>,
}

pub struct TypePipeline {
    analyzer: Arc<dyn SourceAnalyzer>,
    root: PathBuf,
    types_dir: PathBuf,
    lib_dir: PathBuf,
}

impl TypePipeline {
    pub fn new(root: impl Into<PathBuf>, config: &ProjectConfig) -> Self {
        let root = root.into();
        Self {
            analyzer: Arc::new(GoSourceAnalyzer::new()),
            types_dir: root.join(&config.frontend.types_dir),
            lib_dir: root.join(&config.frontend.lib_dir),
            root,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn SourceAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn types_path(&self) -> PathBuf {
        self.types_dir.join(TYPES_FILE)
    }

    pub fn api_client_path(&self) -> PathBuf {
        self.lib_dir.join(API_CLIENT_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(ROUTE_MANIFEST)
    }

    /// Analyze the sources, then run the three generators concurrently.
    ///
    /// Every generator runs to completion; the first failure is returned.
    pub async fn run(&self) -> Result<PipelineReport> {
        let analyzer = Arc::clone(&self.analyzer);
        let root = self.root.clone();
        let analysis = tokio::task::spawn_blocking(move || analyzer.analyze(&root))
            .await
            .map_err(|e| Error::Analysis(format!("analyzer task failed: {}", e)))??;
        let analysis = Arc::new(analysis);

        tracing::debug!(
            "Analyzed {} routes and {} types",
            analysis.routes.len(),
            analysis.types.len()
        );

        let types_path = self.types_path();
        let api_path = self.api_client_path();
        let manifest_path = self.manifest_path();
        let types_import = relative_import(&self.lib_dir, &self.types_dir.join("types"));

        let mut tasks = JoinSet::new();
        {
            let analysis = Arc::clone(&analysis);
            let path = types_path.clone();
            tasks.spawn_blocking(move || write_generated(&path, &render_types(&analysis)));
        }
        {
            let analysis = Arc::clone(&analysis);
            let path = api_path.clone();
            tasks.spawn_blocking(move || {
                write_generated(&path, &render_api_client(&analysis, &types_import))
            });
        }
        {
            let analysis = Arc::clone(&analysis);
            let path = manifest_path.clone();
            tasks.spawn_blocking(move || {
                let manifest = render_route_manifest(&analysis)?;
                write_generated(&path, &manifest)
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| Error::TypeGen(format!("generator task failed: {}", e)))
                .and_then(|r| r);
            if let Err(e) = result {
                tracing::debug!("Generator failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(PipelineReport {
            routes: analysis.routes.len(),
            types: analysis.types.len(),
            files: vec![types_path, api_path, manifest_path],
        })
    }
}

fn write_generated(path: &Path, contents: &str) -> Result<()> {
    crate::openapi::write_atomically(path, contents.as_bytes()).map_err(|e| {
        Error::TypeGen(format!("failed to write {}: {}", path.display(), e))
    })
}
