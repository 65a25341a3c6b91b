//! Regex-driven scan of Go sources for Huma routes and struct types.
//!
//! This is not a Go parser. It recognises the shapes the project scaffold
//! produces:
//!
//! ```go
//! huma.Get(api, "/api/users/{id}", h.GetUser)
//! huma.Register(api, huma.Operation{OperationID: "create-user", Method: http.MethodPost, Path: "/api/users"}, h.CreateUser)
//! func (h *Handler) GetUser(ctx context.Context, input *GetUserInput) (*GetUserOutput, error)
//! type User struct { ID string `json:"id"` }
//! ```
//!
//! Anything else is ignored.

use super::{Analysis, Field, Route, SourceAnalyzer, TypeDef};
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Directories scanned relative to the project root.
pub const SOURCE_DIRS: &[&str] = &["internal/api", "internal/types", "cmd/server"];

struct Patterns {
    shorthand: Regex,
    register: Regex,
    signature: Regex,
    inline_handler: Regex,
    handler_ref: Regex,
    struct_decl: Regex,
    field: Regex,
    embedded: Regex,
    tag: Regex,
    op_id: Regex,
    op_method_const: Regex,
    op_method_str: Regex,
    op_path: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("analyzer pattern is valid");
        Patterns {
            shorthand: re(r#"huma\.(Get|Post|Put|Patch|Delete|Head|Options)\s*\(\s*[\w.]+\s*,\s*"([^"]*)"\s*,\s*"#),
            register: re(r"huma\.Register\s*\(\s*[\w.]+\s*,\s*huma\.Operation\s*\{"),
            signature: re(
                r"func\s+(?:\(\s*\w*\s*\*?[\w.]+\s*\)\s*)?([A-Za-z_]\w*)\s*\(\s*\w+\s+context\.Context\s*,\s*\w+\s+\*?([\w.]+)\s*\)\s*\(\s*\*?([\w.]+)\s*,\s*error\s*\)",
            ),
            inline_handler: re(
                r"^func\s*\(\s*\w+\s+context\.Context\s*,\s*\w+\s+\*?([\w.]+)\s*(?:\{\s*\})?\s*\)\s*\(\s*\*?([\w.]+)\s*(?:\{\s*\})?\s*,\s*error\s*\)",
            ),
            handler_ref: re(r"^([\w.]+)"),
            struct_decl: re(r"type\s+([A-Z]\w*)\s+struct\s*\{"),
            field: re(r"^([A-Z]\w*)\s+([^\s`]+)\s*(?:`([^`]*)`)?"),
            embedded: re(r"^\*?([\w.]+)\s*(?:`[^`]*`)?$"),
            tag: re(r#"(\w+):"([^"]*)""#),
            op_id: re(r#"OperationID:\s*"([^"]*)""#),
            op_method_const: re(r"Method:\s*http\.Method(\w+)"),
            op_method_str: re(r#"Method:\s*"(\w+)""#),
            op_path: re(r#"Path:\s*"([^"]*)""#),
        }
    })
}

/// Analyzer for Huma-based Go backends.
#[derive(Debug, Clone)]
pub struct GoSourceAnalyzer {
    dirs: Vec<String>,
}

impl GoSourceAnalyzer {
    pub fn new() -> Self {
        Self {
            dirs: SOURCE_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_dirs(dirs: Vec<String>) -> Self {
        Self { dirs }
    }

    /// Analyze already-loaded sources. Used directly by tests.
    pub fn analyze_sources(&self, sources: &[String]) -> Analysis {
        let p = patterns();
        let sources: Vec<String> = sources.iter().map(|s| strip_line_comments(s)).collect();

        let mut signatures: HashMap<String, (String, String)> = HashMap::new();
        let mut types: BTreeMap<String, TypeDef> = BTreeMap::new();
        for src in &sources {
            for cap in p.signature.captures_iter(src) {
                signatures.insert(cap[1].to_string(), (cap[2].to_string(), cap[3].to_string()));
            }
            for def in parse_structs(src) {
                types.insert(def.name.clone(), def);
            }
        }

        let mut routes = Vec::new();
        for src in &sources {
            for cap in p.shorthand.captures_iter(src) {
                let Some(whole) = cap.get(0) else { continue };
                let method = cap[1].to_ascii_uppercase();
                let path = cap[2].to_string();
                let (handler, input, output) = resolve_handler(&src[whole.end()..], &signatures);
                routes.push(Route {
                    operation_id: default_operation_id(&method, &path),
                    method,
                    path,
                    handler,
                    input,
                    output,
                });
            }

            for m in p.register.find_iter(src) {
                let open = m.end() - 1;
                let Some((body, close)) = balanced_block(src, open) else {
                    continue;
                };
                let Some(route) = parse_operation(body, &src[close + 1..], &signatures) else {
                    tracing::debug!("Skipping huma.Register without method or path");
                    continue;
                };
                routes.push(route);
            }
        }

        Analysis { routes, types }
    }

    fn collect_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dir in &self.dirs {
            let dir = root.join(dir);
            if dir.is_dir() {
                walk_go_files(&dir, &mut files)?;
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Default for GoSourceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceAnalyzer for GoSourceAnalyzer {
    fn analyze(&self, root: &Path) -> Result<Analysis> {
        if !root.is_dir() {
            return Err(Error::Analysis(format!(
                "project root {} is not a directory",
                root.display()
            )));
        }

        let files = self.collect_files(root)?;
        let sources = files
            .iter()
            .map(|f| {
                std::fs::read_to_string(f)
                    .map_err(|e| Error::Analysis(format!("cannot read {}: {}", f.display(), e)))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!("Analyzing {} Go files under {}", files.len(), root.display());
        Ok(self.analyze_sources(&sources))
    }
}

fn walk_go_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Analysis(format!("cannot list {}: {}", dir.display(), e)))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            walk_go_files(&path, out)?;
        } else if is_analyzable(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_analyzable(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".go") && !name.ends_with("_test.go")
}

fn strip_line_comments(src: &str) -> String {
    src.lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Body of the `{ ... }` block opening at `open`, and the index of its `}`.
fn balanced_block(src: &str, open: usize) -> Option<(&str, usize)> {
    let bytes = src.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if let Some(quote) = in_string {
            if b == quote && bytes.get(i.wrapping_sub(1)) != Some(&b'\\') {
                in_string = None;
            }
            continue;
        }
        match b {
            b'"' | b'`' => in_string = Some(b),
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&src[open + 1..i], i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Handler name plus input/output types for the handler expression at the start of `rest`.
fn resolve_handler(
    rest: &str,
    signatures: &HashMap<String, (String, String)>,
) -> (String, Option<String>, Option<String>) {
    let p = patterns();
    let rest = rest.trim_start();

    if let Some(cap) = p.inline_handler.captures(rest) {
        return ("inline".to_string(), named_type(&cap[1]), named_type(&cap[2]));
    }

    let Some(cap) = p.handler_ref.captures(rest) else {
        return ("unknown".to_string(), None, None);
    };
    let handler = cap[1].rsplit('.').next().unwrap_or(&cap[1]).to_string();
    match signatures.get(&handler) {
        Some((input, output)) => (handler, named_type(input), named_type(output)),
        None => (handler, None, None),
    }
}

fn named_type(go: &str) -> Option<String> {
    let name = go.rsplit('.').next().unwrap_or(go);
    (name != "struct" && !name.is_empty()).then(|| name.to_string())
}

fn parse_operation(
    body: &str,
    after: &str,
    signatures: &HashMap<String, (String, String)>,
) -> Option<Route> {
    let p = patterns();
    let method = p
        .op_method_const
        .captures(body)
        .or_else(|| p.op_method_str.captures(body))
        .map(|c| c[1].to_ascii_uppercase())?;
    let path = p.op_path.captures(body).map(|c| c[1].to_string())?;
    let operation_id = p
        .op_id
        .captures(body)
        .map(|c| c[1].to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| default_operation_id(&method, &path));

    let after = after.trim_start().strip_prefix(',').unwrap_or(after);
    let (handler, input, output) = resolve_handler(after, signatures);

    Some(Route {
        method,
        path,
        operation_id,
        handler,
        input,
        output,
    })
}

/// `GET /api/users/{id}` → `get-api-users-by-id`
pub fn default_operation_id(method: &str, path: &str) -> String {
    let mut parts = vec![method.to_ascii_lowercase()];
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(param) => {
                parts.push("by".to_string());
                parts.push(param.to_ascii_lowercase());
            }
            None => parts.push(segment.to_ascii_lowercase()),
        }
    }
    parts.join("-")
}

fn parse_structs(src: &str) -> Vec<TypeDef> {
    let p = patterns();
    let mut defs = Vec::new();
    for cap in p.struct_decl.captures_iter(src) {
        let Some(whole) = cap.get(0) else { continue };
        let Some((body, _)) = balanced_block(src, whole.end() - 1) else {
            continue;
        };
        let (fields, embedded) = parse_fields(body);
        defs.push(TypeDef {
            name: cap[1].to_string(),
            fields,
            embedded,
        });
    }
    defs
}

fn parse_fields(body: &str) -> (Vec<Field>, Vec<String>) {
    let p = patterns();
    let mut fields = Vec::new();
    let mut embedded = Vec::new();
    let mut depth = 0i32;

    for line in body.lines() {
        let line = line.trim();
        if depth == 0 && !line.is_empty() {
            if let Some(cap) = p.field.captures(line) {
                let go_type = cap[2].trim_end_matches('{').to_string();
                let tags = cap
                    .get(3)
                    .map(|t| {
                        p.tag
                            .captures_iter(t.as_str())
                            .map(|c| (c[1].to_string(), c[2].to_string()))
                            .collect()
                    })
                    .unwrap_or_default();
                fields.push(Field {
                    name: cap[1].to_string(),
                    go_type,
                    tags,
                });
            } else if let Some(cap) = p.embedded.captures(line) {
                if let Some(name) = named_type(&cap[1]) {
                    embedded.push(name);
                }
            }
        }
        depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;
    }

    (fields, embedded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDLERS: &str = r#"
package api

import (
    "context"
    "net/http"

    "github.com/danielgtaylor/huma/v2"
)

// huma.Get(api, "/api/commented", h.Nope)

type GetUserInput struct {
    ID string `path:"id" doc:"User ID"`
}

type GetUserOutput struct {
    Body User
}

type CreateUserInput struct {
    Body CreateUserBody
}

type CreateUserOutput struct {
    Body User
}

func Register(api huma.API, h *Handler) {
    huma.Get(api, "/api/users/{id}", h.GetUser)
    huma.Register(api, huma.Operation{
        OperationID: "create-user",
        Method:      http.MethodPost,
        Path:        "/api/users",
        Tags:        []string{"users"},
    }, h.CreateUser)
    huma.Get(api, "/api/health", func(ctx context.Context, input *struct{}) (*HealthOutput, error) {
        return &HealthOutput{}, nil
    })
}

func (h *Handler) GetUser(ctx context.Context, input *GetUserInput) (*GetUserOutput, error) {
    return nil, nil
}

func (h *Handler) CreateUser(ctx context.Context, in *CreateUserInput) (*CreateUserOutput, error) {
    return nil, nil
}
"#;

    const TYPES: &str = r#"
package types

import "time"

type Base struct {
    CreatedAt time.Time `json:"created_at"`
}

type User struct {
    Base
    ID       string            `json:"id"`
    Email    string            `json:"email"`
    Nickname *string           `json:"nickname,omitempty"`
    Password string            `json:"-"`
    Meta     struct {
        Source string `json:"source"`
    } `json:"meta"`
    Labels   map[string]string `json:"labels"`
}

type CreateUserBody struct {
    Email string `json:"email" format:"email"`
}

type internalOnly struct {
    X int
}
"#;

    fn analyze() -> Analysis {
        GoSourceAnalyzer::new().analyze_sources(&[HANDLERS.to_string(), TYPES.to_string()])
    }

    #[test]
    fn test_shorthand_route_resolves_handler_types() {
        let analysis = analyze();
        let route = analysis
            .routes
            .iter()
            .find(|r| r.path == "/api/users/{id}")
            .unwrap();
        assert_eq!(route.method, "GET");
        assert_eq!(route.operation_id, "get-api-users-by-id");
        assert_eq!(route.handler, "GetUser");
        assert_eq!(route.input.as_deref(), Some("GetUserInput"));
        assert_eq!(route.output.as_deref(), Some("GetUserOutput"));
    }

    #[test]
    fn test_register_route_with_nested_braces() {
        let analysis = analyze();
        let route = analysis
            .routes
            .iter()
            .find(|r| r.operation_id == "create-user")
            .unwrap();
        assert_eq!(route.method, "POST");
        assert_eq!(route.path, "/api/users");
        assert_eq!(route.handler, "CreateUser");
        assert_eq!(route.input.as_deref(), Some("CreateUserInput"));
    }

    #[test]
    fn test_inline_handler_and_comments() {
        let analysis = analyze();
        let health = analysis.routes.iter().find(|r| r.path == "/api/health").unwrap();
        assert_eq!(health.handler, "inline");
        assert_eq!(health.input, None);
        assert_eq!(health.output.as_deref(), Some("HealthOutput"));

        assert!(analysis.routes.iter().all(|r| r.path != "/api/commented"));
        assert_eq!(analysis.routes.len(), 3);
    }

    #[test]
    fn test_structs_fields_tags_and_embedding() {
        let analysis = analyze();
        assert!(!analysis.types.contains_key("internalOnly"));

        let user = &analysis.types["User"];
        assert_eq!(user.embedded, ["Base"]);
        let names: Vec<&str> = user.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["ID", "Email", "Nickname", "Password", "Meta", "Labels"]);
        assert_eq!(user.field("Meta").unwrap().go_type, "struct");
        assert_eq!(user.field("Labels").unwrap().go_type, "map[string]string");
        assert_eq!(user.field("Nickname").unwrap().tag("json"), Some("nickname,omitempty"));

        let input = &analysis.types["GetUserInput"];
        assert_eq!(input.field("ID").unwrap().tag("path"), Some("id"));
    }

    #[test]
    fn test_default_operation_id() {
        assert_eq!(default_operation_id("GET", "/api/health"), "get-api-health");
        assert_eq!(
            default_operation_id("DELETE", "/api/users/{userId}/posts/{id}"),
            "delete-api-users-by-userid-posts-by-id"
        );
    }

    #[test]
    fn test_analyze_walks_source_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let api = dir.path().join("internal/api/users");
        std::fs::create_dir_all(&api).unwrap();
        std::fs::write(api.join("handlers.go"), HANDLERS).unwrap();
        std::fs::write(api.join("handlers_test.go"), "huma.Get(api, \"/api/test\", h.T)").unwrap();
        let types = dir.path().join("internal/types");
        std::fs::create_dir_all(&types).unwrap();
        std::fs::write(types.join("user.go"), TYPES).unwrap();
        std::fs::write(types.join("notes.txt"), "huma.Get(api, \"/api/txt\", h.T)").unwrap();

        let analysis = GoSourceAnalyzer::new().analyze(dir.path()).unwrap();
        assert_eq!(analysis.routes.len(), 3);
        assert!(analysis.types.contains_key("User"));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let err = GoSourceAnalyzer::new()
            .analyze(Path::new("/definitely/not/here/flux"))
            .unwrap_err();
        assert!(matches!(err, Error::Analysis(_)));
    }
}
