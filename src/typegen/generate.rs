//! Renderers for the generated TypeScript and JSON files.

use super::{Analysis, Route, TypeDef};
use crate::error::Result;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write;
use std::path::{Component, Path};
use std::sync::OnceLock;

const HEADER: &str = "// Code generated by flux. DO NOT EDIT.\n";

/// Map a Go type expression to TypeScript.
///
/// Named types resolve only when `known` contains them; anything the
/// mapping cannot express becomes `unknown`.
pub fn ts_type(go: &str, known: &BTreeSet<String>) -> String {
    let go = go.trim();
    if let Some(inner) = go.strip_prefix('*') {
        return ts_type(inner, known);
    }
    if go == "[]byte" {
        return "string".to_string();
    }
    if let Some(inner) = go.strip_prefix("[]") {
        return array_of(ts_type(inner, known));
    }
    if let Some(rest) = go.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return array_of(ts_type(&rest[end + 1..], known));
        }
    }
    if let Some(rest) = go.strip_prefix("map[") {
        if let Some(end) = closing_bracket(rest) {
            return format!("Record<string, {}>", ts_type(&rest[end + 1..], known));
        }
    }

    match go {
        "string" | "time.Time" | "uuid.UUID" => "string".to_string(),
        "bool" => "boolean".to_string(),
        "int" | "int8" | "int16" | "int32" | "int64" | "uint" | "uint8" | "uint16" | "uint32"
        | "uint64" | "uintptr" | "float32" | "float64" | "byte" | "rune" | "time.Duration" => {
            "number".to_string()
        }
        "struct" => "Record<string, unknown>".to_string(),
        _ => {
            let base = go.rsplit('.').next().unwrap_or(go);
            if known.contains(base) {
                base.to_string()
            } else {
                "unknown".to_string()
            }
        }
    }
}

fn array_of(element: String) -> String {
    if element.contains(' ') || element.contains('|') {
        format!("({})[]", element)
    } else {
        format!("{}[]", element)
    }
}

/// Index of the `]` closing a `map[` key, given the text after `map[`.
fn closing_bracket(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn known_types(analysis: &Analysis) -> BTreeSet<String> {
    analysis.types.keys().cloned().collect()
}

/// Types that only wrap handler input/output for the framework.
fn route_wrappers(analysis: &Analysis) -> BTreeSet<&str> {
    analysis
        .routes
        .iter()
        .flat_map(|r| [r.input.as_deref(), r.output.as_deref()])
        .flatten()
        .collect()
}

fn property_name(name: &str) -> String {
    let is_ident = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if is_ident {
        name.to_string()
    } else {
        format!("{:?}", name)
    }
}

/// `types.ts`: one interface per exported struct that is not a route wrapper.
pub fn render_types(analysis: &Analysis) -> String {
    let known = known_types(analysis);
    let wrappers = route_wrappers(analysis);

    let mut out = String::from(HEADER);
    for def in analysis.types.values() {
        if wrappers.contains(def.name.as_str()) {
            continue;
        }
        out.push('\n');
        render_interface(&mut out, def, &known);
    }
    if analysis.types.is_empty() {
        out.push_str("\nexport {};\n");
    }
    out
}

fn render_interface(out: &mut String, def: &TypeDef, known: &BTreeSet<String>) {
    let extends: Vec<&str> = def
        .embedded
        .iter()
        .filter(|e| known.contains(*e))
        .map(String::as_str)
        .collect();
    if extends.is_empty() {
        let _ = writeln!(out, "export interface {} {{", def.name);
    } else {
        let _ = writeln!(out, "export interface {} extends {} {{", def.name, extends.join(", "));
    }
    for field in &def.fields {
        let Some(json) = field.json_name() else {
            continue;
        };
        let optional = if field.is_optional() { "?" } else { "" };
        let _ = writeln!(
            out,
            "  {}{}: {};",
            property_name(&json),
            optional,
            ts_type(&field.go_type, known)
        );
    }
    out.push_str("}\n");
}

/// `routes.json`: the route list as pretty JSON.
pub fn render_route_manifest(analysis: &Analysis) -> Result<String> {
    let mut json = serde_json::to_string_pretty(&analysis.routes)?;
    json.push('\n');
    Ok(json)
}

/// `getUser`, `createUser` from `get-user`, `create-user`.
fn function_name(operation_id: &str) -> String {
    let mut name = String::new();
    for (i, word) in operation_id
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .enumerate()
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            if i == 0 {
                name.push(first.to_ascii_lowercase());
            } else {
                name.push(first.to_ascii_uppercase());
            }
            name.push_str(chars.as_str());
        }
    }
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "op");
    }
    name
}

struct Param {
    name: String,
    ts: String,
}

struct ClientCall<'a> {
    route: &'a Route,
    path_params: Vec<Param>,
    query_params: Vec<Param>,
    body: Option<String>,
    response: String,
}

impl<'a> ClientCall<'a> {
    fn new(route: &'a Route, types: &'a BTreeMap<String, TypeDef>, known: &BTreeSet<String>) -> Self {
        let input = route.input.as_ref().and_then(|n| types.get(n));
        let output = route.output.as_ref().and_then(|n| types.get(n));

        let params = |tag: &str| -> Vec<Param> {
            input
                .map(|def| {
                    def.fields
                        .iter()
                        .filter_map(|f| {
                            f.tag(tag).map(|name| Param {
                                name: name.split(',').next().unwrap_or(name).to_string(),
                                ts: ts_type(&f.go_type, known),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Self {
            route,
            path_params: params("path"),
            query_params: params("query"),
            body: input
                .and_then(|def| def.field("Body"))
                .map(|f| ts_type(&f.go_type, known)),
            response: output
                .and_then(|def| def.field("Body"))
                .map(|f| ts_type(&f.go_type, known))
                .unwrap_or_else(|| "void".to_string()),
        }
    }

    fn has_params(&self) -> bool {
        !self.path_params.is_empty() || !self.query_params.is_empty()
    }

    fn render(&self, out: &mut String, name: &str) {
        let mut args = Vec::new();
        if self.has_params() {
            let fields: Vec<String> = self
                .path_params
                .iter()
                .map(|p| format!("{}: {}", property_name(&p.name), p.ts))
                .chain(self.query_params.iter().map(|p| {
                    format!("{}?: {}", property_name(&p.name), p.ts)
                }))
                .collect();
            args.push(format!("params: {{ {} }}", fields.join("; ")));
        }
        if let Some(body) = &self.body {
            args.push(format!("body: {}", body));
        }

        let mut path = self.route.path.clone();
        for p in &self.path_params {
            path = path.replace(
                &format!("{{{}}}", p.name),
                &format!("${{encodeURIComponent(String(params[{:?}]))}}", p.name),
            );
        }

        let _ = writeln!(
            out,
            "export async function {}({}): Promise<{}> {{",
            name,
            args.join(", "),
            self.response
        );
        let body_arg = if self.body.is_some() { ", body" } else { "" };
        if self.query_params.is_empty() {
            let _ = writeln!(
                out,
                "  return request<{}>({:?}, `{}`{});",
                self.response, self.route.method, path, body_arg
            );
        } else {
            out.push_str("  const query = new URLSearchParams();\n");
            for p in &self.query_params {
                let _ = writeln!(
                    out,
                    "  if (params[{0:?}] !== undefined) query.set({0:?}, String(params[{0:?}]));",
                    p.name
                );
            }
            out.push_str("  const qs = query.toString();\n");
            let _ = writeln!(
                out,
                "  return request<{}>({:?}, `{}${{qs ? `?${{qs}}` : \"\"}}`{});",
                self.response, self.route.method, path, body_arg
            );
        }
        out.push_str("}\n");
    }
}

const REQUEST_HELPER: &str = r#"export class ApiError extends Error {
  constructor(
    public readonly status: number,
    public readonly body: string,
  ) {
    super(`HTTP ${status}: ${body}`);
  }
}

async function request<T>(method: string, path: string, body?: unknown): Promise<T> {
  const res = await fetch(path, {
    method,
    headers: body === undefined ? undefined : { "Content-Type": "application/json" },
    body: body === undefined ? undefined : JSON.stringify(body),
  });
  if (!res.ok) {
    throw new ApiError(res.status, await res.text());
  }
  if (res.status === 204) {
    return undefined as T;
  }
  return (await res.json()) as T;
}
"#;

/// `api.ts`: a typed fetch wrapper per route. `types_import` is the module
/// specifier of `types.ts` as seen from the client's directory.
pub fn render_api_client(analysis: &Analysis, types_import: &str) -> String {
    let known = known_types(analysis);
    let calls: Vec<ClientCall<'_>> = analysis
        .routes
        .iter()
        .map(|r| ClientCall::new(r, &analysis.types, &known))
        .collect();

    let mut used = BTreeSet::new();
    for call in &calls {
        let signatures = call
            .path_params
            .iter()
            .chain(&call.query_params)
            .map(|p| p.ts.as_str())
            .chain(call.body.as_deref())
            .chain(std::iter::once(call.response.as_str()));
        for ts in signatures {
            for ident in identifiers(ts) {
                if known.contains(ident) {
                    used.insert(ident.to_string());
                }
            }
        }
    }

    let mut out = String::from(HEADER);
    if !used.is_empty() {
        let names: Vec<String> = used.into_iter().collect();
        let _ = writeln!(
            out,
            "import type {{ {} }} from {:?};",
            names.join(", "),
            types_import
        );
    }
    out.push('\n');
    out.push_str(REQUEST_HELPER);

    let mut seen: HashMap<String, usize> = HashMap::new();
    for call in &calls {
        let base = function_name(&call.route.operation_id);
        let count = seen.entry(base.clone()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            base
        } else {
            format!("{}{}", base, count)
        };
        out.push('\n');
        call.render(&mut out, &name);
    }
    out
}

fn identifiers(ts: &str) -> impl Iterator<Item = &str> {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"\b[A-Z]\w*\b").expect("identifier pattern is valid"))
        .find_iter(ts)
        .map(|m| m.as_str())
}

/// Module specifier for `target` (no extension) imported from a file in `from_dir`.
pub fn relative_import(from_dir: &Path, target: &Path) -> String {
    let from: Vec<Component<'_>> = from_dir.components().collect();
    let to: Vec<Component<'_>> = target.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<String> = std::iter::repeat("..".to_string())
        .take(from.len() - common)
        .collect();
    parts.extend(
        to[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );

    let joined = parts.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{}", joined)
    }
}
