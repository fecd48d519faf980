#![forbid(unsafe_code)]

use crate::error::ApiError;
use crate::http::HttpRequest;
use crate::render::{chunk_json, search_hit_json, tree_json};
use crate::service::{ScopeRequest, TreeBackend, TreeService};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;
use tt_core::chunk::{CellKey, ChunkError};
use tt_core::ids::parse_owner_csv;
use tt_core::search::{DEFAULT_LIMIT, MAX_LIMIT, normalize_query, search};
use tt_core::{LaidOutTree, OwnerId, ResolvedScope, ScopeKey, ScopeMode};

const VIEWER_HEADER: &str = "X-Viewer-Id";

/// Dispatches one request; every success is `200 OK` with a JSON body.
pub(crate) fn route<B: TreeBackend>(
    service: &TreeService<B>,
    request: &HttpRequest,
) -> Result<Value, ApiError> {
    let path = request.path();
    let segments = path.trim_start_matches('/').split('/').collect::<Vec<_>>();
    let method = request.method.as_str();
    let read = matches!(method, "GET" | "HEAD");
    match segments.as_slice() {
        ["health"] if read => Ok(health(service)),
        ["tree"] if read => full_tree(service, request),
        ["tree", "chunk", cx, cy] if read => chunk(service, request, cx, cy),
        ["tree", "chunks"] if read => chunk_window(service, request),
        ["tree", "search"] if read => search_tree(service, request),
        ["tree", "invalidate"] if method == "POST" => invalidate(service, request),
        ["health"]
        | ["tree"]
        | ["tree", "chunk", _, _]
        | ["tree", "chunks"]
        | ["tree", "search"]
        | ["tree", "invalidate"] => Err(ApiError::method_not_allowed(method)),
        _ => Err(ApiError::not_found()),
    }
}

fn invalid_viewer(field: &str) -> ApiError {
    ApiError::bad_request(
        "INVALID_VIEWER",
        format!("{field}: expected a positive integer user id."),
    )
}

pub(crate) fn scope_request(request: &HttpRequest) -> Result<ScopeRequest, ApiError> {
    let mode = match request.query("mode") {
        None => ScopeMode::Personal,
        Some(raw) => ScopeMode::parse(raw.as_deref().unwrap_or(""))?,
    };

    let viewer_raw = match request.query("viewer") {
        Some(raw) => Some(raw),
        None => request
            .header(VIEWER_HEADER)
            .filter(|value| !value.is_empty())
            .map(|value| Some(value.to_string())),
    };
    let viewer = match viewer_raw {
        None => None,
        Some(raw) => Some(
            raw.as_deref()
                .and_then(|value| OwnerId::parse(value).ok())
                .ok_or_else(|| invalid_viewer("viewer"))?,
        ),
    };

    let selected = match request.query("friend_ids") {
        None => Vec::new(),
        Some(raw) => raw
            .as_deref()
            .and_then(|value| parse_owner_csv(value).ok())
            .ok_or_else(|| invalid_viewer("friend_ids"))?,
    };

    Ok(ScopeRequest {
        viewer,
        mode,
        selected,
    })
}

fn scoped_tree<B: TreeBackend>(
    service: &TreeService<B>,
    request: &HttpRequest,
) -> Result<(ResolvedScope, Arc<LaidOutTree>), ApiError> {
    let scope = service.resolve(&scope_request(request)?)?;
    let tree = service.tree(&scope)?;
    Ok((scope, tree))
}

fn full_tree<B: TreeBackend>(
    service: &TreeService<B>,
    request: &HttpRequest,
) -> Result<Value, ApiError> {
    let (scope, tree) = scoped_tree(service, request)?;
    Ok(tree_json(&tree, &scope.capture_context()))
}

fn parse_cell(field: &str, raw: Option<&str>) -> Result<i64, ApiError> {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            ApiError::bad_request(
                "INVALID_CHUNK",
                format!("{field}: expected an integer cell coordinate."),
            )
        })
}

fn query_cell(request: &HttpRequest, field: &str) -> Result<i64, ApiError> {
    parse_cell(field, request.query(field).flatten().as_deref())
}

fn chunk<B: TreeBackend>(
    service: &TreeService<B>,
    request: &HttpRequest,
    cx: &str,
    cy: &str,
) -> Result<Value, ApiError> {
    let cx = parse_cell("cx", Some(cx))?;
    let cy = parse_cell("cy", Some(cy))?;
    let (scope, tree) = scoped_tree(service, request)?;
    let view = tree.chunks.fetch(cx, cy);
    Ok(chunk_json(&tree, &view, &scope.capture_context()))
}

fn chunk_window<B: TreeBackend>(
    service: &TreeService<B>,
    request: &HttpRequest,
) -> Result<Value, ApiError> {
    let min = CellKey {
        cx: query_cell(request, "min_cx")?,
        cy: query_cell(request, "min_cy")?,
    };
    let max = CellKey {
        cx: query_cell(request, "max_cx")?,
        cy: query_cell(request, "max_cy")?,
    };
    let (scope, tree) = scoped_tree(service, request)?;
    let views = tree.chunks.window(min, max).map_err(|err: ChunkError| {
        ApiError::bad_request("INVALID_CHUNK", err.to_string())
            .with_recovery("Request a smaller window or page through it.")
    })?;
    let ctx = scope.capture_context();
    Ok(json!({
        "scope": tree.key.as_str(),
        "chunk_size": tree.chunks.cell_size(),
        "chunks": views
            .iter()
            .map(|view| chunk_json(&tree, view, &ctx))
            .collect::<Vec<_>>(),
    }))
}

fn search_tree<B: TreeBackend>(
    service: &TreeService<B>,
    request: &HttpRequest,
) -> Result<Value, ApiError> {
    let query = request
        .query("q")
        .flatten()
        .map(|raw| normalize_query(&raw))
        .unwrap_or_default();
    let limit = request
        .query("limit")
        .flatten()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_LIMIT)
        .min(MAX_LIMIT);
    let (_, tree) = scoped_tree(service, request)?;
    let items = search(&tree.hierarchy, &query, limit)
        .iter()
        .filter_map(|hit| search_hit_json(&tree, hit))
        .collect::<Vec<_>>();
    Ok(json!({
        "scope": tree.key.as_str(),
        "query": query,
        "items": items,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InvalidateBody {
    scope: Option<String>,
    owner_id: Option<u64>,
    all: Option<bool>,
}

fn invalid_body(message: impl Into<String>) -> ApiError {
    ApiError::bad_request("INVALID_BODY", message).with_recovery(
        "Send exactly one of {\"scope\": \"<key>\"}, {\"owner_id\": n}, {\"all\": true}.",
    )
}

fn invalidate<B: TreeBackend>(
    service: &TreeService<B>,
    request: &HttpRequest,
) -> Result<Value, ApiError> {
    let body: InvalidateBody = serde_json::from_slice(&request.body)
        .map_err(|err| invalid_body(format!("body: {err}")))?;
    let cache = service.cache();
    let (target, evicted) = match body {
        InvalidateBody {
            scope: Some(raw),
            owner_id: None,
            all: None,
        } => {
            let key = ScopeKey::parse(&raw)
                .ok_or_else(|| invalid_body(format!("scope: unrecognized key {raw:?}")))?;
            let evicted = cache.invalidate(&key);
            (json!({"scope": key.as_str()}), evicted)
        }
        InvalidateBody {
            scope: None,
            owner_id: Some(raw),
            all: None,
        } => {
            let owner = OwnerId::new(raw).map_err(|err| invalid_body(format!("owner_id: {err}")))?;
            (json!({"owner_id": owner.get()}), cache.invalidate_owner(owner))
        }
        InvalidateBody {
            scope: None,
            owner_id: None,
            all: Some(true),
        } => (json!({"all": true}), cache.invalidate_all()),
        _ => return Err(invalid_body("body: expected exactly one invalidation target")),
    };
    info!(invalidated = %target, evicted, "cache invalidated on request");
    Ok(json!({
        "ok": true,
        "evicted": evicted,
        "target": target,
    }))
}

fn health<B: TreeBackend>(service: &TreeService<B>) -> Value {
    let stats = service.cache().stats();
    let layout = service.pipeline().layout_config();
    json!({
        "ok": true,
        "cache": {
            "hits": stats.hits,
            "coalesced": stats.coalesced,
            "misses": stats.misses,
            "builds": stats.builds,
            "failures": stats.failures,
            "evictions": stats.evictions,
            "entries": stats.entries,
            "in_flight": stats.in_flight,
            "ttl_ms": service.cache().config().ttl_ms,
        },
        "layout": {
            "sibling_gap": layout.sibling_gap,
            "subtree_gap": layout.subtree_gap,
            "row_height": layout.row_height,
            "orientation": layout.orientation.as_str(),
        },
        "chunk_size": service.pipeline().cell_size(),
    })
}

#[cfg(test)]
mod tests;
