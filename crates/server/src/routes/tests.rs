use super::*;
use std::collections::BTreeSet;
use tt_core::clock::ManualClock;
use tt_core::memory::MemorySource;
use tt_core::{CacheConfig, Rank, TaxonChain, TreePipeline, Visibility};

fn owner(id: u64) -> OwnerId {
    OwnerId::new(id).unwrap()
}

fn carnivore(record_id: &str, owner_id: u64, tail: [(Rank, &str); 3]) -> TaxonChain {
    let ranks = [
        (Rank::Kingdom, "Animalia"),
        (Rank::Phylum, "Chordata"),
        (Rank::Class, "Mammalia"),
        (Rank::Order, "Carnivora"),
    ]
    .into_iter()
    .chain(tail)
    .map(|(rank, name)| (rank, name.to_string()));
    TaxonChain::new(record_id, owner(owner_id), Visibility::Friends, 10, ranks)
}

fn service() -> TreeService<MemorySource> {
    let source = MemorySource::new();
    source.insert(carnivore(
        "a-wolf",
        1,
        [(Rank::Family, "Canidae"), (Rank::Genus, "Canis"), (Rank::Species, "lupus")],
    ));
    source.insert(carnivore(
        "a-dog",
        1,
        [
            (Rank::Family, "Canidae"),
            (Rank::Genus, "Canis"),
            (Rank::Species, "familiaris"),
        ],
    ));
    source.insert(carnivore(
        "b-cat",
        2,
        [(Rank::Family, "Felidae"), (Rank::Genus, "Felis"), (Rank::Species, "catus")],
    ));
    source.befriend(owner(1), owner(2));
    TreeService::new(
        Arc::new(source),
        TreePipeline::default(),
        CacheConfig::default(),
        Arc::new(ManualClock::new(1_000)),
    )
}

fn request(method: &str, target: &str) -> HttpRequest {
    HttpRequest {
        method: method.to_string(),
        target: target.to_string(),
        headers: Vec::new(),
        body: Vec::new(),
    }
}

fn get(service: &TreeService<MemorySource>, target: &str) -> Result<Value, ApiError> {
    route(service, &request("GET", target))
}

fn error_code(result: Result<Value, ApiError>) -> &'static str {
    result.expect_err("request should fail").code
}

#[test]
fn friends_tree_carries_counts_and_capture_flags() {
    let service = service();
    let body = get(&service, "/tree?viewer=1&mode=friends").unwrap();
    assert_eq!(body["scope"], "friends:1:2");
    assert_eq!(body["nodes"].as_array().unwrap().len(), 15);
    assert_eq!(body["edges"].as_array().unwrap().len(), 14);
    assert_eq!(body["chunk_size"], 2048.0);
    assert_eq!(body["stats"]["animals"], 3);

    let animals = body["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|node| node["node_type"] == "animal")
        .collect::<Vec<_>>();
    for animal in animals {
        match animal["scientific_name"].as_str().unwrap() {
            "Canis lupus" | "Canis familiaris" => {
                assert_eq!(animal["captured_by_viewer"], true);
                assert_eq!(animal["captured_by_friend_ids"], json!([]));
            }
            "Felis catus" => {
                assert_eq!(animal["captured_by_viewer"], false);
                assert_eq!(animal["captured_by_friend_ids"], json!([2]));
                assert_eq!(animal["rank"], "species");
            }
            other => panic!("unexpected leaf {other}"),
        }
    }
}

#[test]
fn viewer_header_is_used_when_the_query_omits_it() {
    let service = service();
    let mut req = request("GET", "/tree");
    req.headers
        .push(("x-viewer-id".to_string(), "1".to_string()));
    let body = route(&service, &req).unwrap();
    assert_eq!(body["scope"], "personal:1");
    // Life, 4 Carnivora ranks, Canidae, Canis, 2 species, 2 leaves
    assert_eq!(body["nodes"].as_array().unwrap().len(), 11);
}

#[test]
fn empty_personal_scope_is_just_the_root() {
    let service = service();
    let body = get(&service, "/tree?viewer=9").unwrap();
    assert_eq!(body["nodes"].as_array().unwrap().len(), 1);
    assert_eq!(body["edges"].as_array().unwrap().len(), 0);
    assert_eq!(body["nodes"][0]["name"], "Life");
    assert_eq!(body["nodes"][0]["position"], json!([0.0, 0.0]));
}

#[test]
fn bad_requests_get_stable_codes() {
    let service = service();
    assert_eq!(error_code(get(&service, "/tree?viewer=1&mode=everyone")), "INVALID_MODE");
    assert_eq!(error_code(get(&service, "/tree?viewer=abc")), "INVALID_VIEWER");
    assert_eq!(error_code(get(&service, "/tree?viewer=0")), "INVALID_VIEWER");
    assert_eq!(
        error_code(get(&service, "/tree?viewer=1&mode=selected&friend_ids=2,x")),
        "INVALID_VIEWER"
    );
    assert_eq!(error_code(get(&service, "/tree?mode=friends")), "VIEWER_REQUIRED");
    assert_eq!(error_code(get(&service, "/tree/chunk/x/0?viewer=1")), "INVALID_CHUNK");
    assert_eq!(error_code(get(&service, "/tree/chunks?viewer=1&min_cx=0")), "INVALID_CHUNK");
    assert_eq!(error_code(get(&service, "/nowhere")), "NOT_FOUND");

    let err = route(&service, &request("DELETE", "/tree")).unwrap_err();
    assert_eq!(err.status_line(), "405 Method Not Allowed");
    let err = route(&service, &request("GET", "/tree/invalidate")).unwrap_err();
    assert_eq!(err.status, 405);
}

#[test]
fn source_outage_is_retryable() {
    let service = service();
    service.backend().set_unavailable(true);
    let err = get(&service, "/tree?viewer=1&mode=friends").unwrap_err();
    assert_eq!(err.code, "SOURCE_UNAVAILABLE");
    assert_eq!(err.status, 503);
}

#[test]
fn chunk_window_reconstructs_the_full_tree() {
    let service = service();
    let full = get(&service, "/tree?viewer=1&mode=friends").unwrap();
    let min = &full["chunk_bounds"]["min"];
    let max = &full["chunk_bounds"]["max"];
    let window = get(
        &service,
        &format!(
            "/tree/chunks?viewer=1&mode=friends&min_cx={}&min_cy={}&max_cx={}&max_cy={}",
            min[0], min[1], max[0], max[1]
        ),
    )
    .unwrap();

    let mut node_ids = Vec::new();
    let mut edges = Vec::new();
    for chunk in window["chunks"].as_array().unwrap() {
        for node in chunk["nodes"].as_array().unwrap() {
            node_ids.push(node["id"].as_str().unwrap().to_string());
        }
        for edge in chunk["edges"].as_array().unwrap() {
            edges.push(edge.clone());
        }
    }
    let unique = node_ids.iter().cloned().collect::<BTreeSet<_>>();
    assert_eq!(unique.len(), node_ids.len(), "no node in two chunks");
    let expected = full["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| node["id"].as_str().unwrap().to_string())
        .collect::<BTreeSet<_>>();
    assert_eq!(unique, expected);
    assert_eq!(edges.len(), full["edges"].as_array().unwrap().len());

    let single = get(&service, "/tree/chunk/0/0?viewer=1&mode=friends").unwrap();
    assert_eq!(single["cx"], 0);
    assert!(!single["nodes"].as_array().unwrap().is_empty());
    let far = get(&service, "/tree/chunk/-500/9000?viewer=1&mode=friends").unwrap();
    assert_eq!(far["nodes"], json!([]));
    assert_eq!(far["edges"], json!([]));
}

#[test]
fn search_ranks_exact_before_prefix() {
    let service = service();
    let body = get(&service, "/tree/search?viewer=1&mode=friends&q=CANIS").unwrap();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["name"], "Canis");
    assert_eq!(items[0]["match"], "exact");
    assert_eq!(items[0]["rank"], "genus");
    assert!(items[1..].iter().all(|item| item["match"] == "prefix"));

    let limited = get(&service, "/tree/search?viewer=1&mode=friends&q=canis&limit=1").unwrap();
    assert_eq!(limited["items"].as_array().unwrap().len(), 1);

    let empty = get(&service, "/tree/search?viewer=1&mode=friends").unwrap();
    assert_eq!(empty["items"], json!([]));
}

#[test]
fn invalidate_accepts_one_target() {
    let service = service();
    get(&service, "/tree?viewer=1&mode=friends").unwrap();
    get(&service, "/tree?viewer=1").unwrap();

    let mut req = request("POST", "/tree/invalidate");
    req.body = br#"{"owner_id": 2}"#.to_vec();
    let body = route(&service, &req).unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["evicted"], 1);

    req.body = br#"{"scope": "personal:1"}"#.to_vec();
    assert_eq!(route(&service, &req).unwrap()["evicted"], 1);

    req.body = br#"{"all": true}"#.to_vec();
    assert_eq!(route(&service, &req).unwrap()["evicted"], 0);

    for bad in [
        br#"{}"#.as_slice(),
        br#"{"all": false}"#.as_slice(),
        br#"{"all": true, "owner_id": 1}"#.as_slice(),
        br#"{"scope": "nobody"}"#.as_slice(),
        br#"{"owner_id": 0}"#.as_slice(),
        b"not json".as_slice(),
    ] {
        req.body = bad.to_vec();
        assert_eq!(route(&service, &req).unwrap_err().code, "INVALID_BODY");
    }
}

#[test]
fn health_reports_cache_activity() {
    let service = service();
    get(&service, "/tree?viewer=1").unwrap();
    get(&service, "/tree?viewer=1").unwrap();
    let body = get(&service, "/health").unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["cache"]["builds"], 1);
    assert_eq!(body["cache"]["hits"], 1);
    assert_eq!(body["cache"]["entries"], 1);
    assert_eq!(body["layout"]["orientation"], "top-down");
}
