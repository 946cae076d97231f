//! Per-backend catalog service tests
//!
//! Exercises one backend's xRegistry surface end to end against a
//! scriptable upstream: flag validation, the two-step filter pipeline,
//! pagination, entity invariants, and conditional GET.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use common::{TestAdapter, backend_router, build_engine, node_descriptor};
use xregistry_bridge::catalog::engine::EngineConfig;
use xregistry_bridge::catalog::filter::FilterBudget;

async fn send(
    app: &Router,
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, HeaderMap, Value) {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, json)
}

fn azure_names() -> Vec<String> {
    let mut names: Vec<String> = (0..30).map(|i| format!("azure-pkg-{i:02}")).collect();
    names.extend(["express".to_string(), "lodash".to_string(), "react".to_string()]);
    names
}

async fn azure_app() -> (Router, Arc<TestAdapter>, tempfile::TempDir) {
    let names = azure_names();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let adapter = Arc::new(TestAdapter::new(&refs));
    let dir = tempfile::tempdir().unwrap();
    let engine = build_engine(
        node_descriptor(),
        adapter.clone(),
        dir.path(),
        EngineConfig {
            // Cover the whole fixture so enrichment walks never truncate.
            budget: FilterBudget {
                max_metadata_fetches: 100,
                ..FilterBudget::default()
            },
            ..EngineConfig::default()
        },
    )
    .await;
    (backend_router(engine), adapter, dir)
}

#[tokio::test]
async fn root_carries_registry_shape_and_content_type() {
    let (app, _, _dir) = azure_app().await;
    let (status, headers, body) = send(&app, "/", &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").unwrap().to_str().unwrap(),
        "application/json; charset=utf-8; schema=\"xRegistry-json/1.0-rc2\""
    );
    assert!(headers.contains_key("etag"));
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(body["specversion"], "1.0-rc2");
    assert_eq!(body["xid"], "/");
    assert_eq!(body["noderegistriescount"], 1);
    assert!(body["epoch"].as_u64().unwrap() >= 1);
    assert!(body["createdat"].as_str().unwrap() <= body["modifiedat"].as_str().unwrap());
}

#[tokio::test]
async fn unknown_flags_and_bad_values_are_rejected() {
    let (app, _, _dir) = azure_app().await;

    let (status, _, body) = send(&app, "/?frobnicate=1", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["type"].as_str().unwrap().ends_with("capability_error"));

    let (status, _, body) =
        send(&app, "/noderegistries/npmjs.org/packages?limit=0", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["type"].as_str().unwrap().ends_with("invalid_data"));

    let (status, _, body) =
        send(&app, "/noderegistries/npmjs.org/packages?sort=name%3Dsideways", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["type"].as_str().unwrap().ends_with("invalid_data"));

    let (status, _, body) = send(
        &app,
        "/noderegistries/npmjs.org/packages?filter=downloads%3E100",
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["type"].as_str().unwrap().ends_with("capability_error"));
}

#[tokio::test]
async fn unknown_paths_vs_unknown_entities() {
    let (app, _, _dir) = azure_app().await;

    let (status, _, body) = send(&app, "/mavenregistries", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["type"].as_str().unwrap().ends_with("api_not_found"));

    let (status, _, body) = send(&app, "/noderegistries/ghost.example", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["type"].as_str().unwrap().ends_with("entity_not_found"));

    let (status, _, body) = send(
        &app,
        "/noderegistries/npmjs.org/packages/definitely-not-there",
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
    assert_eq!(body["instance"], "/noderegistries/npmjs.org/packages/definitely-not-there");
}

#[tokio::test]
async fn filter_sort_and_pagination_with_next_link() {
    let (app, _, _dir) = azure_app().await;

    let (status, headers, body) = send(
        &app,
        "/noderegistries/npmjs.org/packages?filter=name%3D*azure*&sort=name%3Dasc&limit=10&offset=10",
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let keys: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 10);
    let expected: Vec<String> = (10..20).map(|i| format!("azure-pkg-{i:02}")).collect();
    assert_eq!(keys, expected.iter().map(String::as_str).collect::<Vec<_>>());

    let link = headers.get("link").unwrap().to_str().unwrap();
    assert!(link.contains("offset=20"));
    assert!(link.contains("rel=\"next\""));

    // Past the end: empty page, no Link.
    let (status, headers, body) = send(
        &app,
        "/noderegistries/npmjs.org/packages?filter=name%3D*azure*&limit=10&offset=500",
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_object().unwrap().is_empty());
    assert!(headers.get("link").is_none());
}

#[tokio::test]
async fn pagination_is_lossless_and_nonoverlapping() {
    let (app, _, _dir) = azure_app().await;

    let mut collected: Vec<String> = Vec::new();
    let mut offset = 0usize;
    loop {
        let uri = format!("/noderegistries/npmjs.org/packages?limit=7&offset={offset}");
        let (status, headers, body) = send(&app, &uri, &[]).await;
        assert_eq!(status, StatusCode::OK);
        let page: Vec<String> = body.as_object().unwrap().keys().cloned().collect();
        for name in &page {
            assert!(!collected.contains(name), "page overlap at {name}");
        }
        collected.extend(page);
        if headers.get("link").is_none() {
            break;
        }
        offset += 7;
    }

    let mut expected = azure_names();
    expected.sort();
    assert_eq!(collected, expected);
}

#[tokio::test]
async fn adding_a_filter_never_enlarges_the_result() {
    let (app, adapter, _dir) = azure_app().await;
    adapter.set_license("azure-pkg-03", "Apache-2.0");
    adapter.set_license("azure-pkg-07", "Apache-2.0");

    let (_, _, unfiltered) = send(
        &app,
        "/noderegistries/npmjs.org/packages?filter=name%3D*azure*&limit=200",
        &[],
    )
    .await;
    let (_, _, narrowed) = send(
        &app,
        "/noderegistries/npmjs.org/packages?filter=name%3D*azure*&filter=license%3DApache-2.0&limit=200",
        &[],
    )
    .await;

    let all = unfiltered.as_object().unwrap().len();
    let narrow = narrowed.as_object().unwrap().len();
    assert_eq!(narrow, 2);
    assert!(narrow <= all);
    assert!(narrowed.as_object().unwrap().contains_key("azure-pkg-03"));
}

#[tokio::test]
async fn enrichment_filter_returns_only_matches() {
    let (app, adapter, _dir) = azure_app().await;
    adapter.set_license("express", "Apache-2.0");

    let (status, _, body) = send(
        &app,
        "/noderegistries/npmjs.org/packages?filter=license%3DApache-2.0&limit=50",
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["express"]);
    assert_eq!(body["express"]["license"], "Apache-2.0");
}

#[tokio::test]
async fn exhausted_fetch_budget_without_answer_is_unavailable() {
    let names = azure_names();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let adapter = Arc::new(TestAdapter::new(&refs));
    let dir = tempfile::tempdir().unwrap();
    let engine = build_engine(
        node_descriptor(),
        adapter,
        dir.path(),
        EngineConfig {
            budget: FilterBudget {
                max_metadata_fetches: 5,
                ..FilterBudget::default()
            },
            ..EngineConfig::default()
        },
    )
    .await;
    let app = backend_router(engine);

    let (status, _, body) = send(
        &app,
        "/noderegistries/npmjs.org/packages?filter=license%3DApache-2.0",
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["type"].as_str().unwrap().ends_with("service_unavailable"));
}

#[tokio::test]
async fn failed_enrichment_degrades_a_satisfied_page() {
    let (app, adapter, _dir) = azure_app().await;
    adapter.fail_on("azure-pkg-00");

    let (status, _, body) =
        send(&app, "/noderegistries/npmjs.org/packages?limit=3", &[]).await;
    assert_eq!(status, StatusCode::OK);
    let entry = &body["azure-pkg-00"];
    // Name-only entity: present with its identity, without domain attrs.
    assert_eq!(entry["packageid"], "azure-pkg-00");
    assert!(entry.get("license").is_none());
    assert_eq!(body["azure-pkg-01"]["license"], "MIT");
}

#[tokio::test]
async fn entity_invariants_hold_with_injected_base_url() {
    let (app, _, _dir) = azure_app().await;
    let base = "http://bridge.example";

    let (status, _, body) = send(
        &app,
        "/noderegistries/npmjs.org/packages/express",
        &[("x-base-url", base)],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let xid = body["xid"].as_str().unwrap();
    let self_url = body["self"].as_str().unwrap();
    assert!(xid.starts_with('/'));
    assert_eq!(self_url, format!("{base}{xid}"));
    assert!(body["epoch"].as_u64().unwrap() >= 1);
    assert!(body["createdat"].as_str().unwrap() <= body["modifiedat"].as_str().unwrap());
    assert_eq!(body["versionsurl"], format!("{base}{xid}/versions"));
    assert_eq!(body["metaurl"], format!("{base}{xid}/meta"));
}

#[tokio::test]
async fn get_is_idempotent_and_honours_if_none_match() {
    let (app, _, _dir) = azure_app().await;
    let uri = "/noderegistries/npmjs.org/packages/lodash";

    let (_, first_headers, _) = send(&app, uri, &[]).await;
    let etag = first_headers.get("etag").unwrap().to_str().unwrap().to_string();

    let (_, second_headers, _) = send(&app, uri, &[]).await;
    assert_eq!(second_headers.get("etag").unwrap().to_str().unwrap(), etag);

    let (status, _, _) = send(&app, uri, &[("if-none-match", etag.as_str())]).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn meta_versions_and_version_meta_paths() {
    let (app, _, _dir) = azure_app().await;

    let (status, _, meta) =
        send(&app, "/noderegistries/npmjs.org/packages/express/meta", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(meta["readonly"], true);
    assert_eq!(meta["defaultversionid"], "1.1.0");

    let (status, headers, versions) =
        send(&app, "/noderegistries/npmjs.org/packages/express/versions", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(versions.as_object().unwrap().len(), 2);
    assert_eq!(headers.get("x-registry-count").unwrap(), "2");

    let (status, _, version) = send(
        &app,
        "/noderegistries/npmjs.org/packages/express/versions/1.1.0",
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(version["versionid"], "1.1.0");
    assert_eq!(version["isdefault"], true);

    let (status, _, version_meta) = send(
        &app,
        "/noderegistries/npmjs.org/packages/express/versions/1.1.0/meta",
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(version_meta["readonly"], true);

    let (status, _, _) = send(
        &app,
        "/noderegistries/npmjs.org/packages/express/versions/9.9.9",
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn inline_embeds_versions_and_meta() {
    let (app, _, _dir) = azure_app().await;

    let (status, _, body) = send(
        &app,
        "/noderegistries/npmjs.org/packages/express?inline=versions,meta",
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["versions"].get("1.0.0").is_some());
    assert_eq!(body["meta"]["readonly"], true);
}

#[tokio::test]
async fn export_redirects_to_doc_view() {
    let (app, _, _dir) = azure_app().await;

    let (status, headers, _) = send(&app, "/export", &[("x-base-url", "http://b")]).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(
        headers.get("location").unwrap().to_str().unwrap(),
        "http://b/?doc&inline=*,capabilities,modelsource"
    );
}

#[tokio::test]
async fn doc_view_embeds_dereferenceable_copies() {
    let (app, _, _dir) = azure_app().await;
    let base = "http://b";

    let (status, _, doc) = send(&app, "/?doc&inline=*", &[("x-base-url", base)]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc.get("capabilities").is_some());
    assert!(doc.get("model").is_some());

    let embedded_group = &doc["noderegistries"]["npmjs.org"];
    let (_, _, direct_group) = send(
        &app,
        "/noderegistries/npmjs.org",
        &[("x-base-url", base)],
    )
    .await;
    assert_eq!(embedded_group["xid"], direct_group["xid"]);
    assert_eq!(embedded_group["self"], direct_group["self"]);
    assert_eq!(embedded_group["packagescount"], direct_group["packagescount"]);
}
