//! HTTP backend tests against a mock PostgREST server.

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{
    body_json, header, method, path, query_param, query_param_contains, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ragversion::config::RemoteConfig;
use ragversion::models::{
    ChangeKind, Chunk, ChunkRecord, Document, DocumentFilter, DocumentSort, Metadata, Version,
    VersionRecord,
};
use ragversion::remote_store::RemoteStore;
use ragversion::{Error, ErrorCategory, Store};

fn remote(server: &MockServer) -> RemoteStore {
    let config = RemoteConfig {
        url: Some(format!("{}/", server.uri())),
        service_key: Some("service-key".into()),
        timeout_secs: 5,
    };
    RemoteStore::new(&config, false).unwrap()
}

fn document_json() -> serde_json::Value {
    json!({
        "id": "doc-1",
        "file_path": "/data/guide.md",
        "file_name": "guide.md",
        "file_type": ".md",
        "file_size": 120,
        "content_hash": "abc123",
        "created_at": "2024-03-01T10:00:00Z",
        "updated_at": "2024-03-02T10:00:00Z",
        "version_count": 2,
        "current_version": 2,
        "metadata": {"team": "docs"}
    })
}

fn document() -> Document {
    serde_json::from_value(document_json()).unwrap()
}

fn version(id: &str, number: i64) -> Version {
    Version {
        id: id.into(),
        document_id: "doc-1".into(),
        version_number: number,
        content_hash: format!("hash-{}", number),
        file_size: Some(10),
        change_kind: ChangeKind::Modified,
        created_at: Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap(),
        created_by: None,
        metadata: Metadata::new(),
    }
}

fn chunk(id: &str, index: i64) -> ChunkRecord {
    ChunkRecord {
        chunk: Chunk {
            id: id.into(),
            document_id: "doc-1".into(),
            version_id: "ver-1".into(),
            chunk_index: index,
            content_hash: format!("chunk-{}", index),
            token_count: 2,
            created_at: Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap(),
            metadata: Metadata::new(),
        },
        text: Some(format!("text {}", index)),
    }
}

#[tokio::test]
async fn test_initialize_checks_documents_with_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(header("apikey", "service-key"))
        .and(header("Authorization", "Bearer service-key"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let store = remote(&server);
    store.initialize().await.unwrap();
    assert!(store.health_check().await);
    store.close().await.unwrap();
    assert!(!store.health_check().await);
}

#[tokio::test]
async fn test_get_document_filters_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(query_param("id", "eq.doc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([document_json()])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(query_param("id", "eq.missing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = remote(&server);
    let doc = store.get_document("doc-1").await.unwrap().unwrap();
    assert_eq!(doc.file_name, "guide.md");
    assert_eq!(doc.current_version, 2);
    assert_eq!(doc.created_at, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    assert_eq!(doc.metadata["team"], "docs");

    assert!(store.get_document("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_server_error_is_a_storage_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .mount(&server)
        .await;

    let store = remote(&server);
    let err = store.get_document("doc-1").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Storage);
    assert!(err.to_string().contains("database unavailable"));
    assert!(!store.health_check().await);
}

#[tokio::test]
async fn test_update_of_unknown_document_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/documents"))
        .and(query_param("id", "eq.doc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = remote(&server);
    let err = store.update_document(&document()).await.unwrap_err();
    assert!(matches!(err, Error::DocumentNotFound(id) if id == "doc-1"));
}

#[tokio::test]
async fn test_create_document_posts_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/documents"))
        .and(header("Prefer", "return=minimal"))
        .and(body_json(document_json()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    remote(&server).create_document(&document()).await.unwrap();
}

#[tokio::test]
async fn test_list_and_search_build_postgrest_queries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(query_param("order", "file_size.desc"))
        .and(query_param("limit", "10"))
        .and(query_param("offset", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([document_json()])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(query_param("metadata", r#"cs.{"team":"docs"}"#))
        .and(query_param("file_type", "eq..md"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([document_json()])))
        .mount(&server)
        .await;

    let store = remote(&server);
    let page = store
        .list_documents(10, 20, DocumentSort::FileSize)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);

    let mut metadata = Metadata::new();
    metadata.insert("team".into(), json!("docs"));
    let filter = DocumentFilter {
        metadata,
        file_type: Some(".md".into()),
    };
    let found = store.search_documents(&filter).await.unwrap();
    assert_eq!(found[0].id, "doc-1");
}

#[tokio::test]
async fn test_content_is_decoded_from_base64() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/content_snapshots"))
        .and(query_param("version_id", "eq.ver-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "version_id": "ver-1",
            "content": "aGVsbG8gd29ybGQ=",
            "compressed": false,
            "original_size": 11
        }])))
        .mount(&server)
        .await;

    let store = remote(&server);
    assert_eq!(
        store.get_content("ver-1").await.unwrap().as_deref(),
        Some("hello world")
    );
}

#[tokio::test]
async fn test_delete_chunks_counts_returned_rows() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/chunks"))
        .and(query_param("version_id", "eq.ver-1"))
        .and(header("Prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "c1"}, {"id": "c2"}])))
        .mount(&server)
        .await;

    let store = remote(&server);
    assert_eq!(store.delete_chunks_by_version("ver-1").await.unwrap(), 2);
}

#[test]
fn test_missing_credentials_are_a_configuration_error() {
    let config = RemoteConfig {
        url: Some("https://db.example.com".into()),
        service_key: Some("  ".into()),
        timeout_secs: 5,
    };
    let err = RemoteStore::new(&config, false).err().unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[tokio::test]
async fn test_failed_chunk_text_upload_removes_inserted_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/chunks"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/chunk_content"))
        .respond_with(ResponseTemplate::new(503).set_body_string("storage quota exceeded"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/chunks"))
        .and(query_param("id", "in.(c1,c2)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "c1"}, {"id": "c2"}])))
        .expect(1)
        .mount(&server)
        .await;

    let store = remote(&server);
    let err = store
        .batch_create_chunks(&[chunk("c1", 0), chunk("c2", 1)])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Storage);
    assert!(err.to_string().contains("storage quota exceeded"));
}

#[tokio::test]
async fn test_failed_content_upload_removes_inserted_versions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/versions"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/content_snapshots"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/versions"))
        .and(query_param("id", "in.(ver-2,ver-3)"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    // The single-version path also cleans up, and a failed cleanup keeps
    // the original error.
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/versions"))
        .and(query_param("id", "in.(ver-4)"))
        .respond_with(ResponseTemplate::new(500).set_body_string("unreachable"))
        .expect(1)
        .mount(&server)
        .await;

    let store = remote(&server);
    let records = vec![
        VersionRecord {
            version: version("ver-2", 2),
            content: Some("two".into()),
        },
        VersionRecord {
            version: version("ver-3", 3),
            content: None,
        },
    ];
    let err = store.batch_create_versions(&records).await.unwrap_err();
    assert!(err.to_string().contains("disk full"));

    let err = store
        .create_version(&version("ver-4", 4), Some("four"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("disk full"));
}

#[tokio::test]
async fn test_append_version_removes_version_when_document_is_gone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/versions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/documents"))
        .and(query_param("id", "eq.doc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/versions"))
        .and(query_param("id", "eq.ver-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "ver-3"}])))
        .expect(1)
        .mount(&server)
        .await;

    let store = remote(&server);
    let err = store
        .append_version(&document(), &version("ver-3", 3), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DocumentNotFound(id) if id == "doc-1"));
}

#[tokio::test]
async fn test_statistics_use_exact_counts_and_page_through_documents() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(header("Prefer", "count=exact"))
        .and(query_param("select", "id"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "0-0/3")
                .set_body_json(json!([{"id": "a"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/versions"))
        .and(header("Prefer", "count=exact"))
        .and(query_param_is_missing("created_at"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "0-0/7000")
                .set_body_json(json!([{"id": "v"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/versions"))
        .and(header("Prefer", "count=exact"))
        .and(query_param_contains("created_at", "gte."))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "0-0/40")
                .set_body_json(json!([{"id": "v"}])),
        )
        .mount(&server)
        .await;

    // The server caps responses at two rows even though more were asked for.
    let scan = "file_type,file_size,created_at";
    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(query_param("select", scan))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"file_type": ".md", "file_size": 100, "created_at": "2024-01-01T00:00:00Z"},
            {"file_type": ".md", "file_size": 50, "created_at": "2024-02-01T00:00:00Z"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(query_param("select", scan))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"file_type": ".pdf", "file_size": 25, "created_at": "2024-03-01T00:00:00Z"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/documents"))
        .and(query_param("select", scan))
        .and(query_param("offset", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let stats = remote(&server).get_statistics().await.unwrap();
    assert_eq!(stats.total_documents, 3);
    assert_eq!(stats.total_versions, 7000);
    assert_eq!(stats.recent_activity_count, 40);
    assert_eq!(stats.total_storage_bytes, 175);
    assert_eq!(stats.documents_by_file_type[".md"], 2);
    assert_eq!(stats.documents_by_file_type[".pdf"], 1);
    assert_eq!(
        stats.oldest_document_date,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(
        stats.newest_document_date,
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
    );
}
