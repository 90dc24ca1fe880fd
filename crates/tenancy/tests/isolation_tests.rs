//! End-to-end isolation tests against the memory backend.
//!
//! These exercise the full stack: engine startup, provisioning, the search
//! path interceptor and the locked administrative connection.

use std::time::Duration;

use helios_tenancy::backends::memory::MemoryBackend;
use helios_tenancy::provision::{Column, SchemaObject};
use helios_tenancy::{RequestContext, TenancyConfig, TenancyEngine, TenancyError};

// ============================================================================
// Helper Functions
// ============================================================================

fn notes_objects() -> Vec<SchemaObject> {
    vec![
        SchemaObject::table(
            "notes",
            vec![
                Column::new("id", "BIGINT").unwrap(),
                Column::new("body", "TEXT").unwrap(),
            ],
        )
        .unwrap(),
        SchemaObject::index("notes_body_idx", "notes", &["body"]).unwrap(),
    ]
}

async fn start_engine(backend: &MemoryBackend) -> TenancyEngine<MemoryBackend> {
    TenancyEngine::start(backend.clone(), TenancyConfig::default())
        .await
        .expect("engine should start")
}

async fn provisioned(tenants: &[&str]) -> (MemoryBackend, TenancyEngine<MemoryBackend>) {
    let backend = MemoryBackend::new();
    let engine = start_engine(&backend).await;
    for tenant in tenants {
        engine
            .provisioner()
            .provision(&RequestContext::new(), tenant, &notes_objects())
            .await
            .expect("provisioning should succeed");
    }
    backend.clear_statement_log();
    (backend, engine)
}

fn tenant(id: &str) -> RequestContext {
    RequestContext::new().with_tenant(id)
}

// ============================================================================
// Scope Switching
// ============================================================================

#[tokio::test]
async fn test_transaction_switches_once_for_many_operations() {
    let (backend, engine) = provisioned(&["acme"]).await;
    let session = engine.db().with_context(&tenant("acme"));

    let mut tx = session.begin().await.unwrap();
    for i in 0..5 {
        tx.create(&format!("INSERT INTO notes VALUES ({}, 'n{}')", i, i))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        tx.query("SELECT * FROM notes").await.unwrap();
    }
    tx.update("UPDATE notes SET body = 'x' WHERE id = 1").await.unwrap();
    tx.delete("DELETE FROM notes WHERE id = 2").await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(backend.count_statements("SET search_path"), 1);
    assert_eq!(
        backend.count_statements("SET search_path TO \"acme\", \"public\""),
        1
    );
}

#[tokio::test]
async fn test_each_statement_outside_transaction_switches() {
    let (backend, engine) = provisioned(&["acme"]).await;
    let session = engine.db().with_context(&tenant("acme"));

    session.create("INSERT INTO notes VALUES (1, 'a')").await.unwrap();
    session.query("SELECT * FROM notes").await.unwrap();
    session.row("SELECT COUNT(*) FROM notes").await.unwrap();
    session.delete("DELETE FROM notes WHERE id = 1").await.unwrap();

    assert_eq!(backend.count_statements("SET search_path"), 4);
}

#[tokio::test]
async fn test_no_tenant_runs_unscoped_without_error() {
    let (backend, engine) = provisioned(&[]).await;

    let rows = engine
        .db()
        .with_context(&RequestContext::new())
        .query("SELECT schema_name FROM information_schema.schemata")
        .await
        .unwrap();

    assert!(!rows.is_empty());
    assert_eq!(backend.count_statements("SET search_path"), 0);
}

#[tokio::test]
async fn test_tenant_data_is_isolated() {
    let (_backend, engine) = provisioned(&["acme", "globex"]).await;
    let acme = engine.db().with_context(&tenant("acme"));
    let globex = engine.db().with_context(&tenant("globex"));

    acme.create("INSERT INTO notes VALUES (1, 'acme secret')")
        .await
        .unwrap();

    let globex_rows = globex.query("SELECT * FROM notes").await.unwrap();
    assert!(globex_rows.is_empty());

    let acme_rows = acme.query("SELECT body FROM notes").await.unwrap();
    assert_eq!(acme_rows.len(), 1);
    assert_eq!(acme_rows[0].get(0), Some("acme secret"));
}

#[tokio::test]
async fn test_pooled_connection_does_not_leak_previous_tenant() {
    let (backend, engine) = provisioned(&["acme", "globex"]).await;

    engine
        .db()
        .with_context(&tenant("acme"))
        .create("INSERT INTO notes VALUES (1, 'acme')")
        .await
        .unwrap();
    assert_eq!(backend.idle_connections(), 1);

    // The same physical connection comes back still pointed at acme.
    let rows = engine
        .db()
        .with_context(&tenant("globex"))
        .query("SELECT * FROM notes")
        .await
        .unwrap();
    assert!(rows.is_empty());

    let log = backend.statement_log();
    assert_eq!(log.len(), 4);
    assert!(log.iter().all(|s| s.connection_id == log[0].connection_id));
    assert_eq!(log[2].sql, "SET search_path TO \"globex\", \"public\"");
}

#[tokio::test]
async fn test_reset_on_checkout_clears_stale_path_for_unscoped_work() {
    let backend = MemoryBackend::with_options(4, true);
    let engine = start_engine(&backend).await;
    engine
        .provisioner()
        .provision(&RequestContext::new(), "acme", &notes_objects())
        .await
        .unwrap();

    engine
        .db()
        .with_context(&tenant("acme"))
        .query("SELECT * FROM notes")
        .await
        .unwrap();

    // notes exists only in acme; an unscoped checkout must not see it.
    let err = engine
        .db()
        .unscoped()
        .query("SELECT * FROM notes")
        .await
        .unwrap_err();
    assert!(err.backend_error().is_some_and(|e| e.is_unknown_schema()));
}

#[tokio::test]
async fn test_concurrent_tenants_stay_isolated() {
    let tenants = ["t_one", "t_two", "t_three", "t_four"];
    let (backend, engine) = provisioned(&tenants).await;

    let mut handles = Vec::new();
    for name in tenants {
        let session = engine.db().with_context(&tenant(name));
        handles.push(tokio::spawn(async move {
            for i in 0..10 {
                session
                    .create(&format!("INSERT INTO notes VALUES ({}, '{}')", i, name))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for name in tenants {
        let rows = engine
            .db()
            .with_context(&tenant(name))
            .query("SELECT body FROM notes")
            .await
            .unwrap();
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|row| row.get(0) == Some(name)));
    }
    assert!(backend.connections_in_use() == 0);
}

// ============================================================================
// Hostile Input and Cancellation
// ============================================================================

#[tokio::test]
async fn test_hostile_identifier_never_reaches_database() {
    let (backend, engine) = provisioned(&[]).await;
    let hostile = "acme\"; DROP SCHEMA public CASCADE; --";

    let err = engine
        .db()
        .with_context(&tenant(hostile))
        .query("SELECT * FROM notes")
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::InvalidIdentifier(_)));

    let err = engine
        .provisioner()
        .provision(&RequestContext::new(), hostile, &notes_objects())
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::InvalidIdentifier(_)));

    assert!(
        backend
            .statement_log()
            .iter()
            .all(|s| !s.sql.contains("DROP"))
    );
    assert_eq!(backend.count_statements("SET"), 0);
    assert!(backend.schema_exists("public"));
}

#[tokio::test]
async fn test_cancelled_context_issues_nothing() {
    let (backend, engine) = provisioned(&["acme"]).await;
    let ctx = tenant("acme");
    ctx.cancel();

    let err = engine
        .db()
        .with_context(&ctx)
        .query("SELECT * FROM notes")
        .await
        .unwrap_err();

    assert!(matches!(err, TenancyError::Cancelled));
    assert!(backend.statement_log().is_empty());
}

#[tokio::test]
async fn test_expired_deadline_issues_nothing() {
    let (backend, engine) = provisioned(&["acme"]).await;
    let ctx = tenant("acme").with_timeout(Duration::ZERO);

    let err = engine
        .db()
        .with_context(&ctx)
        .create("INSERT INTO notes VALUES (1, 'late')")
        .await
        .unwrap_err();

    assert!(matches!(err, TenancyError::DeadlineExceeded));
    assert!(backend.statement_log().is_empty());
}

// ============================================================================
// Provisioning and Locking
// ============================================================================

#[tokio::test]
async fn test_provisioning_twice_is_idempotent() {
    let backend = MemoryBackend::new();
    let engine = start_engine(&backend).await;
    let ctx = RequestContext::new();

    for _ in 0..2 {
        let schema = engine
            .provisioner()
            .provision(&ctx, "acme_corp", &notes_objects())
            .await
            .unwrap();
        assert_eq!(schema.as_str(), "acme_corp");
    }

    assert_eq!(backend.tables("acme_corp"), vec!["notes".to_string()]);
    assert_eq!(backend.indexes("acme_corp"), vec!["notes_body_idx".to_string()]);
    assert!(backend.tables("public").is_empty());
    assert!(engine.provisioner().schema_exists(&ctx, "acme_corp").await.unwrap());
}

#[tokio::test]
async fn test_admin_connection_fails_closed() {
    let (_backend, engine) = provisioned(&["acme"]).await;
    let mut admin = engine.admin().lock().await;

    let err = admin.query("SELECT * FROM notes").await.unwrap_err();
    assert!(err.is_unknown_schema());

    let err = admin
        .execute("CREATE TABLE leaked (id BIGINT)")
        .await
        .unwrap_err();
    assert!(err.is_unknown_schema());

    let rows = admin.query("SELECT * FROM acme.notes").await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_drop_tenant_removes_schema() {
    let (backend, engine) = provisioned(&["acme"]).await;
    let ctx = RequestContext::new();

    engine.provisioner().drop_tenant(&ctx, "acme", true).await.unwrap();

    assert!(!backend.schema_exists("acme"));
    assert!(!engine.provisioner().schema_exists(&ctx, "acme").await.unwrap());
}
