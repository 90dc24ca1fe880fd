//! PostgreSQL integration tests.
//!
//! These spin up a real PostgreSQL instance in Docker via testcontainers.
//!
//! Run with: `cargo test -p helios-tenancy --features db-tests -- postgres`

#![cfg(feature = "db-tests")]

use helios_tenancy::backends::postgres::{PostgresBackend, PostgresConfig, PostgresSslMode};
use helios_tenancy::core::Connection;
use helios_tenancy::provision::{Column, SchemaObject};
use helios_tenancy::{Backend, RequestContext, TenancyConfig, TenancyEngine, TenancyError};

use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared PostgreSQL container reused across all tests in this file.
struct SharedPg {
    host: String,
    port: u16,
    /// Kept alive for the duration of the test binary.
    _container: testcontainers::ContainerAsync<Postgres>,
}

static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

async fn shared_pg() -> &'static SharedPg {
    SHARED_PG
        .get_or_init(|| async {
            let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
            let container = Postgres::default()
                .with_label("github.run_id", &run_id)
                .start()
                .await
                .expect("Failed to start PostgreSQL container");

            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get host port");
            let host = container
                .get_host()
                .await
                .expect("Failed to get host")
                .to_string();

            SharedPg {
                host,
                port,
                _container: container,
            }
        })
        .await
}

async fn create_backend() -> PostgresBackend {
    let pg = shared_pg().await;
    let config = PostgresConfig {
        host: pg.host.clone(),
        port: pg.port,
        dbname: "postgres".to_string(),
        user: "postgres".to_string(),
        password: Some("postgres".to_string()),
        ssl_mode: PostgresSslMode::Disable,
        max_connections: 4,
        ..Default::default()
    };
    PostgresBackend::new(config)
        .await
        .expect("Failed to create PostgresBackend")
}

/// Unique tenant name so tests sharing the container do not collide.
fn unique_tenant(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

fn objects() -> Vec<SchemaObject> {
    vec![
        SchemaObject::table(
            "notes",
            vec![
                Column::new("id", "BIGINT").unwrap(),
                Column::new("body", "TEXT").unwrap(),
            ],
        )
        .unwrap(),
        SchemaObject::unique_index("notes_id_idx", "notes", &["id"]).unwrap(),
    ]
}

#[tokio::test]
async fn postgres_provision_and_isolate_tenants() {
    let engine = TenancyEngine::start(create_backend().await, TenancyConfig::default())
        .await
        .unwrap();
    let ctx = RequestContext::new();
    let acme = unique_tenant("acme");
    let globex = unique_tenant("globex");

    for name in [&acme, &globex] {
        engine
            .provisioner()
            .provision(&ctx, name, &objects())
            .await
            .unwrap();
        // Second run must be a no-op.
        engine
            .provisioner()
            .provision(&ctx, name, &objects())
            .await
            .unwrap();
    }

    let acme_session = engine.db().with_context(&ctx.with_tenant(acme.as_str()));
    let globex_session = engine.db().with_context(&ctx.with_tenant(globex.as_str()));

    acme_session
        .create("INSERT INTO notes (id, body) VALUES (1, 'acme only')")
        .await
        .unwrap();

    let rows = globex_session.query("SELECT id FROM notes").await.unwrap();
    assert!(rows.is_empty());

    let row = acme_session
        .row("SELECT body FROM notes WHERE id = 1")
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(row.get(0), Some("acme only"));
}

#[tokio::test]
async fn postgres_transaction_stays_in_tenant_schema() {
    let engine = TenancyEngine::start(create_backend().await, TenancyConfig::default())
        .await
        .unwrap();
    let ctx = RequestContext::new();
    let tenant = unique_tenant("tx");
    engine
        .provisioner()
        .provision(&ctx, &tenant, &objects())
        .await
        .unwrap();

    let session = engine.db().with_context(&ctx.with_tenant(tenant.as_str()));
    let mut tx = session.begin().await.unwrap();
    tx.create("INSERT INTO notes (id, body) VALUES (1, 'a')").await.unwrap();
    tx.create("INSERT INTO notes (id, body) VALUES (2, 'b')").await.unwrap();
    let rows = tx.query("SHOW search_path").await.unwrap();
    assert!(tx.is_scope_switched());
    assert!(rows[0].get(0).is_some_and(|path| path.contains(tenant.as_str())));
    tx.rollback().await.unwrap();

    let count = session
        .row("SELECT COUNT(*) FROM notes")
        .await
        .unwrap()
        .expect("count row");
    assert_eq!(count.get(0), Some("0"));
}

#[tokio::test]
async fn postgres_admin_connection_fails_closed() {
    let engine = TenancyEngine::start(create_backend().await, TenancyConfig::default())
        .await
        .unwrap();
    let mut admin = engine.admin().lock().await;

    let err = admin
        .execute("CREATE TABLE leaked (id BIGINT)")
        .await
        .unwrap_err();
    assert!(err.is_unknown_schema());

    let rows = admin.query("SELECT 1").await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn postgres_recycled_connection_resets_search_path() {
    let backend = create_backend().await;
    let mut conn = backend.acquire().await.unwrap();
    conn.execute("SET search_path TO \"non_existent_schema_lock\"")
        .await
        .unwrap();
    drop(conn);

    let mut conn = backend.acquire().await.unwrap();
    let rows = conn.query("SHOW search_path").await.unwrap();
    assert!(
        rows[0]
            .get(0)
            .is_some_and(|path| !path.contains("non_existent_schema_lock"))
    );
}

#[tokio::test]
async fn postgres_hostile_identifier_rejected() {
    let engine = TenancyEngine::start(create_backend().await, TenancyConfig::default())
        .await
        .unwrap();
    let err = engine
        .provisioner()
        .provision(&RequestContext::new(), "x\"; DROP SCHEMA public; --", &objects())
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::InvalidIdentifier(_)));

    let ctx = RequestContext::new();
    assert!(engine.provisioner().schema_exists(&ctx, "public").await.unwrap());
}

#[tokio::test]
async fn postgres_drop_tenant() {
    let engine = TenancyEngine::start(create_backend().await, TenancyConfig::default())
        .await
        .unwrap();
    let ctx = RequestContext::new();
    let tenant = unique_tenant("gone");
    engine
        .provisioner()
        .provision(&ctx, &tenant, &objects())
        .await
        .unwrap();
    assert!(engine.provisioner().schema_exists(&ctx, &tenant).await.unwrap());

    engine
        .provisioner()
        .drop_tenant(&ctx, &tenant, true)
        .await
        .unwrap();
    assert!(!engine.provisioner().schema_exists(&ctx, &tenant).await.unwrap());
}
