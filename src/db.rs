use crate::config::AppConfig;
use crate::entities;
use metrics::gauge;
use sea_orm::{
    sea_query::Index, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema,
};
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

/// Establishes a connection pool to the database.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, DbErr> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };
    establish_connection_with_config(&config).await
}

/// Establishes a connection pool with custom pool settings.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, DbErr> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(true);

    gauge!("bistro_db.max_connections", config.max_connections as f64);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    Database::connect(opt).await
}

/// Establishes a connection pool from application config.
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    let config = DbConfig {
        url: cfg.database_url.clone(),
        max_connections: cfg.db_max_connections,
        min_connections: cfg.db_min_connections,
        connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
        acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
    };
    establish_connection_with_config(&config).await
}

/// Creates any missing tables and indexes from the entity definitions.
///
/// The ledger carries a unique (order_id, reason) index so the database
/// itself refuses a second ORDER_EARNED row for the same order even if the
/// transactional existence check is ever bypassed.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut stmts = vec![
        schema.create_table_from_entity(entities::user::Entity),
        schema.create_table_from_entity(entities::order::Entity),
        schema.create_table_from_entity(entities::order_item::Entity),
        schema.create_table_from_entity(entities::loyalty_account::Entity),
        schema.create_table_from_entity(entities::loyalty_transaction::Entity),
        schema.create_table_from_entity(entities::reward_notification::Entity),
    ];
    for stmt in stmts.iter_mut() {
        stmt.if_not_exists();
        db.execute(builder.build(&*stmt)).await?;
    }

    let ledger_idx = Index::create()
        .name("uq_loyalty_tx_order_reason")
        .table(entities::loyalty_transaction::Entity)
        .col(entities::loyalty_transaction::Column::OrderId)
        .col(entities::loyalty_transaction::Column::Reason)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&ledger_idx)).await?;

    info!("Database schema ensured");
    Ok(())
}
