use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use utils::assets::database_url;

pub use sea_orm::{DbErr, SqlErr};

pub mod clock_time;
pub mod entities;
pub mod events;
pub mod models;
pub mod types;

#[derive(Clone)]
pub struct DBService {
    pub pool: DatabaseConnection,
}

impl DBService {
    /// Opens the sqlite file under the asset directory and runs pending
    /// migrations.
    pub async fn new() -> Result<DBService, DbErr> {
        Self::connect(&database_url()).await
    }

    pub async fn connect(url: &str) -> Result<DBService, DbErr> {
        let pool = Database::connect(url).await?;
        db_migration::Migrator::up(&pool, None).await?;
        tracing::debug!(url, "database ready");
        Ok(DBService { pool })
    }

    pub async fn in_memory() -> Result<DBService, DbErr> {
        Self::connect("sqlite::memory:").await
    }
}
