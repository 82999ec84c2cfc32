//! Containers backing the integration tests.

use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

const DATABASE: &str = "dispatch";

/// Throwaway PostgreSQL server with an empty `dispatch` database.
///
/// The server stops when this value is dropped.
pub struct PostgresContainer {
    _container: ContainerAsync<Postgres>,
    url: String,
}

impl PostgresContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Postgres::default()
            .with_db_name(DATABASE)
            .with_tag("16-alpine")
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let url = format!("postgres://postgres:postgres@{host}:{port}/{DATABASE}");

        Ok(Self {
            _container: container,
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
