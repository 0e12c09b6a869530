//! Agent operations, scoped to the tenant context.

use tokio_postgres::Row;

use anotherai::domain::Agent;
use anotherai::error::{Error, Result};

use crate::{db_error, from_naive, is_unique_violation, TenantScopedStore};

fn agent_from_row(row: &Row) -> Agent {
    Agent {
        id: row.get("slug"),
        uid: row.get::<_, i64>("uid") as u32,
        name: row.get("name"),
        created_at: from_naive(row.get("created_at")),
    }
}

impl TenantScopedStore {
    /// Store an agent, assigning its uid on first creation. Storing an
    /// existing slug returns the stored agent unchanged.
    pub async fn store_agent(&self, agent: &mut Agent) -> Result<()> {
        if agent.uid == 0 {
            agent.uid = Agent::new_uid();
        }
        let conn = self.acquire().await?;
        let result = conn
            .execute(
                "INSERT INTO agents (uid, slug, name) VALUES ($1, $2, $3)",
                &[&i64::from(agent.uid), &agent.id, &agent.name],
            )
            .await
            .map_err(db_error);
        let result = match result {
            Ok(_) => {
                let row = conn
                    .query_one("SELECT * FROM agents WHERE slug = $1", &[&agent.id])
                    .await
                    .map_err(db_error);
                row.map(|r| {
                    *agent = agent_from_row(&r);
                })
            }
            Err(e) if is_unique_violation(&e) => {
                // Existing slug: adopt the stored uid.
                let row = conn
                    .query_one("SELECT * FROM agents WHERE slug = $1", &[&agent.id])
                    .await
                    .map_err(db_error);
                row.map(|r| {
                    *agent = agent_from_row(&r);
                })
            }
            Err(e) => Err(e),
        };
        conn.release().await;
        result
    }

    pub async fn agent_by_id(&self, agent_id: &str) -> Result<Agent> {
        let conn = self.acquire().await?;
        let result = conn
            .query_opt("SELECT * FROM agents WHERE slug = $1", &[&agent_id])
            .await
            .map_err(db_error);
        conn.release().await;
        result?
            .map(|r| agent_from_row(&r))
            .ok_or(Error::ObjectNotFound {
                object_type: "agent",
            })
    }

    pub async fn agent_by_uid(&self, agent_uid: u32) -> Result<Agent> {
        let conn = self.acquire().await?;
        let result = conn
            .query_opt(
                "SELECT * FROM agents WHERE uid = $1",
                &[&i64::from(agent_uid)],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        result?
            .map(|r| agent_from_row(&r))
            .ok_or(Error::ObjectNotFound {
                object_type: "agent",
            })
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.acquire().await?;
        let result = conn
            .query("SELECT * FROM agents ORDER BY created_at ASC", &[])
            .await
            .map_err(db_error);
        conn.release().await;
        Ok(result?.iter().map(agent_from_row).collect())
    }
}
