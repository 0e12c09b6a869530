//! View and folder operations.

use serde_json::Value;
use tokio_postgres::Row;

use anotherai::domain::{Graph, View, ViewFolder};
use anotherai::error::{Error, Result};

use crate::{db_error, TenantScopedStore};

fn view_from_row(row: &Row) -> Result<View> {
    let graph: Option<Graph> = row
        .get::<_, Option<Value>>("graph")
        .map(serde_json::from_value)
        .transpose()?;
    Ok(View {
        id: row.get("id"),
        title: row.get("title"),
        query: row.get("query"),
        graph,
        folder_id: row.get("folder_id"),
        position: row.get("position"),
    })
}

impl TenantScopedStore {
    pub async fn create_or_replace_view(&self, view: &View) -> Result<()> {
        let graph_json = view.graph.as_ref().map(serde_json::to_value).transpose()?;
        let conn = self.acquire().await?;
        let result = conn
            .execute(
                "INSERT INTO views (id, title, query, graph, folder_id, position)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (tenant_uid, id) DO UPDATE SET
                    title = EXCLUDED.title,
                    query = EXCLUDED.query,
                    graph = EXCLUDED.graph,
                    folder_id = EXCLUDED.folder_id,
                    position = EXCLUDED.position,
                    updated_at = NOW()",
                &[
                    &view.id,
                    &view.title,
                    &view.query,
                    &graph_json,
                    &view.folder_id,
                    &view.position,
                ],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        result.map(|_| ())
    }

    pub async fn retrieve_view(&self, view_id: &str) -> Result<View> {
        let conn = self.acquire().await?;
        let result = conn
            .query_opt("SELECT * FROM views WHERE id = $1", &[&view_id])
            .await
            .map_err(db_error);
        conn.release().await;
        result?
            .map(|r| view_from_row(&r))
            .transpose()?
            .ok_or(Error::ObjectNotFound { object_type: "view" })
    }

    /// Patch individual fields; unset arguments leave the column as is.
    pub async fn update_view(
        &self,
        view_id: &str,
        title: Option<&str>,
        query: Option<&str>,
        graph: Option<&Graph>,
        folder_id: Option<&str>,
        position: Option<i32>,
    ) -> Result<()> {
        let graph_json = graph.map(serde_json::to_value).transpose()?;
        let conn = self.acquire().await?;
        let result = conn
            .execute(
                "UPDATE views SET
                    title = COALESCE($2, title),
                    query = COALESCE($3, query),
                    graph = COALESCE($4, graph),
                    folder_id = COALESCE($5, folder_id),
                    position = COALESCE($6, position),
                    updated_at = NOW()
                 WHERE id = $1",
                &[&view_id, &title, &query, &graph_json, &folder_id, &position],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        if result? == 0 {
            return Err(Error::ObjectNotFound { object_type: "view" });
        }
        Ok(())
    }

    pub async fn delete_view(&self, view_id: &str) -> Result<()> {
        let conn = self.acquire().await?;
        let result = conn
            .execute("DELETE FROM views WHERE id = $1", &[&view_id])
            .await
            .map_err(db_error);
        conn.release().await;
        if result? == 0 {
            return Err(Error::ObjectNotFound { object_type: "view" });
        }
        Ok(())
    }

    pub async fn list_views(&self) -> Result<Vec<View>> {
        let conn = self.acquire().await?;
        let result = conn
            .query(
                "SELECT * FROM views ORDER BY position NULLS LAST, created_at ASC",
                &[],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        result?.iter().map(view_from_row).collect()
    }

    pub async fn create_view_folder(&self, folder: &ViewFolder) -> Result<()> {
        let conn = self.acquire().await?;
        let result = conn
            .execute(
                "INSERT INTO view_folders (id, name) VALUES ($1, $2)",
                &[&folder.id, &folder.name],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        result.map(|_| ())
    }

    pub async fn update_folder(&self, folder_id: &str, name: Option<&str>) -> Result<()> {
        let conn = self.acquire().await?;
        let result = conn
            .execute(
                "UPDATE view_folders SET name = COALESCE($2, name) WHERE id = $1",
                &[&folder_id, &name],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        if result? == 0 {
            return Err(Error::ObjectNotFound {
                object_type: "view_folder",
            });
        }
        Ok(())
    }

    /// Delete a folder. Contained views are deleted with it when
    /// `delete_views` is set, detached into the implicit folder otherwise.
    pub async fn delete_folder(&self, folder_id: &str, delete_views: bool) -> Result<()> {
        let conn = self.acquire().await?;
        let result = async {
            if delete_views {
                conn.execute("DELETE FROM views WHERE folder_id = $1", &[&folder_id])
                    .await
                    .map_err(db_error)?;
            } else {
                conn.execute(
                    "UPDATE views SET folder_id = NULL WHERE folder_id = $1",
                    &[&folder_id],
                )
                .await
                .map_err(db_error)?;
            }
            let deleted = conn
                .execute("DELETE FROM view_folders WHERE id = $1", &[&folder_id])
                .await
                .map_err(db_error)?;
            if deleted == 0 {
                return Err(Error::ObjectNotFound {
                    object_type: "view_folder",
                });
            }
            Ok(())
        }
        .await;
        conn.release().await;
        result
    }

    /// Folders newest-first, with the implicit folder `""` holding the
    /// folderless views last.
    pub async fn list_view_folders(&self, include_views: bool) -> Result<Vec<ViewFolder>> {
        let conn = self.acquire().await?;
        let result = async {
            let folder_rows = conn
                .query(
                    "SELECT id, name FROM view_folders ORDER BY created_at DESC",
                    &[],
                )
                .await
                .map_err(db_error)?;
            let mut folders: Vec<ViewFolder> = folder_rows
                .iter()
                .map(|r| ViewFolder {
                    id: r.get("id"),
                    name: r.get("name"),
                    views: include_views.then(Vec::new),
                })
                .collect();
            folders.push(ViewFolder {
                id: String::new(),
                name: String::new(),
                views: include_views.then(Vec::new),
            });

            if include_views {
                let view_rows = conn
                    .query(
                        "SELECT * FROM views ORDER BY position NULLS LAST, created_at ASC",
                        &[],
                    )
                    .await
                    .map_err(db_error)?;
                for row in &view_rows {
                    let view = view_from_row(row)?;
                    let folder_id = view.folder_id.clone().unwrap_or_default();
                    if let Some(folder) = folders.iter_mut().find(|f| f.id == folder_id) {
                        if let Some(views) = folder.views.as_mut() {
                            views.push(view);
                        }
                    }
                }
            }
            Ok(folders)
        }
        .await;
        conn.release().await;
        result
    }
}
