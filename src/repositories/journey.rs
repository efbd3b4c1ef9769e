use std::collections::HashMap;

use sqlx::PgPool;

use crate::db::types::NodeState;

pub(crate) async fn state_map(
    pool: &PgPool,
    user_id: &str,
) -> Result<HashMap<String, NodeState>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, NodeState)>(
        "SELECT node_slug, state FROM journey_states WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

pub(crate) async fn upsert_state(
    executor: impl sqlx::PgExecutor<'_>,
    user_id: &str,
    node_slug: &str,
    state: NodeState,
    updated_at: time::PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO journey_states (user_id, node_slug, state, updated_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (user_id, node_slug)
         DO UPDATE SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at",
    )
    .bind(user_id)
    .bind(node_slug)
    .bind(state)
    .bind(updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// All-or-nothing journey wipe: state mapping and every node instance
/// (revisions, slots, attachments, outcomes cascade with the instances).
pub(crate) async fn reset(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM node_instances WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM journey_states WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;
    use crate::db::types::UserRole;
    use crate::repositories::{instances, programs, users};
    use crate::test_support;
    use uuid::Uuid;

    async fn remaining(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: &str,
    ) -> (i64, i64) {
        let states: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM journey_states WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut **tx)
                .await
                .expect("journey_states count");
        let nodes: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM node_instances WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut **tx)
                .await
                .expect("node_instances count");
        (states, nodes)
    }

    // Runs against a live database when one is configured; the enclosing
    // transaction is dropped at the end, so nothing persists.
    #[tokio::test]
    async fn reset_wipes_the_journey_and_is_idempotent() {
        let Some(pool) = test_support::test_pool().await else { return };
        let now = primitive_now_utc();
        let mut tx = pool.begin().await.expect("tx");

        let user_id = Uuid::new_v4().to_string();
        users::create(
            &mut *tx,
            users::CreateUser {
                id: &user_id,
                email: &format!("{user_id}@example.com"),
                hashed_password: "x".to_string(),
                full_name: "Test Student",
                role: UserRole::Student,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .expect("user");

        let version = programs::create(
            &mut *tx,
            programs::CreateVersion {
                id: &Uuid::new_v4().to_string(),
                program_id: "phd",
                version: "v1",
                checksum: &Uuid::new_v4().to_string(),
                graph: serde_json::json!({"phases": [], "nodes": []}),
                created_by: &user_id,
                created_at: now,
            },
        )
        .await
        .expect("version");

        upsert_state(&mut *tx, &user_id, "orientation", NodeState::Done, now)
            .await
            .expect("state");
        upsert_state(&mut *tx, &user_id, "thesis", NodeState::InProgress, now)
            .await
            .expect("state");
        instances::create_instance(
            &mut *tx,
            instances::CreateInstance {
                id: &Uuid::new_v4().to_string(),
                user_id: &user_id,
                program_version_id: &version.id,
                node_slug: "thesis",
                created_at: now,
            },
        )
        .await
        .expect("instance");

        reset(&mut tx, &user_id).await.expect("first reset");
        assert_eq!(remaining(&mut tx, &user_id).await, (0, 0));

        // A second reset over an already-empty journey must succeed and
        // leave the same empty result.
        reset(&mut tx, &user_id).await.expect("second reset");
        assert_eq!(remaining(&mut tx, &user_id).await, (0, 0));
    }
}
