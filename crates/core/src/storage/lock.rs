use anyhow::Context;

// Advisory locks are scoped to the Postgres session. A held lock means another
// pipeline run for the same user is in progress.
const LOCK_NAMESPACE: i64 = 0x5055_4C53_4500; // "PULSE"

fn lock_key_for_user(user_id: i64) -> i64 {
    LOCK_NAMESPACE ^ user_id
}

pub async fn try_acquire_user_lock(
    conn: &mut sqlx::PgConnection,
    user_id: i64,
) -> anyhow::Result<bool> {
    let key = lock_key_for_user(user_id);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_user_lock(conn: &mut sqlx::PgConnection, user_id: i64) -> anyhow::Result<()> {
    let key = lock_key_for_user(user_id);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to release advisory lock (key={key})"))?;
    Ok(())
}
