use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::verdict::{OverwritePolicy, UpsertOutcome, Verdict, VerdictRecord, VerdictStatus};

/// Idempotent verdict upsert.
///
/// The conflict clause only replaces a row when the incoming `evaluated_at`
/// is strictly newer and, under `RejectIfComplete`, the stored row is not
/// already complete. A skipped update returns no row.
pub async fn upsert_verdict(
    pool: &PgPool,
    record: &VerdictRecord,
    policy: OverwritePolicy,
) -> Result<UpsertOutcome, sqlx::Error> {
    let verdict_json = record
        .verdict
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    let row = sqlx::query(
        r#"
        INSERT INTO verdicts (content_id, status, verdict, error, evaluated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (content_id) DO UPDATE
        SET status = EXCLUDED.status,
            verdict = EXCLUDED.verdict,
            error = EXCLUDED.error,
            evaluated_at = EXCLUDED.evaluated_at,
            updated_at = NOW()
        WHERE verdicts.evaluated_at < EXCLUDED.evaluated_at
          AND (NOT $6 OR verdicts.status <> 'complete')
        RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(&record.content_id)
    .bind(record.status.to_string())
    .bind(verdict_json)
    .bind(record.error.as_deref())
    .bind(record.evaluated_at)
    .bind(policy.rejects_complete())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(UpsertOutcome::Unchanged);
    };
    let inserted: bool = row.try_get("inserted")?;
    Ok(if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    })
}

/// Get the verdict for a content id
pub async fn get_verdict(pool: &PgPool, content_id: &str) -> Result<Option<VerdictRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT content_id, status, verdict, error, evaluated_at
        FROM verdicts
        WHERE content_id = $1
        "#,
    )
    .bind(content_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| record_from_row(&r)).transpose()
}

fn record_from_row(row: &PgRow) -> Result<VerdictRecord, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<VerdictStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    let verdict_json: Option<serde_json::Value> = row.try_get("verdict")?;
    let verdict = verdict_json
        .map(serde_json::from_value::<Verdict>)
        .transpose()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(VerdictRecord {
        content_id: row.try_get("content_id")?,
        status,
        verdict,
        error: row.try_get("error")?,
        evaluated_at: row.try_get("evaluated_at")?,
    })
}
