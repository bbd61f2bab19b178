//! Background reclamation of disappearing direct messages.

use crate::events::{agent_room, ChatEvent, EventBus};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// Interval between expiry sweeps (seconds).
const SWEEP_INTERVAL_SECS: u64 = 60;

/// Result of a single sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub purged: usize,
}

/// Spawns a background task that periodically deletes direct messages past
/// their expiry and notifies both participants. Notification is best-effort:
/// duplicates are acceptable and a failed sweep is retried on the next tick.
pub fn spawn_expiry_task(db_path: String, bus: EventBus) {
    tokio::spawn(async move {
        let conn = Arc::new(Mutex::new(match Connection::open(&db_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("⚠️ Expiry sweeper: failed to open DB: {e}");
                return;
            }
        }));
        {
            let db = conn.lock().unwrap_or_else(|e| e.into_inner());
            db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
                .ok();
        }

        // Initial delay: let the server start up before the first sweep
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;

        loop {
            {
                let db = conn.lock().unwrap_or_else(|e| {
                    eprintln!("WARN: Expiry sweeper DB mutex poisoned, recovering");
                    e.into_inner()
                });
                let result = run_sweep(&db, &bus);
                if result.purged > 0 {
                    eprintln!("🧹 Expiry sweeper: purged {} direct messages", result.purged);
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
        }
    });
}

/// Execute one sweep: delete every DM whose `expires_at` has passed and emit
/// `dm:expired` to both participants per row.
pub fn run_sweep(conn: &Connection, bus: &EventBus) -> SweepResult {
    let now = chrono::Utc::now().to_rfc3339();

    let expired: Vec<(String, String, String)> = {
        let mut stmt = match conn.prepare(
            "SELECT id, from_agent_id, to_agent_id FROM direct_messages
             WHERE expires_at IS NOT NULL AND expires_at < ?1",
        ) {
            Ok(s) => s,
            Err(_) => return SweepResult::default(),
        };
        match stmt.query_map([&now], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?))) {
            Ok(rows) => rows.filter_map(|r| r.ok()).collect(),
            Err(_) => return SweepResult::default(),
        }
    };

    if expired.is_empty() {
        return SweepResult::default();
    }

    let mut purged = 0usize;

    // Delete in batches to stay under the SQLite variable limit, then notify.
    for chunk in expired.chunks(500) {
        let placeholders: Vec<String> = (0..chunk.len()).map(|i| format!("?{}", i + 1)).collect();
        let sql = format!(
            "DELETE FROM direct_messages WHERE id IN ({})",
            placeholders.join(",")
        );
        let ids: Vec<&String> = chunk.iter().map(|(id, _, _)| id).collect();
        let params_refs: Vec<&dyn rusqlite::types::ToSql> = ids
            .iter()
            .map(|s| *s as &dyn rusqlite::types::ToSql)
            .collect();
        match conn.execute(&sql, params_refs.as_slice()) {
            Ok(n) => purged += n,
            Err(e) => {
                eprintln!("⚠️ Expiry sweeper: delete failed: {e}");
                continue;
            }
        }
        for (id, from_agent, to_agent) in chunk {
            bus.publish(
                agent_room(from_agent),
                ChatEvent::DmExpired {
                    message_id: id.clone(),
                },
            );
            bus.publish(
                agent_room(to_agent),
                ChatEvent::DmExpired {
                    message_id: id.clone(),
                },
            );
        }
    }

    SweepResult { purged }
}
