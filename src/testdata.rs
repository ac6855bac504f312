use std::fs;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

use crate::error::{Error, Result};

pub struct SlowQuery {
    pub query: &'static str,
    pub query_time: f64,
    pub lock_time: f64,
    pub rows_sent: u64,
    pub rows_examined: u64,
    pub user_host: &'static str,
    pub client_ip: &'static str,
    pub timestamp: DateTime<Utc>,
    pub db: &'static str,
}

pub const INSTANCE_NAMES: [&str; 4] = [
    "mysql-instance-1",
    "mysql-instance-2",
    "gcp-mysql-prod",
    "gcp-mysql-dev",
];

fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 5, day, hour, minute, second)
        .single()
        .unwrap_or_default()
}

pub fn sample_queries() -> Vec<SlowQuery> {
    vec![
        SlowQuery {
            query: "SELECT * FROM users WHERE id > 1000 AND last_login > '2023-01-01' ORDER BY created_at DESC LIMIT 100",
            query_time: 2.5,
            lock_time: 0.01,
            rows_sent: 100,
            rows_examined: 1_000_000,
            user_host: "app[app]",
            client_ip: "10.0.1.10",
            timestamp: at(10, 12, 30, 15),
            db: "production",
        },
        SlowQuery {
            query: "SELECT articles.*, users.name FROM articles LEFT JOIN users ON users.id = articles.user_id WHERE articles.published_at > NOW() - INTERVAL 7 DAY",
            query_time: 5.8,
            lock_time: 0.02,
            rows_sent: 250,
            rows_examined: 2_500_000,
            user_host: "web[web]",
            client_ip: "10.0.1.11",
            timestamp: at(10, 13, 15, 22),
            db: "production",
        },
        SlowQuery {
            query: "UPDATE users SET last_login = NOW() WHERE id IN (SELECT user_id FROM sessions WHERE last_activity > NOW() - INTERVAL 1 HOUR)",
            query_time: 3.2,
            lock_time: 1.1,
            rows_sent: 0,
            rows_examined: 500_000,
            user_host: "batch[batch]",
            client_ip: "10.0.1.12",
            timestamp: at(10, 14, 0, 5),
            db: "production",
        },
        SlowQuery {
            query: "DELETE FROM logs WHERE created_at < NOW() - INTERVAL 30 DAY",
            query_time: 8.9,
            lock_time: 4.5,
            rows_sent: 0,
            rows_examined: 5_000_000,
            user_host: "maintenance[maintenance]",
            client_ip: "10.0.1.13",
            timestamp: at(10, 23, 30, 0),
            db: "production",
        },
        SlowQuery {
            query: "SELECT COUNT(*) FROM orders WHERE status = 'pending' GROUP BY user_id",
            query_time: 1.2,
            lock_time: 0.001,
            rows_sent: 5000,
            rows_examined: 800_000,
            user_host: "analytics[analytics]",
            client_ip: "10.0.1.14",
            timestamp: at(11, 9, 15, 30),
            db: "production",
        },
        SlowQuery {
            query: "SELECT products.*, categories.name FROM products JOIN categories ON categories.id = products.category_id WHERE products.stock < 10 ORDER BY products.stock ASC",
            query_time: 0.9,
            lock_time: 0.005,
            rows_sent: 120,
            rows_examined: 250_000,
            user_host: "inventory[inventory]",
            client_ip: "10.0.1.15",
            timestamp: at(11, 10, 45, 12),
            db: "inventory",
        },
        SlowQuery {
            query: "SELECT AVG(amount), DATE(created_at) FROM transactions WHERE created_at > NOW() - INTERVAL 90 DAY GROUP BY DATE(created_at) ORDER BY DATE(created_at)",
            query_time: 4.3,
            lock_time: 0.01,
            rows_sent: 90,
            rows_examined: 3_000_000,
            user_host: "finance[finance]",
            client_ip: "10.0.1.16",
            timestamp: at(11, 15, 20, 35),
            db: "finance",
        },
        SlowQuery {
            query: "INSERT INTO audit_logs (user_id, action, entity_id, created_at) SELECT user_id, 'login', id, created_at FROM sessions WHERE created_at > NOW() - INTERVAL 1 DAY",
            query_time: 2.1,
            lock_time: 0.8,
            rows_sent: 0,
            rows_examined: 150_000,
            user_host: "audit[audit]",
            client_ip: "10.0.1.17",
            timestamp: at(12, 8, 5, 40),
            db: "audit",
        },
    ]
}

pub fn format_entry(q: &SlowQuery) -> String {
    format!(
        "# Time: {}\n\
         # User@Host: {} @ [{}]\n\
         # Query_time: {:.6}  Lock_time: {:.6} Rows_sent: {}  Rows_examined: {}\n\
         use {};\n\
         SET timestamp={};\n\
         {};\n\n",
        q.timestamp.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
        q.user_host,
        q.client_ip,
        q.query_time,
        q.lock_time,
        q.rows_sent,
        q.rows_examined,
        q.db,
        q.timestamp.timestamp(),
        q.query
    )
}

fn render<'a>(queries: impl IntoIterator<Item = &'a SlowQuery>) -> String {
    queries.into_iter().map(format_entry).collect()
}

/// Entries assigned to `instance`, distributed round-robin over
/// `INSTANCE_NAMES`. Unknown names share the first instance's entries.
pub fn instance_log(instance: &str) -> String {
    let slot = INSTANCE_NAMES
        .iter()
        .position(|name| *name == instance)
        .unwrap_or(0);
    let queries = sample_queries();
    render(
        queries
            .iter()
            .enumerate()
            .filter(|(idx, _)| idx % INSTANCE_NAMES.len() == slot)
            .map(|(_, q)| q),
    )
}

pub fn full_log() -> String {
    render(&sample_queries())
}

/// Writes synthetic slow-query logs into `output_dir`, creating it if needed.
pub fn generate(output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir).map_err(|source| Error::Write {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let queries = sample_queries();
    let mut files = vec![
        ("aws-slowquery.log".to_string(), render(&queries)),
        (
            "gcp-slowquery-1.log".to_string(),
            render(queries.iter().step_by(2)),
        ),
        (
            "gcp-slowquery-2.log".to_string(),
            render(queries.iter().skip(1).step_by(2)),
        ),
    ];
    for instance in INSTANCE_NAMES {
        files.push((format!("slowquery.{instance}.log"), instance_log(instance)));
    }

    for (name, contents) in files {
        let path = output_dir.join(name);
        fs::write(&path, contents).map_err(|source| Error::Write {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "wrote test log");
    }

    Ok(())
}
