//! Database statistics and pipeline backlog.
//!
//! Used by `patty stats` to show how much work is waiting for the daemon
//! and how far review has gone.

use anyhow::Result;
use sqlx::SqliteConnection;

use crate::config::Config;
use crate::db;
use crate::store;

/// Row counts and per-stage backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub pdf_files: i64,
    pub textbooks: i64,
    pub exercises: i64,
    pub exercise_classes: i64,
    pub adaptations: i64,
    pub approved_adaptations: i64,
    pub pending_extractions: i64,
    pub pending_classifications: i64,
    pub pending_adaptations: i64,
}

async fn count(conn: &mut SqliteConnection, table: &str) -> Result<i64> {
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(&mut *conn)
        .await?;
    Ok(n)
}

pub async fn collect_stats(conn: &mut SqliteConnection) -> Result<Stats> {
    Ok(Stats {
        pdf_files: count(conn, "pdf_files").await?,
        textbooks: count(conn, "textbooks").await?,
        exercises: count(conn, "exercises").await?,
        exercise_classes: count(conn, "exercise_classes").await?,
        adaptations: count(conn, "adaptations").await?,
        approved_adaptations: store::adaptation::approved_adaptation_ids(conn)
            .await?
            .len() as i64,
        pending_extractions: store::extraction::count_pending_page_extractions(conn).await?,
        pending_classifications: store::classification::count_pending_classifications(conn)
            .await?,
        pending_adaptations: store::adaptation::count_pending_adaptations(conn).await?,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let stats = collect_stats(&mut conn).await?;
    drop(conn);

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Patty — Database Stats");
    println!("======================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  PDF files:     {}", stats.pdf_files);
    println!("  Textbooks:     {}", stats.textbooks);
    println!("  Exercises:     {}", stats.exercises);
    println!("  Classes:       {}", stats.exercise_classes);
    println!(
        "  Adaptations:   {} ({} approved)",
        stats.adaptations, stats.approved_adaptations
    );
    println!();
    println!("  Backlog:");
    println!("    extraction      {:>6}", stats.pending_extractions);
    println!("    classification  {:>6}", stats.pending_classifications);
    println!("    adaptation      {:>6}", stats.pending_adaptations);
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
