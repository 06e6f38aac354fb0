//! Sample outbox-row generator, mirroring the reference
//! `scripts/generate_outbox_db.py` / `scripts/outbox_generator.py`: inserts
//! a handful of `order`/`invoice`/`user` events across every lifecycle
//! status, for exercising the dispatcher and admin surface by hand.
//!
//! Not part of the core crate's public contract; shipped as a standalone
//! binary so there's something to point the demo registry's handlers at.

use chrono::Utc;
use clap::Parser;

const STATUSES: [&str; 4] = ["pending", "retry", "done", "dead"];

#[derive(Parser)]
#[command(name = "seed", about = "Insert sample outbox_event rows")]
struct Args {
    /// Postgres DSN to seed.
    #[arg(long)]
    dsn: String,

    /// Number of sample rows to insert.
    #[arg(long, default_value_t = 100)]
    count: u32,
}

struct SampleEvent {
    aggregate_type: &'static str,
    aggregate_id: String,
    event_type: &'static str,
    payload: serde_json::Value,
}

fn sample_event(index: u32) -> SampleEvent {
    match index % 3 {
        0 => {
            let order_id = format!("{}", 1000 + index);
            SampleEvent {
                aggregate_type: "order",
                aggregate_id: order_id.clone(),
                event_type: "order.created",
                payload: serde_json::json!({
                    "orderId": order_id,
                    "customerId": format!("C{index:03}"),
                    "totalCents": 1000 + (index as i64 * 37) % 19000,
                }),
            }
        }
        1 => {
            let invoice_id = format!("{}", 2000 + index);
            SampleEvent {
                aggregate_type: "invoice",
                aggregate_id: invoice_id.clone(),
                event_type: "invoice.generated",
                payload: serde_json::json!({
                    "invoiceId": invoice_id,
                    "orderId": format!("{}", 1000 + index),
                    "amountCents": 1000 + (index as i64 * 53) % 19000,
                }),
            }
        }
        _ => SampleEvent {
            aggregate_type: "user",
            aggregate_id: format!("U{index:04}"),
            event_type: "user.registered",
            payload: serde_json::json!({
                "userId": format!("U{index:04}"),
                "email": format!("user{index}@example.invalid"),
            }),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let pool = sqlx::PgPool::connect(&args.dsn).await?;

    for i in 0..args.count {
        let sample = sample_event(i);
        let status = STATUSES[(i as usize) % STATUSES.len()];
        let attempts = (i % 5) as i32;
        let next_run_offset_secs = (i % 600) as i64;
        let next_run_at = Utc::now() - chrono::Duration::seconds(next_run_offset_secs);

        sqlx::query(
            "INSERT INTO outbox_event \
             (aggregate_type, aggregate_id, event_type, payload, status, attempts, next_run_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(sample.aggregate_type)
        .bind(sample.aggregate_id)
        .bind(sample.event_type)
        .bind(sample.payload)
        .bind(status)
        .bind(attempts)
        .bind(next_run_at)
        .execute(&pool)
        .await?;
    }

    println!("seeded {} sample outbox_event rows", args.count);
    Ok(())
}
