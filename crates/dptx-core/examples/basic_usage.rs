//! Basic usage example: one coordinated transaction against the in-memory
//! data plane, including a restart caused by a concurrent writer.
//!
//! Run with: `cargo run --example basic_usage`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dptx_core::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let plane = MemoryDataPlane::new();
    let config = CoordinatorConfig {
        cycle_delay_ms: 10,
        ..CoordinatorConfig::default()
    };
    let coordinator = TransactionCoordinator::new(Arc::new(plane.clone()), &config);

    let raced = Arc::new(AtomicBool::new(false));
    let writer = plane.clone();
    let mutation = mutation_fn(move |_ctx, tx: Transaction| {
        let writer = writer.clone();
        let raced = Arc::clone(&raced);
        async move {
            writer.stage(&tx.id, "backend web")?;
            // Another client commits while the first cycle is in flight.
            if !raced.swap(true, Ordering::SeqCst) {
                writer.bump_version()?;
            }
            Ok::<_, Error>(tx.id)
        }
    });

    let committed = coordinator
        .execute(&CallContext::background(), &mutation)
        .await?;
    println!(
        "Committed {} after {} cycle(s)",
        committed.value, committed.cycles
    );
    println!("Configuration version: {}", plane.version()?);

    Ok(())
}
