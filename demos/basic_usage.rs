//! Basic usage of the layered record-store facade.

use serde::Serialize;
use std::sync::Arc;
use store_guard::{
    dispatch, error::Result, AsyncOperator, BaseOperator, Error, InMemoryStore, Listener,
    Operation, ReadListener, RetryOperator, Selector, Source, StoreConfig,
};

/// Example record: Employment
#[derive(Clone, Serialize, Debug)]
struct Employment {
    id: String,
    loanapp_id: String,
    employer_name: String,
    salary: f64,
}

fn employment(id: &str, loanapp_id: &str, employer_name: &str, salary: f64) -> Employment {
    Employment {
        id: id.to_string(),
        loanapp_id: loanapp_id.to_string(),
        employer_name: employer_name.to_string(),
        salary,
    }
}

/// Prints every completion reaching the dispatch loop.
struct Printer;

impl Listener<Employment> for Printer {
    fn on_done(&self, count: usize, source: &Source<Employment>) {
        match source.record() {
            Some(emp) => println!("   ✓ Done: {} record(s) for {}", count, emp.id),
            None => println!("   ✓ Done: {} record(s)", count),
        }
    }
}

impl ReadListener<Employment> for Printer {
    fn on_read(&self, count: usize, _source: &Source<Employment>, results: &[Employment]) {
        println!("   ✓ Read {} record(s):", count);
        for emp in results {
            println!("     - {} at {} (${:.2})", emp.id, emp.employer_name, emp.salary);
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Store Guard - Basic Example ===\n");

    // 1. Base layer over an in-memory table
    println!("1. Building the base layer...");
    let config = StoreConfig {
        cache_enabled: true,
        ..StoreConfig::from_env()
    };
    let table = InMemoryStore::new(|emp: &Employment| emp.id.clone());
    let base = BaseOperator::from_config("employment", &config)?
        .with_key_fn(|emp: &Employment| emp.id.clone())
        .with_store(table);
    println!("   ✓ Memory cache enabled: {}\n", base.memory_cache().is_enabled());

    // 2. Retry layer, called synchronously
    println!("2. Synchronous save through the retry layer:");
    let safe = RetryOperator::from_config(base, &config)?;
    let saved = safe.save_or_update(&employment("emp_001", "loan_123", "Acme Corp", 75000.0))?;
    println!("   ✓ Saved {} record(s)\n", saved);

    // 3. Async layer with a dispatch loop on its own thread
    println!("3. Asynchronous calls:");
    let (context, dispatch_loop) = dispatch::channel();
    let handle = dispatch_loop
        .spawn("employment-dispatch")
        .map_err(|e| Error::Other(e.to_string()))?;

    let employments = AsyncOperator::new(safe, context);
    let printer = Arc::new(Printer);
    employments.set_listener(printer.clone());
    employments.set_read_listener(printer);

    employments.save_or_update_all(&[
        employment("emp_002", "loan_456", "Tech Inc", 95000.0),
        employment("emp_003", "loan_456", "Tech Inc", 88000.0),
    ])?;

    let mut by_loan = Selector::new();
    by_loan.insert("loanapp_id".to_string(), serde_json::json!("loan_456"));
    employments.read_where(&by_loan)?;
    employments.read(&employment("emp_001", "", "", 0.0))?;
    employments.count_all()?;

    // 4. One-off listener for a single call
    employments
        .on_listener(Arc::new(|count: usize, _: &Source<Employment>| {
            println!("   ✓ Deleted {} record(s) for loan_456", count)
        }))
        .delete_where(&by_loan)?;

    drop(employments);
    if handle.join().is_err() {
        eprintln!("   ✗ Dispatch thread panicked");
    }

    println!("\n=== Example Complete ===\n");

    Ok(())
}
