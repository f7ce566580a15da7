// src/ingest/mod.rs
pub mod budget;
pub mod collector;
pub mod normalize;
pub mod providers;
pub mod types;

pub use budget::{BudgetedClient, FetchError, FetchResponse, RequestOptions};
pub use collector::{CollectOptions, Collector, RunSummary, SourceRunSummary};
pub use types::{AdapterError, AdapterOutput, AdapterRegistry, CollectRequest, RawItem, SourceAdapter};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Raw items parsed from source adapters.");
        describe_counter!(
            "collector_items_inserted_total",
            "Items written to the store."
        );
        describe_counter!(
            "collector_items_duplicate_total",
            "Items dropped as duplicates (fingerprint or source/post id)."
        );
        describe_counter!("collector_bytes_total", "Response bytes charged to budgets.");
        describe_counter!(
            "collector_not_modified_total",
            "Conditional requests answered with 304."
        );
        describe_counter!(
            "collector_source_errors_total",
            "Per-source adapter failures."
        );
        describe_counter!(
            "collector_budget_exceeded_total",
            "Byte budget overflows, labelled by scope."
        );
        describe_histogram!("collector_fetch_ms", "Source request time in milliseconds.");
        describe_gauge!(
            "collector_last_run_ts",
            "Unix ts when the collector last ran."
        );
    });
}
