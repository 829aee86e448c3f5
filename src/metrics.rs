use tracing::trace;

// Trace-backed counters; the Prometheus recorder installed in main renders
// whatever the `metrics` facade records.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "synthstore.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "synthstore.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn generation_attempts(kind: &'static str, attempts: usize) {
    trace!(
        target = "synthstore.metrics",
        kind = kind,
        attempts = attempts as u64,
        "generation_attempts"
    );
}

pub fn apply_outcome(operation: &'static str, succeeded: usize, failed: usize) {
    trace!(
        target = "synthstore.metrics",
        operation = operation,
        succeeded = succeeded as u64,
        failed = failed as u64,
        "apply_outcome"
    );
}
