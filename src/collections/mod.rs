//! Generic concurrency primitives the pipeline is built from: a
//! fixed-capacity ring buffer, a partitioned at-least-once queue, a
//! worker pool, and a bounded priority heap. None of these know about
//! candles or orders; they are parameterized over plain trait bounds so
//! the application layer can reuse them verbatim.

pub mod circular_buffer;
pub mod priority_heap;
pub mod queue;
pub mod worker_pool;
