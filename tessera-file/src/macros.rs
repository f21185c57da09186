/// Wrap a future in a span when the `tracing` feature is enabled. The span is created before the
/// future expression is evaluated, so its fields may read values the future takes.
macro_rules! instrument {
    ($span_name:expr, { $($key:ident = $value:expr),* $(,)? }, $task:expr) => {{
        #[cfg(feature = "tracing")]
        {
            use tracing_futures::Instrument as _;
            let span = tracing::debug_span!($span_name, $($key = $value,)*);
            $task.instrument(span)
        }
        #[cfg(not(feature = "tracing"))]
        {
            $task
        }
    }};
}
