//! Helper macros enforcing consistent probe log fields.
//!
//! `dependency` and `kind` are present on every event emitted by the bootstrap and
//! re-check loops so log pipelines can group by dependency without parsing messages.

/// Log a probe lifecycle event for one dependency plus any extra fields.
#[macro_export]
macro_rules! probe_event {
    ($level:ident, $event:expr, dependency = $dependency:expr, kind = $kind:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            dependency = %$dependency,
            kind = %$kind,
            $($field = %$value,)*
            "{}",
            $event
        )
    };
}
