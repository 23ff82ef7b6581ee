use thiserror::Error;

/// The internal error taxonomy backing the policy table in spec §7.
///
/// None of these propagate out of `Manager::Run` — each is logged and
/// handled at the point of use per the table's policy. The type exists so
/// the handling code (and its tests) can match on *kind* instead of on a
/// formatted string.
#[derive(Debug, Error)]
pub enum Error {
    #[error("served-ports observer error: {0}")]
    ServedObserve(#[source] anyhow::Error),

    #[error("exposed-ports observer error: {0}")]
    ExposedObserve(#[source] anyhow::Error),

    #[error("config observer error: {0}")]
    ConfigObserve(#[source] anyhow::Error),

    #[error("failed to start proxy for local port {local}: {source}")]
    ProxyStart {
        local: u16,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to submit exposure for local port {local} -> global port {global}: {source}")]
    Expose {
        local: u16,
        global: u16,
        #[source]
        source: anyhow::Error,
    },

    #[error("global port allocator exhausted (range {start}..={end})")]
    AllocatorExhausted { start: u16, end: u16 },

    #[error("unparseable config entry {raw:?}: {reason}")]
    ConfigParse { raw: String, reason: String },
}
