use prometheus_client::{metrics::counter::Counter, registry::Registry};

/// Counters describing how requests were served.
#[derive(Default)]
pub(crate) struct Metrics {
    pub hits: Counter,
    pub late_hits: Counter,
    pub recycled: Counter,
    pub stolen: Counter,
    pub exhausted: Counter,
    pub reads: Counter,
    pub writes: Counter,
}

impl Metrics {
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "hits",
            "Number of lookups served from the home shard without the global lock",
            self.hits.clone(),
        );
        registry.register(
            "late_hits",
            "Number of lookups found resident only after taking the global lock",
            self.late_hits.clone(),
        );
        registry.register(
            "recycled",
            "Number of free buffers reused from the home shard",
            self.recycled.clone(),
        );
        registry.register(
            "stolen",
            "Number of free buffers migrated from another shard",
            self.stolen.clone(),
        );
        registry.register(
            "exhausted",
            "Number of lookups that found no free buffer",
            self.exhausted.clone(),
        );
        registry.register("reads", "Number of blocks read from disk", self.reads.clone());
        registry.register("writes", "Number of blocks written to disk", self.writes.clone());
    }
}
