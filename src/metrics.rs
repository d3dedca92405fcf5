use prometheus::{IntCounter, IntGauge, Registry};

/// Metrics of the era supervisor.
#[derive(Debug)]
pub struct HighwayMetrics {
    /// The number of eras currently loaded in memory.
    pub loaded_eras: IntGauge,
    /// The number of inbound consensus messages handled so far.
    pub messages_handled: IntCounter,
    /// The number of lambda messages this node created.
    pub lambda_messages_created: IntCounter,
    /// Registry the metrics are registered with.
    registry: Registry,
}

impl HighwayMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let loaded_eras = IntGauge::new("loaded_eras", "number of eras currently loaded")?;
        let messages_handled = IntCounter::new(
            "messages_handled",
            "number of inbound consensus messages handled",
        )?;
        let lambda_messages_created = IntCounter::new(
            "lambda_messages_created",
            "number of lambda messages created by this node",
        )?;
        registry.register(Box::new(loaded_eras.clone()))?;
        registry.register(Box::new(messages_handled.clone()))?;
        registry.register(Box::new(lambda_messages_created.clone()))?;
        Ok(HighwayMetrics {
            loaded_eras,
            messages_handled,
            lambda_messages_created,
            registry: registry.clone(),
        })
    }
}

impl Drop for HighwayMetrics {
    fn drop(&mut self) {
        self.registry
            .unregister(Box::new(self.loaded_eras.clone()))
            .expect("did not expect deregistering loaded_eras to fail");
        self.registry
            .unregister(Box::new(self.messages_handled.clone()))
            .expect("did not expect deregistering messages_handled to fail");
        self.registry
            .unregister(Box::new(self.lambda_messages_created.clone()))
            .expect("did not expect deregistering lambda_messages_created to fail");
    }
}
