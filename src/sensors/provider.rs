use super::{MetricId, ProviderError, SensorReading};

/// A source of readings for a fixed set of metrics.
///
/// `read` may block; the hub runs it on a worker thread and gives up on it
/// after the configured read timeout.
pub trait SensorProvider: Send {
    fn name(&self) -> &str;

    /// Metrics this provider owns. No other provider may publish them.
    fn metrics(&self) -> Vec<MetricId>;

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError>;
}

/// Adapter turning a closure into a provider.
pub struct FnProvider<F> {
    name: String,
    metrics: Vec<MetricId>,
    read: F,
}

impl<F> FnProvider<F>
where
    F: FnMut() -> Result<Vec<SensorReading>, ProviderError> + Send,
{
    pub fn new(name: impl Into<String>, metrics: Vec<MetricId>, read: F) -> Self {
        Self {
            name: name.into(),
            metrics,
            read,
        }
    }
}

impl<F> SensorProvider for FnProvider<F>
where
    F: FnMut() -> Result<Vec<SensorReading>, ProviderError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> Vec<MetricId> {
        self.metrics.clone()
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        (self.read)()
    }
}

/// Publishes only `metrics` out of a wider provider, so one group can be
/// split across several poll intervals.
pub struct SubsetProvider {
    name: String,
    metrics: Vec<MetricId>,
    inner: Box<dyn SensorProvider>,
}

impl SubsetProvider {
    pub fn new(inner: Box<dyn SensorProvider>, metrics: Vec<MetricId>) -> Self {
        let name = match metrics.as_slice() {
            [only] => only.to_string(),
            _ => format!("{}[{}]", inner.name(), metrics.len()),
        };
        Self {
            name,
            metrics,
            inner,
        }
    }
}

impl SensorProvider for SubsetProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> Vec<MetricId> {
        self.metrics.clone()
    }

    fn read(&mut self) -> Result<Vec<SensorReading>, ProviderError> {
        let mut readings = self.inner.read()?;
        readings.retain(|r| self.metrics.contains(&r.metric));
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_drops_foreign_readings() {
        let wide = FnProvider::new("cpu", vec!["cpu.a".into(), "cpu.b".into()], || {
            Ok(vec![
                SensorReading::number("cpu.a", 1.0, ""),
                SensorReading::number("cpu.b", 2.0, ""),
            ])
        });
        let mut only_b = SubsetProvider::new(Box::new(wide), vec!["cpu.b".into()]);
        assert_eq!(only_b.name(), "cpu.b");
        let readings = only_b.read().unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].metric, MetricId::from("cpu.b"));
    }
}
