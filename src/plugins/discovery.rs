//! Plugin discovery - instantiate the plugin types a code unit exports

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::api::PluginFactory;
use super::descriptor::PluginDescriptor;
use super::unit::CodeUnit;
use crate::{Error, Result};

/// Instantiate every plugin type exported by `unit`
///
/// Returns one entry per exported type, in export order. A construction
/// failure (error or panic) only affects its own entry. A unit exporting
/// nothing yields an empty list.
#[must_use]
pub fn discover(unit: &CodeUnit) -> Vec<Result<PluginDescriptor>> {
    unit.exports()
        .iter()
        .map(|factory| instantiate(unit, factory))
        .collect()
}

/// Instantiate `unit`'s exports, logging and dropping the failures
#[must_use]
pub fn discover_usable(unit: &CodeUnit) -> Vec<PluginDescriptor> {
    discover(unit)
        .into_iter()
        .filter_map(|result| match result {
            Ok(descriptor) => {
                tracing::debug!(plugin = %descriptor.id(), "discovered plugin");
                Some(descriptor)
            }
            Err(e) => {
                tracing::warn!(unit = %unit.id(), error = %e, "skipping plugin type");
                None
            }
        })
        .collect()
}

fn instantiate(unit: &CodeUnit, factory: &PluginFactory) -> Result<PluginDescriptor> {
    let type_name = factory.type_name();

    let instance = std::panic::catch_unwind(AssertUnwindSafe(|| factory.construct()))
        .map_err(|panic| Error::Instantiation {
            type_name: type_name.to_string(),
            reason: format!("constructor panicked: {}", panic_message(panic.as_ref())),
        })?
        .map_err(|e| Error::Instantiation {
            type_name: type_name.to_string(),
            reason: format!("{e:#}"),
        })?;

    Ok(PluginDescriptor::new(unit.clone(), type_name, Arc::from(instance)))
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::plugins::api::Plugin;

    #[derive(Default)]
    struct Worker;

    #[async_trait]
    impl Plugin for Worker {
        async fn run(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn failing() -> anyhow::Result<Box<dyn Plugin>> {
        anyhow::bail!("no database")
    }

    fn panicking() -> anyhow::Result<Box<dyn Plugin>> {
        panic!("constructor exploded")
    }

    #[test]
    fn unit_without_exports_discovers_nothing() {
        let unit = CodeUnit::new("/plugins/empty.so", Vec::new());
        assert!(discover(&unit).is_empty());
    }

    #[test]
    fn descriptors_carry_unit_identity() {
        let unit = CodeUnit::new("/plugins/worker.so", vec![PluginFactory::of::<Worker>()]);

        let found = discover_usable(&unit);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id().unit(), unit.id());
        assert!(found[0].id().type_name().ends_with("Worker"));
    }

    #[test]
    fn construction_failure_is_local_to_type() {
        let unit = CodeUnit::new(
            "/plugins/mixed.so",
            vec![
                PluginFactory::new("Failing", failing),
                PluginFactory::of::<Worker>(),
                PluginFactory::new("Panicking", panicking),
            ],
        );

        let results = discover(&unit);
        assert_eq!(results.len(), 3);
        assert!(matches!(
            &results[0],
            Err(Error::Instantiation { type_name, .. }) if type_name == "Failing"
        ));
        assert!(results[1].is_ok());
        match &results[2] {
            Err(Error::Instantiation { reason, .. }) => {
                assert!(reason.contains("constructor exploded"));
            }
            other => panic!("expected instantiation error, got {other:?}"),
        }

        assert_eq!(discover_usable(&unit).len(), 1);
    }
}
