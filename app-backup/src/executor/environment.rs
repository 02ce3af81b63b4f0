//! Input method and accessibility services are switched off for an
//! unattended run and put back afterwards.

use crate::primitives::{EnvironmentToggles, Toggle};
use crate::utils::errors::BackupError;
use tracing::{error, info, warn};

/// Settings captured by [`EnvironmentGuard::acquire`].
///
/// Must be handed back to [`EnvironmentGuard::release`]; dropping it
/// unreleased leaves the device with its services disabled and is logged.
#[derive(Debug)]
#[must_use = "captured settings must be released"]
pub struct CapturedEnvironment {
    values: Vec<(Toggle, String)>,
    released: bool,
}

impl CapturedEnvironment {
    /// Settings that were set before the run and will be restored
    pub fn values(&self) -> &[(Toggle, String)] {
        &self.values
    }
}

impl Drop for CapturedEnvironment {
    fn drop(&mut self) {
        if !self.released && !self.values.is_empty() {
            error!(
                "Captured environment dropped without release; {} settings stay disabled",
                self.values.len()
            );
        }
    }
}

pub struct EnvironmentGuard<'a, T> {
    toggles: &'a T,
}

impl<'a, T: EnvironmentToggles> EnvironmentGuard<'a, T> {
    pub fn new(toggles: &'a T) -> Self {
        Self { toggles }
    }

    /// Snapshot every toggle and clear the ones that are set.
    ///
    /// A toggle that cannot be read is left alone and not restored later.
    pub async fn acquire(&self) -> CapturedEnvironment {
        let mut values = Vec::new();

        for toggle in Toggle::ALL {
            match self.toggles.get(toggle).await {
                Ok(Some(value)) => {
                    if let Err(e) = self.toggles.set(toggle, None).await {
                        warn!("Failed to disable {:?}: {}", toggle, e);
                    }
                    values.push((toggle, value));
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to read {:?}, leaving it untouched: {}", toggle, e),
            }
        }

        info!("Environment captured ({} settings disabled)", values.len());
        CapturedEnvironment {
            values,
            released: false,
        }
    }

    /// Restore exactly what `acquire` captured.
    ///
    /// Failures are logged and returned; they never fail the task.
    pub async fn release(&self, mut captured: CapturedEnvironment) -> Vec<BackupError> {
        let mut errors = Vec::new();

        for (toggle, value) in &captured.values {
            if let Err(e) = self.toggles.set(*toggle, Some(value)).await {
                error!("Failed to restore {:?}: {}", toggle, e);
                errors.push(BackupError::Environment(format!(
                    "restore {:?} to '{}': {}",
                    toggle, value, e
                )));
            }
        }

        captured.released = true;
        info!("Environment restored ({} errors)", errors.len());
        errors
    }
}
