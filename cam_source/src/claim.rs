//! Process-wide exclusive claim on the camera.
//!
use std::sync::{Mutex, PoisonError};

use crate::CaptureError;

static CLAIMED_BY: Mutex<Option<String>> = Mutex::new(None);

/// Guard proving that this process holds the one camera slot.
///
/// The slot is freed when the guard is dropped.
#[derive(Debug)]
pub struct DeviceClaim {
    name: String,
}

impl DeviceClaim {
    /// Claim the camera slot for `name`.
    pub fn acquire(name: &str) -> Result<DeviceClaim, CaptureError> {
        let mut claimed_by = CLAIMED_BY.lock().unwrap_or_else(PoisonError::into_inner);
        match claimed_by.as_ref() {
            Some(holder) => Err(CaptureError::Busy(holder.clone())),
            None => {
                *claimed_by = Some(name.to_owned());
                log::debug!("Claimed camera slot for {}", name);
                Ok(DeviceClaim {
                    name: name.to_owned(),
                })
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        let mut claimed_by = CLAIMED_BY.lock().unwrap_or_else(PoisonError::into_inner);
        *claimed_by = None;
        log::debug!("Released camera slot of {}", self.name);
    }
}
