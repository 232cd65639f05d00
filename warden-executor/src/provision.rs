//! Provisioning medium: a raw floppy image carrying `KEY=value` lines
//! for the guest's contextualization agent.

use std::collections::BTreeMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use warden_core::InitData;

use crate::SupervisorError;

/// Size of a 1.44 MB floppy image.
pub const FLOPPY_IMAGE_SIZE: usize = 1_474_560;

/// Key/value pairs handed to the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningData {
    entries: BTreeMap<String, String>,
}

impl ProvisioningData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Volunteer and host identity from the init data.
    #[must_use]
    pub fn from_init_data(init: &InitData) -> Self {
        let mut data = Self::new();
        data.insert("BOINC_USERNAME", &init.user_name);
        data.insert("BOINC_AUTHENTICATOR", &init.authenticator);
        data.insert("BOINC_USERID", init.user_id.to_string());
        data.insert("BOINC_HOSTID", init.host_id.to_string());
        data.insert("BOINC_USER_TOTAL_CREDIT", init.user_total_credit.to_string());
        data.insert("BOINC_HOST_TOTAL_CREDIT", init.host_total_credit.to_string());
        data
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One `KEY=<base64 value>` line per entry, sorted by key.
    #[must_use]
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key}={}\n", STANDARD.encode(value)))
            .collect()
    }

    /// The rendered lines zero-padded to a full floppy image.
    ///
    /// # Errors
    /// Returns [`SupervisorError::Provisioning`] if the lines do not fit.
    pub fn to_floppy_image(&self) -> Result<Vec<u8>, SupervisorError> {
        let rendered = self.render();
        if rendered.len() > FLOPPY_IMAGE_SIZE {
            return Err(SupervisorError::Provisioning(format!(
                "{} bytes exceed the {FLOPPY_IMAGE_SIZE}-byte floppy image",
                rendered.len()
            )));
        }
        let mut image = rendered.into_bytes();
        image.resize(FLOPPY_IMAGE_SIZE, 0);
        Ok(image)
    }

    /// Writes the floppy image to `path`.
    ///
    /// # Errors
    /// Returns [`SupervisorError::Provisioning`] or [`SupervisorError::Io`].
    pub async fn write_image(&self, path: &Path) -> Result<(), SupervisorError> {
        let image = self.to_floppy_image()?;
        tokio::fs::write(path, image).await?;
        Ok(())
    }
}
