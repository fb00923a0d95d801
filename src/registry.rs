use crate::error::{AreaLearningError, ServiceError};
use crate::session::AreaLearningApp;
use crate::Result;

/// Area description (ADF) operations forwarded to the tracking service.
///
/// Borrowed from an [`AreaLearningApp`] via [`AreaLearningApp::adfs`], so that
/// `save` can check the session state.
pub struct AdfRegistry<'a> {
    app: &'a AreaLearningApp,
}

impl<'a> AdfRegistry<'a> {
    pub(crate) fn new(app: &'a AreaLearningApp) -> Self {
        Self { app }
    }

    /// Ids of every stored area description, in service order.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.app.service.list_area_descriptions()?)
    }

    /// All ids joined with commas.
    pub fn joined_ids(&self) -> Result<String> {
        Ok(self.list_ids()?.join(","))
    }

    pub fn get_metadata(&self, id: &str, key: &str) -> Result<String> {
        match self.app.service.metadata(id, key) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(AreaLearningError::key_not_found(key)),
            Err(ServiceError::UnknownAreaDescription(_)) => {
                Err(AreaLearningError::adf_not_found(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_metadata(&self, id: &str, key: &str, value: &str) -> Result<()> {
        self.app
            .service
            .set_metadata(id, key, value)
            .map_err(|e| match e {
                ServiceError::UnknownAreaDescription(_) => AreaLearningError::adf_not_found(id),
                other => AreaLearningError::Persist(other.to_string()),
            })?;
        log::debug!("Set metadata {}={} on {}", key, value, id);
        Ok(())
    }

    /// Delete an area description. Deleting the same id twice fails the
    /// second time.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.app
            .service
            .delete_area_description(id)
            .map_err(|e| match e {
                ServiceError::UnknownAreaDescription(_) => AreaLearningError::adf_not_found(id),
                other => other.into(),
            })?;
        log::info!("Deleted area description {}", id);
        Ok(())
    }

    /// Same as [`AreaLearningApp::save_adf`].
    pub fn save(&self) -> Result<String> {
        self.app.save_adf()
    }
}
