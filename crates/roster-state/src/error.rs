use roster_form::ImageError;
use roster_store::StorageError;
use roster_types::{FieldErrors, UserId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid input: {0}")]
    Validation(#[from] FieldErrors),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("No user with id {0}")]
    NotFound(UserId),
    #[error("No user is selected")]
    NoSelection,
}

impl StoreError {
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            StoreError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}
