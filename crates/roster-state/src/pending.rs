use roster_form::{encode_image, ImageSource};
use roster_types::{UserForm, UserId, UserRecord};

use crate::StoreError;

/// Outcome of completing a pending submit or edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    Applied(UserRecord),
    /// The view that started the operation was left before it finished.
    Discarded,
}

impl Commit {
    pub fn applied(&self) -> Option<&UserRecord> {
        match self {
            Commit::Applied(record) => Some(record),
            Commit::Discarded => None,
        }
    }
}

/// A validated create-form submission still waiting for its image.
pub struct PendingSubmit {
    pub(crate) form: UserForm,
    pub(crate) image: Box<dyn ImageSource>,
    pub(crate) generation: u64,
    pub(crate) limit: u64,
}

impl PendingSubmit {
    pub async fn encode(self) -> Result<EncodedSubmit, StoreError> {
        let uri = encode_image(self.image.as_ref(), self.limit).await?;
        Ok(EncodedSubmit {
            form: self.form,
            image: uri.to_string(),
            generation: self.generation,
        })
    }
}

pub struct EncodedSubmit {
    pub(crate) form: UserForm,
    pub(crate) image: String,
    pub(crate) generation: u64,
}

/// A validated edit of the selected record; the image is optional.
pub struct PendingEdit {
    pub(crate) id: UserId,
    pub(crate) form: UserForm,
    pub(crate) image: Option<Box<dyn ImageSource>>,
    pub(crate) generation: u64,
    pub(crate) limit: u64,
}

impl PendingEdit {
    pub fn id(&self) -> UserId {
        self.id
    }

    pub async fn encode(self) -> Result<EncodedEdit, StoreError> {
        let image = match &self.image {
            Some(source) => Some(encode_image(source.as_ref(), self.limit).await?.to_string()),
            None => None,
        };
        Ok(EncodedEdit {
            id: self.id,
            form: self.form,
            image,
            generation: self.generation,
        })
    }
}

pub struct EncodedEdit {
    pub(crate) id: UserId,
    pub(crate) form: UserForm,
    pub(crate) image: Option<String>,
    pub(crate) generation: u64,
}
