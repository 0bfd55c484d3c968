use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a user record: the creation time in milliseconds since the
/// Unix epoch, bumped when that value is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub address: String,
    pub image: String,
}

impl UserRecord {
    pub fn has_address(&self) -> bool {
        !self.address.is_empty()
    }

    /// Applies edited form values, keeping the id and, when `image` is
    /// `None`, the current image.
    pub fn with_form(&self, form: &UserForm, image: Option<String>) -> Self {
        Self {
            id: self.id,
            name: form.name.clone(),
            email: form.email.clone(),
            phone: form.phone.clone(),
            address: form.address.clone(),
            image: image.unwrap_or_else(|| self.image.clone()),
        }
    }
}

/// Raw, unvalidated text fields as typed into the create or edit form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
}

impl UserForm {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
            address: address.into(),
        }
    }

    /// Pre-fills an edit form from an existing record.
    pub fn from_record(record: &UserRecord) -> Self {
        Self {
            name: record.name.clone(),
            email: record.email.clone(),
            phone: record.phone.clone(),
            address: record.address.clone(),
        }
    }

    pub fn into_record(self, id: UserId, image: String) -> UserRecord {
        UserRecord {
            id,
            name: self.name,
            email: self.email,
            phone: self.phone,
            address: self.address,
            image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_field_names() {
        let record = UserForm::new("Ann", "a@b.com", "1234567890", "")
            .into_record(UserId(1700000000000), "data:image/png;base64,AA==".to_string());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], 1700000000000u64);
        assert_eq!(value["name"], "Ann");
        assert_eq!(value["address"], "");
        assert_eq!(value["image"], "data:image/png;base64,AA==");
    }

    #[test]
    fn test_missing_address_defaults_to_empty() {
        let json = r#"{"id":5,"name":"Bo","email":"b@c.de","phone":"0123456789","image":"x"}"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, UserId(5));
        assert!(!record.has_address());
    }

    #[test]
    fn test_with_form_keeps_image_when_none() {
        let record = UserForm::new("Ann", "a@b.com", "1234567890", "")
            .into_record(UserId(1), "old".to_string());
        let form = UserForm::new("Ann B", "a@b.com", "1234567890", "Main St");

        let edited = record.with_form(&form, None);
        assert_eq!(edited.id, UserId(1));
        assert_eq!(edited.name, "Ann B");
        assert_eq!(edited.image, "old");

        let edited = record.with_form(&form, Some("new".to_string()));
        assert_eq!(edited.image, "new");
    }

    #[test]
    fn test_user_id_parse() {
        assert_eq!(" 42 ".parse::<UserId>().unwrap(), UserId(42));
        assert!("abc".parse::<UserId>().is_err());
    }
}
