use std::sync::OnceLock;

use fastrace::trace;
use regex::Regex;
use roster_types::{Field, FieldErrorKind, FieldErrors, UserForm};

pub const NAME_REQUIRED: &str = "Name is required";
pub const EMAIL_REQUIRED: &str = "Email is required";
pub const EMAIL_INVALID: &str = "Email is invalid";
pub const PHONE_REQUIRED: &str = "Mobile number is required";
pub const PHONE_INVALID: &str = "Mobile number must be 10 digits";
pub const IMAGE_REQUIRED: &str = "Image is required";

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"\S+@\S+\.\S+").expect("email pattern is valid"))
}

fn phone_regex() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(r"^[0-9]{10}$").expect("phone pattern is valid"))
}

/// Checks a new-user form. The image is mandatory here.
#[trace]
pub fn validate_create(form: &UserForm, has_image: bool) -> Result<(), FieldErrors> {
    let mut errors = check_fields(form);
    if !has_image {
        errors.insert(Field::Image, FieldErrorKind::Required, IMAGE_REQUIRED);
    }
    errors.into_result()
}

/// Checks an edit form. A missing image keeps the stored one, so it is never
/// an error.
#[trace]
pub fn validate_edit(form: &UserForm) -> Result<(), FieldErrors> {
    check_fields(form).into_result()
}

fn check_fields(form: &UserForm) -> FieldErrors {
    let mut errors = FieldErrors::new();

    if form.name.trim().is_empty() {
        errors.insert(Field::Name, FieldErrorKind::Required, NAME_REQUIRED);
    }

    if form.email.trim().is_empty() {
        errors.insert(Field::Email, FieldErrorKind::Required, EMAIL_REQUIRED);
    } else if !is_valid_email(&form.email) {
        errors.insert(Field::Email, FieldErrorKind::InvalidFormat, EMAIL_INVALID);
    }

    if form.phone.trim().is_empty() {
        errors.insert(Field::Phone, FieldErrorKind::Required, PHONE_REQUIRED);
    } else if !is_valid_phone(&form.phone) {
        errors.insert(Field::Phone, FieldErrorKind::InvalidFormat, PHONE_INVALID);
    }

    errors
}

/// Loose check: somewhere in the value there is `x@y.z` without whitespace.
pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email)
}

pub fn is_valid_phone(phone: &str) -> bool {
    phone_regex().is_match(phone)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_form() -> UserForm {
        UserForm::new("Ann", "a@b.com", "1234567890", "")
    }

    #[test]
    fn test_valid_form_passes() {
        assert!(validate_create(&valid_form(), true).is_ok());
        assert!(validate_edit(&valid_form()).is_ok());
    }

    #[test]
    fn test_single_invalid_field_reports_only_that_field() {
        let cases = [
            (UserForm { name: "  ".into(), ..valid_form() }, Field::Name, NAME_REQUIRED),
            (UserForm { email: "".into(), ..valid_form() }, Field::Email, EMAIL_REQUIRED),
            (UserForm { email: "ann.example".into(), ..valid_form() }, Field::Email, EMAIL_INVALID),
            (UserForm { phone: " ".into(), ..valid_form() }, Field::Phone, PHONE_REQUIRED),
            (UserForm { phone: "123".into(), ..valid_form() }, Field::Phone, PHONE_INVALID),
        ];

        for (form, field, message) in cases {
            let errors = validate_create(&form, true).unwrap_err();
            assert_eq!(errors.fields().collect::<Vec<_>>(), vec![field], "{:?}", form);
            assert_eq!(errors.message(field), Some(message));
        }
    }

    #[test]
    fn test_all_errors_reported_at_once() {
        let errors = validate_create(&UserForm::default(), false).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert_eq!(errors.get(Field::Name).unwrap().kind, FieldErrorKind::Required);
        assert_eq!(errors.message(Field::Email), Some(EMAIL_REQUIRED));
        assert_eq!(errors.message(Field::Phone), Some(PHONE_REQUIRED));
        assert_eq!(errors.message(Field::Image), Some(IMAGE_REQUIRED));
    }

    #[test]
    fn test_image_only_required_on_create() {
        let errors = validate_create(&valid_form(), false).unwrap_err();
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec![Field::Image]);
        assert!(validate_edit(&valid_form()).is_ok());
    }

    #[test]
    fn test_email_pattern() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.com"));
        assert!(!is_valid_email("a b@c"));
    }

    #[test]
    fn test_phone_pattern() {
        assert!(is_valid_phone("0123456789"));
        assert!(!is_valid_phone("012345678"));
        assert!(!is_valid_phone("01234567890"));
        assert!(!is_valid_phone("012345678a"));
        assert!(!is_valid_phone(" 0123456789"));
        assert!(!is_valid_phone("٠١٢٣٤٥٦٧٨٩"));
    }
}
