use roster_form::DataUri;
use roster_types::{FieldErrors, UserId, UserRecord, ViewState};
use serde::Serialize;
use serde_json::{json, Value};

pub const EMPTY_LIST_MESSAGE: &str =
    "No users have been added yet. Fill out the form to add a user.";

pub fn format_user_table(users: &[UserRecord]) -> String {
    if users.is_empty() {
        return EMPTY_LIST_MESSAGE.to_string();
    }

    let header = ["ID", "NAME", "EMAIL", "PHONE", "PROFILE"];
    let rows: Vec<[String; 5]> = users
        .iter()
        .map(|u| {
            [
                u.id.to_string(),
                u.name.clone(),
                u.email.clone(),
                u.phone.clone(),
                describe_image(&u.image),
            ]
        })
        .collect();

    let mut widths = header.map(|h| h.chars().count());
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut lines = vec![format_row(&header.map(str::to_string), &widths)];
    for row in &rows {
        lines.push(format_row(row, &widths));
    }
    lines.push(String::new());
    lines.push(format!("{} user(s)", users.len()));
    lines.join("\n")
}

fn format_row(cells: &[String; 5], widths: &[usize; 5]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths.iter())
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect();
    padded.join("  ").trim_end().to_string()
}

pub fn format_user_detail(user: &UserRecord) -> String {
    let mut lines = vec![
        user.name.clone(),
        String::new(),
        format!("  Id:      {}", user.id),
        format!("  Email:   {}", user.email),
        format!("  Phone:   {}", user.phone),
    ];
    if user.has_address() {
        lines.push(format!("  Address: {}", user.address));
    }
    lines.push(format!("  Image:   {}", describe_image(&user.image)));
    lines.join("\n")
}

pub fn format_field_errors(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(field, error)| format!("  {}: {}", field, error.message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders the whole screen: the form or selected user on top, the user
/// list below.
pub fn format_screen(view: ViewState, users: &[UserRecord]) -> String {
    let find = |id: UserId| users.iter().find(|u| u.id == id);

    let panel = match view {
        ViewState::Form => "User Information\n\n  Fill out the form with `submit` to add a user.".to_string(),
        ViewState::Detail { id, editing } => match find(id) {
            Some(user) if editing => format!(
                "Edit User\n\n{}\n\n  Leave the image empty to keep the current one; `save` or `cancel`.",
                format_user_detail(user)
            ),
            Some(user) => format_user_detail(user),
            None => "No user selected.".to_string(),
        },
        ViewState::ListOnly => "No user selected.".to_string(),
    };

    format!("{}\n\nUsers List\n\n{}", panel, format_user_table(users))
}

/// `mime, size` for a data URI, or a short note when it is not one.
pub fn describe_image(image: &str) -> String {
    match DataUri::parse(image) {
        Ok(uri) => format!("{}, {}", uri.mime(), format_size(uri.decoded_len() as u64)),
        Err(_) if image.is_empty() => "none".to_string(),
        Err(_) => "unrecognized".to_string(),
    }
}

pub fn format_size(size: u64) -> String {
    if size < 1024 {
        format!("{}B", size)
    } else if size < 1024 * 1024 {
        format!("{:.1}KB", size as f64 / 1024.0)
    } else {
        format!("{:.1}MB", size as f64 / (1024.0 * 1024.0))
    }
}

pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

pub fn view_json(view: ViewState, users: &[UserRecord]) -> Value {
    let selected = view
        .selected()
        .and_then(|id| users.iter().find(|u| u.id == id));
    json!({
        "view": view,
        "selected": selected,
        "users": users,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_types::UserForm;

    fn user(id: u64, name: &str, address: &str) -> UserRecord {
        UserForm::new(name, format!("{}@example.com", name.to_lowercase()), "1234567890", address)
            .into_record(UserId(id), "data:image/png;base64,iVBORw0KGgo=".to_string())
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(format_user_table(&[]), EMPTY_LIST_MESSAGE);
    }

    #[test]
    fn test_table_aligns_columns() {
        let out = format_user_table(&[user(1, "Ann", ""), user(22, "Bartholomew", "")]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "ID  NAME         EMAIL                    PHONE       PROFILE");
        assert_eq!(lines[1], "1   Ann          ann@example.com          1234567890  image/png, 8B");
        assert_eq!(lines[2], "22  Bartholomew  bartholomew@example.com  1234567890  image/png, 8B");
        assert_eq!(lines.last(), Some(&"2 user(s)"));
    }

    #[test]
    fn test_detail_hides_empty_address() {
        let without = format_user_detail(&user(1, "Ann", ""));
        assert!(!without.contains("Address"));

        let with = format_user_detail(&user(1, "Ann", "1 Main St"));
        assert!(with.contains("  Address: 1 Main St"));
        assert!(with.starts_with("Ann\n"));
    }

    #[test]
    fn test_screen_panels() {
        let users = vec![user(1, "Ann", "")];
        assert!(format_screen(ViewState::Form, &users).starts_with("User Information"));
        assert!(format_screen(ViewState::ListOnly, &users).starts_with("No user selected."));
        assert!(format_screen(ViewState::detail(UserId(1)), &users).starts_with("Ann"));
        let editing = ViewState::Detail { id: UserId(1), editing: true };
        assert!(format_screen(editing, &users).starts_with("Edit User"));
        assert!(format_screen(ViewState::Form, &[]).ends_with(EMPTY_LIST_MESSAGE));
    }

    #[test]
    fn test_describe_image() {
        assert_eq!(describe_image(""), "none");
        assert_eq!(describe_image("https://example.com/a.png"), "unrecognized");
        assert_eq!(describe_image("data:image/gif;base64,R0lGODlh"), "image/gif, 6B");
    }

    #[test]
    fn test_view_json() {
        let users = vec![user(1, "Ann", "")];
        let value = view_json(ViewState::detail(UserId(1)), &users);
        assert_eq!(value["view"]["view"], "detail");
        assert_eq!(value["selected"]["name"], "Ann");
        assert_eq!(value["users"].as_array().unwrap().len(), 1);
    }
}
