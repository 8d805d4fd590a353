//! Pure cell formatting for grid rows. Nothing here touches the database.

use serde::Serialize;

/// Free-text cells longer than this are cut and given an ellipsis.
pub const TRUNCATE_AT: usize = 60;

pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Truncates on character boundaries, then escapes.
pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return escape_html(value);
    }
    let cut: String = value.chars().take(max_chars).collect();
    format!("{}…", escape_html(cut.trim_end()))
}

pub fn text(value: &str) -> String {
    escape_html(value)
}

pub fn optional(value: Option<&str>) -> String {
    value.map(escape_html).unwrap_or_default()
}

pub fn badge(active: bool) -> String {
    if active {
        r#"<span class="badge bg-success">Active</span>"#.to_string()
    } else {
        r#"<span class="badge bg-secondary">Inactive</span>"#.to_string()
    }
}

/// Colored badge for enumerated status values such as enrollment status.
pub fn status_badge(value: &str) -> String {
    let class = match value {
        "enrolled" | "met" => "bg-success",
        "completed" | "partially_met" => "bg-info",
        "dropped" | "withdrawn" | "not_met" => "bg-danger",
        _ => "bg-secondary",
    };
    format!(
        r#"<span class="badge {}">{}</span>"#,
        class,
        escape_html(&value.replace('_', " "))
    )
}

/// Edit / toggle / delete controls. `payload` is the row's identifying data,
/// handed to the client-side handlers as a JSON argument inside a
/// double-quoted attribute.
pub fn actions<T: Serialize>(entity: &str, id: i64, payload: &T, active: bool) -> String {
    let json = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    let entity = escape_html(entity);
    let json = escape_html(&json);
    let toggle_label = if active { "Deactivate" } else { "Activate" };

    format!(
        concat!(
            r#"<div class="btn-group btn-group-sm" role="group">"#,
            r#"<button type="button" class="btn btn-outline-primary" onclick="gridEdit('{entity}', {json})">Edit</button>"#,
            r#"<button type="button" class="btn btn-outline-warning" onclick="gridToggle('{entity}', {id}, {json})">{toggle}</button>"#,
            r#"<button type="button" class="btn btn-outline-danger" onclick="gridDelete('{entity}', {id}, {json})">Delete</button>"#,
            "</div>"
        ),
        entity = entity,
        json = json,
        id = id,
        toggle = toggle_label,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escapes_markup_and_quotes() {
        assert_eq!(
            escape_html(r#"<b onclick="x('y')">&</b>"#),
            "&lt;b onclick=&quot;x(&#39;y&#39;)&quot;&gt;&amp;&lt;/b&gt;"
        );
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let long = "é".repeat(70);
        let cell = truncate(&long, TRUNCATE_AT);
        assert!(cell.ends_with('…'));
        assert_eq!(cell.chars().count(), TRUNCATE_AT + 1);
        assert_eq!(truncate("short", TRUNCATE_AT), "short");
    }

    #[test]
    fn truncation_escapes_after_cutting() {
        let value = format!("{}<script>", "a".repeat(58));
        assert_eq!(truncate(&value, TRUNCATE_AT), format!("{}&lt;s…", "a".repeat(58)));
    }

    #[test]
    fn badges_reflect_flag() {
        assert!(badge(true).contains("Active"));
        assert!(badge(false).contains("Inactive"));
        assert!(status_badge("not_met").contains("not met"));
    }

    #[test]
    fn action_payload_cannot_break_out_of_attribute() {
        let cell = actions(
            "students",
            5,
            &json!({"id": 5, "name": "O'Neil \"<x>\""}),
            true,
        );

        assert!(cell.contains("Deactivate"));
        assert!(!cell.contains("O'Neil"));
        assert!(!cell.contains("<x>"));
        assert!(cell.contains("O&#39;Neil"));
        assert!(cell.contains("&quot;id&quot;:5"));
    }
}
