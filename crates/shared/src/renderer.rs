use std::collections::BTreeMap;

use crate::models::RecipientData;

const DEFAULT_KEYS: &[&str] = &[
    "first_name",
    "last_name",
    "name",
    "email",
    "company",
    "provider",
    "status",
    "account_signature",
    "sender_name",
    "sender_email",
    "sender_first_name",
    "sender_last_name",
    "business_name",
    "website",
    "phone",
    "address",
    "campaign_name",
];

/// Renders `{{placeholder}}` tokens against `context`, silently substituting
/// the empty string for anything unknown. Never fails — a malformed or
/// incomplete template still produces output, per the worker's total-render
/// contract.
pub fn render(subject_src: &str, body_src: &str, context: &RecipientData) -> (String, String) {
    let resolved = build_context(context);
    let subject = substitute(subject_src, &resolved);
    let mut body = substitute(body_src, &resolved);

    if let Some(signature) = resolved.get("account_signature") {
        if !signature.is_empty() && !body_src.contains("{{account_signature}}") {
            body.push_str("<br>");
            body.push_str(signature);
        }
    }

    (subject, body)
}

fn build_context(context: &RecipientData) -> RecipientData {
    let mut resolved: RecipientData = BTreeMap::new();
    for key in DEFAULT_KEYS {
        resolved.insert((*key).to_string(), String::new());
    }
    resolved.insert("unsubscribe_link".to_string(), "#".to_string());

    for (key, value) in context {
        resolved.insert(key.clone(), value.clone());
    }

    if resolved.get("first_name").map(String::is_empty).unwrap_or(true) {
        if let Some(name) = resolved.get("name").cloned() {
            if !name.is_empty() {
                let mut parts = name.splitn(2, ' ');
                let first = parts.next().unwrap_or_default().to_string();
                let last = parts.next().unwrap_or_default().to_string();
                resolved.entry("first_name".to_string()).and_modify(|v| {
                    if v.is_empty() {
                        *v = first;
                    }
                });
                if resolved.get("last_name").map(String::is_empty).unwrap_or(true) {
                    resolved.insert("last_name".to_string(), last);
                }
            }
        }
    }

    if resolved.get("company").map(String::is_empty).unwrap_or(true) {
        if let Some(provider) = resolved.get("provider").cloned() {
            if !provider.is_empty() {
                resolved.insert("company".to_string(), provider);
            }
        }
    }

    let first_name_empty = resolved.get("first_name").map(String::is_empty).unwrap_or(true);
    let name_empty = resolved.get("name").map(String::is_empty).unwrap_or(true);
    if first_name_empty {
        resolved.insert("first_name".to_string(), "there".to_string());
    }
    if name_empty {
        resolved.insert("name".to_string(), "there".to_string());
    }
    if resolved.get("company").map(String::is_empty).unwrap_or(true) {
        resolved.insert("company".to_string(), "your company".to_string());
    }

    resolved
}

fn substitute(source: &str, context: &RecipientData) -> String {
    let mut output = String::with_capacity(source.len());
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if source[i..].starts_with("{{") {
            if let Some(end) = source[i + 2..].find("}}") {
                let key = source[i + 2..i + 2 + end].trim();
                if let Some(value) = context.get(key) {
                    output.push_str(value);
                }
                i += 2 + end + 2;
                continue;
            }
        }
        let ch = source[i..].chars().next().unwrap();
        output.push(ch);
        i += ch.len_utf8();
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pairs: &[(&str, &str)]) -> RecipientData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_placeholders() {
        let ctx = context(&[("first_name", "Ada"), ("company", "Analytical Engines")]);
        let (subject, body) = render(
            "Hello {{first_name}}",
            "Welcome to {{company}}!",
            &ctx,
        );
        assert_eq!(subject, "Hello Ada");
        assert_eq!(body, "Welcome to Analytical Engines!");
    }

    #[test]
    fn unknown_placeholder_renders_empty() {
        let ctx = context(&[]);
        let (_, body) = render("", "Value: {{not_a_real_key}}", &ctx);
        assert_eq!(body, "Value: ");
    }

    #[test]
    fn falls_back_to_friendly_defaults() {
        let ctx = context(&[]);
        let (_, body) = render("", "Hi {{first_name}} from {{company}}", &ctx);
        assert_eq!(body, "Hi there from your company");
    }

    #[test]
    fn splits_name_into_first_and_last() {
        let ctx = context(&[("name", "Grace Hopper")]);
        let (_, body) = render("", "{{first_name}} / {{last_name}}", &ctx);
        assert_eq!(body, "Grace / Hopper");
    }

    #[test]
    fn falls_back_company_to_provider() {
        let ctx = context(&[("provider", "Acme Mail")]);
        let (_, body) = render("", "{{company}}", &ctx);
        assert_eq!(body, "Acme Mail");
    }

    #[test]
    fn appends_signature_when_not_already_referenced() {
        let ctx = context(&[("account_signature", "Sent via Acme")]);
        let (_, body) = render("", "Thanks!", &ctx);
        assert_eq!(body, "Thanks!<br>Sent via Acme");
    }

    #[test]
    fn does_not_double_append_signature_when_already_referenced() {
        let ctx = context(&[("account_signature", "Sent via Acme")]);
        let (_, body) = render("", "Thanks! {{account_signature}}", &ctx);
        assert_eq!(body, "Thanks! Sent via Acme");
    }
}
