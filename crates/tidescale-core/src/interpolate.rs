//! `$(VAR)` reference expansion for resolved environment values.
//!
//! Follows container env semantics: `$(NAME)` expands to the looked-up
//! value, `$$` is an escaped literal `$`, and a reference that cannot be
//! resolved (unknown name or missing `)`) is kept verbatim.

/// Expand `$(NAME)` references in `input` using `lookup`.
pub fn interpolate<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('(') {
            match body.find(')') {
                Some(end) => {
                    let name = &body[..end];
                    match lookup(name) {
                        Some(value) if !name.is_empty() => out.push_str(&value),
                        _ => {
                            out.push_str("$(");
                            out.push_str(name);
                            out.push(')');
                        }
                    }
                    rest = &body[end + 1..];
                }
                None => {
                    out.push('$');
                    out.push_str(after);
                    rest = "";
                }
            }
        } else {
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env() -> HashMap<String, String> {
        HashMap::from([
            ("HOST".to_string(), "queue.internal".to_string()),
            ("PORT".to_string(), "5672".to_string()),
        ])
    }

    fn expand(input: &str) -> String {
        let env = env();
        interpolate(input, |name| env.get(name).cloned())
    }

    #[test]
    fn expands_known_references() {
        assert_eq!(expand("amqp://$(HOST):$(PORT)/"), "amqp://queue.internal:5672/");
    }

    #[test]
    fn unknown_reference_left_literal() {
        assert_eq!(expand("$(MISSING)-x"), "$(MISSING)-x");
    }

    #[test]
    fn double_dollar_escapes() {
        assert_eq!(expand("cost: $$5"), "cost: $5");
        assert_eq!(expand("$$(HOST)"), "$(HOST)");
    }

    #[test]
    fn unterminated_reference_left_literal() {
        assert_eq!(expand("prefix $(HOST"), "prefix $(HOST");
    }

    #[test]
    fn lone_dollar_is_kept() {
        assert_eq!(expand("a$b$"), "a$b$");
        assert_eq!(expand("$()"), "$()");
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(expand("no references here"), "no references here");
    }
}
